//! Substitution templates
//!
//! Templates use the same replacement syntax as the `regex` crate: `$1`, `$name`,
//! `${name}` and `$$` for a literal dollar sign. A template is compiled once against
//! the pattern it belongs to, so every group reference is resolved to a capture index
//! before crawling starts.

use crate::rules::MatchGroups;
use regex::Regex;

/// A piece of a compiled template
#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Group(usize),
}

/// A substitution template bound to a specific pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    /// Compiles `source` against the capture groups of `pattern`
    ///
    /// # Returns
    ///
    /// * `Ok(Template)` - Every group reference exists in `pattern`
    /// * `Err(String)` - Description of the first bad reference
    pub fn compile(source: &str, pattern: &Regex) -> Result<Self, String> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(pos) = rest.find('$') {
            literal.push_str(&rest[..pos]);
            rest = &rest[pos + 1..];

            if let Some(after) = rest.strip_prefix('$') {
                literal.push('$');
                rest = after;
                continue;
            }

            let (name, after) = if let Some(braced) = rest.strip_prefix('{') {
                let end = braced
                    .find('}')
                    .ok_or_else(|| format!("unterminated '${{' in template '{}'", source))?;
                (&braced[..end], &braced[end + 1..])
            } else {
                let end = rest
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(rest.len());
                (&rest[..end], &rest[end..])
            };

            if name.is_empty() {
                return Err(format!(
                    "dangling '$' in template '{}' (use '$$' for a literal dollar)",
                    source
                ));
            }

            let index = resolve_group(name, pattern).ok_or_else(|| {
                format!(
                    "template '{}' references group '{}' which does not exist in pattern '{}'",
                    source,
                    name,
                    pattern.as_str()
                )
            })?;

            if !literal.is_empty() {
                parts.push(Part::Literal(std::mem::take(&mut literal)));
            }
            parts.push(Part::Group(index));
            rest = after;
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            parts,
        })
    }

    /// Expands the template with captured values
    ///
    /// Groups that did not take part in the match expand to the empty string.
    pub fn expand(&self, groups: &MatchGroups) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Group(index) => out.push_str(groups.get(*index).unwrap_or("")),
            }
        }
        out
    }

    /// The template as written in the config
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Maps a group reference to its capture index
fn resolve_group(name: &str, pattern: &Regex) -> Option<usize> {
    if let Ok(index) = name.parse::<usize>() {
        return (index < pattern.captures_len()).then_some(index);
    }

    pattern
        .capture_names()
        .position(|candidate| candidate == Some(name))
}
