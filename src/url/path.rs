//! Output path and resource identity resolution
//!
//! A matched rule decides where a resource is written (its `file-path` template, or a
//! path derived from the URL) and what is fetched (its `as-url` template, or the URL
//! itself). The fetched URL doubles as the canonical resource id used by the frontier
//! and the ledger.

use crate::rules::{MatchGroups, Rule};
use crate::state::ResourceId;
use crate::url::normalize_url;
use crate::ResolveError;
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Turns rule matches into paths under the save directory
#[derive(Debug, Clone)]
pub struct PathResolver {
    save_dir: PathBuf,
}

impl PathResolver {
    pub fn new(save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
        }
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    /// Resolves the absolute output path for a match
    ///
    /// # Arguments
    ///
    /// * `rule` - The rule that matched
    /// * `groups` - Groups captured by the rule's pattern
    /// * `url` - The matched URL (used when the rule has no `file-path`)
    ///
    /// # Returns
    ///
    /// * `Ok(PathBuf)` - A path inside the save directory
    /// * `Err(ResolveError::PathTraversal)` - The path would leave the save directory
    /// * `Err(ResolveError::EmptyPath)` - The template expanded to nothing
    ///
    /// # Example
    ///
    /// ```
    /// use sumi_sieve::config::RuleConfig;
    /// use sumi_sieve::rules::RuleSet;
    /// use sumi_sieve::url::PathResolver;
    /// use url::Url;
    ///
    /// let config = RuleConfig {
    ///     url: r"https://example\.com/(\d+)".to_string(),
    ///     selector: None,
    ///     as_url: None,
    ///     file_path: Some("pages/$1.html".to_string()),
    ///     paging: false,
    ///     next_page: None,
    ///     follow: true,
    /// };
    /// let rules = RuleSet::compile(&[config], &[]).unwrap();
    /// let (rule, groups) = rules.matches("https://example.com/7").unwrap();
    /// let url = Url::parse("https://example.com/7").unwrap();
    ///
    /// let resolver = PathResolver::new("/out");
    /// let path = resolver.resolve(rule, &groups, &url).unwrap();
    /// assert_eq!(path, std::path::Path::new("/out/pages/7.html"));
    /// ```
    pub fn resolve(
        &self,
        rule: &Rule,
        groups: &MatchGroups,
        url: &Url,
    ) -> Result<PathBuf, ResolveError> {
        let relative = match &rule.file_path_template {
            Some(template) => template.expand(groups),
            None => default_relative_path(url),
        };

        if relative.trim().is_empty() {
            return Err(ResolveError::EmptyPath {
                url: url.to_string(),
            });
        }

        let relative = safe_relative_path(&relative)?;
        Ok(self.save_dir.join(relative))
    }

    /// Computes the canonical resource id and the URL that is actually fetched
    ///
    /// With an `as-url` template the expanded template is both the fetch target and
    /// the id; otherwise the matched URL is.
    pub fn canonical_id(
        rule: &Rule,
        groups: &MatchGroups,
        url: &Url,
    ) -> Result<(ResourceId, Url), ResolveError> {
        let target = match &rule.as_url_template {
            Some(template) => normalize_url(&template.expand(groups))?,
            None => {
                let mut url = url.clone();
                url.set_fragment(None);
                url
            }
        };

        Ok((ResourceId::from(&target), target))
    }
}

/// File name every default output path ends in
pub const INDEX_FILE_NAME: &str = "index.html";

/// Derives a relative output path from a URL
///
/// The host comes first (with `_port` appended for explicit ports), followed by one
/// directory per path segment and a query string folded into the last segment as
/// `_<query>`. The content itself is always written to `index.html` inside that
/// directory, so a page's file never sits where a deeper page needs a directory.
/// Segments starting with `index.html` get a trailing `_`.
///
/// ```
/// use sumi_sieve::url::default_relative_path;
/// use url::Url;
///
/// let url = Url::parse("http://x/").unwrap();
/// assert_eq!(default_relative_path(&url), "x/index.html");
///
/// let url = Url::parse("https://example.com/a/b.html?page=2").unwrap();
/// assert_eq!(default_relative_path(&url), "example.com/a/b.html_page=2/index.html");
/// ```
pub fn default_relative_path(url: &Url) -> String {
    let mut parts = Vec::new();

    let host = url.host_str().unwrap_or("unknown-host");
    match url.port() {
        Some(port) => parts.push(format!("{}_{}", host, port)),
        None => parts.push(host.to_string()),
    }

    let mut segments: Vec<String> = url
        .path_segments()
        .map(|segments| {
            segments
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        let query = query.replace(['/', '\\'], "_");
        match segments.last_mut() {
            Some(last) => {
                last.push('_');
                last.push_str(&query);
            }
            None => segments.push(format!("_{}", query)),
        }
    }

    parts.extend(segments.into_iter().map(|segment| {
        if segment.starts_with(INDEX_FILE_NAME) {
            segment + "_"
        } else {
            segment
        }
    }));
    parts.push(INDEX_FILE_NAME.to_string());

    parts.join("/")
}

/// Splits a template result into path components and refuses anything that could
/// point outside the save directory
fn safe_relative_path(raw: &str) -> Result<PathBuf, ResolveError> {
    let traversal = || ResolveError::PathTraversal {
        path: raw.to_string(),
    };

    if raw.contains('\0') || raw.starts_with('/') || raw.starts_with('\\') {
        return Err(traversal());
    }

    let mut path = PathBuf::new();
    for component in raw.split(['/', '\\']) {
        match component {
            "" | "." => continue,
            ".." => return Err(traversal()),
            other => path.push(other),
        }
    }

    if path.as_os_str().is_empty() {
        return Err(ResolveError::EmptyPath {
            url: raw.to_string(),
        });
    }

    // Catches platform prefixes such as `C:` that `push` would treat as absolute
    if !path
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        return Err(traversal());
    }

    Ok(path)
}
