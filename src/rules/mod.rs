//! Rule module for Sumi-Sieve
//!
//! This module compiles the configured structural rules into an ordered match table
//! and provides the substitution templates used for fetch URLs and output paths.

mod ruleset;
mod template;

pub use ruleset::{Persist, Rule, RuleSet, DEFAULT_NEXT_PAGE_SELECTOR};
pub use template::Template;

use regex::Captures;

/// Values captured by a rule's pattern, indexed like regex capture groups
///
/// Group 0 is the whole URL. Groups that did not take part in the match are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MatchGroups {
    values: Vec<Option<String>>,
}

impl MatchGroups {
    /// Copies the captured values out of a regex match
    pub fn from_captures(caps: &Captures<'_>) -> Self {
        Self {
            values: caps
                .iter()
                .map(|m| m.map(|m| m.as_str().to_string()))
                .collect(),
        }
    }

    /// Gets the value of a group, if it participated in the match
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
