//! Ordered rule table
//!
//! Rules are compiled once from the configuration and shared read-only by every
//! worker. Matching walks the table in declaration order and stops at the first rule
//! whose pattern matches the whole URL.

use crate::config::RuleConfig;
use crate::rules::{MatchGroups, Template};
use crate::ConfigError;
use regex::Regex;

/// Selector used to find the next page when a paging rule does not name one
pub const DEFAULT_NEXT_PAGE_SELECTOR: &str = r#"a[rel~="next"], link[rel~="next"]"#;

/// What a rule keeps from a fetched resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persist {
    /// Serialized nodes selected by the expression
    Selected(String),
    /// The raw response body
    Body,
    /// Nothing; the rule only exists to discover links
    Nothing,
}

/// One compiled structural rule
#[derive(Debug, Clone)]
pub struct Rule {
    /// Position in the rule table
    pub index: usize,
    pub url_pattern: Regex,
    pub content_selector: Option<String>,
    pub as_url_template: Option<Template>,
    pub file_path_template: Option<Template>,
    pub paging: bool,
    pub next_page_selector: String,
    pub follow: bool,
}

impl Rule {
    /// Compiles a rule from its config entry
    pub fn compile(index: usize, config: &RuleConfig) -> Result<Self, ConfigError> {
        let url_pattern = anchored(&config.url).map_err(|e| ConfigError::InvalidPattern {
            rule: index,
            message: format!("'{}': {}", config.url, e),
        })?;

        let compile_template = |source: &Option<String>| -> Result<Option<Template>, ConfigError> {
            source
                .as_deref()
                .map(|s| Template::compile(s, &url_pattern))
                .transpose()
                .map_err(|message| ConfigError::InvalidTemplate {
                    rule: index,
                    message,
                })
        };

        let as_url_template = compile_template(&config.as_url)?;
        let file_path_template = compile_template(&config.file_path)?;

        Ok(Self {
            index,
            url_pattern,
            content_selector: config.selector.clone(),
            as_url_template,
            file_path_template,
            paging: config.paging,
            next_page_selector: config
                .next_page
                .clone()
                .unwrap_or_else(|| DEFAULT_NEXT_PAGE_SELECTOR.to_string()),
            follow: config.follow,
        })
    }

    /// Matches `url` against this rule's pattern
    pub fn captures(&self, url: &str) -> Option<MatchGroups> {
        self.url_pattern
            .captures(url)
            .map(|caps| MatchGroups::from_captures(&caps))
    }

    /// Decides what gets written for resources matched by this rule
    pub fn persist(&self) -> Persist {
        match (&self.content_selector, &self.file_path_template) {
            (Some(selector), _) => Persist::Selected(selector.clone()),
            (None, Some(_)) => Persist::Body,
            (None, None) => Persist::Nothing,
        }
    }
}

/// The ordered, immutable rule table
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
    ignore: Vec<Regex>,
}

impl RuleSet {
    /// Compiles rules and ignore patterns
    ///
    /// # Returns
    ///
    /// * `Ok(RuleSet)` - Every pattern and template is valid
    /// * `Err(ConfigError)` - The first invalid pattern or template
    pub fn compile(rules: &[RuleConfig], ignore: &[String]) -> Result<Self, ConfigError> {
        let rules = rules
            .iter()
            .enumerate()
            .map(|(index, config)| Rule::compile(index, config))
            .collect::<Result<Vec<_>, _>>()?;

        let ignore = ignore
            .iter()
            .map(|pattern| {
                anchored(pattern).map_err(|e| {
                    ConfigError::Validation(format!("Invalid ignore-url pattern '{}': {}", pattern, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules, ignore })
    }

    /// Returns the first rule matching `url` together with its captured groups
    ///
    /// # Example
    ///
    /// ```
    /// use sumi_sieve::config::RuleConfig;
    /// use sumi_sieve::rules::RuleSet;
    ///
    /// let rule = |url: &str| RuleConfig {
    ///     url: url.to_string(),
    ///     selector: None,
    ///     as_url: None,
    ///     file_path: None,
    ///     paging: false,
    ///     next_page: None,
    ///     follow: true,
    /// };
    /// let rules = RuleSet::compile(&[rule(r"https://a\.com/.*"), rule(r".*")], &[]).unwrap();
    /// let (matched, _) = rules.matches("https://a.com/page").unwrap();
    /// assert_eq!(matched.index, 0);
    /// ```
    pub fn matches(&self, url: &str) -> Option<(&Rule, MatchGroups)> {
        self.rules
            .iter()
            .find_map(|rule| rule.captures(url).map(|groups| (rule, groups)))
    }

    /// Returns true if `url` matches one of the ignore patterns
    pub fn is_ignored(&self, url: &str) -> bool {
        self.ignore.iter().any(|pattern| pattern.is_match(url))
    }

    /// Gets a rule by its position
    pub fn get(&self, index: usize) -> Option<&Rule> {
        self.rules.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Compiles a pattern that must match the whole input
fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})$", pattern))
}
