use crate::rules::{MatchGroups, Rule, RuleSet};
use crate::url::PathResolver;
use crate::ResolveError;
use std::fmt;
use url::Url;

/// Identity of a fetchable resource, used to key the frontier and the ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Url> for ResourceId {
    fn from(url: &Url) -> Self {
        Self(url.as_str().to_string())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of crawl work
///
/// Built once when a URL is discovered and never changed afterwards; only its state
/// on the frontier moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlItem {
    /// URL as discovered
    pub source_url: Url,

    /// Index of the governing rule in the rule set
    pub rule: usize,

    /// Groups used to build the output path
    ///
    /// For pages after the first in a paging sequence these are the groups of the
    /// sequence's first page, so every page lands in the same file.
    pub groups: MatchGroups,

    /// URL the output path is derived from when the rule has no `file-path`
    pub path_url: Url,

    /// URL that is actually fetched (`as-url` applied)
    pub fetch_url: Url,

    /// Canonical resource id
    pub id: ResourceId,

    /// Page the URL was found on
    pub discovered_via: Option<Url>,

    /// Position within a paging sequence; 0 for ordinary items
    pub page_index: u32,
}

/// Why a discovered URL did not become a crawl item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discarded {
    /// Matched an ignore-url pattern
    Ignored,
    /// No rule matched
    NoRule,
}

impl CrawlItem {
    /// Builds a crawl item for a discovered URL
    ///
    /// # Returns
    ///
    /// * `Ok(Ok(CrawlItem))` - A rule governs the URL
    /// * `Ok(Err(Discarded))` - The URL is out of the crawl's scope
    /// * `Err(ResolveError)` - A rule matched but its `as-url` template produced an invalid URL
    pub fn discover(
        rules: &RuleSet,
        url: Url,
        discovered_via: Option<Url>,
    ) -> Result<Result<Self, Discarded>, ResolveError> {
        if rules.is_ignored(url.as_str()) {
            return Ok(Err(Discarded::Ignored));
        }

        let Some((rule, groups)) = rules.matches(url.as_str()) else {
            return Ok(Err(Discarded::NoRule));
        };

        let (id, fetch_url) = PathResolver::canonical_id(rule, &groups, &url)?;
        Ok(Ok(Self {
            path_url: url.clone(),
            source_url: url,
            rule: rule.index,
            groups,
            fetch_url,
            id,
            discovered_via,
            page_index: 0,
        }))
    }

    /// Builds the continuation item for the next page of a paging sequence
    ///
    /// The same rule governs the next page and the output path stays the one of the
    /// first page. If the rule's pattern also matches the next page URL its own groups
    /// drive `as-url`; otherwise the page URL is fetched directly.
    pub fn next_page(&self, rule: &Rule, url: Url) -> Result<Self, ResolveError> {
        let (id, fetch_url) = match rule.captures(url.as_str()) {
            Some(own_groups) => PathResolver::canonical_id(rule, &own_groups, &url)?,
            None => {
                let mut target = url.clone();
                target.set_fragment(None);
                (ResourceId::from(&target), target)
            }
        };

        Ok(Self {
            source_url: url,
            rule: self.rule,
            groups: self.groups.clone(),
            path_url: self.path_url.clone(),
            fetch_url,
            id,
            discovered_via: Some(self.source_url.clone()),
            page_index: self.page_index + 1,
        })
    }

    /// Returns true for pages after the first in a paging sequence
    pub fn is_continuation(&self) -> bool {
        self.page_index > 0
    }
}
