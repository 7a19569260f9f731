//! HTML extraction
//!
//! This module turns fetched documents into the three things the crawl needs:
//! - The content selected by a rule's selector
//! - Links to follow (from `<a href>` and `<img src>`)
//! - The next page of a paging sequence

use crate::crawler::RawResource;
use crate::rules::Rule;
use crate::url::resolve_link;
use crate::ExtractError;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Serialized markup of the nodes a selector picked out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentNode {
    pub html: String,
}

impl ContentNode {
    pub fn into_bytes(self) -> Vec<u8> {
        self.html.into_bytes()
    }
}

/// Capability for reading documents
///
/// Extraction errors are permanent for the item they occur on.
pub trait Extractor: Send + Sync {
    /// Checks that a selector is valid in this extractor's selector language
    fn check_selector(&self, selector: &str) -> Result<(), ExtractError>;

    /// Extracts every node matching `selector`
    fn extract_content(
        &self,
        resource: &RawResource,
        selector: &str,
    ) -> Result<ContentNode, ExtractError>;

    /// Extracts absolute links in document order, without duplicates
    fn extract_links(&self, resource: &RawResource) -> Result<Vec<Url>, ExtractError>;

    /// Finds the next page of a paging sequence
    fn extract_next_page(
        &self,
        resource: &RawResource,
        rule: &Rule,
    ) -> Result<Option<Url>, ExtractError>;
}

/// [`Extractor`] for HTML documents, using CSS selectors
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExtractor;

/// Elements whose `href` or `src` is followed
const LINK_SELECTOR: &str = "a[href], img[src]";

impl HtmlExtractor {
    pub fn new() -> Self {
        Self
    }

    fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
        Selector::parse(selector).map_err(|e| ExtractError::InvalidSelector {
            selector: selector.to_string(),
            message: format!("{:?}", e),
        })
    }

    fn document(resource: &RawResource) -> Html {
        Html::parse_document(&resource.text())
    }
}

impl Extractor for HtmlExtractor {
    fn check_selector(&self, selector: &str) -> Result<(), ExtractError> {
        Self::parse_selector(selector).map(|_| ())
    }

    fn extract_content(
        &self,
        resource: &RawResource,
        selector: &str,
    ) -> Result<ContentNode, ExtractError> {
        let parsed = Self::parse_selector(selector)?;

        if !resource.is_html() {
            return Err(ExtractError::Malformed {
                url: resource.url.to_string(),
                message: format!(
                    "not an HTML document ({})",
                    resource.content_type.as_deref().unwrap_or("no content type")
                ),
            });
        }

        let document = Self::document(resource);
        let selected: Vec<String> = document.select(&parsed).map(|el| el.html()).collect();

        if selected.is_empty() {
            return Err(ExtractError::NoMatch {
                url: resource.url.to_string(),
                selector: selector.to_string(),
            });
        }

        Ok(ContentNode {
            html: selected.join("\n"),
        })
    }

    fn extract_links(&self, resource: &RawResource) -> Result<Vec<Url>, ExtractError> {
        if !resource.is_html() {
            return Ok(Vec::new());
        }

        let document = Self::document(resource);
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        let selector = Self::parse_selector(LINK_SELECTOR)?;
        for element in document.select(&selector) {
            let value = element.value();
            let Some(href) = value.attr("href").or_else(|| value.attr("src")) else {
                continue;
            };

            if let Some(url) = resolve_link(href, &resource.final_url) {
                if seen.insert(url.clone()) {
                    links.push(url);
                }
            }
        }

        Ok(links)
    }

    fn extract_next_page(
        &self,
        resource: &RawResource,
        rule: &Rule,
    ) -> Result<Option<Url>, ExtractError> {
        if !resource.is_html() {
            return Ok(None);
        }

        let selector = Self::parse_selector(&rule.next_page_selector)?;
        let document = Self::document(resource);

        let next = document
            .select(&selector)
            .filter_map(|el| el.value().attr("href"))
            .find_map(|href| resolve_link(href, &resource.final_url));

        Ok(next.filter(|url| *url != resource.url && *url != resource.final_url))
    }
}
