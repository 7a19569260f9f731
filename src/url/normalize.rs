use crate::ResolveError;
use url::Url;

/// Schemes that never lead to a fetchable resource
const SKIPPED_PREFIXES: &[&str] = &["javascript:", "mailto:", "tel:", "data:"];

/// Normalizes a URL before it is matched against the rules
///
/// # Normalization Steps
///
/// 1. Parse the URL; reject if malformed
/// 2. Only allow http and https
/// 3. Require a host
/// 4. Remove the fragment (everything after #)
///
/// Host lowercasing and dot-segment removal come from the URL parser itself. Query
/// strings and trailing slashes are kept as-is because rule patterns are written
/// against the URLs a site actually serves.
///
/// # Examples
///
/// ```
/// use sumi_sieve::url::normalize_url;
///
/// let url = normalize_url("http://EXAMPLE.com/a/../page#top").unwrap();
/// assert_eq!(url.as_str(), "http://example.com/page");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, ResolveError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| ResolveError::InvalidUrl {
        value: url_str.to_string(),
        message: e.to_string(),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ResolveError::InvalidUrl {
            value: url_str.to_string(),
            message: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ResolveError::InvalidUrl {
            value: url_str.to_string(),
            message: "missing host".to_string(),
        });
    }

    url.set_fragment(None);
    Ok(url)
}

/// Resolves a link href against the page it was found on
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: and data: links
/// - Fragment-only links (same page anchors)
/// - Links that do not resolve to an http(s) URL
pub fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if SKIPPED_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
        return None;
    }

    let joined = base_url.join(href).ok()?;
    normalize_url(joined.as_str()).ok()
}
