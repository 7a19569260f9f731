//! HTTP fetcher implementation
//!
//! This module handles all network access for the crawler, including:
//! - The [`Fetcher`] capability the worker pool is generic over
//! - Building HTTP clients with the configured user agent and timeout
//! - Submitting the login form once per crawl
//! - Spacing requests by the configured delay
//! - Classifying failures as transient or permanent

use crate::config::{HttpConfig, LoginConfig};
use crate::FetchError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::borrow::Cow;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

/// A fetched resource
#[derive(Debug, Clone)]
pub struct RawResource {
    /// URL that was requested
    pub url: Url,

    /// URL after redirects; relative links resolve against this
    pub final_url: Url,

    /// HTTP status code
    pub status: u16,

    /// Content-Type header value
    pub content_type: Option<String>,

    /// Response body
    pub body: Vec<u8>,
}

impl RawResource {
    /// Builds a resource that was served from `url` without redirects
    pub fn new(url: Url, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            final_url: url.clone(),
            url,
            status: 200,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    /// Returns true if the resource should be treated as an HTML document
    ///
    /// Without a Content-Type header the body is sniffed for a leading `<`.
    pub fn is_html(&self) -> bool {
        match &self.content_type {
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("text/html") || ct.contains("application/xhtml+xml")
            }
            None => self
                .body
                .iter()
                .find(|b| !b.is_ascii_whitespace())
                .map_or(false, |b| *b == b'<'),
        }
    }

    /// Body decoded as UTF-8, invalid sequences replaced
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Capability for fetching resources
///
/// A session is opened once per crawl and shared by every worker.
#[async_trait]
pub trait Fetcher: Send + Sync {
    type Session: Send + Sync;

    /// Opens a session, performing the login form submission if configured
    async fn open_session(&self, login: Option<&LoginConfig>)
        -> Result<Self::Session, FetchError>;

    /// Fetches a single URL
    async fn fetch(&self, url: &Url, session: &Self::Session) -> Result<RawResource, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// The client keeps a cookie store so a session established by the login form is
/// carried on every later request.
///
/// # Example
///
/// ```no_run
/// use sumi_sieve::config::HttpConfig;
/// use sumi_sieve::crawler::build_http_client;
///
/// let client = build_http_client(&HttpConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
        .cookie_store(true)
        .gzip(true)
        .brotli(true)
        .build()
}

/// Session of an [`HttpFetcher`]: a client holding the session cookies
#[derive(Debug, Clone)]
pub struct HttpSession {
    client: Client,
}

/// [`Fetcher`] backed by reqwest
pub struct HttpFetcher {
    config: HttpConfig,
    last_request: Mutex<Option<Instant>>,
}

impl HttpFetcher {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            last_request: Mutex::new(None),
        }
    }

    /// Waits until the configured delay since the previous request has passed
    async fn pace(&self) {
        if self.config.request_delay_ms == 0 {
            return;
        }

        let delay = Duration::from_millis(self.config.request_delay_ms);
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            tokio::time::sleep_until(previous + delay).await;
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    type Session = HttpSession;

    async fn open_session(
        &self,
        login: Option<&LoginConfig>,
    ) -> Result<Self::Session, FetchError> {
        let client = build_http_client(&self.config).map_err(|e| FetchError::Permanent {
            url: String::new(),
            reason: format!("failed to build HTTP client: {}", e),
        })?;

        if let Some(login) = login {
            info!("Submitting login form to {}", login.url);
            self.pace().await;

            let response = client
                .post(&login.url)
                .form(&login.formdata)
                .send()
                .await
                .map_err(|e| classify_error(&login.url, &e))?;
            check_status(&login.url, response.status())?;

            debug!("Login returned {}", response.status());
        }

        Ok(HttpSession { client })
    }

    async fn fetch(&self, url: &Url, session: &Self::Session) -> Result<RawResource, FetchError> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(FetchError::Permanent {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        self.pace().await;

        let response = session
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_error(url.as_str(), &e))?;

        let status = response.status();
        check_status(url.as_str(), status)?;

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Transient {
                    url: url.to_string(),
                    reason: "timed out reading body".to_string(),
                }
            } else {
                FetchError::Permanent {
                    url: url.to_string(),
                    reason: format!("failed to read body: {}", e),
                }
            }
        })?;

        debug!("Fetched {} ({} bytes, status {})", url, body.len(), status);

        Ok(RawResource {
            url: url.clone(),
            final_url,
            status: status.as_u16(),
            content_type,
            body: body.to_vec(),
        })
    }
}

/// Classifies an HTTP status code
///
/// | Status | Result |
/// |--------|--------|
/// | 2xx, 3xx | Ok |
/// | 429 | Transient |
/// | 5xx | Transient |
/// | other 4xx | Permanent |
pub fn check_status(url: &str, status: StatusCode) -> Result<(), FetchError> {
    if status.is_success() || status.is_redirection() {
        return Ok(());
    }

    let reason = format!("HTTP {}", status.as_u16());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(FetchError::Transient {
            url: url.to_string(),
            reason,
        })
    } else {
        Err(FetchError::Permanent {
            url: url.to_string(),
            reason,
        })
    }
}

/// Classifies a transport error: timeouts and connection failures are transient
fn classify_error(url: &str, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Transient {
            url: url.to_string(),
            reason: "request timeout".to_string(),
        }
    } else if error.is_connect() || error.is_request() {
        FetchError::Transient {
            url: url.to_string(),
            reason: format!("connection failed: {}", error),
        }
    } else {
        FetchError::Permanent {
            url: url.to_string(),
            reason: error.to_string(),
        }
    }
}
