use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for Sumi-Sieve
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// First URL put on the frontier
    #[serde(rename = "start-url")]
    pub start_url: String,

    /// Root directory for all output files and the ledger
    #[serde(rename = "save-dir")]
    pub save_dir: String,

    /// Number of concurrent crawl workers
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// How many times a transient failure is retried before giving up
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential retry backoff (milliseconds)
    #[serde(rename = "retry-base-delay-ms", default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// URL patterns that are dropped before rule matching
    #[serde(rename = "ignore-url", default)]
    pub ignore_url: Vec<String>,

    /// Optional login form submitted once before crawling
    #[serde(default)]
    pub login: Option<LoginConfig>,

    #[serde(default)]
    pub http: HttpConfig,

    /// Ordered structural rules; the first match governs a URL
    #[serde(rename = "rule", default)]
    pub rules: Vec<RuleConfig>,
}

/// One structural rule as written in the config file
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    /// Regular expression matched against the whole URL
    pub url: String,

    /// Selector for the content to keep
    #[serde(default)]
    pub selector: Option<String>,

    /// Substitution template producing the URL that is actually fetched
    #[serde(rename = "as-url", default)]
    pub as_url: Option<String>,

    /// Substitution template producing the output path relative to save-dir
    #[serde(rename = "file-path", default)]
    pub file_path: Option<String>,

    /// Follow "next page" links as continuations of the same resource
    #[serde(default)]
    pub paging: bool,

    /// Selector locating the next page link when paging
    #[serde(rename = "next-page", default)]
    pub next_page: Option<String>,

    /// Expand links found in resources matched by this rule
    #[serde(default = "default_follow")]
    pub follow: bool,
}

/// Login form submission settings
#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    /// URL the form is posted to
    pub url: String,

    /// Form fields
    #[serde(default)]
    pub formdata: BTreeMap<String, String>,
}

/// HTTP client settings
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    #[serde(rename = "timeout-secs", default = "default_timeout")]
    pub timeout_secs: u64,

    /// Minimum time between two requests (milliseconds)
    #[serde(rename = "request-delay-ms", default)]
    pub request_delay_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
            request_delay_ms: 0,
        }
    }
}

fn default_concurrency() -> u32 {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    500
}

fn default_follow() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("sumi-sieve/{}", env!("CARGO_PKG_VERSION"))
}
