//! Sumi-Sieve: a rule-driven site archiver
//!
//! This crate implements a crawler driven by an ordered list of URL rules. Each rule
//! says how a matching URL is fetched, what part of it is kept, and where the kept
//! content lands under the save directory. A durable ledger makes re-runs idempotent
//! and interrupted runs resumable.

pub mod config;
pub mod crawler;
pub mod output;
pub mod rules;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Sieve operations
#[derive(Debug, Error)]
pub enum SieveError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Path error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
///
/// Every variant is fatal and reported before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid URL pattern in rule {rule}: {message}")]
    InvalidPattern { rule: usize, message: String },

    #[error("Invalid template in rule {rule}: {message}")]
    InvalidTemplate { rule: usize, message: String },

    #[error("Invalid selector in rule {rule}: {message}")]
    InvalidSelector { rule: usize, message: String },

    #[error("Save directory {path} is not usable: {message}")]
    SaveDir { path: String, message: String },
}

/// Errors reported by a [`crawler::Fetcher`]
///
/// Transient failures are retried by the crawl; permanent ones are not.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    #[error("permanent failure fetching {url}: {reason}")]
    Permanent { url: String, reason: String },
}

impl FetchError {
    /// Returns true if retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Errors reported by a [`crawler::Extractor`]; always permanent for the item
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("selector '{selector}' matched nothing in {url}")]
    NoMatch { url: String, selector: String },

    #[error("malformed document {url}: {message}")]
    Malformed { url: String, message: String },
}

/// Errors from resolving a crawl item's output path or canonical identity
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("resolved path '{path}' escapes the save directory")]
    PathTraversal { path: String },

    #[error("resolved path for {url} is empty")]
    EmptyPath { url: String },

    #[error("template produced an invalid URL '{value}': {message}")]
    InvalidUrl { value: String, message: String },
}

/// Errors from writing crawl output
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

impl StoreError {
    /// Returns true if writing again may succeed
    ///
    /// A file standing where a directory is needed (or the other way round) and
    /// missing permissions do not go away by themselves.
    pub fn is_transient(&self) -> bool {
        let (Self::Write { source, .. } | Self::Read { source, .. }) = self;
        !matches!(
            source.kind(),
            std::io::ErrorKind::AlreadyExists
                | std::io::ErrorKind::NotADirectory
                | std::io::ErrorKind::IsADirectory
                | std::io::ErrorKind::DirectoryNotEmpty
                | std::io::ErrorKind::PermissionDenied
                | std::io::ErrorKind::InvalidInput
        )
    }
}

/// Result type alias for Sumi-Sieve operations
pub type Result<T> = std::result::Result<T, SieveError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use rules::{MatchGroups, Rule, RuleSet};
pub use state::{CrawlItem, ItemState, ResourceId};
