//! Crawler module for rule-driven fetching and persisting
//!
//! This module contains the core crawling logic, including:
//! - The Fetcher capability and its HTTP implementation
//! - The Extractor capability and its HTML implementation
//! - The frontier of pending work
//! - Overall crawl coordination

mod coordinator;
mod fetcher;
mod frontier;
mod parser;

pub use coordinator::{Coordinator, CrawlSettings, DEFAULT_GRACE_PERIOD};
pub use fetcher::{build_http_client, check_status, Fetcher, HttpFetcher, HttpSession, RawResource};
pub use frontier::{FailOutcome, Frontier, FrontierClosed, FrontierCounts};
pub use parser::{ContentNode, Extractor, HtmlExtractor};

use crate::config::Config;
use crate::output::CrawlReport;
use crate::storage::{FsStore, PersistenceLedger};
use crate::SieveError;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

/// Command line overrides for a crawl
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// Re-fetch resources the ledger already holds
    pub force_refresh: bool,

    /// Worker count overriding the config's `concurrency`
    pub concurrency: Option<usize>,
}

/// Runs a complete crawl operation
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Compile the rules
/// 2. Open the ledger in the save directory
/// 3. Build the HTTP fetcher (and log in if configured)
/// 4. Drive the worker pool until the frontier drains or `stop` fires
///
/// # Arguments
///
/// * `config` - A validated crawler configuration
/// * `config_hash` - Hash of the config file, stored with the run
/// * `options` - Command line overrides
/// * `stop` - Turns true when the operator asks the crawl to stop
pub async fn crawl(
    config: &Config,
    config_hash: &str,
    options: &CrawlOptions,
    stop: watch::Receiver<bool>,
) -> Result<CrawlReport, SieveError> {
    let rules = config.rule_set()?;

    let mut settings = CrawlSettings::from_config(config, config_hash)?;
    settings.force_refresh = options.force_refresh;
    if let Some(concurrency) = options.concurrency {
        settings.concurrency = concurrency.max(1);
    }

    let ledger = Arc::new(PersistenceLedger::open(Path::new(&config.save_dir))?);
    let fetcher = HttpFetcher::new(config.http.clone());

    let coordinator = Coordinator::new(settings, rules, fetcher, HtmlExtractor, FsStore, ledger)?;
    coordinator.run(stop).await
}
