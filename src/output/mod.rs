//! Output module for crawl reports
//!
//! This module handles:
//! - The end-of-run report (done / skipped / retried / failed) and exit codes
//! - Ledger statistics for `--stats`

pub mod report;
pub mod stats;

pub use report::{
    print_report, CrawlReport, FailureRecord, EXIT_CONFIG_ERROR, EXIT_INTERRUPTED,
    EXIT_ITEM_FAILURES, EXIT_OK,
};
pub use stats::{load_statistics, print_statistics, LedgerStatistics};
