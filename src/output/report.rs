//! End-of-run report
//!
//! Collects per-item outcomes while the crawl runs and prints the final summary.

use crate::storage::{RunCounts, RunStatus};
use std::fmt;

/// Exit code of a clean run
pub const EXIT_OK: u8 = 0;
/// Exit code when the run could not start (bad config, unusable save dir, ...)
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when the run completed but some items terminally failed
pub const EXIT_ITEM_FAILURES: u8 = 2;
/// Exit code when the run was interrupted
pub const EXIT_INTERRUPTED: u8 = 130;

/// A terminally failed crawl item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub url: String,
    pub rule: usize,
    pub error: String,
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (rule {}): {}", self.url, self.rule, self.error)
    }
}

/// Outcome counts of a crawl run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// Items fetched, persisted and recorded
    pub done: u64,

    /// Items already recorded by an earlier run
    pub skipped: u64,

    /// Retry attempts scheduled after transient failures
    pub retried: u64,

    /// Terminally failed items
    pub failures: Vec<FailureRecord>,

    /// The run stopped before the frontier drained
    pub interrupted: bool,
}

impl CrawlReport {
    pub fn failed(&self) -> u64 {
        self.failures.len() as u64
    }

    /// Items that reached a terminal state
    pub fn processed(&self) -> u64 {
        self.done + self.skipped + self.failed()
    }

    pub fn counts(&self) -> RunCounts {
        RunCounts {
            done: self.done,
            skipped: self.skipped,
            retried: self.retried,
            failed: self.failed(),
        }
    }

    pub fn run_status(&self) -> RunStatus {
        if self.interrupted {
            RunStatus::Interrupted
        } else if self.failures.is_empty() {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithFailures
        }
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> u8 {
        match self.run_status() {
            RunStatus::Interrupted => EXIT_INTERRUPTED,
            RunStatus::CompletedWithFailures => EXIT_ITEM_FAILURES,
            RunStatus::Completed | RunStatus::Running => EXIT_OK,
        }
    }
}

/// Prints the report to stdout
pub fn print_report(report: &CrawlReport) {
    println!("=== Crawl Report ===\n");

    if report.interrupted {
        println!("Run was interrupted; unfinished items will be picked up next time.\n");
    }

    println!("  Done:     {}", report.done);
    println!("  Skipped:  {}", report.skipped);
    println!("  Retried:  {}", report.retried);
    println!("  Failed:   {}", report.failed());

    if !report.failures.is_empty() {
        println!("\nFailures:");
        for failure in &report.failures {
            println!("  - {}", failure);
        }
    }
}
