//! Statistics from the persistence ledger
//!
//! This module provides functionality for extracting and displaying what earlier
//! runs left behind in the ledger.

use crate::storage::{PersistenceLedger, RunRecord, RunStatus};
use crate::SieveError;

/// How many runs `--stats` lists
const RECENT_RUNS: usize = 10;

/// Ledger statistics summary
#[derive(Debug, Clone)]
pub struct LedgerStatistics {
    /// Number of completed resources in the ledger
    pub records: usize,

    /// Recent runs, newest first
    pub runs: Vec<RunRecord>,
}

/// Loads statistics from the ledger
pub fn load_statistics(ledger: &PersistenceLedger) -> Result<LedgerStatistics, SieveError> {
    Ok(LedgerStatistics {
        records: ledger.len(),
        runs: ledger.recent_runs(RECENT_RUNS)?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &LedgerStatistics) {
    println!("=== Ledger Statistics ===\n");

    println!("Completed resources: {}", stats.records);
    println!();

    if stats.runs.is_empty() {
        println!("No runs recorded yet.");
        return;
    }

    println!("Recent Runs:");
    for run in &stats.runs {
        let status = match run.status {
            RunStatus::Running => "running (or crashed)",
            other => other.to_db_string(),
        };
        println!(
            "  #{} started {} [{}] done {}, skipped {}, retried {}, failed {}",
            run.id,
            run.started_at,
            status,
            run.counts.done,
            run.counts.skipped,
            run.counts.retried,
            run.counts.failed
        );
        if let Some(finished) = &run.finished_at {
            println!("      finished {}", finished);
        }
        println!("      config {}", &run.config_hash);
    }
}
