//! Storage module for crawl output and the persistence ledger
//!
//! This module handles everything that outlives a single run:
//! - The persistence ledger of completed resources (in memory, backed by SQLite)
//! - Run tracking for `--stats`
//! - Atomic file writes for extracted content

mod fs;
mod ledger;
mod schema;
mod sqlite;
mod traits;

pub use fs::FsStore;
pub use ledger::{PersistenceLedger, RecordOutcome, LEDGER_FILE_NAME};
pub use sqlite::SqliteStorage;
pub use traits::{LedgerStorage, Store, StorageError, StorageResult};

/// A completed resource as remembered by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    /// Canonical resource id
    pub id: String,

    /// URL the resource was discovered as
    pub source_url: String,

    /// Output file, relative to the save directory; `None` for link-only rules
    pub file_path: Option<String>,

    /// SHA-256 hex digest of the bytes written for this resource
    pub content_hash: Option<String>,

    /// RFC 3339 completion timestamp
    pub completed_at: String,

    /// Follow-up links discovered in the resource, in document order
    pub links: Vec<String>,

    /// Next page of a paging sequence, if any
    pub next_page: Option<String>,
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub counts: RunCounts,
}

/// Item counters stored with a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub done: u64,
    pub skipped: u64,
    pub retried: u64,
    pub failed: u64,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    CompletedWithFailures,
    Interrupted,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithFailures => "completed-with-failures",
            Self::Interrupted => "interrupted",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "completed-with-failures" => Some(Self::CompletedWithFailures),
            "interrupted" => Some(Self::Interrupted),
            _ => None,
        }
    }
}
