//! Storage traits and error types
//!
//! Two seams live here: [`LedgerStorage`], the durable backend behind the
//! persistence ledger, and [`Store`], the capability the crawl writes output
//! files through.

use crate::storage::{LedgerRecord, RunCounts, RunRecord, RunStatus};
use crate::StoreError;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for ledger operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable backend of the persistence ledger
///
/// Implementations must make `upsert_record` durable before returning: the caller
/// only treats a resource as done once this call succeeded.
pub trait LedgerStorage: Send {
    // ===== Records =====

    /// Loads every record (used once at startup)
    fn load_records(&self) -> StorageResult<Vec<LedgerRecord>>;

    /// Inserts or replaces the record with the same id, links included
    fn upsert_record(&mut self, record: &LedgerRecord) -> StorageResult<()>;

    /// Counts stored records
    fn count_records(&self) -> StorageResult<u64>;

    // ===== Run Management =====

    /// Creates a new crawl run and returns its id
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Stores the final status and counters of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus, counts: &RunCounts)
        -> StorageResult<()>;

    /// Gets the most recent runs, newest first
    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>>;
}

/// Filesystem capability used to persist crawl output
#[async_trait]
pub trait Store: Send + Sync {
    /// Replaces the file at `path` with `bytes` without ever exposing a partial file
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError>;

    /// Appends `bytes` to the file at `path` (creating it if needed), atomically
    async fn append_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError>;

    /// Returns true if a file exists at `path`
    async fn exists(&self, path: &Path) -> bool;
}
