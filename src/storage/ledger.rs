//! Persistence ledger
//!
//! Remembers which resources have been completed, where their content went, and
//! what follow-up URLs they led to. The full ledger is loaded into memory at
//! startup; every record is written to the durable backend before memory is updated.

use crate::state::ResourceId;
use crate::storage::sqlite::SqliteStorage;
use crate::storage::traits::{LedgerStorage, StorageResult};
use crate::storage::{LedgerRecord, RunCounts, RunRecord, RunStatus};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Name of the ledger database inside the save directory
pub const LEDGER_FILE_NAME: &str = ".sumi-sieve.db";

/// What recording a resource did to the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First record for this id
    Inserted,
    /// Replaced a record with the same output path
    Updated,
    /// Replaced a record whose output path was different
    PathChanged { previous: Option<String> },
}

/// Durable record of completed resources
pub struct PersistenceLedger {
    records: Mutex<HashMap<String, LedgerRecord>>,
    storage: Mutex<Box<dyn LedgerStorage>>,
}

impl PersistenceLedger {
    /// Opens the ledger stored in `save_dir`, creating it if needed
    pub fn open(save_dir: &Path) -> StorageResult<Self> {
        let storage = SqliteStorage::open(&save_dir.join(LEDGER_FILE_NAME))?;
        Self::with_storage(Box::new(storage))
    }

    /// Opens a ledger that lives only as long as the process
    pub fn in_memory() -> StorageResult<Self> {
        Self::with_storage(Box::new(SqliteStorage::open_in_memory()?))
    }

    /// Builds a ledger on top of an arbitrary backend, loading its records
    pub fn with_storage(storage: Box<dyn LedgerStorage>) -> StorageResult<Self> {
        let records: HashMap<String, LedgerRecord> = storage
            .load_records()?
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        debug!("Loaded {} ledger records", records.len());

        Ok(Self {
            records: Mutex::new(records),
            storage: Mutex::new(storage),
        })
    }

    /// Looks up the record for a resource id
    pub fn get(&self, id: &ResourceId) -> Option<LedgerRecord> {
        self.records().get(id.as_str()).cloned()
    }

    /// Durably records a completed resource
    ///
    /// Upserts by id. Replacing a record whose output path differs logs a warning
    /// naming both paths.
    pub fn record(&self, record: LedgerRecord) -> StorageResult<RecordOutcome> {
        self.storage().upsert_record(&record)?;

        let mut records = self.records();
        let outcome = match records.get(&record.id) {
            None => RecordOutcome::Inserted,
            Some(existing) if existing.file_path == record.file_path => RecordOutcome::Updated,
            Some(existing) => {
                warn!(
                    "Ledger conflict for {}: output path changed from {} to {}",
                    record.id,
                    existing.file_path.as_deref().unwrap_or("<none>"),
                    record.file_path.as_deref().unwrap_or("<none>")
                );
                RecordOutcome::PathChanged {
                    previous: existing.file_path.clone(),
                }
            }
        };
        records.insert(record.id.clone(), record);

        Ok(outcome)
    }

    /// Number of recorded resources
    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ===== Run Management =====

    pub fn start_run(&self, config_hash: &str) -> StorageResult<i64> {
        self.storage().create_run(config_hash)
    }

    pub fn finish_run(
        &self,
        run_id: i64,
        status: RunStatus,
        counts: &RunCounts,
    ) -> StorageResult<()> {
        self.storage().finish_run(run_id, status, counts)
    }

    pub fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        self.storage().recent_runs(limit)
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, LedgerRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn storage(&self) -> MutexGuard<'_, Box<dyn LedgerStorage>> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
