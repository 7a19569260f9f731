//! SQLite ledger backend
//!
//! This module provides the durable half of the persistence ledger.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{LedgerStorage, StorageError, StorageResult};
use crate::storage::{LedgerRecord, RunCounts, RunRecord, RunStatus};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens (or creates) the ledger database at `path`
    ///
    /// The journal runs in WAL mode with `synchronous = FULL`, so a record is on
    /// disk once `upsert_record` returns.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA foreign_keys = ON;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl LedgerStorage for SqliteStorage {
    // ===== Records =====

    fn load_records(&self) -> StorageResult<Vec<LedgerRecord>> {
        let mut links: HashMap<String, Vec<String>> = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT record_id, url FROM record_links ORDER BY record_id, position")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get(1)?)))?;
            for row in rows {
                let (id, url) = row?;
                links.entry(id).or_default().push(url);
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT id, source_url, file_path, content_hash, completed_at, next_page FROM records",
        )?;
        let records = stmt
            .query_map([], |row| {
                Ok(LedgerRecord {
                    id: row.get(0)?,
                    source_url: row.get(1)?,
                    file_path: row.get(2)?,
                    content_hash: row.get(3)?,
                    completed_at: row.get(4)?,
                    links: Vec::new(),
                    next_page: row.get(5)?,
                })
            })?
            .map(|row| {
                row.map(|mut record| {
                    record.links = links.remove(&record.id).unwrap_or_default();
                    record
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn upsert_record(&mut self, record: &LedgerRecord) -> StorageResult<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO records (id, source_url, file_path, content_hash, completed_at, next_page)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                source_url = excluded.source_url,
                file_path = excluded.file_path,
                content_hash = excluded.content_hash,
                completed_at = excluded.completed_at,
                next_page = excluded.next_page",
            params![
                record.id,
                record.source_url,
                record.file_path,
                record.content_hash,
                record.completed_at,
                record.next_page,
            ],
        )?;

        tx.execute(
            "DELETE FROM record_links WHERE record_id = ?1",
            params![record.id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO record_links (record_id, position, url) VALUES (?1, ?2, ?3)",
            )?;
            for (position, url) in record.links.iter().enumerate() {
                stmt.execute(params![record.id, position as i64, url])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn count_records(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        counts: &RunCounts,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2,
                done_count = ?3, skipped_count = ?4, retried_count = ?5, failed_count = ?6
             WHERE id = ?7",
            params![
                status.to_db_string(),
                now,
                counts.done as i64,
                counts.skipped as i64,
                counts.retried as i64,
                counts.failed as i64,
                run_id
            ],
        )?;

        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, finished_at, config_hash, status,
                    done_count, skipped_count, retried_count, failed_count
             FROM runs ORDER BY id DESC LIMIT ?1",
        )?;

        let runs = stmt
            .query_map(params![limit as i64], |row| {
                Ok(RunRecord {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    config_hash: row.get(3)?,
                    status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
                        .unwrap_or(RunStatus::Running),
                    counts: RunCounts {
                        done: row.get::<_, i64>(5)? as u64,
                        skipped: row.get::<_, i64>(6)? as u64,
                        retried: row.get::<_, i64>(7)? as u64,
                        failed: row.get::<_, i64>(8)? as u64,
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(runs)
    }
}
