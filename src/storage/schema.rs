//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the ledger database.

/// SQL schema for the ledger
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    done_count INTEGER NOT NULL DEFAULT 0,
    skipped_count INTEGER NOT NULL DEFAULT 0,
    retried_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0
);

-- One row per completed resource, keyed by canonical resource id
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    source_url TEXT NOT NULL,
    file_path TEXT,
    content_hash TEXT,
    completed_at TEXT NOT NULL,
    next_page TEXT
);

-- Follow-up links found in a completed resource, replayed on ledger hits
CREATE TABLE IF NOT EXISTS record_links (
    record_id TEXT NOT NULL REFERENCES records(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    url TEXT NOT NULL,
    PRIMARY KEY (record_id, position)
);

CREATE INDEX IF NOT EXISTS idx_records_file_path ON records(file_path);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
