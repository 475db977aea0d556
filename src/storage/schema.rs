//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the snapshot database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Snapshot metadata (at most one row)
CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    saved_at TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    next_task_id INTEGER NOT NULL,
    schema_version INTEGER NOT NULL
);

-- Every URL fingerprint ever admitted (hex-encoded SHA-256)
CREATE TABLE IF NOT EXISTS fingerprints (
    fingerprint TEXT PRIMARY KEY
) WITHOUT ROWID;

-- Tasks in every state
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY,
    url TEXT NOT NULL,
    domain TEXT NOT NULL,
    fingerprint TEXT NOT NULL UNIQUE,
    priority INTEGER NOT NULL,
    state TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state);
CREATE INDEX IF NOT EXISTS idx_tasks_domain ON tasks(domain);

-- Proxy health
CREATE TABLE IF NOT EXISTS proxies (
    address TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    score REAL NOT NULL,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    cooldown_remaining_ms INTEGER,
    total_success INTEGER NOT NULL DEFAULT 0,
    total_failure INTEGER NOT NULL DEFAULT 0,
    added_at TEXT NOT NULL
);

-- Domain throttle state (runtime adjustments included)
CREATE TABLE IF NOT EXISTS domains (
    domain TEXT PRIMARY KEY,
    target_concurrency INTEGER NOT NULL,
    min_interval_ms INTEGER NOT NULL,
    base_max_concurrency INTEGER NOT NULL,
    base_min_interval_ms INTEGER NOT NULL,
    throttled INTEGER NOT NULL DEFAULT 0,
    dispatched INTEGER NOT NULL DEFAULT 0
);
"#;

/// Current schema version, stored with every snapshot
pub const SCHEMA_VERSION: u32 = 1;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
