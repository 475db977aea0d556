//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::{ProxyState, TaskState};
use crate::storage::schema::{initialize_schema, SCHEMA_VERSION};
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{DomainRecord, ProxyRecord, Snapshot, SnapshotInfo, TaskRecord};
use crate::url::Fingerprint;
use crate::DispatchError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(DispatchError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, DispatchError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> Result<Self, DispatchError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn write_tasks(tx: &Transaction<'_>, tasks: &[TaskRecord]) -> StorageResult<()> {
        let mut stmt = tx.prepare(
            "INSERT INTO tasks (id, url, domain, fingerprint, priority, state, retry_count, created_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for task in tasks {
            stmt.execute(params![
                task.id as i64,
                task.url,
                task.domain,
                task.fingerprint.to_hex(),
                task.priority,
                task.state.to_db_string(),
                task.retry_count,
                task.created_at.to_rfc3339(),
                task.last_error,
            ])?;
        }
        Ok(())
    }

    fn write_proxies(tx: &Transaction<'_>, proxies: &[ProxyRecord]) -> StorageResult<()> {
        let mut stmt = tx.prepare(
            "INSERT INTO proxies (address, state, score, consecutive_failures, cooldown_remaining_ms,
                                  total_success, total_failure, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for proxy in proxies {
            stmt.execute(params![
                proxy.address,
                proxy.state.to_db_string(),
                proxy.score,
                proxy.consecutive_failures,
                proxy.cooldown_remaining_ms.map(|ms| ms as i64),
                proxy.total_success as i64,
                proxy.total_failure as i64,
                proxy.added_at.to_rfc3339(),
            ])?;
        }
        Ok(())
    }

    fn write_domains(tx: &Transaction<'_>, domains: &[DomainRecord]) -> StorageResult<()> {
        let mut stmt = tx.prepare(
            "INSERT INTO domains (domain, target_concurrency, min_interval_ms, base_max_concurrency,
                                  base_min_interval_ms, throttled, dispatched)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for domain in domains {
            stmt.execute(params![
                domain.domain,
                domain.target_concurrency,
                domain.min_interval_ms as i64,
                domain.base_max_concurrency,
                domain.base_min_interval_ms as i64,
                domain.throttled as i64,
                domain.dispatched as i64,
            ])?;
        }
        Ok(())
    }

    fn read_fingerprints(&self) -> StorageResult<Vec<Fingerprint>> {
        let mut stmt = self
            .conn
            .prepare("SELECT fingerprint FROM fingerprints ORDER BY fingerprint")?;
        let hexes = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        hexes.iter().map(|hex| parse_fingerprint(hex)).collect()
    }

    fn read_tasks(&self) -> StorageResult<Vec<TaskRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, url, domain, fingerprint, priority, state, retry_count, created_at, last_error
             FROM tasks ORDER BY id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, u32>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, url, domain, fingerprint, priority, state, retry_count, created_at, last_error)| {
                    Ok(TaskRecord {
                        id: id as u64,
                        url,
                        domain,
                        fingerprint: parse_fingerprint(&fingerprint)?,
                        priority,
                        state: TaskState::from_db_string(&state).ok_or_else(|| {
                            StorageError::Corrupt(format!("unknown task state '{}'", state))
                        })?,
                        retry_count,
                        created_at: parse_timestamp(&created_at)?,
                        last_error,
                    })
                },
            )
            .collect()
    }

    fn read_proxies(&self) -> StorageResult<Vec<ProxyRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT address, state, score, consecutive_failures, cooldown_remaining_ms,
                    total_success, total_failure, added_at
             FROM proxies ORDER BY address",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(address, state, score, failures, cooldown, success, failure, added_at)| {
                    Ok(ProxyRecord {
                        state: ProxyState::from_db_string(&state).ok_or_else(|| {
                            StorageError::Corrupt(format!("unknown proxy state '{}' for {}", state, address))
                        })?,
                        address,
                        score,
                        consecutive_failures: failures,
                        cooldown_remaining_ms: cooldown.map(|ms| ms.max(0) as u64),
                        total_success: success as u64,
                        total_failure: failure as u64,
                        added_at: parse_timestamp(&added_at)?,
                    })
                },
            )
            .collect()
    }

    fn read_domains(&self) -> StorageResult<Vec<DomainRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT domain, target_concurrency, min_interval_ms, base_max_concurrency,
                    base_min_interval_ms, throttled, dispatched
             FROM domains ORDER BY domain",
        )?;

        let domains = stmt
            .query_map([], |row| {
                Ok(DomainRecord {
                    domain: row.get(0)?,
                    target_concurrency: row.get(1)?,
                    min_interval_ms: row.get::<_, i64>(2)? as u64,
                    base_max_concurrency: row.get(3)?,
                    base_min_interval_ms: row.get::<_, i64>(4)? as u64,
                    throttled: row.get::<_, i64>(5)? as u64,
                    dispatched: row.get::<_, i64>(6)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(domains)
    }
}

impl Storage for SqliteStorage {
    fn save_snapshot(&mut self, snapshot: &Snapshot, config_hash: &str) -> StorageResult<()> {
        let tx = self.conn.transaction()?;

        tx.execute_batch(
            "
            DELETE FROM snapshots;
            DELETE FROM fingerprints;
            DELETE FROM tasks;
            DELETE FROM proxies;
            DELETE FROM domains;
        ",
        )?;

        tx.execute(
            "INSERT INTO snapshots (id, saved_at, config_hash, next_task_id, schema_version)
             VALUES (1, ?1, ?2, ?3, ?4)",
            params![
                snapshot.saved_at.to_rfc3339(),
                config_hash,
                snapshot.next_task_id as i64,
                SCHEMA_VERSION,
            ],
        )?;

        {
            let mut stmt = tx.prepare("INSERT INTO fingerprints (fingerprint) VALUES (?1)")?;
            for fingerprint in &snapshot.fingerprints {
                stmt.execute([fingerprint.to_hex()])?;
            }
        }
        Self::write_tasks(&tx, &snapshot.tasks)?;
        Self::write_proxies(&tx, &snapshot.proxies)?;
        Self::write_domains(&tx, &snapshot.domains)?;

        tx.commit()?;

        tracing::info!(
            "Saved snapshot: {} tasks, {} fingerprints, {} proxies, {} domains",
            snapshot.tasks.len(),
            snapshot.fingerprints.len(),
            snapshot.proxies.len(),
            snapshot.domains.len()
        );
        Ok(())
    }

    fn load_snapshot(&self) -> StorageResult<Option<Snapshot>> {
        let header = self
            .conn
            .query_row(
                "SELECT saved_at, next_task_id, schema_version FROM snapshots WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, u32>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((saved_at, next_task_id, version)) = header else {
            return Ok(None);
        };
        if version != SCHEMA_VERSION {
            return Err(StorageError::Corrupt(format!(
                "snapshot schema version {} is not supported (expected {})",
                version, SCHEMA_VERSION
            )));
        }

        Ok(Some(Snapshot {
            saved_at: parse_timestamp(&saved_at)?,
            next_task_id: next_task_id as u64,
            fingerprints: self.read_fingerprints()?,
            tasks: self.read_tasks()?,
            proxies: self.read_proxies()?,
            domains: self.read_domains()?,
        }))
    }

    fn snapshot_info(&self) -> StorageResult<Option<SnapshotInfo>> {
        let row = self
            .conn
            .query_row(
                "SELECT saved_at, config_hash, (SELECT COUNT(*) FROM tasks) FROM snapshots WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(saved_at, config_hash, task_count)| {
            Ok(SnapshotInfo {
                saved_at: parse_timestamp(&saved_at)?,
                config_hash,
                task_count: task_count as u64,
            })
        })
        .transpose()
    }

    fn clear(&mut self) -> StorageResult<()> {
        self.conn.execute_batch(
            "
            BEGIN;
            DELETE FROM snapshots;
            DELETE FROM fingerprints;
            DELETE FROM tasks;
            DELETE FROM proxies;
            DELETE FROM domains;
            COMMIT;
        ",
        )?;
        tracing::info!("Cleared stored snapshot");
        Ok(())
    }
}

fn parse_fingerprint(hex: &str) -> StorageResult<Fingerprint> {
    Fingerprint::from_hex(hex)
        .ok_or_else(|| StorageError::Corrupt(format!("invalid fingerprint '{}'", hex)))
}

fn parse_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("invalid timestamp '{}': {}", s, e)))
}
