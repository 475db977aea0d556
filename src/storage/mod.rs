//! Storage module for persisting dispatch state
//!
//! This module handles the snapshot store used for crash-restart durability:
//! - SQLite database initialization and schema management
//! - Fingerprint, task, proxy and domain persistence
//! - Snapshot metadata (when it was taken, with which configuration)

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::{ProxyState, TaskState};
use crate::url::Fingerprint;
use chrono::{DateTime, Utc};

/// Represents a task in the database
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: u64,
    pub url: String,
    pub domain: String,
    pub fingerprint: Fingerprint,
    pub priority: u32,
    pub state: TaskState,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Represents a proxy in the database
///
/// Cooldowns are stored as the time remaining when the snapshot was taken,
/// since monotonic instants do not survive a restart.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRecord {
    pub address: String,
    pub state: ProxyState,
    pub score: f64,
    pub consecutive_failures: u32,
    pub cooldown_remaining_ms: Option<u64>,
    pub total_success: u64,
    pub total_failure: u64,
    pub added_at: DateTime<Utc>,
}

/// Represents a domain's throttle state in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainRecord {
    pub domain: String,
    pub target_concurrency: u32,
    pub min_interval_ms: u64,
    pub base_max_concurrency: u32,
    pub base_min_interval_ms: u64,
    pub throttled: u64,
    pub dispatched: u64,
}

/// Complete persisted state of a scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub saved_at: DateTime<Utc>,

    /// Next task id to hand out, so restored crawls never reuse ids
    pub next_task_id: u64,

    pub fingerprints: Vec<Fingerprint>,
    pub tasks: Vec<TaskRecord>,
    pub proxies: Vec<ProxyRecord>,
    pub domains: Vec<DomainRecord>,
}

/// Metadata describing the stored snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub saved_at: DateTime<Utc>,
    pub config_hash: String,
    pub task_count: u64,
}
