//! Storage traits and error types
//!
//! This module defines the trait interface for snapshot stores and
//! associated error types.

use crate::storage::{Snapshot, SnapshotInfo};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be decoded
    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for snapshot store implementations
///
/// A store holds at most one snapshot: saving replaces the previous one
/// atomically, so a crash mid-save leaves the old snapshot intact.
pub trait Storage {
    /// Replaces the stored snapshot
    ///
    /// # Arguments
    ///
    /// * `snapshot` - The scheduler state to persist
    /// * `config_hash` - Hash of the configuration the crawl runs with
    fn save_snapshot(&mut self, snapshot: &Snapshot, config_hash: &str) -> StorageResult<()>;

    /// Loads the stored snapshot, if any
    fn load_snapshot(&self) -> StorageResult<Option<Snapshot>>;

    /// Metadata of the stored snapshot without loading it
    fn snapshot_info(&self) -> StorageResult<Option<SnapshotInfo>>;

    /// Deletes the stored snapshot
    fn clear(&mut self) -> StorageResult<()>;
}
