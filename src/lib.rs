//! Sumi-Dispatch: crawl task scheduler and proxy-pool manager
//!
//! This crate decides, for every unit of crawl work, which URL is fetched,
//! through which egress proxy, by which worker and when. It deduplicates
//! URLs, enforces per-domain politeness, rotates proxies by health score and
//! recovers work from crashed workers through time-bounded leases.

pub mod config;
pub mod dispatch;
pub mod output;
pub mod proxy;
pub mod state;
pub mod storage;
pub mod url;
pub mod worker;

use thiserror::Error;

/// Main error type for Sumi-Dispatch operations
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(dispatch::TaskId),

    #[error("Proxy not found: {0}")]
    ProxyNotFound(String),

    #[error("Proxy already registered: {0}")]
    DuplicateProxy(String),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::TaskState,
        to: state::TaskState,
    },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Sumi-Dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{
    IgnoreReason, Lease, LeaseResponse, NoWorkReason, ReportAck, ReportDetail, Scheduler, TaskId,
};
pub use proxy::{Outcome, ProxyPool};
pub use storage::Snapshot;
pub use state::{DomainState, ProxyState, TaskState};
pub use url::{extract_domain, fingerprint, normalize_url, Fingerprint};
