//! Configuration module for Sumi-Dispatch
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_dispatch::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("dispatch.toml")).unwrap();
//! println!("Leases last {:?}", config.scheduler.lease_duration());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, DomainOverride, ProxyPoolConfig, SchedulerConfig, StorageConfig, ThrottleConfig,
    WorkerConfig,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, load_proxy_list, parse_config,
    parse_proxy_list,
};
pub use validation::validate;
