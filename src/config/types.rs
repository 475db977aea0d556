use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sumi-Dispatch
///
/// Every section is optional; missing sections and keys fall back to the
/// defaults documented on each field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    #[serde(rename = "proxy-pool")]
    pub proxy_pool: ProxyPoolConfig,
    pub throttle: ThrottleConfig,
    pub worker: WorkerConfig,
    pub storage: StorageConfig,

    /// Seed URLs submitted when a crawl starts fresh
    pub seeds: Vec<String>,
}

/// Lease, retry and sweep configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Retries allowed before a task is dead-lettered (default 3)
    pub max_retries: u32,

    /// How long a worker holds a lease before it is reclaimed (default 30s)
    pub lease_duration_ms: u64,

    /// Sweep cadence; defaults to half the lease duration
    pub reclaim_interval_ms: Option<u64>,

    /// Priority added to a task on every retry (lower values run first)
    pub retry_priority_penalty: u32,

    /// Delay before a retried task becomes eligible again (default 0)
    pub retry_delay_ms: u64,

    /// Distinct domains checked per lease request before giving up
    pub max_scan: usize,

    /// Throttle adjustment applied when a domain answers HTTP 429
    pub rate_limit_factor: f64,

    /// How long a proxy stays excluded for a domain that blocked it
    pub exclusion_ms: u64,

    /// Publish statistics to the metrics sink every N sweeper ticks
    pub stats_every: u32,
}

impl SchedulerConfig {
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(
            self.reclaim_interval_ms
                .unwrap_or(self.lease_duration_ms / 2)
                .max(1),
        )
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn exclusion(&self) -> Duration {
        Duration::from_millis(self.exclusion_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            lease_duration_ms: 30_000,
            reclaim_interval_ms: None,
            retry_priority_penalty: 10,
            retry_delay_ms: 0,
            max_scan: 256,
            rate_limit_factor: 0.5,
            exclusion_ms: 60_000,
            stats_every: 20,
        }
    }
}

/// Proxy health scoring and cooldown configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProxyPoolConfig {
    /// Consecutive transient failures that put a proxy into cooldown
    pub cooldown_threshold: u32,

    /// First cooldown duration; doubles with every further failure
    pub cooldown_base_ms: u64,

    /// Ceiling for the cooldown duration
    pub cooldown_max_ms: u64,

    pub initial_score: f64,
    pub min_score: f64,
    pub max_score: f64,
    pub success_reward: f64,
    pub failure_penalty: f64,

    /// Proxy addresses registered at startup (e.g. "http://10.0.0.1:8080")
    pub proxies: Vec<String>,

    /// Text files listing more proxy addresses, one per line
    pub proxy_files: Vec<String>,

    /// URL fetched through every proxy to check it before the crawl starts
    pub validation_url: Option<String>,

    /// Health checks in flight at once during validation
    pub validation_concurrency: usize,
}

impl ProxyPoolConfig {
    pub fn cooldown_base(&self) -> Duration {
        Duration::from_millis(self.cooldown_base_ms)
    }

    pub fn cooldown_max(&self) -> Duration {
        Duration::from_millis(self.cooldown_max_ms)
    }
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            cooldown_threshold: 5,
            cooldown_base_ms: 30_000,
            cooldown_max_ms: 30 * 60 * 1000,
            initial_score: 5.0,
            min_score: 0.1,
            max_score: 10.0,
            success_reward: 1.0,
            failure_penalty: 1.0,
            proxies: Vec::new(),
            proxy_files: Vec::new(),
            validation_url: None,
            validation_concurrency: 16,
        }
    }
}

/// Per-domain politeness configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ThrottleConfig {
    /// Default concurrent leases per domain
    pub max_concurrency: u32,

    /// Default minimum time between dispatches to the same domain
    pub min_interval_ms: u64,

    /// Upper bound for the interval after runtime tightening
    pub max_min_interval_ms: u64,

    /// Domain-specific overrides
    pub domain: Vec<DomainOverride>,
}

impl ThrottleConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn max_min_interval(&self) -> Duration {
        Duration::from_millis(self.max_min_interval_ms)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            min_interval_ms: 1000,
            max_min_interval_ms: 60_000,
            domain: Vec::new(),
        }
    }
}

/// Politeness override for a single domain
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DomainOverride {
    pub domain: String,
    pub max_concurrency: Option<u32>,
    pub min_interval_ms: Option<u64>,
}

/// Reference worker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WorkerConfig {
    /// Number of concurrent workers started by the binary
    pub count: usize,

    pub request_timeout_ms: u64,

    pub user_agent: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 8,
            request_timeout_ms: 30_000,
            user_agent: format!("sumi-dispatch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Snapshot store configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Path to the SQLite snapshot database; persistence is off when unset
    pub database_path: Option<String>,
}
