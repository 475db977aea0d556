//! Output module for publishing dispatch metrics
//!
//! This module handles:
//! - Computing dispatch statistics (queue depths, throttling, proxy health)
//! - Publishing them to a metrics sink
//! - Printing them for the `--stats` command

pub mod stats;

pub use stats::{print_statistics, DispatchCounters, DispatchStats, DomainStats};

use crate::dispatch::ReclaimedLease;
use crate::state::{ProxyState, TaskState};

/// Destination for the metrics the scheduler emits
///
/// Implementations must not block: they are called from the sweeper task.
pub trait MetricsSink: Send + Sync {
    /// Publishes a statistics snapshot
    fn publish(&self, stats: &DispatchStats);

    /// Called once per lease taken back from an unresponsive worker
    fn lease_reclaimed(&self, _lease: &ReclaimedLease) {}
}

/// Metrics sink writing structured `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn publish(&self, stats: &DispatchStats) {
        let saturated = stats
            .domains
            .iter()
            .filter(|d| d.active > 0 && d.active >= d.max_concurrency)
            .count();

        tracing::info!(
            pending = stats.tasks_in(TaskState::Pending),
            leased = stats.tasks_in(TaskState::Leased),
            retrying = stats.tasks_in(TaskState::FailedRetryable),
            completed = stats.tasks_in(TaskState::Completed),
            dead = stats.tasks_in(TaskState::Dead),
            domains = stats.domains.len(),
            saturated_domains = saturated,
            proxies_active = stats.proxies_in(ProxyState::Active),
            proxies_cooldown = stats.proxies_in(ProxyState::Cooldown),
            proxies_banned = stats.proxies_in(ProxyState::Banned),
            score_high = stats.score_distribution.high,
            score_medium = stats.score_distribution.medium,
            score_low = stats.score_distribution.low,
            leases_issued = stats.counters.leases_issued,
            leases_reclaimed = stats.counters.leases_reclaimed,
            no_proxy = stats.counters.no_proxy_events,
            "Dispatch statistics"
        );
    }

    fn lease_reclaimed(&self, lease: &ReclaimedLease) {
        tracing::warn!(
            task = %lease.task_id,
            worker = %lease.worker_id,
            proxy = %lease.proxy_address,
            state = %lease.state,
            "Lease reclaimed"
        );
    }
}
