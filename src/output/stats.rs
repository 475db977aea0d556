//! Dispatch statistics
//!
//! This module provides the statistics published to the metrics sink and
//! printed by `--stats`, computed either from a live scheduler or from a
//! stored snapshot.

use crate::proxy::ScoreDistribution;
use crate::state::{ProxyState, TaskState};
use crate::storage::Snapshot;
use std::collections::HashMap;

/// Event counters kept by the scheduler since it started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounters {
    pub leases_issued: u64,
    pub leases_reclaimed: u64,

    /// Lease requests answered with NoProxyAvailable
    pub no_proxy_events: u64,

    /// Lease requests answered with Throttled
    pub throttled_requests: u64,

    /// Stale or late reports
    pub ignored_reports: u64,

    pub completed: u64,
    pub retried: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
}

/// Throttle state of a single domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainStats {
    pub domain: String,
    pub active: u32,
    pub max_concurrency: u32,
    pub min_interval_ms: u64,

    /// Dispatch attempts denied by the domain's limits
    pub throttled: u64,

    pub dispatched: u64,
}

/// Point-in-time statistics of a scheduler
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchStats {
    /// Queue depth per task state
    pub tasks_by_state: HashMap<TaskState, u64>,

    pub total_tasks: u64,

    /// Distinct URLs seen
    pub fingerprints: u64,

    /// Domains sorted by name
    pub domains: Vec<DomainStats>,

    pub proxies_by_state: HashMap<ProxyState, u64>,
    pub score_distribution: ScoreDistribution,

    pub counters: DispatchCounters,
}

impl DispatchStats {
    pub fn tasks_in(&self, state: TaskState) -> u64 {
        self.tasks_by_state.get(&state).copied().unwrap_or(0)
    }

    pub fn proxies_in(&self, state: ProxyState) -> u64 {
        self.proxies_by_state.get(&state).copied().unwrap_or(0)
    }

    /// Statistics of a stored snapshot
    ///
    /// Counters are not persisted and read as zero.
    pub fn from_snapshot(snapshot: &Snapshot, max_score: f64) -> Self {
        let mut tasks_by_state = HashMap::new();
        for task in &snapshot.tasks {
            *tasks_by_state.entry(task.state).or_insert(0) += 1;
        }

        let mut proxies_by_state = HashMap::new();
        for proxy in &snapshot.proxies {
            *proxies_by_state.entry(proxy.state).or_insert(0) += 1;
        }

        let domains = snapshot
            .domains
            .iter()
            .map(|record| DomainStats {
                domain: record.domain.clone(),
                active: 0,
                max_concurrency: record.target_concurrency,
                min_interval_ms: record.min_interval_ms,
                throttled: record.throttled,
                dispatched: record.dispatched,
            })
            .collect();

        Self {
            tasks_by_state,
            total_tasks: snapshot.tasks.len() as u64,
            fingerprints: snapshot.fingerprints.len() as u64,
            domains,
            proxies_by_state,
            score_distribution: ScoreDistribution::from_scores(
                snapshot.proxies.iter().map(|proxy| proxy.score),
                max_score,
            ),
            counters: DispatchCounters::default(),
        }
    }
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &DispatchStats) {
    println!("=== Dispatch Statistics ===\n");

    println!("Overview:");
    println!("  Total tasks: {}", stats.total_tasks);
    println!("  Distinct URLs seen: {}", stats.fingerprints);
    println!("  Domains: {}", stats.domains.len());
    println!();

    println!("Tasks by State:");
    for state in TaskState::all_states() {
        let count = stats.tasks_in(state);
        let percentage = if stats.total_tasks > 0 {
            (count as f64 / stats.total_tasks as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", state, count, percentage);
    }
    println!();

    println!("Proxies:");
    for state in [ProxyState::Active, ProxyState::Cooldown, ProxyState::Banned] {
        println!("  {}: {}", state, stats.proxies_in(state));
    }
    println!(
        "  Scores: {} high / {} medium / {} low",
        stats.score_distribution.high,
        stats.score_distribution.medium,
        stats.score_distribution.low
    );
    println!();

    // Busiest domains first
    let mut throttled: Vec<&DomainStats> =
        stats.domains.iter().filter(|d| d.throttled > 0).collect();
    if !throttled.is_empty() {
        throttled.sort_by(|a, b| b.throttled.cmp(&a.throttled));
        println!("Throttled Domains ({}):", throttled.len());
        for domain in throttled.iter().take(10) {
            println!(
                "  - {}: {} denied, {} dispatched, limit {} every {}ms",
                domain.domain,
                domain.throttled,
                domain.dispatched,
                domain.max_concurrency,
                domain.min_interval_ms
            );
        }
        println!();
    }

    let counters = &stats.counters;
    if *counters != DispatchCounters::default() {
        println!("Events:");
        println!("  Leases issued: {}", counters.leases_issued);
        println!("  Leases reclaimed: {}", counters.leases_reclaimed);
        println!("  No proxy available: {}", counters.no_proxy_events);
        println!("  Throttled requests: {}", counters.throttled_requests);
        println!("  Ignored reports: {}", counters.ignored_reports);
        println!();
    }

    let completed = stats.tasks_in(TaskState::Completed);
    let finished = completed + stats.tasks_in(TaskState::Dead);
    let success_rate = if finished > 0 {
        (completed as f64 / finished as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} finished tasks completed)",
        success_rate, completed, finished
    );
}
