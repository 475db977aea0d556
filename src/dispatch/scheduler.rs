//! Scheduler: the orchestrator of leases and reports
//!
//! The scheduler owns the frontier, the domain throttle and the proxy pool
//! behind a single mutex, so that selecting a task, taking its throttle slot
//! and assigning a proxy happen as one step. The fingerprint store has its own
//! lock and can be queried without touching the scheduling state.
//!
//! No network I/O happens here: workers fetch between
//! [`request_lease`](Scheduler::request_lease) and [`report`](Scheduler::report).

use crate::config::{Config, SchedulerConfig};
use crate::dispatch::{
    DomainThrottle, FingerprintStore, Frontier, Lease, LeaseResponse, NoWorkReason,
    ReclaimedLease, ReportAck, ReportDetail, Task, TaskId,
};
use crate::output::{DispatchCounters, DispatchStats, DomainStats};
use crate::proxy::{Outcome, Proxy, ProxyPool};
use crate::state::{DomainState, ProxyState, TaskState};
use crate::storage::Snapshot;
use crate::url::canonicalize;
use crate::{DispatchError, Result};
use chrono::Utc;
use rand::Rng;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Suggested poll interval when nothing is pending
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Upper bound for the poll interval when no proxy is available
const NO_PROXY_WAIT: Duration = Duration::from_secs(1);

/// Lower bound for every suggested poll interval
const WAIT_FLOOR: Duration = Duration::from_millis(10);

/// What a scheduler tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Proxies whose cooldown ended
    pub proxies_restored: usize,

    /// Delayed retries moved back to Pending
    pub retries_promoted: usize,

    pub reclaimed: Vec<ReclaimedLease>,
}

struct Core {
    frontier: Frontier,
    throttle: DomainThrottle,
    pool: ProxyPool,
    counters: DispatchCounters,
}

/// Crawl task scheduler and proxy-pool manager
///
/// All operations take `&self`; share the scheduler between workers with an
/// `Arc`.
pub struct Scheduler {
    config: SchedulerConfig,
    fingerprints: Arc<FingerprintStore>,
    core: Mutex<Core>,
}

impl Scheduler {
    /// Creates an empty scheduler with the configured proxies
    pub fn new(config: &Config) -> Self {
        let fingerprints = Arc::new(FingerprintStore::new());
        let core = Core {
            frontier: Frontier::new(&config.scheduler, Arc::clone(&fingerprints)),
            throttle: DomainThrottle::new(config.throttle.clone()),
            pool: ProxyPool::new(config.proxy_pool.clone()),
            counters: DispatchCounters::default(),
        };
        Self::from_core(config.scheduler.clone(), fingerprints, core)
    }

    /// Rebuilds a scheduler from a stored snapshot
    ///
    /// Leased tasks come back as `Pending` without consuming a retry, and
    /// proxy cooldowns resume with the time they had left. Proxies listed in
    /// the configuration but missing from the snapshot are added.
    pub fn restore(config: &Config, snapshot: Snapshot) -> Self {
        let now = Instant::now();
        let fingerprints = Arc::new(FingerprintStore::from_fingerprints(snapshot.fingerprints));
        let frontier = Frontier::from_records(
            &config.scheduler,
            Arc::clone(&fingerprints),
            snapshot.tasks,
            snapshot.next_task_id,
        );

        let mut pool = ProxyPool::from_records(config.proxy_pool.clone(), snapshot.proxies, now);
        for address in &config.proxy_pool.proxies {
            if pool.get(address).is_none() {
                if let Err(e) = pool.add(address) {
                    tracing::warn!("Could not add configured proxy {}: {}", address, e);
                }
            }
        }

        tracing::info!(
            "Restored {} tasks ({} pending), {} proxies and {} domains from snapshot taken {}",
            frontier.len(),
            frontier.pending_len(),
            pool.len(),
            snapshot.domains.len(),
            snapshot.saved_at.to_rfc3339()
        );

        let core = Core {
            frontier,
            throttle: DomainThrottle::from_records(config.throttle.clone(), snapshot.domains),
            pool,
            counters: DispatchCounters::default(),
        };
        Self::from_core(config.scheduler.clone(), fingerprints, core)
    }

    fn from_core(config: SchedulerConfig, fingerprints: Arc<FingerprintStore>, core: Core) -> Self {
        Self {
            config,
            fingerprints,
            core: Mutex::new(core),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // ===== Discovery =====

    /// Normalizes `url` and queues it unless it was seen before
    ///
    /// # Returns
    ///
    /// * `Ok(Some(TaskId))` - A new task was created
    /// * `Ok(None)` - Duplicate URL, nothing changed
    /// * `Err(DispatchError::Url)` - The URL cannot be crawled
    pub fn enqueue(&self, url: &str, priority: u32) -> Result<Option<TaskId>> {
        let canonical = canonicalize(url)?;
        let mut core = self.lock();
        let id = core.frontier.enqueue(canonical, priority);

        match id {
            Some(id) => tracing::debug!("Queued {} as task {} (priority {})", url, id, priority),
            None => tracing::trace!("Duplicate URL skipped: {}", url),
        }
        Ok(id)
    }

    /// Returns true if `url` was already discovered in this crawl
    pub fn seen(&self, url: &str) -> Result<bool> {
        let canonical = canonicalize(url)?;
        Ok(self.fingerprints.contains(&canonical.fingerprint))
    }

    // ===== Worker protocol =====

    /// Asks for the next unit of work on behalf of `worker_id`
    pub fn request_lease(&self, worker_id: &str) -> Result<LeaseResponse> {
        self.request_lease_at(worker_id, Instant::now())
    }

    pub fn request_lease_at(&self, worker_id: &str, now: Instant) -> Result<LeaseResponse> {
        self.request_lease_with(worker_id, now, &mut rand::rng())
    }

    /// Lease request with an explicit random source for proxy selection
    pub fn request_lease_with<R: Rng + ?Sized>(
        &self,
        worker_id: &str,
        now: Instant,
        rng: &mut R,
    ) -> Result<LeaseResponse> {
        let mut guard = self.lock();
        let Core {
            frontier,
            throttle,
            pool,
            counters,
        } = &mut *guard;

        // Due cooldowns and retries take effect now, not at the next tick
        pool.sweep(now);
        frontier.promote_due(now);

        if frontier.pending_len() == 0 {
            let retry_after = frontier
                .next_retry_in(now)
                .map_or(IDLE_WAIT, |wait| wait.clamp(WAIT_FLOOR, IDLE_WAIT));
            return Ok(LeaseResponse::NoWork {
                reason: NoWorkReason::Idle,
                retry_after,
            });
        }

        // Checked first so that no throttle state moves for nothing
        if !pool.has_assignable() {
            counters.no_proxy_events += 1;
            return Ok(no_proxy(pool, now));
        }

        let Some(task_id) = frontier.next_eligible(throttle, now) else {
            counters.throttled_requests += 1;
            let retry_after = throttle
                .minimum_wait_time(frontier.pending_domains(), now)
                .max(WAIT_FLOOR);
            return Ok(LeaseResponse::NoWork {
                reason: NoWorkReason::Throttled,
                retry_after,
            });
        };

        let domain = frontier
            .task(task_id)
            .map(|task| task.domain.clone())
            .ok_or(DispatchError::TaskNotFound(task_id))?;

        let Some(proxy) = pool.acquire(&domain, now, rng) else {
            frontier.requeue(task_id, throttle)?;
            counters.no_proxy_events += 1;
            tracing::debug!("No proxy available for {}, task {} requeued", domain, task_id);
            return Ok(no_proxy(pool, now));
        };

        let deadline = now + self.config.lease_duration();
        let lease = frontier.mark_leased(task_id, worker_id, &proxy.address, deadline)?;
        counters.leases_issued += 1;

        tracing::debug!(
            "Leased task {} ({}) to {} via {}",
            task_id,
            lease.url,
            worker_id,
            proxy.address
        );
        Ok(LeaseResponse::Granted(lease))
    }

    /// Records the outcome of a leased fetch
    ///
    /// `outcome` is the task's outcome. Reports for leases that are no longer
    /// current are ignored entirely and change nothing.
    pub fn report(&self, lease: &Lease, outcome: Outcome, detail: ReportDetail) -> Result<ReportAck> {
        self.report_at(lease, outcome, detail, Instant::now())
    }

    pub fn report_at(
        &self,
        lease: &Lease,
        outcome: Outcome,
        detail: ReportDetail,
        now: Instant,
    ) -> Result<ReportAck> {
        let mut guard = self.lock();
        let Core {
            frontier,
            throttle,
            pool,
            counters,
        } = &mut *guard;

        let task = frontier
            .task(lease.task_id)
            .ok_or(DispatchError::TaskNotFound(lease.task_id))?;
        if let Err(reason) = task.check_lease(lease) {
            counters.ignored_reports += 1;
            tracing::debug!(
                "Ignoring report for task {} from {}: {:?}",
                lease.task_id,
                lease.worker_id,
                reason
            );
            return Ok(ReportAck::Ignored(reason));
        }

        // Health and throttle updates follow the lease as issued
        let domain = task.domain.clone();
        let proxy_address = task.lease_proxy.clone().unwrap_or_default();

        // A resource that is gone says nothing bad about the proxy
        let proxy_outcome = detail.proxy_outcome.unwrap_or(match outcome {
            Outcome::FatalFailure => Outcome::Success,
            other => other,
        });
        pool.report(&proxy_address, proxy_outcome, now);

        match detail.status {
            Some(429) => {
                throttle.adjust(&domain, self.config.rate_limit_factor);
                pool.exclude(&proxy_address, &domain, now + self.config.exclusion());
            }
            Some(403) => {
                pool.exclude(&proxy_address, &domain, now + self.config.exclusion());
            }
            _ => {}
        }

        let error = detail
            .message
            .or_else(|| detail.status.map(|status| format!("HTTP {}", status)));
        let id = lease.task_id;

        let ack = if proxy_outcome == Outcome::FatalFailure && !outcome.is_success() {
            frontier.requeue(id, throttle)?;
            counters.requeued += 1;
            ReportAck::Requeued
        } else {
            match outcome {
                Outcome::Success => {
                    frontier.complete(id, throttle)?;
                    counters.completed += 1;
                    ReportAck::Completed
                }
                Outcome::TransientFailure => match frontier.fail(id, true, error, now, throttle)? {
                    TaskState::Dead => {
                        counters.dead_lettered += 1;
                        ReportAck::DeadLettered
                    }
                    _ => {
                        counters.retried += 1;
                        ReportAck::Retrying {
                            retry_count: frontier.task(id).map_or(0, |task| task.retry_count),
                        }
                    }
                },
                Outcome::FatalFailure => {
                    frontier.fail(id, false, error, now, throttle)?;
                    counters.dead_lettered += 1;
                    ReportAck::DeadLettered
                }
            }
        };

        if ack == ReportAck::DeadLettered {
            tracing::warn!("Task {} dead-lettered: {}", id, lease.url);
        } else {
            tracing::debug!("Report for task {} from {}: {:?}", id, lease.worker_id, ack);
        }
        Ok(ack)
    }

    /// Dead-letters a task that has not finished yet
    ///
    /// A worker still fetching the task is not interrupted; its report will
    /// be ignored.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The task was cancelled
    /// * `Ok(false)` - The task had already finished
    pub fn cancel(&self, task_id: TaskId) -> Result<bool> {
        let mut guard = self.lock();
        let Core {
            frontier, throttle, ..
        } = &mut *guard;
        let cancelled = frontier.cancel(task_id, throttle)?;
        if cancelled {
            tracing::info!("Task {} cancelled", task_id);
        }
        Ok(cancelled)
    }

    // ===== Maintenance =====

    /// Runs one maintenance pass: proxy cooldowns, delayed retries, then lease reclaim
    pub fn tick(&self) -> TickReport {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&self, now: Instant) -> TickReport {
        let mut guard = self.lock();
        let Core {
            frontier,
            throttle,
            pool,
            counters,
        } = &mut *guard;

        let proxies_restored = pool.sweep(now);
        let retries_promoted = frontier.promote_due(now);
        let reclaimed = frontier.reclaim_expired(now, throttle);

        for lease in &reclaimed {
            counters.leases_reclaimed += 1;
            if lease.state == TaskState::Dead {
                counters.dead_lettered += 1;
            } else {
                counters.retried += 1;
            }
            tracing::warn!(
                "Reclaimed expired lease of task {} from {} ({})",
                lease.task_id,
                lease.worker_id,
                lease.state
            );
        }

        TickReport {
            proxies_restored,
            retries_promoted,
            reclaimed,
        }
    }

    // ===== Administration =====

    pub fn add_proxy(&self, address: &str) -> Result<()> {
        self.lock().pool.add(address)
    }

    /// Adds every address not already in the pool
    ///
    /// # Returns
    ///
    /// The number of proxies added.
    pub fn add_proxies<I, S>(&self, addresses: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut core = self.lock();
        let mut added = 0;
        for address in addresses {
            let address = address.as_ref();
            if core.pool.get(address).is_none() && core.pool.add(address).is_ok() {
                added += 1;
            }
        }
        tracing::info!("Added {} new proxies ({} in pool)", added, core.pool.len());
        added
    }

    /// Applies the outcome of a health check made outside any lease
    pub fn report_proxy(&self, address: &str, outcome: Outcome) -> Result<ProxyState> {
        self.report_proxy_at(address, outcome, Instant::now())
    }

    pub fn report_proxy_at(&self, address: &str, outcome: Outcome, now: Instant) -> Result<ProxyState> {
        self.lock()
            .pool
            .report(address, outcome, now)
            .ok_or_else(|| DispatchError::ProxyNotFound(address.to_string()))
    }

    pub fn remove_proxy(&self, address: &str) -> Result<Proxy> {
        self.lock().pool.remove(address)
    }

    pub fn ban_proxy(&self, address: &str) -> Result<()> {
        self.lock().pool.ban(address)
    }

    pub fn reset_proxy(&self, address: &str) -> Result<()> {
        self.lock().pool.reset(address)
    }

    pub fn configure_domain(&self, domain: &str, max_concurrency: u32, min_interval: Duration) {
        self.lock()
            .throttle
            .configure(domain, max_concurrency, min_interval);
    }

    pub fn adjust_domain(&self, domain: &str, factor: f64) {
        self.lock().throttle.adjust(domain, factor);
    }

    // ===== Queries =====

    pub fn task(&self, task_id: TaskId) -> Option<Task> {
        self.lock().frontier.task(task_id).cloned()
    }

    pub fn proxy(&self, address: &str) -> Option<Proxy> {
        self.lock().pool.get(address).cloned()
    }

    pub fn proxies(&self) -> Vec<Proxy> {
        self.lock().pool.proxies().cloned().collect()
    }

    /// The `n` best proxies by score
    pub fn top_proxies(&self, n: usize) -> Vec<Proxy> {
        self.lock().pool.top(n).into_iter().cloned().collect()
    }

    pub fn domain(&self, domain: &str) -> Option<DomainState> {
        self.lock().throttle.get(domain).cloned()
    }

    pub fn dead_letters(&self) -> Vec<Task> {
        self.lock()
            .frontier
            .dead_letters()
            .into_iter()
            .cloned()
            .collect()
    }

    /// True when every task has completed or been dead-lettered
    pub fn is_drained(&self) -> bool {
        self.lock().frontier.is_drained()
    }

    pub fn counters(&self) -> DispatchCounters {
        self.lock().counters
    }

    pub fn stats(&self) -> DispatchStats {
        let core = self.lock();

        let tasks_by_state = core
            .frontier
            .count_by_state()
            .into_iter()
            .map(|(state, count)| (state, count as u64))
            .collect();
        let proxies_by_state = core
            .pool
            .count_by_state()
            .into_iter()
            .map(|(state, count)| (state, count as u64))
            .collect();

        let mut domains: Vec<DomainStats> = core
            .throttle
            .domains()
            .map(|state| DomainStats {
                domain: state.domain.clone(),
                active: state.active_count,
                max_concurrency: state.max_concurrency,
                min_interval_ms: state.min_interval.as_millis() as u64,
                throttled: state.throttled,
                dispatched: state.dispatched,
            })
            .collect();
        domains.sort_by(|a, b| a.domain.cmp(&b.domain));

        DispatchStats {
            tasks_by_state,
            total_tasks: core.frontier.len() as u64,
            fingerprints: self.fingerprints.len() as u64,
            domains,
            proxies_by_state,
            score_distribution: core.pool.score_distribution(),
            counters: core.counters,
        }
    }

    // ===== Persistence =====

    /// Captures the complete scheduling state
    pub fn snapshot(&self) -> Snapshot {
        let now = Instant::now();
        let core = self.lock();
        Snapshot {
            saved_at: Utc::now(),
            next_task_id: core.frontier.next_id(),
            fingerprints: self.fingerprints.snapshot(),
            tasks: core.frontier.to_records(),
            proxies: core.pool.to_records(now),
            domains: core.throttle.to_records(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn no_proxy(pool: &ProxyPool, now: Instant) -> LeaseResponse {
    let retry_after = pool
        .time_until_recovery(now)
        .unwrap_or(NO_PROXY_WAIT)
        .clamp(WAIT_FLOOR, NO_PROXY_WAIT);
    LeaseResponse::NoWork {
        reason: NoWorkReason::NoProxyAvailable,
        retry_after,
    }
}
