//! Task frontier: priority-ordered holding area for crawl tasks
//!
//! Pending tasks are grouped by priority (lower values first) and, within a
//! priority, by domain. Domains of the same priority take turns, so one
//! domain's backlog cannot starve the others. Leased tasks are indexed by
//! deadline so that reclaiming expired leases only touches expired entries.

use crate::config::SchedulerConfig;
use crate::dispatch::{DomainThrottle, FingerprintStore, IgnoreReason, Lease, TaskId};
use crate::state::TaskState;
use crate::storage::TaskRecord;
use crate::url::{CanonicalUrl, Fingerprint};
use crate::DispatchError;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A unit of crawl work
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,

    /// Normalized URL
    pub url: String,

    pub fingerprint: Fingerprint,
    pub domain: String,

    /// Lower values are scheduled first
    pub priority: u32,

    pub state: TaskState,
    pub retry_count: u32,

    // Lease metadata, set while Leased
    pub lease_owner: Option<String>,
    pub lease_proxy: Option<String>,
    pub lease_deadline: Option<Instant>,

    /// Earliest retry time, set while FailedRetryable
    pub not_before: Option<Instant>,

    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Task {
    /// Checks that `lease` is the task's current lease
    pub fn check_lease(&self, lease: &Lease) -> Result<(), IgnoreReason> {
        match self.state {
            TaskState::Completed | TaskState::Dead => Err(IgnoreReason::TaskTerminal),
            TaskState::Pending | TaskState::FailedRetryable => Err(IgnoreReason::LeaseExpired),
            TaskState::Leased => {
                if self.lease_owner.as_deref() != Some(lease.worker_id.as_str()) {
                    Err(IgnoreReason::NotLeaseHolder)
                } else if self.lease_deadline != Some(lease.deadline) {
                    // Same worker, older lease on a task that was reclaimed and re-leased
                    Err(IgnoreReason::LeaseExpired)
                } else if self.lease_proxy.as_deref() != Some(lease.proxy_address.as_str())
                    || self.domain != lease.domain
                {
                    Err(IgnoreReason::LeaseMismatch)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Moves the task to `to` if the state machine allows it
    fn transition(&mut self, to: TaskState) -> Result<(), DispatchError> {
        if !self.state.can_transition_to(to) {
            return Err(DispatchError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    fn clear_lease(&mut self) -> Option<Instant> {
        self.lease_owner = None;
        self.lease_proxy = None;
        self.lease_deadline.take()
    }

    fn to_record(&self) -> TaskRecord {
        TaskRecord {
            id: self.id.0,
            url: self.url.clone(),
            domain: self.domain.clone(),
            fingerprint: self.fingerprint,
            priority: self.priority,
            state: self.state,
            retry_count: self.retry_count,
            created_at: self.created_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// A lease taken back from a worker that never reported
#[derive(Debug, Clone, PartialEq)]
pub struct ReclaimedLease {
    pub task_id: TaskId,
    pub worker_id: String,
    pub proxy_address: String,

    /// State the task moved to: Pending, FailedRetryable or Dead
    pub state: TaskState,
}

/// Pending tasks of one priority, queued per domain
#[derive(Debug, Default)]
struct PriorityLevel {
    /// Round-robin order; every listed domain has a non-empty queue
    domains: VecDeque<String>,
    queues: HashMap<String, VecDeque<TaskId>>,
}

impl PriorityLevel {
    fn push_back(&mut self, domain: &str, id: TaskId) {
        self.queue_for(domain).push_back(id);
    }

    fn push_front(&mut self, domain: &str, id: TaskId) {
        self.queue_for(domain).push_front(id);
    }

    fn queue_for(&mut self, domain: &str) -> &mut VecDeque<TaskId> {
        if !self.queues.contains_key(domain) {
            self.domains.push_back(domain.to_string());
        }
        self.queues.entry(domain.to_string()).or_default()
    }

    fn remove(&mut self, domain: &str, id: TaskId) -> bool {
        let Some(queue) = self.queues.get_mut(domain) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|queued| *queued != id);
        let removed = queue.len() != before;

        if queue.is_empty() {
            self.queues.remove(domain);
            self.domains.retain(|d| d != domain);
        }
        removed
    }

    fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

/// Owner of every task of a crawl
///
/// Every state change goes through one of the methods below; callers pass the
/// [`DomainThrottle`] so that leaving `Leased` always returns the slot taken
/// when the task was selected.
#[derive(Debug)]
pub struct Frontier {
    fingerprints: Arc<FingerprintStore>,

    /// All tasks, terminal ones included
    tasks: HashMap<TaskId, Task>,

    levels: BTreeMap<u32, PriorityLevel>,

    /// Leased tasks by deadline
    leases: BTreeSet<(Instant, TaskId)>,

    /// FailedRetryable tasks by retry time
    delayed: BTreeSet<(Instant, TaskId)>,

    /// Tasks handed out by next_eligible but not yet leased or requeued
    selected: HashSet<TaskId>,

    next_id: u64,

    max_retries: u32,
    retry_penalty: u32,
    retry_delay: Duration,
    max_scan: usize,
}

impl Frontier {
    pub fn new(config: &SchedulerConfig, fingerprints: Arc<FingerprintStore>) -> Self {
        Self {
            fingerprints,
            tasks: HashMap::new(),
            levels: BTreeMap::new(),
            leases: BTreeSet::new(),
            delayed: BTreeSet::new(),
            selected: HashSet::new(),
            next_id: 1,
            max_retries: config.max_retries,
            retry_penalty: config.retry_priority_penalty,
            retry_delay: config.retry_delay(),
            max_scan: config.max_scan.max(1),
        }
    }

    /// Rebuilds a frontier from persisted task records
    ///
    /// Tasks that were leased or waiting for a retry come back as `Pending`.
    /// A lease interrupted by a restart is not the task's fault, so no retry
    /// is consumed.
    pub fn from_records(
        config: &SchedulerConfig,
        fingerprints: Arc<FingerprintStore>,
        mut records: Vec<TaskRecord>,
        next_id: u64,
    ) -> Self {
        let mut frontier = Self::new(config, fingerprints);
        records.sort_by_key(|record| record.id);

        for record in records {
            let state = match record.state {
                TaskState::Leased | TaskState::FailedRetryable => TaskState::Pending,
                state => state,
            };
            let id = TaskId(record.id);
            frontier.fingerprints.admit(record.fingerprint);
            frontier.next_id = frontier.next_id.max(record.id + 1);

            if state == TaskState::Pending {
                frontier.level(record.priority).push_back(&record.domain, id);
            }
            frontier.tasks.insert(
                id,
                Task {
                    id,
                    url: record.url,
                    fingerprint: record.fingerprint,
                    domain: record.domain,
                    priority: record.priority,
                    state,
                    retry_count: record.retry_count,
                    lease_owner: None,
                    lease_proxy: None,
                    lease_deadline: None,
                    not_before: None,
                    created_at: record.created_at,
                    last_error: record.last_error,
                },
            );
        }

        frontier.next_id = frontier.next_id.max(next_id);
        frontier
    }

    /// Persistable view of every task, ordered by id
    pub fn to_records(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.tasks.values().map(Task::to_record).collect();
        records.sort_by_key(|record| record.id);
        records
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    // ===== Lifecycle =====

    /// Adds a newly discovered URL as a `Pending` task
    ///
    /// # Returns
    ///
    /// * `Some(TaskId)` - The URL was new and is now queued
    /// * `None` - The URL was seen before (duplicate, no-op)
    pub fn enqueue(&mut self, url: CanonicalUrl, priority: u32) -> Option<TaskId> {
        if !self.fingerprints.admit(url.fingerprint) {
            return None;
        }

        let id = TaskId(self.next_id);
        self.next_id += 1;

        self.level(priority).push_back(&url.domain, id);
        self.tasks.insert(
            id,
            Task {
                id,
                url: url.url.to_string(),
                fingerprint: url.fingerprint,
                domain: url.domain,
                priority,
                state: TaskState::Pending,
                retry_count: 0,
                lease_owner: None,
                lease_proxy: None,
                lease_deadline: None,
                not_before: None,
                created_at: Utc::now(),
                last_error: None,
            },
        );
        Some(id)
    }

    /// Selects the highest-priority pending task whose domain may be dispatched
    ///
    /// The throttle check happens inside this call: the returned task's domain
    /// already holds a dispatch slot, which the caller must hand to
    /// [`mark_leased`](Self::mark_leased) or give back via
    /// [`requeue`](Self::requeue). A denied domain is not asked again within
    /// the same call, and at most `max-scan` domains are asked in total.
    pub fn next_eligible(&mut self, throttle: &mut DomainThrottle, now: Instant) -> Option<TaskId> {
        let max_scan = self.max_scan;
        let mut denied: HashSet<String> = HashSet::new();
        let mut checks = 0;
        let mut chosen = None;

        'levels: for (&priority, level) in self.levels.iter_mut() {
            for _ in 0..level.domains.len() {
                let Some(domain) = level.domains.pop_front() else {
                    break;
                };
                if denied.contains(&domain) {
                    level.domains.push_back(domain);
                    continue;
                }
                if checks >= max_scan {
                    level.domains.push_front(domain);
                    break 'levels;
                }
                checks += 1;

                if !throttle.try_dispatch(&domain, now) {
                    level.domains.push_back(domain.clone());
                    denied.insert(domain);
                    continue;
                }

                match level.queues.get_mut(&domain).and_then(VecDeque::pop_front) {
                    Some(id) => {
                        if level.queues.get(&domain).is_some_and(VecDeque::is_empty) {
                            level.queues.remove(&domain);
                        } else {
                            level.domains.push_back(domain);
                        }
                        chosen = Some((priority, id));
                        break 'levels;
                    }
                    None => {
                        level.queues.remove(&domain);
                        throttle.release(&domain);
                    }
                }
            }
        }

        if checks >= max_scan && chosen.is_none() {
            tracing::trace!("Frontier scan stopped after {} domains", checks);
        }

        let (priority, id) = chosen?;
        if self.levels.get(&priority).is_some_and(PriorityLevel::is_empty) {
            self.levels.remove(&priority);
        }
        self.selected.insert(id);
        Some(id)
    }

    /// `Pending -> Leased` for a task returned by [`next_eligible`](Self::next_eligible)
    pub fn mark_leased(
        &mut self,
        id: TaskId,
        worker_id: &str,
        proxy_address: &str,
        deadline: Instant,
    ) -> Result<Lease, DispatchError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(DispatchError::TaskNotFound(id))?;

        if !self.selected.contains(&id) {
            return Err(DispatchError::InvalidTransition {
                from: task.state,
                to: TaskState::Leased,
            });
        }
        task.transition(TaskState::Leased)?;
        self.selected.remove(&id);

        task.lease_owner = Some(worker_id.to_string());
        task.lease_proxy = Some(proxy_address.to_string());
        task.lease_deadline = Some(deadline);
        self.leases.insert((deadline, id));

        Ok(Lease {
            task_id: id,
            url: task.url.clone(),
            domain: task.domain.clone(),
            proxy_address: proxy_address.to_string(),
            worker_id: worker_id.to_string(),
            deadline,
            attempt: task.retry_count,
        })
    }

    /// `Leased -> Completed`
    pub fn complete(&mut self, id: TaskId, throttle: &mut DomainThrottle) -> Result<(), DispatchError> {
        let task = self.leased_task(id, TaskState::Completed)?;
        task.transition(TaskState::Completed)?;
        task.last_error = None;
        let deadline = task.clear_lease();
        let domain = task.domain.clone();

        self.forget_lease(deadline, id);
        throttle.release(&domain);
        Ok(())
    }

    /// Records a failed fetch of a leased task
    ///
    /// A retryable failure with retries left increments `retry_count`, lowers
    /// the task's priority by the retry penalty and sends it back to
    /// `Pending`, or to `FailedRetryable` when a retry delay is configured.
    /// Anything else dead-letters the task. The throttle slot is returned in
    /// every case.
    ///
    /// # Returns
    ///
    /// The state the task moved to.
    pub fn fail(
        &mut self,
        id: TaskId,
        retryable: bool,
        error: Option<String>,
        now: Instant,
        throttle: &mut DomainThrottle,
    ) -> Result<TaskState, DispatchError> {
        let (max_retries, penalty, delay) = (self.max_retries, self.retry_penalty, self.retry_delay);

        let task = self.leased_task(id, TaskState::Dead)?;
        let next = if retryable && task.retry_count < max_retries {
            if delay.is_zero() {
                TaskState::Pending
            } else {
                TaskState::FailedRetryable
            }
        } else {
            TaskState::Dead
        };
        task.transition(next)?;

        let deadline = task.clear_lease();
        task.last_error = error;
        if next != TaskState::Dead {
            task.retry_count += 1;
            task.priority = task.priority.saturating_add(penalty);
        }
        if next == TaskState::FailedRetryable {
            task.not_before = Some(now + delay);
        }
        let (domain, priority) = (task.domain.clone(), task.priority);

        self.forget_lease(deadline, id);
        throttle.release(&domain);

        match next {
            TaskState::Pending => self.level(priority).push_back(&domain, id),
            TaskState::FailedRetryable => {
                self.delayed.insert((now + delay, id));
            }
            _ => {}
        }
        Ok(next)
    }

    /// Puts a selected or leased task back at the front of its domain queue
    ///
    /// Used when the task is not at fault (no proxy available, proxy banned
    /// mid-fetch): no retry is consumed and the priority is unchanged.
    pub fn requeue(&mut self, id: TaskId, throttle: &mut DomainThrottle) -> Result<(), DispatchError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(DispatchError::TaskNotFound(id))?;

        let deadline = match task.state {
            TaskState::Leased => {
                task.transition(TaskState::Pending)?;
                task.clear_lease()
            }
            TaskState::Pending if self.selected.contains(&id) => None,
            from => {
                return Err(DispatchError::InvalidTransition {
                    from,
                    to: TaskState::Pending,
                })
            }
        };
        let (domain, priority) = (task.domain.clone(), task.priority);

        self.selected.remove(&id);
        self.forget_lease(deadline, id);
        throttle.release(&domain);
        self.level(priority).push_front(&domain, id);
        Ok(())
    }

    /// Dead-letters a task that has not reached a terminal state
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The task was cancelled
    /// * `Ok(false)` - The task was already terminal (no-op)
    pub fn cancel(&mut self, id: TaskId, throttle: &mut DomainThrottle) -> Result<bool, DispatchError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(DispatchError::TaskNotFound(id))?;

        let previous = task.state;
        if previous.is_terminal() {
            return Ok(false);
        }

        task.transition(TaskState::Dead)?;
        let deadline = task.clear_lease();
        let not_before = task.not_before.take();
        task.last_error = Some("cancelled".to_string());
        let (domain, priority) = (task.domain.clone(), task.priority);

        match previous {
            TaskState::Pending => {
                if self.selected.remove(&id) {
                    throttle.release(&domain);
                } else if let Some(level) = self.levels.get_mut(&priority) {
                    level.remove(&domain, id);
                    if level.is_empty() {
                        self.levels.remove(&priority);
                    }
                }
            }
            TaskState::Leased => {
                self.forget_lease(deadline, id);
                throttle.release(&domain);
            }
            TaskState::FailedRetryable => {
                if let Some(at) = not_before {
                    self.delayed.remove(&(at, id));
                }
            }
            TaskState::Completed | TaskState::Dead => {}
        }
        Ok(true)
    }

    /// Fails every lease whose deadline is before `now` as retryable
    ///
    /// The worker holding such a lease is presumed crashed or hung.
    pub fn reclaim_expired(&mut self, now: Instant, throttle: &mut DomainThrottle) -> Vec<ReclaimedLease> {
        let expired: Vec<(Instant, TaskId)> = self.leases.range(..(now, TaskId(0))).copied().collect();
        let mut reclaimed = Vec::with_capacity(expired.len());

        for (_, id) in expired {
            let Some(task) = self.tasks.get(&id) else {
                continue;
            };
            let worker_id = task.lease_owner.clone().unwrap_or_default();
            let proxy_address = task.lease_proxy.clone().unwrap_or_default();

            match self.fail(id, true, Some("lease expired".to_string()), now, throttle) {
                Ok(state) => reclaimed.push(ReclaimedLease {
                    task_id: id,
                    worker_id,
                    proxy_address,
                    state,
                }),
                Err(e) => tracing::error!("Failed to reclaim lease of task {}: {}", id, e),
            }
        }

        reclaimed
    }

    /// `FailedRetryable -> Pending` for every task whose retry time has come
    ///
    /// # Returns
    ///
    /// The number of tasks promoted.
    pub fn promote_due(&mut self, now: Instant) -> usize {
        let due: Vec<(Instant, TaskId)> = self
            .delayed
            .range(..=(now, TaskId(u64::MAX)))
            .copied()
            .collect();

        let mut promoted = 0;
        for entry in &due {
            self.delayed.remove(entry);
            let id = entry.1;
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            if let Err(e) = task.transition(TaskState::Pending) {
                tracing::error!("Cannot promote task {}: {}", id, e);
                continue;
            }
            task.not_before = None;
            let (domain, priority) = (task.domain.clone(), task.priority);
            self.level(priority).push_back(&domain, id);
            promoted += 1;
        }

        promoted
    }

    // ===== Queries =====

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of tasks waiting in the priority queues
    pub fn pending_len(&self) -> usize {
        self.levels.values().map(PriorityLevel::len).sum()
    }

    pub fn leased_len(&self) -> usize {
        self.leases.len()
    }

    /// Domains that have queued tasks (may repeat across priorities)
    pub fn pending_domains(&self) -> impl Iterator<Item = &str> {
        self.levels
            .values()
            .flat_map(|level| level.domains.iter().map(String::as_str))
    }

    /// Time until the earliest delayed retry becomes due
    pub fn next_retry_in(&self, now: Instant) -> Option<Duration> {
        self.delayed
            .first()
            .map(|(at, _)| at.saturating_duration_since(now))
    }

    pub fn count_by_state(&self) -> HashMap<TaskState, usize> {
        let mut counts = HashMap::new();
        for task in self.tasks.values() {
            *counts.entry(task.state).or_insert(0) += 1;
        }
        counts
    }

    /// Dead-lettered tasks, ordered by id
    pub fn dead_letters(&self) -> Vec<&Task> {
        let mut dead: Vec<&Task> = self
            .tasks
            .values()
            .filter(|task| task.state == TaskState::Dead)
            .collect();
        dead.sort_by_key(|task| task.id);
        dead
    }

    /// True when no task is pending, leased or waiting for a retry
    pub fn is_drained(&self) -> bool {
        self.levels.is_empty()
            && self.leases.is_empty()
            && self.delayed.is_empty()
            && self.selected.is_empty()
    }

    // ===== Internals =====

    fn level(&mut self, priority: u32) -> &mut PriorityLevel {
        self.levels.entry(priority).or_default()
    }

    fn leased_task(&mut self, id: TaskId, to: TaskState) -> Result<&mut Task, DispatchError> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(DispatchError::TaskNotFound(id))?;
        if task.state != TaskState::Leased {
            return Err(DispatchError::InvalidTransition {
                from: task.state,
                to,
            });
        }
        Ok(task)
    }

    fn forget_lease(&mut self, deadline: Option<Instant>, id: TaskId) {
        if let Some(deadline) = deadline {
            self.leases.remove(&(deadline, id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThrottleConfig;
    use crate::url::canonicalize;

    fn scheduler_config() -> SchedulerConfig {
        SchedulerConfig {
            max_retries: 2,
            retry_priority_penalty: 10,
            ..SchedulerConfig::default()
        }
    }

    fn throttle(max_concurrency: u32) -> DomainThrottle {
        DomainThrottle::new(ThrottleConfig {
            max_concurrency,
            min_interval_ms: 0,
            ..ThrottleConfig::default()
        })
    }

    fn frontier() -> Frontier {
        Frontier::new(&scheduler_config(), Arc::new(FingerprintStore::new()))
    }

    fn url(raw: &str) -> CanonicalUrl {
        canonicalize(raw).unwrap()
    }

    fn lease_next(
        frontier: &mut Frontier,
        throttle: &mut DomainThrottle,
        now: Instant,
    ) -> Option<Lease> {
        let id = frontier.next_eligible(throttle, now)?;
        Some(
            frontier
                .mark_leased(id, "w1", "http://p1:8080", now + Duration::from_secs(30))
                .unwrap(),
        )
    }

    #[test]
    fn test_enqueue_deduplicates() {
        let mut frontier = frontier();
        assert!(frontier.enqueue(url("https://example.com/a"), 0).is_some());
        assert!(frontier.enqueue(url("https://www.example.com/a/"), 0).is_none());
        assert_eq!(frontier.len(), 1);
        assert_eq!(frontier.pending_len(), 1);
    }

    #[test]
    fn test_priority_order() {
        let mut frontier = frontier();
        let mut throttle = throttle(10);
        let now = Instant::now();

        let low = frontier.enqueue(url("https://a.com/low"), 5).unwrap();
        let high = frontier.enqueue(url("https://b.com/high"), 1).unwrap();

        assert_eq!(frontier.next_eligible(&mut throttle, now), Some(high));
        assert_eq!(frontier.next_eligible(&mut throttle, now), Some(low));
        assert_eq!(frontier.next_eligible(&mut throttle, now), None);
    }

    #[test]
    fn test_round_robin_across_domains() {
        let mut frontier = frontier();
        let mut throttle = throttle(10);
        let now = Instant::now();

        for i in 0..3 {
            frontier.enqueue(url(&format!("https://busy.com/{}", i)), 0);
        }
        frontier.enqueue(url("https://quiet.com/only"), 0);

        let first = frontier.next_eligible(&mut throttle, now).unwrap();
        let second = frontier.next_eligible(&mut throttle, now).unwrap();
        assert_eq!(frontier.task(first).unwrap().domain, "busy.com");
        assert_eq!(frontier.task(second).unwrap().domain, "quiet.com");
    }

    #[test]
    fn test_throttled_domain_skipped() {
        let mut frontier = frontier();
        let mut throttle = throttle(1);
        let now = Instant::now();

        frontier.enqueue(url("https://a.com/1"), 0);
        frontier.enqueue(url("https://a.com/2"), 0);
        let other = frontier.enqueue(url("https://b.com/1"), 5).unwrap();

        let first = frontier.next_eligible(&mut throttle, now).unwrap();
        assert_eq!(frontier.task(first).unwrap().domain, "a.com");

        // a.com is at capacity, so the lower-priority b.com task goes next
        assert_eq!(frontier.next_eligible(&mut throttle, now), Some(other));
        assert_eq!(frontier.next_eligible(&mut throttle, now), None);
        assert_eq!(frontier.pending_len(), 1);
    }

    #[test]
    fn test_scan_is_bounded() {
        let config = SchedulerConfig {
            max_scan: 2,
            ..scheduler_config()
        };
        let mut frontier = Frontier::new(&config, Arc::new(FingerprintStore::new()));
        let mut throttle = throttle(1);
        let now = Instant::now();

        for domain in ["a.com", "b.com", "c.com"] {
            frontier.enqueue(url(&format!("https://{}/x", domain)), 0);
            frontier.enqueue(url(&format!("https://{}/y", domain)), 0);
            // Fill the domain's only slot
            let id = frontier.next_eligible(&mut throttle, now).unwrap();
            frontier.mark_leased(id, "w", "p", now + Duration::from_secs(30)).unwrap();
        }

        let denied_before: u64 = throttle.domains().map(|d| d.throttled).sum();
        assert_eq!(frontier.next_eligible(&mut throttle, now), None);
        let denied_after: u64 = throttle.domains().map(|d| d.throttled).sum();
        assert_eq!(denied_after - denied_before, 2);
    }

    #[test]
    fn test_complete_releases_slot() {
        let mut frontier = frontier();
        let mut throttle = throttle(1);
        let now = Instant::now();
        frontier.enqueue(url("https://a.com/1"), 0);

        let lease = lease_next(&mut frontier, &mut throttle, now).unwrap();
        assert_eq!(throttle.get("a.com").unwrap().active_count, 1);

        frontier.complete(lease.task_id, &mut throttle).unwrap();
        assert_eq!(throttle.get("a.com").unwrap().active_count, 0);
        assert_eq!(
            frontier.task(lease.task_id).unwrap().state,
            TaskState::Completed
        );
        assert!(frontier.is_drained());

        // Completing twice is an invalid transition
        assert!(matches!(
            frontier.complete(lease.task_id, &mut throttle),
            Err(DispatchError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_retry_then_dead() {
        let mut frontier = frontier();
        let mut throttle = throttle(1);
        let now = Instant::now();
        let id = frontier.enqueue(url("https://a.com/flaky"), 0).unwrap();

        for expected in 1..=2 {
            let lease = lease_next(&mut frontier, &mut throttle, now).unwrap();
            let state = frontier
                .fail(lease.task_id, true, Some("timeout".into()), now, &mut throttle)
                .unwrap();
            assert_eq!(state, TaskState::Pending);
            let task = frontier.task(id).unwrap();
            assert_eq!(task.retry_count, expected);
            assert_eq!(task.priority, 10 * expected);
        }

        let lease = lease_next(&mut frontier, &mut throttle, now).unwrap();
        let state = frontier
            .fail(lease.task_id, true, None, now, &mut throttle)
            .unwrap();
        assert_eq!(state, TaskState::Dead);
        assert_eq!(frontier.task(id).unwrap().retry_count, 2);
        assert_eq!(throttle.get("a.com").unwrap().active_count, 0);
        assert!(lease_next(&mut frontier, &mut throttle, now).is_none());
        assert_eq!(frontier.dead_letters().len(), 1);
    }

    #[test]
    fn test_fatal_failure_dead_letters_immediately() {
        let mut frontier = frontier();
        let mut throttle = throttle(1);
        let now = Instant::now();
        frontier.enqueue(url("https://a.com/gone"), 0);

        let lease = lease_next(&mut frontier, &mut throttle, now).unwrap();
        let state = frontier
            .fail(lease.task_id, false, Some("404".into()), now, &mut throttle)
            .unwrap();
        assert_eq!(state, TaskState::Dead);
        assert_eq!(frontier.task(lease.task_id).unwrap().retry_count, 0);
    }

    #[test]
    fn test_retry_delay_uses_failed_retryable() {
        let config = SchedulerConfig {
            retry_delay_ms: 5_000,
            ..scheduler_config()
        };
        let mut frontier = Frontier::new(&config, Arc::new(FingerprintStore::new()));
        let mut throttle = throttle(1);
        let now = Instant::now();
        let id = frontier.enqueue(url("https://a.com/later"), 0).unwrap();

        let lease = lease_next(&mut frontier, &mut throttle, now).unwrap();
        let state = frontier
            .fail(lease.task_id, true, None, now, &mut throttle)
            .unwrap();
        assert_eq!(state, TaskState::FailedRetryable);
        assert_eq!(frontier.next_retry_in(now), Some(Duration::from_secs(5)));
        assert!(!frontier.is_drained());

        assert_eq!(frontier.promote_due(now + Duration::from_secs(4)), 0);
        assert!(frontier.next_eligible(&mut throttle, now).is_none());

        assert_eq!(frontier.promote_due(now + Duration::from_secs(5)), 1);
        assert_eq!(frontier.task(id).unwrap().state, TaskState::Pending);
        assert_eq!(frontier.next_eligible(&mut throttle, now), Some(id));
    }

    #[test]
    fn test_reclaim_expired() {
        let mut frontier = frontier();
        let mut throttle = throttle(1);
        let now = Instant::now();
        let id = frontier.enqueue(url("https://a.com/hung"), 0).unwrap();
        let lease = lease_next(&mut frontier, &mut throttle, now).unwrap();

        // Deadline not yet passed
        assert!(frontier
            .reclaim_expired(lease.deadline, &mut throttle)
            .is_empty());

        let reclaimed = frontier.reclaim_expired(lease.deadline + Duration::from_millis(1), &mut throttle);
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].task_id, id);
        assert_eq!(reclaimed[0].worker_id, "w1");
        assert_eq!(reclaimed[0].state, TaskState::Pending);

        let task = frontier.task(id).unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.retry_count, 1);
        assert!(task.lease_deadline.is_none());
        assert_eq!(throttle.get("a.com").unwrap().active_count, 0);
        assert_eq!(frontier.leased_len(), 0);
    }

    #[test]
    fn test_requeue_keeps_retry_and_position() {
        let mut frontier = frontier();
        let mut throttle = throttle(1);
        let now = Instant::now();
        let first = frontier.enqueue(url("https://a.com/1"), 0).unwrap();
        frontier.enqueue(url("https://a.com/2"), 0);

        let selected = frontier.next_eligible(&mut throttle, now).unwrap();
        assert_eq!(selected, first);
        frontier.requeue(selected, &mut throttle).unwrap();
        assert_eq!(throttle.get("a.com").unwrap().active_count, 0);

        // Back at the front of its queue, no retry consumed
        let lease = lease_next(&mut frontier, &mut throttle, now).unwrap();
        assert_eq!(lease.task_id, first);
        frontier.requeue(lease.task_id, &mut throttle).unwrap();
        let task = frontier.task(first).unwrap();
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.priority, 0);
        assert_eq!(task.state, TaskState::Pending);

        // A queued pending task cannot be requeued
        assert!(frontier.requeue(first, &mut throttle).is_err());
    }

    #[test]
    fn test_mark_leased_requires_selection() {
        let mut frontier = frontier();
        let id = frontier.enqueue(url("https://a.com/1"), 0).unwrap();
        let result = frontier.mark_leased(id, "w1", "p", Instant::now());
        assert!(matches!(
            result,
            Err(DispatchError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_cancel_each_state() {
        let mut frontier = frontier();
        let mut throttle = throttle(5);
        let now = Instant::now();

        let pending = frontier.enqueue(url("https://a.com/pending"), 0).unwrap();
        assert!(frontier.cancel(pending, &mut throttle).unwrap());
        assert_eq!(frontier.task(pending).unwrap().state, TaskState::Dead);
        assert_eq!(frontier.pending_len(), 0);
        assert!(frontier.next_eligible(&mut throttle, now).is_none());

        frontier.enqueue(url("https://a.com/leased"), 0);
        let lease = lease_next(&mut frontier, &mut throttle, now).unwrap();
        assert!(frontier.cancel(lease.task_id, &mut throttle).unwrap());
        assert_eq!(throttle.get("a.com").unwrap().active_count, 0);
        assert_eq!(frontier.leased_len(), 0);

        // Idempotent on terminal tasks
        assert!(!frontier.cancel(lease.task_id, &mut throttle).unwrap());
        assert!(matches!(
            frontier.cancel(TaskId(999), &mut throttle),
            Err(DispatchError::TaskNotFound(_))
        ));
        assert!(frontier.is_drained());
    }

    #[test]
    fn test_transition_follows_state_table() {
        let mut frontier = frontier();
        let id = frontier.enqueue(url("https://a.com/1"), 0).unwrap();
        let mut task = frontier.task(id).unwrap().clone();

        assert!(matches!(
            task.transition(TaskState::Completed),
            Err(DispatchError::InvalidTransition {
                from: TaskState::Pending,
                to: TaskState::Completed,
            })
        ));
        assert_eq!(task.state, TaskState::Pending);

        task.transition(TaskState::Leased).unwrap();
        task.transition(TaskState::Completed).unwrap();
        assert!(task.transition(TaskState::Pending).is_err());
        assert_eq!(task.state, TaskState::Completed);
    }

    #[test]
    fn test_check_lease() {
        let mut frontier = frontier();
        let mut throttle = throttle(1);
        let now = Instant::now();
        frontier.enqueue(url("https://a.com/1"), 0);
        let lease = lease_next(&mut frontier, &mut throttle, now).unwrap();
        let task = frontier.task(lease.task_id).unwrap();

        assert_eq!(task.check_lease(&lease), Ok(()));

        let mut other = lease.clone();
        other.worker_id = "w2".to_string();
        assert_eq!(task.check_lease(&other), Err(IgnoreReason::NotLeaseHolder));

        let mut other = lease.clone();
        other.proxy_address = "http://elsewhere:8080".to_string();
        assert_eq!(task.check_lease(&other), Err(IgnoreReason::LeaseMismatch));

        let mut other = lease.clone();
        other.domain = "b.com".to_string();
        assert_eq!(task.check_lease(&other), Err(IgnoreReason::LeaseMismatch));

        frontier.reclaim_expired(lease.deadline + Duration::from_secs(1), &mut throttle);
        let task = frontier.task(lease.task_id).unwrap();
        assert_eq!(task.check_lease(&lease), Err(IgnoreReason::LeaseExpired));
    }

    #[test]
    fn test_records_restore_leased_as_pending() {
        let mut frontier = frontier();
        let mut throttle = throttle(5);
        let now = Instant::now();
        frontier.enqueue(url("https://a.com/1"), 0);
        frontier.enqueue(url("https://a.com/2"), 3);
        let lease = lease_next(&mut frontier, &mut throttle, now).unwrap();

        let records = frontier.to_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].state, TaskState::Leased);

        let store = Arc::new(FingerprintStore::new());
        let restored = Frontier::from_records(
            &scheduler_config(),
            Arc::clone(&store),
            records,
            frontier.next_id(),
        );
        let task = restored.task(lease.task_id).unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.retry_count, 0);
        assert_eq!(restored.pending_len(), 2);
        assert_eq!(restored.next_id(), 3);
        assert_eq!(store.len(), 2);
    }
}
