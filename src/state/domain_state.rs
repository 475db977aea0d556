use std::time::{Duration, Instant};

/// Smallest spacing introduced when a domain with no interval is tightened
const TIGHTEN_FLOOR: Duration = Duration::from_millis(250);

/// Tracks the politeness state of a domain during crawling
///
/// `max_concurrency` is the effective limit enforced by
/// [`can_dispatch`](Self::can_dispatch). It follows `target_concurrency`
/// but never drops below `active_count`, so lowering the target while leases
/// are outstanding simply blocks new dispatches until releases drain the
/// excess.
#[derive(Debug, Clone)]
pub struct DomainState {
    pub domain: String,

    /// Leases currently outstanding for this domain
    pub active_count: u32,

    /// Effective concurrency limit
    pub max_concurrency: u32,

    /// Limit requested by configuration or runtime feedback
    pub target_concurrency: u32,

    /// Minimum time between two dispatches
    pub min_interval: Duration,

    /// When the last task of this domain was dispatched
    pub last_dispatch_at: Option<Instant>,

    /// Configured values; runtime relaxation never goes beyond them
    pub base_max_concurrency: u32,
    pub base_min_interval: Duration,

    /// Number of dispatch attempts denied by this domain's limits
    pub throttled: u64,

    /// Number of successful dispatches
    pub dispatched: u64,
}

impl DomainState {
    /// Creates a new DomainState with the given limits
    pub fn new(domain: impl Into<String>, max_concurrency: u32, min_interval: Duration) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            domain: domain.into(),
            active_count: 0,
            max_concurrency,
            target_concurrency: max_concurrency,
            min_interval,
            last_dispatch_at: None,
            base_max_concurrency: max_concurrency,
            base_min_interval: min_interval,
            throttled: 0,
            dispatched: 0,
        }
    }

    /// Checks if a task of this domain may be dispatched now
    ///
    /// Both conditions must hold:
    /// - a concurrency slot is free
    /// - `min_interval` has elapsed since the previous dispatch
    pub fn can_dispatch(&self, now: Instant) -> bool {
        !self.at_capacity() && self.time_until_ready(now).is_none()
    }

    /// Returns true when every concurrency slot is taken
    pub fn at_capacity(&self) -> bool {
        self.active_count >= self.max_concurrency
    }

    /// Records a dispatch; callers must have checked [`can_dispatch`](Self::can_dispatch)
    pub fn record_dispatch(&mut self, now: Instant) {
        self.active_count += 1;
        self.dispatched += 1;
        self.last_dispatch_at = Some(now);
    }

    /// Records a denied dispatch attempt
    pub fn record_throttled(&mut self) {
        self.throttled += 1;
    }

    /// Returns a concurrency slot
    ///
    /// Returns false when there was no outstanding dispatch to release.
    pub fn release(&mut self) -> bool {
        if self.active_count == 0 {
            return false;
        }
        self.active_count -= 1;
        self.max_concurrency = self.target_concurrency.max(self.active_count);
        true
    }

    /// Time until the politeness interval allows another dispatch
    ///
    /// Returns None if the interval has already elapsed. Concurrency is not
    /// considered; see [`at_capacity`](Self::at_capacity).
    pub fn time_until_ready(&self, now: Instant) -> Option<Duration> {
        let last = self.last_dispatch_at?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed < self.min_interval {
            Some(self.min_interval - elapsed)
        } else {
            None
        }
    }

    /// Replaces the configured limits (admin action)
    pub fn configure(&mut self, max_concurrency: u32, min_interval: Duration) {
        let max_concurrency = max_concurrency.max(1);
        self.base_max_concurrency = max_concurrency;
        self.base_min_interval = min_interval;
        self.min_interval = min_interval;
        self.set_target(max_concurrency);
    }

    /// Scales the limits by `factor`
    ///
    /// `factor < 1` tightens: fewer concurrent leases and a longer interval,
    /// capped at `interval_ceiling`. `factor > 1` relaxes back toward the
    /// configured values, never past them.
    pub fn adjust(&mut self, factor: f64, interval_ceiling: Duration) {
        if !factor.is_finite() || factor <= 0.0 || factor == 1.0 {
            return;
        }
        let factor = factor.clamp(0.01, 100.0);

        let scaled = self.target_concurrency as f64 * factor;
        let target = if factor < 1.0 {
            scaled.floor()
        } else {
            scaled.ceil()
        };
        let target = (target as u32).clamp(1, self.base_max_concurrency);

        let mut interval = Duration::try_from_secs_f64(self.min_interval.as_secs_f64() / factor)
            .unwrap_or(Duration::MAX);
        if factor < 1.0 {
            interval = interval.max(TIGHTEN_FLOOR).min(interval_ceiling.max(self.base_min_interval));
        } else {
            interval = interval.max(self.base_min_interval);
        }

        self.min_interval = interval;
        self.set_target(target);
    }

    fn set_target(&mut self, target: u32) {
        self.target_concurrency = target;
        self.max_concurrency = target.max(self.active_count);
    }
}
