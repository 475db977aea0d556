//! Per-domain politeness gate
//!
//! The throttle owns one [`DomainState`] per domain, created lazily the first
//! time a domain is seen. Limits come from the `[throttle]` section of the
//! configuration, with `[[throttle.domain]]` entries overriding the defaults
//! for individual domains.

use crate::config::{DomainOverride, ThrottleConfig};
use crate::state::DomainState;
use crate::storage::DomainRecord;
use crate::url::domain_key;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Wait suggested when no domain reports a politeness delay
const DEFAULT_WAIT: Duration = Duration::from_millis(100);

/// Margin added so the domain is ready when the caller comes back
const WAIT_BUFFER: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct DomainThrottle {
    config: ThrottleConfig,
    overrides: HashMap<String, DomainOverride>,
    domains: HashMap<String, DomainState>,
}

impl DomainThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        let overrides = config
            .domain
            .iter()
            .map(|entry| (domain_key(&entry.domain), entry.clone()))
            .collect();
        Self {
            config,
            overrides,
            domains: HashMap::new(),
        }
    }

    /// Rebuilds the throttle from persisted domain records
    ///
    /// Restored domains start with no outstanding leases and no recorded
    /// dispatch time. Domains with a `[[throttle.domain]]` entry take their
    /// base limits from the current configuration; a tightening still in
    /// effect is kept within those limits.
    pub fn from_records(config: ThrottleConfig, records: Vec<DomainRecord>) -> Self {
        let mut throttle = Self::new(config);
        for record in records {
            let recorded_interval = Duration::from_millis(record.min_interval_ms);
            let (base_max, base_interval) = if throttle.overrides.contains_key(&record.domain) {
                throttle.limits_for(&record.domain)
            } else {
                (
                    record.base_max_concurrency,
                    Duration::from_millis(record.base_min_interval_ms),
                )
            };

            let mut state = DomainState::new(record.domain.clone(), base_max, base_interval);
            if record.target_concurrency < record.base_max_concurrency {
                state.target_concurrency = record.target_concurrency.clamp(1, state.base_max_concurrency);
                state.max_concurrency = state.target_concurrency;
            }
            if record.min_interval_ms > record.base_min_interval_ms {
                state.min_interval = recorded_interval.max(base_interval);
            }
            state.throttled = record.throttled;
            state.dispatched = record.dispatched;
            throttle.domains.insert(record.domain, state);
        }
        throttle
    }

    pub fn to_records(&self) -> Vec<DomainRecord> {
        let mut records: Vec<DomainRecord> = self
            .domains
            .values()
            .map(|state| DomainRecord {
                domain: state.domain.clone(),
                target_concurrency: state.target_concurrency,
                min_interval_ms: state.min_interval.as_millis() as u64,
                base_max_concurrency: state.base_max_concurrency,
                base_min_interval_ms: state.base_min_interval.as_millis() as u64,
                throttled: state.throttled,
                dispatched: state.dispatched,
            })
            .collect();
        records.sort_by(|a, b| a.domain.cmp(&b.domain));
        records
    }

    /// Takes a dispatch slot for `domain` if both politeness conditions hold
    ///
    /// On denial nothing changes except the domain's denial counter.
    pub fn try_dispatch(&mut self, domain: &str, now: Instant) -> bool {
        let state = self.state_mut(domain);
        if state.can_dispatch(now) {
            state.record_dispatch(now);
            tracing::trace!(
                "Dispatch to {} allowed ({}/{})",
                domain,
                state.active_count,
                state.max_concurrency
            );
            true
        } else {
            state.record_throttled();
            tracing::trace!("Dispatch to {} denied", domain);
            false
        }
    }

    /// Returns the slot taken by a successful [`try_dispatch`](Self::try_dispatch)
    pub fn release(&mut self, domain: &str) {
        let released = self
            .domains
            .get_mut(domain)
            .map(|state| state.release())
            .unwrap_or(false);

        if !released {
            tracing::warn!("Unmatched throttle release for {}", domain);
        }
    }

    /// Scales the domain's limits; see [`DomainState::adjust`]
    pub fn adjust(&mut self, domain: &str, factor: f64) {
        let ceiling = self.config.max_min_interval();
        let state = self.state_mut(&domain_key(domain));
        state.adjust(factor, ceiling);
        tracing::info!(
            "Throttle for {} adjusted by {}: concurrency {}, interval {:?}",
            domain,
            factor,
            state.target_concurrency,
            state.min_interval
        );
    }

    /// Replaces the configured limits of a domain
    ///
    /// The interval is capped at `max-min-interval-ms`.
    pub fn configure(&mut self, domain: &str, max_concurrency: u32, min_interval: Duration) {
        let min_interval = min_interval.min(self.config.max_min_interval());
        self.state_mut(&domain_key(domain)).configure(max_concurrency, min_interval);
        tracing::info!(
            "Throttle for {} configured: concurrency {}, interval {:?}",
            domain,
            max_concurrency,
            min_interval
        );
    }

    /// Time until the politeness interval of `domain` elapses
    pub fn time_until_ready(&self, domain: &str, now: Instant) -> Option<Duration> {
        self.domains.get(domain)?.time_until_ready(now)
    }

    /// Suggested wait before asking again for work on any of `domains`
    ///
    /// Domains waiting on their interval yield the shortest remaining time.
    /// Domains at capacity contribute nothing, since a release may arrive at
    /// any moment.
    pub fn minimum_wait_time<'a>(
        &self,
        domains: impl IntoIterator<Item = &'a str>,
        now: Instant,
    ) -> Duration {
        let mut min_wait: Option<Duration> = None;

        for domain in domains {
            let Some(state) = self.domains.get(domain) else {
                return WAIT_BUFFER;
            };
            if state.at_capacity() {
                continue;
            }
            match state.time_until_ready(now) {
                Some(wait) => min_wait = Some(min_wait.map_or(wait, |m| m.min(wait))),
                None => return WAIT_BUFFER,
            }
        }

        min_wait.unwrap_or(DEFAULT_WAIT) + WAIT_BUFFER
    }

    pub fn get(&self, domain: &str) -> Option<&DomainState> {
        self.domains.get(domain)
    }

    pub fn domains(&self) -> impl Iterator<Item = &DomainState> {
        self.domains.values()
    }

    fn state_mut(&mut self, domain: &str) -> &mut DomainState {
        let (max_concurrency, min_interval) = self.limits_for(domain);
        self.domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(domain, max_concurrency, min_interval))
    }

    fn limits_for(&self, domain: &str) -> (u32, Duration) {
        let entry = self.overrides.get(domain);
        let max_concurrency = entry
            .and_then(|e| e.max_concurrency)
            .unwrap_or(self.config.max_concurrency);
        let min_interval = entry
            .and_then(|e| e.min_interval_ms)
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.min_interval());
        (max_concurrency, min_interval)
    }
}
