//! Proxy pool: health scoring, cooldown and assignment of egress proxies

use crate::config::ProxyPoolConfig;
use crate::dispatch::backoff;
use crate::proxy::selection::select_weighted;
use crate::proxy::Outcome;
use crate::state::ProxyState;
use crate::storage::ProxyRecord;
use crate::DispatchError;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// An egress proxy and its health bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct Proxy {
    pub address: String,
    pub state: ProxyState,

    /// Selection weight, bounded by the pool's min/max score
    pub score: f64,

    pub consecutive_failures: u32,

    /// Set while in cooldown
    pub cooldown_until: Option<Instant>,

    pub total_success: u64,
    pub total_failure: u64,

    pub added_at: DateTime<Utc>,
    pub last_used: Option<Instant>,
}

impl Proxy {
    fn new(address: String, score: f64) -> Self {
        Self {
            address,
            state: ProxyState::Active,
            score,
            consecutive_failures: 0,
            cooldown_until: None,
            total_success: 0,
            total_failure: 0,
            added_at: Utc::now(),
            last_used: None,
        }
    }

    /// Total number of reported outcomes
    pub fn total(&self) -> u64 {
        self.total_success + self.total_failure
    }

    /// Fraction of successful outcomes; None before the first report
    pub fn success_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.total_success as f64 / total as f64),
        }
    }
}

/// Proxy counts per score band, relative to the pool's maximum score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreDistribution {
    /// score >= 70% of max
    pub high: usize,
    /// 40% <= score < 70% of max
    pub medium: usize,
    pub low: usize,
}

impl ScoreDistribution {
    pub fn from_scores(scores: impl IntoIterator<Item = f64>, max_score: f64) -> Self {
        let mut distribution = Self::default();
        for score in scores {
            if score >= 0.7 * max_score {
                distribution.high += 1;
            } else if score >= 0.4 * max_score {
                distribution.medium += 1;
            } else {
                distribution.low += 1;
            }
        }
        distribution
    }
}

/// The shared pool of egress proxies
///
/// Proxies are keyed by address in a `BTreeMap` so that eligibility
/// snapshots, and therefore seeded selections, are deterministic.
#[derive(Debug)]
pub struct ProxyPool {
    config: ProxyPoolConfig,
    proxies: BTreeMap<String, Proxy>,

    /// domain -> proxy address -> excluded until
    exclusions: HashMap<String, HashMap<String, Instant>>,
}

impl ProxyPool {
    /// Creates a pool holding the proxies listed in the configuration
    pub fn new(config: ProxyPoolConfig) -> Self {
        let mut pool = Self {
            proxies: BTreeMap::new(),
            exclusions: HashMap::new(),
            config,
        };
        for address in pool.config.proxies.clone() {
            if pool.add(&address).is_err() {
                tracing::warn!("Ignoring duplicate proxy {} in configuration", address);
            }
        }
        pool
    }

    /// Rebuilds a pool from persisted records
    ///
    /// Remaining cooldowns are re-anchored at `now`.
    pub fn from_records(config: ProxyPoolConfig, records: Vec<ProxyRecord>, now: Instant) -> Self {
        let mut pool = Self {
            proxies: BTreeMap::new(),
            exclusions: HashMap::new(),
            config,
        };
        for record in records {
            let cooldown_until = match record.state {
                ProxyState::Cooldown => Some(
                    now + Duration::from_millis(record.cooldown_remaining_ms.unwrap_or(0)),
                ),
                _ => None,
            };
            let proxy = Proxy {
                address: record.address.clone(),
                state: record.state,
                score: record
                    .score
                    .clamp(pool.config.min_score, pool.config.max_score),
                consecutive_failures: record.consecutive_failures,
                cooldown_until,
                total_success: record.total_success,
                total_failure: record.total_failure,
                added_at: record.added_at,
                last_used: None,
            };
            pool.proxies.insert(record.address, proxy);
        }
        pool
    }

    /// Persistable view of every proxy
    pub fn to_records(&self, now: Instant) -> Vec<ProxyRecord> {
        self.proxies
            .values()
            .map(|proxy| ProxyRecord {
                address: proxy.address.clone(),
                state: proxy.state,
                score: proxy.score,
                consecutive_failures: proxy.consecutive_failures,
                cooldown_remaining_ms: proxy
                    .cooldown_until
                    .map(|until| until.saturating_duration_since(now).as_millis() as u64),
                total_success: proxy.total_success,
                total_failure: proxy.total_failure,
                added_at: proxy.added_at,
            })
            .collect()
    }

    pub fn config(&self) -> &ProxyPoolConfig {
        &self.config
    }

    // ===== Admin =====

    /// Registers a new proxy in the `Active` state
    pub fn add(&mut self, address: &str) -> Result<(), DispatchError> {
        if self.proxies.contains_key(address) {
            return Err(DispatchError::DuplicateProxy(address.to_string()));
        }
        self.proxies.insert(
            address.to_string(),
            Proxy::new(address.to_string(), self.config.initial_score),
        );
        tracing::info!("Proxy {} added to pool", address);
        Ok(())
    }

    /// Removes a proxy; leases already holding it are unaffected
    pub fn remove(&mut self, address: &str) -> Result<Proxy, DispatchError> {
        let proxy = self
            .proxies
            .remove(address)
            .ok_or_else(|| DispatchError::ProxyNotFound(address.to_string()))?;
        self.drop_exclusions(address);
        tracing::info!("Proxy {} removed from pool", address);
        Ok(proxy)
    }

    /// Bans a proxy until [`reset`](Self::reset)
    pub fn ban(&mut self, address: &str) -> Result<(), DispatchError> {
        let proxy = self
            .proxies
            .get_mut(address)
            .ok_or_else(|| DispatchError::ProxyNotFound(address.to_string()))?;
        proxy.state = ProxyState::Banned;
        proxy.cooldown_until = None;
        tracing::warn!("Proxy {} banned by administrator", address);
        Ok(())
    }

    /// Returns a proxy to a fresh `Active` state
    pub fn reset(&mut self, address: &str) -> Result<(), DispatchError> {
        let initial_score = self.config.initial_score;
        let proxy = self
            .proxies
            .get_mut(address)
            .ok_or_else(|| DispatchError::ProxyNotFound(address.to_string()))?;
        proxy.state = ProxyState::Active;
        proxy.score = initial_score;
        proxy.consecutive_failures = 0;
        proxy.cooldown_until = None;
        self.drop_exclusions(address);
        tracing::info!("Proxy {} reset to active", address);
        Ok(())
    }

    // ===== Assignment =====

    /// Snapshot of proxies eligible for `domain` as `(address, score)` pairs
    pub fn eligible(&self, domain: &str, now: Instant) -> Vec<(&str, f64)> {
        let excluded = self.exclusions.get(domain);
        self.proxies
            .values()
            .filter(|proxy| proxy.state.is_assignable())
            .filter(|proxy| {
                excluded
                    .and_then(|m| m.get(&proxy.address))
                    .map_or(true, |until| *until <= now)
            })
            .map(|proxy| (proxy.address.as_str(), proxy.score))
            .collect()
    }

    /// Returns true if at least one proxy is `Active`
    pub fn has_assignable(&self) -> bool {
        self.proxies.values().any(|proxy| proxy.state.is_assignable())
    }

    /// Picks an eligible proxy for `domain`, weighted by score
    ///
    /// Returns None when no proxy is eligible. That is backpressure, not an
    /// error: the caller should retry later.
    pub fn acquire<R: Rng + ?Sized>(
        &mut self,
        domain: &str,
        now: Instant,
        rng: &mut R,
    ) -> Option<Proxy> {
        let address = {
            let candidates = self.eligible(domain, now);
            let index = select_weighted(&candidates, rng)?;
            candidates[index].0.to_string()
        };

        let proxy = self.proxies.get_mut(&address)?;
        proxy.last_used = Some(now);
        tracing::trace!("Proxy {} acquired for {}", address, domain);
        Some(proxy.clone())
    }

    // ===== Health =====

    /// Applies a fetch outcome to a proxy's health
    ///
    /// Returns the proxy's resulting state, or None if the proxy is no
    /// longer in the pool (removed while a lease was in flight).
    pub fn report(&mut self, address: &str, outcome: Outcome, now: Instant) -> Option<ProxyState> {
        let config = &self.config;
        let Some(proxy) = self.proxies.get_mut(address) else {
            tracing::debug!("Outcome for unknown proxy {} ignored", address);
            return None;
        };

        match outcome {
            Outcome::Success => {
                proxy.total_success += 1;
                proxy.consecutive_failures = 0;
                proxy.score = (proxy.score + config.success_reward).min(config.max_score);
            }
            Outcome::TransientFailure => {
                proxy.total_failure += 1;
                proxy.consecutive_failures += 1;
                proxy.score = (proxy.score - config.failure_penalty).max(config.min_score);

                if proxy.state != ProxyState::Banned
                    && proxy.consecutive_failures >= config.cooldown_threshold
                {
                    let delay = backoff(
                        config.cooldown_base(),
                        proxy.consecutive_failures - config.cooldown_threshold,
                        config.cooldown_max(),
                    );
                    let until = now + delay;
                    proxy.cooldown_until = Some(proxy.cooldown_until.map_or(until, |u| u.max(until)));
                    if proxy.state == ProxyState::Active {
                        tracing::warn!(
                            "Proxy {} cooling down for {:?} after {} consecutive failures",
                            address,
                            delay,
                            proxy.consecutive_failures
                        );
                    }
                    proxy.state = ProxyState::Cooldown;
                }
            }
            Outcome::FatalFailure => {
                proxy.total_failure += 1;
                proxy.score = config.min_score;
                proxy.cooldown_until = None;
                if proxy.state != ProxyState::Banned {
                    tracing::warn!("Proxy {} banned after fatal failure", address);
                }
                proxy.state = ProxyState::Banned;
            }
        }

        Some(proxy.state)
    }

    /// Keeps `address` away from `domain` until `until`
    pub fn exclude(&mut self, address: &str, domain: &str, until: Instant) {
        if !self.proxies.contains_key(address) {
            return;
        }
        let entry = self
            .exclusions
            .entry(domain.to_string())
            .or_default()
            .entry(address.to_string())
            .or_insert(until);
        *entry = (*entry).max(until);
        tracing::debug!("Proxy {} excluded for {}", address, domain);
    }

    pub fn is_excluded(&self, address: &str, domain: &str, now: Instant) -> bool {
        self.exclusions
            .get(domain)
            .and_then(|m| m.get(address))
            .is_some_and(|until| *until > now)
    }

    /// Returns cooled-down proxies to service and forgets expired exclusions
    ///
    /// Returns the number of proxies restored to `Active`.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let mut restored = 0;
        for proxy in self.proxies.values_mut() {
            if proxy.state == ProxyState::Cooldown
                && proxy.cooldown_until.map_or(true, |until| now >= until)
            {
                proxy.state = ProxyState::Active;
                proxy.cooldown_until = None;
                restored += 1;
                tracing::info!("Proxy {} back in service after cooldown", proxy.address);
            }
        }

        self.exclusions.retain(|_, by_proxy| {
            by_proxy.retain(|_, until| *until > now);
            !by_proxy.is_empty()
        });

        restored
    }

    fn drop_exclusions(&mut self, address: &str) {
        self.exclusions.retain(|_, by_proxy| {
            by_proxy.remove(address);
            !by_proxy.is_empty()
        });
    }

    // ===== Queries =====

    pub fn get(&self, address: &str) -> Option<&Proxy> {
        self.proxies.get(address)
    }

    pub fn proxies(&self) -> impl Iterator<Item = &Proxy> {
        self.proxies.values()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// The `n` best non-banned proxies, highest score first
    pub fn top(&self, n: usize) -> Vec<&Proxy> {
        let mut proxies: Vec<&Proxy> = self
            .proxies
            .values()
            .filter(|proxy| proxy.state != ProxyState::Banned)
            .collect();
        proxies.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.address.cmp(&b.address)));
        proxies.truncate(n);
        proxies
    }

    pub fn count_by_state(&self) -> HashMap<ProxyState, usize> {
        let mut counts = HashMap::new();
        for proxy in self.proxies.values() {
            *counts.entry(proxy.state).or_insert(0) += 1;
        }
        counts
    }

    pub fn score_distribution(&self) -> ScoreDistribution {
        ScoreDistribution::from_scores(
            self.proxies.values().map(|proxy| proxy.score),
            self.config.max_score,
        )
    }

    /// Time until the earliest cooldown ends
    pub fn time_until_recovery(&self, now: Instant) -> Option<Duration> {
        self.proxies
            .values()
            .filter(|proxy| proxy.state == ProxyState::Cooldown)
            .filter_map(|proxy| proxy.cooldown_until)
            .filter(|until| *until > now)
            .min()
            .map(|until| until - now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn create_test_config() -> ProxyPoolConfig {
        ProxyPoolConfig {
            cooldown_threshold: 5,
            cooldown_base_ms: 30_000,
            cooldown_max_ms: 600_000,
            proxies: vec!["http://p1:8080".to_string(), "http://p2:8080".to_string()],
            ..ProxyPoolConfig::default()
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(17)
    }

    #[test]
    fn test_new_pool_registers_configured_proxies() {
        let pool = ProxyPool::new(create_test_config());
        assert_eq!(pool.len(), 2);
        let p1 = pool.get("http://p1:8080").unwrap();
        assert_eq!(p1.state, ProxyState::Active);
        assert_eq!(p1.score, 5.0);
        assert_eq!(p1.success_rate(), None);
    }

    #[test]
    fn test_acquire_empty_pool() {
        let mut pool = ProxyPool::new(ProxyPoolConfig::default());
        assert!(pool.acquire("example.com", Instant::now(), &mut rng()).is_none());
    }

    #[test]
    fn test_success_raises_score_with_cap() {
        let mut pool = ProxyPool::new(create_test_config());
        let now = Instant::now();
        for _ in 0..10 {
            pool.report("http://p1:8080", Outcome::Success, now);
        }
        let p1 = pool.get("http://p1:8080").unwrap();
        assert_eq!(p1.score, 10.0);
        assert_eq!(p1.total_success, 10);
        assert_eq!(p1.success_rate(), Some(1.0));
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let mut pool = ProxyPool::new(create_test_config());
        let now = Instant::now();
        for _ in 0..4 {
            pool.report("http://p1:8080", Outcome::TransientFailure, now);
        }
        pool.report("http://p1:8080", Outcome::Success, now);

        let p1 = pool.get("http://p1:8080").unwrap();
        assert_eq!(p1.consecutive_failures, 0);
        assert_eq!(p1.total_failure, 4);
        assert_eq!(p1.state, ProxyState::Active);
    }

    #[test]
    fn test_cooldown_after_threshold() {
        let mut pool = ProxyPool::new(create_test_config());
        let now = Instant::now();

        for i in 1..=5 {
            let state = pool.report("http://p1:8080", Outcome::TransientFailure, now);
            if i < 5 {
                assert_eq!(state, Some(ProxyState::Active));
            } else {
                assert_eq!(state, Some(ProxyState::Cooldown));
            }
        }

        let p1 = pool.get("http://p1:8080").unwrap();
        assert_eq!(p1.cooldown_until, Some(now + Duration::from_secs(30)));
        assert_eq!(p1.score, 0.1);

        // Never handed out while cooling down
        let mut rng = rng();
        for _ in 0..200 {
            let proxy = pool.acquire("example.com", now, &mut rng).unwrap();
            assert_eq!(proxy.address, "http://p2:8080");
        }

        // Sweep before the deadline changes nothing
        assert_eq!(pool.sweep(now + Duration::from_secs(29)), 0);
        assert_eq!(pool.sweep(now + Duration::from_secs(30)), 1);
        assert_eq!(
            pool.get("http://p1:8080").unwrap().state,
            ProxyState::Active
        );
    }

    #[test]
    fn test_cooldown_backoff_grows() {
        let mut pool = ProxyPool::new(create_test_config());
        let now = Instant::now();
        for _ in 0..5 {
            pool.report("http://p1:8080", Outcome::TransientFailure, now);
        }
        let later = now + Duration::from_secs(30);
        pool.sweep(later);

        // Still above the threshold: one more failure re-enters cooldown, doubled
        pool.report("http://p1:8080", Outcome::TransientFailure, later);
        let p1 = pool.get("http://p1:8080").unwrap();
        assert_eq!(p1.state, ProxyState::Cooldown);
        assert_eq!(p1.cooldown_until, Some(later + Duration::from_secs(60)));
    }

    #[test]
    fn test_cooldown_ceiling() {
        let mut pool = ProxyPool::new(create_test_config());
        let now = Instant::now();
        for _ in 0..30 {
            pool.report("http://p1:8080", Outcome::TransientFailure, now);
        }
        let p1 = pool.get("http://p1:8080").unwrap();
        assert_eq!(p1.cooldown_until, Some(now + Duration::from_secs(600)));
    }

    #[test]
    fn test_fatal_failure_bans_until_reset() {
        let mut pool = ProxyPool::new(create_test_config());
        let now = Instant::now();

        assert_eq!(
            pool.report("http://p1:8080", Outcome::FatalFailure, now),
            Some(ProxyState::Banned)
        );

        // Sweeps never revive a banned proxy
        pool.sweep(now + Duration::from_secs(86_400));
        let mut rng = rng();
        for _ in 0..100 {
            let proxy = pool.acquire("example.com", now, &mut rng).unwrap();
            assert_eq!(proxy.address, "http://p2:8080");
        }

        pool.reset("http://p1:8080").unwrap();
        let p1 = pool.get("http://p1:8080").unwrap();
        assert_eq!(p1.state, ProxyState::Active);
        assert_eq!(p1.score, 5.0);
    }

    #[test]
    fn test_transient_failure_does_not_unban() {
        let mut pool = ProxyPool::new(create_test_config());
        let now = Instant::now();
        pool.report("http://p1:8080", Outcome::FatalFailure, now);
        for _ in 0..10 {
            pool.report("http://p1:8080", Outcome::TransientFailure, now);
        }
        assert_eq!(
            pool.get("http://p1:8080").unwrap().state,
            ProxyState::Banned
        );
    }

    #[test]
    fn test_domain_exclusion() {
        let mut pool = ProxyPool::new(create_test_config());
        let now = Instant::now();
        pool.exclude("http://p1:8080", "blocked.com", now + Duration::from_secs(60));

        assert!(pool.is_excluded("http://p1:8080", "blocked.com", now));
        assert!(!pool.is_excluded("http://p1:8080", "other.com", now));

        let mut rng = rng();
        for _ in 0..100 {
            let proxy = pool.acquire("blocked.com", now, &mut rng).unwrap();
            assert_eq!(proxy.address, "http://p2:8080");
        }

        // Other domains still see both proxies
        assert_eq!(pool.eligible("other.com", now).len(), 2);

        let later = now + Duration::from_secs(61);
        assert_eq!(pool.eligible("blocked.com", later).len(), 2);
        pool.sweep(later);
        assert!(!pool.is_excluded("http://p1:8080", "blocked.com", later));
    }

    #[test]
    fn test_all_excluded_is_none_available() {
        let mut pool = ProxyPool::new(create_test_config());
        let now = Instant::now();
        let until = now + Duration::from_secs(60);
        pool.exclude("http://p1:8080", "blocked.com", until);
        pool.exclude("http://p2:8080", "blocked.com", until);

        assert!(pool.acquire("blocked.com", now, &mut rng()).is_none());
        assert!(pool.acquire("open.com", now, &mut rng()).is_some());
    }

    #[test]
    fn test_admin_operations() {
        let mut pool = ProxyPool::new(create_test_config());

        assert!(pool.add("http://p3:8080").is_ok());
        assert!(matches!(
            pool.add("http://p3:8080"),
            Err(DispatchError::DuplicateProxy(_))
        ));

        pool.ban("http://p3:8080").unwrap();
        assert_eq!(pool.get("http://p3:8080").unwrap().state, ProxyState::Banned);

        let removed = pool.remove("http://p3:8080").unwrap();
        assert_eq!(removed.address, "http://p3:8080");
        assert!(matches!(
            pool.remove("http://p3:8080"),
            Err(DispatchError::ProxyNotFound(_))
        ));
        assert!(matches!(
            pool.reset("http://missing:1"),
            Err(DispatchError::ProxyNotFound(_))
        ));
    }

    #[test]
    fn test_report_for_removed_proxy_is_ignored() {
        let mut pool = ProxyPool::new(create_test_config());
        pool.remove("http://p1:8080").unwrap();
        assert_eq!(
            pool.report("http://p1:8080", Outcome::Success, Instant::now()),
            None
        );
    }

    #[test]
    fn test_top_and_distribution() {
        let mut pool = ProxyPool::new(create_test_config());
        pool.add("http://p3:8080").unwrap();
        let now = Instant::now();

        for _ in 0..5 {
            pool.report("http://p2:8080", Outcome::Success, now);
        }
        pool.report("http://p3:8080", Outcome::FatalFailure, now);

        let top = pool.top(5);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].address, "http://p2:8080");

        let distribution = pool.score_distribution();
        assert_eq!(distribution.high, 1);
        assert_eq!(distribution.medium, 1);
        assert_eq!(distribution.low, 1);

        let counts = pool.count_by_state();
        assert_eq!(counts.get(&ProxyState::Active), Some(&2));
        assert_eq!(counts.get(&ProxyState::Banned), Some(&1));
    }

    #[test]
    fn test_records_roundtrip_reanchors_cooldown() {
        let mut pool = ProxyPool::new(create_test_config());
        let now = Instant::now();
        for _ in 0..5 {
            pool.report("http://p1:8080", Outcome::TransientFailure, now);
        }

        let records = pool.to_records(now + Duration::from_secs(10));
        let p1 = records.iter().find(|r| r.address == "http://p1:8080").unwrap();
        assert_eq!(p1.cooldown_remaining_ms, Some(20_000));

        let restart = now + Duration::from_secs(100);
        let restored = ProxyPool::from_records(create_test_config(), records, restart);
        let p1 = restored.get("http://p1:8080").unwrap();
        assert_eq!(p1.state, ProxyState::Cooldown);
        assert_eq!(p1.cooldown_until, Some(restart + Duration::from_secs(20)));
        assert_eq!(p1.total_failure, 5);
    }
}
