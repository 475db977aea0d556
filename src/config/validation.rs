use crate::config::types::{
    Config, DomainOverride, ProxyPoolConfig, SchedulerConfig, ThrottleConfig, WorkerConfig,
};
use crate::worker::DIRECT_PROXY;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_proxy_pool_config(&config.proxy_pool)?;
    validate_throttle_config(&config.throttle)?;
    validate_worker_config(&config.worker)?;
    validate_seeds(&config.seeds)?;
    Ok(())
}

fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.lease_duration_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "lease-duration-ms must be >= 100ms, got {}ms",
            config.lease_duration_ms
        )));
    }

    if let Some(interval) = config.reclaim_interval_ms {
        if interval == 0 || interval > config.lease_duration_ms {
            return Err(ConfigError::Validation(format!(
                "reclaim-interval-ms must be between 1 and lease-duration-ms ({}), got {}",
                config.lease_duration_ms, interval
            )));
        }
    }

    if config.max_scan < 1 {
        return Err(ConfigError::Validation(
            "max-scan must be >= 1".to_string(),
        ));
    }

    if !(config.rate_limit_factor > 0.0 && config.rate_limit_factor <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "rate-limit-factor must be in (0, 1], got {}",
            config.rate_limit_factor
        )));
    }

    if config.stats_every < 1 {
        return Err(ConfigError::Validation(
            "stats-every must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_proxy_pool_config(config: &ProxyPoolConfig) -> Result<(), ConfigError> {
    if config.cooldown_threshold < 1 {
        return Err(ConfigError::Validation(
            "cooldown-threshold must be >= 1".to_string(),
        ));
    }

    if config.cooldown_base_ms > config.cooldown_max_ms {
        return Err(ConfigError::Validation(format!(
            "cooldown-base-ms ({}) cannot exceed cooldown-max-ms ({})",
            config.cooldown_base_ms, config.cooldown_max_ms
        )));
    }

    // Selection weights must stay strictly positive
    if !(config.min_score > 0.0
        && config.min_score <= config.initial_score
        && config.initial_score <= config.max_score)
    {
        return Err(ConfigError::Validation(format!(
            "scores must satisfy 0 < min-score <= initial-score <= max-score, got {} / {} / {}",
            config.min_score, config.initial_score, config.max_score
        )));
    }

    if config.success_reward < 0.0 || config.failure_penalty < 0.0 {
        return Err(ConfigError::Validation(
            "success-reward and failure-penalty cannot be negative".to_string(),
        ));
    }

    if let Some(url) = &config.validation_url {
        let parsed = Url::parse(url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid validation-url '{}': {}", url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "validation-url must be http or https, got '{}'",
                url
            )));
        }
    }

    if config.validation_concurrency < 1 {
        return Err(ConfigError::Validation(
            "validation-concurrency must be >= 1".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for address in &config.proxies {
        validate_proxy_address(address)?;
        if !seen.insert(address.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Proxy '{}' is listed more than once",
                address
            )));
        }
    }

    Ok(())
}

fn validate_throttle_config(config: &ThrottleConfig) -> Result<(), ConfigError> {
    if config.max_concurrency < 1 {
        return Err(ConfigError::Validation(format!(
            "throttle max-concurrency must be >= 1, got {}",
            config.max_concurrency
        )));
    }

    if config.min_interval_ms > config.max_min_interval_ms {
        return Err(ConfigError::Validation(format!(
            "min-interval-ms ({}) cannot exceed max-min-interval-ms ({})",
            config.min_interval_ms, config.max_min_interval_ms
        )));
    }

    for entry in &config.domain {
        validate_domain_override(entry)?;
    }

    Ok(())
}

fn validate_domain_override(entry: &DomainOverride) -> Result<(), ConfigError> {
    validate_domain_string(&entry.domain)?;

    if entry.max_concurrency == Some(0) {
        return Err(ConfigError::Validation(format!(
            "Domain '{}' max-concurrency must be >= 1",
            entry.domain
        )));
    }

    Ok(())
}

fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.count < 1 || config.count > 1024 {
        return Err(ConfigError::Validation(format!(
            "worker count must be between 1 and 1024, got {}",
            config.count
        )));
    }

    if config.request_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "request-timeout-ms must be >= 100ms, got {}ms",
            config.request_timeout_ms
        )));
    }

    if config.user_agent.is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    for seed in seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use http or https",
                seed
            )));
        }
    }
    Ok(())
}

/// Validates a proxy address; `direct` bypasses proxying entirely
pub(crate) fn validate_proxy_address(address: &str) -> Result<(), ConfigError> {
    if address == DIRECT_PROXY {
        return Ok(());
    }

    let url = Url::parse(address).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid proxy address '{}': {}", address, e))
    })?;

    if !matches!(url.scheme(), "http" | "https" | "socks5") || url.host_str().is_none() {
        return Err(ConfigError::Validation(format!(
            "Proxy '{}' must be an http, https or socks5 URL with a host",
            address
        )));
    }

    Ok(())
}

/// Validates a domain string
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::Validation("Domain cannot be empty".to_string()));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::Validation(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::Validation(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    Ok(())
}
