//! Active proxy health validation
//!
//! Before a crawl starts, every proxy that is not banned is checked with one
//! request to a known URL. The results go through the same health rules as
//! lease reports, so a dead proxy cools down before it costs a task a retry.

use crate::dispatch::Scheduler;
use crate::state::ProxyState;
use crate::worker::Fetcher;
use crate::{DispatchError, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// What a validation pass found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub checked: usize,
    pub healthy: usize,
    pub failed: usize,

    /// Proxies banned by this pass
    pub banned: usize,
}

/// Checks every proxy that is not banned and feeds the results into the pool
///
/// At most `concurrency` checks run at once. A proxy removed while its check
/// is in flight is left out of the summary.
pub async fn validate_proxies(
    scheduler: Arc<Scheduler>,
    fetcher: Arc<Fetcher>,
    url: &str,
    concurrency: usize,
) -> Result<ValidationSummary> {
    let addresses: Vec<String> = scheduler
        .proxies()
        .into_iter()
        .filter(|proxy| proxy.state != ProxyState::Banned)
        .map(|proxy| proxy.address)
        .collect();

    let mut summary = ValidationSummary::default();
    if addresses.is_empty() {
        tracing::warn!("No proxy to validate");
        return Ok(summary);
    }
    tracing::info!("Validating {} proxies against {}", addresses.len(), url);

    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut checks = JoinSet::new();
    for address in addresses {
        let fetcher = Arc::clone(&fetcher);
        let permits = Arc::clone(&permits);
        let url = url.to_string();
        checks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let outcome = fetcher.check_proxy(&address, &url).await;
            (address, outcome)
        });
    }

    while let Some(joined) = checks.join_next().await {
        let (address, outcome) = match joined {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Proxy health check task failed: {}", e);
                continue;
            }
        };

        let state = match scheduler.report_proxy(&address, outcome) {
            Ok(state) => state,
            Err(DispatchError::ProxyNotFound(_)) => {
                tracing::debug!("Proxy {} removed during validation", address);
                continue;
            }
            Err(e) => return Err(e),
        };

        summary.checked += 1;
        if outcome.is_success() {
            summary.healthy += 1;
        } else {
            summary.failed += 1;
        }
        if state == ProxyState::Banned {
            summary.banned += 1;
        }
    }

    tracing::info!(
        "Proxy validation finished: {} healthy, {} failing, {} banned",
        summary.healthy,
        summary.failed,
        summary.banned
    );
    Ok(summary)
}
