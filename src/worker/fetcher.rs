//! HTTP fetcher implementation
//!
//! This module handles the worker's HTTP requests, including:
//! - Building one HTTP client per proxy address
//! - Fetching a leased URL through its proxy
//! - Classifying the response into task and proxy outcomes
//! - Checking a proxy's health outside any lease

use crate::config::WorkerConfig;
use crate::dispatch::{Lease, ReportDetail};
use crate::proxy::Outcome;
use crate::worker::DIRECT_PROXY;
use reqwest::{redirect::Policy, Client};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// What a worker reports after fetching a lease
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    /// Outcome for the task
    pub outcome: Outcome,
    pub detail: ReportDetail,
}

/// Classifies an HTTP status into task and proxy outcomes
///
/// | Status | Task | Proxy |
/// |--------|------|-------|
/// | 2xx, 3xx | Success | Success |
/// | 407 | TransientFailure | FatalFailure |
/// | 403, 408, 429, 5xx | TransientFailure | TransientFailure |
/// | 400, 401, 404, 405, 410, 451 and other 4xx | FatalFailure | Success |
///
/// # Returns
///
/// The task outcome, and the proxy outcome when it differs from the default
/// the scheduler derives from the task outcome.
pub fn classify_status(status: u16) -> (Outcome, Option<Outcome>) {
    match status {
        200..=399 => (Outcome::Success, None),
        407 => (Outcome::TransientFailure, Some(Outcome::FatalFailure)),
        403 | 408 | 429 | 500..=599 => (Outcome::TransientFailure, None),
        400..=499 => (Outcome::FatalFailure, None),
        _ => (Outcome::TransientFailure, None),
    }
}

fn classify_error(error: &reqwest::Error) -> FetchResult {
    let outcome = if error.is_redirect() {
        // Redirect loop or chain too long: the resource is broken
        Outcome::FatalFailure
    } else {
        Outcome::TransientFailure
    };

    FetchResult {
        outcome,
        detail: ReportDetail {
            status: error.status().map(|s| s.as_u16()),
            proxy_outcome: None,
            message: Some(error.to_string()),
        },
    }
}

/// HTTP fetcher shared by all workers
///
/// Clients are built lazily and cached per proxy address, so connection
/// pools are reused across leases through the same proxy.
pub struct Fetcher {
    timeout: Duration,
    user_agent: String,
    clients: Mutex<HashMap<String, Client>>,
}

impl Fetcher {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.request_timeout_ms),
            user_agent: config.user_agent.clone(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, proxy: &str) -> Result<Client, reqwest::Error> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(proxy) {
            return Ok(client.clone());
        }

        let client = self.build_client(proxy)?;
        clients.insert(proxy.to_string(), client.clone());
        tracing::debug!("Built HTTP client for proxy {}", proxy);
        Ok(client)
    }

    fn build_client(&self, proxy: &str) -> Result<Client, reqwest::Error> {
        let builder = Client::builder()
            .user_agent(self.user_agent.as_str())
            .timeout(self.timeout)
            .connect_timeout(self.timeout.min(Duration::from_secs(10)))
            .redirect(Policy::limited(10))
            .gzip(true)
            .brotli(true);

        let builder = if proxy == DIRECT_PROXY {
            builder.no_proxy()
        } else {
            builder.proxy(reqwest::Proxy::all(proxy)?)
        };

        builder.build()
    }

    /// Fetches the lease's URL through the lease's proxy
    ///
    /// Never fails: every error is turned into an outcome for the report.
    pub async fn fetch(&self, lease: &Lease) -> FetchResult {
        let client = match self.client(&lease.proxy_address) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Unusable proxy {}: {}", lease.proxy_address, e);
                return FetchResult {
                    outcome: Outcome::TransientFailure,
                    detail: ReportDetail {
                        status: None,
                        proxy_outcome: Some(Outcome::FatalFailure),
                        message: Some(format!("invalid proxy: {}", e)),
                    },
                };
            }
        };

        let response = match client.get(&lease.url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Fetch of {} via {} failed: {}", lease.url, lease.proxy_address, e);
                return classify_error(&e);
            }
        };

        let status = response.status().as_u16();
        let (outcome, proxy_outcome) = classify_status(status);

        // A body cut off mid-transfer is not a success
        if outcome.is_success() {
            if let Err(e) = response.bytes().await {
                return classify_error(&e);
            }
        }

        tracing::debug!("Fetched {} via {}: HTTP {}", lease.url, lease.proxy_address, status);
        FetchResult {
            outcome,
            detail: ReportDetail {
                status: Some(status),
                proxy_outcome,
                message: None,
            },
        }
    }
}

impl Fetcher {
    /// Requests `url` through `proxy` and judges only the proxy
    ///
    /// Any 2xx or 3xx answer means the proxy works. A 407 or an address
    /// reqwest cannot use is fatal for the proxy; every other error or status
    /// counts as a transient failure.
    pub async fn check_proxy(&self, proxy: &str, url: &str) -> Outcome {
        let client = match self.client(proxy) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Unusable proxy {}: {}", proxy, e);
                return Outcome::FatalFailure;
            }
        };

        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                tracing::debug!("Health check via {}: HTTP {}", proxy, status);
                match status {
                    200..=399 => Outcome::Success,
                    407 => Outcome::FatalFailure,
                    _ => Outcome::TransientFailure,
                }
            }
            Err(e) => {
                tracing::debug!("Health check via {} failed: {}", proxy, e);
                Outcome::TransientFailure
            }
        }
    }
}
