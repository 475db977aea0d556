//! Worker loop and worker pool

use crate::config::Config;
use crate::dispatch::{spawn_sweeper, LeaseResponse, NoWorkReason, ReportAck, Scheduler};
use crate::output::{MetricsSink, TracingSink};
use crate::state::ProxyState;
use crate::worker::Fetcher;
use crate::Result;
use std::sync::Arc;

/// What a single worker did before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub fetched: u64,
    pub completed: u64,

    /// Reports that sent the task back to the frontier or dead-lettered it
    pub failed: u64,

    /// Reports the scheduler ignored (lease expired or task cancelled)
    pub ignored: u64,
}

/// Runs the lease, fetch, report loop until the scheduler is drained
///
/// The worker also stops when every proxy is banned, since no lease can be
/// granted until an admin resets one.
pub async fn run_worker(
    scheduler: Arc<Scheduler>,
    worker_id: String,
    fetcher: Arc<Fetcher>,
) -> Result<WorkerSummary> {
    let mut summary = WorkerSummary::default();
    tracing::debug!("Worker {} started", worker_id);

    while !scheduler.is_drained() {
        let lease = match scheduler.request_lease(&worker_id)? {
            LeaseResponse::Granted(lease) => lease,
            LeaseResponse::NoWork {
                reason,
                retry_after,
            } => {
                if reason == NoWorkReason::NoProxyAvailable && all_banned(&scheduler) {
                    tracing::warn!("Every proxy is banned, worker {} stopping", worker_id);
                    break;
                }
                tracing::trace!("Worker {}: {}, waiting {:?}", worker_id, reason, retry_after);
                tokio::time::sleep(retry_after).await;
                continue;
            }
        };

        let result = fetcher.fetch(&lease).await;
        summary.fetched += 1;

        match scheduler.report(&lease, result.outcome, result.detail)? {
            ReportAck::Completed => summary.completed += 1,
            ReportAck::Ignored(reason) => {
                tracing::debug!("Report for task {} ignored: {:?}", lease.task_id, reason);
                summary.ignored += 1;
            }
            _ => summary.failed += 1,
        }
    }

    tracing::debug!(
        "Worker {} finished: {} fetched, {} completed",
        worker_id,
        summary.fetched,
        summary.completed
    );
    Ok(summary)
}

fn all_banned(scheduler: &Scheduler) -> bool {
    scheduler
        .proxies()
        .iter()
        .all(|proxy| proxy.state == ProxyState::Banned)
}

/// Runs `config.worker.count` workers and the sweeper until the crawl drains
///
/// # Returns
///
/// * `Ok(Vec<WorkerSummary>)` - One summary per worker that finished
/// * `Err(DispatchError)` - The first error a worker stopped with
pub async fn run_pool(scheduler: Arc<Scheduler>, config: &Config) -> Result<Vec<WorkerSummary>> {
    let fetcher = Arc::new(Fetcher::new(&config.worker));
    let sink = Arc::new(TracingSink);
    let sweeper = spawn_sweeper(Arc::clone(&scheduler), sink.clone());

    let count = config.worker.count.max(1);
    tracing::info!("Starting {} workers", count);

    let handles: Vec<_> = (1..=count)
        .map(|i| {
            tokio::spawn(run_worker(
                Arc::clone(&scheduler),
                format!("worker-{}", i),
                Arc::clone(&fetcher),
            ))
        })
        .collect();

    let mut summaries = Vec::with_capacity(count);
    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(summary)) => summaries.push(summary),
            Ok(Err(e)) => {
                tracing::error!("Worker stopped with error: {}", e);
                first_error.get_or_insert(e);
            }
            Err(e) => tracing::error!("Worker task failed: {}", e),
        }
    }

    sweeper.abort();
    sink.publish(&scheduler.stats());

    match first_error {
        Some(e) => Err(e),
        None => Ok(summaries),
    }
}
