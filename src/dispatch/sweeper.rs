//! Background maintenance task
//!
//! Reclaiming expired leases, ending proxy cooldowns and promoting delayed
//! retries must happen even when no worker is calling into the scheduler.

use crate::dispatch::Scheduler;
use crate::output::MetricsSink;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Spawns a task ticking `scheduler` every reclaim interval
///
/// Statistics are published to `sink` every `stats_every` ticks. The task
/// runs until the returned handle is aborted.
///
/// # Arguments
///
/// * `scheduler` - The scheduler to maintain
/// * `sink` - Receives reclaimed leases and periodic statistics
pub fn spawn_sweeper(scheduler: Arc<Scheduler>, sink: Arc<dyn MetricsSink>) -> JoinHandle<()> {
    let period = scheduler.config().reclaim_interval();
    let stats_every = scheduler.config().stats_every.max(1);

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!("Sweeper started with period {:?}", period);

        let mut ticks: u32 = 0;
        loop {
            ticker.tick().await;

            let report = scheduler.tick();
            for lease in &report.reclaimed {
                sink.lease_reclaimed(lease);
            }
            if report.proxies_restored > 0 || report.retries_promoted > 0 {
                tracing::debug!(
                    "Sweep restored {} proxies, promoted {} retries",
                    report.proxies_restored,
                    report.retries_promoted
                );
            }

            ticks = ticks.wrapping_add(1);
            if ticks % stats_every == 0 {
                sink.publish(&scheduler.stats());
            }
        }
    })
}
