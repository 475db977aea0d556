//! Dispatch core for Sumi-Dispatch
//!
//! This module contains the pieces that decide which URL is fetched, through
//! which proxy, by which worker and when:
//! - The fingerprint store deduplicating discovered URLs
//! - The domain throttle enforcing per-domain politeness
//! - The frontier holding tasks through their lifecycle
//! - The scheduler orchestrating leases and reports
//! - The sweeper driving the scheduler's periodic tick

pub mod backoff;
mod fingerprint_store;
mod frontier;
mod scheduler;
mod sweeper;
mod throttle;

pub use backoff::backoff;
pub use fingerprint_store::FingerprintStore;
pub use frontier::{Frontier, ReclaimedLease, Task};
pub use scheduler::{Scheduler, TickReport};
pub use sweeper::spawn_sweeper;
pub use throttle::DomainThrottle;

use crate::proxy::Outcome;
use std::fmt;
use std::time::{Duration, Instant};

/// Identifier of a task, unique for the lifetime of a crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A time-bounded assignment of one task and one proxy to one worker
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub task_id: TaskId,
    pub url: String,
    pub domain: String,
    pub proxy_address: String,
    pub worker_id: String,

    /// The lease is reclaimed if no report arrives by then
    pub deadline: Instant,

    /// Retries already consumed by the task
    pub attempt: u32,
}

/// Why a lease request produced no work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoWorkReason {
    /// Nothing is pending
    Idle,

    /// Pending tasks exist but every candidate domain is at its politeness limit
    Throttled,

    /// A task was eligible but no proxy could serve its domain
    NoProxyAvailable,
}

impl fmt::Display for NoWorkReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NoWorkReason::Idle => "idle",
            NoWorkReason::Throttled => "throttled",
            NoWorkReason::NoProxyAvailable => "no proxy available",
        };
        write!(f, "{}", s)
    }
}

/// Answer to a worker's lease request
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseResponse {
    Granted(Lease),

    /// Poll again after `retry_after`
    NoWork {
        reason: NoWorkReason,
        retry_after: Duration,
    },
}

impl LeaseResponse {
    pub fn is_granted(&self) -> bool {
        matches!(self, LeaseResponse::Granted(_))
    }

    pub fn lease(self) -> Option<Lease> {
        match self {
            LeaseResponse::Granted(lease) => Some(lease),
            LeaseResponse::NoWork { .. } => None,
        }
    }
}

/// Extra information a worker attaches to a report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportDetail {
    /// HTTP status of the response, if one was received
    pub status: Option<u16>,

    /// Outcome for the proxy when it differs from the task's outcome
    ///
    /// When unset, a task success or transient failure counts the same for
    /// the proxy, and a task fatal failure counts as a proxy success.
    pub proxy_outcome: Option<Outcome>,

    pub message: Option<String>,
}

impl ReportDetail {
    pub fn with_status(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Why a report was ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The lease was reclaimed before the report arrived
    LeaseExpired,

    /// The task already completed or was dead-lettered (e.g. cancelled)
    TaskTerminal,

    /// The task is leased to another worker
    NotLeaseHolder,

    /// The lease names a proxy or domain other than the one issued
    LeaseMismatch,
}

/// Scheduler's acknowledgement of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportAck {
    Completed,

    /// Back in the frontier after a transient failure
    Retrying { retry_count: u32 },

    /// Back in the frontier without consuming a retry (the proxy was at fault)
    Requeued,

    DeadLettered,

    Ignored(IgnoreReason),
}
