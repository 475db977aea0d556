//! Proxy pool module for Sumi-Dispatch
//!
//! This module tracks the health of egress proxies and hands them out to
//! leases with a score-weighted random policy.

mod pool;
mod selection;

pub use pool::{Proxy, ProxyPool, ScoreDistribution};
pub use selection::select_weighted;

use std::fmt;

/// Result of a fetch attempt, as seen by the task or by the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,

    /// Worth retrying: timeouts, connection resets, 5xx, rate limits
    TransientFailure,

    /// Not worth retrying: the resource is gone, or the proxy is blacklisted
    FatalFailure,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::TransientFailure => "transient failure",
            Outcome::FatalFailure => "fatal failure",
        };
        write!(f, "{}", s)
    }
}
