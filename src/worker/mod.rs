//! Reference crawl worker
//!
//! Workers are the scheduler's clients: they request a lease, fetch the
//! leased URL through the leased proxy and report what happened. The
//! scheduler itself never performs network I/O.

mod fetcher;
mod runner;
mod validate;

pub use fetcher::{classify_status, FetchResult, Fetcher};
pub use runner::{run_pool, run_worker, WorkerSummary};
pub use validate::{validate_proxies, ValidationSummary};

/// Pseudo proxy address for fetching without a proxy
pub const DIRECT_PROXY: &str = "direct";
