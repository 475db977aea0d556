//! State module for tracking dispatch progress
//!
//! # Components
//!
//! - `TaskState`: lifecycle of a crawl task (pending, leased, completed, ...)
//! - `ProxyState`: health state of an egress proxy
//! - `DomainState`: per-domain concurrency and politeness bookkeeping

mod domain_state;
mod proxy_state;
mod task_state;

// Re-export main types
pub use domain_state::DomainState;
pub use proxy_state::ProxyState;
pub use task_state::TaskState;
