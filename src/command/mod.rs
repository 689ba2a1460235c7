//! Correlated request/response execution
//!
//! This module handles:
//! - Building request documents for device commands
//! - Tracking the single in-flight correlation id
//! - Routing inbound replies to the in-flight request
//! - Executing requests with bounded waits and retries

pub mod encoder;
mod executor;
mod router;
mod tracker;

pub use executor::{ExecutorConfig, RequestExecutor};
pub use router::{ReplyRouter, RouteResult};
pub use tracker::{CorrelationTracker, Slot};
