//! FarmBot RPC client
//!
//! Turns the device's publish/subscribe channel into synchronous calls:
//! every request carries a fresh correlation id, waits a bounded time for
//! the matching reply, and is retried on timeouts and device errors.

pub mod client;
pub mod command;
pub mod connection;
pub mod error;
pub mod sweep;
pub mod transport;

pub use client::FarmbotClient;
pub use error::{AttemptFailure, Result, RpcError};
pub use farmbot_shared as shared;
