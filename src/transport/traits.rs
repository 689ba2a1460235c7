//! Transport trait abstraction for pluggable message buses

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// A publish/subscribe link to the device.
///
/// Inbound traffic is not pulled through this trait: implementations push it
/// into the [`ReplyRouter`](crate::command::ReplyRouter) they were built with.
#[async_trait]
pub trait BusTransport: Send + Sync + 'static {
    /// Wait until the link is connected and subscribed, failing after `bound`
    async fn await_ready(&self, bound: Duration) -> Result<()>;

    /// Send one message
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Release the link and stop delivering inbound messages
    async fn shutdown(&self) -> Result<()>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
