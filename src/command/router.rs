//! Reply router - matches inbound device messages to the in-flight request

use super::tracker::CorrelationTracker;
use farmbot_shared::{codec, topics};
use std::sync::Arc;
use tracing::{debug, trace};

/// What the router did with one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteResult {
    /// Matched the tracked label; outcome recorded
    Accepted,
    /// Liveness traffic
    Ping,
    /// Label is not the one in flight (late, foreign or missing)
    Stale,
    /// Arrived on a topic other than the reply topic
    ForeignTopic,
    /// Payload did not decode
    Malformed,
}

/// Inbound-message handler installed on a transport.
///
/// Never fails: unrelated or broken traffic is dropped without side effects.
#[derive(Debug, Clone)]
pub struct ReplyRouter {
    reply_topic: String,
    tracker: Arc<CorrelationTracker>,
}

impl ReplyRouter {
    /// Create a router for the given device's reply topic
    pub fn new(device_id: &str, tracker: Arc<CorrelationTracker>) -> Self {
        Self {
            reply_topic: topics::from_device(device_id),
            tracker,
        }
    }

    /// Topic this router accepts replies on
    pub fn reply_topic(&self) -> &str {
        &self.reply_topic
    }

    /// Route one inbound message
    pub fn route(&self, topic: &str, payload: &[u8]) -> RouteResult {
        let reply = match codec::decode_reply(payload) {
            Ok(reply) => reply,
            Err(e) => {
                debug!("Dropping undecodable message on {}: {}", topic, e);
                return RouteResult::Malformed;
            }
        };

        if reply.is_ping() {
            trace!("Ping on {}", topic);
            return RouteResult::Ping;
        }

        debug!(
            "< {} kind={} label={:?}",
            topic,
            reply.kind,
            reply.label()
        );

        if topic != self.reply_topic {
            return RouteResult::ForeignTopic;
        }

        let Some(label) = reply.label() else {
            return RouteResult::Stale;
        };

        if self.tracker.resolve(label, reply.outcome()) {
            RouteResult::Accepted
        } else {
            debug!("Discarding reply for {} (not in flight)", label);
            RouteResult::Stale
        }
    }
}
