//! In-memory transport with a scripted device on the other end
//!
//! Every published request is decoded and handed to a responder, whose
//! deliveries are fed back through the same [`ReplyRouter`] a broker session
//! would use. Deliveries without a delay are routed before `publish` returns.

use crate::command::ReplyRouter;
use crate::error::{Result, RpcError};
use crate::transport::traits::BusTransport;
use async_trait::async_trait;
use bytes::Bytes;
use farmbot_shared::{codec, state_machine::SessionState, RpcReply, RpcRequest};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, warn};

/// A message the simulated device sends back
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub payload: Bytes,
    pub delay: Duration,
}

impl Delivery {
    /// A reply document on `topic`, delivered immediately
    ///
    /// A reply that cannot be encoded is logged and sent as an empty payload,
    /// which the router drops as malformed.
    pub fn reply(topic: impl Into<String>, reply: &RpcReply) -> Self {
        let payload = match codec::encode_reply(reply) {
            Ok(p) => p,
            Err(e) => {
                error!("[loopback] failed to encode scripted reply: {}", e);
                Bytes::new()
            }
        };
        Self::raw(topic, payload)
    }

    /// Arbitrary bytes on `topic`, delivered immediately
    pub fn raw(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            delay: Duration::ZERO,
        }
    }

    /// Deliver after `delay` instead of immediately
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A request the bus has seen
#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub request: RpcRequest,
    pub at: Instant,
}

/// Decides what the simulated device sends back for each request
pub type Responder = Box<dyn FnMut(&RpcRequest) -> Vec<Delivery> + Send>;

/// Transport that never leaves the process
pub struct LoopbackBus {
    router: ReplyRouter,
    responder: Mutex<Responder>,
    published: Mutex<Vec<Published>>,
    state: watch::Sender<SessionState>,
}

impl LoopbackBus {
    /// Create a connected bus driven by `responder`
    pub fn new(router: ReplyRouter, responder: Responder) -> Self {
        let (state, _) = watch::channel(SessionState::Connected);
        Self {
            router,
            responder: Mutex::new(responder),
            published: Mutex::new(Vec::new()),
            state,
        }
    }

    /// A device that answers every request with `kind`
    pub fn always(router: ReplyRouter, kind: &str) -> Self {
        let topic = router.reply_topic().to_string();
        let kind = kind.to_string();
        Self::new(
            router,
            Box::new(move |request: &RpcRequest| {
                vec![Delivery::reply(
                    topic.clone(),
                    &RpcReply::new(kind.clone(), request.label()),
                )]
            }),
        )
    }

    /// A device that never answers
    pub fn silent(router: ReplyRouter) -> Self {
        Self::new(router, Box::new(|_: &RpcRequest| Vec::new()))
    }

    /// Force the session state, e.g. to simulate a broker that never answers
    pub fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Every request published so far, in order
    pub async fn published(&self) -> Vec<Published> {
        self.published.lock().await.clone()
    }

    fn deliver(&self, delivery: Delivery) {
        if delivery.delay.is_zero() {
            self.router.route(&delivery.topic, &delivery.payload);
            return;
        }

        let router = self.router.clone();
        let state = self.state.subscribe();
        tokio::spawn(async move {
            tokio::time::sleep(delivery.delay).await;
            if *state.borrow() != SessionState::Disconnected {
                router.route(&delivery.topic, &delivery.payload);
            }
        });
    }
}

#[async_trait]
impl BusTransport for LoopbackBus {
    async fn await_ready(&self, bound: Duration) -> Result<()> {
        let mut rx = self.state.subscribe();
        let settled = timeout(bound, rx.wait_for(|s| *s != SessionState::Connecting))
            .await
            .map(|r| r.map(|state| *state));
        match settled {
            Ok(Ok(SessionState::Connected)) => Ok(()),
            Ok(_) => Err(RpcError::SessionClosed),
            Err(_) => Err(RpcError::ConnectionTimeout(bound)),
        }
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        if self.state() == SessionState::Disconnected {
            return Err(RpcError::SessionClosed);
        }

        let request = codec::decode_request(&payload)?;
        debug!("[loopback] > {} label={}", topic, request.label());

        self.published.lock().await.push(Published {
            topic: topic.to_string(),
            request: request.clone(),
            at: Instant::now(),
        });

        let deliveries = {
            let mut responder = self.responder.lock().await;
            let respond = &mut **responder;
            respond(&request)
        };

        for delivery in deliveries {
            self.deliver(delivery);
        }

        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if self.state() == SessionState::Disconnected {
            warn!("[loopback] shutdown called twice");
        }
        self.set_state(SessionState::Disconnected);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}
