//! MQTT session to the FarmBot broker

use crate::command::ReplyRouter;
use crate::error::{Result, RpcError};
use crate::transport::BusTransport;
use async_trait::async_trait;
use bytes::Bytes;
use farmbot_shared::state_machine::{is_valid_session_transition, SessionState};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for a broker session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Device identity; also the broker username
    pub device_id: String,
    /// Device token; the broker password
    pub token: String,
    /// Broker host
    pub broker_host: String,
    /// Broker TCP port
    pub broker_port: u16,
    /// MQTT keep-alive interval
    pub keep_alive: Duration,
    /// Pause after an event-loop error before polling again
    pub retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            token: String::new(),
            broker_host: "clever-octopus.rmq.cloudamqp.com".into(),
            broker_port: 1883,
            keep_alive: Duration::from_secs(60),
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    pub fn new(device_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            token: token.into(),
            ..Default::default()
        }
    }

    fn mqtt_options(&self) -> MqttOptions {
        let client_id = format!("farmbot-client-{}", Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, &self.broker_host, self.broker_port);
        options.set_keep_alive(self.keep_alive);
        options.set_credentials(&self.device_id, &self.token);
        options
    }
}

/// Broker session with the reply router installed as its inbound handler
pub struct MqttSession {
    config: SessionConfig,
    client: AsyncClient,
    state: Arc<watch::Sender<SessionState>>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSession {
    /// Start connecting to the broker.
    ///
    /// Returns at once; use [`BusTransport::await_ready`] to wait for the
    /// session to be connected and subscribed. Must be called inside a tokio
    /// runtime.
    pub fn connect(config: SessionConfig, router: ReplyRouter) -> Self {
        let (client, eventloop) = AsyncClient::new(config.mqtt_options(), 10);
        let (state, _) = watch::channel(SessionState::Disconnected);
        let state = Arc::new(state);
        let running = Arc::new(AtomicBool::new(true));

        set_state(&state, SessionState::Connecting);
        info!(
            "Connecting to {}:{} as {}",
            config.broker_host, config.broker_port, config.device_id
        );

        let task = tokio::spawn(event_loop(
            eventloop,
            client.clone(),
            router,
            state.clone(),
            running.clone(),
            config.retry_delay,
        ));

        Self {
            config,
            client,
            state,
            running,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn device_id(&self) -> &str {
        &self.config.device_id
    }
}

#[async_trait]
impl BusTransport for MqttSession {
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
        if !self.running.load(Ordering::SeqCst) {
            return Err(RpcError::SessionClosed);
        }
        self.client
            .publish_bytes(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self.client.disconnect().await {
            debug!("Disconnect request not delivered: {}", e);
        }

        if let Some(mut task) = self.task.lock().await.take() {
            // Give the event loop a moment to flush the DISCONNECT
            if timeout(Duration::from_secs(1), &mut task).await.is_err() {
                debug!("Event loop did not stop in time; aborting");
                task.abort();
            }
        }

        set_state(&self.state, SessionState::Disconnected);
        info!("Session for {} shut down", self.config.device_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Ok(mut task) = self.task.try_lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

fn set_state(state: &watch::Sender<SessionState>, to: SessionState) {
    let from = *state.borrow();
    if !is_valid_session_transition(from, to) {
        warn!("Ignoring session transition {} -> {}", from, to);
        return;
    }
    if from != to {
        debug!("Session {} -> {}", from, to);
        state.send_replace(to);
    }
}

/// Drive the MQTT event loop, feeding replies to the router
async fn event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    router: ReplyRouter,
    state: Arc<watch::Sender<SessionState>>,
    running: Arc<AtomicBool>,
    retry_delay: Duration,
) {
    let reply_topic = router.reply_topic().to_string();

    while running.load(Ordering::SeqCst) {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!("CONNACK {:?}", ack.code);
                // try_subscribe: the request queue is drained by this very loop
                if let Err(e) = client.try_subscribe(&reply_topic, QoS::AtMostOnce) {
                    error!("Failed to subscribe to {}: {}", reply_topic, e);
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                info!("Subscribed to {}", reply_topic);
                set_state(&state, SessionState::Connected);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                router.route(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("Broker sent DISCONNECT");
            }
            Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                warn!("MQTT event loop error: {}", e);
                tokio::time::sleep(retry_delay).await;
            }
        }
    }

    debug!("MQTT event loop for {} stopped", reply_topic);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CorrelationTracker;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::new("device_1", "secret");
        assert_eq!(config.device_id, "device_1");
        assert_eq!(config.broker_port, 1883);
        assert_eq!(config.keep_alive, Duration::from_secs(60));
    }

    #[test]
    fn test_mqtt_options_carry_credentials() {
        let options = SessionConfig::new("device_1", "secret").mqtt_options();
        assert_eq!(
            options.credentials(),
            Some(("device_1".to_string(), "secret".to_string()))
        );
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(options.client_id().starts_with("farmbot-client-"));
    }

    #[tokio::test]
    async fn test_unreachable_broker_times_out() {
        let config = SessionConfig {
            broker_host: "127.0.0.1".into(),
            broker_port: 1,
            retry_delay: Duration::from_millis(10),
            ..SessionConfig::new("device_1", "secret")
        };
        let router = ReplyRouter::new("device_1", Arc::new(CorrelationTracker::new()));
        let session = MqttSession::connect(config, router);
        assert_eq!(session.state(), SessionState::Connecting);

        let result = session.await_ready(Duration::from_millis(200)).await;
        assert!(matches!(result, Err(RpcError::ConnectionTimeout(_))));

        session.shutdown().await.unwrap();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.publish("bot/device_1/from_clients", Bytes::new()).await,
            Err(RpcError::SessionClosed)
        ));
    }
}
