//! High-level FarmBot client
//!
//! Owns one transport and one executor. Calls are serialized through a
//! mutex so at most one request is ever in flight.

use crate::command::{encoder, CorrelationTracker, ExecutorConfig, ReplyRouter, RequestExecutor};
use crate::connection::{MqttSession, SessionConfig};
use crate::error::Result;
use crate::transport::BusTransport;
use farmbot_shared::{limits, Command, Coordinate};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Serialized access to one device
pub struct FarmbotClient<T: BusTransport> {
    executor: Mutex<RequestExecutor<T>>,
    transport: Arc<T>,
}

impl FarmbotClient<MqttSession> {
    /// Connect to the broker and build a client for `session.device_id`
    pub fn connect(session: SessionConfig, config: ExecutorConfig) -> Self {
        let tracker = Arc::new(CorrelationTracker::new());
        let router = ReplyRouter::new(&session.device_id, tracker.clone());
        let device_id = session.device_id.clone();
        let transport = Arc::new(MqttSession::connect(session, router));
        Self::with_transport(transport, tracker, &device_id, config)
    }
}

impl<T: BusTransport> FarmbotClient<T> {
    /// Build a client over an existing transport.
    ///
    /// `tracker` must be the one the transport's reply router resolves.
    pub fn with_transport(
        transport: Arc<T>,
        tracker: Arc<CorrelationTracker>,
        device_id: &str,
        config: ExecutorConfig,
    ) -> Self {
        let executor = RequestExecutor::new(transport.clone(), tracker, device_id, config);
        Self {
            executor: Mutex::new(executor),
            transport,
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Move to an absolute position at default speed
    pub async fn move_to(&self, x: f64, y: f64, z: f64) -> Result<bool> {
        self.move_to_with_speed(x, y, z, limits::DEFAULT_SPEED).await
    }

    /// Move to an absolute position; each axis is clamped to the device envelope
    pub async fn move_to_with_speed(&self, x: f64, y: f64, z: f64, speed: u32) -> Result<bool> {
        let target = Coordinate::clamped(x, y, z);
        let status_ok = self
            .run(|| vec![encoder::encode_move(target.x, target.y, target.z, speed)])
            .await?;
        info!("MOVE ({},{},{}) [{}]", target.x, target.y, target.z, status_ok);
        Ok(status_ok)
    }

    /// Ask the device to capture a photo
    pub async fn take_photo(&self) -> Result<bool> {
        let status_ok = self.run(|| vec![encoder::encode_photo()]).await?;
        info!("TAKE_PHOTO [{}]", status_ok);
        Ok(status_ok)
    }

    /// Run an arbitrary command sequence as one request
    pub async fn run<F>(&self, build: F) -> Result<bool>
    where
        F: FnMut() -> Vec<Command> + Send,
    {
        let executor = self.executor.lock().await;
        executor.execute_default(build).await
    }

    /// Release the transport
    pub async fn shutdown(&self) -> Result<()> {
        self.transport.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Delivery, LoopbackBus};
    use farmbot_shared::{state_machine::SessionState, RpcReply, RpcRequest};
    use std::time::Duration;

    const DEVICE: &str = "device_9";

    fn client(kind: &str) -> FarmbotClient<LoopbackBus> {
        let tracker = Arc::new(CorrelationTracker::new());
        let bus = Arc::new(LoopbackBus::always(
            ReplyRouter::new(DEVICE, tracker.clone()),
            kind,
        ));
        FarmbotClient::with_transport(bus, tracker, DEVICE, ExecutorConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_publishes_clamped_target() {
        let client = client(RpcReply::OK);

        assert!(client.move_to(-20.0, 500.0, 9999.0).await.unwrap());

        let published = client.transport().published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "bot/device_9/from_clients");
        match &published[0].request.body[0] {
            Command::MoveAbsolute {
                location, speed, ..
            } => {
                assert_eq!(location.coordinate(), Coordinate::new(0.0, 500.0, limits::MAX_Z));
                assert_eq!(*speed, limits::DEFAULT_SPEED);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_photo_reports_failure_as_false() {
        let client = client(RpcReply::ERROR);

        assert!(!client.take_photo().await.unwrap());
        assert_eq!(client.transport().published().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_serialized() {
        let reply_after = Duration::from_secs(10);
        let tracker = Arc::new(CorrelationTracker::new());
        let router = ReplyRouter::new(DEVICE, tracker.clone());
        let topic = router.reply_topic().to_string();
        let bus = Arc::new(LoopbackBus::new(
            router,
            Box::new(move |request: &RpcRequest| {
                let reply = RpcReply::ok(request.label());
                vec![Delivery::reply(topic.clone(), &reply).after(reply_after)]
            }),
        ));
        let client = Arc::new(FarmbotClient::with_transport(
            bus,
            tracker,
            DEVICE,
            ExecutorConfig::default(),
        ));

        let a = {
            let client = client.clone();
            tokio::spawn(async move { client.move_to(1.0, 1.0, 1.0).await })
        };
        let b = {
            let client = client.clone();
            tokio::spawn(async move { client.take_photo().await })
        };

        assert!(a.await.unwrap().unwrap());
        assert!(b.await.unwrap().unwrap());

        let published = client.transport().published().await;
        assert_eq!(published.len(), 2);
        assert_ne!(published[0].request.label(), published[1].request.label());
        // The second request goes out only once the first has its reply
        assert!(published[1].at - published[0].at >= reply_after);
    }

    #[tokio::test]
    async fn test_shutdown_releases_transport() {
        let client = client(RpcReply::OK);
        client.shutdown().await.unwrap();

        assert_eq!(client.transport().state(), SessionState::Disconnected);
        let result = client.run(|| vec![encoder::encode_photo()]).await;
        assert!(matches!(result, Err(crate::RpcError::SessionClosed)));
    }
}
