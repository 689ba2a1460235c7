//! Request executor - turns a publish/subscribe link into a bounded,
//! retrying, one-in-flight call

use super::encoder;
use super::tracker::CorrelationTracker;
use crate::error::{AttemptFailure, Result, RpcError};
use crate::transport::BusTransport;
use farmbot_shared::{
    codec, limits,
    state_machine::{RequestEvent, RequestStateMachine, TransitionResult},
    topics, Command, Outcome,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Timing and retry policy for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Attempts per call when the caller does not pass its own budget
    pub max_attempts: u32,
    /// How long the session may take to become ready before a call fails
    pub ready_timeout: Duration,
    /// How long one attempt waits for its reply
    pub reply_timeout: Duration,
    /// Pause after the device reports an error
    pub error_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: limits::MAX_ATTEMPTS,
            ready_timeout: Duration::from_millis(limits::READY_TIMEOUT_MS),
            reply_timeout: Duration::from_millis(limits::REPLY_TIMEOUT_MS),
            error_backoff: Duration::from_millis(limits::ERROR_BACKOFF_MS),
        }
    }
}

/// Executes requests against one device, one at a time.
///
/// `execute` takes `&self` but must not run concurrently on one instance:
/// the tracker has a single slot. [`FarmbotClient`](crate::FarmbotClient)
/// serializes calls for you.
pub struct RequestExecutor<T: BusTransport> {
    transport: Arc<T>,
    tracker: Arc<CorrelationTracker>,
    request_topic: String,
    config: ExecutorConfig,
}

impl<T: BusTransport> RequestExecutor<T> {
    /// Create an executor publishing to `device_id`'s inbound topic.
    ///
    /// `tracker` must be the one the transport's reply router resolves.
    pub fn new(
        transport: Arc<T>,
        tracker: Arc<CorrelationTracker>,
        device_id: &str,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            transport,
            tracker,
            request_topic: topics::from_clients(device_id),
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Run one logical call with the configured attempt budget
    pub async fn execute_default<F>(&self, build: F) -> Result<bool>
    where
        F: FnMut() -> Vec<Command> + Send,
    {
        self.execute(build, self.config.max_attempts).await
    }

    /// Run one logical call of up to `max_attempts` attempts.
    ///
    /// `build` is invoked once per attempt; each attempt gets a fresh
    /// correlation id. Returns `Ok(true)` on success and `Ok(false)` once the
    /// budget is spent on timeouts and device errors. Connection timeouts and
    /// replies of unknown kind are returned as errors without retrying.
    pub async fn execute<F>(&self, mut build: F, max_attempts: u32) -> Result<bool>
    where
        F: FnMut() -> Vec<Command> + Send,
    {
        let mut fsm = RequestStateMachine::new();
        let mut attempts_left = max_attempts;

        loop {
            if attempts_left == 0 {
                advance(&mut fsm, RequestEvent::BudgetSpent);
                error!(
                    "< request to {} OUT OF RETRIES after {} attempts",
                    self.request_topic,
                    fsm.attempts_started()
                );
                return Ok(false);
            }

            advance(&mut fsm, RequestEvent::AttemptStarted);

            if let Err(e) = self.transport.await_ready(self.config.ready_timeout).await {
                advance(&mut fsm, RequestEvent::ConnectionTimedOut);
                error!("Session on {} not ready: {}", self.transport.name(), e);
                return Err(e);
            }

            let label = Uuid::new_v4().to_string();
            self.tracker.begin(&label);

            let request = encoder::wrap(&label, build());
            let sent = match codec::encode_request(&request) {
                Ok(payload) => {
                    debug!(
                        "> request {} {:?} attempts_left={}",
                        label,
                        request.body.iter().map(Command::name).collect::<Vec<_>>(),
                        attempts_left
                    );
                    self.transport.publish(&self.request_topic, payload).await
                }
                Err(e) => Err(RpcError::from(e)),
            };

            if let Err(e) = sent {
                advance(&mut fsm, RequestEvent::PublishFailed);
                self.tracker.clear();
                error!("Failed to publish request {}: {}", label, e);
                return Err(e);
            }
            advance(&mut fsm, RequestEvent::Published);

            let outcome = self.tracker.wait(&label, self.config.reply_timeout).await;
            self.tracker.clear();

            match outcome {
                Outcome::Pending => {
                    advance(&mut fsm, RequestEvent::ReplyTimedOut);
                    let failure = AttemptFailure::RequestTimeout {
                        label,
                        waited: self.config.reply_timeout,
                    };
                    warn!("< request TIMEOUT: {}", failure);
                }
                Outcome::Ok => {
                    advance(&mut fsm, RequestEvent::ReplyOk);
                    debug!("< request OK {}", label);
                    return Ok(true);
                }
                Outcome::Error => {
                    advance(&mut fsm, RequestEvent::ReplyError);
                    let failure = AttemptFailure::RemoteError { label };
                    warn!("< request ERROR: {}", failure);
                    tokio::time::sleep(self.config.error_backoff).await;
                }
                Outcome::Unexpected(kind) => {
                    advance(&mut fsm, RequestEvent::ReplyUnexpected);
                    error!("< unexpected reply kind [{}] for {}", kind, label);
                    return Err(RpcError::ProtocolViolation { kind, label });
                }
            }

            attempts_left -= 1;
        }
    }
}

fn advance(fsm: &mut RequestStateMachine, event: RequestEvent) {
    if let TransitionResult::Invalid { from, event } = fsm.process_event(event) {
        warn!("Invalid request transition {:?} on {:?}", from, event);
    }
}
