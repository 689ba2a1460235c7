//! Session and Request State Machines
//!
//! Defines the lifecycle of a broker session and of one logical RPC call.

/// Lifecycle of a broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    /// Connected and subscribed to the reply topic
    Connected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
        }
    }
}

/// Check if a session may move from one state to another.
///
/// `Disconnected` is only reachable through an explicit shutdown, which the
/// caller requests; nothing reconnects on its own.
pub fn is_valid_session_transition(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;

    match (from, to) {
        (a, b) if a == b => true,
        (Disconnected, Connecting) => true,
        (Connecting, Connected) => true,
        (_, Disconnected) => true,
        _ => false,
    }
}

/// States of one logical request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    AwaitingConnection,
    RequestSent,
    Succeeded,
    Retrying,
    FatalFailure,
    AttemptsExhausted,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Succeeded | RequestState::FatalFailure | RequestState::AttemptsExhausted
        )
    }
}

/// Events that drive a request through its states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEvent {
    /// A new attempt begins
    AttemptStarted,
    /// No attempts remain
    BudgetSpent,
    /// Session never became ready
    ConnectionTimedOut,
    /// Request handed to the transport
    Published,
    /// Could not hand the request to the transport
    PublishFailed,
    ReplyOk,
    ReplyError,
    ReplyTimedOut,
    /// Reply kind the protocol does not define
    ReplyUnexpected,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(RequestState),
    /// Transition was invalid from current state
    Invalid { from: RequestState, event: RequestEvent },
}

/// Tracks one logical request across its attempts
#[derive(Debug)]
pub struct RequestStateMachine {
    current_state: RequestState,
    attempts_started: u32,
}

impl Default for RequestStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestStateMachine {
    /// Create a new state machine in Idle state
    pub fn new() -> Self {
        Self {
            current_state: RequestState::Idle,
            attempts_started: 0,
        }
    }

    /// Get current state
    pub fn state(&self) -> RequestState {
        self.current_state
    }

    /// Number of attempts begun so far
    pub fn attempts_started(&self) -> u32 {
        self.attempts_started
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: RequestEvent) -> TransitionResult {
        match self.next_state(event) {
            Some(state) => {
                if event == RequestEvent::AttemptStarted {
                    self.attempts_started += 1;
                }
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    fn next_state(&self, event: RequestEvent) -> Option<RequestState> {
        use RequestEvent::*;
        use RequestState::*;

        match (self.current_state, event) {
            (Idle | Retrying, AttemptStarted) => Some(AwaitingConnection),
            (Idle | Retrying, BudgetSpent) => Some(AttemptsExhausted),

            (AwaitingConnection, Published) => Some(RequestSent),
            (AwaitingConnection, ConnectionTimedOut | PublishFailed) => Some(FatalFailure),

            (RequestSent, ReplyOk) => Some(Succeeded),
            (RequestSent, ReplyError | ReplyTimedOut) => Some(Retrying),
            (RequestSent, ReplyUnexpected) => Some(FatalFailure),

            _ => None,
        }
    }
}
