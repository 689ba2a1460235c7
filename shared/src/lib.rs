//! FarmBot Shared Protocol Types
//!
//! This crate provides the wire documents, codec and state machines shared
//! between the RPC client and the simulated device.

pub mod codec;
pub mod state_machine;

use serde::{Deserialize, Serialize};

/// Device envelope and RPC timing parameters
pub mod limits {
    /// Largest reachable X position (mm)
    pub const MAX_X: f64 = 2400.0;

    /// Largest reachable Y position (mm)
    pub const MAX_Y: f64 = 1200.0;

    /// Largest reachable Z position (mm)
    pub const MAX_Z: f64 = 469.0;

    /// Speed used when a move does not name one (percent of max)
    pub const DEFAULT_SPEED: u32 = 100;

    /// Attempts per logical request before giving up
    pub const MAX_ATTEMPTS: u32 = 3;

    /// How long one attempt waits for its reply
    pub const REPLY_TIMEOUT_MS: u64 = 60_000;

    /// Pause after the device reports an error, before the next attempt
    pub const ERROR_BACKOFF_MS: u64 = 1_000;

    /// How long a request waits for the session to become ready
    pub const READY_TIMEOUT_MS: u64 = 60_000;
}

/// Topic naming on the broker
pub mod topics {
    /// Label the device uses on liveness replies
    pub const PING_LABEL: &str = "ping";

    /// Topic the client publishes requests on
    pub fn from_clients(device_id: &str) -> String {
        format!("bot/{}/from_clients", device_id)
    }

    /// Topic the device publishes replies on
    pub fn from_device(device_id: &str) -> String {
        format!("bot/{}/from_device", device_id)
    }
}

/// Clamp `value` into `[min, max]`.
///
/// Out-of-range values snap to the nearer bound; in-range values pass through.
pub fn clamp<T: PartialOrd>(value: T, min: T, max: T) -> T {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

fn clamp_axis(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        clamp(value, 0.0, max)
    }
}

/// A point in device space (mm)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Origin, also used as the zero offset of a move
    pub fn zero() -> Self {
        Self::default()
    }

    /// Build a coordinate with each axis clamped to the device envelope
    ///
    /// NaN has no place on the axis and maps to the lower bound.
    pub fn clamped(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: clamp_axis(x, limits::MAX_X),
            y: clamp_axis(y, limits::MAX_Y),
            z: clamp_axis(z, limits::MAX_Z),
        }
    }

    /// Check whether every axis lies inside the device envelope
    pub fn within_envelope(&self) -> bool {
        (0.0..=limits::MAX_X).contains(&self.x)
            && (0.0..=limits::MAX_Y).contains(&self.y)
            && (0.0..=limits::MAX_Z).contains(&self.z)
    }
}

/// Coordinate node as it appears on the wire: `{"kind":"coordinate","args":{..}}`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "args", rename_all = "snake_case")]
pub enum Location {
    Coordinate(Coordinate),
}

impl From<Coordinate> for Location {
    fn from(c: Coordinate) -> Self {
        Location::Coordinate(c)
    }
}

impl Location {
    pub fn coordinate(&self) -> Coordinate {
        match self {
            Location::Coordinate(c) => *c,
        }
    }
}

/// One step in the body of an RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "args", rename_all = "snake_case")]
pub enum Command {
    MoveAbsolute {
        location: Location,
        offset: Location,
        speed: u32,
    },
    TakePhoto {},
}

impl Command {
    /// Short name used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            Command::MoveAbsolute { .. } => "move_absolute",
            Command::TakePhoto {} => "take_photo",
        }
    }
}

/// Arguments of an RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestArgs {
    pub label: String,
}

/// Outbound request document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename = "rpc_request")]
pub struct RpcRequest {
    pub args: RequestArgs,
    pub body: Vec<Command>,
}

impl RpcRequest {
    /// The correlation id this request carries
    pub fn label(&self) -> &str {
        &self.args.label
    }
}

/// Arguments of an inbound reply
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReplyArgs {
    #[serde(default)]
    pub label: Option<String>,
}

/// Inbound reply document. `kind` is kept as a string so unknown kinds survive decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcReply {
    pub kind: String,
    #[serde(default)]
    pub args: ReplyArgs,
}

impl RpcReply {
    pub const OK: &'static str = "rpc_ok";
    pub const ERROR: &'static str = "rpc_error";

    /// Create a reply for the given label
    pub fn new(kind: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            args: ReplyArgs {
                label: Some(label.into()),
            },
        }
    }

    /// Create a successful-completion reply
    pub fn ok(label: impl Into<String>) -> Self {
        Self::new(Self::OK, label)
    }

    /// Create a failure reply
    pub fn error(label: impl Into<String>) -> Self {
        Self::new(Self::ERROR, label)
    }

    /// Create a liveness reply
    pub fn ping() -> Self {
        Self::new(Self::OK, topics::PING_LABEL)
    }

    pub fn label(&self) -> Option<&str> {
        self.args.label.as_deref()
    }

    /// Liveness traffic carries no correlation semantics
    pub fn is_ping(&self) -> bool {
        self.kind == topics::PING_LABEL || self.label() == Some(topics::PING_LABEL)
    }

    /// Map the reply kind onto a request outcome
    pub fn outcome(&self) -> Outcome {
        match self.kind.as_str() {
            Self::OK => Outcome::Ok,
            Self::ERROR => Outcome::Error,
            other => Outcome::Unexpected(other.to_string()),
        }
    }
}

/// State of the request currently being tracked
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Outcome {
    #[default]
    Pending,
    Ok,
    Error,
    /// Reply kind the protocol does not define
    Unexpected(String),
}

impl Outcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Pending => write!(f, "pending"),
            Outcome::Ok => write!(f, "ok"),
            Outcome::Error => write!(f, "error"),
            Outcome::Unexpected(kind) => write!(f, "unexpected({})", kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_bounds() {
        assert_eq!(clamp(-5, 0, 2400), 0);
        assert_eq!(clamp(3000, 0, 2400), 2400);
        assert_eq!(clamp(100, 0, 2400), 100);
        assert_eq!(clamp(0, 0, 2400), 0);
        assert_eq!(clamp(2400, 0, 2400), 2400);
    }

    #[test]
    fn test_clamp_always_in_range() {
        for v in (-5000..5000).step_by(37) {
            let c = clamp(v, 0, 1200);
            assert!((0..=1200).contains(&c));
            if (0..=1200).contains(&v) {
                assert_eq!(c, v);
            }
        }
    }

    #[test]
    fn test_coordinate_clamped_to_envelope() {
        let c = Coordinate::clamped(-10.0, 5000.0, 469.5);
        assert_eq!(c, Coordinate::new(0.0, limits::MAX_Y, limits::MAX_Z));
        assert!(c.within_envelope());
        assert!(!Coordinate::new(2401.0, 0.0, 0.0).within_envelope());
    }

    #[test]
    fn test_non_finite_axes_land_inside_envelope() {
        let c = Coordinate::clamped(f64::NAN, f64::INFINITY, f64::NEG_INFINITY);
        assert_eq!(c, Coordinate::new(0.0, limits::MAX_Y, 0.0));
        assert!(c.within_envelope());
    }

    #[test]
    fn test_topics() {
        assert_eq!(topics::from_clients("device_7"), "bot/device_7/from_clients");
        assert_eq!(topics::from_device("device_7"), "bot/device_7/from_device");
    }

    #[test]
    fn test_reply_outcome_mapping() {
        assert_eq!(RpcReply::ok("a").outcome(), Outcome::Ok);
        assert_eq!(RpcReply::error("a").outcome(), Outcome::Error);
        assert_eq!(
            RpcReply::new("rpc_weird", "a").outcome(),
            Outcome::Unexpected("rpc_weird".into())
        );
    }

    #[test]
    fn test_ping_detection() {
        assert!(RpcReply::ping().is_ping());
        assert!(RpcReply::new("ping", "x").is_ping());
        assert!(!RpcReply::ok("abc").is_ping());
    }
}
