//! Connection management for the broker session
//!
//! This module handles:
//! - Authenticating to the broker with the device credentials
//! - Subscribing to the device's reply topic on every connect
//! - Exposing readiness to request executors
//! - Deterministic shutdown

mod session;

pub use session::{MqttSession, SessionConfig};
