//! Error types for the RPC client

use farmbot_shared::codec::CodecError;
use std::time::Duration;
use thiserror::Error;

/// Errors a caller must handle; transient failures never surface here
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Session not connected after {0:?}")]
    ConnectionTimeout(Duration),

    #[error("Protocol violation: unexpected reply kind '{kind}' for request {label}")]
    ProtocolViolation { kind: String, label: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single attempt ended without success; absorbed by the retry loop
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttemptFailure {
    #[error("no reply to {label} within {waited:?}")]
    RequestTimeout { label: String, waited: Duration },

    #[error("device reported an error for {label}")]
    RemoteError { label: String },
}

pub type Result<T> = std::result::Result<T, RpcError>;
