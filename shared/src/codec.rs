//! JSON codec for broker payloads
//!
//! Every MQTT message carries exactly one JSON document, so there is no
//! framing layer: one publish is one request or one reply.

use bytes::Bytes;
use thiserror::Error;

use crate::{RpcReply, RpcRequest};

/// Maximum payload size (1 MB) accepted from the broker
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("Empty payload")]
    Empty,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a request into a publishable payload
pub fn encode_request(request: &RpcRequest) -> Result<Bytes, CodecError> {
    encode(request)
}

/// Encode a reply into a publishable payload
pub fn encode_reply(reply: &RpcReply) -> Result<Bytes, CodecError> {
    encode(reply)
}

/// Decode a request received on the device's inbound topic
pub fn decode_request(payload: &[u8]) -> Result<RpcRequest, CodecError> {
    check_size(payload)?;
    Ok(serde_json::from_slice(payload)?)
}

/// Decode a reply received on the device's outbound topic
pub fn decode_reply(payload: &[u8]) -> Result<RpcReply, CodecError> {
    check_size(payload)?;
    Ok(serde_json::from_slice(payload)?)
}

fn encode<T: serde::Serialize>(doc: &T) -> Result<Bytes, CodecError> {
    let buf = serde_json::to_vec(doc)?;
    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge(buf.len()));
    }
    Ok(Bytes::from(buf))
}

fn check_size(payload: &[u8]) -> Result<(), CodecError> {
    if payload.is_empty() {
        return Err(CodecError::Empty);
    }
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::MessageTooLarge(payload.len()));
    }
    Ok(())
}
