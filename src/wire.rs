//! Move-delta message and its protobuf codec for the delta channel.

#[cfg(test)]
#[path = "wire_test.rs"]
mod wire_test;

use prost::Message;
use serde::Serialize;
use uuid::Uuid;

use crate::error::CodecError;
use crate::model::{ClientId, ObjectId};

/// Relative translation of a set of objects, broadcast during a drag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveDeltaMessage {
    pub sender_id: ClientId,
    pub object_ids: Vec<ObjectId>,
    pub dx: f64,
    pub dy: f64,
}

impl MoveDeltaMessage {
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.dx == 0.0 && self.dy == 0.0
    }
}

/// Encode a move-delta into protobuf bytes.
#[must_use]
pub fn encode_move_delta(message: &MoveDeltaMessage) -> Vec<u8> {
    WireMoveDelta {
        sender_id: message.sender_id.to_string(),
        object_ids: message.object_ids.iter().map(ToString::to_string).collect(),
        dx: message.dx,
        dy: message.dy,
    }
    .encode_to_vec()
}

/// Decode protobuf bytes into a move-delta.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes and
/// [`CodecError::InvalidId`] when an id is not a UUID.
pub fn decode_move_delta(bytes: &[u8]) -> Result<MoveDeltaMessage, CodecError> {
    let wire = WireMoveDelta::decode(bytes)?;
    Ok(MoveDeltaMessage {
        sender_id: parse_id(&wire.sender_id)?,
        object_ids: wire.object_ids.iter().map(|id| parse_id(id)).collect::<Result<_, _>>()?,
        dx: wire.dx,
        dy: wire.dy,
    })
}

fn parse_id(raw: &str) -> Result<Uuid, CodecError> {
    Uuid::parse_str(raw).map_err(|_| CodecError::InvalidId(raw.to_owned()))
}

#[derive(Clone, PartialEq, Message)]
struct WireMoveDelta {
    #[prost(string, tag = "1")]
    sender_id: String,
    #[prost(string, repeated, tag = "2")]
    object_ids: Vec<String>,
    #[prost(double, tag = "3")]
    dx: f64,
    #[prost(double, tag = "4")]
    dy: f64,
}
