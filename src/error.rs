//! Error taxonomy for the sync engine.
//!
//! DESIGN
//! ======
//! None of these errors is fatal. Store failures are logged and not retried
//! (the optimistic local state already reflects the intent), malformed remote
//! payloads are dropped, and lock denials clear the selection. Callers log
//! with the grepable `error_code()` so operators can correlate failures.

#[cfg(test)]
#[path = "error_test.rs"]
mod error_test;

use uuid::Uuid;

use crate::model::ObjectId;

/// Grepable error code and retryable flag for structured logs.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Failure talking to the document store, lock store, or delta channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("board not found: {0}")]
    BoardNotFound(Uuid),
    #[error("subscription closed")]
    Closed,
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "E_STORE_UNAVAILABLE",
            Self::BoardNotFound(_) => "E_BOARD_NOT_FOUND",
            Self::Closed => "E_SUBSCRIPTION_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Closed)
    }
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// A document payload that cannot be turned into a canvas object.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("payload id {payload} does not match document id {document}")]
    IdMismatch { document: ObjectId, payload: ObjectId },
}

impl ErrorCode for PayloadError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "E_MALFORMED_PAYLOAD",
            Self::IdMismatch { .. } => "E_PAYLOAD_ID_MISMATCH",
        }
    }
}

// =============================================================================
// EDIT
// =============================================================================

/// A local edit request that does not apply to the current index.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EditError {
    #[error("object not found: {0}")]
    NotFound(ObjectId),
    #[error("object is not a connector: {0}")]
    NotAConnector(ObjectId),
    #[error("object is not a container: {0}")]
    NotAContainer(ObjectId),
    #[error("waypoint index {index} out of range (len {len})")]
    WaypointOutOfRange { index: usize, len: usize },
    #[error("connector cannot attach to {0}")]
    InvalidAttachTarget(ObjectId),
    #[error("nothing to group")]
    EmptyGroup,
}

impl ErrorCode for EditError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_OBJECT_NOT_FOUND",
            Self::NotAConnector(_) => "E_NOT_A_CONNECTOR",
            Self::NotAContainer(_) => "E_NOT_A_CONTAINER",
            Self::WaypointOutOfRange { .. } => "E_WAYPOINT_OUT_OF_RANGE",
            Self::InvalidAttachTarget(_) => "E_INVALID_ATTACH_TARGET",
            Self::EmptyGroup => "E_EMPTY_GROUP",
        }
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Error returned when decoding a move-delta from the wire.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to decode move delta: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("invalid id on the wire: {0}")]
    InvalidId(String),
}

impl ErrorCode for CodecError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "E_DELTA_DECODE",
            Self::InvalidId(_) => "E_DELTA_INVALID_ID",
        }
    }
}
