//! External collaborators: the persisted document store, the lock store, and
//! the move-delta channel.
//!
//! DESIGN
//! ======
//! The engine only ever sees these three traits. Subscriptions are plain
//! tokio channels so the client event loop can `select!` over them; writes
//! are async calls issued from a worker, never from the synchronous core.
//! `memory::MemoryHub` is the in-process implementation used by tests and the
//! simulator.

pub mod memory;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::model::{BoardId, ObjectId, UserId};

// =============================================================================
// DOCUMENTS
// =============================================================================

/// Persisted record for one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub board_id: BoardId,
    pub object_id: ObjectId,
    /// Opaque object payload.
    pub payload: serde_json::Value,
    /// Server timestamp of the last write, milliseconds since the Unix epoch.
    pub updated_at: i64,
}

/// Change feed item delivered to subscribers of a board.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Added(Document),
    Changed(Document),
    Removed { object_id: ObjectId },
    BulkLoadStart,
    BulkLoadComplete,
}

/// One entry of a batched write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Upsert { object_id: ObjectId, payload: serde_json::Value },
    Delete { object_id: ObjectId },
}

impl WriteOp {
    #[must_use]
    pub fn object_id(&self) -> ObjectId {
        match self {
            Self::Upsert { object_id, .. } | Self::Delete { object_id } => *object_id,
        }
    }
}

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or overwrite the document for `object_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store rejects or cannot receive the write.
    async fn upsert(&self, board_id: BoardId, object_id: ObjectId, payload: serde_json::Value) -> Result<(), StoreError>;

    /// Delete the document for `object_id`. Deleting a missing document is not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store cannot receive the delete.
    async fn delete(&self, board_id: BoardId, object_id: ObjectId) -> Result<(), StoreError>;

    /// Apply several writes as one atomic batch.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the batch is rejected; no op is applied then.
    async fn batch(&self, board_id: BoardId, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Subscribe to the board's change feed. The feed opens with a bulk load
    /// of the current documents bracketed by `BulkLoadStart`/`BulkLoadComplete`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the subscription cannot be established.
    async fn subscribe(&self, board_id: BoardId) -> Result<mpsc::UnboundedReceiver<StoreEvent>, StoreError>;
}

// =============================================================================
// LOCKS
// =============================================================================

/// Advisory lock held by one user on one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub object_id: ObjectId,
    pub user_id: UserId,
    pub user_name: String,
    pub last_active_at: i64,
}

/// Outcome of a single acquire call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockGrant {
    Granted,
    Denied { holder: LockRecord },
}

/// Lock feed item. Subscribers first receive a `Snapshot`, then point events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    Snapshot(Vec<LockRecord>),
    Acquired(LockRecord),
    Released { object_id: ObjectId, user_id: UserId },
}

#[async_trait::async_trait]
pub trait LockStore: Send + Sync {
    /// Take the lock described by `record` unless another user holds it.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the lock store is unreachable.
    async fn acquire(&self, board_id: BoardId, record: LockRecord) -> Result<LockGrant, StoreError>;

    /// Release `object_id` if `user_id` holds it; otherwise a no-op.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the lock store is unreachable.
    async fn release(&self, board_id: BoardId, object_id: ObjectId, user_id: UserId) -> Result<(), StoreError>;

    /// Release every lock `user_id` holds on the board. Returns how many were released.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the lock store is unreachable.
    async fn release_all(&self, board_id: BoardId, user_id: UserId) -> Result<usize, StoreError>;

    /// # Errors
    ///
    /// Returns a [`StoreError`] if the subscription cannot be established.
    async fn subscribe(&self, board_id: BoardId) -> Result<mpsc::UnboundedReceiver<LockEvent>, StoreError>;
}

// =============================================================================
// MOVE DELTAS
// =============================================================================

/// Fire-and-forget, unpersisted, unordered broadcast of encoded move-deltas.
#[async_trait::async_trait]
pub trait DeltaChannel: Send + Sync {
    /// Publish to every subscriber of the board. Slow subscribers miss messages.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the channel is unreachable.
    async fn publish(&self, board_id: BoardId, message: Vec<u8>) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns a [`StoreError`] if the subscription cannot be established.
    async fn subscribe(&self, board_id: BoardId) -> Result<mpsc::Receiver<Vec<u8>>, StoreError>;
}

/// Wall-clock milliseconds since the Unix epoch.
#[must_use]
pub fn unix_millis() -> i64 {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
}
