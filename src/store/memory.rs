//! In-process backend implementing all three store traits.
//!
//! DESIGN
//! ======
//! Boards live in a map behind one async `RwLock`, each with its documents,
//! lock table, and per-feed subscriber lists. Every write is echoed to every
//! document subscriber of the board, including the writer's own
//! subscription, matching how a hosted document store behaves. Move-deltas
//! fan out with `try_send`: a full subscriber queue drops the message.
//!
//! The hub also counts writes per object and can be told to fail the next N
//! writes or lock acquires, which is how tests exercise the failure paths.

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

use super::{
    DeltaChannel, Document, DocumentStore, LockEvent, LockGrant, LockRecord, LockStore, StoreEvent, WriteOp, unix_millis,
};
use crate::error::StoreError;
use crate::model::{BoardId, ObjectId, UserId};

/// Per-subscriber queue depth for move-delta fan-out.
const DELTA_QUEUE_CAPACITY: usize = 256;

#[derive(Default)]
struct BoardState {
    documents: HashMap<ObjectId, Document>,
    document_subscribers: Vec<mpsc::UnboundedSender<StoreEvent>>,
    locks: HashMap<ObjectId, LockRecord>,
    lock_subscribers: Vec<mpsc::UnboundedSender<LockEvent>>,
    delta_subscribers: Vec<mpsc::Sender<Vec<u8>>>,
    write_counts: HashMap<ObjectId, usize>,
    batch_count: usize,
    last_updated_at: i64,
}

impl BoardState {
    fn next_timestamp(&mut self) -> i64 {
        self.last_updated_at = unix_millis().max(self.last_updated_at + 1);
        self.last_updated_at
    }

    fn apply(&mut self, board_id: BoardId, op: WriteOp) -> StoreEvent {
        *self.write_counts.entry(op.object_id()).or_default() += 1;
        match op {
            WriteOp::Upsert { object_id, payload } => {
                let updated_at = self.next_timestamp();
                let doc = Document { board_id, object_id, payload, updated_at };
                match self.documents.insert(object_id, doc.clone()) {
                    Some(_) => StoreEvent::Changed(doc),
                    None => StoreEvent::Added(doc),
                }
            }
            WriteOp::Delete { object_id } => {
                self.documents.remove(&object_id);
                StoreEvent::Removed { object_id }
            }
        }
    }

    fn notify_documents(&mut self, events: &[StoreEvent]) {
        self.document_subscribers
            .retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
    }

    fn notify_locks(&mut self, event: &LockEvent) {
        self.lock_subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[derive(Default)]
struct Faults {
    failed_writes: usize,
    failed_acquires: usize,
}

/// Shared in-memory document store, lock store, and delta channel.
#[derive(Clone, Default)]
pub struct MemoryHub {
    boards: Arc<RwLock<HashMap<BoardId, BoardState>>>,
    faults: Arc<RwLock<Faults>>,
}

impl MemoryHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a board. Operations on unknown boards fail with `BoardNotFound`.
    pub async fn create_board(&self, board_id: BoardId) {
        let mut boards = self.boards.write().await;
        boards.entry(board_id).or_default();
        info!(%board_id, "board created");
    }

    /// Make the next `count` document writes fail with `Unavailable`.
    pub async fn fail_next_writes(&self, count: usize) {
        self.faults.write().await.failed_writes = count;
    }

    /// Make the next `count` lock acquires fail with `Unavailable`.
    pub async fn fail_next_acquires(&self, count: usize) {
        self.faults.write().await.failed_acquires = count;
    }

    /// Number of persisted writes (upserts and deletes) that touched `object_id`.
    pub async fn write_count(&self, board_id: BoardId, object_id: ObjectId) -> usize {
        let boards = self.boards.read().await;
        boards
            .get(&board_id)
            .and_then(|board| board.write_counts.get(&object_id).copied())
            .unwrap_or(0)
    }

    /// Number of batched writes applied to the board.
    pub async fn batch_count(&self, board_id: BoardId) -> usize {
        let boards = self.boards.read().await;
        boards.get(&board_id).map_or(0, |board| board.batch_count)
    }

    /// Current persisted document for an object.
    pub async fn document(&self, board_id: BoardId, object_id: ObjectId) -> Option<Document> {
        let boards = self.boards.read().await;
        boards.get(&board_id).and_then(|board| board.documents.get(&object_id).cloned())
    }

    /// Current lock holder for an object.
    pub async fn lock_holder(&self, board_id: BoardId, object_id: ObjectId) -> Option<LockRecord> {
        let boards = self.boards.read().await;
        boards.get(&board_id).and_then(|board| board.locks.get(&object_id).cloned())
    }

    async fn take_write_fault(&self) -> Result<(), StoreError> {
        let mut faults = self.faults.write().await;
        if faults.failed_writes > 0 {
            faults.failed_writes -= 1;
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }

    async fn take_acquire_fault(&self) -> Result<(), StoreError> {
        let mut faults = self.faults.write().await;
        if faults.failed_acquires > 0 {
            faults.failed_acquires -= 1;
            return Err(StoreError::Unavailable("injected acquire failure".into()));
        }
        Ok(())
    }

    async fn write(&self, board_id: BoardId, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        self.take_write_fault().await?;
        let mut boards = self.boards.write().await;
        let board = boards.get_mut(&board_id).ok_or(StoreError::BoardNotFound(board_id))?;
        let events: Vec<StoreEvent> = ops.into_iter().map(|op| board.apply(board_id, op)).collect();
        board.notify_documents(&events);
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryHub {
    async fn upsert(&self, board_id: BoardId, object_id: ObjectId, payload: serde_json::Value) -> Result<(), StoreError> {
        self.write(board_id, vec![WriteOp::Upsert { object_id, payload }]).await
    }

    async fn delete(&self, board_id: BoardId, object_id: ObjectId) -> Result<(), StoreError> {
        self.write(board_id, vec![WriteOp::Delete { object_id }]).await
    }

    async fn batch(&self, board_id: BoardId, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let count = ops.len();
        self.write(board_id, ops).await?;
        let mut boards = self.boards.write().await;
        if let Some(board) = boards.get_mut(&board_id) {
            board.batch_count += 1;
        }
        debug!(%board_id, count, "batch applied");
        Ok(())
    }

    async fn subscribe(&self, board_id: BoardId) -> Result<mpsc::UnboundedReceiver<StoreEvent>, StoreError> {
        let mut boards = self.boards.write().await;
        let board = boards.get_mut(&board_id).ok_or(StoreError::BoardNotFound(board_id))?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut documents: Vec<&Document> = board.documents.values().collect();
        documents.sort_by_key(|doc| (doc.updated_at, doc.object_id));
        let mut initial = vec![StoreEvent::BulkLoadStart];
        initial.extend(documents.into_iter().map(|doc| StoreEvent::Added(doc.clone())));
        initial.push(StoreEvent::BulkLoadComplete);
        for event in initial {
            tx.send(event).map_err(|_| StoreError::Closed)?;
        }

        board.document_subscribers.push(tx);
        Ok(rx)
    }
}

#[async_trait::async_trait]
impl LockStore for MemoryHub {
    async fn acquire(&self, board_id: BoardId, record: LockRecord) -> Result<LockGrant, StoreError> {
        self.take_acquire_fault().await?;
        let mut boards = self.boards.write().await;
        let board = boards.get_mut(&board_id).ok_or(StoreError::BoardNotFound(board_id))?;
        if let Some(holder) = board.locks.get(&record.object_id)
            && holder.user_id != record.user_id
        {
            return Ok(LockGrant::Denied { holder: holder.clone() });
        }
        board.locks.insert(record.object_id, record.clone());
        board.notify_locks(&LockEvent::Acquired(record));
        Ok(LockGrant::Granted)
    }

    async fn release(&self, board_id: BoardId, object_id: ObjectId, user_id: UserId) -> Result<(), StoreError> {
        let mut boards = self.boards.write().await;
        let board = boards.get_mut(&board_id).ok_or(StoreError::BoardNotFound(board_id))?;
        if board.locks.get(&object_id).is_some_and(|holder| holder.user_id == user_id) {
            board.locks.remove(&object_id);
            board.notify_locks(&LockEvent::Released { object_id, user_id });
        }
        Ok(())
    }

    async fn release_all(&self, board_id: BoardId, user_id: UserId) -> Result<usize, StoreError> {
        let mut boards = self.boards.write().await;
        let board = boards.get_mut(&board_id).ok_or(StoreError::BoardNotFound(board_id))?;
        let held: Vec<ObjectId> =
            board.locks.values().filter(|record| record.user_id == user_id).map(|record| record.object_id).collect();
        for object_id in &held {
            board.locks.remove(object_id);
            board.notify_locks(&LockEvent::Released { object_id: *object_id, user_id });
        }
        Ok(held.len())
    }

    async fn subscribe(&self, board_id: BoardId) -> Result<mpsc::UnboundedReceiver<LockEvent>, StoreError> {
        let mut boards = self.boards.write().await;
        let board = boards.get_mut(&board_id).ok_or(StoreError::BoardNotFound(board_id))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let snapshot = board.locks.values().cloned().collect();
        tx.send(LockEvent::Snapshot(snapshot)).map_err(|_| StoreError::Closed)?;
        board.lock_subscribers.push(tx);
        Ok(rx)
    }
}

#[async_trait::async_trait]
impl DeltaChannel for MemoryHub {
    async fn publish(&self, board_id: BoardId, message: Vec<u8>) -> Result<(), StoreError> {
        let mut boards = self.boards.write().await;
        let board = boards.get_mut(&board_id).ok_or(StoreError::BoardNotFound(board_id))?;
        // Best-effort: a full queue drops the message, a closed one is pruned.
        board.delta_subscribers.retain(|tx| !matches!(tx.try_send(message.clone()), Err(TrySendError::Closed(_))));
        Ok(())
    }

    async fn subscribe(&self, board_id: BoardId) -> Result<mpsc::Receiver<Vec<u8>>, StoreError> {
        let mut boards = self.boards.write().await;
        let board = boards.get_mut(&board_id).ok_or(StoreError::BoardNotFound(board_id))?;
        let (tx, rx) = mpsc::channel(DELTA_QUEUE_CAPACITY);
        board.delta_subscribers.push(tx);
        Ok(rx)
    }
}
