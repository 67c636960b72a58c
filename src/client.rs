//! Async board client: drives a [`SyncCore`] against the three external
//! collaborators.
//!
//! DESIGN
//! ======
//! The client owns the core and is driven from one task. Inputs (document
//! feed, lock feed, move-deltas, lock acquire results, throttle deadlines)
//! are multiplexed with `tokio::select!` in `next_event`; every core call
//! returns effects which are executed immediately.
//!
//! Move-deltas are drained ahead of documents: a delta is relative and a
//! document absolute, so when both are waiting the persisted state lands
//! last.
//!
//! I/O never blocks the caller. Writes, lock calls, and delta publishes are
//! queued to three background workers, one per collaborator, so each kind of
//! call reaches its store in issue order. Acquires for one selection run
//! concurrently inside the lock worker and report back as a single result
//! set tagged with the selection ticket.
//!
//! ERROR HANDLING
//! ==============
//! Failed writes are logged and surfaced on the failure channel, never
//! retried. Local state is never rolled back; the next successful write of
//! the object carries the latest state anyway.

#[cfg(test)]
#[path = "client_test.rs"]
mod client_test;

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::SyncConfig;
use crate::error::{EditError, ErrorCode, StoreError};
use crate::geometry::{Geometry, Point};
use crate::latency::LatencySample;
use crate::model::{BoardId, CanvasObject, Endpoint, ObjectId, Port, UserId};
use crate::store::{DeltaChannel, DocumentStore, LockEvent, LockGrant, LockRecord, LockStore, StoreEvent, WriteOp};
use crate::sync::{Effect, Identity, Notice, SyncCore};
use crate::wire::encode_move_delta;

const EVENT_CHANNEL_CAPACITY: usize = 256;

type LockResults = (u64, Vec<(ObjectId, Result<LockGrant, StoreError>)>);

/// Handles to the external collaborators.
#[derive(Clone)]
pub struct Stores {
    pub documents: Arc<dyn DocumentStore>,
    pub locks: Arc<dyn LockStore>,
    pub deltas: Arc<dyn DeltaChannel>,
}

impl Stores {
    /// All three collaborators backed by one implementation.
    pub fn shared<S>(backend: &Arc<S>) -> Self
    where
        S: DocumentStore + LockStore + DeltaChannel + 'static,
    {
        Self { documents: backend.clone(), locks: backend.clone(), deltas: backend.clone() }
    }
}

/// A write batch the store rejected.
#[derive(Debug, Clone)]
pub struct WriteFailure {
    pub object_ids: Vec<ObjectId>,
    pub error: StoreError,
}

enum LockJob {
    Acquire { ticket: u64, records: Vec<LockRecord> },
    Release(Vec<ObjectId>),
    ReleaseAll,
}

pub struct BoardClient {
    core: SyncCore,
    stores: Stores,
    documents_rx: mpsc::UnboundedReceiver<StoreEvent>,
    locks_rx: mpsc::UnboundedReceiver<LockEvent>,
    deltas_rx: mpsc::Receiver<Vec<u8>>,
    lock_results_rx: mpsc::UnboundedReceiver<LockResults>,
    write_tx: mpsc::UnboundedSender<Vec<WriteOp>>,
    lock_tx: mpsc::UnboundedSender<LockJob>,
    delta_tx: mpsc::UnboundedSender<Vec<u8>>,
    latency_tx: broadcast::Sender<LatencySample>,
    failure_tx: broadcast::Sender<WriteFailure>,
    writer: JoinHandle<()>,
}

impl BoardClient {
    /// Subscribe to the board's feeds and start the background workers.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if any subscription cannot be established.
    pub async fn connect(identity: Identity, config: &SyncConfig, stores: Stores) -> Result<Self, StoreError> {
        let board_id = identity.board_id;
        let documents_rx = stores.documents.subscribe(board_id).await?;
        let locks_rx = stores.locks.subscribe(board_id).await?;
        let deltas_rx = stores.deltas.subscribe(board_id).await?;

        let (failure_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (latency_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (lock_tx, lock_rx) = mpsc::unbounded_channel();
        let (delta_tx, delta_rx) = mpsc::unbounded_channel();
        let (lock_results_tx, lock_results_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(run_writer(board_id, stores.documents.clone(), write_rx, failure_tx.clone()));
        tokio::spawn(run_locker(board_id, identity.user_id, stores.locks.clone(), lock_rx, lock_results_tx));
        tokio::spawn(run_publisher(board_id, stores.deltas.clone(), delta_rx));

        info!(%board_id, user = %identity.user_name, client_id = %identity.client_id, "board client connected");
        Ok(Self {
            core: SyncCore::new(identity, config),
            stores,
            documents_rx,
            locks_rx,
            deltas_rx,
            lock_results_rx,
            write_tx,
            lock_tx,
            delta_tx,
            latency_tx,
            failure_tx,
            writer,
        })
    }

    #[must_use]
    pub fn core(&self) -> &SyncCore {
        &self.core
    }

    #[must_use]
    pub fn get(&self, id: &ObjectId) -> Option<&CanvasObject> {
        self.core.get(id)
    }

    pub fn subscribe_latency(&self) -> broadcast::Receiver<LatencySample> {
        self.latency_tx.subscribe()
    }

    pub fn subscribe_failures(&self) -> broadcast::Receiver<WriteFailure> {
        self.failure_tx.subscribe()
    }

    // =========================================================================
    // EVENT LOOP
    // =========================================================================

    /// Wait for the next input, apply it, and return the resulting notices.
    /// Returns `None` once the document feed has closed.
    pub async fn next_event(&mut self) -> Option<Vec<Notice>> {
        let deadline = self.core.next_deadline();
        let effects = tokio::select! {
            biased;
            Some(bytes) = self.deltas_rx.recv() => self.core.on_delta(&bytes),
            event = self.documents_rx.recv() => {
                let event = event?;
                self.core.on_store_event(event, now())
            }
            Some(event) = self.locks_rx.recv() => self.core.on_lock_event(event, now()),
            Some((ticket, results)) = self.lock_results_rx.recv() => self.core.on_lock_results(ticket, results, now()),
            () = wait_until(deadline) => self.core.tick(now()),
        };
        Some(self.execute(effects))
    }

    /// Apply every input that is already available without waiting, plus any
    /// throttle deadline that has passed.
    pub fn poll_ready(&mut self) -> Vec<Notice> {
        let mut notices = Vec::new();
        loop {
            let effects = if let Ok(bytes) = self.deltas_rx.try_recv() {
                self.core.on_delta(&bytes)
            } else if let Ok(event) = self.documents_rx.try_recv() {
                self.core.on_store_event(event, now())
            } else if let Ok(event) = self.locks_rx.try_recv() {
                self.core.on_lock_event(event, now())
            } else if let Ok((ticket, results)) = self.lock_results_rx.try_recv() {
                self.core.on_lock_results(ticket, results, now())
            } else if self.core.next_deadline().is_some_and(|deadline| deadline <= now()) {
                self.core.tick(now())
            } else {
                break;
            };
            notices.extend(self.execute(effects));
        }
        notices
    }

    /// Flush pending writes, release every lock, and stop the workers.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the lock store rejects the release.
    pub async fn disconnect(mut self) -> Result<(), StoreError> {
        let effects = self.core.shutdown(now());
        let identity = self.core.identity().clone();
        for effect in effects {
            if !matches!(effect, Effect::ReleaseAllLocks) {
                self.execute(vec![effect]);
            }
        }

        // PHASE: DRAIN WRITER
        // WHY: the final flush must land before the locks that guard it are released.
        drop(self.write_tx);
        if let Err(e) = self.writer.await {
            warn!(error = %e, "write worker ended abnormally");
        }

        let released = self.stores.locks.release_all(identity.board_id, identity.user_id).await?;
        info!(board_id = %identity.board_id, released, "board client disconnected");
        Ok(())
    }

    // =========================================================================
    // LOCAL OPERATIONS
    // =========================================================================

    pub fn add(&mut self, obj: CanvasObject) -> Vec<Notice> {
        let effects = self.core.submit_add(obj, now());
        self.execute(effects)
    }

    /// # Errors
    ///
    /// [`EditError::NotFound`] when the object isn't on the board.
    pub fn modify(&mut self, obj: CanvasObject) -> Result<Vec<Notice>, EditError> {
        let effects = self.core.submit_modify(obj, now())?;
        Ok(self.execute(effects))
    }

    /// # Errors
    ///
    /// [`EditError::NotFound`] when the object isn't on the board.
    pub fn remove(&mut self, id: ObjectId) -> Result<Vec<Notice>, EditError> {
        let effects = self.core.submit_remove(id, now())?;
        Ok(self.execute(effects))
    }

    pub fn translate(&mut self, ids: &[ObjectId], dx: f64, dy: f64) -> Vec<Notice> {
        let effects = self.core.submit_translate(ids, dx, dy, now());
        self.execute(effects)
    }

    pub fn begin_transform(&mut self, ids: &[ObjectId]) {
        self.core.begin_transform(ids);
    }

    pub fn end_transform(&mut self) -> Vec<Notice> {
        let effects = self.core.end_transform(now());
        self.execute(effects)
    }

    pub fn select(&mut self, ids: &[ObjectId]) -> Vec<Notice> {
        let effects = self.core.select(ids, now());
        self.execute(effects)
    }

    pub fn deselect(&mut self, ids: &[ObjectId]) -> Vec<Notice> {
        let effects = self.core.deselect(ids, now());
        self.execute(effects)
    }

    pub fn set_selection_container(&mut self, container: Option<Geometry>) {
        self.core.set_selection_container(container);
    }

    pub fn undo(&mut self) -> Vec<Notice> {
        let effects = self.core.undo(now());
        self.execute(effects)
    }

    pub fn redo(&mut self) -> Vec<Notice> {
        let effects = self.core.redo(now());
        self.execute(effects)
    }

    /// # Errors
    ///
    /// See [`SyncCore::group`].
    pub fn group(&mut self, ids: &[ObjectId]) -> Result<(ObjectId, Vec<Notice>), EditError> {
        let (container_id, effects) = self.core.group(ids, now())?;
        Ok((container_id, self.execute(effects)))
    }

    /// # Errors
    ///
    /// See [`SyncCore::ungroup`].
    pub fn ungroup(&mut self, container_id: ObjectId) -> Result<Vec<Notice>, EditError> {
        let effects = self.core.ungroup(container_id, now())?;
        Ok(self.execute(effects))
    }

    /// # Errors
    ///
    /// [`EditError::NotFound`] when the object isn't on the board.
    pub fn bring_to_front(&mut self, id: ObjectId) -> Result<Vec<Notice>, EditError> {
        let effects = self.core.bring_to_front(id, now())?;
        Ok(self.execute(effects))
    }

    /// # Errors
    ///
    /// [`EditError::NotFound`] when the object isn't on the board.
    pub fn send_to_back(&mut self, id: ObjectId) -> Result<Vec<Notice>, EditError> {
        let effects = self.core.send_to_back(id, now())?;
        Ok(self.execute(effects))
    }

    /// # Errors
    ///
    /// [`EditError::NotFound`] when the object isn't on the board.
    pub fn insert_at(&mut self, id: ObjectId, position: usize) -> Result<Vec<Notice>, EditError> {
        let effects = self.core.insert_at(id, position, now())?;
        Ok(self.execute(effects))
    }

    /// # Errors
    ///
    /// See [`SyncCore::move_endpoint`].
    pub fn move_endpoint(
        &mut self,
        connector_id: ObjectId,
        end: Endpoint,
        drop: Point,
        target: Option<ObjectId>,
    ) -> Result<(Option<Port>, Vec<Notice>), EditError> {
        let (port, effects) = self.core.move_endpoint(connector_id, end, drop, target, now())?;
        Ok((port, self.execute(effects)))
    }

    /// # Errors
    ///
    /// See [`SyncCore::insert_waypoint`].
    pub fn insert_waypoint(&mut self, connector_id: ObjectId, segment: usize, at: Point) -> Result<Vec<Notice>, EditError> {
        let effects = self.core.insert_waypoint(connector_id, segment, at, now())?;
        Ok(self.execute(effects))
    }

    /// # Errors
    ///
    /// See [`SyncCore::move_waypoint`].
    pub fn move_waypoint(&mut self, connector_id: ObjectId, waypoint: usize, to: Point) -> Result<Vec<Notice>, EditError> {
        let effects = self.core.move_waypoint(connector_id, waypoint, to, now())?;
        Ok(self.execute(effects))
    }

    /// # Errors
    ///
    /// See [`SyncCore::remove_waypoint`].
    pub fn remove_waypoint(&mut self, connector_id: ObjectId, waypoint: usize) -> Result<Vec<Notice>, EditError> {
        let effects = self.core.remove_waypoint(connector_id, waypoint, now())?;
        Ok(self.execute(effects))
    }

    // =========================================================================
    // EFFECTS
    // =========================================================================

    fn execute(&mut self, effects: Vec<Effect>) -> Vec<Notice> {
        let mut notices = Vec::new();
        for effect in effects {
            match effect {
                Effect::Write(ops) => {
                    if self.write_tx.send(ops).is_err() {
                        warn!("write worker stopped; dropping write");
                    }
                }
                Effect::AcquireLocks { ticket, records } => self.queue_lock_job(LockJob::Acquire { ticket, records }),
                Effect::ReleaseLocks(ids) => self.queue_lock_job(LockJob::Release(ids)),
                Effect::ReleaseAllLocks => self.queue_lock_job(LockJob::ReleaseAll),
                Effect::PublishDelta(message) => {
                    if self.delta_tx.send(encode_move_delta(&message)).is_err() {
                        warn!("delta worker stopped; dropping move delta");
                    }
                }
                Effect::Latency(sample) => {
                    if self.latency_tx.send(sample).is_err() {
                        trace!(object_id = %sample.object_id, "no latency subscribers");
                    }
                }
                Effect::Notify(notice) => notices.push(notice),
            }
        }
        notices
    }

    fn queue_lock_job(&self, job: LockJob) {
        if self.lock_tx.send(job).is_err() {
            warn!("lock worker stopped; dropping lock call");
        }
    }
}

// =============================================================================
// WORKERS
// =============================================================================

async fn run_writer(
    board_id: BoardId,
    store: Arc<dyn DocumentStore>,
    mut rx: mpsc::UnboundedReceiver<Vec<WriteOp>>,
    failures: broadcast::Sender<WriteFailure>,
) {
    while let Some(ops) = rx.recv().await {
        let object_ids: Vec<ObjectId> = ops.iter().map(WriteOp::object_id).collect();
        if let Err(error) = write(board_id, store.as_ref(), ops).await {
            warn!(%board_id, error = %error, code = error.error_code(), count = object_ids.len(), "write failed; local state kept");
            if failures.send(WriteFailure { object_ids, error }).is_err() {
                trace!(%board_id, "no write failure subscribers");
            }
        }
    }
    debug!(%board_id, "write worker stopped");
}

async fn write(board_id: BoardId, store: &dyn DocumentStore, ops: Vec<WriteOp>) -> Result<(), StoreError> {
    match ops.as_slice() {
        [WriteOp::Upsert { object_id, payload }] => store.upsert(board_id, *object_id, payload.clone()).await,
        [WriteOp::Delete { object_id }] => store.delete(board_id, *object_id).await,
        _ => store.batch(board_id, ops).await,
    }
}

async fn run_locker(
    board_id: BoardId,
    user_id: UserId,
    store: Arc<dyn LockStore>,
    mut rx: mpsc::UnboundedReceiver<LockJob>,
    results: mpsc::UnboundedSender<LockResults>,
) {
    while let Some(job) = rx.recv().await {
        match job {
            LockJob::Acquire { ticket, records } => {
                let ids: Vec<ObjectId> = records.iter().map(|record| record.object_id).collect();
                let outcomes = join_all(records.into_iter().map(|record| store.acquire(board_id, record))).await;
                if results.send((ticket, ids.into_iter().zip(outcomes).collect())).is_err() {
                    debug!(%board_id, ticket, "client gone; dropping lock results");
                }
            }
            LockJob::Release(ids) => {
                for id in ids {
                    if let Err(e) = store.release(board_id, id, user_id).await {
                        warn!(%board_id, object_id = %id, error = %e, code = e.error_code(), "lock release failed");
                    }
                }
            }
            LockJob::ReleaseAll => match store.release_all(board_id, user_id).await {
                Ok(released) => debug!(%board_id, released, "released all locks"),
                Err(e) => warn!(%board_id, error = %e, code = e.error_code(), "lock release failed"),
            },
        }
    }
    debug!(%board_id, "lock worker stopped");
}

async fn run_publisher(board_id: BoardId, channel: Arc<dyn DeltaChannel>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = channel.publish(board_id, message).await {
            debug!(%board_id, error = %e, code = e.error_code(), "move delta publish failed");
        }
    }
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

async fn wait_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
