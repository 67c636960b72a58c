//! Document Sync Engine: the synchronous core that owns the local object
//! index and reconciles it with the store, the lock feed, and move-deltas.
//!
//! DESIGN
//! ======
//! `SyncCore` never performs I/O. Every operation takes the current instant,
//! mutates local state, and returns the `Effect`s the caller must execute:
//! writes, lock calls, delta publishes, and UI notices. The async
//! `client::BoardClient` drives it from a single task, so all index
//! mutations are serialized without a lock.
//!
//! Echo suppression is structural. Local edits run under an `ApplyingLocal`
//! [`Mutation`] and are the only changes that produce writes; remote
//! documents run under `ApplyingRemote` and deltas under `Idle`, neither of
//! which persists anything.
//!
//! Objects that are selected or inside an active transform gesture are
//! "active": remote documents for them are deferred, and move-deltas for them
//! are ignored. When an object stops being active its deferred document is
//! applied, unless this client wrote the object meanwhile, in which case its
//! own final write wins and the deferred copy is dropped. Likewise a remote
//! document for an object with a throttled write still pending is dropped:
//! the pending write lands after it.

#[cfg(test)]
#[path = "sync_test.rs"]
mod sync_test;

mod remote;
mod replay;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::connectors::ConnectorMaintainer;
use crate::delta::DeltaBroadcaster;
use crate::error::{EditError, ErrorCode};
use crate::geometry::{Geometry, Point};
use crate::history::{HistoryManager, scene_snapshot};
use crate::index::ObjectIndex;
use crate::latency::{LatencySample, LatencyTracker};
use crate::locks::{InteractionFlags, LockManager, LockRequest};
use crate::membership;
use crate::model::{BoardId, CanvasObject, ClientId, Endpoint, ObjectBody, ObjectId, Port, UserId};
use crate::mutation::{Mutation, diff_action};
use crate::store::{Document, LockRecord, WriteOp, unix_millis};
use crate::throttle::Throttle;
use crate::wire::MoveDeltaMessage;

// =============================================================================
// TYPES
// =============================================================================

/// Who this client is on which board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub board_id: BoardId,
    pub user_id: UserId,
    pub user_name: String,
    /// Unique per connection; used as the move-delta sender id.
    pub client_id: ClientId,
}

impl Identity {
    #[must_use]
    pub fn new(board_id: BoardId, user_id: UserId, user_name: &str) -> Self {
        Self { board_id, user_id, user_name: user_name.to_owned(), client_id: Uuid::new_v4() }
    }
}

/// Work the caller must carry out on behalf of the core.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Persist these writes, in order, as one batch.
    Write(Vec<WriteOp>),
    /// Issue one acquire per record, then report back with the ticket.
    AcquireLocks { ticket: u64, records: Vec<LockRecord> },
    ReleaseLocks(Vec<ObjectId>),
    ReleaseAllLocks,
    PublishDelta(MoveDeltaMessage),
    Latency(LatencySample),
    Notify(Notice),
}

/// Rendering-facing notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    ObjectsChanged { ids: Vec<ObjectId> },
    PathsChanged { ids: Vec<ObjectId> },
    SelectionChanged { ids: Vec<ObjectId> },
    InteractionFlags { flags: Vec<InteractionFlags> },
    LockDenied { blocked_by: Vec<ObjectId> },
    RenderNeeded,
}

#[derive(Debug, Default)]
struct Gesture {
    ids: BTreeSet<ObjectId>,
    before: BTreeMap<ObjectId, Option<CanvasObject>>,
}

// =============================================================================
// CORE
// =============================================================================

pub struct SyncCore {
    identity: Identity,
    index: ObjectIndex,
    writes: Throttle<ObjectId, ()>,
    delta: DeltaBroadcaster,
    locks: LockManager,
    connectors: ConnectorMaintainer,
    history: HistoryManager,
    latency: LatencyTracker,
    selection: Vec<ObjectId>,
    container: Option<Geometry>,
    gesture: Option<Gesture>,
    deferred: BTreeMap<ObjectId, Document>,
    written_while_active: BTreeSet<ObjectId>,
    bulk_loading: bool,
    last_z: i64,
}

impl SyncCore {
    #[must_use]
    pub fn new(identity: Identity, config: &SyncConfig) -> Self {
        Self {
            index: ObjectIndex::new(),
            writes: Throttle::new(config.write_throttle),
            delta: DeltaBroadcaster::new(identity.client_id, config.delta_throttle),
            locks: LockManager::new(identity.user_id, &identity.user_name),
            connectors: ConnectorMaintainer::new(config.snap_radius),
            history: HistoryManager::new(config.history_capacity),
            latency: LatencyTracker::new(config.latency_window, config.latency_max_age),
            selection: Vec::new(),
            container: None,
            gesture: None,
            deferred: BTreeMap::new(),
            written_while_active: BTreeSet::new(),
            bulk_loading: false,
            last_z: 0,
            identity,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub fn index(&self) -> &ObjectIndex {
        &self.index
    }

    #[must_use]
    pub fn get(&self, id: &ObjectId) -> Option<&CanvasObject> {
        self.index.get(id)
    }

    #[must_use]
    pub fn selection(&self) -> &[ObjectId] {
        &self.selection
    }

    #[must_use]
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Rendered path of a connector.
    #[must_use]
    pub fn path(&self, id: &ObjectId) -> Option<&[Point]> {
        self.connectors.path(id)
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    #[must_use]
    pub fn is_bulk_loading(&self) -> bool {
        self.bulk_loading
    }

    /// Rolling average of write round trips.
    #[must_use]
    pub fn average_latency(&self) -> std::time::Duration {
        self.latency.average()
    }

    /// Earliest instant at which `tick` has throttled work to emit.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.writes.next_deadline(), self.delta.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Emit trailing writes and move-deltas whose windows have closed.
    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        let due: Vec<ObjectId> = self.writes.take_due(now).into_iter().map(|(id, ())| id).collect();
        let mut effects: Vec<Effect> = self.write_batch(&due, now).into_iter().collect();
        effects.extend(self.delta.take_due(now).into_iter().map(Effect::PublishDelta));
        effects
    }

    /// Geometry of the transient selection container, when the UI holds the
    /// selected objects relative to one. Modifications of selected objects
    /// are then composed into scene coordinates before they are stored.
    pub fn set_selection_container(&mut self, container: Option<Geometry>) {
        self.container = container;
    }

    // =========================================================================
    // LOCAL EDITS
    // =========================================================================

    /// Add a new object. Re-adding an identical object is a no-op.
    pub fn submit_add(&mut self, obj: CanvasObject, now: Instant) -> Vec<Effect> {
        if self.index.get(&obj.id).is_some_and(|current| current.same_payload(&obj)) {
            debug!(object_id = %obj.id, "add is a no-op; identical object present");
            return Vec::new();
        }
        let mut obj = obj;
        if obj.z_index.is_none() {
            obj.z_index = Some(self.next_z());
        }
        let mut mutation = Mutation::local();
        mutation.touch(&self.index, obj.id);
        self.index.insert(obj);
        self.commit(mutation, now, false)
    }

    /// Replace an existing object with a new snapshot. Writes are throttled
    /// per object; inside a transform gesture history is recorded once at
    /// `end_transform`.
    ///
    /// # Errors
    ///
    /// [`EditError::NotFound`] when the object isn't in the index.
    pub fn submit_modify(&mut self, obj: CanvasObject, now: Instant) -> Result<Vec<Effect>, EditError> {
        let current = self.index.get(&obj.id).ok_or(EditError::NotFound(obj.id))?;
        let mut obj = match self.container {
            Some(container) if self.selection.contains(&obj.id) => scene_snapshot(&obj, Some(&container)),
            _ => obj,
        };
        if obj.z_index.is_none() {
            obj.z_index = current.z_index;
        }
        if let (Some(recorded), Some(data)) = (current.as_frame(), obj.as_frame_mut()) {
            data.child_ids.clone_from(&recorded.child_ids);
        }
        let old = current.geometry;
        if let ObjectBody::Container(recorded) = &current.body {
            let mut members = recorded.members.clone();
            carry_members(&mut members, &old, &obj.geometry);
            if let ObjectBody::Container(data) = &mut obj.body {
                data.members = members;
            }
        }

        let id = obj.id;
        let is_frame = obj.is_frame();
        let new = obj.geometry;
        let mut mutation = Mutation::local();
        mutation.touch(&self.index, id);
        self.index.insert(obj);
        if is_frame && is_pure_translation(&old, &new) && (new.left != old.left || new.top != old.top) {
            membership::translate_children(&mut self.index, &mut mutation, id, new.left - old.left, new.top - old.top);
        }
        Ok(self.commit(mutation, now, true))
    }

    /// Translate objects (and the children of moved frames) by a delta, and
    /// broadcast the displacement to other clients.
    pub fn submit_translate(&mut self, ids: &[ObjectId], dx: f64, dy: f64, now: Instant) -> Vec<Effect> {
        if dx == 0.0 && dy == 0.0 {
            return Vec::new();
        }
        let requested: BTreeSet<ObjectId> = ids.iter().copied().filter(|id| self.index.contains(id)).collect();
        let carried: BTreeSet<ObjectId> = requested
            .iter()
            .filter_map(|id| self.index.get(id).and_then(CanvasObject::as_frame))
            .flat_map(|data| data.child_ids.iter().copied())
            .collect();

        let mut mutation = Mutation::local();
        for id in requested.iter().filter(|id| !carried.contains(id)) {
            mutation.touch(&self.index, *id);
            self.index.update(id, |obj| obj.translate(dx, dy));
            if self.index.get(id).is_some_and(CanvasObject::is_frame) {
                membership::translate_children(&mut self.index, &mut mutation, *id, dx, dy);
            }
        }

        let moved: Vec<ObjectId> = mutation.touched().collect();
        let mut effects: Vec<Effect> =
            self.delta.offer(&moved, dx, dy, now).map(Effect::PublishDelta).into_iter().collect();
        effects.extend(self.commit(mutation, now, true));
        effects
    }

    /// Start a transform gesture (drag, resize, rotate) over `ids`.
    pub fn begin_transform(&mut self, ids: &[ObjectId]) {
        let gesture = self.gesture.get_or_insert_with(Gesture::default);
        gesture.ids.extend(ids.iter().copied());
        debug!(objects = gesture.ids.len(), "transform started");
    }

    /// Finish the gesture: flush pending writes and deltas, settle frame
    /// membership, and record one history entry for the whole gesture.
    pub fn end_transform(&mut self, now: Instant) -> Vec<Effect> {
        let Some(gesture) = self.gesture.take() else {
            return Vec::new();
        };
        let deltas = self.delta.flush_all();
        let delta_ids: Vec<ObjectId> = deltas.iter().flat_map(|message| message.object_ids.iter().copied()).collect();
        let mut effects: Vec<Effect> = deltas.into_iter().map(Effect::PublishDelta).collect();

        let touched: Vec<ObjectId> = gesture.before.keys().copied().collect();
        let mut mutation = Mutation::local();
        for id in self.membership_candidates(&touched) {
            membership::recompute(&mut self.index, &mut mutation, id);
        }

        let mut flushed: BTreeSet<ObjectId> =
            touched.iter().copied().filter(|id| self.writes.flush(id).is_some()).collect();
        flushed.extend(mutation.persisted_ids());
        // Peers that received a trailing delta need a write after it.
        flushed.extend(delta_ids.into_iter().filter(|id| self.index.contains(id)));
        let frames: Vec<ObjectId> = mutation.touched().collect();

        let mut before = gesture.before;
        for (id, prior) in mutation.into_before() {
            before.entry(id).or_insert(prior);
        }
        if let Some(action) = diff_action(&before, &self.index) {
            self.history.record(action);
        }

        let flushed: Vec<ObjectId> = flushed.into_iter().collect();
        effects.extend(self.write_batch(&flushed, now));
        if !frames.is_empty() {
            effects.push(Effect::Notify(Notice::ObjectsChanged { ids: frames }));
        }
        debug!(objects = touched.len(), "transform ended");
        effects.extend(self.settle_inactive(now));
        effects
    }

    /// Delete an object. Connectors attached to it are left floating.
    ///
    /// # Errors
    ///
    /// [`EditError::NotFound`] when the object isn't in the index.
    pub fn submit_remove(&mut self, id: ObjectId, now: Instant) -> Result<Vec<Effect>, EditError> {
        if !self.index.contains(&id) {
            return Err(EditError::NotFound(id));
        }
        let mut mutation = Mutation::local();
        self.detach_container_members(&mut mutation, id);
        self.remove_object(&mut mutation, id);
        let mut effects = self.commit(mutation, now, false);
        effects.extend(self.drop_from_selection(&[id], now));
        Ok(effects)
    }

    /// # Errors
    ///
    /// [`EditError::NotFound`] when the object isn't in the index.
    pub fn bring_to_front(&mut self, id: ObjectId, now: Instant) -> Result<Vec<Effect>, EditError> {
        if !self.index.contains(&id) {
            return Err(EditError::NotFound(id));
        }
        let mut mutation = Mutation::local();
        mutation.touch(&self.index, id);
        self.index.bring_to_front(&id);
        Ok(self.commit(mutation, now, false))
    }

    /// Send an object to the back. A frame sent behind objects it spatially
    /// contains adopts them as children.
    ///
    /// # Errors
    ///
    /// [`EditError::NotFound`] when the object isn't in the index.
    pub fn send_to_back(&mut self, id: ObjectId, now: Instant) -> Result<Vec<Effect>, EditError> {
        if !self.index.contains(&id) {
            return Err(EditError::NotFound(id));
        }
        let mut mutation = Mutation::local();
        mutation.touch(&self.index, id);
        self.index.send_to_back(&id);
        if self.index.get(&id).is_some_and(CanvasObject::is_frame) {
            let adopted = membership::capture(&mut self.index, &mut mutation, id);
            debug!(frame_id = %id, adopted = adopted.len(), "frame sent to back");
        }
        Ok(self.commit(mutation, now, false))
    }

    /// Move an object to `position` in back-to-front order.
    ///
    /// # Errors
    ///
    /// [`EditError::NotFound`] when the object isn't in the index.
    pub fn insert_at(&mut self, id: ObjectId, position: usize, now: Instant) -> Result<Vec<Effect>, EditError> {
        if !self.index.contains(&id) {
            return Err(EditError::NotFound(id));
        }
        let plan = self.index.plan_insert_at(&id, position);
        let mut mutation = Mutation::local();
        for (other, z) in plan {
            mutation.touch(&self.index, other);
            self.index.update(&other, |obj| obj.z_index = Some(z));
        }
        Ok(self.commit(mutation, now, false))
    }

    // =========================================================================
    // CONNECTOR EDITS
    // =========================================================================

    /// Drop one end of a connector at `drop`, attaching it to `target` if given.
    ///
    /// # Errors
    ///
    /// See [`ConnectorMaintainer::move_endpoint`].
    pub fn move_endpoint(
        &mut self,
        connector_id: ObjectId,
        end: Endpoint,
        drop: Point,
        target: Option<ObjectId>,
        now: Instant,
    ) -> Result<(Option<Port>, Vec<Effect>), EditError> {
        let mut mutation = Mutation::local();
        let port = self.connectors.move_endpoint(&mut self.index, &mut mutation, connector_id, end, drop, target)?;
        Ok((port, self.commit(mutation, now, false)))
    }

    /// # Errors
    ///
    /// See [`ConnectorMaintainer::insert_waypoint`].
    pub fn insert_waypoint(
        &mut self,
        connector_id: ObjectId,
        segment: usize,
        at: Point,
        now: Instant,
    ) -> Result<Vec<Effect>, EditError> {
        let mut mutation = Mutation::local();
        self.connectors.insert_waypoint(&mut self.index, &mut mutation, connector_id, segment, at)?;
        Ok(self.commit(mutation, now, false))
    }

    /// # Errors
    ///
    /// See [`ConnectorMaintainer::move_waypoint`].
    pub fn move_waypoint(
        &mut self,
        connector_id: ObjectId,
        waypoint: usize,
        to: Point,
        now: Instant,
    ) -> Result<Vec<Effect>, EditError> {
        let mut mutation = Mutation::local();
        self.connectors.move_waypoint(&mut self.index, &mut mutation, connector_id, waypoint, to)?;
        Ok(self.commit(mutation, now, false))
    }

    /// # Errors
    ///
    /// See [`ConnectorMaintainer::remove_waypoint`].
    pub fn remove_waypoint(
        &mut self,
        connector_id: ObjectId,
        waypoint: usize,
        now: Instant,
    ) -> Result<Vec<Effect>, EditError> {
        let mut mutation = Mutation::local();
        self.connectors.remove_waypoint(&mut self.index, &mut mutation, connector_id, waypoint)?;
        Ok(self.commit(mutation, now, false))
    }

    // =========================================================================
    // SELECTION
    // =========================================================================

    /// Replace the selection, locking every newly selected object. Selection
    /// is all-or-nothing: if any object is locked by someone else the whole
    /// selection is refused.
    pub fn select(&mut self, ids: &[ObjectId], now: Instant) -> Vec<Effect> {
        let mut wanted: Vec<ObjectId> = Vec::new();
        for id in ids {
            if self.index.contains(id) && !wanted.contains(id) {
                wanted.push(*id);
            }
        }
        if wanted == self.selection {
            return Vec::new();
        }

        let previous = std::mem::take(&mut self.selection);
        let dropped: Vec<ObjectId> = previous.iter().copied().filter(|id| !wanted.contains(id)).collect();
        let mut effects = self.release(&dropped);
        if wanted.is_empty() {
            self.container = None;
        } else {
            match self.locks.request(&wanted, unix_millis()) {
                LockRequest::Requested { ticket, records } => {
                    self.selection = wanted;
                    effects.push(Effect::AcquireLocks { ticket, records });
                }
                LockRequest::Rejected { blocked_by } => {
                    let kept: Vec<ObjectId> = previous.iter().copied().filter(|id| wanted.contains(id)).collect();
                    effects.extend(self.release(&kept));
                    self.container = None;
                    effects.push(Effect::Notify(Notice::LockDenied { blocked_by }));
                }
            }
        }
        effects.push(Effect::Notify(Notice::SelectionChanged { ids: self.selection.clone() }));
        effects.extend(self.settle_inactive(now));
        effects
    }

    /// Remove `ids` from the selection, releasing their locks.
    pub fn deselect(&mut self, ids: &[ObjectId], now: Instant) -> Vec<Effect> {
        let remaining: Vec<ObjectId> = self.selection.iter().copied().filter(|id| !ids.contains(id)).collect();
        self.select(&remaining, now)
    }

    /// Flush pending writes and drop every lock (disconnect path).
    pub fn shutdown(&mut self, now: Instant) -> Vec<Effect> {
        let pending: Vec<ObjectId> = self.writes.flush_all().into_iter().map(|(id, ())| id).collect();
        let mut effects: Vec<Effect> = self.write_batch(&pending, now).into_iter().collect();
        effects.extend(self.delta.flush_all().into_iter().map(Effect::PublishDelta));
        self.locks.release_all();
        self.selection.clear();
        self.container = None;
        self.gesture = None;
        effects.push(Effect::ReleaseAllLocks);
        effects
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Selected, or part of the current transform gesture.
    fn is_active(&self, id: &ObjectId) -> bool {
        self.selection.contains(id)
            || self.gesture.as_ref().is_some_and(|gesture| gesture.ids.contains(id) || gesture.before.contains_key(id))
    }

    /// Stacking key for a new object: above everything known, monotone per client.
    fn next_z(&mut self) -> i64 {
        let floor = self.index.top_z().map_or(self.last_z + 1, |top| top.saturating_add(1).max(self.last_z + 1));
        let z = unix_millis().max(floor);
        self.last_z = z;
        z
    }

    /// Shapes and tables touched directly, plus the recorded children of
    /// touched frames (a resized frame may no longer contain them).
    fn membership_candidates(&self, touched: &[ObjectId]) -> Vec<ObjectId> {
        let mut candidates = BTreeSet::new();
        for id in touched {
            match self.index.get(id) {
                Some(obj) if membership::is_candidate(obj) => {
                    candidates.insert(*id);
                }
                Some(obj) => {
                    if let Some(data) = obj.as_frame() {
                        candidates.extend(data.child_ids.iter().copied());
                    }
                }
                None => {}
            }
        }
        candidates.into_iter().collect()
    }

    /// Finish a local mutation: settle membership, refresh connector paths,
    /// record history, and persist every touched object.
    fn commit(&mut self, mut mutation: Mutation, now: Instant, throttled: bool) -> Vec<Effect> {
        let in_gesture = throttled && self.gesture.is_some();
        if !in_gesture {
            let touched: Vec<ObjectId> = mutation.touched().collect();
            for id in self.membership_candidates(&touched) {
                membership::recompute(&mut self.index, &mut mutation, id);
            }
        }

        let touched: Vec<ObjectId> = mutation.touched().collect();
        let paths = self.connectors.recompute_for(&self.index, &touched);
        let persisted = mutation.persisted_ids();
        match self.gesture.as_mut() {
            Some(gesture) if in_gesture => {
                for (id, prior) in mutation.into_before() {
                    gesture.before.entry(id).or_insert(prior);
                }
            }
            _ => {
                if let Some(action) = mutation.history_action(&self.index) {
                    self.history.record(action);
                }
            }
        }

        let mut effects = if throttled { self.persist_throttled(&persisted, now) } else { self.persist_now(&persisted, now) };
        if !touched.is_empty() {
            effects.push(Effect::Notify(Notice::ObjectsChanged { ids: touched }));
        }
        if !paths.is_empty() {
            effects.push(Effect::Notify(Notice::PathsChanged { ids: paths }));
        }
        effects
    }

    fn persist_throttled(&mut self, ids: &[ObjectId], now: Instant) -> Vec<Effect> {
        let leading: Vec<ObjectId> = ids.iter().copied().filter(|id| self.writes.offer(*id, (), now).is_some()).collect();
        self.write_batch(&leading, now).into_iter().collect()
    }

    fn persist_now(&mut self, ids: &[ObjectId], now: Instant) -> Vec<Effect> {
        for id in ids {
            self.writes.cancel(id);
        }
        self.write_batch(ids, now).into_iter().collect()
    }

    /// One batched write carrying the current state of `ids`: an upsert for
    /// each object still in the index, a delete for each one that isn't.
    fn write_batch(&mut self, ids: &[ObjectId], now: Instant) -> Option<Effect> {
        let mut ops = Vec::with_capacity(ids.len());
        for id in ids {
            match self.index.get(id).map(CanvasObject::to_payload) {
                Some(Ok(payload)) => {
                    self.latency.record_send(*id, payload.clone(), now);
                    ops.push(WriteOp::Upsert { object_id: *id, payload });
                }
                Some(Err(e)) => {
                    warn!(error = %e, code = e.error_code(), object_id = %id, "failed to serialize object; write skipped");
                    continue;
                }
                None => ops.push(WriteOp::Delete { object_id: *id }),
            }
            if self.is_active(id) {
                self.written_while_active.insert(*id);
            }
        }
        (!ops.is_empty()).then_some(Effect::Write(ops))
    }

    /// Take `id` out of the index along with everything that refers to it:
    /// pending writes, deferred documents, gesture bookkeeping, frame
    /// membership, and connector attachments.
    fn remove_object(&mut self, mutation: &mut Mutation, id: ObjectId) {
        self.writes.cancel(&id);
        self.deferred.remove(&id);
        self.written_while_active.remove(&id);
        if let Some(gesture) = self.gesture.as_mut() {
            gesture.ids.remove(&id);
            gesture.before.remove(&id);
        }
        self.connectors.detach_endpoints_of(&mut self.index, mutation, id);
        membership::forget_child(&mut self.index, mutation, id);
        mutation.touch(&self.index, id);
        self.index.remove(&id);
    }

    /// Float connector ends attached to the members of a container that is
    /// being deleted. Members still resolve through the container here, so
    /// each end keeps its last rendered point. Ungrouping skips this: the
    /// members come back under their own ids.
    fn detach_container_members(&mut self, mutation: &mut Mutation, id: ObjectId) {
        let members: Vec<ObjectId> = match self.index.get(&id).map(|obj| &obj.body) {
            Some(ObjectBody::Container(data)) => data.members.iter().map(|member| member.id).collect(),
            _ => return,
        };
        for member in members {
            self.connectors.detach_endpoints_of(&mut self.index, mutation, member);
        }
    }

    /// Release the locks this client holds among `ids`.
    fn release(&mut self, ids: &[ObjectId]) -> Vec<Effect> {
        let released = self.locks.release(ids);
        if released.is_empty() { Vec::new() } else { vec![Effect::ReleaseLocks(released)] }
    }

    /// Drop ids that no longer exist from the selection.
    fn drop_from_selection(&mut self, gone: &[ObjectId], now: Instant) -> Vec<Effect> {
        if !self.selection.iter().any(|id| gone.contains(id)) {
            return Vec::new();
        }
        let remaining: Vec<ObjectId> = self.selection.iter().copied().filter(|id| !gone.contains(id)).collect();
        self.select(&remaining, now)
    }

    /// Apply or drop deferred documents for objects that are no longer active.
    fn settle_inactive(&mut self, now: Instant) -> Vec<Effect> {
        let ready: Vec<ObjectId> = self.deferred.keys().copied().filter(|id| !self.is_active(id)).collect();
        let mut effects = Vec::new();
        for id in ready {
            let Some(doc) = self.deferred.remove(&id) else {
                continue;
            };
            if self.written_while_active.contains(&id) {
                debug!(object_id = %id, "dropping deferred remote change; local write supersedes it");
                continue;
            }
            effects.extend(self.apply_document(doc));
        }
        let still_active: BTreeSet<ObjectId> =
            self.written_while_active.iter().copied().filter(|id| self.is_active(id)).collect();
        self.written_while_active = still_active;
        effects
    }
}

/// Width, height, angle, and scale unchanged: only the position moved.
#[allow(clippy::float_cmp)]
fn is_pure_translation(old: &Geometry, new: &Geometry) -> bool {
    old.width == new.width
        && old.height == new.height
        && old.angle == new.angle
        && old.scale_x == new.scale_x
        && old.scale_y == new.scale_y
}

/// Carry container members along with a change of the container's transform.
fn carry_members(members: &mut [CanvasObject], old: &Geometry, new: &Geometry) {
    if is_pure_translation(old, new) {
        let (dx, dy) = (new.left - old.left, new.top - old.top);
        if dx != 0.0 || dy != 0.0 {
            for member in members {
                member.translate(dx, dy);
            }
        }
        return;
    }
    let Some(inverse) = old.matrix().invert() else {
        warn!("container transform is singular; members left in place");
        return;
    };
    let step = new.matrix().multiply(&inverse);
    for member in members {
        let g = member.geometry;
        member.geometry = Geometry::from_matrix(&step.multiply(&g.matrix()), g.width, g.height);
    }
}
