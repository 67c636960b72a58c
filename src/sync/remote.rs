//! Inbound feeds: persisted documents, lock events, lock acquire results,
//! and move-deltas from other clients.

#[cfg(test)]
#[path = "remote_test.rs"]
mod remote_test;

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::{Effect, Notice, SyncCore};
use crate::delta::apply_delta;
use crate::error::{ErrorCode, PayloadError, StoreError};
use crate::locks::LockResolution;
use crate::model::{CanvasObject, ObjectId};
use crate::mutation::Mutation;
use crate::store::{Document, LockEvent, LockGrant, StoreEvent};
use crate::wire::decode_move_delta;

impl SyncCore {
    // =========================================================================
    // DOCUMENT FEED
    // =========================================================================

    /// Apply one change-feed event from the document store.
    pub fn on_store_event(&mut self, event: StoreEvent, now: Instant) -> Vec<Effect> {
        match event {
            StoreEvent::BulkLoadStart => {
                self.bulk_loading = true;
                debug!(board_id = %self.identity.board_id, "bulk load started");
                Vec::new()
            }
            StoreEvent::BulkLoadComplete => {
                self.bulk_loading = false;
                let paths = self.connectors.recompute_all(&self.index);
                info!(board_id = %self.identity.board_id, objects = self.index.len(), connectors = paths.len(), "bulk load complete");
                vec![
                    Effect::Notify(Notice::InteractionFlags { flags: self.locks.interaction_flags(&self.index) }),
                    Effect::Notify(Notice::RenderNeeded),
                ]
            }
            StoreEvent::Added(doc) | StoreEvent::Changed(doc) => {
                let sample = self.latency.record_echo(doc.object_id, &doc.payload, now);
                let mut effects: Vec<Effect> = sample.map(Effect::Latency).into_iter().collect();
                effects.extend(self.apply_document(doc));
                effects
            }
            StoreEvent::Removed { object_id } => self.apply_removal(object_id, now),
        }
    }

    /// Materialize a persisted document, deferring it while the object is
    /// active. Malformed payloads are dropped without touching the index.
    pub(super) fn apply_document(&mut self, doc: Document) -> Vec<Effect> {
        let mut obj = match CanvasObject::from_payload(&doc.payload) {
            Ok(obj) => obj,
            Err(e) => {
                warn!(error = %e, code = e.error_code(), object_id = %doc.object_id, "dropping malformed document");
                return Vec::new();
            }
        };
        if obj.id != doc.object_id {
            let e = PayloadError::IdMismatch { document: doc.object_id, payload: obj.id };
            warn!(error = %e, code = e.error_code(), "dropping document");
            return Vec::new();
        }
        let id = obj.id;
        if self.is_active(&id) {
            debug!(object_id = %id, "deferring remote change for active object");
            self.deferred.insert(id, doc);
            return Vec::new();
        }
        if self.writes.is_pending(&id) {
            debug!(object_id = %id, "dropping remote change; pending local write supersedes it");
            return Vec::new();
        }
        if obj.z_index.is_none() {
            obj.z_index = Some(doc.updated_at);
        }
        if self.index.get(&id).is_some_and(|current| current.same_payload(&obj)) {
            return Vec::new();
        }

        let mut mutation = Mutation::remote();
        mutation.touch(&self.index, id);
        self.index.insert(obj);
        if self.bulk_loading {
            return Vec::new();
        }

        let mut effects = vec![Effect::Notify(Notice::ObjectsChanged { ids: vec![id] })];
        let paths = self.connectors.recompute_for(&self.index, &[id]);
        if !paths.is_empty() {
            effects.push(Effect::Notify(Notice::PathsChanged { ids: paths }));
        }
        if self.locks.remote_holder(&id).is_some() {
            effects.push(Effect::Notify(Notice::InteractionFlags { flags: vec![self.locks.flags_for(id)] }));
        }
        effects
    }

    /// Drop an object deleted on the store. Never deferred: a deleted object
    /// leaves the selection and any gesture immediately.
    fn apply_removal(&mut self, id: ObjectId, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.locks.forget(&id) {
            effects.push(Effect::ReleaseLocks(vec![id]));
        }
        if self.selection.contains(&id) {
            self.selection.retain(|selected| *selected != id);
            effects.push(Effect::Notify(Notice::SelectionChanged { ids: self.selection.clone() }));
        }
        if !self.index.contains(&id) {
            self.deferred.remove(&id);
            return effects;
        }

        let mut mutation = Mutation::remote();
        self.detach_container_members(&mut mutation, id);
        self.remove_object(&mut mutation, id);
        let touched: Vec<ObjectId> = mutation.touched().collect();
        let paths = self.connectors.recompute_for(&self.index, &touched);
        debug!(object_id = %id, "object removed remotely");
        effects.push(Effect::Notify(Notice::ObjectsChanged { ids: touched }));
        if !paths.is_empty() {
            effects.push(Effect::Notify(Notice::PathsChanged { ids: paths }));
        }
        effects.extend(self.settle_inactive(now));
        effects
    }

    // =========================================================================
    // LOCK FEED
    // =========================================================================

    /// Apply the results of the acquires issued for `ticket`.
    pub fn on_lock_results(
        &mut self,
        ticket: u64,
        results: Vec<(ObjectId, Result<LockGrant, StoreError>)>,
        now: Instant,
    ) -> Vec<Effect> {
        match self.locks.resolve(ticket, results) {
            LockResolution::Confirmed => Vec::new(),
            LockResolution::Superseded { release } => {
                if release.is_empty() { Vec::new() } else { vec![Effect::ReleaseLocks(release)] }
            }
            LockResolution::RolledBack { release, denied } => {
                info!(ticket, denied = denied.len(), "selection rolled back");
                let mut effects = Vec::new();
                if !release.is_empty() {
                    effects.push(Effect::ReleaseLocks(release));
                }
                self.selection.clear();
                self.container = None;
                effects.push(Effect::Notify(Notice::LockDenied { blocked_by: denied }));
                effects.push(Effect::Notify(Notice::SelectionChanged { ids: Vec::new() }));
                effects.push(Effect::Notify(Notice::InteractionFlags {
                    flags: self.locks.interaction_flags(&self.index),
                }));
                effects.extend(self.settle_inactive(now));
                effects
            }
        }
    }

    /// Apply a lock feed event. Losing any selected object to another user
    /// revokes the whole selection.
    pub fn on_lock_event(&mut self, event: LockEvent, now: Instant) -> Vec<Effect> {
        let lost = self.locks.apply_remote(event);
        let mut effects = Vec::new();
        if lost.iter().any(|id| self.selection.contains(id)) {
            warn!(lost = lost.len(), "selection revoked; objects locked by another user");
            effects.extend(self.end_transform(now));
            let selection = std::mem::take(&mut self.selection);
            effects.extend(self.release(&selection));
            self.container = None;
            effects.push(Effect::Notify(Notice::SelectionChanged { ids: Vec::new() }));
        }
        effects.push(Effect::Notify(Notice::InteractionFlags { flags: self.locks.interaction_flags(&self.index) }));
        effects.extend(self.settle_inactive(now));
        effects
    }

    // =========================================================================
    // MOVE DELTAS
    // =========================================================================

    /// Apply an encoded move-delta from another client. Render-only: nothing
    /// is written and nothing is recorded.
    pub fn on_delta(&mut self, bytes: &[u8]) -> Vec<Effect> {
        let message = match decode_move_delta(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "dropping undecodable move delta");
                return Vec::new();
            }
        };
        let Some(message) = self.delta.accept(message) else {
            return Vec::new();
        };

        let active: BTreeSet<ObjectId> = message.object_ids.iter().copied().filter(|id| self.is_active(id)).collect();
        let mut mutation = Mutation::derived();
        let moved = apply_delta(&mut self.index, &mut mutation, &message, |id| active.contains(id));
        if moved.is_empty() {
            return Vec::new();
        }
        let paths = self.connectors.recompute_for(&self.index, &moved);
        let mut effects = vec![Effect::Notify(Notice::ObjectsChanged { ids: moved })];
        if !paths.is_empty() {
            effects.push(Effect::Notify(Notice::PathsChanged { ids: paths }));
        }
        effects
    }
}
