//! Lock Manager: advisory per-object locks tied to the local selection.
//!
//! DESIGN
//! ======
//! Selecting a set marks every id `PendingLocal` at once (optimistic) and asks
//! the caller to acquire all of them in parallel. Each request carries a
//! ticket; the acquire results come back tagged with it and are resolved
//! all-or-nothing. Results for a ticket that is no longer current only ever
//! release what they granted.
//!
//! Remote lock state is a cache fed by the lock store's feed. Every feed
//! event re-derives interaction flags for the whole index (full re-apply),
//! so render state cannot drift from the cached table.
//!
//! LOCK STATES
//! ===========
//! ```text
//! Unlocked -> PendingLocal -> LockedLocal -> Unlocked   (local)
//! Unlocked -> LockedRemote -> Unlocked                  (remote)
//! ```

#[cfg(test)]
#[path = "locks_test.rs"]
mod locks_test;

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ErrorCode, StoreError};
use crate::index::ObjectIndex;
use crate::model::{ObjectId, UserId};
use crate::store::{LockEvent, LockGrant, LockRecord};

/// Per-object lock state as seen by this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    PendingLocal { ticket: u64 },
    LockedLocal,
    LockedRemote { user_id: UserId, user_name: String },
}

/// Result of asking to lock a selection.
#[derive(Debug, Clone, PartialEq)]
pub enum LockRequest {
    /// Acquire every record; report the results with `resolve(ticket, ..)`.
    Requested { ticket: u64, records: Vec<LockRecord> },
    /// Some ids are already held by others; nothing was requested.
    Rejected { blocked_by: Vec<ObjectId> },
}

/// Outcome of resolving a ticket's acquire results.
#[derive(Debug, Clone, PartialEq)]
pub enum LockResolution {
    Confirmed,
    /// At least one acquire failed. Every optimistic lock of the ticket was
    /// dropped; `release` lists the ids the store did grant.
    RolledBack { release: Vec<ObjectId>, denied: Vec<ObjectId> },
    /// The ticket was replaced by a newer selection.
    Superseded { release: Vec<ObjectId> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cursor {
    Move,
    NotAllowed,
}

/// Interaction state the render layer applies to one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionFlags {
    pub object_id: ObjectId,
    pub selectable: bool,
    pub evented: bool,
    pub cursor: Cursor,
    pub locked_by: Option<String>,
}

#[derive(Debug)]
pub struct LockManager {
    user_id: UserId,
    user_name: String,
    states: HashMap<ObjectId, LockState>,
    next_ticket: u64,
    current: Option<u64>,
}

impl LockManager {
    #[must_use]
    pub fn new(user_id: UserId, user_name: &str) -> Self {
        Self { user_id, user_name: user_name.to_owned(), states: HashMap::new(), next_ticket: 1, current: None }
    }

    #[must_use]
    pub fn state(&self, id: &ObjectId) -> Option<&LockState> {
        self.states.get(id)
    }

    /// Held or optimistically held by this client.
    #[must_use]
    pub fn holds_locally(&self, id: &ObjectId) -> bool {
        matches!(self.states.get(id), Some(LockState::PendingLocal { .. } | LockState::LockedLocal))
    }

    /// Name of the remote holder, if another user holds `id`.
    #[must_use]
    pub fn remote_holder(&self, id: &ObjectId) -> Option<&str> {
        match self.states.get(id) {
            Some(LockState::LockedRemote { user_name, .. }) => Some(user_name),
            _ => None,
        }
    }

    // =========================================================================
    // LOCAL SELECTION
    // =========================================================================

    /// Optimistically lock `ids` and describe the acquires to issue.
    pub fn request(&mut self, ids: &[ObjectId], now_ms: i64) -> LockRequest {
        let blocked_by: Vec<ObjectId> = ids.iter().copied().filter(|id| self.remote_holder(id).is_some()).collect();
        if !blocked_by.is_empty() {
            info!(blocked = blocked_by.len(), "selection rejected locally; objects locked by others");
            return LockRequest::Rejected { blocked_by };
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.current = Some(ticket);
        for id in ids {
            self.states.insert(*id, LockState::PendingLocal { ticket });
        }
        let records = ids
            .iter()
            .map(|id| LockRecord {
                object_id: *id,
                user_id: self.user_id,
                user_name: self.user_name.clone(),
                last_active_at: now_ms,
            })
            .collect();
        LockRequest::Requested { ticket, records }
    }

    /// Apply the acquire results for `ticket`. A failed call counts as a denial.
    pub fn resolve(
        &mut self,
        ticket: u64,
        results: Vec<(ObjectId, Result<LockGrant, StoreError>)>,
    ) -> LockResolution {
        let mut granted = Vec::new();
        let mut denied = Vec::new();
        for (id, result) in results {
            match result {
                Ok(LockGrant::Granted) => granted.push(id),
                Ok(LockGrant::Denied { holder }) => {
                    info!(object_id = %id, holder = %holder.user_name, "lock denied");
                    self.states.insert(
                        id,
                        LockState::LockedRemote { user_id: holder.user_id, user_name: holder.user_name },
                    );
                    denied.push(id);
                }
                Err(e) => {
                    warn!(error = %e, code = e.error_code(), object_id = %id, "lock acquire failed; treating as denied");
                    self.drop_pending(&id, ticket);
                    denied.push(id);
                }
            }
        }

        if self.current != Some(ticket) {
            let release: Vec<ObjectId> = granted.into_iter().filter(|id| !self.holds_locally(id)).collect();
            for id in &denied {
                self.drop_pending(id, ticket);
            }
            debug!(ticket, release = release.len(), "superseded lock results");
            return LockResolution::Superseded { release };
        }

        if denied.is_empty() {
            for id in &granted {
                if self.states.get(id) == Some(&LockState::PendingLocal { ticket }) {
                    self.states.insert(*id, LockState::LockedLocal);
                }
            }
            return LockResolution::Confirmed;
        }

        // All-or-nothing: drop every optimistic lock of the ticket.
        self.current = None;
        self.states.retain(|_, state| !matches!(state, LockState::PendingLocal { ticket: t } if *t == ticket));
        LockResolution::RolledBack { release: granted, denied }
    }

    /// Drop local locks for `ids`. Returns those that were held (to release on the store).
    pub fn release(&mut self, ids: &[ObjectId]) -> Vec<ObjectId> {
        let released: Vec<ObjectId> = ids.iter().copied().filter(|id| self.holds_locally(id)).collect();
        for id in &released {
            self.states.remove(id);
        }
        if !self.states.values().any(|state| matches!(state, LockState::PendingLocal { .. } | LockState::LockedLocal)) {
            self.current = None;
        }
        released
    }

    /// Drop every local lock (disconnect path).
    pub fn release_all(&mut self) -> Vec<ObjectId> {
        let held: Vec<ObjectId> = self.states.keys().copied().filter(|id| self.holds_locally(id)).collect();
        self.states.retain(|_, state| matches!(state, LockState::LockedRemote { .. }));
        self.current = None;
        held
    }

    /// Forget everything about an object that no longer exists. Returns true
    /// when this client held it.
    pub fn forget(&mut self, id: &ObjectId) -> bool {
        let held = self.holds_locally(id);
        self.states.remove(id);
        held
    }

    fn drop_pending(&mut self, id: &ObjectId, ticket: u64) {
        if self.states.get(id) == Some(&LockState::PendingLocal { ticket }) {
            self.states.remove(id);
        }
    }

    // =========================================================================
    // REMOTE FEED
    // =========================================================================

    /// Apply a lock feed event. Returns ids this client held locally that
    /// another user now holds.
    pub fn apply_remote(&mut self, event: LockEvent) -> Vec<ObjectId> {
        match event {
            LockEvent::Snapshot(records) => {
                self.states.retain(|_, state| !matches!(state, LockState::LockedRemote { .. }));
                records.into_iter().filter_map(|record| self.apply_remote_record(record)).collect()
            }
            LockEvent::Acquired(record) => self.apply_remote_record(record).into_iter().collect(),
            LockEvent::Released { object_id, user_id } => {
                if matches!(self.states.get(&object_id), Some(LockState::LockedRemote { user_id: holder, .. }) if *holder == user_id)
                {
                    self.states.remove(&object_id);
                }
                Vec::new()
            }
        }
    }

    fn apply_remote_record(&mut self, record: LockRecord) -> Option<ObjectId> {
        if record.user_id == self.user_id {
            return None;
        }
        let lost = self.holds_locally(&record.object_id);
        if lost {
            warn!(object_id = %record.object_id, holder = %record.user_name, "lock taken by another user");
        }
        self.states.insert(
            record.object_id,
            LockState::LockedRemote { user_id: record.user_id, user_name: record.user_name },
        );
        lost.then_some(record.object_id)
    }

    /// Interaction flags for every object in the index, in stacking order.
    #[must_use]
    pub fn interaction_flags(&self, index: &ObjectIndex) -> Vec<InteractionFlags> {
        index.ids_in_order().into_iter().map(|id| self.flags_for(id)).collect()
    }

    #[must_use]
    pub fn flags_for(&self, object_id: ObjectId) -> InteractionFlags {
        match self.remote_holder(&object_id) {
            Some(holder) => InteractionFlags {
                object_id,
                selectable: false,
                evented: false,
                cursor: Cursor::NotAllowed,
                locked_by: Some(holder.to_owned()),
            },
            None => InteractionFlags { object_id, selectable: true, evented: true, cursor: Cursor::Move, locked_by: None },
        }
    }

    /// Ids currently held or pending locally.
    #[must_use]
    pub fn held(&self) -> BTreeSet<ObjectId> {
        self.states.keys().copied().filter(|id| self.holds_locally(id)).collect()
    }
}
