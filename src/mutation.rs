//! Apply-state token threaded through every index mutation.
//!
//! DESIGN
//! ======
//! A `Mutation` is created by whoever starts a change (a local edit, a remote
//! notification, a render-only derivation) and passed by `&mut` into every
//! component that touches the index on its behalf. Components call `touch`
//! before changing an object so the first-seen state is captured once.
//!
//! What happens afterwards depends only on the token's `ApplyState`:
//! - `ApplyingLocal`: touched objects are persisted and recorded in history.
//! - `ApplyingRemote`: the change came from the store; nothing is written back.
//! - `Idle`: render-only derivation (move-deltas, bulk recompute).

#[cfg(test)]
#[path = "mutation_test.rs"]
mod mutation_test;

use std::collections::BTreeMap;

use crate::history::HistoryAction;
use crate::index::ObjectIndex;
use crate::model::{CanvasObject, ObjectId};

/// Origin of the change currently being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    Idle,
    ApplyingRemote,
    ApplyingLocal,
}

/// Change set for one logical mutation.
#[derive(Debug)]
pub struct Mutation {
    state: ApplyState,
    before: BTreeMap<ObjectId, Option<CanvasObject>>,
}

impl Mutation {
    #[must_use]
    pub fn new(state: ApplyState) -> Self {
        Self { state, before: BTreeMap::new() }
    }

    #[must_use]
    pub fn local() -> Self {
        Self::new(ApplyState::ApplyingLocal)
    }

    #[must_use]
    pub fn remote() -> Self {
        Self::new(ApplyState::ApplyingRemote)
    }

    #[must_use]
    pub fn derived() -> Self {
        Self::new(ApplyState::Idle)
    }

    #[must_use]
    pub fn state(&self) -> ApplyState {
        self.state
    }

    /// Record the pre-mutation state of `id`. Only the first touch counts.
    pub fn touch(&mut self, index: &ObjectIndex, id: ObjectId) {
        self.before.entry(id).or_insert_with(|| index.get(&id).cloned());
    }

    /// Ids touched so far, in id order.
    pub fn touched(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.before.keys().copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
    }

    /// Ids whose new state must be written to the store. Empty unless the
    /// mutation is local.
    #[must_use]
    pub fn persisted_ids(&self) -> Vec<ObjectId> {
        match self.state {
            ApplyState::ApplyingLocal => self.before.keys().copied().collect(),
            ApplyState::ApplyingRemote | ApplyState::Idle => Vec::new(),
        }
    }

    /// Consume the token, yielding the captured pre-mutation snapshots.
    #[must_use]
    pub fn into_before(self) -> BTreeMap<ObjectId, Option<CanvasObject>> {
        self.before
    }

    /// History entry describing this mutation against the current index, or
    /// `None` when nothing observable changed or the mutation isn't local.
    #[must_use]
    pub fn history_action(&self, index: &ObjectIndex) -> Option<HistoryAction> {
        if self.state != ApplyState::ApplyingLocal {
            return None;
        }
        diff_action(&self.before, index)
    }
}

/// Build the history entry that turns `before` into the current index state.
/// Modifications whose payloads serialize identically are dropped.
#[must_use]
pub fn diff_action(before: &BTreeMap<ObjectId, Option<CanvasObject>>, index: &ObjectIndex) -> Option<HistoryAction> {
    let actions: Vec<HistoryAction> = before
        .iter()
        .filter_map(|(id, prior)| match (prior, index.get(id)) {
            (None, Some(after)) => Some(HistoryAction::Add(after.clone())),
            (Some(prior), None) => Some(HistoryAction::Remove(prior.clone())),
            (Some(prior), Some(after)) if !prior.same_payload(after) => {
                Some(HistoryAction::Modify { before: prior.clone(), after: after.clone() })
            }
            _ => None,
        })
        .collect();
    HistoryAction::from_parts(actions)
}
