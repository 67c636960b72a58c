//! Undo/redo replay and grouping.
//!
//! Replays restore whole snapshots directly into the index under a local
//! mutation, with history paused, and write the result unthrottled. Frame
//! children are not re-translated: every moved child has its own snapshot in
//! the same entry.

#[cfg(test)]
#[path = "replay_test.rs"]
mod replay_test;

use std::time::Instant;

use tracing::{debug, info};

use super::{Effect, SyncCore};
use crate::error::EditError;
use crate::geometry::Geometry;
use crate::history::HistoryAction;
use crate::membership;
use crate::model::{CanvasObject, ContainerData, ObjectBody, ObjectId};
use crate::mutation::Mutation;

impl SyncCore {
    /// Revert the most recent local action.
    pub fn undo(&mut self, now: Instant) -> Vec<Effect> {
        let Some(action) = self.history.undo() else {
            return Vec::new();
        };
        debug!(objects = action.object_ids().len(), "undo");
        self.replay(action, now)
    }

    /// Re-apply the most recently undone action.
    pub fn redo(&mut self, now: Instant) -> Vec<Effect> {
        let Some(action) = self.history.redo() else {
            return Vec::new();
        };
        debug!(objects = action.object_ids().len(), "redo");
        self.replay(action, now)
    }

    fn replay(&mut self, action: HistoryAction, now: Instant) -> Vec<Effect> {
        let reselect = action.added_ids();
        self.history.pause();
        let mut mutation = Mutation::local();
        for step in action.into_primitives() {
            match step {
                HistoryAction::Add(obj) | HistoryAction::Modify { after: obj, .. } => {
                    mutation.touch(&self.index, obj.id);
                    self.index.insert(obj);
                }
                HistoryAction::Remove(obj) => {
                    if self.index.contains(&obj.id) {
                        self.remove_object(&mut mutation, obj.id);
                    }
                }
                HistoryAction::Compound(_) => {}
            }
        }
        let mut effects = self.commit(mutation, now, false);
        self.history.resume();

        if reselect.is_empty() {
            let gone: Vec<ObjectId> =
                self.selection.iter().copied().filter(|id| !self.index.contains(id)).collect();
            effects.extend(self.drop_from_selection(&gone, now));
        } else {
            effects.extend(self.select(&reselect, now));
        }
        effects
    }

    // =========================================================================
    // GROUPING
    // =========================================================================

    /// Collapse `ids` into one container object. Members keep their
    /// scene-absolute snapshots; connectors attached to them stay attached
    /// and resolve through the container.
    ///
    /// # Errors
    ///
    /// [`EditError::EmptyGroup`] for no ids, [`EditError::NotFound`] for an
    /// id not in the index.
    pub fn group(&mut self, ids: &[ObjectId], now: Instant) -> Result<(ObjectId, Vec<Effect>), EditError> {
        if ids.is_empty() {
            return Err(EditError::EmptyGroup);
        }
        if let Some(missing) = ids.iter().find(|id| !self.index.contains(id)) {
            return Err(EditError::NotFound(*missing));
        }

        let members: Vec<CanvasObject> =
            self.index.iter_ordered().filter(|obj| ids.contains(&obj.id)).cloned().collect();
        let geometry = union_bounds(&members);
        let z = members.iter().map(CanvasObject::z_key).max();
        let container = CanvasObject {
            z_index: z,
            ..CanvasObject::new(geometry, ObjectBody::Container(ContainerData { members: members.clone() }))
        };
        let container_id = container.id;

        let mut mutation = Mutation::local();
        for member in &members {
            self.writes.cancel(&member.id);
            self.deferred.remove(&member.id);
            membership::forget_child(&mut self.index, &mut mutation, member.id);
            mutation.touch(&self.index, member.id);
            self.index.remove(&member.id);
        }
        mutation.touch(&self.index, container_id);
        self.index.insert(container);
        info!(%container_id, members = members.len(), "objects grouped");

        let mut effects = self.commit(mutation, now, false);
        effects.extend(self.select(&[container_id], now));
        Ok((container_id, effects))
    }

    /// Dissolve a container, restoring its members as top-level objects.
    ///
    /// # Errors
    ///
    /// [`EditError::NotFound`] for an unknown id, [`EditError::NotAContainer`]
    /// when the object isn't a container.
    pub fn ungroup(&mut self, container_id: ObjectId, now: Instant) -> Result<Vec<Effect>, EditError> {
        let obj = self.index.get(&container_id).ok_or(EditError::NotFound(container_id))?;
        let ObjectBody::Container(data) = &obj.body else {
            return Err(EditError::NotAContainer(container_id));
        };
        let members = data.members.clone();
        let member_ids: Vec<ObjectId> = members.iter().map(|member| member.id).collect();

        let mut mutation = Mutation::local();
        self.remove_object(&mut mutation, container_id);
        for member in members {
            mutation.touch(&self.index, member.id);
            self.index.insert(member);
        }
        info!(%container_id, members = member_ids.len(), "container ungrouped");

        let mut effects = self.commit(mutation, now, false);
        effects.extend(self.select(&member_ids, now));
        Ok(effects)
    }
}

/// Axis-aligned union of the members' scene bounds.
fn union_bounds(members: &[CanvasObject]) -> Geometry {
    let mut bounds = members.iter().map(|member| member.geometry.bounding_box());
    let Some(first) = bounds.next() else {
        return Geometry::default();
    };
    let (min_x, min_y, max_x, max_y) = bounds.fold(first, |(ax, ay, bx, by), (cx, cy, dx, dy)| {
        (ax.min(cx), ay.min(cy), bx.max(dx), by.max(dy))
    });
    Geometry::rect(min_x, min_y, max_x - min_x, max_y - min_y)
}
