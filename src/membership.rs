//! Frame Membership Tracker: spatial frame -> children relationships.
//!
//! Membership is derived from geometry (an object belongs to the first frame,
//! back to front, whose bounds contain its center) and persisted as the
//! frame's `child_ids`. Only shapes and tables become members. An object is
//! in at most one frame at a time.

#[cfg(test)]
#[path = "membership_test.rs"]
mod membership_test;

use serde::Serialize;

use crate::index::ObjectIndex;
use crate::model::{CanvasObject, ObjectBody, ObjectId};
use crate::mutation::Mutation;

/// A membership move produced by a recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MembershipChange {
    pub object_id: ObjectId,
    pub from: Option<ObjectId>,
    pub to: Option<ObjectId>,
}

/// Whether `obj` can be a frame member.
#[must_use]
pub fn is_candidate(obj: &CanvasObject) -> bool {
    matches!(obj.body, ObjectBody::Shape(_) | ObjectBody::Table(_))
}

/// First frame in back-to-front order whose bounds contain the object's center.
#[must_use]
pub fn containing_frame(index: &ObjectIndex, obj: &CanvasObject) -> Option<ObjectId> {
    let center = obj.geometry.center();
    index.frames().find(|frame| frame.id != obj.id && frame.geometry.contains(center)).map(|frame| frame.id)
}

/// Frames whose `child_ids` currently list `id`.
#[must_use]
pub fn recorded_frames(index: &ObjectIndex, id: ObjectId) -> Vec<ObjectId> {
    index
        .frames()
        .filter(|frame| frame.as_frame().is_some_and(|data| data.child_ids.contains(&id)))
        .map(|frame| frame.id)
        .collect()
}

/// Re-derive the frame of `id` and fix up `child_ids` if it changed.
pub fn recompute(index: &mut ObjectIndex, mutation: &mut Mutation, id: ObjectId) -> Option<MembershipChange> {
    let obj = index.get(&id)?;
    let computed = if is_candidate(obj) { containing_frame(index, obj) } else { None };
    let recorded = recorded_frames(index, id);
    if recorded.len() <= 1 && recorded.first().copied() == computed {
        return None;
    }

    for frame_id in recorded.iter().filter(|frame_id| Some(**frame_id) != computed) {
        set_child(index, mutation, *frame_id, id, false);
    }
    if let Some(frame_id) = computed
        && !recorded.contains(&frame_id)
    {
        set_child(index, mutation, frame_id, id, true);
    }
    let from = recorded.into_iter().find(|frame_id| Some(*frame_id) != computed);
    Some(MembershipChange { object_id: id, from, to: computed })
}

/// Remove `id` from every frame that lists it. Returns the frames changed.
pub fn forget_child(index: &mut ObjectIndex, mutation: &mut Mutation, id: ObjectId) -> Vec<ObjectId> {
    let frames = recorded_frames(index, id);
    for frame_id in &frames {
        set_child(index, mutation, *frame_id, id, false);
    }
    frames
}

/// Translate every child of `frame_id` by the frame's own displacement.
pub fn translate_children(
    index: &mut ObjectIndex,
    mutation: &mut Mutation,
    frame_id: ObjectId,
    dx: f64,
    dy: f64,
) -> Vec<ObjectId> {
    let children: Vec<ObjectId> = index
        .get(&frame_id)
        .and_then(CanvasObject::as_frame)
        .map(|data| data.child_ids.iter().copied().filter(|id| index.contains(id)).collect())
        .unwrap_or_default();
    for child in &children {
        mutation.touch(index, *child);
        index.update(child, |obj| obj.translate(dx, dy));
    }
    children
}

/// Adopt every contained candidate stacked above `frame_id` that isn't
/// already its child. Run after the frame is sent to the back.
pub fn capture(index: &mut ObjectIndex, mutation: &mut Mutation, frame_id: ObjectId) -> Vec<MembershipChange> {
    let Some(frame) = index.get(&frame_id) else {
        return Vec::new();
    };
    let Some(data) = frame.as_frame() else {
        return Vec::new();
    };
    let frame_z = frame.z_key();
    let adopted: Vec<ObjectId> = index
        .iter_ordered()
        .filter(|obj| obj.z_key() > frame_z && is_candidate(obj) && !data.child_ids.contains(&obj.id))
        .filter(|obj| frame.geometry.contains(obj.geometry.center()))
        .map(|obj| obj.id)
        .collect();

    adopted
        .into_iter()
        .map(|id| {
            let previous = recorded_frames(index, id);
            for old in &previous {
                set_child(index, mutation, *old, id, false);
            }
            set_child(index, mutation, frame_id, id, true);
            MembershipChange { object_id: id, from: previous.first().copied(), to: Some(frame_id) }
        })
        .collect()
}

fn set_child(index: &mut ObjectIndex, mutation: &mut Mutation, frame_id: ObjectId, child: ObjectId, member: bool) {
    mutation.touch(index, frame_id);
    index.update(&frame_id, |obj| {
        if let Some(data) = obj.as_frame_mut() {
            if member {
                data.child_ids.insert(child);
            } else {
                data.child_ids.remove(&child);
            }
        }
    });
}
