//! Per-client linear undo/redo over local mutations.
//!
//! DESIGN
//! ======
//! Entries hold whole-object snapshots in scene-absolute coordinates, so
//! replay is a direct restore and never depends on what else moved since.
//! The undo stack is bounded; the oldest entry is evicted first. Recording a
//! new entry clears the redo stack. While a replay is being applied the
//! manager is paused so the replay's own writes are not recorded again.

#[cfg(test)]
#[path = "history_test.rs"]
mod history_test;

use std::collections::VecDeque;

use crate::geometry::Geometry;
use crate::model::{CanvasObject, ObjectId};

/// One undoable step.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryAction {
    Add(CanvasObject),
    Remove(CanvasObject),
    Modify { before: CanvasObject, after: CanvasObject },
    /// Several changes undone and redone as one step.
    Compound(Vec<HistoryAction>),
}

impl HistoryAction {
    /// Collapse a list of actions: nothing, a single action, or a compound.
    #[must_use]
    pub fn from_parts(mut parts: Vec<HistoryAction>) -> Option<HistoryAction> {
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(HistoryAction::Compound(parts)),
        }
    }

    /// The action that reverses this one.
    #[must_use]
    pub fn inverted(self) -> HistoryAction {
        match self {
            Self::Add(obj) => Self::Remove(obj),
            Self::Remove(obj) => Self::Add(obj),
            Self::Modify { before, after } => Self::Modify { before: after, after: before },
            Self::Compound(parts) => Self::Compound(parts.into_iter().rev().map(HistoryAction::inverted).collect()),
        }
    }

    /// Every object id the action touches.
    #[must_use]
    pub fn object_ids(&self) -> Vec<ObjectId> {
        match self {
            Self::Add(obj) | Self::Remove(obj) => vec![obj.id],
            Self::Modify { after, .. } => vec![after.id],
            Self::Compound(parts) => parts.iter().flat_map(HistoryAction::object_ids).collect(),
        }
    }

    /// Ids of objects this action brings into existence.
    #[must_use]
    pub fn added_ids(&self) -> Vec<ObjectId> {
        match self {
            Self::Add(obj) => vec![obj.id],
            Self::Remove(_) | Self::Modify { .. } => Vec::new(),
            Self::Compound(parts) => parts.iter().flat_map(HistoryAction::added_ids).collect(),
        }
    }

    /// Flatten compounds into their primitive steps, in order.
    #[must_use]
    pub fn into_primitives(self) -> Vec<HistoryAction> {
        match self {
            Self::Compound(parts) => parts.into_iter().flat_map(HistoryAction::into_primitives).collect(),
            other => vec![other],
        }
    }
}

/// Bounded undo/redo stacks.
#[derive(Debug)]
pub struct HistoryManager {
    undo: VecDeque<HistoryAction>,
    redo: Vec<HistoryAction>,
    capacity: usize,
    paused: bool,
}

impl HistoryManager {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { undo: VecDeque::new(), redo: Vec::new(), capacity: capacity.max(1), paused: false }
    }

    /// Record a new local action. Ignored while paused.
    pub fn record(&mut self, action: HistoryAction) -> bool {
        if self.paused {
            return false;
        }
        if self.undo.len() == self.capacity {
            self.undo.pop_front();
        }
        self.undo.push_back(action);
        self.redo.clear();
        true
    }

    /// Pop the most recent action and return what must be applied to undo it.
    pub fn undo(&mut self) -> Option<HistoryAction> {
        let action = self.undo.pop_back()?;
        self.redo.push(action.clone());
        Some(action.inverted())
    }

    /// Pop the most recently undone action and return it for reapplication.
    pub fn redo(&mut self) -> Option<HistoryAction> {
        let action = self.redo.pop()?;
        if self.undo.len() == self.capacity {
            self.undo.pop_front();
        }
        self.undo.push_back(action.clone());
        Some(action)
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    #[cfg(test)]
    pub(crate) fn undo_len(&self) -> usize {
        self.undo.len()
    }
}

/// Snapshot `obj` in scene coordinates. When the object currently lives
/// inside a transient selection container its geometry is relative to that
/// container, so the container transform is composed in.
#[must_use]
pub fn scene_snapshot(obj: &CanvasObject, container: Option<&Geometry>) -> CanvasObject {
    let mut snapshot = obj.clone();
    if let Some(container) = container {
        snapshot.geometry = container.compose(&obj.geometry);
    }
    snapshot
}
