//! Local Object Index: the in-process map from object id to live object, plus
//! the single ordered stacking index.
//!
//! Every other component resolves ids through this store. Stacking order is a
//! `BTreeSet<(z_index, id)>` maintained alongside the map, so back-to-front
//! enumeration never rescans or re-sorts the whole board.

#[cfg(test)]
#[path = "index_test.rs"]
mod index_test;

use std::collections::{BTreeSet, HashMap};

use crate::model::{CanvasObject, ObjectBody, ObjectId};

/// In-memory store of live canvas objects.
#[derive(Debug, Default)]
pub struct ObjectIndex {
    objects: HashMap<ObjectId, CanvasObject>,
    order: BTreeSet<(i64, ObjectId)>,
}

impl ObjectIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object. Returns the previous object with the same id.
    pub fn insert(&mut self, obj: CanvasObject) -> Option<CanvasObject> {
        let previous = self.objects.remove(&obj.id);
        if let Some(prev) = &previous {
            self.order.remove(&(prev.z_key(), prev.id));
        }
        self.order.insert((obj.z_key(), obj.id));
        self.objects.insert(obj.id, obj);
        previous
    }

    /// Remove an object by id, returning it if it was present.
    pub fn remove(&mut self, id: &ObjectId) -> Option<CanvasObject> {
        let obj = self.objects.remove(id)?;
        self.order.remove(&(obj.z_key(), obj.id));
        Some(obj)
    }

    #[must_use]
    pub fn get(&self, id: &ObjectId) -> Option<&CanvasObject> {
        self.objects.get(id)
    }

    /// Look up an object, falling back to members held inside containers.
    #[must_use]
    pub fn resolve(&self, id: &ObjectId) -> Option<&CanvasObject> {
        if let Some(obj) = self.objects.get(id) {
            return Some(obj);
        }
        self.objects.values().find_map(|obj| match &obj.body {
            ObjectBody::Container(data) => data.members.iter().find(|member| member.id == *id),
            _ => None,
        })
    }

    #[must_use]
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Mutate an object in place, keeping the stacking index consistent.
    /// Returns false if the object doesn't exist.
    pub fn update<F>(&mut self, id: &ObjectId, f: F) -> bool
    where
        F: FnOnce(&mut CanvasObject),
    {
        let Some(obj) = self.objects.get_mut(id) else {
            return false;
        };
        let old_key = (obj.z_key(), obj.id);
        f(obj);
        let new_key = (obj.z_key(), obj.id);
        if old_key != new_key {
            self.order.remove(&old_key);
            self.order.insert(new_key);
        }
        true
    }

    /// Ids in back-to-front stacking order.
    #[must_use]
    pub fn ids_in_order(&self) -> Vec<ObjectId> {
        self.order.iter().map(|(_, id)| *id).collect()
    }

    /// Objects in back-to-front stacking order.
    pub fn iter_ordered(&self) -> impl Iterator<Item = &CanvasObject> {
        self.order.iter().filter_map(|(_, id)| self.objects.get(id))
    }

    /// Frames in back-to-front stacking order. This is the enumeration order
    /// the membership tracker uses for its first-match rule.
    pub fn frames(&self) -> impl Iterator<Item = &CanvasObject> {
        self.iter_ordered().filter(|obj| obj.is_frame())
    }

    /// Connectors with at least one end attached to `id`.
    #[must_use]
    pub fn connectors_attached_to(&self, id: ObjectId) -> Vec<ObjectId> {
        self.iter_ordered()
            .filter(|obj| obj.as_connector().is_some_and(|data| data.references(id)))
            .map(|obj| obj.id)
            .collect()
    }

    /// Highest stacking key in use.
    #[must_use]
    pub fn top_z(&self) -> Option<i64> {
        self.order.last().map(|(z, _)| *z)
    }

    /// Move `id` above every other object. Returns the new key.
    pub fn bring_to_front(&mut self, id: &ObjectId) -> Option<i64> {
        let current = self.objects.get(id)?;
        let top = self
            .order
            .iter()
            .rev()
            .find(|(_, other)| other != id)
            .map(|(z, _)| *z);
        let z = match top {
            Some(top) if top >= current.z_key() => top.saturating_add(1),
            Some(_) | None => current.z_key(),
        };
        self.update(id, |obj| obj.z_index = Some(z));
        Some(z)
    }

    /// Move `id` beneath every other object. Returns the new key.
    pub fn send_to_back(&mut self, id: &ObjectId) -> Option<i64> {
        let current = self.objects.get(id)?;
        let bottom = self.order.iter().find(|(_, other)| other != id).map(|(z, _)| *z);
        let z = match bottom {
            Some(bottom) if bottom <= current.z_key() => bottom.saturating_sub(1),
            Some(_) | None => current.z_key(),
        };
        self.update(id, |obj| obj.z_index = Some(z));
        Some(z)
    }

    /// New stacking keys needed to place `id` at `position` in back-to-front
    /// order (0 = bottom), counted among the other objects. When no integer
    /// gap is free the objects above the slot move up, or the ones below move
    /// down when that would overflow; a board spanning the whole key range
    /// is renumbered from zero.
    #[must_use]
    pub fn plan_insert_at(&self, id: &ObjectId, position: usize) -> Vec<(ObjectId, i64)> {
        if !self.objects.contains_key(id) {
            return Vec::new();
        }
        let others: Vec<(i64, ObjectId)> = self.order.iter().copied().filter(|(_, other)| other != id).collect();
        let position = position.min(others.len());
        let below = position.checked_sub(1).map(|i| others[i].0);
        let above = others.get(position).map(|(z, _)| *z);

        let free = match (below, above) {
            (None, None) => return Vec::new(),
            (Some(below), None) => below.checked_add(1),
            (None, Some(above)) => above.checked_sub(1),
            (Some(below), Some(above)) => key_between(below, above),
        };
        if let Some(z) = free {
            return vec![(*id, z)];
        }

        let (lower, upper) = others.split_at(position);
        let shift_up = upper.last().is_some_and(|(top, _)| top.checked_add(2).is_some());
        let shift_down = lower.first().is_some_and(|(bottom, _)| bottom.checked_sub(2).is_some());
        if shift_up {
            let mut plan: Vec<(ObjectId, i64)> = upper.iter().map(|(z, other)| (*other, z + 2)).collect();
            plan.push((*id, below.map_or(upper[0].0, |below| below + 1)));
            plan
        } else if shift_down {
            let mut plan: Vec<(ObjectId, i64)> = lower.iter().map(|(z, other)| (*other, z - 2)).collect();
            plan.push((*id, above.map_or(lower[lower.len() - 1].0, |above| above - 1)));
            plan
        } else {
            let mut ids: Vec<ObjectId> = others.iter().map(|(_, other)| *other).collect();
            ids.insert(position, *id);
            ids.into_iter()
                .zip(0_i64..)
                .filter(|(other, z)| self.objects.get(other).map(CanvasObject::z_key) != Some(*z))
                .collect()
        }
    }

    /// Number of objects currently in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if the index contains no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// A key strictly between `below` and `above`, if one exists.
fn key_between(below: i64, above: i64) -> Option<i64> {
    match above.checked_sub(below) {
        Some(gap) if gap < 2 => None,
        Some(gap) => Some(below + gap / 2),
        // Gap wider than i64: the ends have opposite signs.
        None => Some(below / 2 + above / 2),
    }
}
