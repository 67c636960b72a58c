//! Move-Delta Broadcaster: ephemeral relative translations during a drag.
//!
//! Outgoing deltas are keyed by the sorted set of dragged ids and throttled
//! leading+trailing; offers inside a window are summed so the trailing
//! message carries the full displacement since the last one. Incoming deltas
//! are applied to the local copies only: never persisted, never recorded in
//! history. A lost or reordered delta is corrected by the next persisted write.

#[cfg(test)]
#[path = "delta_test.rs"]
mod delta_test;

use std::time::{Duration, Instant};

use tracing::debug;

use crate::index::ObjectIndex;
use crate::model::{ClientId, ObjectId};
use crate::mutation::Mutation;
use crate::throttle::Throttle;
use crate::wire::MoveDeltaMessage;

#[derive(Debug)]
pub struct DeltaBroadcaster {
    sender_id: ClientId,
    throttle: Throttle<Vec<ObjectId>, (f64, f64)>,
}

impl DeltaBroadcaster {
    #[must_use]
    pub fn new(sender_id: ClientId, window: Duration) -> Self {
        Self { sender_id, throttle: Throttle::new(window) }
    }

    /// Offer a local displacement. Returns a message to publish now, if any.
    pub fn offer(&mut self, ids: &[ObjectId], dx: f64, dy: f64, now: Instant) -> Option<MoveDeltaMessage> {
        if ids.is_empty() || (dx == 0.0 && dy == 0.0) {
            return None;
        }
        let key = delta_key(ids);
        let (dx, dy) = self.throttle.offer_merge(key.clone(), (dx, dy), now, |(ax, ay), (bx, by)| (ax + bx, ay + by))?;
        Some(self.message(key, dx, dy))
    }

    /// Trailing messages whose window has closed.
    pub fn take_due(&mut self, now: Instant) -> Vec<MoveDeltaMessage> {
        self.throttle.take_due(now).into_iter().map(|(ids, (dx, dy))| self.message(ids, dx, dy)).collect()
    }

    /// Everything still pending, emitted now (end of a drag).
    pub fn flush_all(&mut self) -> Vec<MoveDeltaMessage> {
        self.throttle.flush_all().into_iter().map(|(ids, (dx, dy))| self.message(ids, dx, dy)).collect()
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.throttle.next_deadline()
    }

    /// Filter an incoming message: our own echoes and zero deltas are dropped.
    #[must_use]
    pub fn accept(&self, message: MoveDeltaMessage) -> Option<MoveDeltaMessage> {
        if message.sender_id == self.sender_id {
            return None;
        }
        if message.is_zero() {
            return None;
        }
        Some(message)
    }

    fn message(&self, object_ids: Vec<ObjectId>, dx: f64, dy: f64) -> MoveDeltaMessage {
        MoveDeltaMessage { sender_id: self.sender_id, object_ids, dx, dy }
    }
}

/// Translate every known, inactive object named by `message`. Returns the ids moved.
pub fn apply_delta<F>(index: &mut ObjectIndex, mutation: &mut Mutation, message: &MoveDeltaMessage, is_active: F) -> Vec<ObjectId>
where
    F: Fn(&ObjectId) -> bool,
{
    let mut moved = Vec::new();
    for id in &message.object_ids {
        if is_active(id) {
            debug!(object_id = %id, "skipping move delta for active object");
            continue;
        }
        if !index.contains(id) {
            continue;
        }
        mutation.touch(index, *id);
        index.update(id, |obj| obj.translate(message.dx, message.dy));
        moved.push(*id);
    }
    moved
}

fn delta_key(ids: &[ObjectId]) -> Vec<ObjectId> {
    let mut key = ids.to_vec();
    key.sort_unstable();
    key.dedup();
    key
}
