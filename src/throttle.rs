//! Keyed leading+trailing throttle.
//!
//! DESIGN
//! ======
//! The first offer for a key in a quiet period is returned immediately
//! (leading edge) and opens a window. Offers inside the window are folded
//! into one pending value; when the window closes, `take_due` emits that
//! value (trailing edge) and reopens the window so continuous input yields
//! one emission per window. A window that closes with nothing pending is
//! dropped.
//!
//! Time is passed in explicitly so the owner can drive the throttle from a
//! timer and tests can step it deterministically.

#[cfg(test)]
#[path = "throttle_test.rs"]
mod throttle_test;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Slot<V> {
    window_ends: Instant,
    pending: Option<V>,
}

/// Leading+trailing throttle with one independent window per key.
#[derive(Debug)]
pub struct Throttle<K, V> {
    window: Duration,
    slots: BTreeMap<K, Slot<V>>,
}

impl<K: Ord + Clone, V> Throttle<K, V> {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window, slots: BTreeMap::new() }
    }

    /// Offer a value, replacing any pending value for the key. Returns the
    /// value back when it should be emitted now.
    pub fn offer(&mut self, key: K, value: V, now: Instant) -> Option<V> {
        self.offer_merge(key, value, now, |_, latest| latest)
    }

    /// Offer a value, folding it into any pending value with `merge(pending, value)`.
    pub fn offer_merge<F>(&mut self, key: K, value: V, now: Instant, merge: F) -> Option<V>
    where
        F: FnOnce(V, V) -> V,
    {
        let window_ends = now + self.window;
        match self.slots.get_mut(&key) {
            Some(slot) if now < slot.window_ends => {
                slot.pending = Some(match slot.pending.take() {
                    Some(pending) => merge(pending, value),
                    None => value,
                });
                None
            }
            Some(slot) => {
                // Window lapsed without a tick; anything still pending goes out
                // with this offer as the new leading edge.
                let value = match slot.pending.take() {
                    Some(pending) => merge(pending, value),
                    None => value,
                };
                slot.window_ends = window_ends;
                Some(value)
            }
            None => {
                self.slots.insert(key, Slot { window_ends, pending: None });
                Some(value)
            }
        }
    }

    /// Emit every pending value whose window has closed. Keys that emit get a
    /// fresh window; idle keys are forgotten.
    pub fn take_due(&mut self, now: Instant) -> Vec<(K, V)> {
        let mut due = Vec::new();
        let window = self.window;
        self.slots.retain(|key, slot| {
            if now < slot.window_ends {
                return true;
            }
            match slot.pending.take() {
                Some(value) => {
                    due.push((key.clone(), value));
                    slot.window_ends = now + window;
                    true
                }
                None => false,
            }
        });
        due
    }

    /// Earliest instant at which `take_due` will emit something.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots.values().filter(|slot| slot.pending.is_some()).map(|slot| slot.window_ends).min()
    }

    /// Take the pending value for `key` now, leaving its window open.
    pub fn flush(&mut self, key: &K) -> Option<V> {
        self.slots.get_mut(key).and_then(|slot| slot.pending.take())
    }

    /// Take every pending value now, leaving windows open.
    pub fn flush_all(&mut self) -> Vec<(K, V)> {
        self.slots
            .iter_mut()
            .filter_map(|(key, slot)| slot.pending.take().map(|value| (key.clone(), value)))
            .collect()
    }

    /// Forget a key entirely, discarding any pending value.
    pub fn cancel(&mut self, key: &K) -> Option<V> {
        self.slots.remove(key).and_then(|slot| slot.pending)
    }

    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.slots.get(key).is_some_and(|slot| slot.pending.is_some())
    }
}
