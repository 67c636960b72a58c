//! Round-trip latency measurement for locally originated writes.
//!
//! Each write that leaves the client is remembered with its payload. A store
//! echo closes the round trip only when its payload equals one this client
//! sent, so another client's write to the same object is not mistaken for
//! ours. Sends older than the matched one were overtaken and are dropped with
//! it. Stale sends are evicted so the map cannot grow without bound when
//! echoes are lost.

#[cfg(test)]
#[path = "latency_test.rs"]
mod latency_test;

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::model::ObjectId;

/// One closed round trip plus the rolling average including it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencySample {
    pub object_id: ObjectId,
    pub elapsed: Duration,
    pub rolling_average: Duration,
}

#[derive(Debug)]
pub struct LatencyTracker {
    sent: HashMap<ObjectId, VecDeque<(Instant, serde_json::Value)>>,
    samples: VecDeque<Duration>,
    window: usize,
    max_age: Duration,
}

impl LatencyTracker {
    #[must_use]
    pub fn new(window: usize, max_age: Duration) -> Self {
        Self { sent: HashMap::new(), samples: VecDeque::new(), window: window.max(1), max_age }
    }

    /// Note that `payload` was written for `object_id` at `now`.
    pub fn record_send(&mut self, object_id: ObjectId, payload: serde_json::Value, now: Instant) {
        self.prune(now);
        self.sent.entry(object_id).or_default().push_back((now, payload));
    }

    /// Close the round trip for the send whose payload `payload` echoes.
    pub fn record_echo(
        &mut self,
        object_id: ObjectId,
        payload: &serde_json::Value,
        now: Instant,
    ) -> Option<LatencySample> {
        self.prune(now);
        let pending = self.sent.get_mut(&object_id)?;
        let matched = pending.iter().position(|(_, sent)| sent == payload)?;
        let (sent_at, _) = pending.drain(..=matched).last()?;
        if pending.is_empty() {
            self.sent.remove(&object_id);
        }
        let elapsed = now.saturating_duration_since(sent_at);
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed);
        Some(LatencySample { object_id, elapsed, rolling_average: self.average() })
    }

    /// Rolling average over the retained samples.
    #[must_use]
    pub fn average(&self) -> Duration {
        let count = u32::try_from(self.samples.len()).unwrap_or(u32::MAX);
        if count == 0 {
            return Duration::ZERO;
        }
        self.samples.iter().sum::<Duration>() / count
    }

    #[cfg(test)]
    fn open_sends(&self) -> usize {
        self.sent.values().map(VecDeque::len).sum()
    }

    fn prune(&mut self, now: Instant) {
        let max_age = self.max_age;
        self.sent.retain(|_, pending| {
            pending.retain(|(sent_at, _)| now.saturating_duration_since(*sent_at) <= max_age);
            !pending.is_empty()
        });
    }
}
