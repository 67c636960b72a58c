//! Runtime tuning for the sync engine, loaded from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::time::Duration;

const DEFAULT_WRITE_THROTTLE_MS: u64 = 80;
const DEFAULT_DELTA_THROTTLE_MS: u64 = 50;
const DEFAULT_HISTORY_CAPACITY: usize = 100;
const DEFAULT_SNAP_RADIUS: f64 = 12.0;
const DEFAULT_LATENCY_WINDOW: usize = 20;
const DEFAULT_LATENCY_MAX_AGE_MS: u64 = 10_000;

/// Tuning knobs shared by every component of one client.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Leading+trailing window for persisted move/scale/rotate writes.
    pub write_throttle: Duration,
    /// Leading+trailing window for ephemeral move-delta broadcasts.
    pub delta_throttle: Duration,
    /// Maximum number of undo entries kept; oldest are evicted first.
    pub history_capacity: usize,
    /// Distance (scene units) within which a dropped connector end snaps to a specific port.
    pub snap_radius: f64,
    /// Number of latency samples in the rolling average.
    pub latency_window: usize,
    /// Unmatched send timestamps older than this are evicted.
    pub latency_max_age: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            write_throttle: Duration::from_millis(DEFAULT_WRITE_THROTTLE_MS),
            delta_throttle: Duration::from_millis(DEFAULT_DELTA_THROTTLE_MS),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            snap_radius: DEFAULT_SNAP_RADIUS,
            latency_window: DEFAULT_LATENCY_WINDOW,
            latency_max_age: Duration::from_millis(DEFAULT_LATENCY_MAX_AGE_MS),
        }
    }
}

impl SyncConfig {
    /// Load from `SYNC_*` environment variables, falling back to defaults for
    /// anything missing or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            write_throttle: Duration::from_millis(env_parse("SYNC_WRITE_THROTTLE_MS", DEFAULT_WRITE_THROTTLE_MS)),
            delta_throttle: Duration::from_millis(env_parse("SYNC_DELTA_THROTTLE_MS", DEFAULT_DELTA_THROTTLE_MS)),
            history_capacity: env_parse("SYNC_HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY).max(1),
            snap_radius: env_parse("SYNC_SNAP_RADIUS", DEFAULT_SNAP_RADIUS),
            latency_window: env_parse("SYNC_LATENCY_WINDOW", DEFAULT_LATENCY_WINDOW).max(1),
            latency_max_age: Duration::from_millis(env_parse("SYNC_LATENCY_MAX_AGE_MS", DEFAULT_LATENCY_MAX_AGE_MS)),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match std::env::var(key) {
        Ok(raw) => parse_or(&raw, default),
        Err(_) => default,
    }
}

fn parse_or<T>(raw: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    raw.trim().parse::<T>().unwrap_or(default)
}
