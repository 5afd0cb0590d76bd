//! Last-seen bookkeeping per player name.
//!
//! Names are matched the same way as in the admission check, trimmed and case-insensitive,
//! so `"Bob "` and `"bob"` share one entry.

use crate::admission::normalize_name;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Mapping from player name to the instant of the last heartbeat.
#[derive(Debug, Default)]
pub struct HeartbeatTracker {
    last_seen: HashMap<String, Instant>,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any prior time stamp for `name`.
    pub fn record_heartbeat(&mut self, name: &str, now: Instant) {
        self.last_seen.insert(normalize_name(name), now);
    }

    /// True if `name` was never seen or its last heartbeat is older than `threshold`.
    pub fn is_disconnected(&self, name: &str, now: Instant, threshold: Duration) -> bool {
        match self.last_seen.get(&normalize_name(name)) {
            None => true,
            Some(seen) => now.saturating_duration_since(*seen) > threshold,
        }
    }

    /// Lazily filters `names` down to the disconnected ones.
    pub fn list_disconnected<'a, I>(
        &'a self,
        names: I,
        now: Instant,
        threshold: Duration,
    ) -> impl Iterator<Item = &'a str> + 'a
    where
        I: IntoIterator<Item = &'a str>,
        I::IntoIter: 'a,
    {
        names
            .into_iter()
            .filter(move |name| self.is_disconnected(name, now, threshold))
    }

    /// Drops the entry of a pruned player.
    pub fn forget(&mut self, name: &str) {
        self.last_seen.remove(&normalize_name(name));
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}
