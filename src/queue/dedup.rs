//! Time-window dedup of change events.
//!
//! Editors and sync tools fire bursts of identical notifications for one
//! save. The filter remembers when each key was last accepted and rejects
//! the same key until the window has passed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::event::EventKey;

/// Last-accepted timestamps, one per distinct event key.
#[derive(Debug)]
pub struct DedupFilter {
    window: Duration,
    last_seen: HashMap<EventKey, Instant>,
}

impl DedupFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    /// Accept `key` at `now` unless it was accepted less than one window ago.
    ///
    /// A rejected key keeps its old timestamp, so a steady stream of
    /// duplicates cannot hold the window open forever.
    pub fn admit(&mut self, key: &EventKey, now: Instant) -> bool {
        if let Some(last) = self.last_seen.get(key)
            && now.saturating_duration_since(*last) < self.window
        {
            return false;
        }
        self.last_seen.insert(key.clone(), now);
        true
    }

    /// Number of keys remembered.
    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}
