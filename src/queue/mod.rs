//! FIFO event queue with time-window dedup in front of it.
//!
//! Producers (the watcher feed, API handlers) call [`EventQueue::enqueue`]
//! concurrently; the dispatcher is the single consumer. The queue is
//! unbounded. Its depth is exported as a metric so growth is visible.

pub mod dedup;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::event::ChangeEvent;
use crate::model::{JobId, JobKind};

pub use dedup::DedupFilter;

/// One unit waiting for a worker slot.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub event: ChangeEvent,
    pub kind: JobKind,
    /// Set when `StartJob` already created the job record.
    pub job_id: Option<JobId>,
}

impl QueueEntry {
    pub fn from_event(event: ChangeEvent) -> Self {
        Self {
            event,
            kind: JobKind::SimpleConversion,
            job_id: None,
        }
    }
}

struct Inner {
    entries: VecDeque<QueueEntry>,
    dedup: DedupFilter,
}

/// Thread-safe FIFO of accepted events.
pub struct EventQueue {
    inner: Mutex<Inner>,
}

impl EventQueue {
    pub fn new(dedup_window: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::new(),
                dedup: DedupFilter::new(dedup_window),
            }),
        }
    }

    /// Dedup-check and push a watcher event. Returns whether it was accepted.
    pub fn enqueue(&self, event: ChangeEvent) -> bool {
        self.enqueue_at(event, Instant::now())
    }

    /// [`enqueue`](Self::enqueue) with an explicit clock reading.
    ///
    /// The dedup check and the push happen under one lock, so two producers
    /// racing on the same key cannot both get through.
    pub fn enqueue_at(&self, event: ChangeEvent, now: Instant) -> bool {
        let key = event.key();
        let mut inner = self.lock();
        if !inner.dedup.admit(&key, now) {
            tracing::debug!(event_key = %key, "duplicate event suppressed");
            return false;
        }
        inner.entries.push_back(QueueEntry::from_event(event));
        true
    }

    /// Push an entry bound to an already-created job. Skips dedup.
    pub fn enqueue_job(&self, entry: QueueEntry) {
        self.lock().entries.push_back(entry);
    }

    pub fn dequeue(&self) -> Option<QueueEntry> {
        self.lock().entries.pop_front()
    }

    pub fn depth(&self) -> usize {
        self.lock().entries.len()
    }

    /// Remove and return every queued entry. Dedup history is kept.
    pub fn clear(&self) -> Vec<QueueEntry> {
        self.lock().entries.drain(..).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
