//! Tests for the dedup filter and the event queue.

use std::time::{Duration, Instant};

use ingestq::event::{ChangeEvent, ChangeKind, EventKey};
use ingestq::model::{JobId, JobKind};
use ingestq::queue::{DedupFilter, EventQueue, QueueEntry};

const WINDOW: Duration = Duration::from_secs(15);

fn modified(path: &str) -> ChangeEvent {
    ChangeEvent::new(ChangeKind::Modified, path)
}

// ---------------------------------------------------------------------------
// Dedup filter
// ---------------------------------------------------------------------------

#[test]
fn dedup_rejects_same_key_inside_window() {
    let mut filter = DedupFilter::new(WINDOW);
    let key = EventKey::new(ChangeKind::Modified, "/docs/a.pdf");
    let t0 = Instant::now();

    assert!(filter.admit(&key, t0));
    assert!(!filter.admit(&key, t0 + Duration::from_secs(1)));
    assert!(!filter.admit(&key, t0 + Duration::from_secs(14)));
    assert!(filter.admit(&key, t0 + WINDOW));
}

#[test]
fn dedup_rejection_does_not_extend_window() {
    let mut filter = DedupFilter::new(WINDOW);
    let key = EventKey::new(ChangeKind::Modified, "/docs/a.pdf");
    let t0 = Instant::now();

    assert!(filter.admit(&key, t0));
    // A rejected duplicate at t0+10 must not push the window to t0+25.
    assert!(!filter.admit(&key, t0 + Duration::from_secs(10)));
    assert!(filter.admit(&key, t0 + Duration::from_secs(16)));
}

#[test]
fn dedup_keys_differ_by_kind_and_path() {
    let mut filter = DedupFilter::new(WINDOW);
    let t0 = Instant::now();

    assert!(filter.admit(&EventKey::new(ChangeKind::Modified, "/a"), t0));
    assert!(filter.admit(&EventKey::new(ChangeKind::Deleted, "/a"), t0));
    assert!(filter.admit(&EventKey::new(ChangeKind::Modified, "/b"), t0));
    assert_eq!(filter.len(), 3);
}

#[test]
fn event_key_is_kind_colon_path() {
    let event = ChangeEvent::new(ChangeKind::Created, "/in/x.docx");
    assert_eq!(event.key().as_str(), "created:/in/x.docx");
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[test]
fn queue_is_fifo() {
    let queue = EventQueue::new(WINDOW);
    for path in ["/a", "/b", "/c"] {
        assert!(queue.enqueue(modified(path)));
    }
    assert_eq!(queue.depth(), 3);

    let order: Vec<String> = std::iter::from_fn(|| queue.dequeue())
        .map(|entry| entry.event.resource_path)
        .collect();
    assert_eq!(order, vec!["/a", "/b", "/c"]);
    assert!(queue.dequeue().is_none());
}

#[test]
fn burst_of_identical_events_yields_one_entry() {
    let queue = EventQueue::new(WINDOW);
    let t0 = Instant::now();

    let accepted = (0..10)
        .filter(|i| {
            let event: ChangeEvent = serde_json::from_value(serde_json::json!({
                "resourcePath": "/docs/report.pdf",
                "changeKind": "changed",
                "timestamp": chrono::Utc::now(),
            }))
            .unwrap();
            queue.enqueue_at(event, t0 + Duration::from_millis(*i * 100))
        })
        .count();

    assert_eq!(accepted, 1);
    assert_eq!(queue.depth(), 1);
}

#[test]
fn same_event_after_window_is_accepted_again() {
    let queue = EventQueue::new(WINDOW);
    let t0 = Instant::now();

    assert!(queue.enqueue_at(modified("/a"), t0));
    assert!(!queue.enqueue_at(modified("/a"), t0 + Duration::from_secs(5)));
    assert!(queue.enqueue_at(modified("/a"), t0 + Duration::from_secs(20)));
    assert_eq!(queue.depth(), 2);
}

#[test]
fn enqueue_job_bypasses_dedup() {
    let queue = EventQueue::new(WINDOW);
    assert!(queue.enqueue(modified("/a")));

    let job_id = JobId::new();
    queue.enqueue_job(QueueEntry {
        event: modified("/a"),
        kind: JobKind::BatchWithCounts,
        job_id: Some(job_id),
    });
    assert_eq!(queue.depth(), 2);

    let first = queue.dequeue().unwrap();
    assert_eq!(first.kind, JobKind::SimpleConversion);
    assert!(first.job_id.is_none());
    let second = queue.dequeue().unwrap();
    assert_eq!(second.job_id, Some(job_id));
}

#[test]
fn clear_empties_queue_but_keeps_dedup_history() {
    let queue = EventQueue::new(WINDOW);
    queue.enqueue(modified("/a"));
    queue.enqueue(modified("/b"));

    assert_eq!(queue.clear().len(), 2);
    assert_eq!(queue.depth(), 0);
    assert!(!queue.enqueue(modified("/a")), "still inside the window");
}

#[test]
fn concurrent_producers_dedup_to_one() {
    let queue = std::sync::Arc::new(EventQueue::new(WINDOW));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let queue = std::sync::Arc::clone(&queue);
            std::thread::spawn(move || queue.enqueue(modified("/shared")))
        })
        .collect();

    let accepted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(accepted, 1);
    assert_eq!(queue.depth(), 1);
}
