//! Metric instruments for ingestq.
//!
//! Created from the globally registered `MeterProvider`; without one they
//! are no-ops, so library users and tests pay nothing.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("ingestq")
}

/// Counter: change events offered to the queue.
/// Labels: `result` ("accepted" | "suppressed").
pub fn events_submitted() -> Counter<u64> {
    meter()
        .u64_counter("ingestq.events.submitted")
        .with_description("Change events offered to the queue")
        .build()
}

/// Counter: jobs handed to a worker.
/// Labels: `kind`.
pub fn jobs_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("ingestq.jobs.dispatched")
        .with_description("Jobs handed to a worker")
        .build()
}

/// Counter: job state transitions.
/// Labels: `from`, `to`.
pub fn job_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("ingestq.jobs.state_transitions")
        .with_description("Job state transitions")
        .build()
}

/// Counter: progress records considered for merge.
/// Labels: `result` ("merged" | "stale" | "invalid" | "not_running" | "not_found").
pub fn progress_merges() -> Counter<u64> {
    meter()
        .u64_counter("ingestq.progress.merges")
        .with_description("Progress records considered for merge")
        .build()
}

/// Counter: reaped workers.
/// Labels: `result` ("success" | "failure").
pub fn worker_exits() -> Counter<u64> {
    meter()
        .u64_counter("ingestq.workers.exits")
        .with_description("Reaped workers by exit result")
        .build()
}

/// Histogram: queue depth sampled once per dispatch tick.
pub fn queue_depth() -> Histogram<u64> {
    meter()
        .u64_histogram("ingestq.queue.depth")
        .with_description("Queued events after each dispatch tick")
        .build()
}
