//! Job span helpers.

use tracing::Span;

use crate::model::JobId;

/// Span covering one job's dispatch.
pub fn start_job_span(kind: &str, job_id: &JobId) -> Span {
    tracing::info_span!(
        "job.dispatch",
        "job.kind" = kind,
        "job.id" = %job_id,
    )
}

/// Emit a state-transition event inside `span`.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
