//! Dispatcher: reaps finished workers and starts queued work under the cap.
//!
//! Runs every `dispatch_interval`. A tick is:
//! 1. reap finished workers, drain their last status, finalize their jobs;
//! 2. while below `max_concurrent_jobs`, dequeue and spawn;
//! 3. mark running jobs that have no live worker as `Unknown`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use super::supervisor::{Reaped, Supervisor};
use crate::model::{JobId, JobState};
use crate::progress::ProgressChannel;
use crate::queue::{EventQueue, QueueEntry};
use crate::registry::{JobRegistry, Transition};
use crate::telemetry::job::{record_state_transition, start_job_span};
use crate::telemetry::metrics;
use crate::worker::SpawnRequest;
use crate::worker::handoff::{self, Handoff};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub reaped: usize,
    pub dispatched: usize,
    pub orphaned: usize,
}

pub struct Dispatcher {
    pub(super) queue: Arc<EventQueue>,
    pub(super) registry: Arc<JobRegistry>,
    pub(super) supervisor: Arc<Supervisor>,
    pub(super) progress: Arc<ProgressChannel>,
    pub(super) max_concurrent: usize,
    pub(super) handoff_dir: PathBuf,
}

impl Dispatcher {
    /// Run ticks until `cancel` fires.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        info!(
            poll_interval_ms = interval.as_millis() as u64,
            max_concurrent = self.max_concurrent,
            kind = %self.supervisor.execution_kind(),
            "dispatcher started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("dispatcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report != DispatchReport::default() {
                        debug!(?report, "dispatch tick");
                    }
                }
            }
        }
    }

    pub async fn tick(&self) -> DispatchReport {
        let mut report = DispatchReport::default();

        for reaped in self.supervisor.reap() {
            report.reaped += 1;
            self.finalize(reaped).await;
        }

        while self.supervisor.active_count() < self.max_concurrent {
            let Some(entry) = self.queue.dequeue() else {
                break;
            };
            if self.dispatch(entry).await {
                report.dispatched += 1;
            }
        }
        metrics::queue_depth().record(self.queue.depth() as u64, &[]);

        for job_id in self.registry.running_ids() {
            if self.supervisor.is_tracking(job_id) {
                continue;
            }
            warn!(job_id = %job_id, "running job has no live worker");
            if let Ok(Transition::Applied { .. }) = self.registry.transition(
                job_id,
                JobState::Unknown,
                Some("no live worker for job".to_string()),
            ) {
                report.orphaned += 1;
            }
        }

        report
    }

    /// Start one queued entry. Returns whether a worker was launched.
    async fn dispatch(&self, entry: QueueEntry) -> bool {
        let key = entry.event.key();
        let job_id = match entry.job_id {
            Some(id) => id,
            None => {
                self.registry
                    .create(entry.kind, &entry.event.resource_path)
                    .job_id
            }
        };

        let span = start_job_span(&entry.kind.to_string(), &job_id);
        async {
            match self.registry.transition(
                job_id,
                JobState::Running,
                Some(format!("dispatched {key}")),
            ) {
                Ok(Transition::Applied { from }) => {
                    record_state_transition(&span, &from.to_string(), "running");
                }
                Ok(Transition::Unchanged(state)) => {
                    debug!(job_id = %job_id, state = %state, "queued job already finished, skipping");
                    return false;
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "queued job cannot start, skipping");
                    return false;
                }
            }

            let handoff = Handoff::new(job_id, entry.kind, &entry.event);
            let payload = match handoff.write(&self.handoff_dir).await {
                Ok(path) => path,
                Err(e) => {
                    self.fail_spawn(job_id, format!("could not write handoff: {e}"));
                    return false;
                }
            };

            let request = SpawnRequest {
                job_id,
                job_kind: entry.kind,
                event_key: key.clone(),
                payload: payload.clone(),
                status_log: self.progress.log_path(job_id),
            };
            match self.supervisor.spawn(request) {
                Ok(worker_id) => {
                    info!(job_id = %job_id, worker_id = %worker_id, event_key = %key, "job dispatched");
                    metrics::jobs_dispatched()
                        .add(1, &[KeyValue::new("kind", entry.kind.to_string())]);
                    // A stop that landed before the worker was tracked found
                    // nothing to terminate.
                    let still_running = self
                        .registry
                        .get(job_id)
                        .is_some_and(|job| job.state == JobState::Running);
                    if !still_running {
                        warn!(job_id = %job_id, "job settled during dispatch, terminating its worker");
                        self.supervisor.terminate(job_id);
                    }
                    true
                }
                Err(e) => {
                    handoff::discard(&payload).await;
                    record_state_transition(&span, "running", "failed");
                    self.fail_spawn(job_id, e.to_string());
                    false
                }
            }
        }
        .instrument(span.clone())
        .await
    }

    fn fail_spawn(&self, job_id: JobId, detail: String) {
        error!(job_id = %job_id, error = %detail, "worker spawn failed");
        if let Err(e) = self
            .registry
            .transition(job_id, JobState::Failed, Some(detail))
        {
            warn!(job_id = %job_id, error = %e, "could not mark job failed");
        }
    }

    /// Settle a reaped worker's job.
    async fn finalize(&self, reaped: Reaped) {
        let Reaped {
            job_id,
            worker_id,
            exit,
        } = reaped;

        // Pick up whatever the worker wrote after the last poll.
        self.progress.sync_job(&self.registry, job_id).await;

        let reported_error = self
            .registry
            .get(job_id)
            .filter(|job| job.progress_percent < 0)
            .map(|job| job.detail_message);

        let (to, detail) = if !exit.success {
            (
                JobState::Failed,
                Some(format!("worker failed: {}", exit.exit_info)),
            )
        } else if let Some(message) = reported_error {
            (JobState::Failed, Some(message))
        } else {
            (JobState::Completed, None)
        };

        metrics::worker_exits().add(
            1,
            &[KeyValue::new(
                "result",
                if exit.success { "success" } else { "failure" },
            )],
        );

        match self.registry.transition(job_id, to, detail) {
            Ok(Transition::Applied { .. }) => {
                info!(job_id = %job_id, worker_id = %worker_id, state = %to, exit = %exit.exit_info, "worker reaped");
            }
            Ok(Transition::Unchanged(state)) => {
                debug!(job_id = %job_id, worker_id = %worker_id, state = %state, "worker reaped, job already settled");
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "could not finalize job");
            }
        }

        // A worker that died before consuming its input leaves it behind.
        handoff::discard(&handoff::artifact_path(&self.handoff_dir, job_id)).await;
        self.progress.retire(job_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobKind;
    use crate::worker::{InProcessLauncher, InspectProcessor};

    fn dispatcher() -> Dispatcher {
        let dir = std::env::temp_dir()
            .join("ingestq-test")
            .join(uuid::Uuid::new_v4().to_string());
        Dispatcher {
            queue: Arc::new(EventQueue::new(Duration::from_secs(15))),
            registry: Arc::new(JobRegistry::new()),
            supervisor: Arc::new(Supervisor::new(Arc::new(InProcessLauncher::new(
                InspectProcessor,
            )))),
            progress: Arc::new(ProgressChannel::new(dir.join("status"), false)),
            max_concurrent: 1,
            handoff_dir: dir.join("handoff"),
        }
    }

    #[tokio::test]
    async fn running_job_without_worker_becomes_unknown() {
        let d = dispatcher();
        let id = d.registry.create(JobKind::SimpleConversion, "/a").job_id;
        d.registry.transition(id, JobState::Running, None).unwrap();

        let report = d.tick().await;
        assert_eq!(report.orphaned, 1);

        let job = d.registry.get(id).unwrap();
        assert_eq!(job.state, JobState::Unknown);
        assert!(job.finished_at.is_none());

        // Only reported once.
        assert_eq!(d.tick().await.orphaned, 0);
    }
}
