//! Core engine. The public API for submitting and managing jobs.
//!
//! [`Orchestrator`] is the explicitly constructed context that owns the
//! queue, the registry, the worker supervisor and the progress channel.
//! It is created once at startup and passed (cloned) to whoever needs it:
//! the HTTP layer, the signal handler, tests.

pub mod dispatcher;
pub mod supervisor;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use serde::Serialize;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::event::{ChangeEvent, ChangeKind};
use crate::model::{Job, JobAck, JobId, JobKind, JobList, JobState, StartJobParams};
use crate::progress::ProgressChannel;
use crate::queue::{EventQueue, QueueEntry};
use crate::registry::{JobRegistry, Transition};
use crate::telemetry::metrics;
use crate::worker::{ExecutionKind, WorkerLauncher};

pub use dispatcher::{DispatchReport, Dispatcher};
pub use supervisor::Supervisor;

/// Tuning for the orchestrator loops.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on simultaneously active workers.
    pub max_concurrent_jobs: usize,
    /// Identical events inside this window are suppressed.
    pub dedup_interval: Duration,
    pub dispatch_interval: Duration,
    pub progress_interval: Duration,
    /// Root for `handoff/` and `status/`.
    pub state_dir: PathBuf,
    /// Keep status logs after a job finishes instead of deleting them.
    pub keep_status_logs: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            dedup_interval: Duration::from_secs(15),
            dispatch_interval: Duration::from_secs(1),
            progress_interval: Duration::from_secs(1),
            state_dir: PathBuf::from("/tmp/ingestq"),
            keep_status_logs: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn handoff_dir(&self) -> PathBuf {
        self.state_dir.join("handoff")
    }

    pub fn status_dir(&self) -> PathBuf {
        self.state_dir.join("status")
    }
}

/// Result of submitting a change event.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    /// False when the dedup window suppressed the event.
    pub accepted: bool,
    pub queue_depth: usize,
}

/// The orchestration context.
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    queue: Arc<EventQueue>,
    registry: Arc<JobRegistry>,
    supervisor: Arc<Supervisor>,
    progress: Arc<ProgressChannel>,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
}

impl Clone for Orchestrator {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            queue: Arc::clone(&self.queue),
            registry: Arc::clone(&self.registry),
            supervisor: Arc::clone(&self.supervisor),
            progress: Arc::clone(&self.progress),
            dispatcher: Arc::clone(&self.dispatcher),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        let queue = Arc::new(EventQueue::new(config.dedup_interval));
        let registry = Arc::new(JobRegistry::new());
        let supervisor = Arc::new(Supervisor::new(launcher));
        let progress = Arc::new(ProgressChannel::new(
            config.status_dir(),
            config.keep_status_logs,
        ));
        let dispatcher = Arc::new(Dispatcher {
            queue: Arc::clone(&queue),
            registry: Arc::clone(&registry),
            supervisor: Arc::clone(&supervisor),
            progress: Arc::clone(&progress),
            max_concurrent: config.max_concurrent_jobs,
            handoff_dir: config.handoff_dir(),
        });

        Self {
            config: Arc::new(config),
            queue,
            registry,
            supervisor,
            progress,
            dispatcher,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create the state directories.
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.config.handoff_dir()).await?;
        self.progress.init().await?;
        Ok(())
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn execution_kind(&self) -> ExecutionKind {
        self.supervisor.execution_kind()
    }

    /// Signal the loops to stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been called.
    pub fn shutdown_signal(&self) -> WaitForCancellationFutureOwned {
        self.shutdown.clone().cancelled_owned()
    }

    /// Run the dispatcher and the progress poller until [`shutdown`](Self::shutdown).
    ///
    /// On the way out every live worker is aborted or killed and its job
    /// marked `Stopped`. Nothing is drained.
    pub async fn run(&self) -> Result<()> {
        self.init().await?;
        info!(
            max_concurrent = self.config.max_concurrent_jobs,
            dedup_secs = self.config.dedup_interval.as_secs_f64(),
            state_dir = %self.config.state_dir.display(),
            "orchestrator started"
        );

        let poller = tokio::spawn(Arc::clone(&self.progress).run(
            Arc::clone(&self.registry),
            self.config.progress_interval,
            self.shutdown.child_token(),
        ));

        self.dispatcher
            .run(self.config.dispatch_interval, self.shutdown.clone())
            .await;

        for job_id in self.supervisor.terminate_all() {
            if let Err(e) = self.registry.transition(
                job_id,
                JobState::Stopped,
                Some("orchestrator shut down".to_string()),
            ) {
                warn!(job_id = %job_id, error = %e, "could not mark job stopped");
            }
        }
        if let Err(e) = poller.await {
            warn!(error = %e, "progress poller task failed");
        }
        info!("orchestrator stopped");
        Ok(())
    }

    /// One dispatcher tick, for callers that drive the loop themselves.
    pub async fn dispatch_once(&self) -> DispatchReport {
        self.dispatcher.tick().await
    }

    /// One progress poll, for callers that drive the loop themselves.
    pub async fn poll_progress_once(&self) -> usize {
        self.progress.poll_once(&self.registry).await
    }

    // -----------------------------------------------------------------------
    // Events and queue
    // -----------------------------------------------------------------------

    /// Offer a change event to the dedup filter and queue.
    pub fn submit_event(&self, event: ChangeEvent) -> SubmitOutcome {
        let key = event.key();
        let accepted = self.queue.enqueue(event);
        metrics::events_submitted().add(
            1,
            &[KeyValue::new(
                "result",
                if accepted { "accepted" } else { "suppressed" },
            )],
        );
        if accepted {
            tracing::debug!(event_key = %key, "event queued");
        }
        SubmitOutcome {
            accepted,
            queue_depth: self.queue.depth(),
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Drop every queued entry. Jobs already created for them by
    /// [`start_job`](Self::start_job) are marked `Stopped`.
    pub fn clear_queue(&self) -> usize {
        let removed = self.queue.clear();
        for job_id in removed.iter().filter_map(|entry| entry.job_id) {
            if let Err(e) = self.registry.transition(
                job_id,
                JobState::Stopped,
                Some("removed from queue".to_string()),
            ) {
                warn!(job_id = %job_id, error = %e, "could not stop cleared job");
            }
        }
        info!(removed = removed.len(), "queue cleared");
        removed.len()
    }

    pub fn active_workers(&self) -> usize {
        self.supervisor.active_count()
    }

    // -----------------------------------------------------------------------
    // Control API
    // -----------------------------------------------------------------------

    /// Create a job and queue it for the next free worker slot.
    pub fn start_job(&self, kind: JobKind, params: StartJobParams) -> Result<JobAck> {
        let resource_path = params
            .resource_path
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| Error::Validation("resourcePath is required".to_string()))?;
        let change_kind = params.change_kind.unwrap_or(ChangeKind::Modified);

        let job = self.registry.create(kind, &resource_path);
        self.queue.enqueue_job(QueueEntry {
            event: ChangeEvent::new(change_kind, resource_path),
            kind,
            job_id: Some(job.job_id),
        });
        info!(job_id = %job.job_id, kind = %kind, path = %job.resource_path, "job started");
        Ok(JobAck::from(&job))
    }

    pub fn get_job(&self, id: JobId) -> Result<Job> {
        self.registry.get(id).ok_or(Error::NotFound(id))
    }

    pub fn list_jobs(&self) -> JobList {
        let jobs = self.registry.list();
        JobList {
            count: jobs.len(),
            jobs,
        }
    }

    /// Stop a job. Terminal jobs are returned as they are.
    pub fn stop_job(&self, id: JobId) -> Result<JobAck> {
        let transition =
            self.registry
                .transition(id, JobState::Stopped, Some("stopped by request".to_string()))?;
        if let Transition::Applied { from } = transition {
            let terminated = self.supervisor.terminate(id);
            info!(job_id = %id, from = %from, terminated, "job stopped");
        }
        self.get_job(id).map(|job| JobAck::from(&job))
    }
}
