//! Worker execution strategies.
//!
//! A worker performs the processing for exactly one job. It can be a tokio
//! task inside the orchestrator ([`InProcessLauncher`]) or a separate OS
//! process ([`ProcessLauncher`]). Both sit behind [`WorkerLauncher`], chosen
//! once at startup, and both produce a [`WorkerHandle`] the dispatcher polls
//! the same way.

pub mod handoff;
pub mod in_process;
pub mod inspect;
pub mod process;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::Result;
use crate::event::EventKey;
use crate::model::{JobId, JobKind};

pub use handoff::Handoff;
pub use in_process::{InProcessLauncher, Processor, Task, TaskFuture};
pub use inspect::InspectProcessor;
pub use process::ProcessLauncher;

/// Environment variable carrying the job kind into an out-of-process worker.
pub const ENV_JOB_KIND: &str = "INGESTQ_JOB_KIND";

/// How a worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    InProcessTask,
    OutOfProcess,
}

impl std::fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionKind::InProcessTask => "in_process",
            ExecutionKind::OutOfProcess => "process",
        };
        write!(f, "{s}")
    }
}

/// Process-wide worker sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorkerId(pub u64);

impl WorkerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// How a worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub success: bool,
    /// Exit code, signal, or the task's error message.
    pub exit_info: String,
}

impl WorkerExit {
    pub fn success(info: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_info: info.into(),
        }
    }

    pub fn failure(info: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_info: info.into(),
        }
    }
}

/// Everything a launcher needs to start one worker.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub job_id: JobId,
    pub job_kind: JobKind,
    pub event_key: EventKey,
    /// The handoff artifact. The worker's only input.
    pub payload: PathBuf,
    /// Where the worker appends progress records.
    pub status_log: PathBuf,
}

/// A running worker as seen by its launcher.
pub trait Execution: Send {
    /// Non-blocking exit check.
    fn try_exit(&mut self) -> Option<WorkerExit>;

    /// Best-effort abort (task) or kill (process).
    fn terminate(&mut self);
}

/// Execution strategy, selected by configuration.
pub trait WorkerLauncher: Send + Sync {
    fn kind(&self) -> ExecutionKind;

    /// Start a worker for `request`. Fails if nothing could be launched.
    fn spawn(&self, request: SpawnRequest) -> Result<WorkerHandle>;
}

/// Supervisor-owned handle to one worker.
pub struct WorkerHandle {
    pub worker_id: WorkerId,
    pub execution_kind: ExecutionKind,
    pub bound_job_id: JobId,
    pub bound_event_key: EventKey,
    execution: Box<dyn Execution>,
    exit: Option<WorkerExit>,
}

impl WorkerHandle {
    pub fn new(
        execution_kind: ExecutionKind,
        request: &SpawnRequest,
        execution: Box<dyn Execution>,
    ) -> Self {
        Self {
            worker_id: WorkerId::next(),
            execution_kind,
            bound_job_id: request.job_id,
            bound_event_key: request.event_key.clone(),
            execution,
            exit: None,
        }
    }

    pub fn is_done(&mut self) -> bool {
        self.poll();
        self.exit.is_some()
    }

    /// Exit information once the worker is done.
    pub fn result(&mut self) -> Option<WorkerExit> {
        self.poll();
        self.exit.clone()
    }

    pub fn terminate(&mut self) {
        if self.exit.is_none() {
            self.execution.terminate();
        }
    }

    fn poll(&mut self) {
        if self.exit.is_none() {
            self.exit = self.execution.try_exit();
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("worker_id", &self.worker_id)
            .field("execution_kind", &self.execution_kind)
            .field("bound_job_id", &self.bound_job_id)
            .field("bound_event_key", &self.bound_event_key)
            .field("exit", &self.exit)
            .finish()
    }
}
