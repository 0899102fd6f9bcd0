//! In-process workers: one tokio task per job.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::{Execution, ExecutionKind, SpawnRequest, WorkerExit, WorkerHandle, WorkerLauncher};
use crate::error::{Error, Result};
use crate::progress::ProgressReporter;
use crate::worker::handoff::{self, Handoff};

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// What an in-process task receives.
#[derive(Debug, Clone)]
pub struct Task {
    pub handoff: Handoff,
    pub progress: ProgressReporter,
}

/// The processing logic run by in-process workers.
pub trait Processor: Send + Sync + 'static {
    fn process(&self, task: Task) -> TaskFuture;
}

impl<F, Fut> Processor for F
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn process(&self, task: Task) -> TaskFuture {
        Box::pin(self(task))
    }
}

/// Runs a [`Processor`] on a tokio task per job.
#[derive(Clone)]
pub struct InProcessLauncher {
    processor: Arc<dyn Processor>,
}

impl InProcessLauncher {
    pub fn new(processor: impl Processor) -> Self {
        Self {
            processor: Arc::new(processor),
        }
    }
}

impl WorkerLauncher for InProcessLauncher {
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::InProcessTask
    }

    fn spawn(&self, request: SpawnRequest) -> Result<WorkerHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::SpawnFailure(format!("no tokio runtime: {e}")))?;

        let (tx, rx) = oneshot::channel();
        let processor = Arc::clone(&self.processor);
        let payload = request.payload.clone();
        let reporter = ProgressReporter::new(request.job_id, request.status_log.clone());

        let join = runtime.spawn(async move {
            let outcome = match handoff::consume(&payload).await {
                Ok(handoff) => {
                    processor
                        .process(Task {
                            handoff,
                            progress: reporter,
                        })
                        .await
                }
                Err(e) => Err(e),
            };
            let _ = tx.send(outcome.map_err(|e| e.to_string()));
        });

        Ok(WorkerHandle::new(
            ExecutionKind::InProcessTask,
            &request,
            Box::new(TaskExecution { rx, join }),
        ))
    }
}

struct TaskExecution {
    rx: oneshot::Receiver<std::result::Result<(), String>>,
    join: JoinHandle<()>,
}

impl Execution for TaskExecution {
    fn try_exit(&mut self) -> Option<WorkerExit> {
        match self.rx.try_recv() {
            Ok(Ok(())) => Some(WorkerExit::success("task finished")),
            Ok(Err(message)) => Some(WorkerExit::failure(message)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            // Sender dropped without a value: aborted or panicked.
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(WorkerExit::failure("task aborted before returning"))
            }
        }
    }

    fn terminate(&mut self) {
        self.join.abort();
    }
}
