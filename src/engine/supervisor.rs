//! Worker supervisor: the table of live workers, keyed by job.
//!
//! Only the dispatcher spawns and reaps. `StopJob` may terminate a worker
//! from another task; the handle stays in the table, and keeps its slot,
//! until the process or task has actually gone and the next reap sees it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::error::Result;
use crate::model::JobId;
use crate::worker::{ExecutionKind, SpawnRequest, WorkerExit, WorkerHandle, WorkerId, WorkerLauncher};

/// A worker removed from the table after it finished.
#[derive(Debug, Clone)]
pub struct Reaped {
    pub job_id: JobId,
    pub worker_id: WorkerId,
    pub exit: WorkerExit,
}

pub struct Supervisor {
    launcher: Arc<dyn WorkerLauncher>,
    active: Mutex<HashMap<JobId, WorkerHandle>>,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            launcher,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn execution_kind(&self) -> ExecutionKind {
        self.launcher.kind()
    }

    /// Launch a worker and start tracking it.
    pub fn spawn(&self, request: SpawnRequest) -> Result<WorkerId> {
        let job_id = request.job_id;
        let handle = self.launcher.spawn(request)?;
        let worker_id = handle.worker_id;
        debug!(
            job_id = %job_id,
            worker_id = %worker_id,
            kind = %handle.execution_kind,
            event_key = %handle.bound_event_key,
            "worker spawned"
        );
        if let Some(previous) = self.lock().insert(job_id, handle) {
            warn!(job_id = %job_id, worker_id = %previous.worker_id, "replaced a live worker handle");
        }
        Ok(worker_id)
    }

    /// Remove and return every worker that has finished.
    pub fn reap(&self) -> Vec<Reaped> {
        let mut active = self.lock();
        let done: Vec<JobId> = active
            .iter_mut()
            .filter_map(|(job_id, handle)| handle.is_done().then_some(*job_id))
            .collect();

        done.into_iter()
            .filter_map(|job_id| {
                let mut handle = active.remove(&job_id)?;
                let exit = handle.result()?;
                Some(Reaped {
                    job_id,
                    worker_id: handle.worker_id,
                    exit,
                })
            })
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_tracking(&self, job_id: JobId) -> bool {
        self.lock().contains_key(&job_id)
    }

    /// Ask the worker bound to `job_id` to stop. Returns false if none is tracked.
    pub fn terminate(&self, job_id: JobId) -> bool {
        match self.lock().get_mut(&job_id) {
            Some(handle) => {
                handle.terminate();
                true
            }
            None => false,
        }
    }

    /// Terminate and forget every worker. Used at shutdown; no drain.
    pub fn terminate_all(&self) -> Vec<JobId> {
        let mut active = self.lock();
        active
            .drain()
            .map(|(job_id, mut handle)| {
                handle.terminate();
                job_id
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, WorkerHandle>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}
