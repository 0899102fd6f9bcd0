//! Out-of-process workers: one OS process per job.
//!
//! The process gets the handoff path as its only argument. Job id, job kind
//! and the status log path travel in `INGESTQ_*` environment variables.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tracing::debug;

use super::{
    ENV_JOB_KIND, Execution, ExecutionKind, SpawnRequest, WorkerExit, WorkerHandle,
    WorkerLauncher,
};
use crate::error::{Error, Result};
use crate::progress::{ENV_JOB_ID, ENV_STATUS_LOG};

/// Launches a configured executable per job.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    /// Relative commands resolve against the current directory now, not
    /// against wherever the process happens to run later.
    pub fn new(command: &Path) -> Result<Self> {
        let command = if command.is_relative() {
            std::env::current_dir()?.join(command)
        } else {
            command.to_path_buf()
        };
        Ok(Self {
            command,
            args: Vec::new(),
        })
    }

    /// Extra arguments placed before the handoff path.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::OutOfProcess
    }

    fn spawn(&self, request: SpawnRequest) -> Result<WorkerHandle> {
        debug!(
            job_id = %request.job_id,
            command = %self.command.display(),
            "launching worker process"
        );

        let child = Command::new(&self.command)
            .args(&self.args)
            .arg(&request.payload)
            .env(ENV_JOB_ID, request.job_id.to_string())
            .env(ENV_JOB_KIND, request.job_kind.to_string())
            .env(ENV_STATUS_LOG, &request.status_log)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::SpawnFailure(format!("{}: {e}", self.command.display())))?;

        Ok(WorkerHandle::new(
            ExecutionKind::OutOfProcess,
            &request,
            Box::new(ProcessExecution { child }),
        ))
    }
}

struct ProcessExecution {
    child: Child,
}

impl Execution for ProcessExecution {
    fn try_exit(&mut self) -> Option<WorkerExit> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(exit_from_status(status)),
            Ok(None) => None,
            Err(e) => Some(WorkerExit::failure(format!("wait failed: {e}"))),
        }
    }

    fn terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "kill failed, process probably already exited");
        }
    }
}

fn exit_from_status(status: ExitStatus) -> WorkerExit {
    if status.success() {
        return WorkerExit::success("exit code 0");
    }
    if let Some(code) = status.code() {
        return WorkerExit::failure(format!("exit code {code}"));
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        if let Some(signal) = status.signal() {
            return WorkerExit::failure(format!("killed by signal {signal}"));
        }
    }
    WorkerExit::failure("terminated abnormally")
}
