//! Progress channel: status logs written by workers, tailed by the orchestrator.
//!
//! A worker may be a separate OS process, so it cannot touch the registry.
//! Instead it appends [`ProgressRecord`] lines to `<status_dir>/<job_id>.jsonl`.
//! The poller reads whatever was appended since its last visit and merges the
//! newest valid record. Anything older is dropped: only the latest status is
//! ever shown, so the channel is lossy on purpose.

pub mod reporter;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{JobId, JobState, ProgressRecord};
use crate::registry::{JobRegistry, MergeOutcome};

pub use reporter::ProgressReporter;

/// Environment variable carrying the job id into a worker.
pub const ENV_JOB_ID: &str = "INGESTQ_JOB_ID";
/// Environment variable carrying the status log path into a worker.
pub const ENV_STATUS_LOG: &str = "INGESTQ_STATUS_LOG";

/// Orchestrator side of the status logs.
pub struct ProgressChannel {
    dir: PathBuf,
    /// Byte offset up to which each log has been consumed.
    offsets: Mutex<HashMap<JobId, u64>>,
    keep_logs: bool,
}

impl ProgressChannel {
    pub fn new(dir: impl Into<PathBuf>, keep_logs: bool) -> Self {
        Self {
            dir: dir.into(),
            offsets: Mutex::new(HashMap::new()),
            keep_logs,
        }
    }

    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    pub fn log_path(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{id}.jsonl"))
    }

    pub fn reporter(&self, id: JobId) -> ProgressReporter {
        ProgressReporter::new(id, self.log_path(id))
    }

    /// Newest well-formed record appended since the last call, if any.
    ///
    /// A trailing line without a newline is still being written and is left
    /// for the next call.
    pub async fn latest(&self, id: JobId) -> Result<Option<ProgressRecord>> {
        let path = self.log_path(id);
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut offset = self.offset(id);
        let len = file.metadata().await?.len();
        if len < offset {
            // Truncated or replaced underneath us; start over.
            warn!(job_id = %id, "status log shrank, rereading from start");
            offset = 0;
        }
        if len == offset {
            return Ok(None);
        }

        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity((len - offset) as usize);
        file.read_to_end(&mut buf).await?;

        let Some(end) = buf.iter().rposition(|b| *b == b'\n') else {
            return Ok(None);
        };
        self.set_offset(id, offset + end as u64 + 1);

        let newest = buf[..end]
            .split(|b| *b == b'\n')
            .rev()
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .find_map(|line| match serde_json::from_slice::<ProgressRecord>(line) {
                Ok(record) if record.job_id == id && record.is_well_formed() => Some(record),
                Ok(_) => {
                    debug!(job_id = %id, "ignoring out-of-range status record");
                    None
                }
                Err(e) => {
                    debug!(job_id = %id, error = %e, "ignoring unreadable status record");
                    None
                }
            });
        Ok(newest)
    }

    /// Merge the newest record for one job. Returns whether anything merged.
    pub async fn sync_job(&self, registry: &JobRegistry, id: JobId) -> bool {
        let merged = match self.latest(id).await {
            Ok(Some(record)) => registry.merge_progress(&record) == MergeOutcome::Merged,
            Ok(None) => false,
            Err(e) => {
                warn!(job_id = %id, error = %e, "failed to read status log");
                false
            }
        };
        // The job may have been finalized and retired while we were reading.
        if !registry
            .get(id)
            .is_some_and(|job| job.state == JobState::Running)
        {
            self.forget(id);
        }
        merged
    }

    /// One poll over every running job. Returns how many records merged.
    pub async fn poll_once(&self, registry: &JobRegistry) -> usize {
        let mut merged = 0;
        for id in registry.running_ids() {
            if self.sync_job(registry, id).await {
                merged += 1;
            }
        }
        merged
    }

    /// Forget a finished job and apply the retention policy to its log.
    pub async fn retire(&self, id: JobId) {
        self.forget(id);
        if self.keep_logs {
            return;
        }
        match tokio::fs::remove_file(self.log_path(id)).await {
            Ok(()) => debug!(job_id = %id, "status log removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(job_id = %id, error = %e, "failed to remove status log"),
        }
    }

    /// Run the poller until `cancel` fires.
    pub async fn run(
        self: Arc<Self>,
        registry: Arc<JobRegistry>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        info!(
            poll_interval_ms = interval.as_millis() as u64,
            "progress poller started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("progress poller shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_once(&registry).await;
                }
            }
        }
    }

    /// Number of logs with a read offset on record.
    pub fn tracked_jobs(&self) -> usize {
        self.offsets.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn forget(&self, id: JobId) {
        self.offsets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    fn offset(&self, id: JobId) -> u64 {
        self.offsets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    fn set_offset(&self, id: JobId, offset: u64) {
        self.offsets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, offset);
    }
}
