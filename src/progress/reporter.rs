//! Worker-side writer for the status log.
//!
//! Used by in-process tasks directly and by external workers through
//! `ingestq report`. Each record is one JSON line written with a single
//! append, so the orchestrator never sees two records interleaved.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::model::{JobId, ProgressRecord};

/// Appends progress records for one job.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    path: PathBuf,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, path: impl Into<PathBuf>) -> Self {
        Self {
            job_id,
            path: path.into(),
        }
    }

    /// Build a reporter from `INGESTQ_JOB_ID` and `INGESTQ_STATUS_LOG`.
    pub fn from_env() -> Result<Self> {
        let job_id = std::env::var(super::ENV_JOB_ID)
            .map_err(|_| crate::error::Error::Config(format!("{} is not set", super::ENV_JOB_ID)))?
            .parse::<JobId>()
            .map_err(|e| crate::error::Error::Config(format!("bad {}: {e}", super::ENV_JOB_ID)))?;
        let path = std::env::var(super::ENV_STATUS_LOG).map_err(|_| {
            crate::error::Error::Config(format!("{} is not set", super::ENV_STATUS_LOG))
        })?;
        Ok(Self::new(job_id, path))
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn progress(&self, percent: i32, details: impl Into<String>) -> Result<()> {
        self.report(&ProgressRecord::new(self.job_id, percent, details))
            .await
    }

    /// Report batch counters; percent is derived from them.
    pub async fn batch(&self, processed: u64, total: u64, details: impl Into<String>) -> Result<()> {
        let percent = if total == 0 {
            0
        } else {
            ((processed.min(total) * 100) / total) as i32
        };
        self.report(&ProgressRecord::new(self.job_id, percent, details).counts(processed, total))
            .await
    }

    pub async fn error(&self, details: impl Into<String>) -> Result<()> {
        self.report(&ProgressRecord::new(self.job_id, -1, details))
            .await
    }

    pub async fn report(&self, record: &ProgressRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        // tokio's File hands writes to a blocking thread; wait for it to land.
        file.flush().await?;
        Ok(())
    }
}
