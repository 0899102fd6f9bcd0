//! Handoff artifact: the single input a worker receives.
//!
//! The dispatcher serializes the event to `<handoff_dir>/<job_id>.json` and
//! passes only that path. The worker reads it and deletes it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::event::{ChangeEvent, ChangeKind};
use crate::model::{JobId, JobKind};

/// Serialized payload of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handoff {
    pub job_id: JobId,
    pub job_kind: JobKind,
    pub resource_path: String,
    pub change_kind: ChangeKind,
}

impl Handoff {
    pub fn new(job_id: JobId, job_kind: JobKind, event: &ChangeEvent) -> Self {
        Self {
            job_id,
            job_kind,
            resource_path: event.resource_path.clone(),
            change_kind: event.change_kind,
        }
    }

    /// Write the artifact into `dir` and return its path.
    pub async fn write(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = artifact_path(dir, self.job_id);
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, json).await?;
        debug!(job_id = %self.job_id, path = %path.display(), "handoff written");
        Ok(path)
    }
}

/// Where the artifact for `job_id` lives under `dir`.
pub fn artifact_path(dir: &Path, job_id: JobId) -> PathBuf {
    dir.join(format!("{job_id}.json"))
}

/// Read a handoff artifact and delete it.
///
/// The file is removed even when it does not parse, so a bad artifact is
/// not picked up twice.
pub async fn consume(path: &Path) -> Result<Handoff> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Other(format!("read handoff {}: {e}", path.display())))?;
    tokio::fs::remove_file(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Remove an artifact nobody consumed (spawn failed, worker never started).
pub async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "unconsumed handoff removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove handoff"),
    }
}
