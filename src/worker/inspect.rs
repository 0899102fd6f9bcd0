//! Built-in in-process processor.
//!
//! Stands in for the real conversion/embedding step: it checks the resource
//! exists and walks it, reporting progress as it goes. Batch jobs count the
//! files directly under the resource directory.

use tokio::fs;

use super::in_process::{Processor, Task, TaskFuture};
use crate::error::{Error, Result};
use crate::event::ChangeKind;
use crate::model::JobKind;
use crate::progress::ProgressReporter;

#[derive(Debug, Clone, Copy, Default)]
pub struct InspectProcessor;

impl Processor for InspectProcessor {
    fn process(&self, task: Task) -> TaskFuture {
        Box::pin(inspect(task))
    }
}

async fn inspect(task: Task) -> Result<()> {
    let Task { handoff, progress } = task;
    let path = handoff.resource_path.as_str();

    if handoff.change_kind == ChangeKind::Deleted {
        progress
            .progress(100, format!("{path} removed, nothing to convert"))
            .await?;
        return Ok(());
    }

    match handoff.job_kind {
        JobKind::SimpleConversion => {
            progress.progress(10, format!("inspecting {path}")).await?;
            let meta = match fs::metadata(path).await {
                Ok(meta) => meta,
                Err(e) => return Err(report_failure(&progress, path, e).await),
            };
            progress
                .progress(100, format!("{path}: {} bytes", meta.len()))
                .await?;
        }
        JobKind::BatchWithCounts => {
            let mut entries = match fs::read_dir(path).await {
                Ok(entries) => entries,
                Err(e) => return Err(report_failure(&progress, path, e).await),
            };
            let mut files = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file() {
                    files.push(entry.path());
                }
            }

            let total = files.len() as u64;
            progress
                .batch(0, total, format!("found {total} files"))
                .await?;
            for (i, file) in files.iter().enumerate() {
                fs::metadata(file).await?;
                let done = i as u64 + 1;
                progress
                    .batch(done, total, format!("processed {}", file.display()))
                    .await?;
            }
            if total == 0 {
                progress.progress(100, "directory is empty").await?;
            }
        }
    }
    Ok(())
}

/// Put the failure in the status log too, then hand it back as the task error.
async fn report_failure(progress: &ProgressReporter, path: &str, e: std::io::Error) -> Error {
    let message = format!("{path}: {e}");
    let _ = progress.error(message.clone()).await;
    Error::Other(message)
}
