//! Job registry: the authoritative job-id → job map.
//!
//! Every state change goes through [`JobRegistry::transition`], which holds
//! the write lock for the check and the write. Concurrent writers on one job
//! are therefore linearized: the first terminal transition to commit wins and
//! later ones see [`Transition::Unchanged`].

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::model::{Job, JobId, JobKind, JobState, ProgressRecord};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Outcome of a transition request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The state changed from `from` to the requested one.
    Applied { from: JobState },
    /// The job was already terminal; nothing was written.
    Unchanged(JobState),
}

/// Outcome of merging one progress record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// Job is not running; late records are dropped.
    NotRunning,
    /// Older than the record already merged.
    Stale,
    /// Out of range or inconsistent with the job's kind.
    Invalid,
    NotFound,
}

impl MergeOutcome {
    fn label(self) -> &'static str {
        match self {
            MergeOutcome::Merged => "merged",
            MergeOutcome::NotRunning => "not_running",
            MergeOutcome::Stale => "stale",
            MergeOutcome::Invalid => "invalid",
            MergeOutcome::NotFound => "not_found",
        }
    }
}

struct Entry {
    seq: u64,
    job: Job,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    jobs: HashMap<JobId, Entry>,
}

/// Thread-safe job table. Reads return owned snapshots.
#[derive(Default)]
pub struct JobRegistry {
    inner: RwLock<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a `Pending` job and return its snapshot.
    pub fn create(&self, kind: JobKind, resource_path: impl Into<String>) -> Job {
        let job = Job::new(kind, resource_path);
        let mut inner = self.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            job.job_id,
            Entry {
                seq,
                job: job.clone(),
            },
        );
        tracing::debug!(job_id = %job.job_id, kind = %kind, "job created");
        job
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.read().jobs.get(&id).map(|e| e.job.clone())
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let inner = self.read();
        let mut entries: Vec<&Entry> = inner.jobs.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.job.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// IDs of jobs currently `Running`.
    pub fn running_ids(&self) -> Vec<JobId> {
        self.read()
            .jobs
            .values()
            .filter(|e| e.job.state == JobState::Running)
            .map(|e| e.job.job_id)
            .collect()
    }

    /// Move a job to `to`, updating its detail message when one is given.
    ///
    /// Terminal jobs are left as they are and reported as
    /// [`Transition::Unchanged`]. Any other disallowed move is an error.
    pub fn transition(
        &self,
        id: JobId,
        to: JobState,
        detail: Option<String>,
    ) -> Result<Transition> {
        let mut inner = self.write();
        let entry = inner.jobs.get_mut(&id).ok_or(Error::NotFound(id))?;
        let job = &mut entry.job;
        let from = job.state;

        if from.is_terminal() {
            return Ok(Transition::Unchanged(from));
        }
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }

        let now = Utc::now();
        job.state = to;
        job.updated_at = now;
        if let Some(detail) = detail {
            job.detail_message = detail;
        }
        if to.is_terminal() {
            job.finished_at = Some(now);
        }
        if to == JobState::Completed && job.progress_percent != 100 {
            job.progress_percent = 100;
        }
        drop(inner);

        tracing::info!(job_id = %id, from = %from, to = %to, "job state transition");
        metrics::job_state_transitions().add(
            1,
            &[
                KeyValue::new("from", from.to_string()),
                KeyValue::new("to", to.to_string()),
            ],
        );
        Ok(Transition::Applied { from })
    }

    /// Apply `StopJob` semantics and return the resulting state.
    ///
    /// Terminal jobs echo their state unchanged.
    pub fn stop(&self, id: JobId, detail: &str) -> Result<JobState> {
        match self.transition(id, JobState::Stopped, Some(detail.to_string()))? {
            Transition::Applied { .. } => Ok(JobState::Stopped),
            Transition::Unchanged(state) => Ok(state),
        }
    }

    /// Merge the newest status record a worker wrote for a running job.
    ///
    /// Bad records never overwrite good values: the job keeps whatever it
    /// had before.
    pub fn merge_progress(&self, record: &ProgressRecord) -> MergeOutcome {
        let outcome = self.merge_inner(record);
        metrics::progress_merges().add(1, &[KeyValue::new("result", outcome.label())]);
        if !matches!(outcome, MergeOutcome::Merged) {
            tracing::debug!(
                job_id = %record.job_id,
                result = outcome.label(),
                "progress record ignored"
            );
        }
        outcome
    }

    fn merge_inner(&self, record: &ProgressRecord) -> MergeOutcome {
        if !record.is_well_formed() {
            return MergeOutcome::Invalid;
        }
        let mut inner = self.write();
        let Some(entry) = inner.jobs.get_mut(&record.job_id) else {
            return MergeOutcome::NotFound;
        };
        let job = &mut entry.job;
        if job.state != JobState::Running {
            return MergeOutcome::NotRunning;
        }
        if job
            .last_report_at
            .is_some_and(|last| record.emitted_at < last)
        {
            return MergeOutcome::Stale;
        }

        job.progress_percent = record.progress;
        job.detail_message = record.details.clone();
        if let (Some(counts), Some(processed), Some(total)) =
            (job.counts.as_mut(), record.processed_count, record.total_count)
        {
            counts.processed_count = processed;
            counts.total_count = total;
        }
        job.last_report_at = Some(record.emitted_at);
        job.updated_at = Utc::now();
        MergeOutcome::Merged
    }
}

impl JobRegistry {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
