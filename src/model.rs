//! Core data model.
//!
//! A job is one tracked unit of asynchronous work. It has identity, a kind
//! fixed at creation, a lifecycle state, and the latest progress a worker
//! reported for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::ChangeKind;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A job tracked by the registry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: JobId,

    /// Set once at creation. Never re-derived from which fields are populated.
    pub kind: JobKind,

    pub state: JobState,

    /// The resource the job processes (file for conversions, directory for batches).
    pub resource_path: String,

    /// 0..=100, or -1 after a worker reported an error.
    pub progress_percent: i32,

    pub detail_message: String,

    /// Present if and only if `kind` is [`JobKind::BatchWithCounts`].
    #[serde(flatten)]
    pub counts: Option<BatchCounts>,

    pub start_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// `emittedAt` of the newest merged progress record.
    #[serde(skip)]
    pub(crate) last_report_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn new(kind: JobKind, resource_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::new(),
            kind,
            state: JobState::Pending,
            resource_path: resource_path.into(),
            progress_percent: 0,
            detail_message: "queued".to_string(),
            counts: match kind {
                JobKind::SimpleConversion => None,
                JobKind::BatchWithCounts => Some(BatchCounts::default()),
            },
            start_time: now,
            updated_at: now,
            finished_at: None,
            last_report_at: None,
        }
    }
}

/// Processed/total counters carried by batch jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCounts {
    pub processed_count: u64,
    pub total_count: u64,
}

/// Newtype for job IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(JobId)
    }
}

/// What a job does. Decides which progress fields it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// One file converted; progress and detail only.
    #[serde(alias = "SimpleConversion")]
    SimpleConversion,
    /// Many items (e.g. a directory embedded); also processed/total counts.
    #[serde(alias = "BatchWithCounts")]
    BatchWithCounts,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobKind::SimpleConversion => "simple_conversion",
            JobKind::BatchWithCounts => "batch_with_counts",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created, waiting for a worker slot.
    Pending,
    /// A worker is bound to the job.
    Running,
    /// Worker exited successfully. Terminal.
    Completed,
    /// Worker crashed, reported an error, or could not be spawned. Terminal.
    Failed,
    /// Stopped on request. Terminal.
    Stopped,
    /// No live worker could be correlated with the job.
    Unknown,
}

impl JobState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Stopped)    // stopped before dispatch
                | (Pending, Unknown)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Stopped)
                | (Running, Unknown)
                | (Unknown, Stopped) // operator closes an orphan
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Stopped
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Stopped => "stopped",
            JobState::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "stopped" => Ok(JobState::Stopped),
            "unknown" => Ok(JobState::Unknown),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress record
// ---------------------------------------------------------------------------

/// One status line written by a worker to its job's status log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub job_id: JobId,
    /// 0..=100, or -1 for error.
    pub progress: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
    #[serde(default)]
    pub details: String,
    pub emitted_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn new(job_id: JobId, progress: i32, details: impl Into<String>) -> Self {
        Self {
            job_id,
            progress,
            processed_count: None,
            total_count: None,
            details: details.into(),
            emitted_at: Utc::now(),
        }
    }

    pub fn counts(mut self, processed: u64, total: u64) -> Self {
        self.processed_count = Some(processed);
        self.total_count = Some(total);
        self
    }

    /// Range checks that do not need the registry.
    pub fn is_well_formed(&self) -> bool {
        if !(-1..=100).contains(&self.progress) {
            return false;
        }
        match (self.processed_count, self.total_count) {
            (Some(processed), Some(total)) => processed <= total,
            (None, None) => true,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Control API payloads
// ---------------------------------------------------------------------------

/// Parameters of a `StartJob` call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobParams {
    #[serde(default)]
    pub resource_path: Option<String>,
    #[serde(default)]
    pub change_kind: Option<ChangeKind>,
}

impl StartJobParams {
    pub fn new(resource_path: impl Into<String>) -> Self {
        Self {
            resource_path: Some(resource_path.into()),
            change_kind: None,
        }
    }

    pub fn change_kind(mut self, kind: ChangeKind) -> Self {
        self.change_kind = Some(kind);
        self
    }
}

/// Response of `StartJob` and `StopJob`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAck {
    pub job_id: JobId,
    pub state: JobState,
    pub details: String,
}

impl From<&Job> for JobAck {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id,
            state: job.state,
            details: job.detail_message.clone(),
        }
    }
}

/// Response of `ListJobs`.
#[derive(Debug, Clone, Serialize)]
pub struct JobList {
    pub count: usize,
    pub jobs: Vec<Job>,
}
