//! Change events submitted by the directory watcher or API callers.
//!
//! An event names one resource and what happened to it. Events are
//! immutable once accepted into the queue; the dedup filter keys them by
//! `(change_kind, resource_path)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    #[serde(alias = "Created")]
    Created,
    /// Watchers that say "changed" mean the same thing.
    #[serde(alias = "Modified", alias = "changed", alias = "Changed")]
    Modified,
    #[serde(alias = "Deleted")]
    Deleted,
    #[serde(alias = "Renamed")]
    Renamed,
    /// Emitted once per file during the startup scan.
    #[serde(alias = "Initial")]
    Initial,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Renamed => "renamed",
            ChangeKind::Initial => "initial",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Ok(ChangeKind::Created),
            "modified" | "changed" => Ok(ChangeKind::Modified),
            "deleted" => Ok(ChangeKind::Deleted),
            "renamed" => Ok(ChangeKind::Renamed),
            "initial" => Ok(ChangeKind::Initial),
            other => Err(format!("unknown change kind: {other}")),
        }
    }
}

/// A change notification for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub resource_path: String,
    pub change_kind: ChangeKind,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(change_kind: ChangeKind, resource_path: impl Into<String>) -> Self {
        Self {
            resource_path: resource_path.into(),
            change_kind,
            timestamp: Utc::now(),
        }
    }

    pub fn key(&self) -> EventKey {
        EventKey::new(self.change_kind, &self.resource_path)
    }
}

/// Dedup identity of an event: change kind plus resource path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey(String);

impl EventKey {
    pub fn new(change_kind: ChangeKind, resource_path: &str) -> Self {
        Self(format!("{change_kind}:{resource_path}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
