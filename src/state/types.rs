//! The persisted pipeline state document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Marker key holding the commit a rollback resets to.
pub const BASE_COMMIT: &str = "baseCommit";

/// Lifecycle status of a phase log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Started,
    Completed,
    Failed,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::Started => write!(f, "started"),
            PhaseStatus::Completed => write!(f, "completed"),
            PhaseStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One entry of the append-only phase log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub phase: String,
    pub status: PhaseStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

/// Bookkeeping stamped on every persist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_pid: Option<u32>,
}

/// State of one pipeline run, owned by the controller and persisted after
/// every mutation. Marker values live at the top level of the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<PhaseEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub meta: StateMeta,
    #[serde(flatten)]
    pub markers: BTreeMap<String, String>,
}

impl PipelineState {
    /// Record the task of a new run.
    pub fn begin(&mut self, task: &str) {
        self.task = Some(task.to_string());
        self.started_at = Some(Utc::now());
    }

    /// Append a phase transition and make it the current phase.
    pub fn record_phase(&mut self, phase: &str, status: PhaseStatus, details: Map<String, Value>) {
        let now = Utc::now();
        self.phases.push(PhaseEntry {
            phase: phase.to_string(),
            status,
            timestamp: now,
            details,
        });
        self.current_phase = Some(phase.to_string());
        self.last_updated = Some(now);
    }

    pub fn marker(&self, name: &str) -> Option<&str> {
        self.markers.get(name).map(String::as_str)
    }

    pub fn base_commit(&self) -> Option<&str> {
        self.marker(BASE_COMMIT).filter(|c| !c.is_empty())
    }

    /// Whether nothing has happened in this document yet.
    pub fn is_empty(&self) -> bool {
        self.task.is_none() && self.phases.is_empty() && self.markers.is_empty()
    }

    /// The last `n` phase log entries, oldest first.
    pub fn recent_phases(&self, n: usize) -> &[PhaseEntry] {
        let start = self.phases.len().saturating_sub(n);
        &self.phases[start..]
    }
}
