//! Run records: one execution of a queue event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::Inputs;

/// Run status. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    fn rank(&self) -> u8 {
        match self {
            RunStatus::Queued => 0,
            RunStatus::Running => 1,
            RunStatus::Success | RunStatus::Failed => 2,
        }
    }

    /// QUEUED or RUNNING.
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Whether moving from `self` to `next` is a forward step.
    /// Re-writing the same non-terminal status is allowed.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Queued => write!(f, "QUEUED"),
            RunStatus::Running => write!(f, "RUNNING"),
            RunStatus::Success => write!(f, "SUCCESS"),
            RunStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Normalized outcome of a handler execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl RunResult {
    pub fn ok(output: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            output,
            error: None,
            duration_ms,
        }
    }

    pub fn failed(error: impl Into<String>, output: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            success: false,
            output,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// Execution record for one queue event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub job_id: String,
    pub status: RunStatus,
    pub attempt: u32,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub inputs: Inputs,
    #[serde(default)]
    pub result: Option<RunResult>,
    #[serde(default)]
    pub trace_id: Option<String>,
}

impl Run {
    /// A freshly dispatched run.
    pub fn queued(run_id: &str, job_id: &str, attempt: u32, scheduled_at: DateTime<Utc>, inputs: Inputs) -> Self {
        Self {
            run_id: run_id.to_string(),
            job_id: job_id.to_string(),
            status: RunStatus::Queued,
            attempt,
            scheduled_at,
            started_at: None,
            finished_at: None,
            inputs,
            result: None,
            trace_id: None,
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            status: self.status,
            attempt: self.attempt,
            at: self.finished_at.or(self.started_at).unwrap_or(self.scheduled_at),
            error: self.result.as_ref().and_then(|r| r.error.clone()),
        }
    }
}

/// Per-job history entry (bounded ring, most recent first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub attempt: u32,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}
