//! Queue events and observability log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{Inputs, JobSpec, Priority};

/// Separator between a root run id and its retry attempt.
const RETRY_SEP: char = '~';

/// One dispatched unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub run_id: String,
    pub job_id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub inputs: Inputs,
    /// 0-based attempt number.
    #[serde(default)]
    pub attempt: u32,
    pub scheduled_at: DateTime<Utc>,
    pub timeout_ms: u64,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl QueueEvent {
    /// First attempt of a job dispatch.
    pub fn from_spec(spec: &JobSpec, run_id: &str, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.to_string(),
            job_id: spec.job_id.clone(),
            job_type: spec.job_type.clone(),
            inputs: spec.inputs.clone(),
            attempt: 0,
            scheduled_at,
            timeout_ms: spec.timeout_ms,
            trace_id: Some(uuid::Uuid::new_v4().to_string()),
            priority: spec.priority,
        }
    }

    /// The follow-up event for `attempt + 1`, with a deterministic run id.
    pub fn next_attempt(&self, scheduled_at: DateTime<Utc>) -> Self {
        let attempt = self.attempt + 1;
        Self {
            run_id: retry_run_id(&self.run_id, attempt),
            attempt,
            scheduled_at,
            ..self.clone()
        }
    }
}

/// Run id used for retry `attempt` of the run `run_id`.
/// `r1~1` retried again becomes `r1~2`, never `r1~1~2`.
pub fn retry_run_id(run_id: &str, attempt: u32) -> String {
    let root = run_id.split(RETRY_SEP).next().unwrap_or(run_id);
    format!("{root}{RETRY_SEP}{attempt}")
}

/// Append-only observability log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityEvent {
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub ts: DateTime<Utc>,
}

/// Names of the events the core emits.
pub mod names {
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_COMPLETED: &str = "run.completed";
    pub const RUN_FAILED: &str = "run.failed";
    pub const RUN_RETRY_SCHEDULED: &str = "run.retry_scheduled";
    pub const RUN_DUPLICATE_SKIPPED: &str = "run.duplicate_skipped";
    pub const DISPATCHED: &str = "scheduler.dispatched";
    pub const SKIPPED_OVERLAP: &str = "scheduler.dispatch_skipped_overlap";
    pub const SKIPPED_PENDING_APPROVAL: &str = "scheduler.dispatch_skipped_pending_approval";
    pub const SKIPPED_COOLDOWN: &str = "scheduler.dispatch_skipped_cooldown";
    pub const SKIPPED_FLOW_LIMIT: &str = "scheduler.dispatch_skipped_flow_limit";
    pub const SKIPPED_PRESSURE: &str = "scheduler.dispatch_skipped_pressure";
    pub const DISPATCH_CAPPED: &str = "scheduler.dispatch_capped";
    pub const PRESSURE_ENTERED: &str = "scheduler.pressure_entered";
    pub const PRESSURE_EXITED: &str = "scheduler.pressure_exited";
    pub const APPROVAL_CREATED: &str = "approval.request_created";
    pub const APPROVAL_DECIDED: &str = "approval.decided";
    pub const JOB_SAVED: &str = "job.saved";
    pub const JOB_ROLLED_BACK: &str = "job.rolled_back";
}
