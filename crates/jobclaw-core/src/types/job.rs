//! Job definitions: the stored, versioned unit of scheduled work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{JobClawError, Result};

/// Opaque handler inputs.
pub type Inputs = serde_json::Map<String, serde_json::Value>;

/// A stored job definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Unique job ID.
    pub job_id: String,
    /// Handler type (may be an alias or a skill name).
    #[serde(rename = "type")]
    pub job_type: String,
    /// When to dispatch. `None` = manual trigger only.
    #[serde(default)]
    pub schedule: Option<Schedule>,
    /// Hard execution timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Handler-specific inputs.
    #[serde(default)]
    pub inputs: Inputs,
    #[serde(default)]
    pub priority: Priority,
    /// Jobs sharing a flow group share `max_active_runs`.
    #[serde(default)]
    pub flow_group: Option<String>,
    #[serde(default)]
    pub max_active_runs: Option<u32>,
    #[serde(default)]
    pub concurrency_key: Option<String>,
    /// Dispatch even if a previous run is still active.
    #[serde(default)]
    pub allow_overlap: bool,
}

pub fn default_timeout_ms() -> u64 {
    60_000
}

/// How a job is triggered. Externally tagged, so cron and interval are
/// mutually exclusive: `{"cron": "0 8 * * *"}` or `{"interval_sec": 30}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// 5-field cron expression (minute granularity).
    Cron(String),
    /// Every N seconds.
    IntervalSec(u64),
}

/// Retry table for failed runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_retry: u32,
    /// Delay per attempt; the last entry is reused for later attempts.
    #[serde(default = "default_backoff")]
    pub backoff_sec: Vec<u64>,
}

fn default_backoff() -> Vec<u64> {
    vec![10, 30, 60]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry: 0,
            backoff_sec: default_backoff(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` failed, clamped to the table.
    pub fn delay_for(&self, attempt: u32) -> u64 {
        if self.backoff_sec.is_empty() {
            return 0;
        }
        let idx = (attempt as usize).min(self.backoff_sec.len() - 1);
        self.backoff_sec[idx]
    }
}

/// Dispatch priority. Only `Critical` dispatches under pressure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl JobSpec {
    /// Create a minimal spec; mostly used by tests and the CLI.
    pub fn new(job_id: &str, job_type: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
            schedule: None,
            timeout_ms: default_timeout_ms(),
            retry_policy: RetryPolicy::default(),
            inputs: Inputs::new(),
            priority: Priority::default(),
            flow_group: None,
            max_active_runs: None,
            concurrency_key: None,
            allow_overlap: false,
        }
    }

    pub fn with_interval(mut self, secs: u64) -> Self {
        self.schedule = Some(Schedule::IntervalSec(secs));
        self
    }

    pub fn with_cron(mut self, expression: &str) -> Self {
        self.schedule = Some(Schedule::Cron(expression.to_string()));
        self
    }

    pub fn with_retry(mut self, max_retry: u32, backoff_sec: Vec<u64>) -> Self {
        self.retry_policy = RetryPolicy { max_retry, backoff_sec };
        self
    }

    /// Interval in seconds, if this is an interval job.
    pub fn interval_sec(&self) -> Option<u64> {
        match &self.schedule {
            Some(Schedule::IntervalSec(s)) => Some(*s),
            _ => None,
        }
    }

    /// Cron expression, if this is a cron job.
    pub fn cron_expression(&self) -> Option<&str> {
        match &self.schedule {
            Some(Schedule::Cron(expr)) => Some(expr.as_str()),
            _ => None,
        }
    }

    /// Structural validation, independent of any handler.
    pub fn validate(&self) -> Result<()> {
        if self.job_id.trim().is_empty() {
            return Err(JobClawError::invalid("job_id is required"));
        }
        if self.job_id.chars().any(char::is_whitespace) {
            return Err(JobClawError::invalid(format!(
                "job_id '{}' must not contain whitespace",
                self.job_id
            )));
        }
        if self.job_type.trim().is_empty() {
            return Err(JobClawError::invalid("type is required"));
        }
        if self.timeout_ms == 0 {
            return Err(JobClawError::invalid("timeout_ms must be > 0"));
        }
        match &self.schedule {
            Some(Schedule::IntervalSec(0)) => {
                return Err(JobClawError::invalid("interval_sec must be > 0"));
            }
            Some(Schedule::Cron(expr)) if expr.split_whitespace().count() != 5 => {
                return Err(JobClawError::invalid(format!(
                    "cron '{expr}' needs 5 fields: MIN HOUR DOM MON DOW"
                )));
            }
            _ => {}
        }
        if self.retry_policy.max_retry > 0 && self.retry_policy.backoff_sec.is_empty() {
            return Err(JobClawError::invalid(
                "retry_policy.backoff_sec must not be empty when max_retry > 0",
            ));
        }
        if self.max_active_runs.is_some() && self.flow_group.is_none() {
            return Err(JobClawError::invalid("max_active_runs requires flow_group"));
        }
        if self.max_active_runs == Some(0) {
            return Err(JobClawError::invalid("max_active_runs must be > 0"));
        }
        Ok(())
    }
}

/// One entry in a job's append-only version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobVersion {
    pub version_id: String,
    pub timestamp: DateTime<Utc>,
    /// Where the change came from ("cli", "api", "rollback", ...).
    pub source: String,
    pub actor: String,
    #[serde(default)]
    pub note: String,
    /// Full snapshot of the spec at this version.
    pub spec: JobSpec,
}
