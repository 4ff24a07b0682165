//! Persisted key layout and JSON helpers shared by every component.

use serde::Serialize;
use serde::de::DeserializeOwned;

use jobclaw_core::error::{Result, StoreError};
use jobclaw_core::traits::Store;

pub const JOBS_ALL: &str = "jobs:all";
pub const JOBS_ENABLED: &str = "jobs:enabled";
pub const QUEUE_STREAM: &str = "queue:events";
pub const QUEUE_GROUP: &str = "workers";
pub const QUEUE_DELAYED: &str = "queue:delayed";
pub const RUNS_INDEX: &str = "runs:index";
pub const EVENTS_LOG: &str = "events:log";
pub const APPROVALS_INDEX: &str = "approvals:index";

pub fn job_spec(job_id: &str) -> String {
    format!("job:spec:{job_id}")
}

pub fn job_versions(job_id: &str) -> String {
    format!("job:versions:{job_id}")
}

pub fn run(run_id: &str) -> String {
    format!("run:{run_id}")
}

pub fn run_history(job_id: &str) -> String {
    format!("runs:job:{job_id}")
}

pub fn active_runs(job_id: &str) -> String {
    format!("runs:active:{job_id}")
}

pub fn failure(job_id: &str) -> String {
    format!("failure:{job_id}")
}

pub fn approval(approval_id: &str) -> String {
    format!("approval:{approval_id}")
}

pub fn approval_by_run(run_id: &str) -> String {
    format!("approval:run:{run_id}")
}

pub fn pending_approvals(job_id: &str) -> String {
    format!("approvals:pending:job:{job_id}")
}

pub fn heartbeat(name: &str) -> String {
    format!("heartbeat:{name}")
}

/// Decode the JSON value at `key`.
pub(crate) fn load<T: DeserializeOwned>(store: &dyn Store, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        None => Ok(None),
        Some(raw) => decode(key, &raw).map(Some),
    }
}

pub(crate) fn save<T: Serialize>(store: &dyn Store, key: &str, value: &T) -> Result<()> {
    store.set(key, &serde_json::to_string(value)?)?;
    Ok(())
}

pub(crate) fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}
