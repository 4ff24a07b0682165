//! Shared data model.

pub mod approval;
pub mod delay;
pub mod event;
pub mod failure;
pub mod job;
pub mod run;

pub use approval::{ApprovalRequest, ApprovalStatus, ResourceRequest};
pub use delay::{MAX_DELAY_SEC, add_seconds};
pub use event::{ObservabilityEvent, QueueEvent, names, retry_run_id};
pub use failure::{FailurePolicy, FailureState};
pub use job::{Inputs, JobSpec, JobVersion, Priority, RetryPolicy, Schedule};
pub use run::{Run, RunResult, RunStatus, RunSummary};
