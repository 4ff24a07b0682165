//! # JobClaw Scheduler
//!
//! Durable job orchestration over a pluggable [`Store`](jobclaw_core::Store).
//!
//! ## Architecture
//! ```text
//! JobRegistry (versioned specs, enable/disable, rollback)
//!        │
//! Scheduler (tokio interval, one instance)
//!   ├── reload enabled specs every N ticks
//!   ├── drain due retries from the delayed tier
//!   ├── pressure gauge (high/low watermarks)
//!   ├── interval jobs: deterministic jitter, overlap guard
//!   ├── cron jobs: once per minute slot
//!   └── guards: approval → cooldown → overlap → flow group → pressure → cap
//!        │
//! EventQueue (work stream + delayed zset + run records + history)
//!        │
//! Runner × N (claim → resolve skill → filter tools → execute with timeout)
//!   ├── FailureMemory: consecutive failures → cooldown
//!   ├── ApprovalGate: handler asks → job blocked until decided
//!   └── retry: next attempt into the delayed tier
//! ```

pub mod approval;
pub mod cron;
pub mod engine;
pub mod events;
pub mod failure;
pub mod guards;
pub mod handlers;
pub mod keys;
pub mod pressure;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod services;
pub mod skills;

#[cfg(test)]
mod testing;

pub use approval::ApprovalGate;
pub use cron::CronSchedule;
pub use engine::{Dispatch, Scheduler, TickReport, jitter_offset_sec};
pub use events::EventLog;
pub use failure::FailureMemory;
pub use guards::SkipReason;
pub use handlers::HandlerRegistry;
pub use pressure::{PressureChange, PressureGauge};
pub use queue::EventQueue;
pub use registry::{JobRegistry, Provenance};
pub use runner::{Execution, Runner, Toolbox};
pub use services::Services;
pub use skills::{ResolvedType, SkillRegistry};
