//! # JobClaw Core
//!
//! Shared building blocks for the JobClaw orchestration engine:
//! the job/run/event data model, the `Store`, `Handler` and `Tool` traits,
//! configuration and the error taxonomy.

pub mod config;
pub mod context;
pub mod error;
pub mod traits;
pub mod types;

pub use config::JobClawConfig;
pub use context::{ExecutionContext, ToolSet};
pub use error::{JobClawError, Result, StoreError, StoreResult};
pub use traits::{Handler, HandlerError, HandlerOutput, InputValidator, Store, StreamEntry, Tool, ToolError};
