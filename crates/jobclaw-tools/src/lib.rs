//! # JobClaw Tools
//!
//! Capability plumbing: the registry of every tool the process knows, and
//! the per-job-type policy that decides which of them a run may touch.

pub mod policy;
pub mod registry;

pub use policy::ToolPolicy;
pub use registry::ToolRegistry;
