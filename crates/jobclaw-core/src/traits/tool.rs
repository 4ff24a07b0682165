//! Tool trait: a named capability a handler may call.
//! The core only ever looks at `name()`; what a tool does is its own business.

use async_trait::async_trait;

use crate::context::ExecutionContext;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    /// Capability exists but policy forbids it for this run.
    #[error("tool '{0}' is not allowed for this job")]
    Denied(String),
    #[error("tool '{0}' is not registered")]
    NotFound(String),
    #[error("tool failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Capability name checked against the tool policy.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Run the tool. Tools that spawn subprocesses must kill them when
    /// `ctx.is_cancelled()` or the deadline passes.
    async fn run(
        &self,
        input: serde_json::Value,
        ctx: &ExecutionContext,
    ) -> Result<serde_json::Value, ToolError>;
}
