//! Execution context handed to handlers.
//!
//! Exposes run identity, the deadline, a cancel signal and only the tools
//! the policy allows for this run. Handlers never see the full registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::traits::{Tool, ToolError};

/// Capability-filtered set of tools.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names in lexical order.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}

/// Bounded view of a run given to its handler.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub job_id: String,
    pub run_id: String,
    pub trace_id: Option<String>,
    pub attempt: u32,
    pub timeout_ms: u64,
    deadline: Instant,
    cancel: watch::Receiver<bool>,
    tools: ToolSet,
}

impl ExecutionContext {
    pub fn new(
        job_id: &str,
        run_id: &str,
        timeout_ms: u64,
        tools: ToolSet,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            run_id: run_id.to_string(),
            trace_id: None,
            attempt: 0,
            timeout_ms,
            deadline: Instant::now() + Duration::from_millis(timeout_ms),
            cancel,
            tools,
        }
    }

    /// Context whose cancel signal never fires. Handy in tests.
    pub fn detached(job_id: &str, run_id: &str, timeout_ms: u64, tools: ToolSet) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(job_id, run_id, timeout_ms, tools, rx)
    }

    pub fn with_trace(mut self, trace_id: Option<String>, attempt: u32) -> Self {
        self.trace_id = trace_id;
        self.attempt = attempt;
        self
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the runner cancels this run.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without cancelling: nothing will ever fire.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Call an allowed tool by name.
    pub async fn call_tool(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Denied(name.to_string()))?;
        tool.run(input, self).await
    }

    /// Log sink tagged with the run identity.
    pub fn log(&self, level: tracing::Level, message: &str) {
        let (job, run) = (self.job_id.as_str(), self.run_id.as_str());
        match level {
            tracing::Level::ERROR => tracing::error!(job_id = job, run_id = run, "{message}"),
            tracing::Level::WARN => tracing::warn!(job_id = job, run_id = run, "{message}"),
            tracing::Level::INFO => tracing::info!(job_id = job, run_id = run, "{message}"),
            tracing::Level::DEBUG => tracing::debug!(job_id = job, run_id = run, "{message}"),
            tracing::Level::TRACE => tracing::trace!(job_id = job, run_id = run, "{message}"),
        }
    }

    /// Metric sink. Emitted as a structured trace event.
    pub fn metric(&self, name: &str, value: f64) {
        tracing::info!(
            target: "jobclaw::metrics",
            job_id = self.job_id.as_str(),
            run_id = self.run_id.as_str(),
            metric = name,
            value,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn run(
            &self,
            input: serde_json::Value,
            _ctx: &ExecutionContext,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn test_only_filtered_tools_callable() {
        let mut tools = ToolSet::new();
        tools.insert(Arc::new(Echo));
        let ctx = ExecutionContext::detached("j", "r", 1000, tools);

        let out = ctx.call_tool("echo", serde_json::json!({"a": 1})).await.unwrap();
        assert_eq!(out["a"], 1);
        assert!(matches!(
            ctx.call_tool("shell", serde_json::Value::Null).await,
            Err(ToolError::Denied(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_signal() {
        let (tx, rx) = watch::channel(false);
        let ctx = ExecutionContext::new("j", "r", 1000, ToolSet::new(), rx);
        assert!(!ctx.is_cancelled());
        tx.send(true).unwrap();
        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
    }
}
