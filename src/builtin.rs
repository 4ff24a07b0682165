//! Handlers shipped with the binary. Real deployments register their own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use jobclaw_core::context::ExecutionContext;
use jobclaw_core::traits::{Handler, HandlerError, HandlerOutput};
use jobclaw_core::types::Inputs;
use jobclaw_scheduler::{HandlerRegistry, SkillRegistry};

/// Does nothing. Useful for exercising schedules and guards.
pub struct NoopHandler;

#[async_trait]
impl Handler for NoopHandler {
    fn job_type(&self) -> &str {
        "noop"
    }

    async fn execute(&self, _ctx: &ExecutionContext, _inputs: &Inputs) -> Result<HandlerOutput, HandlerError> {
        Ok(HandlerOutput::default())
    }
}

/// Returns its inputs. `sleep_ms` delays the reply (cancellable),
/// `fail` with a message reports a logical failure.
pub struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    fn job_type(&self) -> &str {
        "echo"
    }

    async fn execute(&self, ctx: &ExecutionContext, inputs: &Inputs) -> Result<HandlerOutput, HandlerError> {
        if let Some(ms) = inputs.get("sleep_ms").and_then(|v| v.as_u64()) {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                _ = ctx.cancelled() => {
                    return Err(HandlerError::exception("cancelled while sleeping"));
                }
            }
        }
        if let Some(message) = inputs.get("fail").and_then(|v| v.as_str()) {
            return Err(HandlerError::Failed {
                message: message.to_string(),
                output: json!({ "inputs": inputs }),
            });
        }
        ctx.log(tracing::Level::INFO, &format!("echo with {} input(s)", inputs.len()));
        ctx.metric("echo.inputs", inputs.len() as f64);
        Ok(HandlerOutput::new(json!({
            "inputs": inputs,
            "attempt": ctx.attempt,
            "tools": ctx.tools().names(),
        })))
    }
}

pub fn handlers(skills: Arc<SkillRegistry>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new().with_skills(skills);
    registry.register(Arc::new(NoopHandler));
    registry.register(Arc::new(EchoHandler));
    registry
}
