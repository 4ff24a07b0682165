//! Runner: dequeues one event and drives it to a terminal run status.
//!
//! The handler runs on its own task under a timeout. Whatever happens
//! (success, logical failure, error, panic, timeout) is normalized into a
//! `RunResult`, persisted, fed to failure memory and, on failure, retried
//! through the delayed tier with a fresh run id per attempt.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;

use jobclaw_core::config::RunnerConfig;
use jobclaw_core::context::ExecutionContext;
use jobclaw_core::error::Result;
use jobclaw_core::traits::{Handler, HandlerError, HandlerOutput};
use jobclaw_core::types::{
    FailurePolicy, Inputs, QueueEvent, RetryPolicy, Run, RunResult, RunStatus, add_seconds, names,
};
use jobclaw_tools::{ToolPolicy, ToolRegistry};

use crate::handlers::HandlerRegistry;
use crate::services::Services;
use crate::skills::SkillRegistry;

/// Normalized handler outcome plus the raw output, when there was one.
#[derive(Debug, Clone)]
pub struct Execution {
    pub result: RunResult,
    pub output: Option<HandlerOutput>,
}

/// Capabilities and handlers a runner hands out.
#[derive(Clone)]
pub struct Toolbox {
    pub handlers: Arc<HandlerRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub policy: Arc<ToolPolicy>,
    pub skills: Arc<SkillRegistry>,
}

pub struct Runner {
    worker_id: String,
    services: Services,
    toolbox: Toolbox,
    failure_policy: FailurePolicy,
    config: RunnerConfig,
    heartbeat_ttl_sec: u64,
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Runner {
    pub fn new(
        worker_id: &str,
        services: Services,
        toolbox: Toolbox,
        failure_policy: FailurePolicy,
        config: RunnerConfig,
    ) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            services,
            toolbox,
            failure_policy,
            config,
            heartbeat_ttl_sec: 30,
        }
    }

    pub fn with_heartbeat_ttl(mut self, ttl_secs: u64) -> Self {
        self.heartbeat_ttl_sec = ttl_secs;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run `handler` under `timeout_ms` and normalize the outcome.
    pub async fn execute(
        &self,
        handler: Arc<dyn Handler>,
        ctx: ExecutionContext,
        cancel: watch::Sender<bool>,
        inputs: Inputs,
        timeout_ms: u64,
    ) -> Execution {
        let started = std::time::Instant::now();
        let task = tokio::spawn(async move { handler.execute(&ctx, &inputs).await });
        let abort = task.abort_handle();
        let preview = self.config.error_preview_chars;

        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), task).await;
        let elapsed = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(Ok(output))) => Execution {
                result: RunResult::ok(output.output.clone(), elapsed),
                output: Some(output),
            },
            Ok(Ok(Err(HandlerError::Failed { message, output }))) => Execution {
                result: RunResult::failed(truncate(&message, preview), output.clone(), elapsed),
                output: Some(HandlerOutput::from_failure(output)),
            },
            Ok(Ok(Err(HandlerError::Exception { message, trace }))) => {
                let text = match trace {
                    Some(trace) => format!("{message}\n{trace}"),
                    None => message,
                };
                Execution {
                    result: RunResult::failed(truncate(&text, preview), serde_json::Value::Null, elapsed),
                    output: None,
                }
            }
            Ok(Err(join_err)) => {
                let text = if join_err.is_panic() {
                    format!("handler panicked: {}", panic_message(join_err.into_panic()))
                } else {
                    "handler task cancelled".to_string()
                };
                Execution {
                    result: RunResult::failed(truncate(&text, preview), serde_json::Value::Null, elapsed),
                    output: None,
                }
            }
            Err(_) => {
                // Let the handler clean up children, then stop the task.
                let _ = cancel.send(true);
                abort.abort();
                Execution {
                    result: RunResult::failed(
                        format!("timed out after {timeout_ms} ms"),
                        serde_json::Value::Null,
                        elapsed,
                    ),
                    output: None,
                }
            }
        }
    }

    /// Process one dequeued event end to end. `None` for a skipped duplicate.
    pub async fn process_event(&self, event: &QueueEvent) -> Result<Option<RunResult>> {
        let queue = &self.services.queue;
        let events = queue.events();

        let mut run = match queue.get_run(&event.run_id)? {
            Some(run) => run,
            None => {
                let mut run = Run::queued(
                    &event.run_id,
                    &event.job_id,
                    event.attempt,
                    event.scheduled_at,
                    event.inputs.clone(),
                );
                run.trace_id = event.trace_id.clone();
                run
            }
        };
        if run.status != RunStatus::Queued {
            tracing::info!(
                "♻️ Run {} of '{}' already {}, skipping duplicate delivery",
                run.run_id,
                run.job_id,
                run.status
            );
            events.emit(
                names::RUN_DUPLICATE_SKIPPED,
                json!({ "job_id": event.job_id, "run_id": event.run_id, "status": run.status }),
            );
            return Ok(None);
        }

        let resolved = self.toolbox.skills.resolve(&event.job_type, &event.inputs);
        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        run.attempt = event.attempt;
        if let Err(e) = queue.save_run(&run) {
            self.settle("clear active marker", &event.run_id, queue.clear_active(&event.job_id, &event.run_id));
            return Err(e);
        }
        self.settle("mark active", &event.run_id, queue.mark_active(&event.job_id, &event.run_id));
        tracing::info!(
            "▶️ [{}] Run {} of '{}' started (type {}, attempt {})",
            self.worker_id,
            event.run_id,
            event.job_id,
            resolved.job_type,
            event.attempt
        );
        events.emit(
            names::RUN_STARTED,
            json!({
                "job_id": event.job_id,
                "run_id": event.run_id,
                "type": resolved.job_type,
                "skill": resolved.skill,
                "attempt": event.attempt,
                "worker": self.worker_id,
                "trace_id": event.trace_id,
            }),
        );

        let execution = match self.toolbox.handlers.get(&resolved.job_type) {
            None => Execution {
                result: RunResult::failed(
                    format!("no handler registered for type '{}'", resolved.job_type),
                    serde_json::Value::Null,
                    0,
                ),
                output: None,
            },
            Some(handler) => {
                let allowed = self.toolbox.policy.filter(
                    &resolved.job_type,
                    resolved.allowed_tools.as_deref(),
                    &self.toolbox.tools.names(),
                );
                let (cancel_tx, cancel_rx) = watch::channel(false);
                let ctx = ExecutionContext::new(
                    &event.job_id,
                    &event.run_id,
                    event.timeout_ms,
                    self.toolbox.tools.toolset_for(&allowed),
                    cancel_rx,
                )
                .with_trace(event.trace_id.clone(), event.attempt);
                self.execute(handler, ctx, cancel_tx, resolved.inputs, event.timeout_ms)
                    .await
            }
        };
        let result = execution.result.clone();

        run.status = if result.success {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        run.finished_at = Some(Utc::now());
        run.result = Some(result.clone());
        // Past this point every step runs even if an earlier one failed, so
        // the active marker and failure memory never go stale.
        self.settle("save run", &event.run_id, queue.save_run(&run));
        self.settle("record history", &event.run_id, queue.record_history(&event.job_id, &run.summary()));
        self.settle("clear active marker", &event.run_id, queue.clear_active(&event.job_id, &event.run_id));

        if result.success {
            tracing::info!(
                "✅ Run {} of '{}' succeeded in {}ms",
                event.run_id,
                event.job_id,
                result.duration_ms
            );
            events.emit(
                names::RUN_COMPLETED,
                json!({ "job_id": event.job_id, "run_id": event.run_id, "attempt": event.attempt, "duration_ms": result.duration_ms }),
            );
        } else {
            tracing::warn!(
                "❌ Run {} of '{}' failed: {}",
                event.run_id,
                event.job_id,
                result.error.as_deref().unwrap_or("unknown error")
            );
            events.emit(
                names::RUN_FAILED,
                json!({
                    "job_id": event.job_id,
                    "run_id": event.run_id,
                    "attempt": event.attempt,
                    "duration_ms": result.duration_ms,
                    "error": result.error,
                }),
            );
        }

        if let Some(output) = &execution.output
            && output.wants_approval()
        {
            let created = self.services.approvals.create(
                &event.run_id,
                &event.job_id,
                output.approval_requests.clone(),
            );
            self.settle("create approval", &event.run_id, created);
        }

        let recorded = self.services.failures.record_outcome(
            &event.job_id,
            result.success,
            result.error.as_deref(),
            &self.failure_policy,
        );
        self.settle("update failure memory", &event.run_id, recorded);

        if !result.success {
            let policy = self
                .settle("load retry policy", &event.run_id, self.services.registry.get(&event.job_id))
                .flatten()
                .map(|spec| spec.retry_policy)
                .unwrap_or_default();
            self.settle("schedule retry", &event.run_id, self.handle_retry(event, &policy));
        }
        Ok(Some(result))
    }

    /// Log a failed bookkeeping step and carry on with the rest.
    fn settle<T>(&self, step: &str, run_id: &str, outcome: Result<T>) -> Option<T> {
        match outcome {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("⚠️ [{}] Run {run_id}: {step} failed: {e}", self.worker_id);
                None
            }
        }
    }

    /// Schedule the next attempt of a failed event, if the policy allows one.
    pub fn handle_retry(&self, event: &QueueEvent, policy: &RetryPolicy) -> Result<Option<QueueEvent>> {
        if event.attempt >= policy.max_retry {
            tracing::debug!(
                "No retries left for '{}' (attempt {}/{})",
                event.job_id,
                event.attempt,
                policy.max_retry
            );
            return Ok(None);
        }
        let delay = policy.delay_for(event.attempt);
        let due = add_seconds(Utc::now(), delay);
        let next = event.next_attempt(due);
        self.services.queue.schedule_delayed_at(&next, due)?;

        tracing::info!(
            "🔁 Retry {}/{} of '{}' in {delay}s (run {})",
            next.attempt,
            policy.max_retry,
            event.job_id,
            next.run_id
        );
        self.services.queue.events().emit(
            names::RUN_RETRY_SCHEDULED,
            json!({
                "job_id": event.job_id,
                "run_id": next.run_id,
                "previous_run_id": event.run_id,
                "attempt": next.attempt,
                "delay_sec": delay,
            }),
        );
        Ok(Some(next))
    }

    /// Dequeue and process at most one event.
    pub async fn run_once(&self) -> Result<Option<RunResult>> {
        match self.services.queue.dequeue(&self.worker_id)? {
            Some(event) => self.process_event(&event).await,
            None => Ok(None),
        }
    }

    /// Poll the queue until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("👷 Worker '{}' started", self.worker_id);
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let heartbeat = format!("worker:{}", self.worker_id);

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.services.queue.heartbeat(&heartbeat, self.heartbeat_ttl_sec) {
                tracing::warn!("⚠️ Worker '{}' heartbeat failed: {e}", self.worker_id);
            }
            let idle = match self.services.queue.dequeue(&self.worker_id) {
                Ok(Some(event)) => {
                    if let Err(e) = self.process_event(&event).await {
                        tracing::error!(
                            "❌ Worker '{}' failed processing run {}: {e}",
                            self.worker_id,
                            event.run_id
                        );
                    }
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    tracing::warn!("⚠️ Worker '{}' dequeue failed: {e}", self.worker_id);
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(poll) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        tracing::info!("🛑 Worker '{}' stopped", self.worker_id);
    }
}
