//! Full lifecycle over a SQLite file: dispatch → failure → retry →
//! approval gate → decision → dispatch again, then a reopen.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;

use jobclaw_core::config::{JobClawConfig, RunnerConfig, SchedulerConfig};
use jobclaw_core::context::ExecutionContext;
use jobclaw_core::traits::{Handler, HandlerError, HandlerOutput, InputValidator, Store};
use jobclaw_core::types::{ApprovalStatus, FailurePolicy, Inputs, JobSpec, RunStatus, names};
use jobclaw_scheduler::{
    HandlerRegistry, Provenance, Runner, Scheduler, Services, SkillRegistry, SkipReason, Toolbox,
};
use jobclaw_store::SqliteStore;
use jobclaw_tools::{ToolPolicy, ToolRegistry};

/// Fails the first attempt, then succeeds and asks for a token.
struct Publisher;

#[async_trait]
impl Handler for Publisher {
    fn job_type(&self) -> &str {
        "publish"
    }

    fn required_inputs(&self) -> &[&str] {
        &["channel"]
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        inputs: &Inputs,
    ) -> Result<HandlerOutput, HandlerError> {
        if ctx.attempt == 0 {
            return Err(HandlerError::failed("upstream 503"));
        }
        HandlerOutput::from_value(json!({
            "channel": inputs["channel"],
            "requires_approval": true,
            "approval_requests": [{ "resource": "publish_token", "reason": "rotate" }],
        }))
    }
}

fn handlers() -> Arc<HandlerRegistry> {
    let mut handlers = HandlerRegistry::new();
    handlers.register(Arc::new(Publisher));
    Arc::new(handlers)
}

fn build(store: Arc<dyn Store>) -> (Services, Runner) {
    let config = JobClawConfig::default();
    let handlers = handlers();
    let validator: Arc<dyn InputValidator> = handlers.clone();
    let services = Services::new(store, &config, Some(validator));
    let toolbox = Toolbox {
        handlers,
        tools: Arc::new(ToolRegistry::new()),
        policy: Arc::new(ToolPolicy::default()),
        skills: Arc::new(SkillRegistry::new()),
    };
    let runner = Runner::new(
        "w1",
        services.clone(),
        toolbox,
        FailurePolicy::default(),
        RunnerConfig::default(),
    );
    (services, runner)
}

fn scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        jitter_window_sec: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_job_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("jobclaw.db");
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&db, 5000).unwrap());
    let (svc, runner) = build(store);

    // Missing required input is rejected at save time.
    let bad = JobSpec::new("digest", "publish").with_interval(60);
    assert!(svc.registry.save("digest", bad, &Provenance::default()).is_err());

    let mut spec = JobSpec::new("digest", "publish")
        .with_interval(60)
        .with_retry(2, vec![0]);
    spec.inputs.insert("channel".into(), json!("ops"));
    svc.registry
        .save("digest", spec, &Provenance::new("cli", "alice", "first cut"))
        .unwrap();
    svc.registry.enable("digest").unwrap();

    let mut scheduler = Scheduler::new(svc.clone(), scheduler_config(), "e2e");
    let t0 = Utc::now();

    // First attempt fails and lands in the delayed tier.
    let report = scheduler.tick_at(t0).unwrap();
    assert_eq!(report.dispatched.len(), 1);
    let root = report.dispatched[0].clone();
    let failed = runner.run_once().await.unwrap().unwrap();
    assert!(!failed.success);
    assert_eq!(failed.error.as_deref(), Some("upstream 503"));
    assert_eq!(svc.queue.delayed_count().unwrap(), 1);
    assert_eq!(svc.queue.get_run(&root).unwrap().unwrap().status, RunStatus::Failed);

    // Retry is released, succeeds, and raises an approval.
    let report = scheduler.tick_at(t0 + Duration::seconds(1)).unwrap();
    assert_eq!(report.drained, 1);
    assert!(report.dispatched.is_empty());
    let ok = runner.run_once().await.unwrap().unwrap();
    assert!(ok.success);
    let retry_id = format!("{root}~1");
    assert_eq!(svc.queue.get_run(&retry_id).unwrap().unwrap().status, RunStatus::Success);
    assert_eq!(svc.failures.get("digest").unwrap().consecutive_failures, 0);

    let approval = svc.approvals.get_by_run(&retry_id).unwrap().unwrap();
    assert_eq!(approval.status, ApprovalStatus::Pending);

    // Interval elapsed, but the approval blocks dispatch.
    let report = scheduler.tick_at(t0 + Duration::seconds(61)).unwrap();
    assert!(report.dispatched.is_empty());
    assert_eq!(report.skipped[0].1, SkipReason::PendingApproval);

    svc.approvals
        .decide(&approval.approval_id, ApprovalStatus::Approved, "bob", Some("ok"))
        .unwrap();
    let report = scheduler.tick_at(t0 + Duration::seconds(62)).unwrap();
    assert_eq!(report.dispatched.len(), 1);

    let event_types: Vec<String> = svc
        .queue
        .get_events(200, None)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    for expected in [
        names::JOB_SAVED,
        names::DISPATCHED,
        names::RUN_FAILED,
        names::RUN_RETRY_SCHEDULED,
        names::RUN_COMPLETED,
        names::APPROVAL_CREATED,
        names::SKIPPED_PENDING_APPROVAL,
        names::APPROVAL_DECIDED,
    ] {
        assert!(
            event_types.iter().any(|t| t == expected),
            "missing {expected} in {event_types:?}"
        );
    }

    // Everything above survives a reopen.
    drop(scheduler);
    drop(runner);
    drop(svc);
    let reopened: Arc<dyn Store> = Arc::new(SqliteStore::open(&db, 5000).unwrap());
    let (svc, _) = build(reopened);
    assert!(svc.registry.is_enabled("digest").unwrap());
    assert_eq!(svc.registry.list_versions("digest", 10).unwrap().len(), 1);
    assert_eq!(svc.queue.get_run(&retry_id).unwrap().unwrap().status, RunStatus::Success);
    assert_eq!(
        svc.approvals.get(&approval.approval_id).unwrap().unwrap().status,
        ApprovalStatus::Approved
    );
    assert_eq!(svc.queue.depth().unwrap(), 1);
}

/// Always throws.
struct Monitor;

#[async_trait]
impl Handler for Monitor {
    fn job_type(&self) -> &str {
        "monitor.channel"
    }

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _inputs: &Inputs,
    ) -> Result<HandlerOutput, HandlerError> {
        Err(HandlerError::exception("channel unreachable"))
    }
}

fn monitor_setup() -> (Services, Runner) {
    let store: Arc<dyn Store> = Arc::new(jobclaw_store::MemoryStore::new());
    let services = Services::new(store, &JobClawConfig::default(), None);
    let mut handlers = HandlerRegistry::new();
    handlers.register(Arc::new(Monitor));
    let toolbox = Toolbox {
        handlers: Arc::new(handlers),
        tools: Arc::new(ToolRegistry::new()),
        policy: Arc::new(ToolPolicy::default()),
        skills: Arc::new(SkillRegistry::new()),
    };
    let runner = Runner::new(
        "w1",
        services.clone(),
        toolbox,
        FailurePolicy::default(),
        RunnerConfig::default(),
    );
    (services, runner)
}

#[tokio::test]
async fn test_monitor_failure_schedules_single_retry() {
    let (svc, runner) = monitor_setup();
    let spec = JobSpec::new("m1", "monitor.channel")
        .with_interval(30)
        .with_retry(1, vec![2]);
    svc.registry.save("m1", spec, &Provenance::default()).unwrap();
    svc.registry.enable("m1").unwrap();

    let mut scheduler = Scheduler::new(svc.clone(), scheduler_config(), "e2e");
    let report = scheduler.tick_at(Utc::now()).unwrap();
    assert_eq!(report.dispatched.len(), 1);
    let run_id = report.dispatched[0].clone();
    assert_eq!(svc.queue.get_run(&run_id).unwrap().unwrap().status, RunStatus::Queued);

    let result = runner.run_once().await.unwrap().unwrap();
    assert!(!result.success);
    let run = svc.queue.get_run(&run_id).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.result.unwrap().error.unwrap().contains("channel unreachable"));
    assert_eq!(svc.failures.get("m1").unwrap().consecutive_failures, 1);

    // Attempt 1 is due two seconds out.
    assert!(svc.queue.drain_due(Utc::now()).unwrap().is_empty());
    let due = svc.queue.drain_due(Utc::now() + Duration::seconds(3)).unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].attempt, 1);
    assert_eq!(due[0].run_id, format!("{run_id}~1"));
}

#[test]
fn test_retry_follows_backoff_table() {
    let (_, runner) = monitor_setup();
    let policy = jobclaw_core::types::RetryPolicy {
        max_retry: 2,
        backoff_sec: vec![1, 2, 5],
    };
    let first = jobclaw_core::types::QueueEvent::from_spec(&JobSpec::new("m1", "monitor.channel"), "r", Utc::now());

    let second = runner.handle_retry(&first, &policy).unwrap().unwrap();
    assert_eq!(second.attempt, 1);
    let delay = (second.scheduled_at - Utc::now()).num_milliseconds();
    assert!((0..=1000).contains(&delay), "{delay}");

    let third = runner.handle_retry(&second, &policy).unwrap().unwrap();
    assert_eq!(third.attempt, 2);
    let delay = (third.scheduled_at - Utc::now()).num_milliseconds();
    assert!((1000..=2000).contains(&delay), "{delay}");

    assert!(runner.handle_retry(&third, &policy).unwrap().is_none());
}
