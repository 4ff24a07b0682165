//! Scheduler engine: the loop that turns enabled jobs into queue events.
//!
//! Each tick: heartbeat → reload specs (first tick, then every N) →
//! update pressure → interval jobs → cron jobs → move due retries into
//! the work stream. Dispatch state (last dispatch, first seen, cron slot)
//! lives in memory, so run exactly one scheduler per store.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use jobclaw_core::config::SchedulerConfig;
use jobclaw_core::error::{JobClawError, Result};
use jobclaw_core::types::{JobSpec, Priority, QueueEvent, Run, add_seconds, names};

use crate::cron::{self, CronSchedule};
use crate::guards::SkipReason;
use crate::pressure::{PressureChange, PressureGauge};
use crate::services::Services;

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Dispatched { run_id: String },
    Skipped(SkipReason),
}

/// What a single tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    pub reloaded: bool,
    pub pressure: Option<PressureChange>,
    /// Run ids dispatched this tick.
    pub dispatched: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
    /// Delayed events moved into the work stream.
    pub drained: usize,
}

impl TickReport {
    pub fn is_quiet(&self) -> bool {
        self.dispatched.is_empty() && self.skipped.is_empty() && self.drained == 0 && self.pressure.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Interval,
    Cron,
    Manual,
}

impl Trigger {
    fn as_str(&self) -> &'static str {
        match self {
            Trigger::Interval => "interval",
            Trigger::Cron => "cron",
            Trigger::Manual => "manual",
        }
    }
}

/// Deterministic first-dispatch offset for `job_id`, in `[0, window)`.
pub fn jitter_offset_sec(job_id: &str, window: u64) -> u64 {
    if window == 0 {
        return 0;
    }
    let digest = Sha256::digest(job_id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head) % window
}

pub struct Scheduler {
    services: Services,
    config: SchedulerConfig,
    instance_id: String,
    specs: Vec<JobSpec>,
    ticks: u64,
    first_seen: HashMap<String, DateTime<Utc>>,
    last_dispatch: HashMap<String, DateTime<Utc>>,
    last_cron_slot: HashMap<String, i64>,
    crons: HashMap<String, Option<CronSchedule>>,
    pressure: PressureGauge,
}

impl Scheduler {
    pub fn new(services: Services, config: SchedulerConfig, instance_id: &str) -> Self {
        Self {
            pressure: PressureGauge::new(config.pressure_high, config.pressure_low),
            services,
            config,
            instance_id: instance_id.to_string(),
            specs: Vec::new(),
            ticks: 0,
            first_seen: HashMap::new(),
            last_dispatch: HashMap::new(),
            last_cron_slot: HashMap::new(),
            crons: HashMap::new(),
        }
    }

    pub fn heartbeat_name(&self) -> String {
        format!("scheduler:{}", self.instance_id)
    }

    pub fn in_pressure(&self) -> bool {
        self.pressure.is_active()
    }

    /// Specs loaded at the last reload.
    pub fn specs(&self) -> &[JobSpec] {
        &self.specs
    }

    pub fn tick(&mut self) -> Result<TickReport> {
        self.tick_at(Utc::now())
    }

    pub fn tick_at(&mut self, now: DateTime<Utc>) -> Result<TickReport> {
        self.ticks += 1;
        let mut report = TickReport::default();
        let queue = self.services.queue.clone();

        queue.heartbeat(&self.heartbeat_name(), self.config.heartbeat_ttl_sec)?;

        if self.ticks == 1 || self.ticks % self.config.reload_every_ticks.max(1) == 0 {
            self.reload()?;
            report.reloaded = true;
        }

        let depth = queue.depth()? + queue.delayed_count()?;
        if let Some(change) = self.pressure.update(depth) {
            let name = match change {
                PressureChange::Entered => names::PRESSURE_ENTERED,
                PressureChange::Exited => names::PRESSURE_EXITED,
            };
            queue.events().emit(
                name,
                json!({ "depth": depth, "high": self.config.pressure_high, "low": self.config.pressure_low }),
            );
            report.pressure = Some(change);
        }

        self.process_interval_jobs(now, &mut report);
        self.process_cron_jobs(now, &mut report);

        for event in queue.drain_due(now)? {
            if let Err(e) = queue.mark_active(&event.job_id, &event.run_id) {
                tracing::warn!("⚠️ Could not mark retry {} active: {e}", event.run_id);
            }
            if let Err(e) = queue.enqueue(&event) {
                tracing::warn!(
                    "⚠️ Could not release retry {} of '{}', putting it back: {e}",
                    event.run_id,
                    event.job_id
                );
                if let Err(e) = queue.clear_active(&event.job_id, &event.run_id) {
                    tracing::warn!("⚠️ Could not clear active flag for {}: {e}", event.run_id);
                }
                if let Err(e) = queue.schedule_delayed_at(&event, event.scheduled_at) {
                    tracing::error!("❌ Retry {} of '{}' lost: {e}", event.run_id, event.job_id);
                }
                continue;
            }
            tracing::info!(
                "🔁 Retry {} of '{}' released (run {})",
                event.attempt,
                event.job_id,
                event.run_id
            );
            report.drained += 1;
        }
        Ok(report)
    }

    /// Reload enabled specs and forget state for jobs that went away.
    pub fn reload(&mut self) -> Result<()> {
        let specs = self.services.registry.load_enabled()?;
        if specs.len() != self.specs.len() {
            tracing::info!("📋 Scheduler tracking {} enabled job(s)", specs.len());
        }
        let live: HashSet<&str> = specs.iter().map(|s| s.job_id.as_str()).collect();
        self.first_seen.retain(|id, _| live.contains(id.as_str()));
        self.last_dispatch.retain(|id, _| live.contains(id.as_str()));
        self.last_cron_slot.retain(|id, _| live.contains(id.as_str()));
        let exprs: HashSet<&str> = specs.iter().filter_map(|s| s.cron_expression()).collect();
        self.crons.retain(|expr, _| exprs.contains(expr.as_str()));
        self.specs = specs;
        Ok(())
    }

    /// A store error on one job is logged and the tick moves on.
    fn process_interval_jobs(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        let specs = self.specs.clone();
        for spec in &specs {
            let Some(interval) = spec.interval_sec() else {
                continue;
            };
            if !self.interval_due(spec, interval, now) {
                continue;
            }
            if let Err(e) = self.try_dispatch(spec, Trigger::Interval, now, report) {
                tracing::warn!("⚠️ Interval dispatch of '{}' failed: {e}", spec.job_id);
            }
        }
    }

    fn interval_due(&mut self, spec: &JobSpec, interval: u64, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.last_dispatch.get(&spec.job_id) {
            return now >= add_seconds(*last, interval);
        }
        let first = *self.first_seen.entry(spec.job_id.clone()).or_insert(now);
        let window = self.config.jitter_window_sec.min(interval);
        let offset = jitter_offset_sec(&spec.job_id, window);
        now >= add_seconds(first, offset)
    }

    fn process_cron_jobs(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        let slot = cron::minute_slot(now);
        let specs = self.specs.clone();
        for spec in &specs {
            let Some(expr) = spec.cron_expression() else {
                continue;
            };
            if self.last_cron_slot.get(&spec.job_id) == Some(&slot) {
                continue;
            }
            let matched = self
                .crons
                .entry(expr.to_string())
                .or_insert_with(|| CronSchedule::parse(expr))
                .as_ref()
                .is_some_and(|c| c.matches(now));
            if !matched {
                continue;
            }
            // A capped or failed dispatch may still go out later in the same minute.
            match self.try_dispatch(spec, Trigger::Cron, now, report) {
                Ok(Dispatch::Skipped(SkipReason::DispatchCapped { .. })) => {}
                Ok(_) => {
                    self.last_cron_slot.insert(spec.job_id.clone(), slot);
                }
                Err(e) => tracing::warn!("⚠️ Cron dispatch of '{}' failed: {e}", spec.job_id),
            }
        }
    }

    fn try_dispatch(
        &mut self,
        spec: &JobSpec,
        trigger: Trigger,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<Dispatch> {
        if let Some(reason) = self.check_guards(spec, now, report.dispatched.len())? {
            self.record_skip(&spec.job_id, &reason);
            report.skipped.push((spec.job_id.clone(), reason.clone()));
            return Ok(Dispatch::Skipped(reason));
        }
        let run_id = self.dispatch(spec, spec.inputs.clone(), trigger, now, None)?;
        report.dispatched.push(run_id.clone());
        Ok(Dispatch::Dispatched { run_id })
    }

    /// Guard pipeline, in order. `None` means dispatch may proceed.
    fn check_guards(&self, spec: &JobSpec, now: DateTime<Utc>, dispatched: usize) -> Result<Option<SkipReason>> {
        let job_id = spec.job_id.as_str();
        let queue = &self.services.queue;

        if self.services.approvals.has_pending_for_job(job_id)? {
            return Ok(Some(SkipReason::PendingApproval));
        }
        let remaining_sec = self.services.failures.get_cooldown_remaining_at(job_id, now)?;
        if remaining_sec > 0 {
            return Ok(Some(SkipReason::Cooldown { remaining_sec }));
        }
        if !spec.allow_overlap {
            let active = queue.active_count(job_id)?;
            if active > 0 {
                return Ok(Some(SkipReason::Overlap { active }));
            }
        }
        if let (Some(group), Some(cap)) = (&spec.flow_group, spec.max_active_runs) {
            let active = self.flow_group_active(group)?;
            if active >= cap as usize {
                return Ok(Some(SkipReason::FlowLimit {
                    group: group.clone(),
                    active,
                    cap,
                }));
            }
        }
        if self.pressure.is_active() && spec.priority != Priority::Critical {
            return Ok(Some(SkipReason::Pressure {
                depth: self.pressure.last_depth(),
            }));
        }
        if dispatched >= self.config.max_dispatch_per_tick {
            return Ok(Some(SkipReason::DispatchCapped {
                cap: self.config.max_dispatch_per_tick,
            }));
        }
        Ok(None)
    }

    fn flow_group_active(&self, group: &str) -> Result<usize> {
        let mut total = 0;
        for spec in self.specs.iter().filter(|s| s.flow_group.as_deref() == Some(group)) {
            total += self.services.queue.active_count(&spec.job_id)?;
        }
        Ok(total)
    }

    fn record_skip(&self, job_id: &str, reason: &SkipReason) {
        tracing::debug!("⏭️ Skipped '{job_id}': {reason}");
        self.services
            .queue
            .events()
            .emit(reason.event_name(), reason.to_event_data(job_id));
    }

    fn dispatch(
        &mut self,
        spec: &JobSpec,
        inputs: jobclaw_core::types::Inputs,
        trigger: Trigger,
        now: DateTime<Utc>,
        actor: Option<&str>,
    ) -> Result<String> {
        let queue = self.services.queue.clone();
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut event = QueueEvent::from_spec(spec, &run_id, now);
        event.inputs = inputs;

        let mut run = Run::queued(&run_id, &spec.job_id, 0, now, event.inputs.clone());
        run.trace_id = event.trace_id.clone();
        queue.save_run(&run)?;
        queue.mark_active(&spec.job_id, &run_id)?;
        if let Err(e) = queue.enqueue(&event) {
            if let Err(clear) = queue.clear_active(&spec.job_id, &run_id) {
                tracing::warn!("⚠️ Could not clear active flag for {run_id}: {clear}");
            }
            return Err(e);
        }
        self.last_dispatch.insert(spec.job_id.clone(), now);
        if let Err(e) = queue.record_history(&spec.job_id, &run.summary()) {
            tracing::warn!("⚠️ Could not record history for {run_id}: {e}");
        }

        tracing::info!(
            "🚀 Dispatched '{}' run {run_id} ({})",
            spec.job_id,
            trigger.as_str()
        );
        queue.events().emit(
            names::DISPATCHED,
            json!({
                "job_id": spec.job_id,
                "run_id": run_id,
                "trigger": trigger.as_str(),
                "priority": spec.priority,
                "actor": actor,
            }),
        );
        Ok(run_id)
    }

    /// Dispatch a job right now. Only the approval and overlap guards apply.
    pub fn trigger(
        &mut self,
        job_id: &str,
        inputs_override: Option<serde_json::Value>,
        actor: &str,
    ) -> Result<Dispatch> {
        let spec = self
            .services
            .registry
            .get(job_id)?
            .ok_or_else(|| JobClawError::invalid(format!("unknown job '{job_id}'")))?;

        let mut inputs = spec.inputs.clone();
        match inputs_override {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::Object(extra)) => inputs.extend(extra),
            Some(other) => {
                return Err(JobClawError::invalid(format!(
                    "trigger inputs must be a JSON object, got {other}"
                )));
            }
        }

        let reason = if self.services.approvals.has_pending_for_job(job_id)? {
            Some(SkipReason::PendingApproval)
        } else if !spec.allow_overlap {
            let active = self.services.queue.active_count(job_id)?;
            (active > 0).then_some(SkipReason::Overlap { active })
        } else {
            None
        };
        if let Some(reason) = reason {
            self.record_skip(job_id, &reason);
            return Ok(Dispatch::Skipped(reason));
        }

        let run_id = self.dispatch(&spec, inputs, Trigger::Manual, Utc::now(), Some(actor))?;
        Ok(Dispatch::Dispatched { run_id })
    }

    /// Tick until `shutdown` flips to `true`. Tick errors are logged, never fatal.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "⏰ Scheduler '{}' started (tick every {}ms)",
            self.instance_id,
            self.config.tick_ms
        );
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_ms.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick() {
                        Ok(report) if !report.is_quiet() => tracing::debug!(
                            "tick: {} dispatched, {} skipped, {} released",
                            report.dispatched.len(),
                            report.skipped.len(),
                            report.drained
                        ),
                        Ok(_) => {}
                        Err(e) => tracing::warn!("⚠️ Scheduler tick failed: {e}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("🛑 Scheduler '{}' stopped", self.instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{Duration as ChronoDuration, TimeZone};
    use jobclaw_core::config::JobClawConfig;
    use jobclaw_core::traits::Store;
    use jobclaw_core::types::{FailurePolicy, ResourceRequest};
    use jobclaw_store::MemoryStore;

    use crate::registry::Provenance;
    use crate::testing::FailingStore;

    fn services() -> Services {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        Services::new(store, &JobClawConfig::default(), None)
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            jitter_window_sec: 0,
            ..Default::default()
        }
    }

    fn add(services: &Services, spec: JobSpec) {
        let id = spec.job_id.clone();
        services.registry.save(&id, spec, &Provenance::new("test", "t", "")).unwrap();
        services.registry.enable(&id).unwrap();
    }

    fn count_events(services: &Services, name: &str) -> usize {
        services
            .queue
            .get_events(1000, None)
            .unwrap()
            .iter()
            .filter(|e| e.event_type == name)
            .count()
    }

    #[test]
    fn test_jitter_is_deterministic_and_bounded() {
        for id in ["a", "billing-sync", "crawl:42"] {
            let j = jitter_offset_sec(id, 30);
            assert!(j < 30);
            assert_eq!(j, jitter_offset_sec(id, 30));
        }
        assert_eq!(jitter_offset_sec("a", 0), 0);
    }

    #[test]
    fn test_jitter_delays_first_dispatch() {
        let svc = services();
        add(&svc, JobSpec::new("j1", "t").with_interval(3600));
        let cfg = SchedulerConfig {
            jitter_window_sec: 600,
            ..Default::default()
        };
        let offset = jitter_offset_sec("j1", 600) as i64;
        let mut s = Scheduler::new(svc, cfg, "test");
        let t0 = Utc::now();
        let first = s.tick_at(t0).unwrap();
        assert_eq!(first.dispatched.len(), if offset == 0 { 1 } else { 0 });
        let later = s.tick_at(t0 + ChronoDuration::seconds(offset)).unwrap();
        assert_eq!(first.dispatched.len() + later.dispatched.len(), 1);
    }

    #[test]
    fn test_interval_dispatch_and_overlap() {
        let svc = services();
        add(&svc, JobSpec::new("j1", "t").with_interval(10));
        let mut s = Scheduler::new(svc.clone(), config(), "test");
        let t0 = Utc::now();

        let report = s.tick_at(t0).unwrap();
        assert!(report.reloaded);
        assert_eq!(report.dispatched.len(), 1);
        let run_id = report.dispatched[0].clone();
        assert_eq!(svc.queue.depth().unwrap(), 1);
        assert_eq!(svc.queue.active_runs("j1").unwrap(), vec![run_id.clone()]);

        // Not due yet.
        assert!(s.tick_at(t0 + ChronoDuration::seconds(5)).unwrap().is_quiet());

        // Due, but the first run is still active.
        let report = s.tick_at(t0 + ChronoDuration::seconds(10)).unwrap();
        assert_eq!(report.skipped[0].1, SkipReason::Overlap { active: 1 });
        assert_eq!(count_events(&svc, names::SKIPPED_OVERLAP), 1);

        svc.queue.clear_active("j1", &run_id).unwrap();
        let report = s.tick_at(t0 + ChronoDuration::seconds(11)).unwrap();
        assert_eq!(report.dispatched.len(), 1);
        assert_eq!(count_events(&svc, names::DISPATCHED), 2);
    }

    #[test]
    fn test_allow_overlap() {
        let svc = services();
        let mut spec = JobSpec::new("j1", "t").with_interval(10);
        spec.allow_overlap = true;
        add(&svc, spec);
        let mut s = Scheduler::new(svc.clone(), config(), "test");
        let t0 = Utc::now();
        s.tick_at(t0).unwrap();
        let report = s.tick_at(t0 + ChronoDuration::seconds(10)).unwrap();
        assert_eq!(report.dispatched.len(), 1);
        assert_eq!(svc.queue.active_count("j1").unwrap(), 2);
    }

    #[test]
    fn test_pending_approval_blocks_before_cooldown() {
        let svc = services();
        add(&svc, JobSpec::new("j1", "t").with_interval(10));
        let policy = FailurePolicy {
            threshold: 1,
            ..Default::default()
        };
        svc.failures.record_outcome("j1", false, Some("x"), &policy).unwrap();
        let (req, _) = svc
            .approvals
            .create(
                "r0",
                "j1",
                vec![ResourceRequest {
                    resource: "token".into(),
                    reason: String::new(),
                    detail: serde_json::Value::Null,
                }],
            )
            .unwrap();

        let mut s = Scheduler::new(svc.clone(), config(), "test");
        let report = s.tick_at(Utc::now()).unwrap();
        assert_eq!(report.skipped[0].1, SkipReason::PendingApproval);

        svc.approvals
            .decide(&req.approval_id, jobclaw_core::types::ApprovalStatus::Approved, "ops", None)
            .unwrap();
        let report = s.tick_at(Utc::now()).unwrap();
        assert!(matches!(report.skipped[0].1, SkipReason::Cooldown { .. }));
        assert_eq!(count_events(&svc, names::SKIPPED_COOLDOWN), 1);
    }

    #[test]
    fn test_flow_group_limit() {
        let svc = services();
        for id in ["crawl-a", "crawl-b"] {
            let mut spec = JobSpec::new(id, "t").with_interval(60);
            spec.flow_group = Some("crawl".into());
            spec.max_active_runs = Some(1);
            add(&svc, spec);
        }
        let mut s = Scheduler::new(svc.clone(), config(), "test");
        let report = s.tick_at(Utc::now()).unwrap();
        assert_eq!(report.dispatched.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(matches!(
            &report.skipped[0].1,
            SkipReason::FlowLimit { group, active: 1, cap: 1 } if group == "crawl"
        ));
    }

    #[test]
    fn test_pressure_lets_only_critical_through() {
        let svc = services();
        add(&svc, JobSpec::new("normal", "t").with_interval(60));
        let mut critical = JobSpec::new("critical", "t").with_interval(60);
        critical.priority = Priority::Critical;
        add(&svc, critical);

        let backlog = QueueEvent::from_spec(&JobSpec::new("x", "t"), "bx", Utc::now());
        for _ in 0..3 {
            svc.queue.enqueue(&backlog).unwrap();
        }
        let cfg = SchedulerConfig {
            pressure_high: 2,
            pressure_low: 1,
            ..config()
        };
        let mut s = Scheduler::new(svc.clone(), cfg, "test");
        let t0 = Utc::now();
        let report = s.tick_at(t0).unwrap();
        assert_eq!(report.pressure, Some(PressureChange::Entered));
        assert!(s.in_pressure());
        assert_eq!(report.dispatched.len(), 1);
        assert_eq!(svc.queue.active_count("critical").unwrap(), 1);
        assert!(matches!(report.skipped[0].1, SkipReason::Pressure { depth: 3 }));

        // Between the watermarks pressure holds and normal jobs still wait.
        svc.queue.dequeue("w").unwrap();
        svc.queue.dequeue("w").unwrap();
        assert_eq!(svc.queue.depth().unwrap(), 2);
        let report = s.tick_at(t0 + ChronoDuration::seconds(61)).unwrap();
        assert_eq!(report.pressure, None);
        assert!(s.in_pressure());
        assert!(report.dispatched.is_empty());
        let normal = report.skipped.iter().find(|(id, _)| id == "normal").unwrap();
        assert_eq!(normal.1, SkipReason::Pressure { depth: 2 });
        assert_eq!(svc.queue.active_count("normal").unwrap(), 0);

        // Only below the low watermark does it exit.
        while svc.queue.dequeue("w").unwrap().is_some() {}
        let report = s.tick_at(t0 + ChronoDuration::seconds(62)).unwrap();
        assert_eq!(report.pressure, Some(PressureChange::Exited));
        assert_eq!(count_events(&svc, names::PRESSURE_EXITED), 1);
        assert_eq!(svc.queue.active_count("normal").unwrap(), 1);
    }

    #[test]
    fn test_dispatch_cap_per_tick() {
        let svc = services();
        add(&svc, JobSpec::new("a", "t").with_interval(60));
        add(&svc, JobSpec::new("b", "t").with_interval(60));
        let cfg = SchedulerConfig {
            max_dispatch_per_tick: 1,
            ..config()
        };
        let mut s = Scheduler::new(svc.clone(), cfg, "test");
        let t0 = Utc::now();
        let report = s.tick_at(t0).unwrap();
        assert_eq!(report.dispatched.len(), 1);
        assert_eq!(report.skipped[0].1, SkipReason::DispatchCapped { cap: 1 });
        // The capped job goes out next tick.
        let report = s.tick_at(t0 + ChronoDuration::seconds(1)).unwrap();
        assert_eq!(report.dispatched.len(), 1);
    }

    #[test]
    fn test_cron_fires_once_per_minute_slot() {
        let svc = services();
        let mut spec = JobSpec::new("c1", "t").with_cron("* * * * *");
        spec.allow_overlap = true;
        add(&svc, spec);
        let mut s = Scheduler::new(svc.clone(), config(), "test");

        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 15, 5).unwrap();
        assert_eq!(s.tick_at(t0).unwrap().dispatched.len(), 1);
        assert!(s.tick_at(t0 + ChronoDuration::seconds(1)).unwrap().dispatched.is_empty());
        assert!(s.tick_at(t0 + ChronoDuration::seconds(54)).unwrap().dispatched.is_empty());
        assert_eq!(
            s.tick_at(t0 + ChronoDuration::seconds(55)).unwrap().dispatched.len(),
            1
        );
    }

    #[test]
    fn test_cron_respects_fields() {
        let svc = services();
        add(&svc, JobSpec::new("c1", "t").with_cron("30 9 * * *"));
        let mut s = Scheduler::new(svc, config(), "test");
        let miss = Utc.with_ymd_and_hms(2026, 3, 2, 9, 15, 0).unwrap();
        let hit = Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap();
        assert!(s.tick_at(miss).unwrap().dispatched.is_empty());
        assert_eq!(s.tick_at(hit).unwrap().dispatched.len(), 1);
    }

    #[test]
    fn test_due_retries_are_released() {
        let svc = services();
        let mut s = Scheduler::new(svc.clone(), config(), "test");
        let now = Utc::now();
        let retry = QueueEvent::from_spec(&JobSpec::new("j1", "t"), "r1", now).next_attempt(now);
        svc.queue.schedule_delayed_at(&retry, now - ChronoDuration::seconds(1)).unwrap();

        let report = s.tick_at(now).unwrap();
        assert_eq!(report.drained, 1);
        assert_eq!(svc.queue.delayed_count().unwrap(), 0);
        assert_eq!(svc.queue.dequeue("w").unwrap().unwrap().run_id, "r1~1");
        assert!(svc.queue.is_alive(&s.heartbeat_name()).unwrap());
    }

    #[test]
    fn test_manual_trigger() {
        let svc = services();
        let mut spec = JobSpec::new("j1", "t");
        spec.inputs.insert("mode".into(), json!("full"));
        add(&svc, spec);
        let mut s = Scheduler::new(svc.clone(), config(), "test");

        assert!(matches!(
            s.trigger("ghost", None, "ops"),
            Err(JobClawError::Validation(_))
        ));
        assert!(matches!(
            s.trigger("j1", Some(json!([1, 2])), "ops"),
            Err(JobClawError::Validation(_))
        ));

        let Dispatch::Dispatched { run_id } = s.trigger("j1", Some(json!({ "mode": "quick", "dry": true })), "ops").unwrap() else {
            panic!("expected dispatch");
        };
        let event = svc.queue.dequeue("w").unwrap().unwrap();
        assert_eq!(event.run_id, run_id);
        assert_eq!(event.inputs["mode"], "quick");
        assert_eq!(event.inputs["dry"], true);

        // First run still active.
        assert!(matches!(
            s.trigger("j1", None, "ops").unwrap(),
            Dispatch::Skipped(SkipReason::Overlap { .. })
        ));
    }

    #[test]
    fn test_huge_interval_never_comes_due_again() {
        let svc = services();
        let mut spec = JobSpec::new("j1", "t").with_interval(u64::MAX);
        spec.allow_overlap = true;
        add(&svc, spec);
        let mut s = Scheduler::new(svc.clone(), config(), "test");
        let t0 = Utc::now();
        assert_eq!(s.tick_at(t0).unwrap().dispatched.len(), 1);
        assert!(s.tick_at(t0 + ChronoDuration::seconds(1)).unwrap().dispatched.is_empty());
        assert!(s.tick_at(t0 + ChronoDuration::days(365)).unwrap().dispatched.is_empty());
        assert_eq!(svc.queue.active_count("j1").unwrap(), 1);
    }

    #[test]
    fn test_store_errors_do_not_abort_tick_or_lose_retries() {
        let store = Arc::new(FailingStore::default());
        let svc = Services::new(store.clone(), &JobClawConfig::default(), None);
        add(&svc, JobSpec::new("a", "t").with_interval(60));
        add(&svc, JobSpec::new("b", "t").with_interval(60));
        let mut cron = JobSpec::new("c", "t").with_cron("* * * * *");
        cron.allow_overlap = true;
        add(&svc, cron);
        let mut s = Scheduler::new(svc.clone(), config(), "test");

        let now = Utc.with_ymd_and_hms(2026, 3, 2, 9, 15, 5).unwrap();
        for run_id in ["r1", "r2"] {
            let retry = QueueEvent::from_spec(&JobSpec::new("d", "t"), run_id, now).next_attempt(now);
            svc.queue.schedule_delayed_at(&retry, now - ChronoDuration::seconds(1)).unwrap();
        }

        // The work stream rejects writes: nothing goes out, nothing is lost.
        store.fail("xadd");
        let report = s.tick_at(now).unwrap();
        assert!(report.dispatched.is_empty());
        assert_eq!(report.drained, 0);
        assert_eq!(svc.queue.delayed_count().unwrap(), 2);
        assert_eq!(svc.queue.active_count("a").unwrap(), 0);
        assert_eq!(svc.queue.active_count("d").unwrap(), 0);

        store.heal("xadd");
        let report = s.tick_at(now + ChronoDuration::seconds(1)).unwrap();
        assert_eq!(report.dispatched.len(), 3);
        assert_eq!(report.drained, 2);
        assert_eq!(svc.queue.delayed_count().unwrap(), 0);
        assert_eq!(svc.queue.depth().unwrap(), 5);
    }

    #[test]
    fn test_reload_prunes_cron_cache() {
        let svc = services();
        add(&svc, JobSpec::new("c1", "t").with_cron("0 * * * *"));
        add(&svc, JobSpec::new("c2", "t").with_cron("30 9 * * *"));
        let mut s = Scheduler::new(svc.clone(), config(), "test");
        s.tick_at(Utc.with_ymd_and_hms(2026, 3, 2, 9, 15, 0).unwrap()).unwrap();
        assert_eq!(s.crons.len(), 2);

        svc.registry.disable("c2").unwrap();
        s.reload().unwrap();
        assert_eq!(s.crons.len(), 1);
        assert!(s.crons.contains_key("0 * * * *"));
    }
}
