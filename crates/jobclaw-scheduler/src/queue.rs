//! Event queue: work stream, delayed tier, run records and history.
//!
//! ```text
//! Scheduler ──enqueue──▶ queue:events (stream, group "workers") ──dequeue──▶ Runner
//!     ▲                                                                   │
//!     └──── drain_due ◀── queue:delayed (zset, score = due ts) ◀── retry ─┘
//! ```
//!
//! Delivery is at-least-once: `dequeue` acks as soon as it claims, so a
//! worker that dies mid-run leaves a RUNNING row behind and nothing else.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use jobclaw_core::config::QueueConfig;
use jobclaw_core::error::{JobClawError, Result};
use jobclaw_core::traits::Store;
use jobclaw_core::types::{ObservabilityEvent, QueueEvent, Run, RunSummary, add_seconds};

use crate::events::EventLog;
use crate::keys;

pub struct EventQueue {
    store: Arc<dyn Store>,
    events: EventLog,
    history_len: usize,
}

fn score(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_millis() as f64 / 1000.0
}

impl EventQueue {
    pub fn new(store: Arc<dyn Store>, config: &QueueConfig) -> Self {
        Self {
            events: EventLog::new(store.clone(), config.event_log_cap),
            store,
            history_len: config.run_history_len.max(1),
        }
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    // ─── Work stream ──────────────────────────────────────────

    /// Append to the work stream; returns the message id.
    pub fn enqueue(&self, event: &QueueEvent) -> Result<String> {
        let id = self
            .store
            .xadd(keys::QUEUE_STREAM, &serde_json::to_string(event)?)?;
        tracing::debug!("📥 Enqueued run {} for '{}' (msg {id})", event.run_id, event.job_id);
        Ok(id)
    }

    /// Claim one event for `worker_id`. Malformed payloads are acked and skipped.
    pub fn dequeue(&self, worker_id: &str) -> Result<Option<QueueEvent>> {
        loop {
            let Some(entry) = self
                .store
                .xreadgroup(keys::QUEUE_STREAM, keys::QUEUE_GROUP, worker_id, 1)?
                .into_iter()
                .next()
            else {
                return Ok(None);
            };
            self.store.xack(keys::QUEUE_STREAM, keys::QUEUE_GROUP, &entry.id)?;
            match serde_json::from_str::<QueueEvent>(&entry.payload) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => tracing::warn!("⚠️ Dropping malformed queue message {}: {e}", entry.id),
            }
        }
    }

    /// Undelivered entries in the work stream.
    pub fn depth(&self) -> Result<usize> {
        Ok(self.store.xlag(keys::QUEUE_STREAM, keys::QUEUE_GROUP)?)
    }

    // ─── Delayed tier ─────────────────────────────────────────

    pub fn schedule_delayed(&self, event: &QueueEvent, delay_seconds: u64) -> Result<DateTime<Utc>> {
        self.schedule_delayed_at(event, add_seconds(Utc::now(), delay_seconds))
    }

    pub fn schedule_delayed_at(&self, event: &QueueEvent, due: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.store
            .zadd(keys::QUEUE_DELAYED, &serde_json::to_string(event)?, score(due))?;
        tracing::debug!("⏳ Run {} for '{}' delayed until {due}", event.run_id, event.job_id);
        Ok(due)
    }

    /// Remove and return every delayed event due at `now`.
    /// Only entries this caller actually removed are returned.
    pub fn drain_due(&self, now: DateTime<Utc>) -> Result<Vec<QueueEvent>> {
        let mut due = Vec::new();
        for (member, _) in self.store.zrange_by_score(keys::QUEUE_DELAYED, score(now))? {
            match self.store.zrem(keys::QUEUE_DELAYED, &member) {
                Ok(true) => {}
                Ok(false) => continue,
                // Keep what was already removed; the rest stays delayed.
                Err(e) => {
                    tracing::warn!("⚠️ Delayed drain stopped early: {e}");
                    break;
                }
            }
            match serde_json::from_str::<QueueEvent>(&member) {
                Ok(event) => due.push(event),
                Err(e) => tracing::warn!("⚠️ Dropping malformed delayed event: {e}"),
            }
        }
        Ok(due)
    }

    pub fn delayed_count(&self) -> Result<usize> {
        Ok(self.store.zcard(keys::QUEUE_DELAYED)?)
    }

    // ─── Runs ─────────────────────────────────────────────────

    /// Persist a run. Backward status transitions are rejected.
    pub fn save_run(&self, run: &Run) -> Result<()> {
        if let Some(existing) = self.get_run(&run.run_id)?
            && existing.status != run.status
            && !existing.status.can_transition_to(run.status)
        {
            return Err(JobClawError::Conflict(format!(
                "run {} cannot move from {} to {}",
                run.run_id, existing.status, run.status
            )));
        }
        keys::save(self.store.as_ref(), &keys::run(&run.run_id), run)?;
        self.store
            .zadd(keys::RUNS_INDEX, &run.run_id, score(run.scheduled_at))?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        keys::load(self.store.as_ref(), &keys::run(run_id))
    }

    /// Most recently scheduled runs first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let mut runs = Vec::new();
        for run_id in self.store.zrevrange(keys::RUNS_INDEX, limit)? {
            if let Some(run) = self.get_run(&run_id)? {
                runs.push(run);
            }
        }
        Ok(runs)
    }

    /// Push onto the job's bounded history ring.
    pub fn record_history(&self, job_id: &str, entry: &RunSummary) -> Result<()> {
        let key = keys::run_history(job_id);
        let len = self.store.lpush(&key, &serde_json::to_string(entry)?)?;
        if len > self.history_len {
            self.store.ltrim(&key, self.history_len)?;
        }
        Ok(())
    }

    /// Newest first.
    pub fn job_history(&self, job_id: &str, limit: usize) -> Result<Vec<RunSummary>> {
        let key = keys::run_history(job_id);
        self.store
            .lrange(&key, 0, limit)?
            .iter()
            .map(|raw| keys::decode(&key, raw))
            .collect()
    }

    // ─── Active runs ──────────────────────────────────────────

    pub fn mark_active(&self, job_id: &str, run_id: &str) -> Result<()> {
        self.store.sadd(&keys::active_runs(job_id), run_id)?;
        Ok(())
    }

    pub fn clear_active(&self, job_id: &str, run_id: &str) -> Result<()> {
        self.store.srem(&keys::active_runs(job_id), run_id)?;
        Ok(())
    }

    pub fn active_runs(&self, job_id: &str) -> Result<Vec<String>> {
        Ok(self.store.smembers(&keys::active_runs(job_id))?)
    }

    pub fn active_count(&self, job_id: &str) -> Result<usize> {
        Ok(self.store.scard(&keys::active_runs(job_id))?)
    }

    // ─── Observability ────────────────────────────────────────

    pub fn append_event(&self, event_type: &str, data: serde_json::Value) -> Result<ObservabilityEvent> {
        self.events.append(event_type, data)
    }

    pub fn get_events(&self, limit: usize, since: Option<DateTime<Utc>>) -> Result<Vec<ObservabilityEvent>> {
        self.events.recent(limit, since)
    }

    // ─── Heartbeats ───────────────────────────────────────────

    pub fn heartbeat(&self, name: &str, ttl_secs: u64) -> Result<()> {
        self.store
            .set_ex(&keys::heartbeat(name), &Utc::now().to_rfc3339(), ttl_secs)?;
        Ok(())
    }

    /// Last heartbeat time, if still within its TTL.
    pub fn last_heartbeat(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .store
            .get(&keys::heartbeat(name))?
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|ts| ts.with_timezone(&Utc)))
    }

    pub fn is_alive(&self, name: &str) -> Result<bool> {
        Ok(self.store.get(&keys::heartbeat(name))?.is_some())
    }
}
