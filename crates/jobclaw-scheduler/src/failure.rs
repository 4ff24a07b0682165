//! Failure memory: per-job consecutive failures and self-healing cooldown.
//!
//! Any success resets the counter. Once failures reach the threshold the
//! job sits out `min(max, base * 2^(failures - threshold))` seconds.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use jobclaw_core::error::Result;
use jobclaw_core::traits::Store;
use jobclaw_core::types::{FailurePolicy, FailureState, add_seconds};

use crate::keys;

pub struct FailureMemory {
    store: Arc<dyn Store>,
}

impl FailureMemory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn get(&self, job_id: &str) -> Result<FailureState> {
        Ok(keys::load(self.store.as_ref(), &keys::failure(job_id))?.unwrap_or_else(|| FailureState {
            job_id: job_id.to_string(),
            ..Default::default()
        }))
    }

    pub fn record_outcome(
        &self,
        job_id: &str,
        success: bool,
        error: Option<&str>,
        policy: &FailurePolicy,
    ) -> Result<FailureState> {
        self.record_outcome_at(job_id, success, error, policy, Utc::now())
    }

    pub fn record_outcome_at(
        &self,
        job_id: &str,
        success: bool,
        error: Option<&str>,
        policy: &FailurePolicy,
        now: DateTime<Utc>,
    ) -> Result<FailureState> {
        let mut state = self.get(job_id)?;
        if success {
            if state.consecutive_failures > 0 {
                tracing::info!(
                    "💚 Job '{job_id}' recovered after {} failure(s)",
                    state.consecutive_failures
                );
            }
            state.consecutive_failures = 0;
            state.cooldown_until = None;
            state.last_success_at = Some(now);
        } else {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.last_error = error.map(str::to_string);
            state.last_failure_at = Some(now);
            if let Some(secs) = policy.cooldown_for(state.consecutive_failures) {
                state.cooldown_until = Some(add_seconds(now, secs));
                tracing::warn!(
                    "🧊 Job '{job_id}' cooling down for {secs}s after {} consecutive failures",
                    state.consecutive_failures
                );
            }
        }
        keys::save(self.store.as_ref(), &keys::failure(job_id), &state)?;
        Ok(state)
    }

    /// Whole seconds left in the cooldown, rounded up. 0 when none.
    pub fn get_cooldown_remaining(&self, job_id: &str) -> Result<u64> {
        self.get_cooldown_remaining_at(job_id, Utc::now())
    }

    pub fn get_cooldown_remaining_at(&self, job_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let state = self.get(job_id)?;
        let Some(until) = state.cooldown_until else {
            return Ok(0);
        };
        let ms = (until - now).num_milliseconds();
        if ms <= 0 {
            return Ok(0);
        }
        Ok((ms as u64).div_ceil(1000))
    }

    /// Operator override: forget all failures for a job.
    pub fn reset(&self, job_id: &str) -> Result<()> {
        self.store.del(&keys::failure(job_id))?;
        tracing::info!("🔄 Failure memory reset for '{job_id}'");
        Ok(())
    }
}
