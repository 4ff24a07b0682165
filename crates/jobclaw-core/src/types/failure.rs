//! Failure memory state: per-job consecutive failures and cooldown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureState {
    pub job_id: String,
    pub consecutive_failures: u32,
    #[serde(default)]
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Thresholds for the self-healing cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FailurePolicy {
    /// Consecutive failures before cooldown kicks in.
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default = "default_cooldown_base")]
    pub cooldown_base_sec: u64,
    #[serde(default = "default_cooldown_max")]
    pub cooldown_max_sec: u64,
}

fn default_threshold() -> u32 { 3 }
fn default_cooldown_base() -> u64 { 60 }
fn default_cooldown_max() -> u64 { 3600 }

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            cooldown_base_sec: default_cooldown_base(),
            cooldown_max_sec: default_cooldown_max(),
        }
    }
}

impl FailurePolicy {
    /// Cooldown length after `consecutive_failures`, `None` below threshold.
    /// `min(max, base * 2^(failures - threshold))`.
    pub fn cooldown_for(&self, consecutive_failures: u32) -> Option<u64> {
        let threshold = self.threshold.max(1);
        if consecutive_failures < threshold {
            return None;
        }
        let exp = (consecutive_failures - threshold).min(32);
        let secs = self.cooldown_base_sec.saturating_mul(1u64 << exp);
        Some(secs.min(self.cooldown_max_sec))
    }
}
