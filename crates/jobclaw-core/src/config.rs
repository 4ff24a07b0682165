//! JobClaw configuration system.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{JobClawError, Result};
use crate::types::{FailurePolicy, Inputs};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobClawConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub failure: FailurePolicy,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Tool policy per job type.
    #[serde(default)]
    pub policy: HashMap<String, PolicyRule>,
    #[serde(default)]
    pub skills: Vec<SkillConfig>,
    /// Job type aliases: alias -> real type.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

impl JobClawConfig {
    /// Load config from `$JOBCLAW_CONFIG` or the default path; defaults if absent.
    pub fn load() -> Result<Self> {
        let path = std::env::var("JOBCLAW_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| JobClawError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| JobClawError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| JobClawError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the JobClaw home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".jobclaw")
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.tick_ms == 0 {
            return Err(JobClawError::Config("scheduler.tick_ms must be > 0".into()));
        }
        if self.scheduler.pressure_low >= self.scheduler.pressure_high {
            return Err(JobClawError::Config(format!(
                "scheduler.pressure_low ({}) must be below pressure_high ({})",
                self.scheduler.pressure_low, self.scheduler.pressure_high
            )));
        }
        if self.failure.threshold == 0 {
            return Err(JobClawError::Config("failure.threshold must be >= 1".into()));
        }
        Ok(())
    }
}

/// Which durable backend to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    /// In-memory only; nothing survives restart.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> String { "~/.jobclaw/jobclaw.db".into() }
fn default_busy_timeout() -> u64 { 2000 }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// Scheduler loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Reload enabled specs every N ticks.
    #[serde(default = "default_reload_every")]
    pub reload_every_ticks: u64,
    /// Upper bound for first-dispatch jitter of interval jobs.
    #[serde(default = "default_jitter_window")]
    pub jitter_window_sec: u64,
    #[serde(default = "default_max_dispatch")]
    pub max_dispatch_per_tick: usize,
    /// Enter pressure mode above this queue depth.
    #[serde(default = "default_pressure_high")]
    pub pressure_high: usize,
    /// Leave pressure mode below this queue depth.
    #[serde(default = "default_pressure_low")]
    pub pressure_low: usize,
    #[serde(default = "default_heartbeat_ttl")]
    pub heartbeat_ttl_sec: u64,
    /// Defaults to the hostname.
    #[serde(default)]
    pub instance_id: Option<String>,
}

fn default_tick_ms() -> u64 { 1000 }
fn default_reload_every() -> u64 { 5 }
fn default_jitter_window() -> u64 { 30 }
fn default_max_dispatch() -> usize { 50 }
fn default_pressure_high() -> usize { 1000 }
fn default_pressure_low() -> usize { 200 }
fn default_heartbeat_ttl() -> u64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            reload_every_ticks: default_reload_every(),
            jitter_window_sec: default_jitter_window(),
            max_dispatch_per_tick: default_max_dispatch(),
            pressure_high: default_pressure_high(),
            pressure_low: default_pressure_low(),
            heartbeat_ttl_sec: default_heartbeat_ttl(),
            instance_id: None,
        }
    }
}

/// Runner/worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Sleep between polls when the queue is empty.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Max chars of error text kept on a failed run.
    #[serde(default = "default_error_preview")]
    pub error_preview_chars: usize,
}

fn default_workers() -> usize { 4 }
fn default_poll_interval() -> u64 { 500 }
fn default_error_preview() -> usize { 2000 }

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval(),
            error_preview_chars: default_error_preview(),
        }
    }
}

/// Queue-side retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Entries kept per job in the run history ring.
    #[serde(default = "default_history_len")]
    pub run_history_len: usize,
    /// Max entries in the observability log.
    #[serde(default = "default_event_log_cap")]
    pub event_log_cap: usize,
}

fn default_history_len() -> usize { 50 }
fn default_event_log_cap() -> usize { 5000 }

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            run_history_len: default_history_len(),
            event_log_cap: default_event_log_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String { "info".into() }

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Allow/deny lists for one job type. Deny always wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// `None` = every tool not denied is allowed.
    #[serde(default)]
    pub allowlist: Option<Vec<String>>,
    #[serde(default)]
    pub denylist: Vec<String>,
}

/// A skill: a named preset over a real job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillConfig {
    pub name: String,
    /// Job type the skill executes as.
    pub target_type: String,
    /// Inputs merged under the event's own inputs.
    #[serde(default)]
    pub default_inputs: Inputs,
    /// Further restricts the type's tool policy.
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = JobClawConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.scheduler.tick_ms, 1000);
        assert_eq!(cfg.scheduler.reload_every_ticks, 5);
    }

    #[test]
    fn test_parse_toml() {
        let cfg: JobClawConfig = toml::from_str(
            r#"
            [scheduler]
            pressure_high = 50
            pressure_low = 10

            [failure]
            threshold = 2

            [policy."monitor.channel"]
            allowlist = ["http", "notify"]
            denylist = ["shell"]

            [[skills]]
            name = "daily-digest"
            target_type = "report.digest"
            allowed_tools = ["http"]
            default_inputs = { channel = "ops" }

            [aliases]
            "monitor" = "monitor.channel"
            "#,
        )
        .unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.failure.threshold, 2);
        assert_eq!(cfg.failure.cooldown_base_sec, 60);
        assert_eq!(cfg.policy["monitor.channel"].denylist, vec!["shell"]);
        assert_eq!(cfg.skills[0].default_inputs["channel"], "ops");
        assert_eq!(cfg.aliases["monitor"], "monitor.channel");
    }

    #[test]
    fn test_inverted_watermarks_rejected() {
        let mut cfg = JobClawConfig::default();
        cfg.scheduler.pressure_low = cfg.scheduler.pressure_high;
        assert!(cfg.validate().is_err());
    }
}
