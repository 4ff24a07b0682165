//! Dispatch guards. The first one that fails short-circuits the pipeline.

use serde_json::{Value, json};

use jobclaw_core::types::names;

/// Why a dispatch was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// An unresolved approval exists for the job.
    PendingApproval,
    Cooldown { remaining_sec: u64 },
    /// A previous run is still QUEUED or RUNNING.
    Overlap { active: usize },
    FlowLimit { group: String, active: usize, cap: u32 },
    /// Pressure mode, and the job is not critical.
    Pressure { depth: usize },
    /// Per-tick dispatch budget used up.
    DispatchCapped { cap: usize },
}

impl SkipReason {
    pub fn event_name(&self) -> &'static str {
        match self {
            SkipReason::PendingApproval => names::SKIPPED_PENDING_APPROVAL,
            SkipReason::Cooldown { .. } => names::SKIPPED_COOLDOWN,
            SkipReason::Overlap { .. } => names::SKIPPED_OVERLAP,
            SkipReason::FlowLimit { .. } => names::SKIPPED_FLOW_LIMIT,
            SkipReason::Pressure { .. } => names::SKIPPED_PRESSURE,
            SkipReason::DispatchCapped { .. } => names::DISPATCH_CAPPED,
        }
    }

    /// Event payload for `job_id`.
    pub fn to_event_data(&self, job_id: &str) -> Value {
        let mut data = match self {
            SkipReason::PendingApproval => json!({}),
            SkipReason::Cooldown { remaining_sec } => json!({ "remaining_sec": remaining_sec }),
            SkipReason::Overlap { active } => json!({ "active_runs": active }),
            SkipReason::FlowLimit { group, active, cap } => {
                json!({ "flow_group": group, "active_runs": active, "max_active_runs": cap })
            }
            SkipReason::Pressure { depth } => json!({ "depth": depth }),
            SkipReason::DispatchCapped { cap } => json!({ "max_dispatch_per_tick": cap }),
        };
        data["job_id"] = json!(job_id);
        data
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::PendingApproval => write!(f, "approval pending"),
            SkipReason::Cooldown { remaining_sec } => write!(f, "cooling down ({remaining_sec}s left)"),
            SkipReason::Overlap { active } => write!(f, "{active} run(s) still active"),
            SkipReason::FlowLimit { group, active, cap } => {
                write!(f, "flow group '{group}' at {active}/{cap}")
            }
            SkipReason::Pressure { depth } => write!(f, "queue pressure (depth {depth})"),
            SkipReason::DispatchCapped { cap } => write!(f, "tick budget of {cap} used"),
        }
    }
}
