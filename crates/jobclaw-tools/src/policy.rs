//! Capability policy: which tools a job type (and skill) may use.
//!
//! Deny always wins. A job type without an allowlist may use anything
//! not denied. A skill allowlist narrows the result further.

use std::collections::HashMap;

use jobclaw_core::config::{JobClawConfig, PolicyRule};

/// Per-job-type allow/deny lists.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    rules: HashMap<String, PolicyRule>,
}

impl ToolPolicy {
    pub fn new(rules: HashMap<String, PolicyRule>) -> Self {
        Self { rules }
    }

    /// Create a policy from the `[policy.<type>]` config sections.
    pub fn from_config(config: &JobClawConfig) -> Self {
        Self::new(config.policy.clone())
    }

    /// Set or replace the rule for a job type.
    pub fn set_rule(&mut self, job_type: &str, rule: PolicyRule) {
        self.rules.insert(job_type.to_string(), rule);
    }

    pub fn rule(&self, job_type: &str) -> Option<&PolicyRule> {
        self.rules.get(job_type)
    }

    /// Check if `tool` is allowed for `job_type`.
    pub fn is_allowed(&self, job_type: &str, tool: &str) -> bool {
        let Some(rule) = self.rules.get(job_type) else {
            return true;
        };
        if rule.denylist.iter().any(|d| d == tool) {
            return false;
        }
        match &rule.allowlist {
            Some(allow) => allow.iter().any(|a| a == tool),
            None => true,
        }
    }

    /// Both the type policy and the skill allowlist (if any) must pass.
    pub fn is_allowed_with_skill(&self, job_type: &str, skill_allowlist: Option<&[String]>, tool: &str) -> bool {
        if !self.is_allowed(job_type, tool) {
            return false;
        }
        skill_allowlist.is_none_or(|allow| allow.iter().any(|a| a == tool))
    }

    /// Names from `tools` this run may use, order preserved.
    pub fn filter(&self, job_type: &str, skill_allowlist: Option<&[String]>, tools: &[String]) -> Vec<String> {
        let allowed: Vec<String> = tools
            .iter()
            .filter(|t| self.is_allowed_with_skill(job_type, skill_allowlist, t))
            .cloned()
            .collect();
        if allowed.len() < tools.len() {
            tracing::debug!(
                "🔒 Policy for '{job_type}' allows {}/{} tools",
                allowed.len(),
                tools.len()
            );
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn policy() -> ToolPolicy {
        let mut p = ToolPolicy::default();
        p.set_rule(
            "monitor.channel",
            PolicyRule {
                allowlist: Some(names(&["http", "notify", "shell"])),
                denylist: names(&["shell"]),
            },
        );
        p.set_rule(
            "report.digest",
            PolicyRule {
                allowlist: None,
                denylist: names(&["shell"]),
            },
        );
        p
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let p = policy();
        assert!(p.is_allowed("monitor.channel", "http"));
        assert!(!p.is_allowed("monitor.channel", "shell"));
        assert!(!p.is_allowed("monitor.channel", "fs"));
    }

    #[test]
    fn test_no_allowlist_defaults_to_allow() {
        let p = policy();
        assert!(p.is_allowed("report.digest", "fs"));
        assert!(!p.is_allowed("report.digest", "shell"));
        assert!(p.is_allowed("unconfigured", "shell"));
    }

    #[test]
    fn test_skill_allowlist_intersects() {
        let p = policy();
        let skill = names(&["notify", "shell", "fs"]);
        assert!(p.is_allowed_with_skill("monitor.channel", Some(&skill), "notify"));
        // Skill allows it, type denies it.
        assert!(!p.is_allowed_with_skill("monitor.channel", Some(&skill), "shell"));
        // Type allows it, skill does not.
        assert!(!p.is_allowed_with_skill("monitor.channel", Some(&skill), "http"));

        let all = names(&["http", "notify", "shell", "fs"]);
        assert_eq!(p.filter("monitor.channel", Some(&skill), &all), names(&["notify"]));
        assert_eq!(p.filter("monitor.channel", None, &all), names(&["http", "notify"]));
    }
}
