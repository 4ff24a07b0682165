//! Skill registry: alias and skill indirection on job types.
//!
//! An alias is a plain rename (`monitor` → `monitor.channel`). A skill is a
//! named preset over a real type: default inputs plus a tool allowlist that
//! narrows whatever the type's policy grants.

use std::collections::HashMap;

use jobclaw_core::config::{JobClawConfig, SkillConfig};
use jobclaw_core::types::Inputs;

/// Alias chains longer than this are treated as cycles.
const MAX_ALIAS_HOPS: usize = 8;

/// A job type after alias/skill resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedType {
    /// Type whose handler runs.
    pub job_type: String,
    pub skill: Option<String>,
    /// Skill defaults with the caller's inputs on top.
    pub inputs: Inputs,
    pub allowed_tools: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct SkillRegistry {
    skills: HashMap<String, SkillConfig>,
    aliases: HashMap<String, String>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &JobClawConfig) -> Self {
        let mut reg = Self::new();
        for skill in &config.skills {
            reg.register(skill.clone());
        }
        for (alias, target) in &config.aliases {
            reg.alias(alias, target);
        }
        if !reg.skills.is_empty() || !reg.aliases.is_empty() {
            tracing::info!(
                "📚 Loaded {} skill(s), {} alias(es)",
                reg.skills.len(),
                reg.aliases.len()
            );
        }
        reg
    }

    pub fn register(&mut self, skill: SkillConfig) {
        self.skills.insert(skill.name.clone(), skill);
    }

    pub fn alias(&mut self, alias: &str, target: &str) {
        self.aliases.insert(alias.to_string(), target.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&SkillConfig> {
        self.skills.get(name)
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.skills.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Follow aliases, then apply a skill if one matches.
    pub fn resolve(&self, job_type: &str, inputs: &Inputs) -> ResolvedType {
        let name = self.follow_aliases(job_type);
        let Some(skill) = self.skills.get(&name) else {
            return ResolvedType {
                job_type: name,
                skill: None,
                inputs: inputs.clone(),
                allowed_tools: None,
            };
        };

        let mut merged = skill.default_inputs.clone();
        for (k, v) in inputs {
            merged.insert(k.clone(), v.clone());
        }
        ResolvedType {
            job_type: self.follow_aliases(&skill.target_type),
            skill: Some(skill.name.clone()),
            inputs: merged,
            allowed_tools: skill.allowed_tools.clone(),
        }
    }

    fn follow_aliases(&self, job_type: &str) -> String {
        let mut current = job_type;
        for _ in 0..MAX_ALIAS_HOPS {
            match self.aliases.get(current) {
                Some(next) => current = next,
                None => return current.to_string(),
            }
        }
        tracing::warn!("⚠️ Alias chain for '{job_type}' does not terminate, using '{current}'");
        current.to_string()
    }
}
