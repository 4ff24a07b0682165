//! Handler registry: one executor per job type.

use std::collections::BTreeMap;
use std::sync::Arc;

use jobclaw_core::error::{JobClawError, Result};
use jobclaw_core::traits::{Handler, InputValidator};
use jobclaw_core::types::Inputs;

use crate::skills::SkillRegistry;

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
    skills: Option<Arc<SkillRegistry>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve aliases and skills before checking inputs.
    pub fn with_skills(mut self, skills: Arc<SkillRegistry>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        let job_type = handler.job_type().to_string();
        tracing::debug!("🔌 Registered handler: {job_type}");
        self.handlers.insert(job_type, handler);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl InputValidator for HandlerRegistry {
    /// Required keys must be present. Types with no local handler pass;
    /// their handler may live in another worker process.
    fn validate_inputs(&self, job_type: &str, inputs: &Inputs) -> Result<()> {
        let (resolved_type, resolved_inputs) = match &self.skills {
            Some(skills) => {
                let r = skills.resolve(job_type, inputs);
                (r.job_type, r.inputs)
            }
            None => (job_type.to_string(), inputs.clone()),
        };
        let Some(handler) = self.handlers.get(&resolved_type) else {
            tracing::debug!("No local handler for '{resolved_type}', skipping input check");
            return Ok(());
        };
        for key in handler.required_inputs() {
            if !resolved_inputs.contains_key(*key) {
                return Err(JobClawError::invalid(format!(
                    "Missing required input '{key}' for type '{resolved_type}'"
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jobclaw_core::config::SkillConfig;
    use jobclaw_core::context::ExecutionContext;
    use jobclaw_core::traits::{HandlerError, HandlerOutput};
    use serde_json::json;

    struct Notify;

    #[async_trait]
    impl Handler for Notify {
        fn job_type(&self) -> &str {
            "notify"
        }

        fn required_inputs(&self) -> &[&str] {
            &["channel", "text"]
        }

        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            _inputs: &Inputs,
        ) -> std::result::Result<HandlerOutput, HandlerError> {
            Ok(HandlerOutput::default())
        }
    }

    #[test]
    fn test_required_inputs_enforced() {
        let mut reg = HandlerRegistry::new();
        reg.register(Arc::new(Notify));

        let mut inputs = Inputs::new();
        inputs.insert("channel".into(), json!("ops"));
        let err = reg.validate_inputs("notify", &inputs).unwrap_err();
        assert!(err.to_string().contains("text"));

        inputs.insert("text".into(), json!("hi"));
        assert!(reg.validate_inputs("notify", &inputs).is_ok());
        assert!(reg.validate_inputs("remote.only", &Inputs::new()).is_ok());
    }

    #[test]
    fn test_skill_defaults_count_as_inputs() {
        let mut skills = SkillRegistry::new();
        let mut defaults = Inputs::new();
        defaults.insert("channel".into(), json!("ops"));
        skills.register(SkillConfig {
            name: "ops-notify".into(),
            target_type: "notify".into(),
            default_inputs: defaults,
            allowed_tools: None,
        });
        let mut reg = HandlerRegistry::new().with_skills(Arc::new(skills));
        reg.register(Arc::new(Notify));

        let mut inputs = Inputs::new();
        inputs.insert("text".into(), json!("deploy done"));
        assert!(reg.validate_inputs("ops-notify", &inputs).is_ok());
        assert!(reg.validate_inputs("notify", &inputs).is_err());
    }
}
