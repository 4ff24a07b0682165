//! Job registry: specs, enabled set and append-only version history.
//!
//! Every save appends a full snapshot to the job's version list and moves
//! the current pointer. Rollback re-saves an old snapshot as a new version;
//! history is never rewritten.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use jobclaw_core::error::{JobClawError, Result};
use jobclaw_core::traits::{InputValidator, Store};
use jobclaw_core::types::{JobSpec, JobVersion, names};

use crate::cron;
use crate::events::EventLog;
use crate::keys;

/// Who changed a job, from where, and why.
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    pub source: String,
    pub actor: String,
    pub note: String,
}

impl Provenance {
    pub fn new(source: &str, actor: &str, note: &str) -> Self {
        Self {
            source: source.to_string(),
            actor: actor.to_string(),
            note: note.to_string(),
        }
    }
}

pub struct JobRegistry {
    store: Arc<dyn Store>,
    validator: Option<Arc<dyn InputValidator>>,
    events: Option<EventLog>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            validator: None,
            events: None,
        }
    }

    /// Check inputs against handler-declared requirements on save.
    pub fn with_validator(mut self, validator: Arc<dyn InputValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate and store `spec` as the newest version of `job_id`.
    pub fn save(&self, job_id: &str, mut spec: JobSpec, by: &Provenance) -> Result<JobVersion> {
        if spec.job_id.is_empty() {
            spec.job_id = job_id.to_string();
        } else if spec.job_id != job_id {
            return Err(JobClawError::invalid(format!(
                "spec job_id '{}' does not match '{job_id}'",
                spec.job_id
            )));
        }
        spec.validate()?;
        if let Some(expr) = spec.cron_expression()
            && cron::CronSchedule::parse(expr).is_none()
        {
            return Err(JobClawError::invalid(format!("invalid cron expression '{expr}'")));
        }
        if let Some(validator) = &self.validator {
            validator.validate_inputs(&spec.job_type, &spec.inputs)?;
        }

        let version = JobVersion {
            version_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            source: by.source.clone(),
            actor: by.actor.clone(),
            note: by.note.clone(),
            spec,
        };
        self.store
            .lpush(&keys::job_versions(job_id), &serde_json::to_string(&version)?)?;
        keys::save(self.store.as_ref(), &keys::job_spec(job_id), &version.spec)?;
        self.store.sadd(keys::JOBS_ALL, job_id)?;

        tracing::info!(
            "📋 Job saved: '{job_id}' v{} by {} ({})",
            short(&version.version_id),
            by.actor,
            by.source
        );
        self.emit(
            names::JOB_SAVED,
            json!({ "job_id": job_id, "version_id": version.version_id, "actor": by.actor, "source": by.source }),
        );
        Ok(version)
    }

    pub fn get(&self, job_id: &str) -> Result<Option<JobSpec>> {
        keys::load(self.store.as_ref(), &keys::job_spec(job_id))
    }

    pub fn exists(&self, job_id: &str) -> Result<bool> {
        Ok(self.store.sismember(keys::JOBS_ALL, job_id)?)
    }

    /// Newest first.
    pub fn list_versions(&self, job_id: &str, limit: usize) -> Result<Vec<JobVersion>> {
        let key = keys::job_versions(job_id);
        self.store
            .lrange(&key, 0, limit)?
            .iter()
            .map(|raw| keys::decode(&key, raw))
            .collect()
    }

    pub fn get_version(&self, job_id: &str, version_id: &str) -> Result<Option<JobVersion>> {
        let key = keys::job_versions(job_id);
        let total = self.store.llen(&key)?;
        for raw in self.store.lrange(&key, 0, total)? {
            let version: JobVersion = keys::decode(&key, &raw)?;
            if version.version_id == version_id {
                return Ok(Some(version));
            }
        }
        Ok(None)
    }

    /// Write an old snapshot forward as a new version and return it.
    pub fn rollback(&self, job_id: &str, version_id: &str, by: &Provenance) -> Result<JobSpec> {
        let target = self.get_version(job_id, version_id)?.ok_or_else(|| {
            JobClawError::NotFound(format!("version '{version_id}' of job '{job_id}'"))
        })?;
        let restored = self.save(job_id, target.spec, by)?;
        tracing::info!("⏪ Job '{job_id}' rolled back to v{}", short(version_id));
        self.emit(
            names::JOB_ROLLED_BACK,
            json!({ "job_id": job_id, "from_version_id": version_id, "version_id": restored.version_id, "actor": by.actor }),
        );
        Ok(restored.spec)
    }

    pub fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.store.smembers(keys::JOBS_ALL)?)
    }

    pub fn enable(&self, job_id: &str) -> Result<()> {
        if !self.exists(job_id)? {
            return Err(JobClawError::NotFound(format!("job '{job_id}'")));
        }
        self.store.sadd(keys::JOBS_ENABLED, job_id)?;
        tracing::info!("▶️ Job enabled: '{job_id}'");
        Ok(())
    }

    /// Returns whether the job was enabled before.
    pub fn disable(&self, job_id: &str) -> Result<bool> {
        let was = self.store.srem(keys::JOBS_ENABLED, job_id)?;
        if was {
            tracing::info!("⏸️ Job disabled: '{job_id}'");
        }
        Ok(was)
    }

    pub fn is_enabled(&self, job_id: &str) -> Result<bool> {
        Ok(self.store.sismember(keys::JOBS_ENABLED, job_id)?)
    }

    pub fn list_enabled_ids(&self) -> Result<Vec<String>> {
        Ok(self.store.smembers(keys::JOBS_ENABLED)?)
    }

    /// Specs of every enabled job. Unreadable entries are logged and skipped.
    pub fn load_enabled(&self) -> Result<Vec<JobSpec>> {
        let mut specs = Vec::new();
        for job_id in self.list_enabled_ids()? {
            match self.get(&job_id) {
                Ok(Some(spec)) => specs.push(spec),
                Ok(None) => tracing::warn!("⚠️ Enabled job '{job_id}' has no spec"),
                Err(e) => tracing::warn!("⚠️ Skipping job '{job_id}': {e}"),
            }
        }
        Ok(specs)
    }

    fn emit(&self, event_type: &str, data: serde_json::Value) {
        if let Some(events) = &self.events {
            events.emit(event_type, data);
        }
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobclaw_core::types::Inputs;
    use jobclaw_store::MemoryStore;

    fn registry() -> JobRegistry {
        JobRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn by(note: &str) -> Provenance {
        Provenance::new("test", "alice", note)
    }

    struct RequiresChannel;

    impl InputValidator for RequiresChannel {
        fn validate_inputs(&self, _job_type: &str, inputs: &Inputs) -> Result<()> {
            if inputs.contains_key("channel") {
                Ok(())
            } else {
                Err(JobClawError::invalid("missing required input 'channel'"))
            }
        }
    }

    #[test]
    fn test_versions_are_append_only() {
        let reg = registry();
        let v1 = reg.save("j1", JobSpec::new("j1", "t").with_interval(60), &by("first")).unwrap();
        let v2 = reg.save("j1", JobSpec::new("j1", "t").with_interval(120), &by("second")).unwrap();
        assert_eq!(reg.get("j1").unwrap().unwrap().interval_sec(), Some(120));

        let restored = reg.rollback("j1", &v1.version_id, &by("undo")).unwrap();
        assert_eq!(restored.interval_sec(), Some(60));
        assert_eq!(reg.get("j1").unwrap().unwrap().interval_sec(), Some(60));

        let versions = reg.list_versions("j1", 10).unwrap();
        assert_eq!(versions.len(), 3);
        assert_eq!(versions[0].note, "undo");
        assert_eq!(versions[1].version_id, v2.version_id);
        assert_eq!(versions[2].version_id, v1.version_id);
        assert_ne!(versions[0].version_id, v1.version_id);
        assert_eq!(reg.list_versions("j1", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_rollback_unknown_version() {
        let reg = registry();
        reg.save("j1", JobSpec::new("j1", "t"), &by("")).unwrap();
        assert!(matches!(
            reg.rollback("j1", "nope", &by("")),
            Err(JobClawError::NotFound(_))
        ));
        assert_eq!(reg.list_versions("j1", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_specs_rejected() {
        let reg = registry();
        assert!(reg.save("", JobSpec::new("", "t"), &by("")).is_err());
        assert!(reg.save("j", JobSpec::new("j", "t").with_interval(0), &by("")).is_err());
        assert!(reg.save("j", JobSpec::new("j", "t").with_cron("61 * * * *"), &by("")).is_err());
        assert!(reg.save("j", JobSpec::new("other", "t"), &by("")).is_err());
        assert!(reg.save("j", JobSpec::new("j", "t").with_retry(2, vec![]), &by("")).is_err());
        assert!(reg.list_ids().unwrap().is_empty());
    }

    #[test]
    fn test_inputs_checked_against_validator() {
        let reg = registry().with_validator(Arc::new(RequiresChannel));
        let err = reg.save("j", JobSpec::new("j", "monitor"), &by("")).unwrap_err();
        assert!(matches!(err, JobClawError::Validation(_)));

        let mut spec = JobSpec::new("j", "monitor");
        spec.inputs.insert("channel".into(), json!("ops"));
        spec.inputs.insert("extra".into(), json!(true));
        assert!(reg.save("j", spec, &by("")).is_ok());
    }

    #[test]
    fn test_enable_disable() {
        let reg = registry();
        assert!(matches!(reg.enable("ghost"), Err(JobClawError::NotFound(_))));

        reg.save("j1", JobSpec::new("j1", "t"), &by("")).unwrap();
        reg.save("j2", JobSpec::new("j2", "t"), &by("")).unwrap();
        reg.enable("j1").unwrap();
        assert!(reg.is_enabled("j1").unwrap());
        assert!(!reg.is_enabled("j2").unwrap());
        assert_eq!(reg.load_enabled().unwrap().len(), 1);

        assert!(reg.disable("j1").unwrap());
        assert!(!reg.disable("j1").unwrap());
        assert!(reg.list_enabled_ids().unwrap().is_empty());
        assert_eq!(reg.list_ids().unwrap(), vec!["j1", "j2"]);
    }
}
