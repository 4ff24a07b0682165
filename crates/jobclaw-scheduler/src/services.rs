//! The store-backed components every process role shares.

use std::sync::Arc;

use jobclaw_core::config::JobClawConfig;
use jobclaw_core::traits::{InputValidator, Store};

use crate::approval::ApprovalGate;
use crate::failure::FailureMemory;
use crate::queue::EventQueue;
use crate::registry::JobRegistry;

/// Registry, queue, failure memory and approval gate over one store.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub registry: Arc<JobRegistry>,
    pub queue: Arc<EventQueue>,
    pub failures: Arc<FailureMemory>,
    pub approvals: Arc<ApprovalGate>,
}

impl Services {
    pub fn new(
        store: Arc<dyn Store>,
        config: &JobClawConfig,
        validator: Option<Arc<dyn InputValidator>>,
    ) -> Self {
        let queue = EventQueue::new(store.clone(), &config.queue);
        let events = queue.events().clone();
        let mut registry = JobRegistry::new(store.clone()).with_events(events.clone());
        if let Some(validator) = validator {
            registry = registry.with_validator(validator);
        }
        Self {
            registry: Arc::new(registry),
            failures: Arc::new(FailureMemory::new(store.clone())),
            approvals: Arc::new(ApprovalGate::new(store.clone(), events)),
            queue: Arc::new(queue),
            store,
        }
    }
}
