//! Append-only, size-capped observability log.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use jobclaw_core::error::Result;
use jobclaw_core::traits::Store;
use jobclaw_core::types::ObservabilityEvent;

use crate::keys;

/// Shared handle to the event log. Cheap to clone.
#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn Store>,
    cap: usize,
}

impl EventLog {
    pub fn new(store: Arc<dyn Store>, cap: usize) -> Self {
        Self {
            store,
            cap: cap.max(1),
        }
    }

    /// Append an event; the oldest entries fall off past the cap.
    pub fn append(&self, event_type: &str, data: serde_json::Value) -> Result<ObservabilityEvent> {
        let event = ObservabilityEvent {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            data,
            ts: Utc::now(),
        };
        let len = self
            .store
            .lpush(keys::EVENTS_LOG, &serde_json::to_string(&event)?)?;
        if len > self.cap {
            self.store.ltrim(keys::EVENTS_LOG, self.cap)?;
        }
        tracing::debug!(target: "jobclaw::events", event_type, data = %event.data);
        Ok(event)
    }

    /// Same as [`append`](Self::append), but a store failure only logs.
    pub fn emit(&self, event_type: &str, data: serde_json::Value) {
        if let Err(e) = self.append(event_type, data) {
            tracing::warn!("⚠️ Failed to record event {event_type}: {e}");
        }
    }

    /// Newest first, at most `limit`, only events after `since` when given.
    pub fn recent(&self, limit: usize, since: Option<DateTime<Utc>>) -> Result<Vec<ObservabilityEvent>> {
        let raw = self.store.lrange(keys::EVENTS_LOG, 0, self.cap)?;
        let mut out = Vec::with_capacity(limit.min(raw.len()));
        for entry in raw {
            let event: ObservabilityEvent = match keys::decode(keys::EVENTS_LOG, &entry) {
                Ok(ev) => ev,
                Err(e) => {
                    tracing::warn!("⚠️ Skipping unreadable event log entry: {e}");
                    continue;
                }
            };
            // Newest first: once we pass `since` nothing older qualifies.
            if since.is_some_and(|s| event.ts <= s) {
                break;
            }
            out.push(event);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.store.llen(keys::EVENTS_LOG)?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
