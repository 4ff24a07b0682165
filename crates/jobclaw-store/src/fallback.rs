//! Automatic fallback from the durable backend to process memory.
//!
//! The first transient failure flips a sticky `degraded` flag and every
//! later operation goes to the in-memory store until an operator calls
//! [`FallbackStore::reset`]. Data written while degraded is not copied back.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use jobclaw_core::error::{StoreError, StoreResult};
use jobclaw_core::traits::{Store, StreamEntry};

use crate::memory::MemoryStore;

#[derive(Debug, Clone)]
struct Degradation {
    since: DateTime<Utc>,
    reason: String,
}

/// Snapshot reported by `health()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreHealth {
    /// Backend currently serving operations.
    pub backend: String,
    pub degraded: bool,
    pub since: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

/// Primary store with a sticky in-memory fallback.
pub struct FallbackStore {
    primary: Option<Arc<dyn Store>>,
    memory: MemoryStore,
    degraded: RwLock<Option<Degradation>>,
}

impl FallbackStore {
    pub fn new(primary: Arc<dyn Store>) -> Self {
        Self {
            primary: Some(primary),
            memory: MemoryStore::new(),
            degraded: RwLock::new(None),
        }
    }

    /// Memory only, on purpose. Never reports degraded.
    pub fn memory_only() -> Self {
        Self {
            primary: None,
            memory: MemoryStore::new(),
            degraded: RwLock::new(None),
        }
    }

    /// The primary could not even be opened; start degraded.
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self {
            primary: None,
            memory: MemoryStore::new(),
            degraded: RwLock::new(Some(Degradation {
                since: Utc::now(),
                reason: reason.into(),
            })),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.read().map(|d| d.is_some()).unwrap_or(true)
    }

    /// Clear the degraded flag if the primary answers a ping.
    pub fn reset(&self) -> bool {
        let Some(primary) = &self.primary else {
            tracing::warn!("⚠️ Store reset requested but no durable backend is attached");
            return false;
        };
        if let Err(e) = primary.ping() {
            tracing::warn!("⚠️ Store '{}' still unreachable: {e}", primary.name());
            return false;
        }
        if let Ok(mut d) = self.degraded.write() {
            if d.take().is_some() {
                tracing::info!("✅ Store '{}' reachable again, leaving fallback", primary.name());
            }
            return true;
        }
        false
    }

    pub fn health(&self) -> StoreHealth {
        let current = self.degraded.read().ok().and_then(|d| d.clone());
        StoreHealth {
            backend: self.name().to_string(),
            degraded: current.is_some(),
            since: current.as_ref().map(|d| d.since),
            reason: current.map(|d| d.reason),
        }
    }

    fn degrade(&self, err: &StoreError) {
        let Ok(mut d) = self.degraded.write() else {
            return;
        };
        if d.is_none() {
            let backend = self.primary.as_ref().map_or("primary", |p| p.name());
            tracing::warn!("⚠️ Store '{backend}' unavailable, switching to in-memory fallback: {err}");
            *d = Some(Degradation {
                since: Utc::now(),
                reason: err.to_string(),
            });
        }
    }

    fn route<T>(&self, op: impl Fn(&dyn Store) -> StoreResult<T>) -> StoreResult<T> {
        if let Some(primary) = &self.primary
            && !self.is_degraded()
        {
            match op(primary.as_ref()) {
                Err(e) if e.is_transient() => self.degrade(&e),
                other => return other,
            }
        }
        op(&self.memory)
    }
}

impl Store for FallbackStore {
    fn name(&self) -> &str {
        match &self.primary {
            Some(primary) if !self.is_degraded() => primary.name(),
            _ => self.memory.name(),
        }
    }

    fn ping(&self) -> StoreResult<()> {
        self.route(|s| s.ping())
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.route(|s| s.get(key))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.route(|s| s.set(key, value))
    }

    fn set_nx(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.route(|s| s.set_nx(key, value))
    }

    fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        self.route(|s| s.set_ex(key, value, ttl_secs))
    }

    fn del(&self, key: &str) -> StoreResult<bool> {
        self.route(|s| s.del(key))
    }

    fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.route(|s| s.sadd(key, member))
    }

    fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.route(|s| s.srem(key, member))
    }

    fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.route(|s| s.smembers(key))
    }

    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.route(|s| s.sismember(key, member))
    }

    fn scard(&self, key: &str) -> StoreResult<usize> {
        self.route(|s| s.scard(key))
    }

    fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.route(|s| s.zadd(key, member, score))
    }

    fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.route(|s| s.zrem(key, member))
    }

    fn zrange_by_score(&self, key: &str, max: f64) -> StoreResult<Vec<(String, f64)>> {
        self.route(|s| s.zrange_by_score(key, max))
    }

    fn zrevrange(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
        self.route(|s| s.zrevrange(key, limit))
    }

    fn zcard(&self, key: &str) -> StoreResult<usize> {
        self.route(|s| s.zcard(key))
    }

    fn lpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        self.route(|s| s.lpush(key, value))
    }

    fn ltrim(&self, key: &str, keep: usize) -> StoreResult<()> {
        self.route(|s| s.ltrim(key, keep))
    }

    fn lrange(&self, key: &str, start: usize, limit: usize) -> StoreResult<Vec<String>> {
        self.route(|s| s.lrange(key, start, limit))
    }

    fn llen(&self, key: &str) -> StoreResult<usize> {
        self.route(|s| s.llen(key))
    }

    fn xadd(&self, stream: &str, payload: &str) -> StoreResult<String> {
        self.route(|s| s.xadd(stream, payload))
    }

    fn xreadgroup(&self, stream: &str, group: &str, consumer: &str, count: usize) -> StoreResult<Vec<StreamEntry>> {
        self.route(|s| s.xreadgroup(stream, group, consumer, count))
    }

    fn xack(&self, stream: &str, group: &str, id: &str) -> StoreResult<bool> {
        self.route(|s| s.xack(stream, group, id))
    }

    fn xlag(&self, stream: &str, group: &str) -> StoreResult<usize> {
        self.route(|s| s.xlag(stream, group))
    }
}
