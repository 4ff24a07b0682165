//! Store trait: the persistence seam every component goes through.
//!
//! The primitive set mirrors a key/value server: plain keys, sets,
//! sorted sets, capped lists and consumer-group streams. Implementations
//! must be safe to share across tasks (`Arc<dyn Store>`).

use crate::error::StoreResult;

/// One entry read from a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: String,
    pub payload: String,
}

/// Durable key/value + set + sorted-set + list + stream backend.
pub trait Store: Send + Sync {
    /// Backend name for logs and health reports.
    fn name(&self) -> &str;

    /// Cheap liveness check.
    fn ping(&self) -> StoreResult<()>;

    // ─── Keys ─────────────────────────────────────────────────

    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    /// Set only if absent. Returns `true` when the value was written.
    fn set_nx(&self, key: &str, value: &str) -> StoreResult<bool>;
    /// Set with a time-to-live; expired keys read as absent.
    fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()>;
    fn del(&self, key: &str) -> StoreResult<bool>;

    // ─── Sets ─────────────────────────────────────────────────

    fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;
    fn srem(&self, key: &str, member: &str) -> StoreResult<bool>;
    /// Members in lexical order.
    fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;
    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;
    fn scard(&self, key: &str) -> StoreResult<usize>;

    // ─── Sorted sets ──────────────────────────────────────────

    /// Insert or update `member` with `score`.
    fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;
    /// Returns `true` only if this call removed the member.
    fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;
    /// Members with score <= `max`, ascending by score.
    fn zrange_by_score(&self, key: &str, max: f64) -> StoreResult<Vec<(String, f64)>>;
    /// Highest-scored members first.
    fn zrevrange(&self, key: &str, limit: usize) -> StoreResult<Vec<String>>;
    fn zcard(&self, key: &str) -> StoreResult<usize>;

    // ─── Lists (newest first) ─────────────────────────────────

    /// Prepend; returns the new length.
    fn lpush(&self, key: &str, value: &str) -> StoreResult<usize>;
    /// Keep only the newest `keep` entries.
    fn ltrim(&self, key: &str, keep: usize) -> StoreResult<()>;
    /// Up to `limit` entries starting at `start` (0 = newest).
    fn lrange(&self, key: &str, start: usize, limit: usize) -> StoreResult<Vec<String>>;
    fn llen(&self, key: &str) -> StoreResult<usize>;

    // ─── Streams ──────────────────────────────────────────────

    /// Append a payload; returns the entry id.
    fn xadd(&self, stream: &str, payload: &str) -> StoreResult<String>;
    /// Claim up to `count` entries not yet delivered to `group`.
    /// Each entry is delivered to exactly one consumer of the group.
    fn xreadgroup(&self, stream: &str, group: &str, consumer: &str, count: usize) -> StoreResult<Vec<StreamEntry>>;
    /// Acknowledge a claimed entry.
    fn xack(&self, stream: &str, group: &str, id: &str) -> StoreResult<bool>;
    /// Entries appended but not yet delivered to `group`.
    fn xlag(&self, stream: &str, group: &str) -> StoreResult<usize>;
}
