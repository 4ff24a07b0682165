//! Test store that rejects chosen operations on demand.

use std::collections::HashSet;
use std::sync::Mutex;

use jobclaw_core::error::{StoreError, StoreResult};
use jobclaw_core::traits::{Store, StreamEntry};
use jobclaw_store::MemoryStore;

#[derive(Default)]
pub(crate) struct FailingStore {
    inner: MemoryStore,
    failing: Mutex<HashSet<&'static str>>,
}

impl FailingStore {
    pub(crate) fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub(crate) fn heal(&self, op: &'static str) {
        self.failing.lock().unwrap().remove(op);
    }

    fn gate(&self, op: &str) -> StoreResult<()> {
        if self.failing.lock().unwrap().contains(op) {
            return Err(StoreError::Backend(format!("{op} rejected")));
        }
        Ok(())
    }
}

impl Store for FailingStore {
    fn name(&self) -> &str { "failing" }
    fn ping(&self) -> StoreResult<()> { self.gate("ping") }
    fn get(&self, k: &str) -> StoreResult<Option<String>> { self.gate("get")?; self.inner.get(k) }
    fn set(&self, k: &str, v: &str) -> StoreResult<()> { self.gate("set")?; self.inner.set(k, v) }
    fn set_nx(&self, k: &str, v: &str) -> StoreResult<bool> { self.gate("set_nx")?; self.inner.set_nx(k, v) }
    fn set_ex(&self, k: &str, v: &str, t: u64) -> StoreResult<()> { self.gate("set_ex")?; self.inner.set_ex(k, v, t) }
    fn del(&self, k: &str) -> StoreResult<bool> { self.gate("del")?; self.inner.del(k) }
    fn sadd(&self, k: &str, m: &str) -> StoreResult<bool> { self.gate("sadd")?; self.inner.sadd(k, m) }
    fn srem(&self, k: &str, m: &str) -> StoreResult<bool> { self.gate("srem")?; self.inner.srem(k, m) }
    fn smembers(&self, k: &str) -> StoreResult<Vec<String>> { self.gate("smembers")?; self.inner.smembers(k) }
    fn sismember(&self, k: &str, m: &str) -> StoreResult<bool> { self.gate("sismember")?; self.inner.sismember(k, m) }
    fn scard(&self, k: &str) -> StoreResult<usize> { self.gate("scard")?; self.inner.scard(k) }
    fn zadd(&self, k: &str, m: &str, s: f64) -> StoreResult<()> { self.gate("zadd")?; self.inner.zadd(k, m, s) }
    fn zrem(&self, k: &str, m: &str) -> StoreResult<bool> { self.gate("zrem")?; self.inner.zrem(k, m) }
    fn zrange_by_score(&self, k: &str, max: f64) -> StoreResult<Vec<(String, f64)>> { self.gate("zrange_by_score")?; self.inner.zrange_by_score(k, max) }
    fn zrevrange(&self, k: &str, l: usize) -> StoreResult<Vec<String>> { self.gate("zrevrange")?; self.inner.zrevrange(k, l) }
    fn zcard(&self, k: &str) -> StoreResult<usize> { self.gate("zcard")?; self.inner.zcard(k) }
    fn lpush(&self, k: &str, v: &str) -> StoreResult<usize> { self.gate("lpush")?; self.inner.lpush(k, v) }
    fn ltrim(&self, k: &str, n: usize) -> StoreResult<()> { self.gate("ltrim")?; self.inner.ltrim(k, n) }
    fn lrange(&self, k: &str, s: usize, l: usize) -> StoreResult<Vec<String>> { self.gate("lrange")?; self.inner.lrange(k, s, l) }
    fn llen(&self, k: &str) -> StoreResult<usize> { self.gate("llen")?; self.inner.llen(k) }
    fn xadd(&self, s: &str, p: &str) -> StoreResult<String> { self.gate("xadd")?; self.inner.xadd(s, p) }
    fn xreadgroup(&self, s: &str, g: &str, c: &str, n: usize) -> StoreResult<Vec<StreamEntry>> { self.gate("xreadgroup")?; self.inner.xreadgroup(s, g, c, n) }
    fn xack(&self, s: &str, g: &str, id: &str) -> StoreResult<bool> { self.gate("xack")?; self.inner.xack(s, g, id) }
    fn xlag(&self, s: &str, g: &str) -> StoreResult<usize> { self.gate("xlag")?; self.inner.xlag(s, g) }
}
