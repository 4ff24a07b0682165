//! In-memory store: same shapes as the durable backend, single process only.
//! Used as the fallback when the backend is unreachable, and in tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use jobclaw_core::error::{StoreError, StoreResult};
use jobclaw_core::traits::{Store, StreamEntry};

#[derive(Default)]
struct Inner {
    kv: HashMap<String, (String, Option<Instant>)>,
    sets: HashMap<String, BTreeSet<String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    lists: HashMap<String, VecDeque<String>>,
    streams: HashMap<String, MemStream>,
}

#[derive(Default)]
struct MemStream {
    entries: BTreeMap<u64, String>,
    next_id: u64,
    groups: HashMap<String, MemGroup>,
}

#[derive(Default)]
struct MemGroup {
    last_delivered: u64,
    /// id -> consumer
    pending: HashMap<u64, String>,
}

impl MemStream {
    /// Drop entries every group has moved past and nobody holds.
    fn compact(&mut self) {
        let Some(floor) = self.groups.values().map(|g| g.last_delivered).min() else {
            return;
        };
        let held: BTreeSet<u64> = self
            .groups
            .values()
            .flat_map(|g| g.pending.keys().copied())
            .collect();
        self.entries.retain(|id, _| *id > floor || held.contains(id));
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }
}

fn parse_id(id: &str) -> StoreResult<u64> {
    id.parse()
        .map_err(|_| StoreError::Backend(format!("invalid stream id '{id}'")))
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut inner = self.lock()?;
        let expired = matches!(inner.kv.get(key), Some((_, Some(exp))) if *exp <= Instant::now());
        if expired {
            inner.kv.remove(key);
            return Ok(None);
        }
        Ok(inner.kv.get(key).map(|(v, _)| v.clone()))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.lock()?.kv.insert(key.to_string(), (value.to_string(), None));
        Ok(())
    }

    fn set_nx(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        let live = match inner.kv.get(key) {
            Some((_, Some(exp))) => *exp > Instant::now(),
            Some((_, None)) => true,
            None => false,
        };
        if live {
            return Ok(false);
        }
        inner.kv.insert(key.to_string(), (value.to_string(), None));
        Ok(true)
    }

    fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        let exp = Instant::now() + Duration::from_secs(ttl_secs);
        self.lock()?.kv.insert(key.to_string(), (value.to_string(), Some(exp)));
        Ok(())
    }

    fn del(&self, key: &str) -> StoreResult<bool> {
        Ok(self.lock()?.kv.remove(key).is_some())
    }

    fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .lock()?
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        Ok(inner.sets.get_mut(key).is_some_and(|s| s.remove(member)))
    }

    fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .lock()?
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self.lock()?.sets.get(key).is_some_and(|s| s.contains(member)))
    }

    fn scard(&self, key: &str) -> StoreResult<usize> {
        Ok(self.lock()?.sets.get(key).map_or(0, |s| s.len()))
    }

    fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.lock()?
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        Ok(inner
            .zsets
            .get_mut(key)
            .is_some_and(|z| z.remove(member).is_some()))
    }

    fn zrange_by_score(&self, key: &str, max: f64) -> StoreResult<Vec<(String, f64)>> {
        let inner = self.lock()?;
        let mut out: Vec<(String, f64)> = inner
            .zsets
            .get(key)
            .map(|z| {
                z.iter()
                    .filter(|(_, s)| **s <= max)
                    .map(|(m, s)| (m.clone(), *s))
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(out)
    }

    fn zrevrange(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
        let inner = self.lock()?;
        let mut all: Vec<(&String, &f64)> = match inner.zsets.get(key) {
            Some(z) => z.iter().collect(),
            None => return Ok(Vec::new()),
        };
        all.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| b.0.cmp(a.0)));
        Ok(all.into_iter().take(limit).map(|(m, _)| m.clone()).collect())
    }

    fn zcard(&self, key: &str) -> StoreResult<usize> {
        Ok(self.lock()?.zsets.get(key).map_or(0, |z| z.len()))
    }

    fn lpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        let mut inner = self.lock()?;
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        Ok(list.len())
    }

    fn ltrim(&self, key: &str, keep: usize) -> StoreResult<()> {
        if let Some(list) = self.lock()?.lists.get_mut(key) {
            list.truncate(keep);
        }
        Ok(())
    }

    fn lrange(&self, key: &str, start: usize, limit: usize) -> StoreResult<Vec<String>> {
        Ok(self
            .lock()?
            .lists
            .get(key)
            .map(|l| l.iter().skip(start).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn llen(&self, key: &str) -> StoreResult<usize> {
        Ok(self.lock()?.lists.get(key).map_or(0, |l| l.len()))
    }

    fn xadd(&self, stream: &str, payload: &str) -> StoreResult<String> {
        let mut inner = self.lock()?;
        let s = inner.streams.entry(stream.to_string()).or_default();
        s.next_id += 1;
        let id = s.next_id;
        s.entries.insert(id, payload.to_string());
        Ok(id.to_string())
    }

    fn xreadgroup(&self, stream: &str, group: &str, consumer: &str, count: usize) -> StoreResult<Vec<StreamEntry>> {
        let mut inner = self.lock()?;
        let s = inner.streams.entry(stream.to_string()).or_default();
        let last = s.groups.get(group).map_or(0, |g| g.last_delivered);
        let claimed: Vec<(u64, String)> = s
            .entries
            .range(last + 1..)
            .take(count)
            .map(|(id, p)| (*id, p.clone()))
            .collect();
        let g = s.groups.entry(group.to_string()).or_default();
        for (id, _) in &claimed {
            g.pending.insert(*id, consumer.to_string());
            g.last_delivered = g.last_delivered.max(*id);
        }
        Ok(claimed
            .into_iter()
            .map(|(id, payload)| StreamEntry { id: id.to_string(), payload })
            .collect())
    }

    fn xack(&self, stream: &str, group: &str, id: &str) -> StoreResult<bool> {
        let id = parse_id(id)?;
        let mut inner = self.lock()?;
        let Some(s) = inner.streams.get_mut(stream) else {
            return Ok(false);
        };
        let acked = s
            .groups
            .get_mut(group)
            .is_some_and(|g| g.pending.remove(&id).is_some());
        if acked {
            s.compact();
        }
        Ok(acked)
    }

    fn xlag(&self, stream: &str, group: &str) -> StoreResult<usize> {
        let inner = self.lock()?;
        let Some(s) = inner.streams.get(stream) else {
            return Ok(0);
        };
        let last = s.groups.get(group).map_or(0, |g| g.last_delivered);
        Ok(s.entries.range(last + 1..).count())
    }
}
