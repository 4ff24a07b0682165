//! SQLite-backed durable store.
//! One file, WAL mode, shared safely by the scheduler and every worker
//! process on the host. Stream claims run inside IMMEDIATE transactions.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use jobclaw_core::error::{StoreError, StoreResult};
use jobclaw_core::traits::{Store, StreamEntry};
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};

/// SQLite-backed persistence store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Busy/locked/IO failures mean "backend unreachable"; the rest are real errors.
fn map_err(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull
            | ErrorCode::FileLockingProtocolFailed => StoreError::Unavailable(e.to_string()),
            _ => StoreError::Backend(e.to_string()),
        },
        _ => StoreError::Backend(e.to_string()),
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn parse_id(id: &str) -> StoreResult<i64> {
    id.parse()
        .map_err(|_| StoreError::Backend(format!("invalid stream id '{id}'")))
}

impl SqliteStore {
    /// Open or create the database file.
    pub fn open(path: &Path, busy_timeout_ms: u64) -> StoreResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).map_err(map_err)?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
            .map_err(map_err)?;
        // journal_mode answers with a row, so read it instead of executing.
        let _mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))
            .map_err(map_err)?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        tracing::debug!("💾 SQLite store opened at {}", path.display());
        Ok(store)
    }

    /// Private in-memory database. Used by tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(map_err)?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> StoreResult<()> {
        self.lock()?
            .execute_batch(
                "
            -- Plain keys, optional expiry (unix ms)
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER
            );

            CREATE TABLE IF NOT EXISTS sets (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (key, member)
            );

            CREATE TABLE IF NOT EXISTS zsets (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                score REAL NOT NULL,
                PRIMARY KEY (key, member)
            );
            CREATE INDEX IF NOT EXISTS idx_zsets_score ON zsets(key, score);

            -- Newest entry = highest id
            CREATE TABLE IF NOT EXISTS lists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_lists_key ON lists(key, id);

            CREATE TABLE IF NOT EXISTS stream_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stream TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_stream_entries ON stream_entries(stream, id);

            -- Consumer-group cursors
            CREATE TABLE IF NOT EXISTS stream_groups (
                stream TEXT NOT NULL,
                grp TEXT NOT NULL,
                last_id INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (stream, grp)
            );

            -- Claimed but not yet acknowledged
            CREATE TABLE IF NOT EXISTS stream_pending (
                stream TEXT NOT NULL,
                grp TEXT NOT NULL,
                id INTEGER NOT NULL,
                consumer TEXT NOT NULL,
                claimed_at INTEGER NOT NULL,
                PRIMARY KEY (stream, grp, id)
            );
         ",
            )
            .map_err(map_err)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite connection lock poisoned".into()))
    }
}

impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn ping(&self) -> StoreResult<()> {
        self.lock()?
            .query_row("SELECT 1", [], |r| r.get::<_, i64>(0))
            .map(|_| ())
            .map_err(map_err)
    }

    // ─── Keys ─────────────────────────────────────────────────

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.lock()?
            .query_row(
                "SELECT value FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, now_ms()],
                |r| r.get(0),
            )
            .optional()
            .map_err(map_err)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO kv (key, value, expires_at) VALUES (?1, ?2, NULL)",
                params![key, value],
            )
            .map(|_| ())
            .map_err(map_err)
    }

    fn set_nx(&self, key: &str, value: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        // Expired rows do not count as present.
        conn.execute(
            "DELETE FROM kv WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
            params![key, now_ms()],
        )
        .map_err(map_err)?;
        let n = conn
            .execute(
                "INSERT OR IGNORE INTO kv (key, value, expires_at) VALUES (?1, ?2, NULL)",
                params![key, value],
            )
            .map_err(map_err)?;
        Ok(n == 1)
    }

    fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        let expires = now_ms() + (ttl_secs as i64) * 1000;
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)",
                params![key, value, expires],
            )
            .map(|_| ())
            .map_err(map_err)
    }

    fn del(&self, key: &str) -> StoreResult<bool> {
        self.lock()?
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map(|n| n > 0)
            .map_err(map_err)
    }

    // ─── Sets ─────────────────────────────────────────────────

    fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.lock()?
            .execute(
                "INSERT OR IGNORE INTO sets (key, member) VALUES (?1, ?2)",
                params![key, member],
            )
            .map(|n| n > 0)
            .map_err(map_err)
    }

    fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.lock()?
            .execute(
                "DELETE FROM sets WHERE key = ?1 AND member = ?2",
                params![key, member],
            )
            .map(|n| n > 0)
            .map_err(map_err)
    }

    fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT member FROM sets WHERE key = ?1 ORDER BY member")
            .map_err(map_err)?;
        let rows = stmt
            .query_map(params![key], |r| r.get(0))
            .map_err(map_err)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(map_err)
    }

    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.lock()?
            .query_row(
                "SELECT 1 FROM sets WHERE key = ?1 AND member = ?2",
                params![key, member],
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map(|r| r.is_some())
            .map_err(map_err)
    }

    fn scard(&self, key: &str) -> StoreResult<usize> {
        self.lock()?
            .query_row("SELECT COUNT(*) FROM sets WHERE key = ?1", params![key], |r| {
                r.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(map_err)
    }

    // ─── Sorted sets ──────────────────────────────────────────

    fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.lock()?
            .execute(
                "INSERT INTO zsets (key, member, score) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key, member) DO UPDATE SET score = excluded.score",
                params![key, member, score],
            )
            .map(|_| ())
            .map_err(map_err)
    }

    fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.lock()?
            .execute(
                "DELETE FROM zsets WHERE key = ?1 AND member = ?2",
                params![key, member],
            )
            .map(|n| n > 0)
            .map_err(map_err)
    }

    fn zrange_by_score(&self, key: &str, max: f64) -> StoreResult<Vec<(String, f64)>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT member, score FROM zsets WHERE key = ?1 AND score <= ?2
                 ORDER BY score ASC, member ASC",
            )
            .map_err(map_err)?;
        let rows = stmt
            .query_map(params![key, max], |r| Ok((r.get(0)?, r.get(1)?)))
            .map_err(map_err)?;
        rows.collect::<Result<Vec<(String, f64)>, _>>()
            .map_err(map_err)
    }

    fn zrevrange(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT member FROM zsets WHERE key = ?1
                 ORDER BY score DESC, member DESC LIMIT ?2",
            )
            .map_err(map_err)?;
        let rows = stmt
            .query_map(params![key, limit as i64], |r| r.get(0))
            .map_err(map_err)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(map_err)
    }

    fn zcard(&self, key: &str) -> StoreResult<usize> {
        self.lock()?
            .query_row("SELECT COUNT(*) FROM zsets WHERE key = ?1", params![key], |r| {
                r.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(map_err)
    }

    // ─── Lists ────────────────────────────────────────────────

    fn lpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO lists (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(map_err)?;
        conn.query_row("SELECT COUNT(*) FROM lists WHERE key = ?1", params![key], |r| {
            r.get::<_, i64>(0)
        })
        .map(|n| n as usize)
        .map_err(map_err)
    }

    fn ltrim(&self, key: &str, keep: usize) -> StoreResult<()> {
        self.lock()?
            .execute(
                "DELETE FROM lists WHERE key = ?1 AND id NOT IN (
                    SELECT id FROM lists WHERE key = ?1 ORDER BY id DESC LIMIT ?2
                 )",
                params![key, keep as i64],
            )
            .map(|_| ())
            .map_err(map_err)
    }

    fn lrange(&self, key: &str, start: usize, limit: usize) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT value FROM lists WHERE key = ?1 ORDER BY id DESC LIMIT ?2 OFFSET ?3")
            .map_err(map_err)?;
        let rows = stmt
            .query_map(params![key, limit as i64, start as i64], |r| r.get(0))
            .map_err(map_err)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(map_err)
    }

    fn llen(&self, key: &str) -> StoreResult<usize> {
        self.lock()?
            .query_row("SELECT COUNT(*) FROM lists WHERE key = ?1", params![key], |r| {
                r.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(map_err)
    }

    // ─── Streams ──────────────────────────────────────────────

    fn xadd(&self, stream: &str, payload: &str) -> StoreResult<String> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO stream_entries (stream, payload, created_at) VALUES (?1, ?2, ?3)",
            params![stream, payload, now_ms()],
        )
        .map_err(map_err)?;
        Ok(conn.last_insert_rowid().to_string())
    }

    fn xreadgroup(&self, stream: &str, group: &str, consumer: &str, count: usize) -> StoreResult<Vec<StreamEntry>> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_err)?;
        tx.execute(
            "INSERT OR IGNORE INTO stream_groups (stream, grp, last_id) VALUES (?1, ?2, 0)",
            params![stream, group],
        )
        .map_err(map_err)?;
        let last: i64 = tx
            .query_row(
                "SELECT last_id FROM stream_groups WHERE stream = ?1 AND grp = ?2",
                params![stream, group],
                |r| r.get(0),
            )
            .map_err(map_err)?;
        let claimed: Vec<(i64, String)> = {
            let mut stmt = tx
                .prepare(
                    "SELECT id, payload FROM stream_entries
                     WHERE stream = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3",
                )
                .map_err(map_err)?;
            let rows = stmt
                .query_map(params![stream, last, count as i64], |r| Ok((r.get(0)?, r.get(1)?)))
                .map_err(map_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(map_err)?
        };
        if let Some((max_id, _)) = claimed.last() {
            tx.execute(
                "UPDATE stream_groups SET last_id = ?3 WHERE stream = ?1 AND grp = ?2",
                params![stream, group, max_id],
            )
            .map_err(map_err)?;
            let claimed_at = now_ms();
            for (id, _) in &claimed {
                tx.execute(
                    "INSERT OR REPLACE INTO stream_pending (stream, grp, id, consumer, claimed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![stream, group, id, consumer, claimed_at],
                )
                .map_err(map_err)?;
            }
        }
        tx.commit().map_err(map_err)?;
        Ok(claimed
            .into_iter()
            .map(|(id, payload)| StreamEntry { id: id.to_string(), payload })
            .collect())
    }

    fn xack(&self, stream: &str, group: &str, id: &str) -> StoreResult<bool> {
        let id = parse_id(id)?;
        let conn = self.lock()?;
        let n = conn
            .execute(
                "DELETE FROM stream_pending WHERE stream = ?1 AND grp = ?2 AND id = ?3",
                params![stream, group, id],
            )
            .map_err(map_err)?;
        if n > 0 {
            // Entry is garbage once every group is past it and nobody holds it.
            conn.execute(
                "DELETE FROM stream_entries WHERE stream = ?1 AND id = ?2
                 AND ?2 <= (SELECT MIN(last_id) FROM stream_groups WHERE stream = ?1)
                 AND NOT EXISTS (SELECT 1 FROM stream_pending WHERE stream = ?1 AND id = ?2)",
                params![stream, id],
            )
            .map_err(map_err)?;
        }
        Ok(n > 0)
    }

    fn xlag(&self, stream: &str, group: &str) -> StoreResult<usize> {
        self.lock()?
            .query_row(
                "SELECT COUNT(*) FROM stream_entries WHERE stream = ?1 AND id > COALESCE(
                    (SELECT last_id FROM stream_groups WHERE stream = ?1 AND grp = ?2), 0)",
                params![stream, group],
                |r| r.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(map_err)
    }
}
