//! # JobClaw Store
//!
//! Persistence backends behind the [`Store`](jobclaw_core::Store) trait:
//! SQLite for durability, memory for tests and as the automatic fallback.

pub mod fallback;
pub mod memory;
pub mod sqlite;

pub use fallback::{FallbackStore, StoreHealth};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::path::Path;
use std::sync::Arc;

use jobclaw_core::config::{StoreBackend, StoreConfig};
use jobclaw_core::error::StoreResult;

/// Open the configured backend wrapped in a [`FallbackStore`].
/// An unreachable database starts the store degraded instead of failing.
pub fn open(config: &StoreConfig) -> StoreResult<Arc<FallbackStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("🧠 Using in-memory store (nothing survives restart)");
            Ok(Arc::new(FallbackStore::memory_only()))
        }
        StoreBackend::Sqlite => {
            let path = shellexpand::tilde(&config.path).into_owned();
            match SqliteStore::open(Path::new(&path), config.busy_timeout_ms) {
                Ok(store) => {
                    tracing::info!("💾 Using SQLite store at {path}");
                    Ok(Arc::new(FallbackStore::new(Arc::new(store))))
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!("⚠️ SQLite store at {path} unavailable, starting in fallback mode: {e}");
                    Ok(Arc::new(FallbackStore::unreachable(e.to_string())))
                }
                Err(e) => Err(e),
            }
        }
    }
}
