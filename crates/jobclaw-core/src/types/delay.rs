//! Second offsets from user-supplied config (intervals, backoff, cooldowns).
//!
//! Those are arbitrary `u64`s, so every offset is clamped before it
//! reaches chrono arithmetic.

use chrono::{DateTime, Duration, Utc};

/// Longest offset ever applied: 100 years.
pub const MAX_DELAY_SEC: u64 = 100 * 365 * 86_400;

/// `at + secs`, with `secs` clamped to `MAX_DELAY_SEC`.
pub fn add_seconds(at: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    let secs = secs.min(MAX_DELAY_SEC) as i64;
    Duration::try_seconds(secs)
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
