//! Cache entry and lock lease records.
//!
//! # Lease lifecycle
//!
//! ```text
//! Unheld ── acquire ──→ Held(owner, expiration) ── release(owner) ──→ Unheld
//!                              │
//!              expiration < now, acquire by anyone
//!                              ↓
//!                       Held(new owner)
//! ```

use serde::{Deserialize, Serialize};

/// Absolute expiration in epoch seconds for a TTL given in seconds.
///
/// A missing or zero TTL means the entry never expires. TTLs beyond
/// `i64::MAX` clamp to the far future.
pub fn expiration_from_ttl(now: i64, ttl: Option<u64>) -> Option<i64> {
    match ttl {
        Some(secs) if secs > 0 => Some(lease_expiration(now, secs)),
        _ => None,
    }
}

/// Lease expiration for a literal TTL; 0 lapses after the current second.
pub fn lease_expiration(now: i64, ttl: u64) -> i64 {
    now.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX))
}

/// One row of the `cache` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Opaque serialized payload.
    pub value: Vec<u8>,
    /// Absolute expiration in epoch seconds; `None` never expires.
    pub expiration: Option<i64>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: Vec<u8>, expiration: Option<i64>) -> Self {
        Self {
            key: key.into(),
            value,
            expiration,
        }
    }

    /// Expired rows are treated as absent but may linger until swept.
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expiration, Some(exp) if exp < now)
    }
}

/// One row of the `cache_locks` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    pub key: String,
    /// Opaque token identifying the holder.
    pub owner: String,
    /// Absolute expiration in epoch seconds.
    pub expiration: i64,
}

impl LockLease {
    pub fn new(key: impl Into<String>, owner: impl Into<String>, expiration: i64) -> Self {
        Self {
            key: key.into(),
            owner: owner.into(),
            expiration,
        }
    }

    /// A lease is live until its expiration has passed.
    pub fn is_live(&self, now: i64) -> bool {
        self.expiration >= now
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner == owner
    }
}
