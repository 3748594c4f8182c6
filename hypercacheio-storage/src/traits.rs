//! Storage backend trait.
//!
//! The durable store and the lock ledger live behind one trait so the role
//! router can hold either a local backend or a remote client without caring
//! which engine is underneath.

use async_trait::async_trait;
use hypercacheio_core::{CacheEntry, LockLease, StorageError};

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Row counts of the two tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Rows in `cache`, including expired rows not yet swept.
    pub entries: u64,
    /// Rows in `cache_locks`, including expired leases not yet swept.
    pub leases: u64,
}

/// Durable store and lock ledger of a primary node.
///
/// Values are opaque bytes. TTLs are in seconds and turned into absolute
/// expirations by the backend's clock. Every error is a storage I/O failure
/// and is fatal to the call that raised it; "missing" and "already held" are
/// ordinary return values.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Live entry for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> StorageResult<Option<CacheEntry>>;

    /// Unconditional upsert. A missing or zero TTL never expires.
    async fn put(&self, key: &str, value: &[u8], ttl: Option<u64>) -> StorageResult<()>;

    /// Insert if absent or expired. Returns `false` without mutating when a
    /// live row exists.
    async fn add(&self, key: &str, value: &[u8], ttl: Option<u64>) -> StorageResult<bool>;

    /// Delete `key`. Returns whether a row existed.
    async fn forget(&self, key: &str) -> StorageResult<bool>;

    /// Delete every cache row. Leases are untouched.
    async fn flush(&self) -> StorageResult<()>;

    /// Delete every cache row whose expiration has passed.
    async fn sweep_expired(&self) -> StorageResult<u64>;

    /// Take the lease on `key` for `ttl` seconds, stealing it if the current
    /// lease is no longer live.
    async fn acquire_lock(&self, key: &str, owner: &str, ttl: u64) -> StorageResult<bool>;

    /// Delete the lease only if `owner` matches. Returns whether a row was
    /// deleted.
    async fn release_lock(&self, key: &str, owner: &str) -> StorageResult<bool>;

    /// Raw lease row for `key`, live or not.
    async fn get_lease(&self, key: &str) -> StorageResult<Option<LockLease>>;

    /// Owner of the lease row for `key`, or an empty string if there is none.
    async fn lock_owner(&self, key: &str) -> StorageResult<String> {
        Ok(self
            .get_lease(key)
            .await?
            .map(|lease| lease.owner)
            .unwrap_or_default())
    }

    /// Delete every lease that is no longer live.
    async fn sweep_expired_leases(&self) -> StorageResult<u64>;

    async fn stats(&self) -> StorageResult<StorageStats>;
}
