//! LMDB-backed durable store and lock ledger.
//!
//! Uses the heed crate (Rust bindings for LMDB). One environment directory
//! holds two named databases:
//!
//! - `cache`: `key → [flag: 1 byte][expiration: i64 LE][payload]`, where a
//!   zero flag means the entry never expires
//! - `cache_locks`: `key → [expiration: i64 LE][owner: UTF-8]`
//!
//! # Atomicity
//!
//! LMDB allows a single writer at a time. `add` and `acquire_lock` read the
//! existing row and conditionally overwrite it inside one write transaction,
//! so concurrent callers cannot interleave between the check and the write.
//! Commits are synced to disk before they return.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use hypercacheio_core::{expiration_from_ttl, lease_expiration, CacheEntry, Clock, LockLease, StorageError};

use crate::gc::GcPolicy;
use crate::traits::{StorageBackend, StorageResult, StorageStats};

pub const CACHE_TABLE: &str = "cache";
pub const LOCK_TABLE: &str = "cache_locks";

const FLAG_NO_EXPIRY: u8 = 0;
const FLAG_EXPIRES: u8 = 1;
const ENTRY_HEADER_LEN: usize = 9;
const LEASE_HEADER_LEN: usize = 8;

fn txn_err(e: heed::Error) -> StorageError {
    StorageError::TransactionFailed {
        reason: e.to_string(),
    }
}

fn encode_entry(value: &[u8], expiration: Option<i64>) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ENTRY_HEADER_LEN + value.len());
    match expiration {
        Some(exp) => {
            bytes.push(FLAG_EXPIRES);
            bytes.extend_from_slice(&exp.to_le_bytes());
        }
        None => {
            bytes.push(FLAG_NO_EXPIRY);
            bytes.extend_from_slice(&0i64.to_le_bytes());
        }
    }
    bytes.extend_from_slice(value);
    bytes
}

fn decode_expiration(table: &'static str, key: &[u8], bytes: &[u8]) -> StorageResult<i64> {
    let raw: [u8; 8] = bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StorageError::CorruptRow {
            table,
            key: String::from_utf8_lossy(key).into_owned(),
            reason: "truncated expiration".to_string(),
        })?;
    Ok(i64::from_le_bytes(raw))
}

fn decode_entry_expiration(key: &[u8], bytes: &[u8]) -> StorageResult<Option<i64>> {
    match bytes.first() {
        Some(&FLAG_NO_EXPIRY) => Ok(None),
        Some(&FLAG_EXPIRES) => decode_expiration(CACHE_TABLE, key, &bytes[1..]).map(Some),
        _ => Err(StorageError::CorruptRow {
            table: CACHE_TABLE,
            key: String::from_utf8_lossy(key).into_owned(),
            reason: "unknown expiration flag".to_string(),
        }),
    }
}

fn decode_entry(key: &str, bytes: &[u8]) -> StorageResult<CacheEntry> {
    let expiration = decode_entry_expiration(key.as_bytes(), bytes)?;
    let value = bytes
        .get(ENTRY_HEADER_LEN..)
        .ok_or_else(|| StorageError::CorruptRow {
            table: CACHE_TABLE,
            key: key.to_string(),
            reason: "truncated header".to_string(),
        })?
        .to_vec();
    Ok(CacheEntry::new(key, value, expiration))
}

fn encode_lease(owner: &str, expiration: i64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(LEASE_HEADER_LEN + owner.len());
    bytes.extend_from_slice(&expiration.to_le_bytes());
    bytes.extend_from_slice(owner.as_bytes());
    bytes
}

fn decode_lease(key: &str, bytes: &[u8]) -> StorageResult<LockLease> {
    let expiration = decode_expiration(LOCK_TABLE, key.as_bytes(), bytes)?;
    let owner = std::str::from_utf8(&bytes[LEASE_HEADER_LEN..]).map_err(|e| {
        StorageError::CorruptRow {
            table: LOCK_TABLE,
            key: key.to_string(),
            reason: e.to_string(),
        }
    })?;
    Ok(LockLease::new(key, owner, expiration))
}

/// Durable store and lock ledger in a local LMDB environment.
pub struct LmdbStore {
    env: Env,
    cache: Database<Bytes, Bytes>,
    locks: Database<Bytes, Bytes>,
    clock: Arc<dyn Clock>,
    gc: GcPolicy,
    path: PathBuf,
}

impl fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LmdbStore")
            .field("path", &self.path)
            .field("gc", &self.gc)
            .finish()
    }
}

impl LmdbStore {
    /// Open (creating if needed) the store under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Either table cannot be created
    pub fn open<P: AsRef<Path>>(
        path: P,
        map_size_mb: usize,
        clock: Arc<dyn Clock>,
    ) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment directory is owned by this process and is
        // not opened twice.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb.saturating_mul(1024 * 1024))
                .max_dbs(2)
                .open(&path)
        }
        .map_err(|e| StorageError::EnvOpen {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let cache: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(CACHE_TABLE))
            .map_err(|e| StorageError::TableOpen {
                table: CACHE_TABLE,
                reason: e.to_string(),
            })?;
        let locks: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(LOCK_TABLE))
            .map_err(|e| StorageError::TableOpen {
                table: LOCK_TABLE,
                reason: e.to_string(),
            })?;
        wtxn.commit().map_err(txn_err)?;

        tracing::debug!(path = %path.display(), map_size_mb, "Opened durable store");

        Ok(Self {
            env,
            cache,
            locks,
            clock,
            gc: GcPolicy::default(),
            path,
        })
    }

    /// Replace the inline GC policy applied on `put`.
    pub fn with_gc(mut self, gc: GcPolicy) -> Self {
        self.gc = gc;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entry(&self, rtxn: &RoTxn, key: &str) -> StorageResult<Option<CacheEntry>> {
        match self.cache.get(rtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => decode_entry(key, bytes).map(Some),
            None => Ok(None),
        }
    }

    fn read_lease(&self, rtxn: &RoTxn, key: &str) -> StorageResult<Option<LockLease>> {
        match self.locks.get(rtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => decode_lease(key, bytes).map(Some),
            None => Ok(None),
        }
    }

    fn sweep_entries(&self) -> StorageResult<u64> {
        let now = self.clock.now();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let expired: Vec<Vec<u8>> = {
            let mut keys = Vec::new();
            for result in self.cache.iter(&wtxn).map_err(txn_err)? {
                let (key, bytes) = result.map_err(txn_err)?;
                match decode_entry_expiration(key, bytes) {
                    Ok(Some(exp)) if exp < now => keys.push(key.to_vec()),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Skipping unreadable cache row"),
                }
            }
            keys
        };

        let mut deleted = 0u64;
        for key in &expired {
            if self.cache.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;

        if deleted > 0 {
            tracing::debug!(deleted, "Swept expired cache entries");
        }
        Ok(deleted)
    }
}

#[async_trait]
impl StorageBackend for LmdbStore {
    async fn get(&self, key: &str) -> StorageResult<Option<CacheEntry>> {
        let now = self.clock.now();
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self
            .read_entry(&rtxn, key)?
            .filter(|entry| !entry.is_expired(now)))
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<u64>) -> StorageResult<()> {
        let expiration = expiration_from_ttl(self.clock.now(), ttl);

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.cache
            .put(&mut wtxn, key.as_bytes(), &encode_entry(value, expiration))
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        if self.gc.should_sweep() {
            // The write is committed; a failed sweep is retried on a later put.
            if let Err(e) = self.sweep_entries() {
                tracing::warn!(error = %e, "Inline GC sweep failed");
            }
        }
        Ok(())
    }

    async fn add(&self, key: &str, value: &[u8], ttl: Option<u64>) -> StorageResult<bool> {
        let now = self.clock.now();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        if let Some(existing) = self.read_entry(&wtxn, key)? {
            if !existing.is_expired(now) {
                return Ok(false);
            }
        }

        self.cache
            .put(
                &mut wtxn,
                key.as_bytes(),
                &encode_entry(value, expiration_from_ttl(now, ttl)),
            )
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    async fn forget(&self, key: &str) -> StorageResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self
            .cache
            .delete(&mut wtxn, key.as_bytes())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    async fn flush(&self) -> StorageResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.cache.clear(&mut wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        tracing::debug!("Flushed cache table");
        Ok(())
    }

    async fn sweep_expired(&self) -> StorageResult<u64> {
        self.sweep_entries()
    }

    async fn acquire_lock(&self, key: &str, owner: &str, ttl: u64) -> StorageResult<bool> {
        let now = self.clock.now();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        if let Some(existing) = self.read_lease(&wtxn, key)? {
            if existing.is_live(now) {
                return Ok(false);
            }
            tracing::debug!(
                key,
                previous_owner = %existing.owner,
                owner,
                "Stealing expired lease"
            );
        }

        let expiration = lease_expiration(now, ttl);
        self.locks
            .put(&mut wtxn, key.as_bytes(), &encode_lease(owner, expiration))
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    async fn release_lock(&self, key: &str, owner: &str) -> StorageResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        match self.read_lease(&wtxn, key)? {
            Some(lease) if lease.is_owned_by(owner) => {
                let deleted = self
                    .locks
                    .delete(&mut wtxn, key.as_bytes())
                    .map_err(txn_err)?;
                wtxn.commit().map_err(txn_err)?;
                Ok(deleted)
            }
            _ => Ok(false),
        }
    }

    async fn get_lease(&self, key: &str) -> StorageResult<Option<LockLease>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.read_lease(&rtxn, key)
    }

    async fn sweep_expired_leases(&self) -> StorageResult<u64> {
        let now = self.clock.now();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let expired: Vec<Vec<u8>> = {
            let mut keys = Vec::new();
            for result in self.locks.iter(&wtxn).map_err(txn_err)? {
                let (key, bytes) = result.map_err(txn_err)?;
                match decode_expiration(LOCK_TABLE, key, bytes) {
                    Ok(exp) if exp < now => keys.push(key.to_vec()),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Skipping unreadable lease row"),
                }
            }
            keys
        };

        let mut deleted = 0u64;
        for key in &expired {
            if self.locks.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;

        if deleted > 0 {
            tracing::debug!(deleted, "Swept expired leases");
        }
        Ok(deleted)
    }

    async fn stats(&self) -> StorageResult<StorageStats> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(StorageStats {
            entries: self.cache.len(&rtxn).map_err(txn_err)?,
            leases: self.locks.len(&rtxn).map_err(txn_err)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hypercacheio_core::ManualClock;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const T0: i64 = 1_700_000_000;

    fn create_test_store() -> (LmdbStore, Arc<ManualClock>, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let clock = Arc::new(ManualClock::new(T0));
        let store = LmdbStore::open(temp_dir.path(), 10, clock.clone())
            .expect("store creation should succeed")
            .with_gc(GcPolicy::never());
        (store, clock, temp_dir)
    }

    async fn value_of(store: &LmdbStore, key: &str) -> Option<Vec<u8>> {
        store
            .get(key)
            .await
            .expect("get should succeed")
            .map(|entry| entry.value)
    }

    #[tokio::test]
    async fn test_open_creates_files_in_directory() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let dir = temp_dir.path().join("nested").join("hypercacheio");
        let store = LmdbStore::open(&dir, 10, Arc::new(ManualClock::new(T0)))
            .expect("store creation should succeed");
        store.put("test_storage", b"ok", Some(60)).await.expect("put should succeed");
        assert!(dir.join("data.mdb").exists());
        assert_eq!(store.path(), dir.as_path());
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _clock, _temp_dir) = create_test_store();
        store.put("foo", b"bar", Some(60)).await.expect("put should succeed");
        assert_eq!(value_of(&store, "foo").await, Some(b"bar".to_vec()));
        assert_eq!(value_of(&store, "missing").await, None);

        let entry = store
            .get("foo")
            .await
            .expect("get should succeed")
            .expect("entry should exist");
        assert_eq!(entry.expiration, Some(T0 + 60));
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (store, _clock, _temp_dir) = create_test_store();
        store.put("foo", b"one", None).await.expect("put should succeed");
        store.put("foo", b"two", None).await.expect("put should succeed");
        assert_eq!(value_of(&store, "foo").await, Some(b"two".to_vec()));
        assert_eq!(store.stats().await.expect("stats should succeed").entries, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_miss_but_lingers() {
        let (store, clock, _temp_dir) = create_test_store();
        store.put("short", b"v", Some(10)).await.expect("put should succeed");

        clock.advance(10);
        assert!(store.get("short").await.expect("get should succeed").is_some());

        clock.advance(1);
        assert!(store.get("short").await.expect("get should succeed").is_none());
        assert_eq!(store.stats().await.expect("stats should succeed").entries, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let (store, clock, _temp_dir) = create_test_store();
        store.put("k", b"v", Some(0)).await.expect("put should succeed");
        clock.advance(10_000_000);
        assert!(store.get("k").await.expect("get should succeed").is_some());
    }

    #[tokio::test]
    async fn test_add_only_when_absent_or_expired() {
        let (store, clock, _temp_dir) = create_test_store();

        assert!(store.add("foo", b"bar", Some(60)).await.expect("add should succeed"));
        assert!(!store.add("foo", b"baz", Some(60)).await.expect("add should succeed"));
        assert_eq!(value_of(&store, "foo").await, Some(b"bar".to_vec()));

        clock.advance(61);
        assert!(store.add("foo", b"baz", Some(60)).await.expect("add should succeed"));
        assert_eq!(value_of(&store, "foo").await, Some(b"baz".to_vec()));
    }

    #[tokio::test]
    async fn test_forget_and_flush() {
        let (store, _clock, _temp_dir) = create_test_store();
        store.put("a", b"1", None).await.expect("put should succeed");
        store.put("b", b"2", None).await.expect("put should succeed");

        assert!(store.forget("a").await.expect("forget should succeed"));
        assert!(!store.forget("a").await.expect("forget should succeed"));
        assert!(store.get("a").await.expect("get should succeed").is_none());

        store.acquire_lock("job", "w1", 60).await.expect("acquire should succeed");
        store.flush().await.expect("flush should succeed");
        let stats = store.stats().await.expect("stats should succeed");
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.leases, 1, "flush leaves the lock ledger alone");
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_rows() {
        let (store, clock, _temp_dir) = create_test_store();
        store.put("expired", b"x", Some(5)).await.expect("put should succeed");
        store.put("live", b"y", Some(100)).await.expect("put should succeed");
        store.put("forever", b"z", None).await.expect("put should succeed");

        clock.advance(6);
        let deleted = store.sweep_expired().await.expect("sweep should succeed");
        assert_eq!(deleted, 1);

        let stats = store.stats().await.expect("stats should succeed");
        assert_eq!(stats.entries, 2);
        assert!(store.get("live").await.expect("get should succeed").is_some());
        assert!(store.get("forever").await.expect("get should succeed").is_some());
    }

    #[tokio::test]
    async fn test_inline_gc_on_put() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let clock = Arc::new(ManualClock::new(T0));
        let store = LmdbStore::open(temp_dir.path(), 10, clock.clone())
            .expect("store creation should succeed")
            .with_gc(GcPolicy::always());

        store.put("old", b"x", Some(1)).await.expect("put should succeed");
        clock.advance(5);
        store.put("new", b"y", None).await.expect("put should succeed");

        assert_eq!(store.stats().await.expect("stats should succeed").entries, 1);
    }

    #[tokio::test]
    async fn test_lock_acquire_release_steal() {
        let (store, clock, _temp_dir) = create_test_store();

        assert!(store.acquire_lock("job", "owner1", 10).await.expect("acquire"));
        assert!(!store.acquire_lock("job", "owner2", 10).await.expect("acquire"));
        assert_eq!(store.lock_owner("job").await.expect("owner"), "owner1");

        clock.advance(10);
        assert!(
            !store.acquire_lock("job", "owner2", 10).await.expect("acquire"),
            "lease is live until its expiration passes"
        );

        clock.advance(1);
        assert!(store.acquire_lock("job", "owner2", 10).await.expect("acquire"));
        assert_eq!(store.lock_owner("job").await.expect("owner"), "owner2");
    }

    #[tokio::test]
    async fn test_release_requires_matching_owner() {
        let (store, _clock, _temp_dir) = create_test_store();
        store.acquire_lock("job", "owner1", 60).await.expect("acquire");

        assert!(!store.release_lock("job", "intruder").await.expect("release"));
        assert_eq!(store.lock_owner("job").await.expect("owner"), "owner1");

        assert!(store.release_lock("job", "owner1").await.expect("release"));
        assert_eq!(store.lock_owner("job").await.expect("owner"), "");
        assert!(!store.release_lock("job", "owner1").await.expect("release"));
    }

    #[tokio::test]
    async fn test_sweep_expired_leases() {
        let (store, clock, _temp_dir) = create_test_store();
        store.acquire_lock("short", "w1", 5).await.expect("acquire");
        store.acquire_lock("long", "w2", 500).await.expect("acquire");

        clock.advance(6);
        assert_eq!(store.sweep_expired_leases().await.expect("sweep"), 1);
        assert!(store.get_lease("short").await.expect("lease").is_none());
        assert_eq!(
            store.get_lease("long").await.expect("lease"),
            Some(LockLease::new("long", "w2", T0 + 500))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_has_single_winner() {
        let (store, _clock, _temp_dir) = create_test_store();
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .acquire_lock("contended", &format!("worker-{}", i), 60)
                    .await
                    .expect("acquire should succeed")
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("task should join") {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_corrupt_rows_are_reported() {
        let err = decode_entry("k", &[7, 0, 0]).unwrap_err();
        assert!(matches!(err, StorageError::CorruptRow { table: CACHE_TABLE, .. }));

        let err = decode_lease("k", &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, StorageError::CorruptRow { table: LOCK_TABLE, .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_entry_layout_preserves_payload(
            value in proptest::collection::vec(any::<u8>(), 0..256),
            expiration in proptest::option::of(any::<i64>()),
        ) {
            let entry = decode_entry("k", &encode_entry(&value, expiration))
                .expect("decode should succeed");
            prop_assert_eq!(entry.value, value);
            prop_assert_eq!(entry.expiration, expiration);
        }
    }
}
