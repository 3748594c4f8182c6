//! Cache store facade.
//!
//! Every operation consults L1 first and is then routed to the local durable
//! store or over RPC. Reads, `add` and every lock operation always wait for
//! the peer because their caller needs the outcome; `put`, `forget` and
//! `flush` follow the configured async flag when delegated.

use std::sync::Arc;

use hypercacheio_core::{
    expiration_from_ttl, Clock, HypercacheResult, NodeConfig, SystemClock, ValueError,
};
use hypercacheio_storage::{FrontCache, StorageStats};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::lock::CacheLock;
use crate::replication::Dispatch;
use crate::router::Executor;
use crate::wire::{
    ttl_to_wire, AcquireRequest, AcquireResponse, AddResponse, GetResponse, OwnerResponse,
    ReleaseRequest, ReleaseResponse, WriteRequest,
};

/// Rows removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub entries: u64,
    pub leases: u64,
}

struct StoreInner {
    executor: Executor,
    l1: FrontCache<Value>,
    clock: Arc<dyn Clock>,
    write_mode: Dispatch,
}

/// Role-routed cache and lock store of one node.
///
/// Cheap to clone; clones share L1 and the executor. The key prefix belongs
/// to each handle.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
    prefix: String,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("executor", &self.inner.executor)
            .field("write_mode", &self.inner.write_mode)
            .field("prefix", &self.prefix)
            .finish()
    }
}

fn encode(value: &Value) -> Result<Vec<u8>, ValueError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode(bytes: &[u8]) -> Result<Value, ValueError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn parse<T: DeserializeOwned>(body: Option<Value>) -> Option<T> {
    body.and_then(|body| serde_json::from_value(body).ok())
}

fn as_integer(key: &str, value: &Value) -> Result<i64, ValueError> {
    let not_numeric = || ValueError::NotNumeric {
        key: key.to_string(),
    };
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(not_numeric),
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| not_numeric()),
        _ => Err(not_numeric()),
    }
}

impl CacheStore {
    pub fn new(
        executor: Executor,
        clock: Arc<dyn Clock>,
        async_requests: bool,
        prefix: impl Into<String>,
    ) -> Self {
        let write_mode = if async_requests {
            Dispatch::Async
        } else {
            Dispatch::Sync
        };
        Self {
            inner: Arc::new(StoreInner {
                executor,
                l1: FrontCache::new(),
                clock,
                write_mode,
            }),
            prefix: prefix.into(),
        }
    }

    /// Build the store `config` describes, on the given clock.
    pub fn from_config(config: &NodeConfig, clock: Arc<dyn Clock>) -> HypercacheResult<Self> {
        let executor = Executor::from_config(config, clock.clone())?;
        Ok(Self::new(
            executor,
            clock,
            config.async_requests,
            config.prefix.clone(),
        ))
    }

    /// Build the store `config` describes, on the wall clock.
    pub fn connect(config: &NodeConfig) -> HypercacheResult<Self> {
        Self::from_config(config, Arc::new(SystemClock))
    }

    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    /// `null` reads as a miss, so it never occupies an L1 slot.
    fn remember(&self, key: &str, value: &Value, expiration: Option<i64>) {
        if value.is_null() {
            self.inner.l1.remove(key);
        } else {
            self.inner.l1.insert(key, value.clone(), expiration);
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    // ========================================================================
    // CACHE
    // ========================================================================

    pub async fn get(&self, key: &str) -> HypercacheResult<Option<Value>> {
        Ok(self.get_entry(key).await?.map(|(value, _)| value))
    }

    /// Live value for `key` with its absolute expiration, if any.
    pub async fn get_entry(&self, key: &str) -> HypercacheResult<Option<(Value, Option<i64>)>> {
        let key = self.full_key(key);
        let now = self.inner.clock.now();
        if let Some(hit) = self.inner.l1.get_entry(&key, now) {
            return Ok(Some(hit));
        }

        let (value, expiration) = match &self.inner.executor {
            Executor::Local(backend) => match backend.get(&key).await? {
                Some(entry) => (Some(decode(&entry.value)?), entry.expiration),
                None => (None, None),
            },
            Executor::Remote(client) => {
                let body = client.send_sync(Method::GET, &["cache", key.as_str()], None).await;
                match parse::<GetResponse>(body) {
                    Some(response) => (response.data, response.expiration),
                    None => (None, None),
                }
            }
        };

        match value {
            Some(Value::Null) | None => Ok(None),
            Some(_) if expiration.is_some_and(|exp| exp < now) => Ok(None),
            Some(value) => {
                self.inner.l1.insert(key, value.clone(), expiration);
                Ok(Some((value, expiration)))
            }
        }
    }

    /// Values for `keys`, in order, paired with the unprefixed key.
    pub async fn many(&self, keys: &[&str]) -> HypercacheResult<Vec<(String, Option<Value>)>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push((key.to_string(), self.get(key).await?));
        }
        Ok(results)
    }

    /// Unconditional write. A missing or zero TTL never expires.
    ///
    /// Delegated writes report success whether or not the peer was reached.
    pub async fn put(&self, key: &str, value: Value, ttl: Option<u64>) -> HypercacheResult<bool> {
        let key = self.full_key(key);
        let expiration = expiration_from_ttl(self.inner.clock.now(), ttl);
        self.remember(&key, &value, expiration);

        match &self.inner.executor {
            Executor::Local(backend) => {
                backend.put(&key, &encode(&value)?, ttl).await?;
            }
            Executor::Remote(client) => {
                let body = WriteRequest {
                    value,
                    ttl: ttl_to_wire(ttl),
                };
                client
                    .dispatch(
                        self.inner.write_mode,
                        Method::POST,
                        &["cache", key.as_str()],
                        Some(serde_json::to_value(body).map_err(ValueError::from)?),
                    )
                    .await;
            }
        }
        Ok(true)
    }

    pub async fn put_many<I, K>(&self, values: I, ttl: Option<u64>) -> HypercacheResult<bool>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        for (key, value) in values {
            self.put(key.as_ref(), value, ttl).await?;
        }
        Ok(true)
    }

    pub async fn forever(&self, key: &str, value: Value) -> HypercacheResult<bool> {
        self.put(key, value, None).await
    }

    /// Insert only if no live entry exists. Always waits for the outcome.
    pub async fn add(&self, key: &str, value: Value, ttl: Option<u64>) -> HypercacheResult<bool> {
        let key = self.full_key(key);
        let now = self.inner.clock.now();

        let added = match &self.inner.executor {
            Executor::Local(backend) => backend.add(&key, &encode(&value)?, ttl).await?,
            Executor::Remote(client) => {
                let body = WriteRequest {
                    value: value.clone(),
                    ttl: ttl_to_wire(ttl),
                };
                let response = client
                    .send_sync(
                        Method::POST,
                        &["add", key.as_str()],
                        Some(serde_json::to_value(body).map_err(ValueError::from)?),
                    )
                    .await;
                parse::<AddResponse>(response).is_some_and(|r| r.added)
            }
        };

        if added {
            self.remember(&key, &value, expiration_from_ttl(now, ttl));
        }
        Ok(added)
    }

    /// Read-modify-write of an integer value; absent reads as 0. Not atomic:
    /// concurrent increments of one key can lose updates.
    pub async fn increment(&self, key: &str, by: i64) -> HypercacheResult<i64> {
        let current = match self.get(key).await? {
            Some(value) => as_integer(&self.full_key(key), &value)?,
            None => 0,
        };
        let next = current
            .checked_add(by)
            .ok_or_else(|| ValueError::Overflow {
                key: self.full_key(key),
            })?;
        self.put(key, Value::from(next), None).await?;
        Ok(next)
    }

    pub async fn decrement(&self, key: &str, by: i64) -> HypercacheResult<i64> {
        let by = by.checked_neg().ok_or_else(|| ValueError::Overflow {
            key: self.full_key(key),
        })?;
        self.increment(key, by).await
    }

    pub async fn forget(&self, key: &str) -> HypercacheResult<bool> {
        let key = self.full_key(key);
        self.inner.l1.remove(&key);

        match &self.inner.executor {
            Executor::Local(backend) => {
                backend.forget(&key).await?;
            }
            Executor::Remote(client) => {
                client
                    .dispatch(self.inner.write_mode, Method::DELETE, &["cache", key.as_str()], None)
                    .await;
            }
        }
        Ok(true)
    }

    /// Drop every cache entry, regardless of prefix. Leases are untouched.
    pub async fn flush(&self) -> HypercacheResult<bool> {
        self.inner.l1.clear();

        match &self.inner.executor {
            Executor::Local(backend) => backend.flush().await?,
            Executor::Remote(client) => {
                client
                    .dispatch(self.inner.write_mode, Method::DELETE, &["cache"], None)
                    .await;
            }
        }
        Ok(true)
    }

    // ========================================================================
    // LOCKS
    // ========================================================================

    pub async fn acquire_lock(&self, key: &str, owner: &str, ttl: u64) -> HypercacheResult<bool> {
        let key = self.full_key(key);
        match &self.inner.executor {
            Executor::Local(backend) => Ok(backend.acquire_lock(&key, owner, ttl).await?),
            Executor::Remote(client) => {
                let body = AcquireRequest {
                    owner: owner.to_string(),
                    ttl: ttl_to_wire(Some(ttl)),
                };
                let response = client
                    .send_sync(
                        Method::POST,
                        &["lock", key.as_str()],
                        Some(serde_json::to_value(body).map_err(ValueError::from)?),
                    )
                    .await;
                Ok(parse::<AcquireResponse>(response).is_some_and(|r| r.acquired))
            }
        }
    }

    pub async fn release_lock(&self, key: &str, owner: &str) -> HypercacheResult<bool> {
        let key = self.full_key(key);
        match &self.inner.executor {
            Executor::Local(backend) => Ok(backend.release_lock(&key, owner).await?),
            Executor::Remote(client) => {
                let body = ReleaseRequest {
                    owner: owner.to_string(),
                };
                let response = client
                    .send_sync(
                        Method::DELETE,
                        &["lock", key.as_str()],
                        Some(serde_json::to_value(body).map_err(ValueError::from)?),
                    )
                    .await;
                Ok(parse::<ReleaseResponse>(response).is_some_and(|r| r.released))
            }
        }
    }

    /// Current lease owner, or an empty string if there is none or the peer
    /// cannot be reached.
    pub async fn lock_owner(&self, key: &str) -> HypercacheResult<String> {
        let key = self.full_key(key);
        match &self.inner.executor {
            Executor::Local(backend) => Ok(backend.lock_owner(&key).await?),
            Executor::Remote(client) => {
                let response = client.send_sync(Method::GET, &["lock", key.as_str()], None).await;
                Ok(parse::<OwnerResponse>(response)
                    .map(|r| r.owner)
                    .unwrap_or_default())
            }
        }
    }

    /// Lock handle for `name`. A random owner token is generated when none is
    /// given.
    pub fn lock(&self, name: &str, seconds: u64, owner: Option<String>) -> CacheLock {
        CacheLock::new(self.clone(), name, seconds, owner)
    }

    /// Handle for a lock already held by `owner`.
    pub fn restore_lock(&self, name: &str, owner: impl Into<String>) -> CacheLock {
        CacheLock::new(self.clone(), name, 0, Some(owner.into()))
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Remove expired entries and leases from the local store. Delegating
    /// nodes have nothing to sweep.
    pub async fn sweep(&self) -> HypercacheResult<SweepReport> {
        match &self.inner.executor {
            Executor::Local(backend) => Ok(SweepReport {
                entries: backend.sweep_expired().await?,
                leases: backend.sweep_expired_leases().await?,
            }),
            Executor::Remote(_) => Ok(SweepReport::default()),
        }
    }

    /// Row counts of the local store, if this node owns one.
    pub async fn stats(&self) -> HypercacheResult<Option<StorageStats>> {
        match &self.inner.executor {
            Executor::Local(backend) => Ok(Some(backend.stats().await?)),
            Executor::Remote(_) => Ok(None),
        }
    }

    /// Number of entries currently held in L1.
    pub fn l1_len(&self) -> usize {
        self.inner.l1.len()
    }

    /// Wait for every pending async RPC. Must be called before exit.
    pub async fn shutdown(&self) -> usize {
        match &self.inner.executor {
            Executor::Remote(client) => client.drain().await,
            Executor::Local(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hypercacheio_core::{HypercacheError, ManualClock};
    use hypercacheio_storage::{GcPolicy, LmdbStore};
    use serde_json::json;
    use tempfile::TempDir;

    const T0: i64 = 1_700_000_000;

    fn primary() -> (CacheStore, Arc<ManualClock>, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let clock = Arc::new(ManualClock::new(T0));
        let backend = LmdbStore::open(temp_dir.path(), 10, clock.clone())
            .expect("store creation should succeed")
            .with_gc(GcPolicy::never());
        let store = CacheStore::new(Executor::Local(Arc::new(backend)), clock.clone(), true, "");
        (store, clock, temp_dir)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (store, _clock, _temp_dir) = primary();
        assert!(store.put("foo", json!("bar"), Some(60)).await.expect("put"));
        assert_eq!(store.get("foo").await.expect("get"), Some(json!("bar")));
        assert_eq!(store.get("missing").await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_get_falls_through_to_storage_and_fills_l1() {
        let (store, _clock, _temp_dir) = primary();
        let backend = store.executor().backend().expect("primary").clone();
        backend
            .put("direct", br#"{"n":1}"#, None)
            .await
            .expect("put should succeed");

        assert_eq!(store.l1_len(), 0);
        assert_eq!(store.get("direct").await.expect("get"), Some(json!({"n": 1})));
        assert_eq!(store.l1_len(), 1);
    }

    #[tokio::test]
    async fn test_null_reads_as_miss_with_or_without_l1() {
        let (store, _clock, _temp_dir) = primary();
        store.put("n", json!("old"), None).await.expect("put");
        assert!(store.put("n", Value::Null, None).await.expect("put"));

        assert_eq!(store.l1_len(), 0);
        assert_eq!(store.get("n").await.expect("get"), None);

        let backend = store.executor().backend().expect("primary").clone();
        let fresh = CacheStore::new(Executor::Local(backend), store.clock().clone(), false, "");
        assert_eq!(fresh.get("n").await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_huge_ttl_never_expires() {
        let (store, clock, _temp_dir) = primary();
        store.put("k", json!(1), Some(u64::MAX)).await.expect("put");
        assert_eq!(store.get("k").await.expect("get"), Some(json!(1)));

        let backend = store.executor().backend().expect("primary").clone();
        clock.advance(10 * 365 * 24 * 3600);
        let fresh = CacheStore::new(Executor::Local(backend), clock.clone(), false, "");
        assert_eq!(fresh.get("k").await.expect("get"), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_expired_entries_read_as_miss() {
        let (store, clock, _temp_dir) = primary();
        store.put("short", json!(1), Some(10)).await.expect("put");
        clock.advance(11);
        assert_eq!(store.get("short").await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_add_semantics() {
        let (store, clock, _temp_dir) = primary();
        assert!(store.add("foo", json!("bar"), Some(60)).await.expect("add"));
        assert!(!store.add("foo", json!("baz"), Some(60)).await.expect("add"));
        assert_eq!(store.get("foo").await.expect("get"), Some(json!("bar")));

        clock.advance(61);
        assert!(store.add("foo", json!("baz"), Some(60)).await.expect("add"));
        assert_eq!(store.get("foo").await.expect("get"), Some(json!("baz")));
    }

    #[tokio::test]
    async fn test_increment_and_decrement() {
        let (store, _clock, _temp_dir) = primary();
        assert_eq!(store.increment("hits", 1).await.expect("increment"), 1);
        assert_eq!(store.increment("hits", 5).await.expect("increment"), 6);
        assert_eq!(store.decrement("hits", 2).await.expect("decrement"), 4);

        store.put("text", json!("12"), None).await.expect("put");
        assert_eq!(store.increment("text", 1).await.expect("increment"), 13);

        store.put("word", json!("abc"), None).await.expect("put");
        let err = store.increment("word", 1).await.unwrap_err();
        assert!(matches!(
            err,
            HypercacheError::Value(ValueError::NotNumeric { .. })
        ));

        store.put("max", json!(i64::MAX), None).await.expect("put");
        let err = store.increment("max", 1).await.unwrap_err();
        assert!(matches!(err, HypercacheError::Value(ValueError::Overflow { .. })));
    }

    #[tokio::test]
    async fn test_forget_and_flush() {
        let (store, _clock, _temp_dir) = primary();
        store.put("a", json!(1), None).await.expect("put");
        store.put("b", json!(2), None).await.expect("put");

        assert!(store.forget("a").await.expect("forget"));
        assert_eq!(store.get("a").await.expect("get"), None);

        assert!(store.flush().await.expect("flush"));
        assert_eq!(store.get("b").await.expect("get"), None);
        assert_eq!(store.l1_len(), 0);
        let stats = store.stats().await.expect("stats").expect("primary has stats");
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test]
    async fn test_many_and_put_many() {
        let (store, _clock, _temp_dir) = primary();
        store
            .put_many(vec![("a", json!(1)), ("b", json!(2))], Some(60))
            .await
            .expect("put_many");
        let values = store.many(&["a", "b", "c"]).await.expect("many");
        assert_eq!(
            values,
            vec![
                ("a".to_string(), Some(json!(1))),
                ("b".to_string(), Some(json!(2))),
                ("c".to_string(), None),
            ]
        );
    }

    #[tokio::test]
    async fn test_prefix_applies_once_to_every_key() {
        let (mut store, _clock, _temp_dir) = primary();
        store.set_prefix("app:");
        assert_eq!(store.prefix(), "app:");
        store.put("user", json!("ada"), None).await.expect("put");
        store.acquire_lock("job", "w1", 60).await.expect("acquire");

        let backend = store.executor().backend().expect("primary").clone();
        assert!(backend.get("app:user").await.expect("get").is_some());
        assert!(backend.get("user").await.expect("get").is_none());
        assert_eq!(backend.lock_owner("app:job").await.expect("owner"), "w1");
    }

    #[tokio::test]
    async fn test_lock_ledger_round_trip() {
        let (store, clock, _temp_dir) = primary();
        assert!(store.acquire_lock("job", "owner1", 10).await.expect("acquire"));
        assert!(!store.acquire_lock("job", "owner2", 10).await.expect("acquire"));
        assert!(!store.release_lock("job", "owner2").await.expect("release"));
        assert_eq!(store.lock_owner("job").await.expect("owner"), "owner1");

        clock.advance(11);
        assert!(store.acquire_lock("job", "owner2", 10).await.expect("acquire"));
        assert!(store.release_lock("job", "owner2").await.expect("release"));
        assert_eq!(store.lock_owner("job").await.expect("owner"), "");
    }

    #[tokio::test]
    async fn test_sweep_reports_both_tables() {
        let (store, clock, _temp_dir) = primary();
        store.put("old", json!(1), Some(1)).await.expect("put");
        store.put("keep", json!(2), None).await.expect("put");
        store.acquire_lock("job", "w1", 1).await.expect("acquire");

        clock.advance(5);
        let report = store.sweep().await.expect("sweep");
        assert_eq!(report, SweepReport { entries: 1, leases: 1 });
    }

    #[tokio::test]
    async fn test_primary_shutdown_has_nothing_to_drain() {
        let (store, _clock, _temp_dir) = primary();
        assert_eq!(store.shutdown().await, 0);
    }
}
