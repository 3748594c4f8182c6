//! Lock handle.
//!
//! A [`CacheLock`] names a key, a lease length and an owner token, and
//! delegates every operation to the lock ledger behind its [`CacheStore`].

use std::time::Duration;

use hypercacheio_core::HypercacheResult;
use tokio::time::Instant;
use uuid::Uuid;

use crate::store::CacheStore;

/// Delay between attempts while blocking on a held lock.
pub const BLOCK_RETRY_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct CacheLock {
    store: CacheStore,
    name: String,
    seconds: u64,
    owner: String,
}

impl CacheLock {
    pub(crate) fn new(store: CacheStore, name: &str, seconds: u64, owner: Option<String>) -> Self {
        Self {
            store,
            name: name.to_string(),
            seconds,
            owner: owner.unwrap_or_else(|| Uuid::now_v7().to_string()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Lease length in seconds.
    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    /// Try once to take the lease.
    pub async fn acquire(&self) -> HypercacheResult<bool> {
        self.store
            .acquire_lock(&self.name, &self.owner, self.seconds)
            .await
    }

    /// Keep trying until the lease is taken or `timeout` elapses.
    pub async fn block(&self, timeout: Duration) -> HypercacheResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.acquire().await? {
                return Ok(true);
            }
            if Instant::now() + BLOCK_RETRY_INTERVAL > deadline {
                tracing::debug!(lock = %self.name, owner = %self.owner, "Timed out waiting for lock");
                return Ok(false);
            }
            tokio::time::sleep(BLOCK_RETRY_INTERVAL).await;
        }
    }

    /// Release the lease if this handle's owner holds it.
    pub async fn release(&self) -> HypercacheResult<bool> {
        self.store.release_lock(&self.name, &self.owner).await
    }

    /// Release unconditionally on behalf of this handle's owner.
    pub async fn force_release(&self) -> HypercacheResult<()> {
        self.store.release_lock(&self.name, &self.owner).await?;
        Ok(())
    }

    /// Owner recorded in the ledger, or an empty string.
    pub async fn current_owner(&self) -> HypercacheResult<String> {
        self.store.lock_owner(&self.name).await
    }

    pub async fn is_owned_by_current_process(&self) -> HypercacheResult<bool> {
        Ok(self.current_owner().await? == self.owner)
    }
}
