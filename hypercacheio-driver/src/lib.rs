//! Hypercacheio Driver
//!
//! The cache and lock API a node exposes to its host process. A
//! [`CacheStore`] routes every operation either to the node's own durable
//! store (primary) or over RPC to the primary or the local HA sidecar
//! (secondary / HA), with an L1 front cache in front of both.
//!
//! ```no_run
//! use hypercacheio_core::NodeConfig;
//! use hypercacheio_driver::CacheStore;
//! use serde_json::json;
//!
//! # async fn run() -> hypercacheio_core::HypercacheResult<()> {
//! let config = NodeConfig::load()?;
//! let store = CacheStore::connect(&config)?;
//!
//! store.put("greeting", json!("hello"), Some(60)).await?;
//! let lock = store.lock("nightly-report", 30, None);
//! if lock.acquire().await? {
//!     // ...
//!     lock.release().await?;
//! }
//!
//! store.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod lock;
pub mod replication;
pub mod router;
pub mod store;
pub mod wire;

pub use lock::{CacheLock, BLOCK_RETRY_INTERVAL};
pub use replication::{Dispatch, ReplicationClient, ReplicationError};
pub use router::Executor;
pub use store::{CacheStore, SweepReport};
