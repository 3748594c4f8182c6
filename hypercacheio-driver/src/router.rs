//! Role router.
//!
//! The single decision point between local execution and RPC delegation.
//! The decision is made once from the config and held for the life of the
//! store.

use std::sync::Arc;

use hypercacheio_core::{Clock, HypercacheError, HypercacheResult, NodeConfig, RouteTarget};
use hypercacheio_storage::{GcPolicy, LmdbStore, StorageBackend};

use crate::replication::ReplicationClient;

/// Resolved execution target of a node.
#[derive(Clone)]
pub enum Executor {
    /// Primary, non-HA: the node's own durable store and lock ledger.
    Local(Arc<dyn StorageBackend>),
    /// Secondary or HA: RPC to the primary or the local sidecar.
    Remote(ReplicationClient),
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Executor::Local(_) => f.write_str("Executor::Local"),
            Executor::Remote(client) => f.debug_tuple("Executor::Remote").field(client).finish(),
        }
    }
}

impl Executor {
    /// Build the executor `config` routes to, opening the durable store when
    /// the node executes locally.
    pub fn from_config(config: &NodeConfig, clock: Arc<dyn Clock>) -> HypercacheResult<Self> {
        match config.route_target() {
            RouteTarget::Local => {
                let store = LmdbStore::open(&config.storage_path, config.map_size_mb, clock)?
                    .with_gc(GcPolicy::new(config.gc.probability));
                tracing::info!(
                    path = %config.storage_path.display(),
                    "Executing cache operations against local store"
                );
                Ok(Executor::Local(Arc::new(store)))
            }
            RouteTarget::Remote { base_url } => {
                let client = ReplicationClient::from_config(config, &base_url).map_err(|e| {
                    HypercacheError::Client {
                        reason: e.to_string(),
                    }
                })?;
                tracing::info!(
                    base_url = %base_url,
                    ha_mode = config.is_ha(),
                    "Delegating cache operations over RPC"
                );
                Ok(Executor::Remote(client))
            }
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Executor::Local(_))
    }

    /// Local backend, if this node owns one.
    pub fn backend(&self) -> Option<&Arc<dyn StorageBackend>> {
        match self {
            Executor::Local(backend) => Some(backend),
            Executor::Remote(_) => None,
        }
    }

    /// Remote client, if this node delegates.
    pub fn client(&self) -> Option<&ReplicationClient> {
        match self {
            Executor::Local(_) => None,
            Executor::Remote(client) => Some(client),
        }
    }
}
