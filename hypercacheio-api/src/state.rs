//! Shared application state.

use std::sync::Arc;

use hypercacheio_core::NodeConfig;
use hypercacheio_driver::CacheStore;

/// State handed to every route and to the token middleware.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The node's own store. Keys arrive already prefixed by the caller, so
    /// this store is built with an empty prefix.
    pub store: CacheStore,
    pub config: Arc<NodeConfig>,
}

impl AppState {
    pub fn new(mut store: CacheStore, config: NodeConfig) -> Self {
        store.set_prefix("");
        Self {
            store,
            config: Arc::new(config),
        }
    }

    pub fn api_token(&self) -> &str {
        &self.config.api_token
    }
}
