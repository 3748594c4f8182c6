//! Router assembly.
//!
//! All RPC routes live under the configured `api_url` behind the token
//! middleware. Handlers run through the node's own [`CacheStore`], so a
//! secondary server proxies to its primary.
//!
//! [`CacheStore`]: hypercacheio_driver::CacheStore

pub mod cache;
pub mod lock;

use axum::{extract::DefaultBodyLimit, middleware::from_fn_with_state, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::constants::MAX_BODY_BYTES;
use crate::middleware::token_middleware;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let rpc = Router::new()
        .merge(cache::create_router())
        .merge(lock::create_router())
        .layer(from_fn_with_state(state.clone(), token_middleware))
        .with_state(state.clone());

    let mount = state.config.api_url.trim_end_matches('/');
    let router = if mount.is_empty() {
        Router::new().merge(rpc)
    } else {
        Router::new().nest(mount, rpc)
    };

    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
    )
}
