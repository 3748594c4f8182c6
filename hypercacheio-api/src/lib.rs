//! Hypercacheio RPC Server
//!
//! Serves the cache and lock RPC surface of one node over axum. Requests
//! are authenticated with a shared token and executed through the node's
//! [`CacheStore`](hypercacheio_driver::CacheStore): a primary answers from
//! its durable store, a secondary forwards to its primary.

pub mod constants;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use error::{ApiError, ApiResult, ErrorCode};
pub use jobs::{gc_sweep_task, GcSweepMetrics};
pub use middleware::token_middleware;
pub use routes::create_router;
pub use state::AppState;
