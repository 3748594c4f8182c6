//! Hypercacheio server entry point.
//!
//! Loads the node configuration, builds the node's store and serves the RPC
//! surface until Ctrl-C. On shutdown the GC job is stopped and pending async
//! RPCs are drained.

use std::net::SocketAddr;

use hypercacheio_api::jobs::{gc_sweep_task, stop_gc_sweep};
use hypercacheio_api::telemetry::{init_tracing, LogFormat};
use hypercacheio_api::{create_router, ApiError, ApiResult, AppState};
use hypercacheio_core::NodeConfig;
use hypercacheio_driver::CacheStore;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(LogFormat::from_env())?;

    let config = NodeConfig::load()
        .map_err(|e| ApiError::internal_error(format!("Invalid configuration: {}", e)))?;
    tracing::info!(
        role = %config.effective_role(),
        ha_mode = config.is_ha(),
        node_id = %config.node_id,
        api_url = %config.api_url,
        "Configuration loaded"
    );

    let store = CacheStore::connect(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gc_handle = match config.gc.interval() {
        Some(period) if store.executor().is_local() => {
            Some(tokio::spawn(gc_sweep_task(store.clone(), period, shutdown_rx)))
        }
        _ => None,
    };

    let addr: SocketAddr = config.listen_addr.parse().map_err(|e| {
        ApiError::invalid_input(format!("Invalid listen address {}: {}", config.listen_addr, e))
    })?;
    let app = create_router(AppState::new(store.clone(), config));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;
    tracing::info!(%addr, "Starting Hypercacheio server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    stop_gc_sweep(&shutdown_tx, gc_handle).await;

    let drained = store.shutdown().await;
    tracing::info!(drained, "Hypercacheio server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
