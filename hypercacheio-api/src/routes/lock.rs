//! Lock ledger RPC routes.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::post,
    Json, Router,
};
use hypercacheio_driver::wire::{
    AcquireRequest, AcquireResponse, OwnerResponse, ReleaseRequest, ReleaseResponse,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn require_owner(owner: &str) -> ApiResult<()> {
    if owner.trim().is_empty() {
        return Err(ApiError::missing_field("owner"));
    }
    Ok(())
}

/// POST /lock/:key
pub async fn acquire_lock(
    State(state): State<AppState>,
    Path(key): Path<String>,
    payload: Result<Json<AcquireRequest>, JsonRejection>,
) -> ApiResult<Json<AcquireResponse>> {
    let Json(req) = payload?;
    require_owner(&req.owner)?;
    let secs = req.ttl.ok_or_else(|| ApiError::missing_field("ttl"))?;
    let ttl = u64::try_from(secs).map_err(|_| ApiError::negative_field("ttl", secs))?;

    let acquired = state.store.acquire_lock(&key, &req.owner, ttl).await?;
    tracing::debug!(key = %key, owner = %req.owner, ttl, acquired, "RPC acquire lock");
    Ok(Json(AcquireResponse { acquired }))
}

/// DELETE /lock/:key
pub async fn release_lock(
    State(state): State<AppState>,
    Path(key): Path<String>,
    payload: Result<Json<ReleaseRequest>, JsonRejection>,
) -> ApiResult<Json<ReleaseResponse>> {
    let Json(req) = payload?;
    require_owner(&req.owner)?;

    let released = state.store.release_lock(&key, &req.owner).await?;
    tracing::debug!(key = %key, owner = %req.owner, released, "RPC release lock");
    Ok(Json(ReleaseResponse { released }))
}

/// GET /lock/:key
pub async fn lock_owner(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<OwnerResponse>> {
    let owner = state.store.lock_owner(&key).await?;
    Ok(Json(OwnerResponse { owner }))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route(
        "/lock/:key",
        post(acquire_lock).delete(release_lock).get(lock_owner),
    )
}
