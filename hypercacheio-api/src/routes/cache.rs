//! Cache RPC routes.
//!
//! | Method | Path | Body | Response |
//! |---|---|---|---|
//! | GET | `/cache/:key` | | `{ data, expiration? }` |
//! | POST | `/cache/:key` | `{ value, ttl }` | `{ success }` |
//! | POST | `/add/:key` | `{ value, ttl }` | `{ added }` |
//! | DELETE | `/cache/:key` | | `{ success }` |
//! | DELETE | `/cache` | | `{ success }` |

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use hypercacheio_driver::wire::{AddResponse, GetResponse, SuccessResponse, WriteRequest};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Seconds from the wire; `null` and 0 never expire, negatives are rejected.
pub(crate) fn ttl_from_wire(ttl: Option<i64>) -> ApiResult<Option<u64>> {
    match ttl {
        None => Ok(None),
        Some(secs) => u64::try_from(secs)
            .map(Some)
            .map_err(|_| ApiError::negative_field("ttl", secs)),
    }
}

/// GET /cache/:key
pub async fn get_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<GetResponse>> {
    let (data, expiration) = match state.store.get_entry(&key).await? {
        Some((value, expiration)) => (Some(value), expiration),
        None => (None, None),
    };
    tracing::debug!(key = %key, hit = data.is_some(), "RPC get");
    Ok(Json(GetResponse { data, expiration }))
}

/// POST /cache/:key
pub async fn put_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
    payload: Result<Json<WriteRequest>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
    let Json(req) = payload?;
    let ttl = ttl_from_wire(req.ttl)?;
    let success = state.store.put(&key, req.value, ttl).await?;
    tracing::debug!(key = %key, ttl = ?ttl, "RPC put");
    Ok(Json(SuccessResponse { success }))
}

/// POST /add/:key
pub async fn add_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
    payload: Result<Json<WriteRequest>, JsonRejection>,
) -> ApiResult<Json<AddResponse>> {
    let Json(req) = payload?;
    let ttl = ttl_from_wire(req.ttl)?;
    let added = state.store.add(&key, req.value, ttl).await?;
    tracing::debug!(key = %key, added, "RPC add");
    Ok(Json(AddResponse { added }))
}

/// DELETE /cache/:key
pub async fn forget_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    let success = state.store.forget(&key).await?;
    tracing::debug!(key = %key, "RPC forget");
    Ok(Json(SuccessResponse { success }))
}

/// DELETE /cache
pub async fn flush_all(State(state): State<AppState>) -> ApiResult<Json<SuccessResponse>> {
    let success = state.store.flush().await?;
    tracing::info!("RPC flush");
    Ok(Json(SuccessResponse { success }))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/cache", delete(flush_all))
        .route(
            "/cache/:key",
            get(get_value).post(put_value).delete(forget_value),
        )
        .route("/add/:key", post(add_value))
}
