//! Shared-token authentication.
//!
//! Every RPC carries `X-Hypercacheio-Token`; a mismatch is rejected with 401
//! before any handler runs. `X-Hypercacheio-Server-ID` is only logged.
//!
//! ```ignore
//! Router::new()
//!     .route("/cache/:key", get(get_value))
//!     .layer(middleware::from_fn_with_state(state.clone(), token_middleware));
//! ```

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use hypercacheio_core::{SERVER_ID_HEADER, TOKEN_HEADER};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn token_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|h| h.to_str().ok());
    let caller = request
        .headers()
        .get(SERVER_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown");

    if token != Some(state.api_token()) {
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            caller = %caller,
            token_present = token.is_some(),
            "Rejected request with invalid token"
        );
        return Err(ApiError::unauthorized("Unauthorized"));
    }

    tracing::trace!(caller = %caller, path = %request.uri().path(), "Authenticated request");
    Ok(next.run(request).await)
}
