//! Error Types for the Hypercacheio RPC server
//!
//! - [`ErrorCode`] categorises failures and maps them to HTTP status codes
//! - [`ApiError`] is the structured JSON body returned on every failure
//!
//! Transport failures never reach this layer: the driver turns them into
//! misses. What remains is authentication, payload validation and storage.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hypercacheio_core::HypercacheError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for RPC responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Missing or mismatched shared token
    Unauthorized,

    /// Request body could not be parsed or holds a bad value
    InvalidInput,

    /// Required field is missing or empty
    MissingField,

    /// The cached value cannot be used for the requested operation
    InvalidValue,

    /// Durable store failed
    StorageError,

    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidInput | ErrorCode::MissingField | ErrorCode::InvalidValue => {
                StatusCode::BAD_REQUEST
            }
            ErrorCode::StorageError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Unauthorized",
            ErrorCode::InvalidInput => "Malformed request body",
            ErrorCode::MissingField => "Request is missing a required field",
            ErrorCode::InvalidValue => "Cached value cannot be used for this operation",
            ErrorCode::StorageError => "Storage operation failed",
            ErrorCode::InternalError => "Node failed to handle the request",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response.
///
/// ```json
/// { "code": "UNAUTHORIZED", "message": "Unauthorized" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
    }

    /// A field that must be zero or positive.
    pub fn negative_field(field: &str, value: i64) -> Self {
        Self::new(
            ErrorCode::InvalidInput,
            format!("Field '{}' must not be negative, got {}", field, value),
        )
    }

    pub fn storage_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageError, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

impl From<HypercacheError> for ApiError {
    fn from(err: HypercacheError) -> Self {
        match err {
            HypercacheError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure while serving request");
                ApiError::storage_error(e.to_string())
            }
            HypercacheError::Value(e) => ApiError::new(ErrorCode::InvalidValue, e.to_string()),
            HypercacheError::Config(e) => ApiError::internal_error(e.to_string()),
            HypercacheError::Client { reason } => ApiError::internal_error(reason),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid_input(rejection.body_text())
    }
}

/// Result type alias for handlers.
pub type ApiResult<T> = Result<T, ApiError>;
