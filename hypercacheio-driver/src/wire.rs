//! JSON bodies of the RPC surface, shared by the client and the server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /cache/{key}` and `POST /add/{key}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub value: Value,
    /// Seconds; `null` or 0 never expires.
    #[serde(default)]
    pub ttl: Option<i64>,
}

/// Body of `POST /lock/{key}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireRequest {
    pub owner: String,
    #[serde(default)]
    pub ttl: Option<i64>,
}

/// Body of `DELETE /lock/{key}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub owner: String,
}

/// Body of `GET /cache/{key}`. `expiration` (epoch seconds) lets the caller
/// bound its L1 copy; peers that omit it are treated as never expiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetResponse {
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddResponse {
    pub added: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireResponse {
    pub acquired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub released: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerResponse {
    pub owner: String,
}

/// Clamp a TTL in seconds into the signed wire representation.
pub fn ttl_to_wire(ttl: Option<u64>) -> Option<i64> {
    ttl.map(|secs| i64::try_from(secs).unwrap_or(i64::MAX))
}
