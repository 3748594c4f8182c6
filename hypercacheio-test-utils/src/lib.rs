//! Hypercacheio Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - A manual clock and temp-dir backed durable stores
//! - Node configs for each role
//! - [`MockPeer`], an in-process HTTP peer that records every request

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::Value;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub use hypercacheio_core::{
    Clock, ManualClock, NodeConfig, NodeRole, SERVER_ID_HEADER, TOKEN_HEADER,
};
use hypercacheio_storage::{GcPolicy, LmdbStore};

/// A fixed, realistic starting instant for manual clocks.
pub const TEST_EPOCH: i64 = 1_700_000_000;

/// Token used by every test config.
pub const TEST_TOKEN: &str = "test-token";

// ============================================================================
// FIXTURES
// ============================================================================

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(TEST_EPOCH))
}

/// Durable store in a fresh temp dir with inline GC disabled. Keep the
/// `TempDir` alive for as long as the store is used.
pub fn temp_lmdb_store(clock: Arc<dyn Clock>) -> (Arc<LmdbStore>, TempDir) {
    let temp_dir = tempfile::TempDir::new().unwrap_or_else(|e| panic!("temp dir: {}", e));
    let store = LmdbStore::open(temp_dir.path(), 10, clock)
        .unwrap_or_else(|e| panic!("open store: {}", e))
        .with_gc(GcPolicy::never());
    (Arc::new(store), temp_dir)
}

/// Primary config storing under `temp_dir`.
pub fn primary_config(temp_dir: &TempDir) -> NodeConfig {
    NodeConfig {
        role: NodeRole::Primary,
        storage_path: temp_dir.path().to_path_buf(),
        api_token: TEST_TOKEN.to_string(),
        node_id: "primary-test".to_string(),
        map_size_mb: 10,
        async_requests: false,
        ..NodeConfig::default()
    }
}

/// Secondary config delegating to `primary_url`.
pub fn secondary_config(primary_url: impl Into<String>, async_requests: bool) -> NodeConfig {
    NodeConfig {
        role: NodeRole::Secondary,
        primary_url: primary_url.into(),
        api_token: TEST_TOKEN.to_string(),
        node_id: "secondary-test".to_string(),
        async_requests,
        timeout: 1.0,
        ..NodeConfig::default()
    }
}

// ============================================================================
// MOCK PEER
// ============================================================================

/// One request as seen by [`MockPeer`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    /// Raw (percent-encoded) request path.
    pub path: String,
    pub token: Option<String>,
    pub server_id: Option<String>,
    /// JSON body, if one was sent.
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
struct Canned {
    method: Method,
    path: String,
    status: StatusCode,
    body: Value,
}

#[derive(Debug, Default)]
struct PeerInner {
    requests: Vec<RecordedRequest>,
    canned: Vec<Canned>,
    delay: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
struct PeerState {
    inner: Arc<Mutex<PeerInner>>,
}

impl PeerState {
    fn lock(&self) -> MutexGuard<'_, PeerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// In-process HTTP peer bound to `127.0.0.1:0`.
///
/// Records every request and answers with a canned JSON body per
/// `(method, path)`, or `200 {}` when nothing matches.
pub struct MockPeer {
    addr: SocketAddr,
    state: PeerState,
    handle: JoinHandle<()>,
}

impl MockPeer {
    pub async fn start() -> Self {
        let state = PeerState::default();
        let app = Router::new().fallback(record).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("bind mock peer: {}", e));
        let addr = listener
            .local_addr()
            .unwrap_or_else(|e| panic!("mock peer addr: {}", e));

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `http://127.0.0.1:{port}{prefix}`.
    pub fn url(&self, prefix: &str) -> String {
        format!("http://{}{}", self.addr, prefix)
    }

    /// Answer `method path` with `200 body`.
    pub fn respond(&self, method: Method, path: &str, body: Value) {
        self.respond_with_status(method, path, StatusCode::OK, body);
    }

    pub fn respond_with_status(&self, method: Method, path: &str, status: StatusCode, body: Value) {
        self.state.lock().canned.push(Canned {
            method,
            path: path.to_string(),
            status,
            body,
        });
    }

    /// Delay every response, e.g. to exceed a client timeout.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Poll until at least `count` requests were recorded or `timeout` passes.
    pub async fn wait_for_requests(&self, count: usize, timeout: Duration) -> Vec<RecordedRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let requests = self.requests();
            if requests.len() >= count || tokio::time::Instant::now() >= deadline {
                return requests;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for MockPeer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn record(
    State(state): State<PeerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let request = RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        token: header(&headers, TOKEN_HEADER),
        server_id: header(&headers, SERVER_ID_HEADER),
        body: if body.is_empty() {
            None
        } else {
            serde_json::from_slice(&body).ok()
        },
    };

    let (canned, delay) = {
        let mut inner = state.lock();
        inner.requests.push(request);
        let canned = inner
            .canned
            .iter()
            .rev()
            .find(|c| c.method == method && c.path == path)
            .cloned();
        (canned, inner.delay)
    };

    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    match canned {
        Some(c) => (c.status, Json(c.body)).into_response(),
        None => (StatusCode::OK, Json(serde_json::json!({}))).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_peer_records_and_answers() {
        let peer = MockPeer::start().await;
        peer.respond(Method::GET, "/api/cache/x", json!({"data": "1"}));

        let client = reqwest::Client::new();
        let body: Value = client
            .get(peer.url("/api/cache/x"))
            .header(TOKEN_HEADER, TEST_TOKEN)
            .send()
            .await
            .expect("request should succeed")
            .json()
            .await
            .expect("body should be json");
        assert_eq!(body, json!({"data": "1"}));

        let requests = peer.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::GET);
        assert_eq!(requests[0].path, "/api/cache/x");
        assert_eq!(requests[0].token.as_deref(), Some(TEST_TOKEN));
        assert_eq!(requests[0].body, None);
    }

    #[test]
    fn test_configs_validate() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        primary_config(&temp_dir).validate().expect("primary config");
        secondary_config("http://peer/api", true)
            .validate()
            .expect("secondary config");
    }
}
