//! Replication client.
//!
//! Turns a cache or lock operation into an authenticated RPC against a peer
//! (the primary, or the local HA sidecar). Transport failures never reach the
//! caller: a synchronous call that fails for any reason yields `None`, and an
//! asynchronous call is dropped after being logged.
//!
//! Asynchronous calls are tracked in a [`JoinSet`] so that [`drain`] can wait
//! for them before the process exits.
//!
//! [`drain`]: ReplicationClient::drain

use std::sync::Arc;
use std::time::Duration;

use hypercacheio_core::{ConfigError, NodeConfig, SERVER_ID_HEADER, TOKEN_HEADER};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Peer returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid peer URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Invalid header {header}: {reason}")]
    InvalidHeader {
        header: &'static str,
        reason: String,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// How an RPC is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Wait for the response, bounded by the client timeout.
    Sync,
    /// Fire and forget; tracked until drained.
    Async,
}

/// Authenticated RPC client bound to one peer base URL.
#[derive(Clone)]
pub struct ReplicationClient {
    client: reqwest::Client,
    base_url: Url,
    headers: HeaderMap,
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl std::fmt::Debug for ReplicationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationClient")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl ReplicationClient {
    pub fn new(
        base_url: &str,
        api_token: &str,
        node_id: &str,
        timeout: Duration,
    ) -> Result<Self, ReplicationError> {
        let base_url = Url::parse(base_url).map_err(|e| ReplicationError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ReplicationError::InvalidUrl {
                url: base_url.to_string(),
                reason: "not a base URL".to_string(),
            });
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            headers: build_headers(api_token, node_id)?,
            pending: Arc::new(Mutex::new(JoinSet::new())),
        })
    }

    /// Client for `base_url` using the token, identity and timeout of `config`.
    pub fn from_config(config: &NodeConfig, base_url: &str) -> Result<Self, ReplicationError> {
        Self::new(
            base_url,
            &config.api_token,
            &config.node_id,
            config.request_timeout()?,
        )
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// `{base_url}/{segments...}`, each segment percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Send `method` to `segments` and wait for the decoded JSON body.
    ///
    /// Any transport error, timeout or non-success status yields `None`.
    pub async fn send_sync(
        &self,
        method: Method,
        segments: &[&str],
        payload: Option<Value>,
    ) -> Option<Value> {
        let url = self.endpoint(segments);
        match execute(&self.client, &self.headers, method.clone(), url.clone(), payload).await {
            Ok(body) => Some(body),
            Err(e) => {
                tracing::warn!(%method, url = %url, error = %e, "Replication request failed");
                None
            }
        }
    }

    /// Dispatch without waiting. The request is tracked until [`drain`].
    ///
    /// [`drain`]: ReplicationClient::drain
    pub async fn send_async(&self, method: Method, segments: &[&str], payload: Option<Value>) {
        let url = self.endpoint(segments);
        let client = self.client.clone();
        let headers = self.headers.clone();

        let mut pending = self.pending.lock().await;
        while pending.try_join_next().is_some() {}

        tracing::debug!(%method, url = %url, "Dispatching async replication request");
        pending.spawn(async move {
            if let Err(e) = execute(&client, &headers, method.clone(), url.clone(), payload).await
            {
                tracing::debug!(%method, url = %url, error = %e, "Async replication request dropped");
            }
        });
    }

    /// Dispatch in the given mode. Asynchronous dispatch always yields `None`.
    pub async fn dispatch(
        &self,
        mode: Dispatch,
        method: Method,
        segments: &[&str],
        payload: Option<Value>,
    ) -> Option<Value> {
        match mode {
            Dispatch::Sync => self.send_sync(method, segments, payload).await,
            Dispatch::Async => {
                self.send_async(method, segments, payload).await;
                None
            }
        }
    }

    /// Number of async requests not yet observed as finished.
    pub async fn pending_count(&self) -> usize {
        let mut pending = self.pending.lock().await;
        while pending.try_join_next().is_some() {}
        pending.len()
    }

    /// Wait for every outstanding async request. Errors are suppressed; each
    /// request is bounded by the client timeout. Returns how many were awaited.
    pub async fn drain(&self) -> usize {
        let mut tasks = {
            let mut pending = self.pending.lock().await;
            std::mem::take(&mut *pending)
        };

        let mut drained = 0;
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::debug!(error = %e, "Async replication task aborted");
            }
            drained += 1;
        }

        if drained > 0 {
            tracing::info!(drained, base_url = %self.base_url, "Drained async replication requests");
        }
        drained
    }
}

fn build_headers(api_token: &str, node_id: &str) -> Result<HeaderMap, ReplicationError> {
    let mut headers = HeaderMap::new();
    for (name, value) in [(TOKEN_HEADER, api_token), (SERVER_ID_HEADER, node_id)] {
        let invalid = |reason: String| ReplicationError::InvalidHeader {
            header: name,
            reason,
        };
        headers.insert(
            HeaderName::try_from(name).map_err(|e| invalid(e.to_string()))?,
            HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?,
        );
    }
    Ok(headers)
}

async fn execute(
    client: &reqwest::Client,
    headers: &HeaderMap,
    method: Method,
    url: Url,
    payload: Option<Value>,
) -> Result<Value, ReplicationError> {
    let mut request = client.request(method, url).headers(headers.clone());
    if let Some(payload) = payload {
        request = request.json(&payload);
    }

    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        Ok(response.json::<Value>().await?)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(ReplicationError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
