//! Node configuration.
//!
//! A node is configured by a TOML file overlaid with `HYPERCACHEIO_*`
//! environment variables. Every field has an explicit default and the
//! merged value is validated once at startup with [`NodeConfig::validate`].

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "HYPERCACHEIO_CONFIG";

// ============================================================================
// NODE ROLE
// ============================================================================

/// Logical role of a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Owns the durable store and lock ledger.
    #[default]
    Primary,
    /// Forwards every persistent operation to the primary.
    Secondary,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Primary => "primary",
            NodeRole::Secondary => "secondary",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "primary" => Ok(NodeRole::Primary),
            "secondary" => Ok(NodeRole::Secondary),
            other => Err(ConfigError::InvalidValue {
                field: "role",
                reason: format!("expected 'primary' or 'secondary', got '{}'", other),
            }),
        }
    }
}

// ============================================================================
// ROUTE TARGET
// ============================================================================

/// Where a node's cache and lock operations execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// Against the node's own durable store and lock ledger.
    Local,
    /// Over RPC to the given base URL.
    Remote { base_url: String },
}

impl RouteTarget {
    pub fn is_local(&self) -> bool {
        matches!(self, RouteTarget::Local)
    }
}

// ============================================================================
// SECTIONS
// ============================================================================

/// A peer listed under `secondaries`. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerConfig {
    pub url: String,
}

/// Addressing of the local HA sidecar (`go_server` in the config file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SidecarConfig {
    /// Local port the sidecar listens on.
    pub port: u16,
    /// Replication peers of the sidecar. Passed through, never dialled here.
    #[serde(deserialize_with = "deserialize_peer_addrs")]
    pub peer_addrs: Vec<String>,
    /// Takes precedence over the top-level `ha_mode` when present.
    pub ha_mode: Option<bool>,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            peer_addrs: Vec::new(),
            ha_mode: None,
        }
    }
}

/// Expired-row sweeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GcConfig {
    /// Chance that a local `put` sweeps expired rows inline.
    pub probability: f64,
    /// Period of the scheduled sweep job; 0 disables it.
    pub interval_secs: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            probability: 0.01,
            interval_secs: 0,
        }
    }
}

impl GcConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

fn deserialize_peer_addrs<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        Joined(String),
        List(Vec<String>),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::Joined(s) => split_list(&s),
        StringOrList::List(items) => items
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect(),
    })
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect()
}

// ============================================================================
// NODE CONFIG
// ============================================================================

/// Typed configuration of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Path prefix the RPC routes are mounted under.
    pub api_url: String,
    pub role: NodeRole,
    /// Base URL of the primary's RPC surface, used by secondaries.
    pub primary_url: String,
    /// Other secondaries, kept for failover tooling.
    pub secondaries: Vec<PeerConfig>,
    /// Directory holding the durable store files.
    pub storage_path: PathBuf,
    /// Outbound RPC timeout in seconds.
    pub timeout: f64,
    /// Shared secret carried by every RPC.
    pub api_token: String,
    /// Fire-and-forget `put`/`forget`/`flush` when remote.
    pub async_requests: bool,
    pub ha_mode: bool,
    pub go_server: SidecarConfig,
    /// Prepended to every cache and lock key.
    pub prefix: String,
    /// Sent as the node identity header.
    pub node_id: String,
    /// Address the RPC server binds to.
    pub listen_addr: String,
    /// LMDB map size.
    pub map_size_mb: usize,
    pub gc: GcConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            api_url: "/api/hypercacheio".to_string(),
            role: NodeRole::Primary,
            primary_url: "http://127.0.0.1/api/hypercacheio".to_string(),
            secondaries: Vec::new(),
            storage_path: PathBuf::from("storage/cache/hypercacheio"),
            timeout: 1.0,
            api_token: "changeme".to_string(),
            async_requests: true,
            ha_mode: false,
            go_server: SidecarConfig::default(),
            prefix: String::new(),
            node_id: std::env::var("HOSTNAME")
                .ok()
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| "hypercacheio-node".to_string()),
            listen_addr: "0.0.0.0:8000".to_string(),
            map_size_mb: 256,
            gc: GcConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from `--config <path>` or `HYPERCACHEIO_CONFIG`, falling back to
    /// defaults, then apply environment overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let config = match path {
            Some(path) => Self::from_path(&path)?,
            None => Self::default(),
        };
        let config = config.with_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Overlay `HYPERCACHEIO_*` variables resolved through `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(role) = lookup("HYPERCACHEIO_SERVER_ROLE") {
            self.role = role.parse()?;
        }
        if let Some(url) = lookup("HYPERCACHEIO_PRIMARY_URL") {
            self.primary_url = url;
        }
        if let Some(token) = lookup("HYPERCACHEIO_API_TOKEN") {
            self.api_token = token;
        }
        if let Some(value) = lookup("HYPERCACHEIO_ASYNC") {
            self.async_requests = parse_bool("async_requests", &value)?;
        }
        if let Some(value) = lookup("HYPERCACHEIO_HA_MODE") {
            self.ha_mode = parse_bool("ha_mode", &value)?;
        }
        if let Some(path) = lookup("HYPERCACHEIO_STORAGE_PATH") {
            self.storage_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("HYPERCACHEIO_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        Ok(self)
    }

    /// Whether the node delegates everything to its local sidecar.
    pub fn is_ha(&self) -> bool {
        self.go_server.ha_mode.unwrap_or(self.ha_mode)
    }

    /// Role the node actually behaves as. HA forces delegation.
    pub fn effective_role(&self) -> NodeRole {
        if self.is_ha() {
            NodeRole::Secondary
        } else {
            self.role
        }
    }

    /// Whether this node opens the durable store.
    pub fn owns_storage(&self) -> bool {
        self.effective_role() == NodeRole::Primary
    }

    pub fn sidecar_url(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.go_server.port, self.api_url)
    }

    /// Resolve the execution target. HA mode always wins over `role`.
    pub fn route_target(&self) -> RouteTarget {
        if self.is_ha() {
            return RouteTarget::Remote {
                base_url: self.sidecar_url(),
            };
        }
        match self.role {
            NodeRole::Primary => RouteTarget::Local,
            NodeRole::Secondary => RouteTarget::Remote {
                base_url: self.primary_url.clone(),
            },
        }
    }

    /// `timeout` as a `Duration`; must be positive and representable.
    pub fn request_timeout(&self) -> Result<Duration, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidValue {
            field: "timeout",
            reason,
        };
        if !(self.timeout.is_finite() && self.timeout > 0.0) {
            return Err(invalid("must be > 0".to_string()));
        }
        Duration::try_from_secs_f64(self.timeout).map_err(|e| invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.api_url.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "api_url",
                reason: "must start with '/'".to_string(),
            });
        }
        self.request_timeout()?;
        if self.api_token.trim().is_empty() {
            return Err(ConfigError::MissingRequired { field: "api_token" });
        }
        if !(0.0..=1.0).contains(&self.gc.probability) {
            return Err(ConfigError::InvalidValue {
                field: "gc.probability",
                reason: "must be between 0 and 1".to_string(),
            });
        }
        if self.is_ha() {
            if self.go_server.port == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "go_server.port",
                    reason: "must be > 0 in HA mode".to_string(),
                });
            }
        } else {
            match self.role {
                NodeRole::Secondary if self.primary_url.trim().is_empty() => {
                    return Err(ConfigError::MissingRequired {
                        field: "primary_url",
                    });
                }
                NodeRole::Primary if self.storage_path.as_os_str().is_empty() => {
                    return Err(ConfigError::MissingRequired {
                        field: "storage_path",
                    });
                }
                _ => {}
            }
        }
        if self.owns_storage() && self.map_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "map_size_mb",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field,
            reason: format!("expected a boolean, got '{}'", other),
        }),
    }
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(value) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(value));
        }
    }
    None
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from)
}
