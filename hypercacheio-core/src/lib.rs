//! Hypercacheio Core - Entity Types
//!
//! Data model, node configuration, clock and error taxonomy shared by every
//! other crate. No I/O beyond reading the config file.

pub mod clock;
pub mod config;
pub mod entities;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    GcConfig, NodeConfig, NodeRole, PeerConfig, RouteTarget, SidecarConfig, CONFIG_PATH_ENV,
};
pub use entities::{expiration_from_ttl, lease_expiration, CacheEntry, LockLease};
pub use error::{ConfigError, HypercacheError, HypercacheResult, StorageError, ValueError};

/// Header carrying the shared secret on every RPC.
pub const TOKEN_HEADER: &str = "X-Hypercacheio-Token";

/// Header carrying the sending node's identity. Informational only.
pub const SERVER_ID_HEADER: &str = "X-Hypercacheio-Server-ID";
