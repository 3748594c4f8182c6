//! Error types for Hypercacheio operations

use thiserror::Error;

/// Durable storage errors.
///
/// These are fatal to the operation that raised them and are propagated to
/// the caller unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Failed to open storage environment at {path}: {reason}")]
    EnvOpen { path: String, reason: String },

    #[error("Failed to open table {table}: {reason}")]
    TableOpen { table: &'static str, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Corrupt row in {table} for key {key}: {reason}")]
    CorruptRow {
        table: &'static str,
        key: String,
        reason: String,
    },

    #[error("Storage I/O error: {reason}")]
    Io { reason: String },
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io {
            reason: e.to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: &'static str },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Cached value errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("Value stored at {key} is not numeric")]
    NotNumeric { key: String },

    #[error("Increment on {key} overflowed")]
    Overflow { key: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },
}

impl From<serde_json::Error> for ValueError {
    fn from(e: serde_json::Error) -> Self {
        ValueError::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Master error type for all Hypercacheio errors.
#[derive(Debug, Error)]
pub enum HypercacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    #[error("Replication client setup failed: {reason}")]
    Client { reason: String },
}

/// Result type alias for Hypercacheio operations.
pub type HypercacheResult<T> = Result<T, HypercacheError>;
