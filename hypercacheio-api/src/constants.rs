//! Constants for the Hypercacheio server.

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "hypercacheio=debug,tower_http=info,info";

/// Set to `pretty` for human-readable logs instead of JSON.
pub const LOG_FORMAT_ENV: &str = "HYPERCACHEIO_LOG_FORMAT";

/// Maximum accepted request body, in bytes.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;
