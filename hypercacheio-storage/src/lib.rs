//! Hypercacheio Storage
//!
//! Durable store and lock ledger for primary nodes, plus the L1 front cache
//! every node keeps in process.

pub mod front;
pub mod gc;
pub mod lmdb;
pub mod traits;

pub use front::FrontCache;
pub use gc::{GcPolicy, DEFAULT_GC_PROBABILITY};
pub use lmdb::{LmdbStore, CACHE_TABLE, LOCK_TABLE};
pub use traits::{StorageBackend, StorageResult, StorageStats};
