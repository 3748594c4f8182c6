//! Background jobs spawned by the server.
//!
//! - `gc_sweep`: scheduled removal of expired entries and leases

pub mod gc_sweep;

pub use gc_sweep::{gc_sweep_task, stop_gc_sweep, GcSweepMetrics, GcSweepSnapshot};
