//! Scheduled GC Sweep
//!
//! Inline GC on `put` already removes expired entries now and then. On a
//! primary with `gc.interval_secs > 0` this task also sweeps on a fixed
//! interval, and it is the only place expired leases are reclaimed.
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(gc_sweep_task(store.clone(), interval, shutdown_rx));
//!
//! // On shutdown
//! let snapshot = stop_gc_sweep(&shutdown_tx, Some(handle)).await;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hypercacheio_driver::CacheStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// METRICS
// ============================================================================

/// Counters kept over the task's lifetime.
#[derive(Debug, Default)]
pub struct GcSweepMetrics {
    pub entries_removed: AtomicU64,
    pub leases_removed: AtomicU64,
    pub sweep_cycles: AtomicU64,
    pub sweep_errors: AtomicU64,
}

impl GcSweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> GcSweepSnapshot {
        GcSweepSnapshot {
            entries_removed: self.entries_removed.load(Ordering::Relaxed),
            leases_removed: self.leases_removed.load(Ordering::Relaxed),
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcSweepSnapshot {
    pub entries_removed: u64,
    pub leases_removed: u64,
    pub sweep_cycles: u64,
    pub sweep_errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Sweep `store` every `period` until `shutdown_rx` flips to `true`.
///
/// The first sweep runs immediately.
pub async fn gc_sweep_task(
    store: CacheStore,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<GcSweepMetrics> {
    let metrics = Arc::new(GcSweepMetrics::new());

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(interval_secs = period.as_secs(), "GC sweep task started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("GC sweep task shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                sweep_once(&store, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        entries_removed = snapshot.entries_removed,
        leases_removed = snapshot.leases_removed,
        sweep_cycles = snapshot.sweep_cycles,
        sweep_errors = snapshot.sweep_errors,
        "GC sweep task completed"
    );

    metrics
}

/// Signal shutdown and wait for the task, if one was spawned.
pub async fn stop_gc_sweep(
    shutdown_tx: &watch::Sender<bool>,
    handle: Option<JoinHandle<Arc<GcSweepMetrics>>>,
) -> Option<GcSweepSnapshot> {
    if shutdown_tx.send(true).is_err() {
        tracing::debug!("No GC sweep task is listening for shutdown");
    }
    match handle?.await {
        Ok(metrics) => Some(metrics.snapshot()),
        Err(e) => {
            tracing::warn!(error = %e, "GC sweep task did not finish cleanly");
            None
        }
    }
}

async fn sweep_once(store: &CacheStore, metrics: &GcSweepMetrics) {
    metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);

    match store.sweep().await {
        Ok(report) => {
            metrics
                .entries_removed
                .fetch_add(report.entries, Ordering::Relaxed);
            metrics
                .leases_removed
                .fetch_add(report.leases, Ordering::Relaxed);
            if report.entries > 0 || report.leases > 0 {
                tracing::debug!(
                    entries = report.entries,
                    leases = report.leases,
                    "GC sweep removed expired rows"
                );
            } else {
                tracing::trace!("GC sweep found nothing to remove");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "GC sweep failed");
            metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}
