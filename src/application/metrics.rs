//! Observability counters for TTL stores.
//!
//! Counters are cheap atomics updated on the hot path and read at any time
//! through [`StoreMetrics::snapshot`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counters describing how a TTL store is being used.
///
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct StoreMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Loads that returned a value
    hits: AtomicU64,
    /// Loads that returned nothing, expired entries included
    misses: AtomicU64,
    /// Entries removed lazily because a load found them expired
    expired: AtomicU64,
    /// Entries removed by incremental sweeps
    swept: AtomicU64,
    /// Full clears performed, manual or scheduled
    cleared: AtomicU64,
    /// Sweeper tasks currently running
    active_sweepers: AtomicUsize,
}

impl StoreMetrics {
    /// Create a zeroed metrics tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub(crate) fn record_hit(&self) {
        self.inner.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.inner.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expired(&self) {
        self.inner.expired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_swept(&self, removed: usize) {
        self.inner
            .swept
            .fetch_add(removed as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_clear(&self) {
        self.inner.cleared.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a sweeper as running until the returned guard is dropped.
    pub(crate) fn sweeper_started(&self) -> ActiveSweeper {
        self.inner.active_sweepers.fetch_add(1, Ordering::SeqCst);
        ActiveSweeper {
            metrics: self.clone(),
        }
    }

    /// Get the number of loads that returned a value.
    pub fn hits(&self) -> u64 {
        self.inner.hits.load(Ordering::Relaxed)
    }

    /// Get the number of loads that returned nothing.
    pub fn misses(&self) -> u64 {
        self.inner.misses.load(Ordering::Relaxed)
    }

    /// Get the number of entries evicted lazily on read.
    pub fn expired(&self) -> u64 {
        self.inner.expired.load(Ordering::Relaxed)
    }

    /// Get the number of entries removed by incremental sweeps.
    pub fn swept(&self) -> u64 {
        self.inner.swept.load(Ordering::Relaxed)
    }

    /// Get the number of full clears.
    pub fn cleared(&self) -> u64 {
        self.inner.cleared.load(Ordering::Relaxed)
    }

    /// Get the number of sweeper tasks currently running.
    ///
    /// Outside of a policy switch this is at most one.
    pub fn active_sweepers(&self) -> usize {
        self.inner.active_sweepers.load(Ordering::SeqCst)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            expired: self.expired(),
            swept: self.swept(),
            cleared: self.cleared(),
            active_sweepers: self.active_sweepers(),
        }
    }

    /// Reset all counters to zero. The sweeper gauge is left alone.
    pub fn reset(&self) {
        self.inner.hits.store(0, Ordering::Relaxed);
        self.inner.misses.store(0, Ordering::Relaxed);
        self.inner.expired.store(0, Ordering::Relaxed);
        self.inner.swept.store(0, Ordering::Relaxed);
        self.inner.cleared.store(0, Ordering::Relaxed);
    }
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard decrementing the active sweeper gauge on drop.
#[derive(Debug)]
pub(crate) struct ActiveSweeper {
    metrics: StoreMetrics,
}

impl Drop for ActiveSweeper {
    fn drop(&mut self) {
        self.metrics
            .inner
            .active_sweepers
            .fetch_sub(1, Ordering::SeqCst);
    }
}

/// A point-in-time snapshot of store metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Loads that returned a value
    pub hits: u64,
    /// Loads that returned nothing
    pub misses: u64,
    /// Entries evicted lazily on read
    pub expired: u64,
    /// Entries removed by incremental sweeps
    pub swept: u64,
    /// Full clears performed
    pub cleared: u64,
    /// Sweeper tasks running when the snapshot was taken
    pub active_sweepers: usize,
}

impl MetricsSnapshot {
    /// Calculate the hit rate (0.0 to 1.0).
    ///
    /// Returns 0.0 if no loads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_loads();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Get the total number of loads (hits + misses).
    pub fn total_loads(&self) -> u64 {
        self.hits.saturating_add(self.misses)
    }
}
