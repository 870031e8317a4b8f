//! Collection metrics and diagnostics.

use std::cell::Cell;
use std::time::Duration;

/// Statistics from the most recent garbage collection.
#[derive(Debug, Clone, Copy)]
pub struct GcMetrics {
    /// Wall-clock time the last collection took.
    pub duration: Duration,
    /// Bytes reclaimed by the last collection.
    pub bytes_reclaimed: usize,
    /// Bytes still live after the last collection.
    pub bytes_surviving: usize,
    /// Total collections run since `gc_init`.
    pub total_collections: usize,
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GcMetrics {
    /// Zeroed metrics, as observed before any collection has run.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            duration: Duration::from_secs(0),
            bytes_reclaimed: 0,
            bytes_surviving: 0,
            total_collections: 0,
        }
    }
}

thread_local! {
    static LAST_METRICS: Cell<GcMetrics> = const { Cell::new(GcMetrics::new()) };
    static TOTAL_COLLECTIONS: Cell<usize> = const { Cell::new(0) };
}

/// Metrics from the most recent collection on this thread's collector.
#[must_use]
pub fn last_gc_metrics() -> GcMetrics {
    LAST_METRICS.with(Cell::get)
}

pub(crate) fn record_metrics(mut metrics: GcMetrics) {
    TOTAL_COLLECTIONS.with(|c| c.set(c.get() + 1));
    metrics.total_collections = TOTAL_COLLECTIONS.with(Cell::get);
    LAST_METRICS.with(|m| m.set(metrics));
}

pub(crate) fn reset() {
    LAST_METRICS.with(|m| m.set(GcMetrics::new()));
    TOTAL_COLLECTIONS.with(|c| c.set(0));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_collections_accumulates_across_records() {
        reset();
        record_metrics(GcMetrics::new());
        record_metrics(GcMetrics::new());
        assert_eq!(last_gc_metrics().total_collections, 2);
    }
}
