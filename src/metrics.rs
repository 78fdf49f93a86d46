//! GC metrics.
//!
//! Counters are exported through the `metrics` facade and mirrored in
//! process-local atomics so a running service can report its own totals.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Metric names
// ============================================================================

/// Refs evaluated against the TTL cutoff.
pub const GC_REFS_CONSIDERED: &str = "cas_gc_refs_considered_total";

/// Refs deleted by TTL eviction.
pub const GC_REFS_DELETED: &str = "cas_gc_refs_deleted_total";

/// Blobs old enough to be checked for reachability.
pub const GC_BLOBS_CONSIDERED: &str = "cas_gc_blobs_considered_total";

/// Orphaned blobs deleted.
pub const GC_BLOBS_DELETED: &str = "cas_gc_blobs_deleted_total";

/// Dangling reference edges pruned from the blob reference index.
pub const GC_STALE_REFERENCES_PRUNED: &str = "cas_gc_stale_references_pruned_total";

/// Record-level errors absorbed by a run.
pub const GC_ERRORS: &str = "cas_gc_errors_total";

/// Duration of collector runs.
pub const GC_RUN_DURATION: &str = "cas_gc_run_duration_seconds";

/// Registers all GC metric descriptions.
///
/// Call this once at application startup after installing a metrics recorder.
pub fn register_metrics() {
    describe_counter!(GC_REFS_CONSIDERED, "Total refs evaluated by TTL eviction");
    describe_counter!(GC_REFS_DELETED, "Total refs deleted by TTL eviction");
    describe_counter!(GC_BLOBS_CONSIDERED, "Total blobs checked for reachability");
    describe_counter!(GC_BLOBS_DELETED, "Total orphaned blobs deleted");
    describe_counter!(
        GC_STALE_REFERENCES_PRUNED,
        "Total dangling blob references pruned"
    );
    describe_counter!(GC_ERRORS, "Total GC errors encountered");
    describe_histogram!(GC_RUN_DURATION, "Duration of GC runs in seconds");
}

/// Records the duration of a collector run.
pub fn record_run_duration(collector: &'static str, duration_secs: f64) {
    histogram!(GC_RUN_DURATION, "collector" => collector).record(duration_secs);
}

/// Point-in-time copy of [`GcCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcCountersSnapshot {
    pub refs_considered: u64,
    pub refs_deleted: u64,
    pub blobs_considered: u64,
    pub blobs_deleted: u64,
    pub stale_references_pruned: u64,
    pub errors: u64,
}

/// Monotonic GC counters. Never reset.
#[derive(Debug, Default)]
pub struct GcCounters {
    refs_considered: AtomicU64,
    refs_deleted: AtomicU64,
    blobs_considered: AtomicU64,
    blobs_deleted: AtomicU64,
    stale_references_pruned: AtomicU64,
    errors: AtomicU64,
}

impl GcCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ref_considered(&self) {
        self.refs_considered.fetch_add(1, Ordering::Relaxed);
        counter!(GC_REFS_CONSIDERED).increment(1);
    }

    pub fn ref_deleted(&self) {
        self.refs_deleted.fetch_add(1, Ordering::Relaxed);
        counter!(GC_REFS_DELETED).increment(1);
    }

    pub fn blob_considered(&self) {
        self.blobs_considered.fetch_add(1, Ordering::Relaxed);
        counter!(GC_BLOBS_CONSIDERED).increment(1);
    }

    pub fn blob_deleted(&self) {
        self.blobs_deleted.fetch_add(1, Ordering::Relaxed);
        counter!(GC_BLOBS_DELETED).increment(1);
    }

    pub fn stale_references_pruned(&self, count: u64) {
        self.stale_references_pruned
            .fetch_add(count, Ordering::Relaxed);
        counter!(GC_STALE_REFERENCES_PRUNED).increment(count);
    }

    pub fn error(&self, phase: &'static str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!(GC_ERRORS, "phase" => phase).increment(1);
    }

    pub fn snapshot(&self) -> GcCountersSnapshot {
        GcCountersSnapshot {
            refs_considered: self.refs_considered.load(Ordering::Relaxed),
            refs_deleted: self.refs_deleted.load(Ordering::Relaxed),
            blobs_considered: self.blobs_considered.load(Ordering::Relaxed),
            blobs_deleted: self.blobs_deleted.load(Ordering::Relaxed),
            stale_references_pruned: self.stale_references_pruned.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let counters = GcCounters::new();
        counters.ref_considered();
        counters.ref_considered();
        counters.ref_deleted();
        counters.stale_references_pruned(3);
        counters.error("ref_ttl");

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.refs_considered, 2);
        assert_eq!(snapshot.refs_deleted, 1);
        assert_eq!(snapshot.stale_references_pruned, 3);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.blobs_deleted, 0);
    }
}
