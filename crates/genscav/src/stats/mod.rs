//! Stats Module - Collection Accounting
//!
//! Counters the collector updates once per collection:
//! - incremental and complete collection counts and their total time
//! - bytes collected, copied within the young generation, and tenured
//! - young and old generation sizes before and after the last collection
//! - pause time distribution
//!
//! [`CollectionStats::summary`] returns a serde-serializable snapshot.

pub mod histogram;
pub mod timer;

pub use histogram::Histogram;
pub use timer::{GcTimer, PhaseTimers};

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// What one collection did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionRecord {
    pub epoch: u64,
    pub cause: String,
    /// True when the old generation was collected as well
    pub complete: bool,
    pub young_chunk_bytes_before: usize,
    pub young_chunk_bytes_after: usize,
    pub old_chunk_bytes_before: usize,
    pub old_chunk_bytes_after: usize,
    /// Bytes of objects copied into survivor spaces
    pub copied_bytes: usize,
    /// Bytes of objects that entered the old generation
    pub promoted_bytes: usize,
    /// Chunk bytes the collection gave back
    pub collected_bytes: usize,
    pub duration_ns: u64,
    /// Phase name and nanoseconds, in execution order
    pub phases: Vec<(String, u64)>,
}

/// CollectionStats - running totals for a heap
pub struct CollectionStats {
    incremental_count: AtomicU64,
    complete_count: AtomicU64,
    incremental_nanos: AtomicU64,
    complete_nanos: AtomicU64,
    collected_bytes: AtomicU64,
    copied_bytes: AtomicU64,
    promoted_bytes: AtomicU64,
    pause_histogram: Histogram,
    last: Mutex<Option<CollectionRecord>>,
    start_time: Instant,
}

impl CollectionStats {
    pub fn new() -> Self {
        Self {
            incremental_count: AtomicU64::new(0),
            complete_count: AtomicU64::new(0),
            incremental_nanos: AtomicU64::new(0),
            complete_nanos: AtomicU64::new(0),
            collected_bytes: AtomicU64::new(0),
            copied_bytes: AtomicU64::new(0),
            promoted_bytes: AtomicU64::new(0),
            pause_histogram: Histogram::new(),
            last: Mutex::new(None),
            start_time: Instant::now(),
        }
    }

    /// Fold one finished collection into the totals
    pub fn record(&self, record: CollectionRecord) {
        if record.complete {
            self.complete_count.fetch_add(1, Ordering::Relaxed);
            self.complete_nanos
                .fetch_add(record.duration_ns, Ordering::Relaxed);
        } else {
            self.incremental_count.fetch_add(1, Ordering::Relaxed);
            self.incremental_nanos
                .fetch_add(record.duration_ns, Ordering::Relaxed);
        }
        self.collected_bytes
            .fetch_add(record.collected_bytes as u64, Ordering::Relaxed);
        self.copied_bytes
            .fetch_add(record.copied_bytes as u64, Ordering::Relaxed);
        self.promoted_bytes
            .fetch_add(record.promoted_bytes as u64, Ordering::Relaxed);
        self.pause_histogram.record(record.duration_ns);
        *self.last.lock() = Some(record);
    }

    pub fn incremental_count(&self) -> u64 {
        self.incremental_count.load(Ordering::Relaxed)
    }

    pub fn complete_count(&self) -> u64 {
        self.complete_count.load(Ordering::Relaxed)
    }

    pub fn collection_count(&self) -> u64 {
        self.incremental_count() + self.complete_count()
    }

    pub fn last_collection(&self) -> Option<CollectionRecord> {
        self.last.lock().clone()
    }

    pub fn pause_histogram(&self) -> &Histogram {
        &self.pause_histogram
    }

    /// Get summary statistics
    pub fn summary(&self) -> CollectionSummary {
        CollectionSummary {
            incremental_count: self.incremental_count(),
            complete_count: self.complete_count(),
            incremental_nanos: self.incremental_nanos.load(Ordering::Relaxed),
            complete_nanos: self.complete_nanos.load(Ordering::Relaxed),
            collected_bytes: self.collected_bytes.load(Ordering::Relaxed),
            copied_bytes: self.copied_bytes.load(Ordering::Relaxed),
            promoted_bytes: self.promoted_bytes.load(Ordering::Relaxed),
            avg_pause_ms: self.pause_histogram.mean() as f64 / 1_000_000.0,
            max_pause_ms: self.pause_histogram.max() as f64 / 1_000_000.0,
            p99_pause_ms: self.pause_histogram.p99() as f64 / 1_000_000.0,
            uptime_secs: self.start_time.elapsed().as_secs(),
            last: self.last_collection(),
        }
    }

    pub fn reset(&self) {
        self.incremental_count.store(0, Ordering::Relaxed);
        self.complete_count.store(0, Ordering::Relaxed);
        self.incremental_nanos.store(0, Ordering::Relaxed);
        self.complete_nanos.store(0, Ordering::Relaxed);
        self.collected_bytes.store(0, Ordering::Relaxed);
        self.copied_bytes.store(0, Ordering::Relaxed);
        self.promoted_bytes.store(0, Ordering::Relaxed);
        self.pause_histogram.clear();
        *self.last.lock() = None;
    }
}

impl Default for CollectionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionSummary {
    pub incremental_count: u64,
    pub complete_count: u64,
    pub incremental_nanos: u64,
    pub complete_nanos: u64,
    pub collected_bytes: u64,
    pub copied_bytes: u64,
    pub promoted_bytes: u64,
    pub avg_pause_ms: f64,
    pub max_pause_ms: f64,
    pub p99_pause_ms: f64,
    pub uptime_secs: u64,
    pub last: Option<CollectionRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_splits_by_kind() {
        let stats = CollectionStats::new();
        stats.record(CollectionRecord {
            epoch: 1,
            complete: false,
            copied_bytes: 100,
            collected_bytes: 4096,
            duration_ns: 1_000,
            ..Default::default()
        });
        stats.record(CollectionRecord {
            epoch: 2,
            complete: true,
            promoted_bytes: 50,
            duration_ns: 3_000,
            ..Default::default()
        });

        let summary = stats.summary();
        assert_eq!(summary.incremental_count, 1);
        assert_eq!(summary.complete_count, 1);
        assert_eq!(summary.incremental_nanos, 1_000);
        assert_eq!(summary.complete_nanos, 3_000);
        assert_eq!(summary.copied_bytes, 100);
        assert_eq!(summary.promoted_bytes, 50);
        assert_eq!(summary.collected_bytes, 4096);
        assert_eq!(summary.last.map(|r| r.epoch), Some(2));
    }

    #[test]
    fn test_summary_serializes() {
        let stats = CollectionStats::new();
        stats.record(CollectionRecord::default());
        let json = serde_json::to_string(&stats.summary()).expect("serialize");
        assert!(json.contains("\"incremental_count\":1"));
    }

    #[test]
    fn test_reset() {
        let stats = CollectionStats::new();
        stats.record(CollectionRecord::default());
        stats.reset();
        assert_eq!(stats.collection_count(), 0);
        assert!(stats.last_collection().is_none());
    }
}
