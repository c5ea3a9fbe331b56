//! GC Core Module - collection cycle orchestration
//!
//! A collection runs on the thread that requested it, with the world stopped:
//!
//! ```text
//!   collect(cause, full)
//!     ├─ re-entry check          (same thread inside a collection: fatal)
//!     ├─ stop the world
//!     ├─ drop stale allocation requests (epoch moved on)
//!     ├─ incremental or complete?  (policy, or forced without remembered set)
//!     ├─ watchers.before / policy.on_collection_begin
//!     ├─ retire mutator chunks into eden
//!     ├─ verify (optional)
//!     ├─ run the collection; escalate to complete if the policy asks
//!     ├─ trim the chunk free list
//!     ├─ verify (optional)
//!     └─ record stats, log events, watchers.after, policy.on_collection_end
//! ```

use crate::heap::state::HeapState;
use crate::heap::Heap;
use crate::logging::{GcEvent, GcLogger, GcLoggerConfig};
use crate::policy::{CollectionPolicy, HeapSizes};
use crate::relocate::{Collection, CollectionOutcome};
use crate::stats::{CollectionRecord, CollectionStats, GcTimer};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Why a collection was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcCause {
    /// Requested through [`Heap::collect`]
    Explicit,
    /// The policy asked for one on the allocation slow path
    OnAllocation,
    /// A mutator could not get chunk memory
    AllocationFailure,
}

impl std::fmt::Display for GcCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GcCause::Explicit => "explicit",
            GcCause::OnAllocation => "on-allocation",
            GcCause::AllocationFailure => "allocation-failure",
        };
        f.write_str(name)
    }
}

/// What watchers are told about a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionInfo {
    pub epoch: u64,
    pub cause: GcCause,
    pub complete: bool,
    /// Sizes when the world stopped
    pub sizes: HeapSizes,
}

/// Hooks run while the world is stopped, before and after every collection
///
/// Watchers must not touch the heap: every heap operation waits for the world
/// to restart, and requesting a collection from a watcher is fatal.
pub trait CollectionWatcher: Send + Sync {
    fn before_collection(&self, _info: &CollectionInfo) {}

    fn after_collection(&self, _info: &CollectionInfo, _record: &CollectionRecord) {}
}

/// GarbageCollector - runs collections for one heap
pub struct GarbageCollector {
    policy: Box<dyn CollectionPolicy>,
    stats: CollectionStats,
    logger: GcLogger,
    /// Number of finished collections
    epoch: AtomicU64,
    collector_thread: Mutex<Option<ThreadId>>,
    watchers: RwLock<Vec<Arc<dyn CollectionWatcher>>>,
}

impl GarbageCollector {
    pub fn new(policy: Box<dyn CollectionPolicy>, verbose: bool) -> Self {
        let logger = if verbose {
            GcLogger::verbose()
        } else {
            GcLogger::new(GcLoggerConfig::default())
        };
        Self {
            policy,
            stats: CollectionStats::new(),
            logger,
            epoch: AtomicU64::new(0),
            collector_thread: Mutex::new(None),
            watchers: RwLock::new(Vec::new()),
        }
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn is_collecting(&self) -> bool {
        self.collector_thread.lock().is_some()
    }

    pub fn policy(&self) -> &dyn CollectionPolicy {
        self.policy.as_ref()
    }

    pub fn stats(&self) -> &CollectionStats {
        &self.stats
    }

    pub fn logger(&self) -> &GcLogger {
        &self.logger
    }

    pub fn add_watcher(&self, watcher: Arc<dyn CollectionWatcher>) {
        self.watchers.write().push(watcher);
    }

    /// Key figures for diagnostics output
    pub fn diagnostics(&self) -> IndexMap<String, String> {
        let summary = self.stats.summary();
        let mut diag = IndexMap::new();
        diag.insert("policy".to_string(), self.policy.name().to_string());
        diag.insert("epoch".to_string(), self.epoch().to_string());
        diag.insert(
            "incremental_collections".to_string(),
            summary.incremental_count.to_string(),
        );
        diag.insert(
            "complete_collections".to_string(),
            summary.complete_count.to_string(),
        );
        diag.insert(
            "collected_bytes".to_string(),
            summary.collected_bytes.to_string(),
        );
        diag.insert(
            "promoted_bytes".to_string(),
            summary.promoted_bytes.to_string(),
        );
        diag.insert(
            "avg_pause_ms".to_string(),
            format!("{:.3}", summary.avg_pause_ms),
        );
        diag.insert(
            "max_pause_ms".to_string(),
            format!("{:.3}", summary.max_pause_ms),
        );
        diag.insert(
            "tenuring_age".to_string(),
            self.policy.tenuring_age().to_string(),
        );
        diag
    }

    /// Run a collection unless `expected_epoch` is stale
    ///
    /// Returns `None` when the request was dropped because another collection
    /// finished after it was issued.
    pub(crate) fn collect(
        &self,
        heap: &Heap,
        cause: GcCause,
        full: bool,
        expected_epoch: Option<u64>,
    ) -> Option<CollectionRecord> {
        let me = thread::current().id();
        if *self.collector_thread.lock() == Some(me) {
            crate::fatal!("collection ({}) requested from inside a collection", cause);
        }

        let _world = heap.safepoint.stop_the_world();
        if let Some(expected) = expected_epoch {
            if self.epoch() != expected {
                log::debug!(
                    "dropping {} collection request: collection {} already ran",
                    cause,
                    self.epoch()
                );
                return None;
            }
        }

        *self.collector_thread.lock() = Some(me);
        let record = self.run(heap, cause, full);
        *self.collector_thread.lock() = None;
        Some(record)
    }

    fn run(&self, heap: &Heap, cause: GcCause, full: bool) -> CollectionRecord {
        let timer = GcTimer::new();
        let epoch = self.epoch() + 1;
        let sizes = heap.heap_sizes();
        let complete = full
            || !heap.remembered_set.is_enabled()
            || self.policy.should_collect_completely(false, &sizes);
        let info = CollectionInfo {
            epoch,
            cause,
            complete,
            sizes,
        };

        let watchers: Vec<Arc<dyn CollectionWatcher>> = self.watchers.read().clone();
        for watcher in &watchers {
            watcher.before_collection(&info);
        }
        self.policy.on_collection_begin(complete, &sizes);
        self.logger.log(GcEvent::CycleStart {
            epoch,
            kind: kind_name(complete).to_string(),
            cause: cause.to_string(),
        });

        let mut state = heap.state.lock();
        heap.retire_mutators(&mut state);
        if heap.config.verify_before_gc {
            self.verify_at(heap, &state, "before");
        }
        let young_before = state.young_chunk_bytes();
        let old_before = state.old_chunk_bytes();
        let tenuring_age = self.policy.tenuring_age();

        let mut outcome = Collection::new(heap, &mut state, complete, tenuring_age).run();
        if !complete {
            let sizes = heap.sizes_of(&state);
            if self.policy.should_collect_completely(true, &sizes) {
                log::debug!("collection {} escalates to a complete collection", epoch);
                let second = Collection::new(heap, &mut state, true, tenuring_age).run();
                outcome.merge(second);
            }
        }

        heap.chunks
            .trim_free_list(self.policy.maximum_free_aligned_chunk_bytes());
        heap.publish_sizes(&state);
        if heap.config.verify_after_gc {
            self.verify_at(heap, &state, "after");
        }

        let young_after = state.young_chunk_bytes();
        let old_after = state.old_chunk_bytes();
        drop(state);

        let record = CollectionRecord {
            epoch,
            cause: cause.to_string(),
            complete: outcome.complete,
            young_chunk_bytes_before: young_before,
            young_chunk_bytes_after: young_after,
            old_chunk_bytes_before: old_before,
            old_chunk_bytes_after: old_after,
            copied_bytes: outcome.copied_bytes,
            promoted_bytes: outcome.promoted_bytes + outcome.tenured_bytes,
            collected_bytes: (young_before + old_before).saturating_sub(young_after + old_after),
            duration_ns: timer.elapsed_ns(),
            phases: outcome
                .phases
                .iter()
                .map(|(phase, d)| (phase.to_string(), d.as_nanos() as u64))
                .collect(),
        };
        self.stats.record(record.clone());
        self.epoch.store(epoch, Ordering::Release);
        self.log_outcome(heap, epoch, &outcome, &record);

        self.policy
            .on_collection_end(outcome.complete, &heap.heap_sizes());
        let info = CollectionInfo {
            complete: outcome.complete,
            ..info
        };
        for watcher in &watchers {
            watcher.after_collection(&info, &record);
        }
        record
    }

    /// Verify the heap, escalating failures if configured to
    fn verify_at(&self, heap: &Heap, state: &HeapState, when: &str) {
        let failures = crate::heap::verify::verify_heap(heap, state);
        if failures.is_empty() {
            return;
        }
        self.logger.log(GcEvent::VerificationFailure {
            when: when.to_string(),
            failures: failures.len(),
        });
        if heap.config.verify_fatal {
            crate::fatal!(
                "heap verification {} collection failed: {}",
                when,
                failures.join("; ")
            );
        }
    }

    fn log_outcome(
        &self,
        heap: &Heap,
        epoch: u64,
        outcome: &CollectionOutcome,
        record: &CollectionRecord,
    ) {
        for (phase, duration) in outcome.phases.iter() {
            self.logger.log(GcEvent::PhaseEnd {
                epoch,
                phase: phase.to_string(),
                duration_ms: duration.as_secs_f64() * 1000.0,
            });
        }
        self.logger.log(GcEvent::PromotionStats {
            copied_objects: outcome.copied_objects + outcome.promoted_objects,
            copied_bytes: outcome.copied_bytes + outcome.promoted_bytes,
            promoted_chunks: outcome.promoted_chunks,
            tenured_bytes: outcome.promoted_bytes + outcome.tenured_bytes,
        });
        if outcome.marked_objects > 0 || outcome.swept_chunks > 0 {
            self.logger.log(GcEvent::CompactionStats {
                marked_objects: outcome.marked_objects,
                moved_bytes: outcome.moved_bytes,
                swept_chunks: outcome.swept_chunks,
                released_chunks: outcome.released_chunks,
            });
        }
        self.logger.log(GcEvent::ReferenceStats {
            cleared: outcome.references_cleared,
            kept: outcome.references_kept,
        });
        let sizes = heap.heap_sizes();
        self.logger.log(GcEvent::HeapStats {
            young_bytes: sizes.young_bytes(),
            old_bytes: sizes.old_bytes,
            committed_bytes: sizes.committed_bytes,
            free_list_bytes: sizes.free_list_bytes,
        });
        self.logger.log(GcEvent::CycleEnd {
            epoch,
            kind: kind_name(outcome.complete).to_string(),
            duration_ms: record.duration_ns as f64 / 1_000_000.0,
            collected_bytes: record.collected_bytes,
        });
    }
}

fn kind_name(complete: bool) -> &'static str {
    if complete {
        "complete"
    } else {
        "incremental"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;
    use crate::object::ObjectShape;
    use crate::policy::{AlwaysCompletely, OnlyIncrementally};
    use crate::util::constants::{KB, MB};
    use std::sync::atomic::AtomicUsize;

    fn config() -> HeapConfig {
        HeapConfig {
            max_young_size: 8 * MB,
            verify_after_gc: true,
            verify_fatal: true,
            ..HeapConfig::with_chunk_size(128 * KB).with_max_heap_size(32 * MB)
        }
    }

    #[derive(Default)]
    struct CountingWatcher {
        before: AtomicUsize,
        after: AtomicUsize,
    }

    impl CollectionWatcher for CountingWatcher {
        fn before_collection(&self, _info: &CollectionInfo) {
            self.before.fetch_add(1, Ordering::Relaxed);
        }

        fn after_collection(&self, info: &CollectionInfo, record: &CollectionRecord) {
            assert_eq!(info.epoch, record.epoch);
            self.after.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_epoch_advances_per_collection() {
        let policy = OnlyIncrementally::from_config(&config()).expect("policy");
        let heap = Heap::with_policy(config(), Box::new(policy)).expect("heap");
        assert_eq!(heap.epoch(), 0);
        let record = heap.collect(GcCause::Explicit, false).expect("ran");
        assert_eq!(record.epoch, 1);
        assert!(!record.complete);
        let record = heap.collect(GcCause::Explicit, true).expect("ran");
        assert_eq!(record.epoch, 2);
        assert!(record.complete);
        assert_eq!(heap.collection_stats().incremental_count, 1);
        assert_eq!(heap.collection_stats().complete_count, 1);
    }

    #[test]
    fn test_stale_allocation_request_is_dropped() {
        let policy = OnlyIncrementally::from_config(&config()).expect("policy");
        let heap = Heap::with_policy(config(), Box::new(policy)).expect("heap");
        let issued = heap.epoch();
        heap.collect(GcCause::Explicit, false);
        assert!(heap
            .collector
            .collect(&heap, GcCause::OnAllocation, false, Some(issued))
            .is_none());
        assert_eq!(heap.epoch(), 1);
    }

    #[test]
    fn test_policy_forces_complete_collections() {
        let policy = AlwaysCompletely::from_config(&config()).expect("policy");
        let heap = Heap::with_policy(config(), Box::new(policy)).expect("heap");
        let record = heap.collect(GcCause::Explicit, false).expect("ran");
        assert!(record.complete);
    }

    #[test]
    fn test_watchers_see_every_collection() {
        let heap = Heap::new(config()).expect("heap");
        let watcher = Arc::new(CountingWatcher::default());
        heap.add_watcher(watcher.clone());
        heap.collect(GcCause::Explicit, false);
        heap.collect(GcCause::Explicit, true);
        assert_eq!(watcher.before.load(Ordering::Relaxed), 2);
        assert_eq!(watcher.after.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_cycle_events_are_logged() {
        let heap = Heap::new(config()).expect("heap");
        let mutator = heap.attach_mutator();
        mutator.allocate(&ObjectShape::plain(0, 32)).expect("object");
        heap.collect(GcCause::Explicit, false);
        let events = heap.logger().events();
        assert!(matches!(events.first(), Some(GcEvent::CycleStart { epoch: 1, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, GcEvent::CycleEnd { epoch: 1, .. })));
        let diag = heap.collector.diagnostics();
        assert_eq!(diag.get("epoch").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_cause_display() {
        assert_eq!(GcCause::AllocationFailure.to_string(), "allocation-failure");
        assert_eq!(GcCause::Explicit.to_string(), "explicit");
    }
}
