//! Test Utilities for the genscav integration suite
//!
//! A [`HeapFixture`] owns a heap and one attached mutator, with verification
//! after every collection made fatal: a broken invariant fails the test inside
//! the collection that broke it, not somewhere later.
//!
//! The assertion helpers below have no tolerances. An address that is not
//! unique, not aligned, or not where the heap says it is, is a bug.

#![allow(dead_code)]

use genscav::object::{header, payload_start};
use genscav::policy::CollectionPolicy;
use genscav::{
    AlwaysCompletely, CollectionRecord, GcCause, Handle, Heap, HeapConfig, Mutator,
    ObjectShape, OldGenerationKind, OnlyIncrementally,
};
use std::collections::HashSet;
use std::sync::Arc;

pub const KB: usize = 1024;
pub const MB: usize = 1024 * 1024;

/// Minimum alignment of every object address
pub const OBJECT_ALIGNMENT: usize = 8;

/// ============================================================================
/// HEAP FIXTURE
/// ============================================================================

/// Configuration every fixture starts from
///
/// Verification runs after each collection and panics on the first failure.
pub fn test_config(chunk_size: usize, max_heap_size: usize) -> HeapConfig {
    HeapConfig {
        verify_before_gc: true,
        verify_after_gc: true,
        verify_fatal: true,
        zap_chunks: true,
        ..HeapConfig::with_chunk_size(chunk_size).with_max_heap_size(max_heap_size)
    }
}

/// Test fixture: a heap and one mutator allocating in it
pub struct HeapFixture {
    pub heap: Arc<Heap>,
    pub mutator: Mutator,
}

impl HeapFixture {
    /// Default policy, 128 KiB chunks, 32 MiB heap
    pub fn new() -> Self {
        Self::with_config(test_config(128 * KB, 32 * MB))
    }

    pub fn with_config(config: HeapConfig) -> Self {
        let heap = Heap::new(config).expect("heap should build from a valid config");
        Self::attach(heap)
    }

    pub fn with_policy(config: HeapConfig, policy: Box<dyn CollectionPolicy>) -> Self {
        let heap = Heap::with_policy(config, policy).expect("heap should build from a valid config");
        Self::attach(heap)
    }

    /// Collections happen only when requested; incremental unless forced
    pub fn incremental(config: HeapConfig) -> Self {
        let policy = OnlyIncrementally::from_config(&config).expect("policy");
        Self::with_policy(config, Box::new(policy))
    }

    /// Every collection is complete
    pub fn complete(config: HeapConfig) -> Self {
        let policy = AlwaysCompletely::from_config(&config).expect("policy");
        Self::with_policy(config, Box::new(policy))
    }

    /// Incremental-only fixture with the given old generation strategy
    pub fn with_old_generation(kind: OldGenerationKind) -> Self {
        Self::incremental(HeapConfig {
            old_generation: kind,
            ..test_config(128 * KB, 32 * MB)
        })
    }

    fn attach(heap: Arc<Heap>) -> Self {
        let mutator = heap.attach_mutator();
        Self { heap, mutator }
    }

    /// Allocate an object with `refs` null reference slots and `payload` bytes
    #[track_caller]
    pub fn alloc(&self, refs: usize, payload: usize) -> usize {
        self.mutator
            .allocate(&ObjectShape::plain(refs, payload))
            .unwrap_or_else(|e| panic!("allocation of {} refs + {} bytes failed: {}", refs, payload, e))
    }

    /// Allocate an object carrying `stamp` as the first payload word
    #[track_caller]
    pub fn alloc_stamped(&self, refs: usize, stamp: u64) -> usize {
        let obj = self.alloc(refs, 8);
        unsafe { write_stamp(obj, stamp) };
        obj
    }

    pub fn root(&self, obj: usize) -> Handle {
        self.heap.new_handle(obj)
    }

    #[track_caller]
    pub fn resolve(&self, handle: Handle) -> usize {
        self.heap.resolve(handle).expect("handle should be live")
    }

    /// `holder.slots[index] = target`, through the write barrier
    #[track_caller]
    pub fn link(&self, holder: usize, index: usize, target: usize) {
        unsafe { self.heap.write_reference(holder, index, target) }.expect("store");
    }

    #[track_caller]
    pub fn get(&self, holder: usize, index: usize) -> usize {
        unsafe { self.heap.read_reference(holder, index) }.expect("load")
    }

    /// Run an incremental collection (unless the policy escalates it)
    #[track_caller]
    pub fn scavenge(&self) -> CollectionRecord {
        self.heap
            .collect(GcCause::Explicit, false)
            .expect("explicit collections are never dropped")
    }

    #[track_caller]
    pub fn collect_completely(&self) -> CollectionRecord {
        let record = self
            .heap
            .collect(GcCause::Explicit, true)
            .expect("explicit collections are never dropped");
        assert!(record.complete, "a forced collection must be complete");
        record
    }

    #[track_caller]
    pub fn verify(&self) {
        if let Err(e) = self.heap.verify() {
            panic!("{}", e);
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.heap.layout().chunk_size
    }
}

impl Default for HeapFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `stamp` as the first payload word of `obj`
///
/// # Safety
/// `obj` must be a live object with at least 8 payload bytes.
pub unsafe fn write_stamp(obj: usize, stamp: u64) {
    *(payload_start(obj) as *mut u64) = stamp;
}

/// First payload word of `obj`
///
/// # Safety
/// `obj` must be a live object with at least 8 payload bytes.
pub unsafe fn read_stamp(obj: usize) -> u64 {
    *(payload_start(obj) as *const u64)
}

/// ============================================================================
/// STRICT ASSERTION HELPERS
/// ============================================================================

/// Assert that all addresses are unique
///
/// **Bug this finds:** Racing bump pointers, chunks handed out twice
#[track_caller]
pub fn assert_all_addresses_unique(addresses: &[usize], context: &str) {
    let unique: HashSet<_> = addresses.iter().collect();
    assert_eq!(
        unique.len(),
        addresses.len(),
        "{}: found {} duplicate addresses out of {}",
        context,
        addresses.len() - unique.len(),
        addresses.len()
    );
}

/// Assert that an address is properly aligned
///
/// **Bug this finds:** Size rounding bugs in the allocator or the copier
#[track_caller]
pub fn assert_address_aligned(address: usize, alignment: usize, context: &str) {
    assert_eq!(
        address % alignment,
        0,
        "{}: address {:#x} is not {}-byte aligned",
        context,
        address,
        alignment
    );
}

/// Assert that objects do not overlap
///
/// **Bug this finds:** Bump pointer handing out claimed bytes
#[track_caller]
pub fn assert_no_overlap(objects: &[(usize, usize)], context: &str) {
    let mut sorted = objects.to_vec();
    sorted.sort_unstable();
    for pair in sorted.windows(2) {
        let (a, a_size) = pair[0];
        let (b, _) = pair[1];
        assert!(
            a + a_size <= b,
            "{}: object {:#x} (+{}) overlaps object {:#x}",
            context,
            a,
            a_size,
            b
        );
    }
}

/// Assert that `obj` is an object of `size` bytes carrying `stamp`
///
/// **Bug this finds:** Copies that lose payload, forwarding to the wrong copy
#[track_caller]
pub fn assert_stamped(obj: usize, stamp: u64, context: &str) {
    assert_ne!(obj, 0, "{}: expected an object, found null", context);
    let h = unsafe { header(obj) };
    assert!(!h.is_forwarded(), "{}: object {:#x} is a forwarding stub", context, obj);
    assert_eq!(
        unsafe { read_stamp(obj) },
        stamp,
        "{}: object {:#x} lost its payload",
        context,
        obj
    );
}

/// Assert that the heap passes full verification
#[track_caller]
pub fn assert_heap_valid(heap: &Heap, context: &str) {
    if let Err(e) = heap.verify() {
        panic!("{}: {}", context, e);
    }
}
