//! Chunk Allocator - produces and recycles chunks
//!
//! ```text
//!   acquire_aligned ──► reserve in-use bytes (checked against the heap limit)
//!                            │
//!                            ▼
//!                     free list pop (CAS) ──hit──► initialize ──► chunk
//!                            │ miss
//!                            ▼
//!                     OsMemory::allocate_aligned
//!
//!   release_aligned ──► zap ──► free list push (mutex, safepoint only)
//!   trim_free_list  ──► pop until free bytes <= cap ──► OsMemory::free_aligned
//!
//!   acquire_unaligned / release_unaligned ──► OsMemory::map / unmap, never cached
//! ```
//!
//! The free list is singly linked through the `free_next` field of each chunk
//! header. Pops race with each other (mutators refreshing their chunks) and use a
//! CAS loop; pushes only happen while the collector holds the world, so a popped
//! head can never be pushed back concurrently and ABA cannot occur.
//!
//! Every chunk handed out is first reserved against one in-use counter, so
//! concurrent mutators cannot pass the limit check together and then all reuse
//! cached chunks.
//!
//! The allocator knows nothing about spaces or generations.

use crate::barrier::RememberedSet;
use crate::error::{GcError, Result};
use crate::heap::chunk::{ChunkLayout, ChunkRef};
use crate::heap::{aligned, unaligned};
use crate::memory::{fill_memory, OsMemory, ZAP_CONSUMED, ZAP_PRODUCED};
use crate::util::AtomicUtils;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

const SALT_STEP: u64 = 0x9E37_79B9_7F4A_7C15;

/// Who is asking for a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkRequest {
    /// A mutator refreshing its allocation chunk; subject to the heap limit
    Mutator,
    /// The collector placing survivors; may exceed the heap limit
    Collector,
}

/// Counters of the chunk allocator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkAllocatorStats {
    pub aligned_produced: u64,
    pub aligned_reused: u64,
    pub aligned_freed: u64,
    pub aligned_released_to_os: u64,
    pub unaligned_produced: u64,
    pub unaligned_released: u64,
    pub free_list_count: usize,
    pub free_list_bytes: usize,
    pub committed_bytes: usize,
}

/// ChunkAllocator - the only component that talks to [`OsMemory`]
pub struct ChunkAllocator {
    layout: ChunkLayout,
    remembered_set: RememberedSet,
    os: OsMemory,
    zap: bool,

    free_head: AtomicUsize,
    push_lock: Mutex<()>,
    free_count: AtomicUsize,
    free_bytes: AtomicUsize,

    committed: AtomicUsize,
    in_use: AtomicUsize,
    limit: AtomicUsize,
    next_salt: AtomicU64,

    aligned_produced: AtomicU64,
    aligned_reused: AtomicU64,
    aligned_freed: AtomicU64,
    aligned_released_to_os: AtomicU64,
    unaligned_produced: AtomicU64,
    unaligned_released: AtomicU64,
}

impl ChunkAllocator {
    pub fn new(
        layout: ChunkLayout,
        remembered_set: RememberedSet,
        limit: usize,
        zap: bool,
    ) -> Result<Self> {
        Ok(Self {
            os: OsMemory::new(layout.chunk_size)?,
            layout,
            remembered_set,
            zap,
            free_head: AtomicUsize::new(0),
            push_lock: Mutex::new(()),
            free_count: AtomicUsize::new(0),
            free_bytes: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            limit: AtomicUsize::new(limit),
            next_salt: AtomicU64::new(SALT_STEP),
            aligned_produced: AtomicU64::new(0),
            aligned_reused: AtomicU64::new(0),
            aligned_freed: AtomicU64::new(0),
            aligned_released_to_os: AtomicU64::new(0),
            unaligned_produced: AtomicU64::new(0),
            unaligned_released: AtomicU64::new(0),
        })
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn page_size(&self) -> usize {
        self.os.page_size()
    }

    /// Bytes of chunk memory currently held, free list included
    pub fn committed_bytes(&self) -> usize {
        self.committed.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Relaxed);
    }

    pub fn free_list_count(&self) -> usize {
        self.free_count.load(Ordering::Acquire)
    }

    pub fn free_list_bytes(&self) -> usize {
        self.free_bytes.load(Ordering::Acquire)
    }

    fn next_salt(&self) -> u64 {
        self.next_salt.fetch_add(SALT_STEP, Ordering::Relaxed)
    }

    /// Account for `bytes` of new memory, refusing mutators beyond the limit
    fn reserve(&self, bytes: usize, request: ChunkRequest) -> Result<()> {
        let limit = self.limit();
        let mut current = self.committed.load(Ordering::Relaxed);
        loop {
            let new = current.saturating_add(bytes);
            if request == ChunkRequest::Mutator && new > limit {
                return Err(GcError::OutOfMemory {
                    requested: bytes,
                    available: limit.saturating_sub(current),
                });
            }
            match self.committed.compare_exchange_weak(
                current,
                new,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn unreserve(&self, bytes: usize) {
        if AtomicUtils::checked_sub(&self.committed, bytes).is_none() {
            crate::fatal!(
                "committed bytes {} would drop below zero releasing {}",
                self.committed_bytes(),
                bytes
            );
        }
    }

    // === Aligned chunks ===

    /// Bytes of chunks handed out and not yet released
    pub fn in_use_bytes(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Reserve `bytes` of in-use memory, refusing mutators beyond the limit
    ///
    /// Taken before the free list is consulted: cached chunks count against the
    /// limit once they are handed out again.
    fn reserve_in_use(&self, bytes: usize, request: ChunkRequest) -> Result<()> {
        let limit = self.limit();
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let new = current.saturating_add(bytes);
                (request == ChunkRequest::Collector || new <= limit).then_some(new)
            })
            .map(|_| ())
            .map_err(|current| GcError::OutOfMemory {
                requested: bytes,
                available: limit.saturating_sub(current),
            })
    }

    fn unreserve_in_use(&self, bytes: usize) {
        if AtomicUtils::checked_sub(&self.in_use, bytes).is_none() {
            crate::fatal!(
                "in-use bytes {} would drop below zero releasing {}",
                self.in_use_bytes(),
                bytes
            );
        }
    }

    /// Produce an initialized, empty aligned chunk
    pub fn acquire_aligned(&self, request: ChunkRequest) -> Result<ChunkRef> {
        let size = self.layout.chunk_size;
        self.reserve_in_use(size, request)?;
        let chunk = match self.pop_free() {
            Some(chunk) => {
                self.aligned_reused.fetch_add(1, Ordering::Relaxed);
                chunk
            }
            None => {
                if let Err(e) = self.reserve(size, request) {
                    self.unreserve_in_use(size);
                    return Err(e);
                }
                let addr = match self.os.allocate_aligned() {
                    Ok(addr) => addr,
                    Err(e) => {
                        self.unreserve(size);
                        self.unreserve_in_use(size);
                        return Err(e);
                    }
                };
                self.aligned_produced.fetch_add(1, Ordering::Relaxed);
                // SAFETY: fresh block of `chunk_size` bytes aligned to its size.
                unsafe { ChunkRef::from_address(addr) }
            }
        };

        aligned::initialize(chunk, &self.layout, self.next_salt());
        self.remembered_set.initialize_chunk(chunk, &self.layout);
        if self.zap {
            // SAFETY: the object area belongs to the chunk just produced.
            unsafe { fill_memory(chunk.objects_start(), ZAP_PRODUCED, chunk.free_bytes()) };
        }
        log::trace!("acquired aligned chunk {:#x} ({:?})", chunk.address(), request);
        Ok(chunk)
    }

    /// Put an aligned chunk on the free list; only while the world is stopped
    pub fn release_aligned(&self, chunk: ChunkRef) {
        crate::assert_context!(
            chunk.is_aligned() && chunk.space().is_none(),
            "releasing chunk {:#x} that is unaligned or still owned by {:?}",
            chunk.address(),
            chunk.space()
        );
        if self.zap {
            // SAFETY: the chunk is unlinked; nothing refers to its objects any more.
            unsafe {
                fill_memory(
                    chunk.objects_start(),
                    ZAP_CONSUMED,
                    chunk.end() - chunk.objects_start(),
                )
            };
        }

        let _guard = self.push_lock.lock();
        chunk.set_free_next(self.free_head.load(Ordering::Acquire));
        self.free_head.store(chunk.address(), Ordering::Release);
        self.free_count.fetch_add(1, Ordering::AcqRel);
        self.free_bytes.fetch_add(chunk.size(), Ordering::AcqRel);
        self.unreserve_in_use(chunk.size());
        self.aligned_freed.fetch_add(1, Ordering::Relaxed);
    }

    fn pop_free(&self) -> Option<ChunkRef> {
        let mut head = self.free_head.load(Ordering::Acquire);
        loop {
            if head == 0 {
                return None;
            }
            // SAFETY: free-list entries are live aligned chunks.
            let chunk = unsafe { ChunkRef::from_address(head) };
            let next = chunk.free_next();
            match self.free_head.compare_exchange_weak(
                head,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if AtomicUtils::checked_sub(&self.free_count, 1).is_none() {
                        crate::fatal!("free list count went negative popping {:#x}", head);
                    }
                    if AtomicUtils::checked_sub(&self.free_bytes, chunk.size()).is_none() {
                        crate::fatal!("free list bytes went negative popping {:#x}", head);
                    }
                    chunk.set_free_next(0);
                    return Some(chunk);
                }
                Err(actual) => head = actual,
            }
        }
    }

    /// Return free chunks to the OS until at most `max_bytes` stay cached
    pub fn trim_free_list(&self, max_bytes: usize) -> usize {
        let mut released = 0;
        while self.free_list_bytes() > max_bytes {
            let Some(chunk) = self.pop_free() else { break };
            self.os.free_aligned(chunk.address());
            self.unreserve(self.layout.chunk_size);
            self.aligned_released_to_os.fetch_add(1, Ordering::Relaxed);
            released += 1;
        }
        if released > 0 {
            log::debug!("returned {} free chunks to the OS", released);
        }
        released
    }

    // === Unaligned chunks ===

    /// Produce an unaligned chunk able to hold one object of `object_size` bytes
    pub fn acquire_unaligned(&self, object_size: usize, request: ChunkRequest) -> Result<ChunkRef> {
        let size = unaligned::required_chunk_size(object_size, self.os.page_size());
        self.reserve_in_use(size, request)?;
        if let Err(e) = self.reserve(size, request) {
            self.unreserve_in_use(size);
            return Err(e);
        }
        let addr = match self.os.map(size) {
            Ok(addr) => addr,
            Err(e) => {
                self.unreserve(size);
                self.unreserve_in_use(size);
                return Err(e);
            }
        };
        self.unaligned_produced.fetch_add(1, Ordering::Relaxed);

        // SAFETY: fresh mapping of `size` bytes.
        let chunk = unsafe { ChunkRef::from_address(addr) };
        unaligned::initialize(chunk, size, self.next_salt());
        self.remembered_set.initialize_chunk(chunk, &self.layout);
        if self.zap {
            // SAFETY: the object area belongs to the mapping just made.
            unsafe { fill_memory(chunk.objects_start(), ZAP_PRODUCED, chunk.free_bytes()) };
        }
        log::trace!("acquired unaligned chunk {:#x} of {} bytes", addr, size);
        Ok(chunk)
    }

    /// Unmap an unaligned chunk
    pub fn release_unaligned(&self, chunk: ChunkRef) {
        crate::assert_context!(
            !chunk.is_aligned() && chunk.space().is_none(),
            "releasing chunk {:#x} that is aligned or still owned by {:?}",
            chunk.address(),
            chunk.space()
        );
        let size = chunk.size();
        self.os.unmap(chunk.address());
        self.unreserve(size);
        self.unreserve_in_use(size);
        self.unaligned_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Release a chunk of either kind
    pub fn release(&self, chunk: ChunkRef) {
        if chunk.is_aligned() {
            self.release_aligned(chunk);
        } else {
            self.release_unaligned(chunk);
        }
    }

    pub fn stats(&self) -> ChunkAllocatorStats {
        ChunkAllocatorStats {
            aligned_produced: self.aligned_produced.load(Ordering::Relaxed),
            aligned_reused: self.aligned_reused.load(Ordering::Relaxed),
            aligned_freed: self.aligned_freed.load(Ordering::Relaxed),
            aligned_released_to_os: self.aligned_released_to_os.load(Ordering::Relaxed),
            unaligned_produced: self.unaligned_produced.load(Ordering::Relaxed),
            unaligned_released: self.unaligned_released.load(Ordering::Relaxed),
            free_list_count: self.free_list_count(),
            free_list_bytes: self.free_list_bytes(),
            committed_bytes: self.committed_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::is_filled_with;

    const CHUNK: usize = 64 * 1024;

    fn allocator(limit: usize, zap: bool) -> ChunkAllocator {
        let layout = ChunkLayout::new(CHUNK, 512, true);
        ChunkAllocator::new(layout, RememberedSet::CardTable, limit, zap).expect("allocator")
    }

    #[test]
    fn test_released_chunks_are_reused() {
        let a = allocator(16 * CHUNK, false);
        let first = a.acquire_aligned(ChunkRequest::Mutator).expect("chunk");
        assert_eq!(first.address() % CHUNK, 0);
        assert_eq!(a.committed_bytes(), CHUNK);

        a.release_aligned(first);
        assert_eq!(a.free_list_count(), 1);
        assert_eq!(a.free_list_bytes(), CHUNK);

        let again = a.acquire_aligned(ChunkRequest::Mutator).expect("chunk");
        assert_eq!(again, first);
        assert_eq!(a.free_list_count(), 0);
        assert_eq!(a.stats().aligned_reused, 1);
        assert_eq!(a.committed_bytes(), CHUNK);
    }

    #[test]
    fn test_free_list_is_lifo() {
        let a = allocator(16 * CHUNK, false);
        let c1 = a.acquire_aligned(ChunkRequest::Mutator).expect("chunk");
        let c2 = a.acquire_aligned(ChunkRequest::Mutator).expect("chunk");
        a.release_aligned(c1);
        a.release_aligned(c2);
        assert_eq!(a.acquire_aligned(ChunkRequest::Mutator).expect("chunk"), c2);
        assert_eq!(a.acquire_aligned(ChunkRequest::Mutator).expect("chunk"), c1);
    }

    #[test]
    fn test_limit_applies_to_mutators_only() {
        let a = allocator(2 * CHUNK, false);
        a.acquire_aligned(ChunkRequest::Mutator).expect("chunk");
        a.acquire_aligned(ChunkRequest::Mutator).expect("chunk");

        let err = a.acquire_aligned(ChunkRequest::Mutator).unwrap_err();
        assert!(matches!(err, GcError::OutOfMemory { requested, available: 0 } if requested == CHUNK));

        a.acquire_aligned(ChunkRequest::Collector).expect("collector may exceed the limit");
        assert_eq!(a.committed_bytes(), 3 * CHUNK);
    }

    #[test]
    fn test_cached_chunks_count_against_limit_when_reused() {
        let a = allocator(2 * CHUNK, false);
        a.acquire_aligned(ChunkRequest::Collector).expect("chunk");
        a.acquire_aligned(ChunkRequest::Collector).expect("chunk");
        let extra = a.acquire_aligned(ChunkRequest::Collector).expect("chunk");
        a.release_aligned(extra);
        assert_eq!(a.in_use_bytes(), 2 * CHUNK);

        assert!(matches!(
            a.acquire_aligned(ChunkRequest::Mutator),
            Err(GcError::OutOfMemory { available: 0, .. })
        ));
        assert_eq!(a.free_list_count(), 1);
    }

    /// Mutators racing for cached chunks must not take more than the limit
    #[test]
    fn test_concurrent_reuse_respects_limit() {
        let a = allocator(4 * CHUNK, false);
        let cached: Vec<_> = (0..12)
            .map(|_| a.acquire_aligned(ChunkRequest::Collector).expect("chunk"))
            .collect();
        for c in cached {
            a.release_aligned(c);
        }
        assert_eq!(a.in_use_bytes(), 0);
        assert_eq!(a.free_list_count(), 12);

        let barrier = std::sync::Barrier::new(16);
        let granted: usize = std::thread::scope(|s| {
            let workers: Vec<_> = (0..16)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        let mut taken = 0;
                        while a.acquire_aligned(ChunkRequest::Mutator).is_ok() {
                            taken += 1;
                        }
                        taken
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().expect("worker")).sum()
        });

        assert_eq!(granted, 4);
        assert_eq!(a.in_use_bytes(), 4 * CHUNK);
        assert_eq!(a.free_list_count(), 8);
        assert_eq!(a.committed_bytes(), 12 * CHUNK);
    }

    #[test]
    fn test_in_use_follows_acquire_and_release() {
        let a = allocator(16 * CHUNK, false);
        let aligned = a.acquire_aligned(ChunkRequest::Mutator).expect("chunk");
        let large = a.acquire_unaligned(200_000, ChunkRequest::Mutator).expect("chunk");
        assert_eq!(a.in_use_bytes(), CHUNK + large.size());

        a.release(large);
        a.release(aligned);
        assert_eq!(a.in_use_bytes(), 0);
        assert_eq!(a.committed_bytes(), CHUNK);
    }

    #[test]
    fn test_trim_returns_excess_to_os() {
        let a = allocator(16 * CHUNK, false);
        let chunks: Vec<_> = (0..4)
            .map(|_| a.acquire_aligned(ChunkRequest::Mutator).expect("chunk"))
            .collect();
        for c in chunks {
            a.release_aligned(c);
        }
        assert_eq!(a.trim_free_list(CHUNK), 3);
        assert_eq!(a.free_list_count(), 1);
        assert_eq!(a.committed_bytes(), CHUNK);
        assert_eq!(a.stats().aligned_released_to_os, 3);
    }

    #[test]
    fn test_zapping_patterns() {
        let a = allocator(16 * CHUNK, true);
        let c = a.acquire_aligned(ChunkRequest::Mutator).expect("chunk");
        assert!(unsafe { is_filled_with(c.objects_start(), ZAP_PRODUCED, c.free_bytes()) });

        a.release_aligned(c);
        assert!(unsafe { is_filled_with(c.objects_start(), ZAP_CONSUMED, c.free_bytes()) });
    }

    #[test]
    fn test_unaligned_chunks_are_not_cached() {
        let a = allocator(16 * CHUNK, false);
        let c = a.acquire_unaligned(200_000, ChunkRequest::Mutator).expect("chunk");
        assert!(!c.is_aligned());
        assert!(c.free_bytes() >= 200_000);
        assert_eq!(c.size() % a.page_size(), 0);
        let committed = a.committed_bytes();
        assert_eq!(committed, c.size());

        a.release_unaligned(c);
        assert_eq!(a.committed_bytes(), 0);
        assert_eq!(a.free_list_count(), 0);
    }

    #[test]
    fn test_salts_differ_per_chunk() {
        let a = allocator(16 * CHUNK, false);
        let c1 = a.acquire_aligned(ChunkRequest::Mutator).expect("chunk");
        let c2 = a.acquire_aligned(ChunkRequest::Mutator).expect("chunk");
        assert_ne!(c1.identity_hash_salt(), c2.identity_hash_salt());
    }
}
