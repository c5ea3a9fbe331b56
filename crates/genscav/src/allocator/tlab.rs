//! Mutator - per-thread allocation front-end
//!
//! Every mutator owns two aligned chunks it bump-allocates in, plus the chunks
//! it filled earlier in this epoch:
//!
//! ```text
//!   current ──► [objects │ free        ]    fast path: CAS on top
//!   retained ─► [objects         │ free ]    tried second
//!   aligned list (newest first):  C3 ─► C2 ─► C1
//!   unaligned list:               U2 ─► U1
//! ```
//!
//! ## How it works
//!
//! 1. The fast path claims bytes in `current`, then in `retained`
//! 2. On failure the slow path takes the mutator spinlock, re-checks both chunks,
//!    asks the policy whether to collect, and otherwise installs a new chunk,
//!    keeping the emptier of the old pair as `retained`
//! 3. Large objects get an unaligned chunk of their own
//! 4. At every collection the chunk lists are retired into eden, oldest first
//!
//! The private lists reuse the chunk header links; a chunk on a private list
//! belongs to no space until it is retired.

use crate::allocator::bump;
use crate::error::{GcError, Result};
use crate::gc::GcCause;
use crate::heap::aligned;
use crate::heap::chunk::{object_allocation_size, ChunkRef};
use crate::heap::state::HeapState;
use crate::heap::unaligned;
use crate::heap::Heap;
use crate::logging::GcEvent;
use crate::memory::ChunkRequest;
use crate::object::{initialize_object, ObjectShape, UNALIGNED_MASK};
use crate::util::SpinLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Allocation counters of one mutator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MutatorStats {
    pub allocated_objects: u64,
    pub allocated_bytes: u64,
    pub slow_path_count: u64,
    pub aligned_chunks_acquired: u64,
    pub unaligned_chunks_acquired: u64,
    /// Chunk bytes owned by the mutator right now
    pub chunk_bytes: usize,
}

/// Result of one allocation attempt under the world guard
enum Attempt {
    Allocated(usize),
    Collect,
    Failed(GcError),
}

#[inline]
fn encode(chunk: Option<ChunkRef>) -> usize {
    chunk.map_or(0, |c| c.address())
}

#[inline]
fn decode(raw: usize) -> Option<ChunkRef> {
    // SAFETY: only addresses of chunks owned by this mutator are stored.
    (raw != 0).then(|| unsafe { ChunkRef::from_address(raw) })
}

/// Shared part of a mutator; the heap keeps one per attached mutator
pub struct MutatorState {
    id: u64,
    current: AtomicUsize,
    retained: AtomicUsize,
    aligned_head: AtomicUsize,
    unaligned_head: AtomicUsize,
    lock: SpinLock,
    chunk_bytes: AtomicUsize,
    allocated_objects: AtomicU64,
    allocated_bytes: AtomicU64,
    slow_paths: AtomicU64,
    aligned_acquired: AtomicU64,
    unaligned_acquired: AtomicU64,
}

impl MutatorState {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            current: AtomicUsize::new(0),
            retained: AtomicUsize::new(0),
            aligned_head: AtomicUsize::new(0),
            unaligned_head: AtomicUsize::new(0),
            lock: SpinLock::new(),
            chunk_bytes: AtomicUsize::new(0),
            allocated_objects: AtomicU64::new(0),
            allocated_bytes: AtomicU64::new(0),
            slow_paths: AtomicU64::new(0),
            aligned_acquired: AtomicU64::new(0),
            unaligned_acquired: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn current_chunk(&self) -> Option<ChunkRef> {
        decode(self.current.load(Ordering::Acquire))
    }

    pub fn retained_chunk(&self) -> Option<ChunkRef> {
        decode(self.retained.load(Ordering::Acquire))
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> MutatorStats {
        MutatorStats {
            allocated_objects: self.allocated_objects.load(Ordering::Relaxed),
            allocated_bytes: self.allocated_bytes.load(Ordering::Relaxed),
            slow_path_count: self.slow_paths.load(Ordering::Relaxed),
            aligned_chunks_acquired: self.aligned_acquired.load(Ordering::Relaxed),
            unaligned_chunks_acquired: self.unaligned_acquired.load(Ordering::Relaxed),
            chunk_bytes: self.chunk_bytes(),
        }
    }

    /// Every chunk the mutator owns, aligned ones first
    pub fn chunks(&self) -> Vec<ChunkRef> {
        let mut chunks = Self::list(self.aligned_head.load(Ordering::Acquire));
        chunks.extend(Self::list(self.unaligned_head.load(Ordering::Acquire)));
        chunks
    }

    fn list(head: usize) -> Vec<ChunkRef> {
        let mut chunks = Vec::new();
        let mut cursor = decode(head);
        while let Some(chunk) = cursor {
            chunks.push(chunk);
            cursor = chunk.next();
        }
        chunks
    }

    /// Fast path over current, then retained
    #[inline]
    fn attempt_fast(&self, size: usize) -> Option<usize> {
        if let Some(chunk) = self.current_chunk() {
            if let Some(addr) = bump::attempt_allocation_parallel(chunk, size) {
                return Some(addr);
            }
        }
        let chunk = self.retained_chunk()?;
        bump::attempt_allocation_parallel(chunk, size)
    }

    fn push_private(head: &AtomicUsize, chunk: ChunkRef) {
        chunk.set_prev(None);
        chunk.set_next(decode(head.load(Ordering::Acquire)));
        head.store(chunk.address(), Ordering::Release);
    }

    /// Make `fresh` the current chunk, keeping the emptier of the old pair
    fn install_chunk(&self, fresh: ChunkRef, min_retained: usize) {
        let keep = [self.current_chunk(), self.retained_chunk()]
            .into_iter()
            .flatten()
            .max_by_key(|chunk| chunk.free_bytes())
            .filter(|chunk| chunk.free_bytes() >= min_retained);
        Self::push_private(&self.aligned_head, fresh);
        self.chunk_bytes.fetch_add(fresh.size(), Ordering::AcqRel);
        self.retained.store(encode(keep), Ordering::Release);
        self.current.store(fresh.address(), Ordering::Release);
    }

    /// Hand every owned chunk to eden; only while the world is stopped
    pub(crate) fn retire(&self, state: &mut HeapState) -> usize {
        let _guard = self.lock.lock();
        let eden = state.young().eden();
        let mut retired = 0;
        for head in [&self.aligned_head, &self.unaligned_head] {
            let mut chunks = Self::list(head.swap(0, Ordering::AcqRel));
            chunks.reverse();
            for chunk in chunks {
                chunk.set_next(None);
                chunk.set_prev(None);
                retired += chunk.size();
                state.append_chunk(eden, chunk);
            }
        }
        self.current.store(0, Ordering::Release);
        self.retained.store(0, Ordering::Release);
        self.chunk_bytes.store(0, Ordering::Release);
        retired
    }
}

impl std::fmt::Debug for MutatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutatorState")
            .field("id", &self.id)
            .field("current", &self.current_chunk().map(|c| c.address()))
            .field("retained", &self.retained_chunk().map(|c| c.address()))
            .field("chunk_bytes", &self.chunk_bytes())
            .finish()
    }
}

/// Mutator - an allocating thread's view of the heap
///
/// Obtained from [`Heap::attach_mutator`]; dropping it detaches the mutator and
/// retires its chunks into eden.
///
/// # Examples
///
/// ```rust
/// use genscav::{Heap, HeapConfig, ObjectShape};
///
/// let heap = Heap::new(HeapConfig::with_chunk_size(1024 * 1024)).unwrap();
/// let mutator = heap.attach_mutator();
/// let obj = mutator.allocate(&ObjectShape::plain(2, 16)).unwrap();
/// assert_ne!(obj, 0);
/// ```
pub struct Mutator {
    heap: Arc<Heap>,
    state: Arc<MutatorState>,
}

impl Mutator {
    pub(crate) fn new(heap: Arc<Heap>, state: Arc<MutatorState>) -> Self {
        Self { heap, state }
    }

    pub fn id(&self) -> u64 {
        self.state.id()
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    pub fn stats(&self) -> MutatorStats {
        self.state.stats()
    }

    pub fn current_chunk(&self) -> Option<ChunkRef> {
        self.state.current_chunk()
    }

    pub fn retained_chunk(&self) -> Option<ChunkRef> {
        self.state.retained_chunk()
    }

    /// Allocate and initialize an object of `shape`
    ///
    /// Reference slots start out null and the payload zeroed.
    pub fn allocate(&self, shape: &ObjectShape) -> Result<usize> {
        shape.validate()?;
        self.allocate_with(object_allocation_size(shape.size()), Some(shape))
    }

    /// Allocate `size` bytes holding a payload-only object
    pub fn allocate_raw(&self, size: usize) -> Result<usize> {
        if size == 0 {
            return Err(GcError::InvalidArgument(
                "allocation size must be non-zero".to_string(),
            ));
        }
        self.allocate_with(object_allocation_size(size), None)
    }

    fn allocate_with(&self, size: usize, shape: Option<&ObjectShape>) -> Result<usize> {
        let heap = &*self.heap;
        let shape = shape.copied().unwrap_or_else(|| {
            ObjectShape::plain(0, size.saturating_sub(crate::object::HEADER_SIZE))
        });
        let large = size >= heap.config.large_object_threshold
            || !aligned::fits(size, &heap.layout);

        let mut may_collect = true;
        let mut collected_on_failure = false;
        loop {
            let epoch = heap.collector.epoch();
            let attempt = {
                let _world = heap.safepoint.enter();
                let attempt = if large {
                    self.attempt_unaligned(size, may_collect)
                } else {
                    self.attempt_aligned(size, may_collect)
                };
                if let Attempt::Allocated(obj) = attempt {
                    self.initialize(obj, size, &shape, large);
                }
                attempt
            };

            match attempt {
                Attempt::Allocated(obj) => return Ok(obj),
                Attempt::Collect => {
                    heap.collect_on_allocation(GcCause::OnAllocation, epoch, false);
                    may_collect = false;
                }
                Attempt::Failed(err) if err.is_recoverable() && !collected_on_failure => {
                    log::debug!(
                        "mutator {} could not get memory for {} bytes, collecting",
                        self.id(),
                        size
                    );
                    heap.collect_on_allocation(GcCause::AllocationFailure, epoch, true);
                    collected_on_failure = true;
                    may_collect = false;
                }
                Attempt::Failed(err) => {
                    heap.collector.logger().log(GcEvent::AllocationFailure {
                        size,
                        committed_bytes: heap.chunks.committed_bytes(),
                    });
                    return Err(err);
                }
            }
        }
    }

    fn initialize(&self, obj: usize, size: usize, shape: &ObjectShape, large: bool) {
        let flags = if large { UNALIGNED_MASK } else { 0 };
        // SAFETY: `obj..obj + size` was just claimed by this mutator.
        unsafe {
            crate::memory::zero_memory(obj, size);
            initialize_object(obj, shape, flags);
        }
        self.state.allocated_objects.fetch_add(1, Ordering::Relaxed);
        self.state
            .allocated_bytes
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    fn attempt_aligned(&self, size: usize, may_collect: bool) -> Attempt {
        let state = &*self.state;
        if let Some(obj) = state.attempt_fast(size) {
            return Attempt::Allocated(obj);
        }

        let _guard = state.lock.lock();
        state.slow_paths.fetch_add(1, Ordering::Relaxed);
        // Another thread sharing a chunk may have left room
        if let Some(obj) = state.attempt_fast(size) {
            return Attempt::Allocated(obj);
        }
        if may_collect && self.collection_due() {
            return Attempt::Collect;
        }

        let heap = &*self.heap;
        let chunk = match heap.chunks.acquire_aligned(ChunkRequest::Mutator) {
            Ok(chunk) => chunk,
            Err(e) => return Attempt::Failed(e),
        };
        state.aligned_acquired.fetch_add(1, Ordering::Relaxed);
        heap.note_mutator_chunk(chunk.size());
        state.install_chunk(chunk, heap.config.min_retained_chunk_bytes);
        log::trace!(
            "mutator {} installed chunk {:#x}",
            state.id,
            chunk.address()
        );

        match bump::attempt_allocation_parallel(chunk, size) {
            Some(obj) => Attempt::Allocated(obj),
            None => crate::fatal!("{} bytes do not fit a fresh aligned chunk", size),
        }
    }

    fn attempt_unaligned(&self, size: usize, may_collect: bool) -> Attempt {
        let state = &*self.state;
        let _guard = state.lock.lock();
        state.slow_paths.fetch_add(1, Ordering::Relaxed);
        if may_collect && self.collection_due() {
            return Attempt::Collect;
        }

        let heap = &*self.heap;
        let chunk = match heap.chunks.acquire_unaligned(size, ChunkRequest::Mutator) {
            Ok(chunk) => chunk,
            Err(e) => return Attempt::Failed(e),
        };
        chunk.set_top(chunk.objects_start() + size);
        state.unaligned_acquired.fetch_add(1, Ordering::Relaxed);
        heap.note_mutator_chunk(chunk.size());
        MutatorState::push_private(&state.unaligned_head, chunk);
        state.chunk_bytes.fetch_add(chunk.size(), Ordering::AcqRel);
        Attempt::Allocated(unaligned::object_of(chunk))
    }

    fn collection_due(&self) -> bool {
        let heap = &*self.heap;
        heap.collector
            .policy()
            .should_collect_on_allocation(&heap.heap_sizes())
    }
}

impl Drop for Mutator {
    fn drop(&mut self) {
        self.heap.detach_mutator(&self.state);
    }
}

impl std::fmt::Debug for Mutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutator").field("state", &self.state).finish()
    }
}
