//! Relocate Module - moving objects while the world is stopped
//!
//! One [`Collection`] value lives for the duration of one collection and carries
//! everything the phases share: the locked heap state, the grey-object walkers,
//! the mark queue, the relocation plan and the running counters.
//!
//! ```text
//!   incremental:          complete (copying):       complete (compacting):
//!   ┌───────────────┐     ┌───────────────────┐     ┌───────────────────────┐
//!   │ pinned chunks │     │ pinned chunks     │     │ pinned chunks         │
//!   │ dirty cards   │     │ roots             │     │ mark roots (+ copy    │
//!   │ roots         │     │ grey objects      │     │   young into old)     │
//!   │ grey objects  │     │ references        │     │ drain mark queue      │
//!   │ references    │     │ release from      │     │ references            │
//!   │ release from  │     │ swap spaces       │     │ plan / fix / compact  │
//!   │ swap spaces   │     └───────────────────┘     │ rebuild tables        │
//!   └───────────────┘                               └───────────────────────┘
//! ```
//!
//! Promotion into the old generation goes through the same four operations for
//! both strategies: `promote_aligned_object`, `promote_unaligned_object`,
//! `promote_pinned_object` and `swap_spaces`; mark-compact adds
//! `sweep_and_compact`.

pub mod compaction;
pub mod copy;
pub mod forwarding;

pub use forwarding::{RelocationPlan, Run};

use crate::allocator::bump;
use crate::heap::chunk::{chunk_of, ChunkLayout, ChunkRef};
use crate::heap::space::SpaceId;
use crate::heap::state::HeapState;
use crate::heap::Heap;
use crate::marker::{MarkQueue, RootProvider, RootStats};
use crate::memory::{copy_memory, ChunkRequest};
use crate::object::{self, DiscoveredReferences, MARKED_MASK, REMEMBERED_MASK};
use crate::stats::{GcTimer, PhaseTimers};
use crate::util::debug::dump_region;
use copy::GreyObjectsWalker;
use std::sync::Arc;

/// What one collection did
#[derive(Debug, Default, Clone)]
pub struct CollectionOutcome {
    pub complete: bool,
    /// Objects copied into survivor spaces
    pub copied_objects: u64,
    pub copied_bytes: usize,
    /// Objects copied into the old generation
    pub promoted_objects: u64,
    pub promoted_bytes: usize,
    /// Chunks relinked whole (unaligned and pinned)
    pub promoted_chunks: u64,
    pub tenured_bytes: usize,
    pub marked_objects: u64,
    pub moved_bytes: usize,
    pub swept_chunks: u64,
    pub released_chunks: u64,
    pub released_bytes: usize,
    pub references_cleared: u64,
    pub references_kept: u64,
    pub roots: RootStats,
    pub phases: PhaseTimers,
}

impl CollectionOutcome {
    /// Fold the outcome of a second collection in the same pause into this one
    pub fn merge(&mut self, other: CollectionOutcome) {
        self.complete |= other.complete;
        self.copied_objects += other.copied_objects;
        self.copied_bytes += other.copied_bytes;
        self.promoted_objects += other.promoted_objects;
        self.promoted_bytes += other.promoted_bytes;
        self.promoted_chunks += other.promoted_chunks;
        self.tenured_bytes += other.tenured_bytes;
        self.marked_objects += other.marked_objects;
        self.moved_bytes += other.moved_bytes;
        self.swept_chunks += other.swept_chunks;
        self.released_chunks += other.released_chunks;
        self.released_bytes += other.released_bytes;
        self.references_cleared += other.references_cleared;
        self.references_kept += other.references_kept;
        self.roots = other.roots;
        for (phase, duration) in other.phases.iter() {
            self.phases.record(phase, duration);
        }
    }
}

/// State shared by the phases of one collection
pub(crate) struct Collection<'a> {
    heap: &'a Heap,
    state: &'a mut HeapState,
    layout: ChunkLayout,
    complete: bool,
    tenuring_age: usize,
    walkers: Vec<GreyObjectsWalker>,
    discovered: DiscoveredReferences,
    queue: MarkQueue,
    plan: RelocationPlan,
    dead_unaligned: Vec<ChunkRef>,
    outcome: CollectionOutcome,
}

impl<'a> Collection<'a> {
    pub(crate) fn new(
        heap: &'a Heap,
        state: &'a mut HeapState,
        complete: bool,
        tenuring_age: usize,
    ) -> Self {
        Self {
            heap,
            state,
            layout: heap.layout,
            complete,
            tenuring_age,
            walkers: Vec::new(),
            discovered: DiscoveredReferences::new(),
            queue: MarkQueue::new(),
            plan: RelocationPlan::new(),
            dead_unaligned: Vec::new(),
            outcome: CollectionOutcome {
                complete,
                ..Default::default()
            },
        }
    }

    /// Run the collection this value was set up for
    pub(crate) fn run(mut self) -> CollectionOutcome {
        if !self.complete {
            self.scavenge();
        } else if self.state.old().evacuated_space().is_some() {
            self.collect_completely_by_copying();
        } else {
            self.collect_completely_by_compacting();
        }
        self.outcome.references_cleared = self.discovered.cleared();
        self.outcome.references_kept = self.discovered.kept();
        self.outcome
    }

    fn end_phase(&mut self, phase: &'static str, timer: GcTimer) {
        log::trace!("phase {} took {:.3}ms", phase, timer.elapsed_ms());
        self.outcome.phases.record(phase, timer.elapsed());
    }

    // === Object and chunk queries ===

    #[inline]
    fn chunk_of(&self, obj: usize) -> ChunkRef {
        // SAFETY: callers only pass addresses read from roots or live objects.
        unsafe { chunk_of(obj, &self.layout) }
    }

    fn owning_space(&self, obj: usize) -> SpaceId {
        let chunk = self.chunk_of(obj);
        match chunk.space() {
            Some(id) => id,
            None => crate::fatal!(
                "object {:#x} lies in chunk {:#x} that no space owns\n{}",
                obj,
                chunk.address(),
                // SAFETY: the chunk header precedes the object in mapped memory.
                unsafe { dump_region(obj, object::HEADER_SIZE, 1) }
            ),
        }
    }

    fn in_from_space(&self, obj: usize) -> bool {
        self.state.space(self.owning_space(obj)).is_from_space()
    }

    fn is_young_object(&self, obj: usize) -> bool {
        self.state.space(self.owning_space(obj)).is_young()
    }

    fn flag_from_spaces(&mut self, ids: &[SpaceId]) {
        for &id in ids {
            self.state.space_mut(id).set_from_space(true);
        }
    }

    // === Collector allocation ===

    /// Claim `size` bytes at the end of space `target`
    ///
    /// The collector cannot back out of a half-finished copy, so running out of
    /// chunk memory here is fatal.
    fn allocate_in(&mut self, target: SpaceId, size: usize) -> usize {
        if let Some(chunk) = self.state.space(target).last_aligned_chunk() {
            if let Some(addr) = bump::attempt_allocation_serial(chunk, size) {
                return addr;
            }
        }
        let chunk = match self.heap.chunks.acquire_aligned(ChunkRequest::Collector) {
            Ok(chunk) => chunk,
            Err(e) => crate::fatal!("collector could not get a chunk for {} bytes: {}", size, e),
        };
        self.state.append_chunk(target, chunk);
        match bump::attempt_allocation_serial(chunk, size) {
            Some(addr) => addr,
            None => crate::fatal!("object of {} bytes does not fit an empty chunk", size),
        }
    }

    /// Copy an aligned object into `target` and forward the original
    fn copy_object(&mut self, obj: usize, size: usize, target: SpaceId) -> usize {
        let new = self.allocate_in(target, size);
        // SAFETY: `obj` is a live object of `size` bytes, `new` is freshly claimed.
        let h = unsafe {
            copy_memory(obj, new, size);
            object::header(new)
        };
        h.set_word(h.word() & !(MARKED_MASK | REMEMBERED_MASK));

        if self.state.space(target).is_old() {
            let chunk = self.chunk_of(new);
            self.heap
                .remembered_set
                .enable_for_object(chunk, &self.layout, new, size);
            self.outcome.promoted_objects += 1;
            self.outcome.promoted_bytes += size;
        } else {
            self.outcome.copied_objects += 1;
            self.outcome.copied_bytes += size;
        }
        // SAFETY: the original stays readable until its chunk is released.
        unsafe { object::header(obj) }.forward_to(new);
        new
    }

    // === Old generation contract ===

    fn promote_aligned_object(&mut self, obj: usize, size: usize, target: SpaceId) -> usize {
        self.copy_object(obj, size, target)
    }

    fn promote_unaligned_object(&mut self, chunk: ChunkRef, target: SpaceId) {
        self.state.move_chunk(chunk, target);
        if self.state.space(target).is_old() {
            self.heap
                .remembered_set
                .enable_for_chunk(chunk, &self.layout);
            self.outcome.promoted_chunks += 1;
            self.outcome.tenured_bytes += chunk.used_bytes();
        }
    }

    /// Relink a chunk holding pinned objects instead of evacuating it
    fn promote_pinned_object(&mut self, chunk: ChunkRef, target: SpaceId) {
        let to_old = self.state.space(target).is_old();
        let from_young = chunk
            .space()
            .map_or(false, |id| self.state.space(id).is_young());
        self.state.move_chunk(chunk, target);
        if to_old && from_young {
            self.heap
                .remembered_set
                .enable_for_chunk(chunk, &self.layout);
            self.outcome.tenured_bytes += chunk.used_bytes();
        }
        if to_old && self.complete && self.state.old().evacuated_space().is_none() {
            chunk.set_should_sweep(true);
        }
        self.outcome.promoted_chunks += 1;
        log::trace!(
            "pinned chunk {:#x} ({} pins) relinked into {}",
            chunk.address(),
            chunk.pinned_count(),
            self.state.space(target).name()
        );
    }

    fn swap_spaces(&mut self) {
        self.state.swap_old_spaces();
    }

    /// Pinned chunks currently linked into `ids`
    fn pinned_chunks_of(&self, ids: &[SpaceId]) -> Vec<ChunkRef> {
        ids.iter()
            .flat_map(|&id| self.state.space(id).chunks())
            .filter(|chunk| chunk.pinned_count() > 0)
            .collect()
    }

    // === Roots ===

    /// Pass every root to `visit`, storing back what it returns
    ///
    /// Pinned objects are roots that must not move.
    fn visit_roots<F>(&mut self, mut visit: F)
    where
        F: FnMut(&mut Self, usize) -> usize,
    {
        let heap = self.heap;
        let mut stats = RootStats::default();

        heap.handles.lock().for_each_mut(|slot| {
            if *slot == 0 {
                stats.null_roots += 1;
            } else {
                *slot = visit(self, *slot);
                stats.handles += 1;
            }
        });

        let providers: Vec<Arc<dyn RootProvider>> = heap.roots.lock().values().cloned().collect();
        for provider in providers {
            provider.visit_roots(&mut |slot: &mut usize| {
                if *slot == 0 {
                    stats.null_roots += 1;
                } else {
                    *slot = visit(self, *slot);
                    stats.provided += 1;
                }
            });
        }

        let pinned: Vec<usize> = heap.pinned.lock().objects().collect();
        for obj in pinned {
            let new = visit(self, obj);
            crate::assert_context!(new == obj, "pinned object {:#x} moved to {:#x}", obj, new);
            stats.pinned += 1;
        }

        log::trace!("visited roots: {}", stats);
        self.outcome.roots = stats;
    }

    // === Releasing chunks ===

    fn release_chunk(&mut self, chunk: ChunkRef) {
        crate::assert_context!(
            chunk.pinned_count() == 0,
            "releasing chunk {:#x} with {} pinned objects",
            chunk.address(),
            chunk.pinned_count()
        );
        self.outcome.released_chunks += 1;
        self.outcome.released_bytes += chunk.size();
        self.heap.chunks.release(chunk);
    }

    /// Give every chunk of space `id` back to the chunk allocator
    fn release_space(&mut self, id: SpaceId) {
        for chunk in self.state.take_all_chunks(id) {
            self.release_chunk(chunk);
        }
    }
}
