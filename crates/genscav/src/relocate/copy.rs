//! Copying collection - scavenge and complete evacuation
//!
//! Survivors are copied into the target spaces and the target spaces themselves
//! are the grey set. A [`GreyObjectsWalker`] remembers how far each target has
//! been scanned; scanning to a fixpoint over all walkers finishes tracing:
//!
//! ```text
//!   target space:  [ scanned │ grey (copied, not scanned) │ free ]
//!                            ^ walker cursor              ^ top
//! ```
//!
//! Scanning a grey object evacuates its referents, which appends more grey
//! objects behind the cursor. New chunks are appended at the tail of the space
//! and the walker follows the chunk links into them.
//!
//! An incremental collection additionally treats the dirty cards of the old
//! generation as roots, and re-dirties any card whose objects still point into
//! the young generation afterwards.

use super::Collection;
use crate::barrier::{CardTable, FirstObjectTable};
use crate::heap::chunk::ChunkRef;
use crate::heap::space::{Space, SpaceId};
use crate::heap::unaligned;
use crate::object::{self, read_slot, write_slot};
use crate::stats::GcTimer;

/// Scan position in one target space
#[derive(Debug, Clone, Copy)]
pub(crate) struct GreyObjectsWalker {
    space: SpaceId,
    /// Chunk being scanned and the next object to scan in it
    aligned: Option<(ChunkRef, usize)>,
    /// Last unaligned chunk already scanned
    unaligned: Option<ChunkRef>,
}

impl GreyObjectsWalker {
    /// Everything currently in `space` counts as already scanned
    pub(crate) fn snapshot(space: &Space) -> Self {
        Self {
            space: space.id(),
            aligned: space.last_aligned_chunk().map(|chunk| (chunk, chunk.top())),
            unaligned: space.last_unaligned_chunk(),
        }
    }
}

/// A chunk whose dirty cards are scanned, with its top before copying began
#[derive(Debug, Clone, Copy)]
struct CardScanChunk {
    chunk: ChunkRef,
    top: usize,
}

impl Collection<'_> {
    /// Incremental collection: evacuate the young generation
    pub(crate) fn scavenge(&mut self) {
        let timer = GcTimer::new();
        self.state.empty_old_from_space();
        let from = self.state.young().from_spaces();
        self.flag_from_spaces(&from);

        let old_target = self.state.old().promotion_target();
        let cards = self.snapshot_card_chunks(old_target);
        let mut targets: Vec<SpaceId> = self.state.young().survivor_to_spaces().to_vec();
        targets.push(old_target);
        self.walkers = targets
            .iter()
            .map(|&id| GreyObjectsWalker::snapshot(self.state.space(id)))
            .collect();
        self.end_phase("prepare", timer);

        let timer = GcTimer::new();
        for chunk in self.pinned_chunks_of(&from) {
            let target = self.promotion_target_for(self.owning_chunk_space(chunk));
            self.promote_pinned_object(chunk, target);
        }
        self.end_phase("pinned", timer);

        let timer = GcTimer::new();
        self.scan_dirty_cards(&cards);
        self.end_phase("cards", timer);

        let timer = GcTimer::new();
        self.visit_roots(|c, obj| c.evacuate(obj));
        self.end_phase("roots", timer);

        let timer = GcTimer::new();
        self.scan_grey_objects();
        self.end_phase("grey", timer);

        let timer = GcTimer::new();
        self.process_references_after_copying();
        self.end_phase("references", timer);

        let timer = GcTimer::new();
        for &id in &from {
            self.release_space(id);
        }
        self.state.clear_from_space_flags();
        self.state.young.swap_survivor_spaces();
        self.swap_spaces();
        self.end_phase("release", timer);
    }

    /// Complete collection for the copying old generation
    pub(crate) fn collect_completely_by_copying(&mut self) {
        let timer = GcTimer::new();
        let mut from = self.state.young().from_spaces();
        from.extend(self.state.old().evacuated_space());
        self.flag_from_spaces(&from);

        let target = self.state.old().promotion_target();
        self.walkers = vec![GreyObjectsWalker::snapshot(self.state.space(target))];
        self.end_phase("prepare", timer);

        let timer = GcTimer::new();
        for chunk in self.pinned_chunks_of(&from) {
            self.promote_pinned_object(chunk, target);
        }
        self.end_phase("pinned", timer);

        let timer = GcTimer::new();
        self.visit_roots(|c, obj| c.evacuate(obj));
        self.end_phase("roots", timer);

        let timer = GcTimer::new();
        self.scan_grey_objects();
        self.end_phase("grey", timer);

        let timer = GcTimer::new();
        self.process_references_after_copying();
        self.end_phase("references", timer);

        let timer = GcTimer::new();
        for &id in &from {
            self.release_space(id);
        }
        self.state.clear_from_space_flags();
        self.state.young.swap_survivor_spaces();
        self.swap_spaces();

        // Nothing young is left, so no old object can point into it
        let resident: Vec<ChunkRef> = self
            .state
            .space(self.state.old().resident_space())
            .chunks()
            .collect();
        for chunk in resident {
            self.heap.remembered_set.clean_cards(chunk, &self.layout);
        }
        self.end_phase("release", timer);
    }

    fn owning_chunk_space(&self, chunk: ChunkRef) -> SpaceId {
        match chunk.space() {
            Some(id) => id,
            None => crate::fatal!("chunk {:#x} has no owning space", chunk.address()),
        }
    }

    /// Space survivors of space `id` are copied to
    fn promotion_target_for(&self, id: SpaceId) -> SpaceId {
        let space = self.state.space(id);
        let old = self.state.old().promotion_target();
        if self.complete || space.is_old() {
            return old;
        }
        self.state
            .young()
            .promotion_target(space.age(), self.tenuring_age)
            .unwrap_or(old)
    }

    /// New address of `obj`, copying it out of a from-space on first sight
    fn evacuate(&mut self, obj: usize) -> usize {
        // SAFETY: `obj` was read from a root or from a live object.
        let h = unsafe { object::header(obj) };
        if h.is_forwarded() {
            return h.forwarding_address();
        }
        let chunk = self.chunk_of(obj);
        let id = self.owning_chunk_space(chunk);
        if !self.state.space(id).is_from_space() {
            return obj;
        }

        let target = self.promotion_target_for(id);
        if chunk.is_aligned() {
            self.promote_aligned_object(obj, h.size(), target)
        } else {
            self.promote_unaligned_object(chunk, target);
            obj
        }
    }

    /// Evacuate the strong referents of `obj`; true if any of them is young
    fn scan_object_evacuating(&mut self, obj: usize) -> bool {
        // SAFETY: `obj` is a live object in a space that is not evacuated.
        let (count, first) = unsafe {
            let h = object::header(obj);
            (h.ref_count(), object::first_strong_slot(obj))
        };
        if first > 0 {
            self.discovered.discover(obj);
        }

        let mut points_young = false;
        for index in first..count {
            // SAFETY: `index` is below the reference count of `obj`.
            let value = unsafe { read_slot(obj, index) };
            if value == 0 {
                continue;
            }
            let new = self.evacuate(value);
            if new != value {
                unsafe { write_slot(obj, index, new) };
            }
            if self.is_young_object(new) {
                points_young = true;
            }
        }
        points_young
    }

    /// Scan a grey object, re-dirtying its card if it is old and keeps a young referent
    fn scan_grey_object(&mut self, obj: usize) {
        if self.scan_object_evacuating(obj) {
            // SAFETY: `obj` is a live object.
            unsafe {
                if object::header(obj).is_remembered() {
                    self.heap
                        .remembered_set
                        .dirty_card_for_object(obj, &self.layout);
                }
            }
        }
    }

    // === Grey objects ===

    fn scan_grey_objects(&mut self) {
        loop {
            let mut progress = false;
            for index in 0..self.walkers.len() {
                progress |= self.walk_grey_objects(index);
            }
            if !progress {
                break;
            }
        }
    }

    /// Scan everything added to one target space since the last call
    fn walk_grey_objects(&mut self, index: usize) -> bool {
        let mut progress = false;

        loop {
            let walker = self.walkers[index];
            let (chunk, mut cursor) = match walker.aligned {
                Some(position) => position,
                None => match self.state.space(walker.space).first_aligned_chunk() {
                    Some(first) => (first, first.objects_start()),
                    None => break,
                },
            };
            while cursor < chunk.top() {
                // SAFETY: `cursor` is an object boundary below the chunk top.
                let size = unsafe { object::header(cursor) }.size();
                self.scan_grey_object(cursor);
                cursor += size;
                progress = true;
            }
            match chunk.next() {
                Some(next) => self.walkers[index].aligned = Some((next, next.objects_start())),
                None => {
                    self.walkers[index].aligned = Some((chunk, cursor));
                    break;
                }
            }
        }

        loop {
            let walker = self.walkers[index];
            let next = match walker.unaligned {
                Some(last) => last.next(),
                None => self.state.space(walker.space).first_unaligned_chunk(),
            };
            let Some(chunk) = next else { break };
            self.scan_grey_object(unaligned::object_of(chunk));
            self.walkers[index].unaligned = Some(chunk);
            progress = true;
        }

        progress
    }

    // === Dirty cards ===

    fn snapshot_card_chunks(&self, id: SpaceId) -> Vec<CardScanChunk> {
        if !self.heap.remembered_set.is_enabled() {
            return Vec::new();
        }
        self.state
            .space(id)
            .chunks()
            .map(|chunk| CardScanChunk {
                chunk,
                top: chunk.top(),
            })
            .collect()
    }

    /// Treat objects starting on dirty cards as roots
    fn scan_dirty_cards(&mut self, chunks: &[CardScanChunk]) {
        let layout = self.layout;
        let mut scanned_cards = 0usize;

        for entry in chunks {
            let chunk = entry.chunk;
            if !chunk.is_aligned() {
                let obj = unaligned::object_of(chunk);
                // SAFETY: the object of an old unaligned chunk is live.
                unsafe {
                    if self.heap.remembered_set.is_card_dirty_for_object(obj, &layout) {
                        self.heap.remembered_set.clean_cards(chunk, &layout);
                        scanned_cards += 1;
                        self.scan_grey_object(obj);
                    }
                }
                continue;
            }

            let table = CardTable::new(chunk, &layout);
            let first_objects = FirstObjectTable::new(chunk, &layout);
            for card in table.dirty_cards(entry.top) {
                table.clean(card);
                scanned_cards += 1;
                let card_start = table.card_start(card);
                let card_end = (card_start + layout.card_size).min(entry.top);
                let Some(mut obj) = first_objects.covering_object(card) else {
                    continue;
                };
                while obj < card_end {
                    // SAFETY: `obj` walks object boundaries below the snapshot top.
                    let size = unsafe { object::header(obj) }.size();
                    if obj >= card_start && self.scan_object_evacuating(obj) {
                        table.dirty(card);
                    }
                    obj += size;
                }
            }
        }
        log::trace!("scanned {} dirty cards", scanned_cards);
    }

    // === Weak references ===

    /// Clear referents that did not survive, update the ones that moved
    pub(super) fn process_references_after_copying(&mut self) {
        for reference in self.discovered.take() {
            // SAFETY: discovered references are live objects scanned in place.
            let referent = unsafe { read_slot(reference, 0) };
            if referent == 0 {
                continue;
            }
            let h = unsafe { object::header(referent) };
            let survivor = if h.is_forwarded() {
                Some(h.forwarding_address())
            } else if self.in_from_space(referent) {
                None
            } else {
                Some(referent)
            };

            match survivor {
                Some(new) => {
                    unsafe { write_slot(reference, 0, new) };
                    self.discovered.record_kept();
                    let remembered = unsafe { object::header(reference) }.is_remembered();
                    if remembered && self.is_young_object(new) {
                        unsafe {
                            self.heap
                                .remembered_set
                                .dirty_card_for_object(reference, &self.layout)
                        };
                    }
                }
                None => {
                    unsafe { write_slot(reference, 0, 0) };
                    self.discovered.record_cleared();
                }
            }
        }
    }
}
