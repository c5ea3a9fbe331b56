//! Mark-compact collection of the old generation
//!
//! A complete collection with the compacting strategy never needs a second old
//! space:
//!
//! 1. **Mark** - trace from the roots. Young survivors are copied straight into
//!    the old generation as they are found and come out marked; old objects get
//!    their mark bit set in place.
//! 2. **Plan** - slide marked objects of every unpinned aligned chunk towards
//!    the start of the chunk list (see [`RelocationPlan`]).
//! 3. **Fix** - rewrite roots and every reference slot of every marked object
//!    through the plan.
//! 4. **Compact** - move the planned runs; chunks holding pinned objects are
//!    swept in place instead, their dead objects turned into fillers.
//! 5. **Rebuild** - recompute first-object tables and clean all cards.
//!
//! [`RelocationPlan`]: super::RelocationPlan

use super::{Collection, RelocationPlan};
use crate::heap::chunk::ChunkRef;
use crate::heap::unaligned;
use crate::memory::{copy_memory_overlapping, fill_memory, ZAP_CONSUMED};
use crate::object::{self, initialize_object, read_slot, write_slot, ObjectShape};
use crate::stats::GcTimer;

impl Collection<'_> {
    /// Complete collection for the compacting old generation
    pub(crate) fn collect_completely_by_compacting(&mut self) {
        let timer = GcTimer::new();
        let from = self.state.young().from_spaces();
        self.flag_from_spaces(&from);
        let old = self.state.old().promotion_target();

        for chunk in self.pinned_chunks_of(&from) {
            self.promote_pinned_object(chunk, old);
        }
        for chunk in self.pinned_chunks_of(&[old]) {
            chunk.set_should_sweep(true);
        }
        self.end_phase("pinned", timer);

        let timer = GcTimer::new();
        self.visit_roots(|c, obj| c.mark_or_copy(obj));
        self.drain_mark_queue();
        self.end_phase("mark", timer);

        let timer = GcTimer::new();
        self.process_references_after_marking();
        for &id in &from {
            self.release_space(id);
        }
        self.state.clear_from_space_flags();
        self.state.young.swap_survivor_spaces();
        self.end_phase("references", timer);

        self.sweep_and_compact();
    }

    /// Mark `obj`, copying it into the old generation first if it is young
    fn mark_or_copy(&mut self, obj: usize) -> usize {
        // SAFETY: `obj` was read from a root or from a marked object.
        let h = unsafe { object::header(obj) };
        if h.is_forwarded() {
            return h.forwarding_address();
        }

        let chunk = self.chunk_of(obj);
        if self.in_from_space(obj) {
            let old = self.state.old().promotion_target();
            if chunk.is_aligned() {
                let new = self.promote_aligned_object(obj, h.size(), old);
                unsafe { object::header(new) }.set_marked();
                self.queue.push(new);
                self.outcome.marked_objects += 1;
                return new;
            }
            self.promote_unaligned_object(chunk, old);
        }

        if !h.set_marked() {
            self.queue.push(obj);
            self.outcome.marked_objects += 1;
        }
        obj
    }

    fn drain_mark_queue(&mut self) {
        while let Some(obj) = self.queue.pop() {
            // SAFETY: only marked, unforwarded objects are queued.
            let (count, first) = unsafe {
                let h = object::header(obj);
                (h.ref_count(), object::first_strong_slot(obj))
            };
            if first > 0 {
                self.discovered.discover(obj);
            }
            for index in first..count {
                let value = unsafe { read_slot(obj, index) };
                if value == 0 {
                    continue;
                }
                let new = self.mark_or_copy(value);
                if new != value {
                    unsafe { write_slot(obj, index, new) };
                }
            }
        }
        log::trace!(
            "mark queue drained: {} pushed, {} segments at most",
            self.queue.total_pushed(),
            self.queue.max_segments()
        );
    }

    fn process_references_after_marking(&mut self) {
        for reference in self.discovered.take() {
            // SAFETY: discovered references are marked objects.
            let referent = unsafe { read_slot(reference, 0) };
            if referent == 0 {
                continue;
            }
            let h = unsafe { object::header(referent) };
            let survivor = if h.is_forwarded() {
                Some(h.forwarding_address())
            } else if !self.in_from_space(referent) && h.is_marked() {
                Some(referent)
            } else {
                None
            };
            unsafe { write_slot(reference, 0, survivor.unwrap_or(0)) };
            match survivor {
                Some(_) => self.discovered.record_kept(),
                None => self.discovered.record_cleared(),
            }
        }
    }

    // === Sweep and compact ===

    /// Plan, fix, compact and rebuild the old generation
    fn sweep_and_compact(&mut self) {
        let timer = GcTimer::new();
        self.plan_compaction();
        self.end_phase("plan", timer);

        let timer = GcTimer::new();
        self.fix_references();
        self.end_phase("fix", timer);

        let timer = GcTimer::new();
        self.compact();
        self.end_phase("compact", timer);

        let timer = GcTimer::new();
        let resident: Vec<ChunkRef> = self
            .state
            .space(self.state.old().resident_space())
            .chunks()
            .collect();
        for chunk in resident {
            self.heap.remembered_set.rebuild_chunk(chunk, &self.layout);
        }
        self.end_phase("rebuild", timer);
    }

    fn plan_compaction(&mut self) {
        let space = self.state.old().resident_space();
        let chunks: Vec<ChunkRef> = self
            .state
            .space(space)
            .aligned_chunks()
            .filter(|chunk| !chunk.should_sweep())
            .collect();

        let mut plan = RelocationPlan::new();
        if let Some(first) = chunks.first() {
            let mut dest_index = 0;
            let mut dest = first.objects_start();
            for chunk in &chunks {
                chunk.for_each_object(|obj, size| {
                    // SAFETY: walking the allocated part of an old chunk.
                    if !unsafe { object::header(obj) }.is_marked() {
                        return;
                    }
                    if dest + size > chunks[dest_index].end() {
                        plan.set_new_top(chunks[dest_index], dest);
                        dest_index += 1;
                        dest = chunks[dest_index].objects_start();
                    }
                    plan.add(obj, size, dest);
                    dest += size;
                });
            }
            plan.set_new_top(chunks[dest_index], dest);
            for chunk in &chunks[dest_index + 1..] {
                plan.set_new_top(*chunk, chunk.objects_start());
            }
        }
        plan.seal();
        self.outcome.moved_bytes = plan.moved_bytes();
        self.plan = plan;
    }

    fn fix_object(&self, obj: usize) {
        // SAFETY: `obj` is a marked object that has not moved yet.
        let count = unsafe { object::header(obj) }.ref_count();
        for index in 0..count {
            unsafe {
                let value = read_slot(obj, index);
                if value != 0 {
                    let new = self.plan.relocate(value);
                    if new != value {
                        write_slot(obj, index, new);
                    }
                }
            }
        }
    }

    fn fix_references(&mut self) {
        self.visit_roots(|c, obj| c.plan.relocate(obj));

        let space = self.state.old().resident_space();
        let chunks: Vec<ChunkRef> = self.state.space(space).chunks().collect();
        for chunk in chunks {
            if chunk.is_aligned() {
                chunk.for_each_object(|obj, _| {
                    if unsafe { object::header(obj) }.is_marked() {
                        self.fix_object(obj);
                    }
                });
                continue;
            }
            let obj = unaligned::object_of(chunk);
            if unsafe { object::header(obj) }.is_marked() {
                self.fix_object(obj);
            } else {
                self.dead_unaligned.push(chunk);
            }
        }
    }

    fn compact(&mut self) {
        let runs = self.plan.runs().to_vec();
        for run in runs {
            // SAFETY: runs are copied in planning order, so a destination never
            // holds an object that is still to be moved.
            unsafe {
                if run.moves() {
                    copy_memory_overlapping(run.old_start, run.new_start, run.len());
                }
                object::for_each_object(run.new_start, run.new_start + run.len(), |obj, _| {
                    object::header(obj).clear_marked()
                });
            }
        }

        let new_tops = self.plan.new_tops().to_vec();
        for (chunk, top) in new_tops {
            if self.heap.config.zap_chunks && top < chunk.top() {
                // SAFETY: everything above the new top was moved or is dead.
                unsafe { fill_memory(top, ZAP_CONSUMED, chunk.top() - top) };
            }
            chunk.set_top(top);
            if top == chunk.objects_start() && chunk.pinned_count() == 0 {
                self.state.extract_chunk(chunk);
                self.release_chunk(chunk);
            }
        }

        let space = self.state.old().resident_space();
        let sweep: Vec<ChunkRef> = self
            .state
            .space(space)
            .aligned_chunks()
            .filter(|chunk| chunk.should_sweep())
            .collect();
        for chunk in sweep {
            self.sweep_chunk(chunk);
            chunk.set_should_sweep(false);
            self.outcome.swept_chunks += 1;
        }

        for chunk in std::mem::take(&mut self.dead_unaligned) {
            self.state.extract_chunk(chunk);
            self.release_chunk(chunk);
        }
        let live_unaligned: Vec<ChunkRef> = self.state.space(space).unaligned_chunks().collect();
        for chunk in live_unaligned {
            unsafe { object::header(unaligned::object_of(chunk)) }.clear_marked();
        }
    }

    /// Turn runs of dead objects into fillers and drop a dead tail
    fn sweep_chunk(&mut self, chunk: ChunkRef) {
        let mut objects = Vec::new();
        chunk.for_each_object(|obj, size| objects.push((obj, size)));

        let mut dead_start: Option<usize> = None;
        let mut live_end = chunk.objects_start();
        for (obj, size) in objects {
            // SAFETY: `obj` is an object boundary of a chunk being swept.
            let h = unsafe { object::header(obj) };
            if h.is_marked() {
                if let Some(start) = dead_start.take() {
                    unsafe { initialize_object(start, &ObjectShape::filler(obj - start), 0) };
                }
                h.clear_marked();
                live_end = obj + size;
            } else if dead_start.is_none() {
                dead_start = Some(obj);
            }
        }

        if dead_start.is_some() {
            if self.heap.config.zap_chunks {
                unsafe { fill_memory(live_end, ZAP_CONSUMED, chunk.top() - live_end) };
            }
            chunk.set_top(live_end);
        }
    }
}
