//! Heap verification
//!
//! Cross-checks everything the collector relies on, while the world is stopped
//! and every mutator chunk has been retired:
//!
//! - chunk lists are consistent and accounting matches them
//! - aligned chunks sit on their alignment, unaligned objects carry their bit
//! - no object is left forwarded or marked
//! - the `REMEMBERED` bit is set exactly on old objects
//! - every reference and every root points at an object start
//! - an old object pointing into the young generation sits on a dirty card
//! - first-object tables of old chunks match the objects in them
//!
//! Failures are collected as messages rather than reported one by one, so a
//! single run shows the full extent of a corruption.

use crate::barrier::FirstObjectTable;
use crate::heap::aligned;
use crate::heap::chunk::{chunk_of, ChunkKind, ChunkRef};
use crate::heap::space::GenerationKind;
use crate::heap::state::HeapState;
use crate::heap::unaligned;
use crate::heap::Heap;
use crate::object::{self, read_slot};
use std::collections::HashSet;

/// Run every check and return one message per failure
pub(crate) fn verify_heap(heap: &Heap, state: &HeapState) -> Vec<String> {
    let mut failures = Vec::new();
    let objects = collect_objects(state);

    verify_structure(state, &mut failures);
    for space in state.spaces() {
        for chunk in space.chunks() {
            verify_chunk(heap, state, chunk, &objects, &mut failures);
        }
    }
    verify_roots(heap, &objects, &mut failures);

    if !failures.is_empty() {
        log::warn!("heap verification found {} problems", failures.len());
        for failure in failures.iter().take(16) {
            log::warn!("  {}", failure);
        }
    }
    failures
}

fn collect_objects(state: &HeapState) -> HashSet<usize> {
    let mut objects = HashSet::new();
    for space in state.spaces() {
        space.walk_objects(|obj, _| {
            objects.insert(obj);
        });
    }
    objects
}

fn verify_structure(state: &HeapState, failures: &mut Vec<String>) {
    for space in state.spaces() {
        failures.extend(space.verify_lists());
        if space.is_from_space() {
            failures.push(format!("{}: still flagged as from-space", space.name()));
        }
    }

    let young = state.summed_accounting(GenerationKind::Young);
    if young != *state.young().accounting() {
        failures.push(format!(
            "young accounting {:?} differs from its spaces {:?}",
            state.young().accounting(),
            young
        ));
    }
    let old = state.summed_accounting(GenerationKind::Old);
    if old != *state.old().accounting() {
        failures.push(format!(
            "old accounting {:?} differs from its spaces {:?}",
            state.old().accounting(),
            old
        ));
    }
}

fn verify_chunk(
    heap: &Heap,
    state: &HeapState,
    chunk: ChunkRef,
    objects: &HashSet<usize>,
    failures: &mut Vec<String>,
) {
    let layout = &heap.layout;
    let remembered_set = heap.remembered_set;
    let Some(space_id) = chunk.space() else {
        failures.push(format!("chunk {:#x} is linked but unowned", chunk.address()));
        return;
    };
    let is_old = state.space(space_id).is_old();

    match chunk.kind() {
        ChunkKind::Aligned => {
            if !aligned::is_properly_aligned(chunk, layout) {
                failures.push(format!("aligned chunk {:#x} is misaligned", chunk.address()));
            }
            if chunk.should_sweep() {
                failures.push(format!("chunk {:#x} still marked for sweeping", chunk.address()));
            }
            if is_old && remembered_set.is_enabled() {
                failures.extend(FirstObjectTable::new(chunk, layout).verify());
            }
        }
        ChunkKind::Unaligned => {
            let obj = unaligned::object_of(chunk);
            // SAFETY: an owned unaligned chunk holds one initialized object.
            if !unsafe { object::header(obj) }.is_unaligned() {
                failures.push(format!("object {:#x} lacks the unaligned bit", obj));
            }
        }
    }

    chunk.for_each_object(|obj, size| {
        // SAFETY: the chunk is walkable while the world is stopped.
        let h = unsafe { object::header(obj) };
        if h.is_forwarded() {
            failures.push(format!("object {:#x} is still forwarded", obj));
            return;
        }
        if h.is_marked() {
            failures.push(format!("object {:#x} is still marked", obj));
        }
        if h.is_filler() {
            return;
        }
        let expect_remembered = is_old && remembered_set.is_enabled();
        if h.is_remembered() != expect_remembered {
            failures.push(format!(
                "object {:#x} in {} has remembered bit {}",
                obj,
                state.space(space_id).name(),
                h.is_remembered()
            ));
        }
        if size != h.size() {
            failures.push(format!("object {:#x} changed size while walking", obj));
        }

        let mut points_young = false;
        for index in 0..h.ref_count() {
            // SAFETY: `index` is below the reference count.
            let value = unsafe { read_slot(obj, index) };
            if value == 0 {
                continue;
            }
            if !objects.contains(&value) {
                failures.push(format!(
                    "object {:#x} slot {} points at {:#x}, not an object",
                    obj, index, value
                ));
                continue;
            }
            let target = unsafe { chunk_of(value, layout) };
            if target.space().map_or(false, |id| state.space(id).is_young()) {
                points_young = true;
            }
        }

        if is_old && points_young && remembered_set.is_enabled() {
            // SAFETY: `obj` is a live object.
            if !unsafe { remembered_set.is_card_dirty_for_object(obj, layout) } {
                failures.push(format!(
                    "old object {:#x} points into the young generation from a clean card",
                    obj
                ));
            }
        }
    });
}

fn verify_roots(heap: &Heap, objects: &HashSet<usize>, failures: &mut Vec<String>) {
    let mut check = |kind: &str, obj: usize| {
        if obj != 0 && !objects.contains(&obj) {
            failures.push(format!("{} root {:#x} is not an object", kind, obj));
        }
    };

    heap.handles.lock().for_each_mut(|slot| check("handle", *slot));
    let providers: Vec<_> = heap.roots.lock().values().cloned().collect();
    for provider in providers {
        let kind = provider.root_type().to_string();
        provider.visit_roots(&mut |slot: &mut usize| check(&kind, *slot));
    }

    let pinned: Vec<usize> = heap.pinned.lock().objects().collect();
    for &obj in &pinned {
        check("pinned", obj);
    }
    for obj in pinned.into_iter().filter(|obj| objects.contains(obj)) {
        // SAFETY: `obj` was found among the heap's objects.
        let chunk = unsafe { chunk_of(obj, &heap.layout) };
        if chunk.pinned_count() == 0 {
            failures.push(format!(
                "pinned object {:#x} lies in chunk {:#x} with no pins",
                obj,
                chunk.address()
            ));
        }
    }
}
