//! Heap walking and occupancy reports
//!
//! Walks run while the world is stopped and see every chunk, including the
//! chunks mutators are still allocating in (reported with `space: None`).

use crate::heap::chunk::{ChunkKind, ChunkRef};
use crate::heap::space::{GenerationKind, Space};
use crate::heap::state::HeapState;
use crate::object;
use serde::Serialize;

/// One chunk as seen by [`Heap::walk_chunks`](crate::Heap::walk_chunks)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkInfo {
    pub address: usize,
    pub aligned: bool,
    pub size: usize,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub pinned_count: usize,
    /// Owning space name; `None` while a mutator owns the chunk
    pub space: Option<String>,
}

impl ChunkInfo {
    pub(crate) fn new(chunk: ChunkRef, space: Option<&Space>) -> Self {
        Self {
            address: chunk.address(),
            aligned: chunk.kind() == ChunkKind::Aligned,
            size: chunk.size(),
            used_bytes: chunk.used_bytes(),
            free_bytes: chunk.free_bytes(),
            pinned_count: chunk.pinned_count(),
            space: space.map(|s| s.name().to_string()),
        }
    }
}

/// One object as seen by [`Heap::walk_objects`](crate::Heap::walk_objects)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    pub address: usize,
    pub size: usize,
    pub ref_count: usize,
    pub generation: Option<GenerationKind>,
}

/// Occupancy of one space
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpaceSummary {
    pub name: String,
    pub age: usize,
    pub chunk_count: usize,
    pub aligned_chunks: usize,
    pub unaligned_chunks: usize,
    pub chunk_bytes: usize,
    pub used_bytes: usize,
    /// Objects other than fillers
    pub object_count: usize,
}

impl SpaceSummary {
    pub(crate) fn of(space: &Space) -> Self {
        let accounting = space.accounting();
        let mut object_count = 0;
        space.walk_objects(|obj, _| {
            // SAFETY: walks run while the world is stopped.
            if !unsafe { object::header(obj) }.is_filler() {
                object_count += 1;
            }
        });
        Self {
            name: space.name().to_string(),
            age: space.age(),
            chunk_count: accounting.chunk_count(),
            aligned_chunks: accounting.aligned_count,
            unaligned_chunks: accounting.unaligned_count,
            chunk_bytes: accounting.chunk_bytes(),
            used_bytes: space.used_bytes(),
            object_count,
        }
    }
}

/// Occupancy of the whole heap at a safepoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpaceUsage {
    pub eden: SpaceSummary,
    /// Survivor spaces holding objects between collections, youngest first
    pub survivors: Vec<SpaceSummary>,
    /// Resident old space
    pub old: SpaceSummary,
    /// Chunk bytes mutators own and have not retired yet
    pub mutator_chunk_bytes: usize,
    pub free_list_chunks: usize,
    pub free_list_bytes: usize,
    pub committed_bytes: usize,
}

impl SpaceUsage {
    pub(crate) fn collect(state: &HeapState) -> Self {
        let young = state.young();
        let survivors = (0..young.max_survivor_spaces())
            .map(|i| SpaceSummary::of(state.space(young.survivor_from(i))))
            .collect();
        Self {
            eden: SpaceSummary::of(state.space(young.eden())),
            survivors,
            old: SpaceSummary::of(state.space(state.old().resident_space())),
            ..Default::default()
        }
    }

    pub fn survivor_object_count(&self) -> usize {
        self.survivors.iter().map(|s| s.object_count).sum()
    }

    pub fn young_chunk_bytes(&self) -> usize {
        self.eden.chunk_bytes + self.survivors.iter().map(|s| s.chunk_bytes).sum::<usize>()
    }
}
