//! Heap State - spaces and generations behind the heap lock
//!
//! Every chunk move goes through [`HeapState::append_chunk`] and
//! [`HeapState::extract_chunk`], which keep the generation accounting in step
//! with the per-space accounting.

use crate::config::HeapConfig;
use crate::heap::accounting::ChunksAccounting;
use crate::heap::chunk::{chunk_of, ChunkKind, ChunkLayout, ChunkRef};
use crate::heap::old::OldGeneration;
use crate::heap::space::{GenerationKind, Space, SpaceId};
use crate::heap::young::YoungGeneration;

pub struct HeapState {
    spaces: Vec<Space>,
    pub(crate) young: YoungGeneration,
    pub(crate) old: OldGeneration,
}

impl HeapState {
    pub fn new(config: &HeapConfig) -> Self {
        let mut spaces = Vec::new();
        let young = YoungGeneration::new(&mut spaces, config.max_survivor_spaces);
        let old = OldGeneration::new(
            config.old_generation,
            &mut spaces,
            config.max_survivor_spaces + 1,
        );
        Self { spaces, young, old }
    }

    pub fn spaces(&self) -> &[Space] {
        &self.spaces
    }

    #[inline]
    pub fn space(&self, id: SpaceId) -> &Space {
        &self.spaces[id.index()]
    }

    #[inline]
    pub(crate) fn space_mut(&mut self, id: SpaceId) -> &mut Space {
        &mut self.spaces[id.index()]
    }

    pub fn young(&self) -> &YoungGeneration {
        &self.young
    }

    pub fn old(&self) -> &OldGeneration {
        &self.old
    }

    fn generation_accounting_mut(&mut self, generation: GenerationKind) -> &mut ChunksAccounting {
        match generation {
            GenerationKind::Young => self.young.accounting_mut(),
            GenerationKind::Old => self.old.accounting_mut(),
        }
    }

    /// Link `chunk` at the tail of space `id`
    pub fn append_chunk(&mut self, id: SpaceId, chunk: ChunkRef) {
        let generation = self.space(id).generation();
        self.space_mut(id).append_chunk(chunk);
        let size = chunk.size();
        let accounting = self.generation_accounting_mut(generation);
        match chunk.kind() {
            ChunkKind::Aligned => accounting.note_aligned_added(size),
            ChunkKind::Unaligned => accounting.note_unaligned_added(size),
        }
    }

    /// Unlink `chunk` from its owning space, returning that space
    pub fn extract_chunk(&mut self, chunk: ChunkRef) -> SpaceId {
        let Some(id) = chunk.space() else {
            crate::fatal!("extracting chunk {:#x} that no space owns", chunk.address());
        };
        let generation = self.space(id).generation();
        self.space_mut(id).extract_chunk(chunk);
        let size = chunk.size();
        let accounting = self.generation_accounting_mut(generation);
        match chunk.kind() {
            ChunkKind::Aligned => accounting.note_aligned_removed(size),
            ChunkKind::Unaligned => accounting.note_unaligned_removed(size),
        }
        id
    }

    /// Relink `chunk` into space `to`
    pub fn move_chunk(&mut self, chunk: ChunkRef, to: SpaceId) {
        self.extract_chunk(chunk);
        self.append_chunk(to, chunk);
    }

    /// Unlink every chunk of space `id`
    pub fn take_all_chunks(&mut self, id: SpaceId) -> Vec<ChunkRef> {
        let chunks: Vec<ChunkRef> = self.space(id).chunks().collect();
        for &chunk in &chunks {
            self.extract_chunk(chunk);
        }
        chunks
    }

    /// Space owning the object at `obj`, `None` if its chunk is unowned
    ///
    /// # Safety
    /// `obj` must be the start of a heap object.
    #[inline]
    pub unsafe fn space_of_object(&self, obj: usize, layout: &ChunkLayout) -> Option<SpaceId> {
        chunk_of(obj, layout).space()
    }

    /// See [`OldGeneration::empty_from_space_into_to_space`]
    pub(crate) fn empty_old_from_space(&mut self) {
        self.old.empty_from_space_into_to_space(&mut self.spaces);
    }

    /// See [`OldGeneration::swap_spaces`]
    pub(crate) fn swap_old_spaces(&mut self) {
        self.old.swap_spaces(&mut self.spaces);
    }

    pub fn is_young(&self, id: SpaceId) -> bool {
        self.space(id).is_young()
    }

    pub fn clear_from_space_flags(&mut self) {
        for space in &mut self.spaces {
            space.set_from_space(false);
        }
    }

    pub fn young_chunk_bytes(&self) -> usize {
        self.young.accounting().chunk_bytes()
    }

    pub fn old_chunk_bytes(&self) -> usize {
        self.old.accounting().chunk_bytes()
    }

    /// Bytes of live-or-dead objects in survivor spaces
    pub fn survivor_chunk_bytes(&self) -> usize {
        self.young
            .all_spaces()
            .into_iter()
            .filter(|&id| id != self.young.eden())
            .map(|id| self.space(id).accounting().chunk_bytes())
            .sum()
    }

    /// Sum of the per-space accounting of one generation
    pub fn summed_accounting(&self, generation: GenerationKind) -> ChunksAccounting {
        self.spaces
            .iter()
            .filter(|s| s.generation() == generation)
            .fold(ChunksAccounting::new(), |acc, s| acc + *s.accounting())
    }
}
