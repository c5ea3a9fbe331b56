//! Remembered Set - which old objects may point into the young generation
//!
//! Old objects carry the `REMEMBERED` header bit. A reference store into such an
//! object dirties the card its start lies on (aligned chunks) or the single header
//! card (unaligned chunks). An incremental collection scans only dirty cards of
//! the old generation instead of the whole of it.
//!
//! With [`RememberedSet::None`] there are no tables, no barrier work, and every
//! collection must be complete.

use crate::barrier::card_table::{CardTable, CARD_CLEAN, CARD_DIRTY};
use crate::barrier::first_object_table::FirstObjectTable;
use crate::heap::chunk::{chunk_of, ChunkKind, ChunkLayout, ChunkRef};
use crate::object;
use std::sync::atomic::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RememberedSet {
    CardTable,
    None,
}

impl RememberedSet {
    pub fn from_config(enabled: bool) -> Self {
        if enabled {
            RememberedSet::CardTable
        } else {
            RememberedSet::None
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        matches!(self, RememberedSet::CardTable)
    }

    /// Reset the tables of a chunk that is being produced or reused
    pub fn initialize_chunk(&self, chunk: ChunkRef, layout: &ChunkLayout) {
        if !self.is_enabled() {
            return;
        }
        match chunk.kind() {
            ChunkKind::Aligned => {
                CardTable::new(chunk, layout).clean_all();
                FirstObjectTable::new(chunk, layout).clear();
            }
            ChunkKind::Unaligned => chunk.header_card().store(CARD_CLEAN, Ordering::Release),
        }
    }

    /// Register an object that was just placed in the old generation
    pub fn enable_for_object(&self, chunk: ChunkRef, layout: &ChunkLayout, obj: usize, size: usize) {
        if !self.is_enabled() {
            return;
        }
        // SAFETY: the collector just wrote this object.
        unsafe { object::header(obj) }.set_remembered();
        if chunk.is_aligned() {
            FirstObjectTable::new(chunk, layout).record_object(obj, obj + size);
        }
    }

    /// Register every object of a chunk that moved into the old generation whole
    pub fn enable_for_chunk(&self, chunk: ChunkRef, layout: &ChunkLayout) {
        if !self.is_enabled() {
            return;
        }
        // SAFETY: the chunk is walkable while the world is stopped.
        chunk.for_each_object(|obj, _| unsafe { object::header(obj) }.set_remembered());
        self.rebuild_chunk(chunk, layout);
    }

    /// Recompute the first-object table and clean all cards
    pub fn rebuild_chunk(&self, chunk: ChunkRef, layout: &ChunkLayout) {
        if !self.is_enabled() {
            return;
        }
        match chunk.kind() {
            ChunkKind::Aligned => {
                FirstObjectTable::new(chunk, layout).rebuild();
                CardTable::new(chunk, layout).clean_all();
            }
            ChunkKind::Unaligned => chunk.header_card().store(CARD_CLEAN, Ordering::Release),
        }
    }

    /// Clean every card of a chunk
    pub fn clean_cards(&self, chunk: ChunkRef, layout: &ChunkLayout) {
        if !self.is_enabled() {
            return;
        }
        match chunk.kind() {
            ChunkKind::Aligned => CardTable::new(chunk, layout).clean_all(),
            ChunkKind::Unaligned => chunk.header_card().store(CARD_CLEAN, Ordering::Release),
        }
    }

    /// Dirty the card holding the start of `obj`
    ///
    /// # Safety
    /// `obj` must be the start of a live heap object.
    #[inline]
    pub unsafe fn dirty_card_for_object(&self, obj: usize, layout: &ChunkLayout) {
        if !self.is_enabled() {
            return;
        }
        let chunk = chunk_of(obj, layout);
        match chunk.kind() {
            ChunkKind::Aligned => CardTable::new(chunk, layout).dirty_address(obj),
            ChunkKind::Unaligned => chunk.header_card().store(CARD_DIRTY, Ordering::Release),
        }
    }

    /// # Safety
    /// `obj` must be the start of a live heap object.
    pub unsafe fn is_card_dirty_for_object(&self, obj: usize, layout: &ChunkLayout) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let chunk = chunk_of(obj, layout);
        match chunk.kind() {
            ChunkKind::Aligned => CardTable::new(chunk, layout).is_address_dirty(obj),
            ChunkKind::Unaligned => chunk.header_card().load(Ordering::Acquire) != CARD_CLEAN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::chunk::UNALIGNED_OBJECT_OFFSET;
    use crate::object::{initialize_object, ObjectShape, UNALIGNED_MASK};
    use std::alloc::{alloc_zeroed, dealloc, Layout};

    const SIZE: usize = 64 * 1024;

    #[test]
    fn test_barrier_dirties_card_of_object_start() {
        let layout = ChunkLayout::new(SIZE, 512, true);
        let mem = Layout::from_size_align(SIZE, SIZE).expect("layout");
        let base = unsafe { alloc_zeroed(mem) as usize };
        let chunk = unsafe { ChunkRef::from_address(base) };
        chunk.initialize(ChunkKind::Aligned, SIZE, layout.objects_start_offset, 0);

        let rs = RememberedSet::CardTable;
        rs.initialize_chunk(chunk, &layout);

        // object starting just before a card boundary, spilling into the next card
        let shape = ObjectShape::plain(4, 64);
        let obj = chunk.objects_start() + 480;
        unsafe {
            initialize_object(chunk.objects_start(), &ObjectShape::filler(480), 0);
            initialize_object(obj, &shape, 0);
        }
        chunk.set_top(obj + shape.size());
        rs.enable_for_object(chunk, &layout, obj, shape.size());
        assert!(unsafe { object::header(obj) }.is_remembered());

        unsafe { rs.dirty_card_for_object(obj, &layout) };
        let cards = CardTable::new(chunk, &layout);
        assert!(cards.is_dirty(0));
        assert!(!cards.is_dirty(1));
        assert!(unsafe { rs.is_card_dirty_for_object(obj, &layout) });

        rs.rebuild_chunk(chunk, &layout);
        assert_eq!(cards.count_dirty(), 0);
        assert_eq!(FirstObjectTable::new(chunk, &layout).covering_object(1), Some(obj));
        unsafe { dealloc(base as *mut u8, mem) };
    }

    #[test]
    fn test_unaligned_chunks_use_header_card() {
        let layout = ChunkLayout::new(SIZE, 512, true);
        let size = 8192;
        let mem = Layout::from_size_align(size, 4096).expect("layout");
        let base = unsafe { alloc_zeroed(mem) as usize };
        let chunk = unsafe { ChunkRef::from_address(base) };
        chunk.initialize(ChunkKind::Unaligned, size, UNALIGNED_OBJECT_OFFSET, 0);
        let obj = chunk.objects_start();
        let shape = ObjectShape::plain(1, 1024);
        unsafe { initialize_object(obj, &shape, UNALIGNED_MASK) };
        chunk.set_top(obj + shape.size());

        let rs = RememberedSet::CardTable;
        rs.initialize_chunk(chunk, &layout);
        unsafe { rs.dirty_card_for_object(obj, &layout) };
        assert_eq!(chunk.header_card().load(Ordering::Acquire), CARD_DIRTY);
        rs.clean_cards(chunk, &layout);
        assert!(!unsafe { rs.is_card_dirty_for_object(obj, &layout) });
        unsafe { dealloc(base as *mut u8, mem) };
    }

    #[test]
    fn test_disabled_set_does_nothing() {
        let rs = RememberedSet::from_config(false);
        assert!(!rs.is_enabled());
        let layout = ChunkLayout::new(SIZE, 512, false);
        // never touches memory when disabled
        unsafe { rs.dirty_card_for_object(0x1000, &layout) };
    }
}
