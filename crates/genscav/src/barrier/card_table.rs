//! Card Table - one byte per card of an aligned chunk's object area
//!
//! Card `i` covers `[objects_start + i * card_size, objects_start + (i + 1) * card_size)`.
//! A dirty card means an object *starting* on that card may hold a reference into
//! the young generation. The write barrier dirties, the collector cleans.

use crate::heap::chunk::{ChunkLayout, ChunkRef};
use std::sync::atomic::{AtomicU8, Ordering};

pub const CARD_CLEAN: u8 = 0;
pub const CARD_DIRTY: u8 = 1;

/// View of the card table embedded in one aligned chunk
#[derive(Clone, Copy)]
pub struct CardTable<'a> {
    chunk: ChunkRef,
    layout: &'a ChunkLayout,
}

impl<'a> CardTable<'a> {
    pub fn new(chunk: ChunkRef, layout: &'a ChunkLayout) -> Self {
        debug_assert!(chunk.is_aligned());
        Self { chunk, layout }
    }

    #[inline]
    pub fn num_cards(&self) -> usize {
        self.layout.num_cards
    }

    #[inline]
    fn card(&self, index: usize) -> &AtomicU8 {
        crate::assert_context!(
            index < self.layout.num_cards,
            "card {} out of range for chunk {:#x}",
            index,
            self.chunk.address()
        );
        let addr = self.chunk.address() + self.layout.card_table_offset + index;
        // SAFETY: the table lies inside the chunk and the index was checked.
        unsafe { &*(addr as *const AtomicU8) }
    }

    /// Card covering `addr`
    #[inline]
    pub fn card_index(&self, addr: usize) -> usize {
        (addr - self.chunk.objects_start()) >> self.layout.card_shift
    }

    /// First address covered by card `index`
    #[inline]
    pub fn card_start(&self, index: usize) -> usize {
        self.chunk.objects_start() + (index << self.layout.card_shift)
    }

    #[inline]
    pub fn is_dirty(&self, index: usize) -> bool {
        self.card(index).load(Ordering::Acquire) != CARD_CLEAN
    }

    #[inline]
    pub fn dirty(&self, index: usize) {
        self.card(index).store(CARD_DIRTY, Ordering::Release);
    }

    #[inline]
    pub fn clean(&self, index: usize) {
        self.card(index).store(CARD_CLEAN, Ordering::Release);
    }

    /// Dirty the card covering `addr`
    #[inline]
    pub fn dirty_address(&self, addr: usize) {
        self.dirty(self.card_index(addr));
    }

    #[inline]
    pub fn is_address_dirty(&self, addr: usize) -> bool {
        self.is_dirty(self.card_index(addr))
    }

    pub fn clean_all(&self) {
        for index in 0..self.num_cards() {
            self.clean(index);
        }
    }

    /// Indexes of dirty cards starting below `limit`
    pub fn dirty_cards(&self, limit: usize) -> Vec<usize> {
        (0..self.num_cards())
            .take_while(|&i| self.card_start(i) < limit)
            .filter(|&i| self.is_dirty(i))
            .collect()
    }

    pub fn count_dirty(&self) -> usize {
        (0..self.num_cards()).filter(|&i| self.is_dirty(i)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::chunk::ChunkKind;
    use std::alloc::{alloc_zeroed, dealloc, Layout};

    const SIZE: usize = 64 * 1024;

    #[test]
    fn test_card_geometry_and_dirtying() {
        let layout = ChunkLayout::new(SIZE, 512, true);
        let mem = Layout::from_size_align(SIZE, SIZE).expect("layout");
        let base = unsafe { alloc_zeroed(mem) as usize };
        let chunk = unsafe { ChunkRef::from_address(base) };
        chunk.initialize(ChunkKind::Aligned, SIZE, layout.objects_start_offset, 0);

        let cards = CardTable::new(chunk, &layout);
        cards.clean_all();
        let start = chunk.objects_start();
        assert_eq!(cards.card_index(start), 0);
        assert_eq!(cards.card_index(start + 511), 0);
        assert_eq!(cards.card_index(start + 512), 1);
        assert_eq!(cards.card_start(3), start + 3 * 512);

        cards.dirty_address(start + 1030);
        assert!(cards.is_dirty(2));
        assert_eq!(cards.count_dirty(), 1);
        assert_eq!(cards.dirty_cards(start + 4096), vec![2]);
        assert!(cards.dirty_cards(start + 1024).is_empty());

        cards.clean(2);
        assert_eq!(cards.count_dirty(), 0);
        unsafe { dealloc(base as *mut u8, mem) };
    }
}
