//! Aligned Heap Chunk
//!
//! Size equals alignment, so the chunk of any interior address is found by
//! masking. Aligned chunks hold many small objects bump-allocated between
//! `objects_start` and `end`, and are the unit the free list caches.

use crate::heap::chunk::{ChunkKind, ChunkLayout, ChunkRef};

/// Enclosing aligned chunk of `addr`
///
/// # Safety
/// `addr` must lie inside a live aligned chunk of this layout.
#[inline]
pub unsafe fn enclosing_chunk(addr: usize, layout: &ChunkLayout) -> ChunkRef {
    ChunkRef::from_address(layout.aligned_base(addr))
}

/// Write a fresh aligned chunk header
pub fn initialize(chunk: ChunkRef, layout: &ChunkLayout, salt: u64) {
    chunk.initialize(
        ChunkKind::Aligned,
        layout.chunk_size,
        layout.objects_start_offset,
        salt,
    );
}

/// Drop every object by moving `top` back to the start
pub fn reset(chunk: ChunkRef) {
    chunk.set_top(chunk.objects_start());
}

/// Whether an object of `size` bytes could ever fit an aligned chunk
#[inline]
pub fn fits(size: usize, layout: &ChunkLayout) -> bool {
    size <= layout.object_area()
}

/// True when `chunk` is correctly placed for this layout
pub fn is_properly_aligned(chunk: ChunkRef, layout: &ChunkLayout) -> bool {
    chunk.address() % layout.chunk_size == 0
        && chunk.size() == layout.chunk_size
        && chunk.objects_start() == chunk.address() + layout.objects_start_offset
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::{alloc, dealloc, Layout};

    #[test]
    fn test_initialize_and_mask() {
        let layout = ChunkLayout::new(64 * 1024, 256, true);
        let mem = Layout::from_size_align(64 * 1024, 64 * 1024).expect("layout");
        let base = unsafe { alloc(mem) as usize };
        let chunk = unsafe { ChunkRef::from_address(base) };
        initialize(chunk, &layout, 3);

        assert!(is_properly_aligned(chunk, &layout));
        assert_eq!(unsafe { enclosing_chunk(base + 1000, &layout) }, chunk);
        assert!(fits(layout.object_area(), &layout));
        assert!(!fits(layout.object_area() + 8, &layout));

        chunk.set_top(chunk.objects_start() + 64);
        reset(chunk);
        assert_eq!(chunk.used_bytes(), 0);
        unsafe { dealloc(base as *mut u8, mem) };
    }
}
