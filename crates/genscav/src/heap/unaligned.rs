//! Unaligned Heap Chunk
//!
//! One large object per chunk, placed right after the header at
//! [`UNALIGNED_OBJECT_OFFSET`]. The object carries the `UNALIGNED` header bit so
//! its chunk can be found by subtraction. Promotion never copies such an object;
//! its chunk is relinked into the target space instead.

use crate::heap::chunk::{ChunkKind, ChunkRef, UNALIGNED_OBJECT_OFFSET};
use crate::util::Alignment;

/// Chunk size needed for an object of `object_size` bytes
#[inline]
pub fn required_chunk_size(object_size: usize, page_size: usize) -> usize {
    Alignment::align_up(UNALIGNED_OBJECT_OFFSET + object_size, page_size)
}

/// Write a fresh unaligned chunk header
pub fn initialize(chunk: ChunkRef, size: usize, salt: u64) {
    chunk.initialize(ChunkKind::Unaligned, size, UNALIGNED_OBJECT_OFFSET, salt);
}

/// The single object of an unaligned chunk
#[inline]
pub fn object_of(chunk: ChunkRef) -> usize {
    chunk.address() + UNALIGNED_OBJECT_OFFSET
}

/// Chunk owning an unaligned object
///
/// # Safety
/// `obj` must be the object of a live unaligned chunk.
#[inline]
pub unsafe fn chunk_for_object(obj: usize) -> ChunkRef {
    ChunkRef::from_address(obj - UNALIGNED_OBJECT_OFFSET)
}
