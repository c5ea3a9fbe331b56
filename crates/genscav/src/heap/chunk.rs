//! Heap Chunk - the common header of aligned and unaligned chunks
//!
//! Chunk Layout:
//! ┌──────────────────────────┐ <- chunk base (aligned chunks: base % chunk_size == 0)
//! │ ChunkHeader              │
//! ├──────────────────────────┤ <- card_table_offset      (aligned, remembered set on)
//! │ card table, 1 byte/card  │
//! ├──────────────────────────┤ <- first_object_table_offset
//! │ first-object table       │
//! ├──────────────────────────┤ <- objects_start
//! │ objects ...              │
//! │                          │ <- top
//! │ free                     │
//! └──────────────────────────┘ <- end
//!
//! All offsets in the header are relative to the chunk base. `prev` and `next`
//! are signed byte distances to the neighbouring chunks, so a chunk list stays
//! valid wherever the memory holding it is mapped.

use crate::heap::space::SpaceId;
use crate::object::{self, OBJECT_ALIGNMENT};
use crate::util::Alignment;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// Bytes reserved for the chunk header; unaligned chunks place their object here
pub const CHUNK_HEADER_SIZE: usize =
    Alignment::align_up(std::mem::size_of::<ChunkHeader>(), 64);

/// Offset of the single object inside an unaligned chunk
pub const UNALIGNED_OBJECT_OFFSET: usize = CHUNK_HEADER_SIZE;

/// Which of the two chunk shapes a header belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChunkKind {
    Aligned = 0,
    Unaligned = 1,
}

/// Header stored at the base of every chunk
#[repr(C)]
pub struct ChunkHeader {
    top: AtomicUsize,
    end: AtomicUsize,
    objects_start: AtomicUsize,
    size: AtomicUsize,
    prev: AtomicIsize,
    next: AtomicIsize,
    free_next: AtomicUsize,
    space: AtomicUsize,
    pinned_count: AtomicUsize,
    identity_hash_salt: AtomicU64,
    kind: AtomicU8,
    should_sweep: AtomicBool,
    card: AtomicU8,
}

/// Geometry shared by every aligned chunk of a heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    pub chunk_size: usize,
    pub card_size: usize,
    pub card_shift: u32,
    pub num_cards: usize,
    pub card_table_offset: usize,
    pub first_object_table_offset: usize,
    pub objects_start_offset: usize,
}

impl ChunkLayout {
    /// Lay out an aligned chunk; the tables are zero-sized without a remembered set
    pub fn new(chunk_size: usize, card_size: usize, remembered_set: bool) -> Self {
        let num_cards = if remembered_set {
            (chunk_size - CHUNK_HEADER_SIZE).div_ceil(card_size)
        } else {
            0
        };
        let card_table_offset = CHUNK_HEADER_SIZE;
        let first_object_table_offset = card_table_offset + num_cards;
        let objects_start_offset =
            Alignment::align_up(first_object_table_offset + num_cards, 64);

        Self {
            chunk_size,
            card_size,
            card_shift: Alignment::log2_floor(card_size),
            num_cards,
            card_table_offset,
            first_object_table_offset,
            objects_start_offset,
        }
    }

    /// Bytes available for objects in one aligned chunk
    pub fn object_area(&self) -> usize {
        self.chunk_size - self.objects_start_offset
    }

    /// Base of the aligned chunk containing `addr`
    #[inline]
    pub fn aligned_base(&self, addr: usize) -> usize {
        Alignment::align_down(addr, self.chunk_size)
    }
}

/// Handle to a chunk: its base address
///
/// The header lives in the memory the handle points to, so copying a handle is
/// free and never duplicates chunk state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkRef(usize);

impl ChunkRef {
    /// # Safety
    /// `addr` must be the base of memory that holds (or is about to be
    /// initialized with) a chunk header and stays mapped while the handle is used.
    #[inline]
    pub unsafe fn from_address(addr: usize) -> Self {
        debug_assert!(addr != 0);
        ChunkRef(addr)
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.0
    }

    #[inline]
    pub fn header(&self) -> &ChunkHeader {
        // SAFETY: handles are only created for live chunk memory.
        unsafe { &*(self.0 as *const ChunkHeader) }
    }

    /// Reset every header field for a chunk that is being handed out
    pub fn initialize(&self, kind: ChunkKind, size: usize, objects_start: usize, salt: u64) {
        let h = self.header();
        h.top.store(objects_start, Ordering::Relaxed);
        h.end.store(size, Ordering::Relaxed);
        h.objects_start.store(objects_start, Ordering::Relaxed);
        h.size.store(size, Ordering::Relaxed);
        h.prev.store(0, Ordering::Relaxed);
        h.next.store(0, Ordering::Relaxed);
        h.free_next.store(0, Ordering::Relaxed);
        h.space.store(0, Ordering::Relaxed);
        h.pinned_count.store(0, Ordering::Relaxed);
        h.identity_hash_salt.store(salt, Ordering::Relaxed);
        h.kind.store(kind as u8, Ordering::Relaxed);
        h.should_sweep.store(false, Ordering::Relaxed);
        h.card.store(0, Ordering::Release);
    }

    // === Geometry ===

    #[inline]
    pub fn kind(&self) -> ChunkKind {
        if self.header().kind.load(Ordering::Relaxed) == ChunkKind::Unaligned as u8 {
            ChunkKind::Unaligned
        } else {
            ChunkKind::Aligned
        }
    }

    #[inline]
    pub fn is_aligned(&self) -> bool {
        self.kind() == ChunkKind::Aligned
    }

    /// Total chunk size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.header().size.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn objects_start(&self) -> usize {
        self.0 + self.header().objects_start.load(Ordering::Relaxed)
    }

    /// Next free address
    #[inline]
    pub fn top(&self) -> usize {
        self.0 + self.header().top.load(Ordering::Acquire)
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.0 + self.header().end.load(Ordering::Relaxed)
    }

    /// Move the allocation pointer; only the collector or a chunk owner may call this
    #[inline]
    pub fn set_top(&self, top: usize) {
        crate::assert_context!(
            top >= self.objects_start() && top <= self.end(),
            "top {:#x} outside chunk {:#x}",
            top,
            self.0
        );
        self.header().top.store(top - self.0, Ordering::Release);
    }

    /// Raw top offset cell, for the allocation fast path
    #[inline]
    pub(crate) fn top_offset_cell(&self) -> &AtomicUsize {
        &self.header().top
    }

    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.top() - self.objects_start()
    }

    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.end() - self.top()
    }

    /// Whether `addr` lies in the allocated part of the chunk
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.objects_start() && addr < self.top()
    }

    // === Links ===

    #[inline]
    fn decode_link(&self, offset: isize) -> Option<ChunkRef> {
        if offset == 0 {
            None
        } else {
            Some(ChunkRef(self.0.wrapping_add_signed(offset)))
        }
    }

    #[inline]
    fn encode_link(&self, other: Option<ChunkRef>) -> isize {
        match other {
            Some(chunk) => (chunk.0 as isize).wrapping_sub(self.0 as isize),
            None => 0,
        }
    }

    #[inline]
    pub fn next(&self) -> Option<ChunkRef> {
        self.decode_link(self.header().next.load(Ordering::Acquire))
    }

    #[inline]
    pub fn prev(&self) -> Option<ChunkRef> {
        self.decode_link(self.header().prev.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_next(&self, next: Option<ChunkRef>) {
        self.header()
            .next
            .store(self.encode_link(next), Ordering::Release);
    }

    #[inline]
    pub fn set_prev(&self, prev: Option<ChunkRef>) {
        self.header()
            .prev
            .store(self.encode_link(prev), Ordering::Release);
    }

    /// Link in the chunk allocator's free list, an absolute address
    #[inline]
    pub(crate) fn free_next(&self) -> usize {
        self.header().free_next.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_free_next(&self, next: usize) {
        self.header().free_next.store(next, Ordering::Release);
    }

    // === Ownership ===

    #[inline]
    pub fn space(&self) -> Option<SpaceId> {
        match self.header().space.load(Ordering::Acquire) {
            0 => None,
            raw => Some(SpaceId::from_raw(raw - 1)),
        }
    }

    #[inline]
    pub fn set_space(&self, space: Option<SpaceId>) {
        let raw = space.map_or(0, |id| id.index() + 1);
        self.header().space.store(raw, Ordering::Release);
    }

    // === Pinning and sweeping ===

    #[inline]
    pub fn pinned_count(&self) -> usize {
        self.header().pinned_count.load(Ordering::Acquire)
    }

    pub fn increment_pinned(&self) {
        self.header().pinned_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decrement_pinned(&self) {
        let previous = self.header().pinned_count.fetch_sub(1, Ordering::AcqRel);
        crate::assert_context!(previous > 0, "pinned count of chunk {:#x} underflowed", self.0);
    }

    #[inline]
    pub fn should_sweep(&self) -> bool {
        self.header().should_sweep.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_should_sweep(&self, sweep: bool) {
        self.header().should_sweep.store(sweep, Ordering::Relaxed);
    }

    #[inline]
    pub fn identity_hash_salt(&self) -> u64 {
        self.header().identity_hash_salt.load(Ordering::Relaxed)
    }

    /// The single card of an unaligned chunk
    #[inline]
    pub fn header_card(&self) -> &AtomicU8 {
        &self.header().card
    }

    // === Objects ===

    /// Visit every object between `objects_start` and `top`
    pub fn for_each_object<F>(&self, visitor: F)
    where
        F: FnMut(usize, usize),
    {
        // SAFETY: the allocated part of a chunk is always densely packed with
        // initialized objects while the world is stopped.
        unsafe { object::for_each_object(self.objects_start(), self.top(), visitor) }
    }
}

/// The chunk holding `obj`
///
/// Unaligned objects carry a header bit; everything else is found by masking.
/// Forwarded objects are always aligned.
///
/// # Safety
/// `obj` must be the start of a heap object.
#[inline]
pub unsafe fn chunk_of(obj: usize, layout: &ChunkLayout) -> ChunkRef {
    if object::header(obj).is_unaligned() {
        ChunkRef(obj - UNALIGNED_OBJECT_OFFSET)
    } else {
        ChunkRef(layout.aligned_base(obj))
    }
}

/// Round an allocation request to the object alignment and minimum size
#[inline]
pub fn object_allocation_size(size: usize) -> usize {
    Alignment::align_up(size.max(object::MIN_OBJECT_SIZE), OBJECT_ALIGNMENT)
}
