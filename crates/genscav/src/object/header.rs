//! Object Header - Metadata the collector reads and writes on every object
//!
//! Object Layout (64-bit):
//! ┌─────────────────────────────────────────┐
//! │         Header word (8 bytes)           │  <- AtomicU64
//! │  - Bit 0: Forwarded (word = new | 1)    │
//! │  - Bit 1: Remembered (old object)       │
//! │  - Bit 2: Marked                        │
//! │  - Bit 3: Unaligned chunk               │
//! │  - Bit 4: Identity hash assigned        │
//! │  - Bits 32-63: Identity hash            │
//! ├─────────────────────────────────────────┤
//! │         Shape word (8 bytes)            │  <- AtomicU64
//! │  - Bits 0-31: Object size in bytes      │
//! │  - Bits 32-47: Reference slot count     │
//! │  - Bits 48-55: Object kind              │
//! ├─────────────────────────────────────────┤
//! │      Reference slots (8 bytes each)     │
//! ├─────────────────────────────────────────┤
//! │      Raw payload                        │
//! └─────────────────────────────────────────┘
//!
//! A forwarded object keeps its shape word, so the size of an evacuated object
//! can still be read at its old location.

use crate::error::{GcError, Result};
use crate::util::Alignment;
use std::sync::atomic::{AtomicU64, Ordering};

/// Size of object header in bytes
pub const HEADER_SIZE: usize = 16;

/// Size of a reference slot
pub const WORD_SIZE: usize = 8;

/// Minimum object alignment (bytes)
pub const OBJECT_ALIGNMENT: usize = 8;

/// Smallest object the heap hands out
pub const MIN_OBJECT_SIZE: usize = HEADER_SIZE;

/// Header word bits
pub const FORWARDED_MASK: u64 = 1 << 0;
pub const REMEMBERED_MASK: u64 = 1 << 1;
pub const MARKED_MASK: u64 = 1 << 2;
pub const UNALIGNED_MASK: u64 = 1 << 3;
pub const HASHED_MASK: u64 = 1 << 4;
const HASH_SHIFT: u32 = 32;

const SIZE_MASK: u64 = 0xFFFF_FFFF;
const REF_COUNT_SHIFT: u32 = 32;
const REF_COUNT_MASK: u64 = 0xFFFF;
const KIND_SHIFT: u32 = 48;
const KIND_MASK: u64 = 0xFF;

/// What the collector needs to know about an object's contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectKind {
    /// All reference slots are strong
    Plain = 0,
    /// Slot 0 is a weak referent, cleared when nothing else keeps it alive
    Reference = 1,
    /// Dead space left behind by a sweep, never referenced
    Filler = 2,
}

impl ObjectKind {
    fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            0 => Some(Self::Plain),
            1 => Some(Self::Reference),
            2 => Some(Self::Filler),
            _ => None,
        }
    }
}

/// Layout request for a new object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectShape {
    pub kind: ObjectKind,
    pub ref_count: usize,
    pub payload_bytes: usize,
}

impl ObjectShape {
    /// Object with `ref_count` strong slots and `payload_bytes` of raw data
    pub const fn plain(ref_count: usize, payload_bytes: usize) -> Self {
        Self {
            kind: ObjectKind::Plain,
            ref_count,
            payload_bytes,
        }
    }

    /// Reference object: one weak referent slot followed by `strong_refs` strong slots
    pub const fn reference(strong_refs: usize, payload_bytes: usize) -> Self {
        Self {
            kind: ObjectKind::Reference,
            ref_count: strong_refs + 1,
            payload_bytes,
        }
    }

    /// Filler covering exactly `size` bytes
    pub const fn filler(size: usize) -> Self {
        Self {
            kind: ObjectKind::Filler,
            ref_count: 0,
            payload_bytes: size - HEADER_SIZE,
        }
    }

    /// Total object size, header included, rounded to the object alignment
    pub const fn size(&self) -> usize {
        let raw = HEADER_SIZE + self.ref_count * WORD_SIZE + self.payload_bytes;
        let aligned = Alignment::align_up(raw, OBJECT_ALIGNMENT);
        if aligned < MIN_OBJECT_SIZE {
            MIN_OBJECT_SIZE
        } else {
            aligned
        }
    }

    /// Check the shape fits into a shape word
    pub fn validate(&self) -> Result<()> {
        if self.ref_count as u64 > REF_COUNT_MASK {
            return Err(GcError::InvalidArgument(format!(
                "object has {} reference slots, at most {} are supported",
                self.ref_count, REF_COUNT_MASK
            )));
        }
        if self.size() as u64 > SIZE_MASK {
            return Err(GcError::InvalidArgument(format!(
                "object size {} exceeds the header limit",
                self.size()
            )));
        }
        if self.kind == ObjectKind::Reference && self.ref_count == 0 {
            return Err(GcError::InvalidArgument(
                "reference objects need a referent slot".to_string(),
            ));
        }
        Ok(())
    }

    fn encode(&self) -> u64 {
        (self.size() as u64 & SIZE_MASK)
            | ((self.ref_count as u64 & REF_COUNT_MASK) << REF_COUNT_SHIFT)
            | ((self.kind as u64) << KIND_SHIFT)
    }
}

/// Object Header
///
/// Every heap object starts with this header.
#[repr(C)]
pub struct ObjectHeader {
    word: AtomicU64,
    shape: AtomicU64,
}

impl ObjectHeader {
    /// Write a fresh header; `flags` is a combination of the header bit masks
    pub fn initialize(&self, shape: &ObjectShape, flags: u64) {
        self.shape.store(shape.encode(), Ordering::Relaxed);
        self.word.store(flags, Ordering::Release);
    }

    // === Shape ===

    /// Object size in bytes, header included
    #[inline]
    pub fn size(&self) -> usize {
        (self.shape.load(Ordering::Relaxed) & SIZE_MASK) as usize
    }

    #[inline]
    pub fn ref_count(&self) -> usize {
        ((self.shape.load(Ordering::Relaxed) >> REF_COUNT_SHIFT) & REF_COUNT_MASK) as usize
    }

    #[inline]
    pub fn kind(&self) -> Option<ObjectKind> {
        ObjectKind::from_bits((self.shape.load(Ordering::Relaxed) >> KIND_SHIFT) & KIND_MASK)
    }

    #[inline]
    pub fn is_reference_object(&self) -> bool {
        self.kind() == Some(ObjectKind::Reference)
    }

    #[inline]
    pub fn is_filler(&self) -> bool {
        self.kind() == Some(ObjectKind::Filler)
    }

    // === Header word ===

    /// Raw header word
    #[inline]
    pub fn word(&self) -> u64 {
        self.word.load(Ordering::Acquire)
    }

    /// Overwrite the raw header word, used when a copy inherits its original's flags
    #[inline]
    pub fn set_word(&self, word: u64) {
        self.word.store(word, Ordering::Release);
    }

    // === Forwarding Pointer Operations ===

    #[inline]
    pub fn is_forwarded(&self) -> bool {
        self.word() & FORWARDED_MASK != 0
    }

    /// New address of a forwarded object
    #[inline]
    pub fn forwarding_address(&self) -> usize {
        (self.word() & !FORWARDED_MASK) as usize
    }

    /// Install a forwarding pointer, destroying the flag bits
    #[inline]
    pub fn forward_to(&self, new_addr: usize) {
        debug_assert!(Alignment::is_aligned(new_addr, OBJECT_ALIGNMENT));
        self.word.store(new_addr as u64 | FORWARDED_MASK, Ordering::Release);
    }

    // === Flag Operations ===

    #[inline]
    fn has_flag(&self, mask: u64) -> bool {
        let word = self.word();
        word & FORWARDED_MASK == 0 && word & mask != 0
    }

    #[inline]
    pub fn is_marked(&self) -> bool {
        self.has_flag(MARKED_MASK)
    }

    /// Set the mark bit, returns true if it was already set
    #[inline]
    pub fn set_marked(&self) -> bool {
        self.word.fetch_or(MARKED_MASK, Ordering::AcqRel) & MARKED_MASK != 0
    }

    #[inline]
    pub fn clear_marked(&self) {
        self.word.fetch_and(!MARKED_MASK, Ordering::AcqRel);
    }

    #[inline]
    pub fn is_remembered(&self) -> bool {
        self.has_flag(REMEMBERED_MASK)
    }

    #[inline]
    pub fn set_remembered(&self) {
        self.word.fetch_or(REMEMBERED_MASK, Ordering::AcqRel);
    }

    #[inline]
    pub fn clear_remembered(&self) {
        self.word.fetch_and(!REMEMBERED_MASK, Ordering::AcqRel);
    }

    /// True when the object is the sole occupant of an unaligned chunk
    #[inline]
    pub fn is_unaligned(&self) -> bool {
        self.has_flag(UNALIGNED_MASK)
    }

    // === Identity hash ===

    #[inline]
    pub fn identity_hash(&self) -> Option<u32> {
        let word = self.word();
        if word & FORWARDED_MASK == 0 && word & HASHED_MASK != 0 {
            Some((word >> HASH_SHIFT) as u32)
        } else {
            None
        }
    }

    /// Store `hash` unless a hash was already assigned; returns the hash in effect
    pub fn install_identity_hash(&self, hash: u32) -> u32 {
        let mut current = self.word();
        loop {
            if current & HASHED_MASK != 0 {
                return (current >> HASH_SHIFT) as u32;
            }
            let new = (current & !(u64::from(u32::MAX) << HASH_SHIFT))
                | (u64::from(hash) << HASH_SHIFT)
                | HASHED_MASK;
            match self
                .word
                .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return hash,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Get object header
///
/// # Safety
/// `obj_addr` must point to a heap object with an initialized header, and the
/// object must stay in place for the lifetime `'a`.
#[inline]
pub unsafe fn header<'a>(obj_addr: usize) -> &'a ObjectHeader {
    &*(obj_addr as *const ObjectHeader)
}

/// Address of reference slot `index`
#[inline]
pub fn slot_address(obj_addr: usize, index: usize) -> usize {
    obj_addr + HEADER_SIZE + index * WORD_SIZE
}

/// Start of the raw payload that follows the reference slots
///
/// # Safety
/// `obj_addr` must point to a heap object with an initialized header.
#[inline]
pub unsafe fn payload_start(obj_addr: usize) -> usize {
    slot_address(obj_addr, header(obj_addr).ref_count())
}

/// Read reference slot `index`
///
/// # Safety
/// `obj_addr` must point to a heap object with more than `index` slots.
#[inline]
pub unsafe fn read_slot(obj_addr: usize, index: usize) -> usize {
    std::ptr::read(slot_address(obj_addr, index) as *const usize)
}

/// Write reference slot `index`
///
/// # Safety
/// `obj_addr` must point to a heap object with more than `index` slots.
#[inline]
pub unsafe fn write_slot(obj_addr: usize, index: usize, value: usize) {
    std::ptr::write(slot_address(obj_addr, index) as *mut usize, value);
}

/// Write a header and null out every reference slot
///
/// # Safety
/// `obj_addr..obj_addr + shape.size()` must be writable memory owned by the caller.
pub unsafe fn initialize_object(obj_addr: usize, shape: &ObjectShape, flags: u64) {
    header(obj_addr).initialize(shape, flags);
    std::ptr::write_bytes(
        slot_address(obj_addr, 0) as *mut u8,
        0,
        shape.ref_count * WORD_SIZE,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(8))]
    struct Buffer([u8; 128]);

    fn buffer() -> Box<Buffer> {
        Box::new(Buffer([0xEE; 128]))
    }

    #[test]
    fn test_shape_size_rounds_and_clamps() {
        assert_eq!(ObjectShape::plain(0, 0).size(), 16);
        assert_eq!(ObjectShape::plain(1, 1).size(), 32);
        assert_eq!(ObjectShape::reference(1, 0).size(), 32);
        assert_eq!(ObjectShape::filler(48).size(), 48);
    }

    #[test]
    fn test_shape_validation() {
        assert!(ObjectShape::plain(70_000, 0).validate().is_err());
        let weak_without_slot = ObjectShape {
            kind: ObjectKind::Reference,
            ref_count: 0,
            payload_bytes: 8,
        };
        assert!(weak_without_slot.validate().is_err());
        assert!(ObjectShape::plain(3, 100).validate().is_ok());
    }

    #[test]
    fn test_initialize_reads_back_shape() {
        let buf = buffer();
        let addr = buf.0.as_ptr() as usize;
        let shape = ObjectShape::plain(2, 24);
        unsafe {
            initialize_object(addr, &shape, REMEMBERED_MASK);
            let h = header(addr);
            assert_eq!(h.size(), shape.size());
            assert_eq!(h.ref_count(), 2);
            assert_eq!(h.kind(), Some(ObjectKind::Plain));
            assert!(h.is_remembered());
            assert!(!h.is_marked());
            assert_eq!(read_slot(addr, 0), 0);
            assert_eq!(read_slot(addr, 1), 0);
            assert_eq!(payload_start(addr), addr + 32);
        }
    }

    #[test]
    fn test_forwarding_hides_flags_keeps_size() {
        let buf = buffer();
        let addr = buf.0.as_ptr() as usize;
        unsafe {
            initialize_object(addr, &ObjectShape::plain(1, 0), MARKED_MASK);
            let h = header(addr);
            h.forward_to(0x1000);
            assert!(h.is_forwarded());
            assert_eq!(h.forwarding_address(), 0x1000);
            assert!(!h.is_marked());
            assert_eq!(h.size(), 24);
        }
    }

    #[test]
    fn test_identity_hash_installed_once() {
        let buf = buffer();
        let addr = buf.0.as_ptr() as usize;
        unsafe {
            initialize_object(addr, &ObjectShape::plain(0, 8), UNALIGNED_MASK);
            let h = header(addr);
            assert_eq!(h.identity_hash(), None);
            assert_eq!(h.install_identity_hash(0xDEAD_BEEF), 0xDEAD_BEEF);
            assert_eq!(h.install_identity_hash(7), 0xDEAD_BEEF);
            assert!(h.is_unaligned());
        }
    }
}
