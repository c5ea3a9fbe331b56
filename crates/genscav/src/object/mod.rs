//! Object Module - the object model the collector walks
//!
//! Objects are contiguous: a two-word header, reference slots, then raw payload.
//! Everything the collector does to an object goes through the two walking
//! primitives in this module.

pub mod header;
pub mod weak;

pub use header::{
    header, initialize_object, payload_start, read_slot, slot_address, write_slot, ObjectHeader,
    ObjectKind, ObjectShape, FORWARDED_MASK, HASHED_MASK, HEADER_SIZE, MARKED_MASK,
    MIN_OBJECT_SIZE, OBJECT_ALIGNMENT, REMEMBERED_MASK, UNALIGNED_MASK, WORD_SIZE,
};
pub use weak::DiscoveredReferences;

/// Visit every object in `[start, end)`, in address order
///
/// The range must be densely packed with initialized objects. The visitor gets
/// the object address and its size; the size is read before the visitor runs, so
/// the visitor may forward the object.
///
/// # Safety
/// `start..end` must be a walkable object range.
#[inline]
pub unsafe fn for_each_object<F>(start: usize, end: usize, mut visitor: F)
where
    F: FnMut(usize, usize),
{
    let mut cursor = start;
    while cursor < end {
        let size = header(cursor).size();
        crate::assert_context!(size >= MIN_OBJECT_SIZE, "object at {:#x} has size {}", cursor, size);
        visitor(cursor, size);
        cursor += size;
    }
}

/// Visit the address of every reference slot of `obj` from slot `first` on
///
/// # Safety
/// `obj` must be an initialized, unforwarded object.
#[inline]
pub unsafe fn for_each_reference_slot<F>(obj: usize, first: usize, mut visitor: F)
where
    F: FnMut(usize),
{
    let count = header(obj).ref_count();
    for index in first..count {
        visitor(slot_address(obj, index));
    }
}

/// Index of the first strongly traced slot; slot 0 of a reference object is weak
///
/// # Safety
/// `obj` must be an initialized object.
#[inline]
pub unsafe fn first_strong_slot(obj: usize) -> usize {
    if header(obj).is_reference_object() {
        1
    } else {
        0
    }
}
