//! Memory - raw memory for chunks
//!
//! - [`os`]: aligned blocks and anonymous mappings obtained from the operating system
//! - [`chunk_allocator`]: turns those into initialized chunks and caches released
//!   aligned chunks on a free list
//!
//! The byte helpers below are the only places the collector copies or fills raw
//! memory.
//!
//! # Safety
//!
//! The helpers are `unsafe` because they operate on raw addresses. The caller
//! must ensure that addresses are valid for the given size and, for
//! [`copy_memory`], that the regions do not overlap.
//!
//! # Example
//!
//! ```rust
//! use genscav::memory::{copy_memory, zero_memory};
//!
//! let mut buffer = [0xFFu8; 8];
//! let src = [1u8, 2, 3, 4];
//!
//! unsafe {
//!     zero_memory(buffer.as_mut_ptr() as usize, 8);
//!     copy_memory(src.as_ptr() as usize, buffer.as_mut_ptr() as usize, 4);
//! }
//! assert_eq!(buffer, [1, 2, 3, 4, 0, 0, 0, 0]);
//! ```

pub mod chunk_allocator;
pub mod os;

pub use chunk_allocator::{ChunkAllocator, ChunkAllocatorStats, ChunkRequest};
pub use os::OsMemory;

use std::ptr;

/// Byte written over the object area of a freshly produced chunk
pub const ZAP_PRODUCED: u8 = 0xAB;

/// Byte written over the object area of a released chunk
pub const ZAP_CONSUMED: u8 = 0xCD;

/// Copy `size` bytes between non-overlapping regions
///
/// # Safety
///
/// - `src` must be valid for reads of `size` bytes
/// - `dst` must be valid for writes of `size` bytes
/// - the regions must not overlap
#[inline]
pub unsafe fn copy_memory(src: usize, dst: usize, size: usize) {
    if size == 0 {
        return;
    }
    ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, size);
}

/// Copy `size` bytes between possibly overlapping regions
///
/// # Safety
///
/// - `src` must be valid for reads of `size` bytes
/// - `dst` must be valid for writes of `size` bytes
#[inline]
pub unsafe fn copy_memory_overlapping(src: usize, dst: usize, size: usize) {
    if size == 0 {
        return;
    }
    ptr::copy(src as *const u8, dst as *mut u8, size);
}

/// Zero-fill a memory region
///
/// # Safety
///
/// `addr` must be valid for writes of `size` bytes.
#[inline]
pub unsafe fn zero_memory(addr: usize, size: usize) {
    if size == 0 {
        return;
    }
    ptr::write_bytes(addr as *mut u8, 0, size);
}

/// Fill a memory region with `value`
///
/// # Safety
///
/// `addr` must be valid for writes of `size` bytes.
#[inline]
pub unsafe fn fill_memory(addr: usize, value: u8, size: usize) {
    if size == 0 {
        return;
    }
    ptr::write_bytes(addr as *mut u8, value, size);
}

/// True when every byte of the region equals `value`
///
/// # Safety
///
/// `addr` must be valid for reads of `size` bytes.
pub unsafe fn is_filled_with(addr: usize, value: u8, size: usize) -> bool {
    std::slice::from_raw_parts(addr as *const u8, size)
        .iter()
        .all(|&b| b == value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_memory_overlapping_shifts_right() {
        let mut buffer = [1u8, 2, 3, 4, 5];
        unsafe {
            copy_memory_overlapping(
                buffer.as_ptr() as usize,
                buffer.as_mut_ptr().add(1) as usize,
                4,
            );
        }
        assert_eq!(buffer, [1, 1, 2, 3, 4]);
    }

    #[test]
    fn test_fill_and_check() {
        let mut buffer = [0u8; 16];
        let addr = buffer.as_mut_ptr() as usize;
        unsafe {
            fill_memory(addr, ZAP_CONSUMED, 16);
            assert!(is_filled_with(addr, ZAP_CONSUMED, 16));
            zero_memory(addr, 8);
            assert!(!is_filled_with(addr, ZAP_CONSUMED, 16));
            assert!(is_filled_with(addr + 8, ZAP_CONSUMED, 8));
        }
    }

    #[test]
    fn test_zero_sized_operations_are_noops() {
        unsafe {
            copy_memory(0, 0, 0);
            zero_memory(0, 0);
            fill_memory(0, 1, 0);
        }
    }
}
