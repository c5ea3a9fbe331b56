//! OS Memory - where chunk memory comes from
//!
//! Aligned chunks are blocks from the global allocator with alignment equal to
//! their size, so masking an interior address finds the chunk base. Unaligned
//! chunks are anonymous mappings (memmap2), sized to whole pages and unmapped on
//! release.
//!
//! Every block handed out is tracked, so dropping an `OsMemory` returns all of it
//! no matter which space or free list still referenced it.

use crate::error::{GcError, Result};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use std::alloc::{alloc, dealloc, Layout};
use std::collections::{HashMap, HashSet};

/// OsMemory - tracked aligned blocks and anonymous mappings
pub struct OsMemory {
    page_size: usize,
    aligned_layout: Layout,
    aligned_blocks: Mutex<HashSet<usize>>,
    mappings: Mutex<HashMap<usize, MmapMut>>,
}

impl OsMemory {
    /// Memory source for aligned blocks of `aligned_size` bytes
    pub fn new(aligned_size: usize) -> Result<Self> {
        let aligned_layout = Layout::from_size_align(aligned_size, aligned_size).map_err(|e| {
            GcError::Configuration(format!(
                "cannot lay out {} byte aligned chunks: {}",
                aligned_size, e
            ))
        })?;

        Ok(Self {
            page_size: page_size::get(),
            aligned_layout,
            aligned_blocks: Mutex::new(HashSet::new()),
            mappings: Mutex::new(HashMap::new()),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Allocate one aligned block
    pub fn allocate_aligned(&self) -> Result<usize> {
        // SAFETY: the layout has a non-zero size.
        let ptr = unsafe { alloc(self.aligned_layout) };
        if ptr.is_null() {
            return Err(GcError::OutOfMemory {
                requested: self.aligned_layout.size(),
                available: 0,
            });
        }
        let addr = ptr as usize;
        self.aligned_blocks.lock().insert(addr);
        Ok(addr)
    }

    /// Return an aligned block to the system
    pub fn free_aligned(&self, addr: usize) {
        if !self.aligned_blocks.lock().remove(&addr) {
            crate::fatal!("freeing aligned block {:#x} that was never allocated", addr);
        }
        // SAFETY: `addr` came from `alloc` with this layout and was still tracked.
        unsafe { dealloc(addr as *mut u8, self.aligned_layout) };
    }

    /// Map `size` bytes (a multiple of the page size) of zeroed anonymous memory
    pub fn map(&self, size: usize) -> Result<usize> {
        let mut mapping = MmapOptions::new().len(size).map_anon().map_err(|e| {
            log::warn!("anonymous mapping of {} bytes failed: {}", size, e);
            GcError::OutOfMemory {
                requested: size,
                available: 0,
            }
        })?;
        let addr = mapping.as_mut_ptr() as usize;
        self.mappings.lock().insert(addr, mapping);
        Ok(addr)
    }

    /// Unmap a region returned by [`OsMemory::map`]
    pub fn unmap(&self, addr: usize) {
        match self.mappings.lock().remove(&addr) {
            Some(mapping) => drop(mapping),
            None => crate::fatal!("unmapping {:#x} which is not a live mapping", addr),
        }
    }

    /// Number of aligned blocks and mappings currently held
    pub fn live_blocks(&self) -> (usize, usize) {
        (self.aligned_blocks.lock().len(), self.mappings.lock().len())
    }
}

impl Drop for OsMemory {
    fn drop(&mut self) {
        for addr in self.aligned_blocks.get_mut().drain() {
            // SAFETY: every tracked block came from `alloc` with this layout.
            unsafe { dealloc(addr as *mut u8, self.aligned_layout) };
        }
        self.mappings.get_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_blocks_are_aligned_to_their_size() {
        let os = OsMemory::new(64 * 1024).expect("os memory");
        let a = os.allocate_aligned().expect("block");
        let b = os.allocate_aligned().expect("block");
        assert_eq!(a % (64 * 1024), 0);
        assert_eq!(b % (64 * 1024), 0);
        assert_eq!(os.live_blocks(), (2, 0));

        os.free_aligned(a);
        assert_eq!(os.live_blocks(), (1, 0));
    }

    #[test]
    fn test_mappings_are_zeroed_and_tracked() {
        let os = OsMemory::new(64 * 1024).expect("os memory");
        let size = os.page_size() * 2;
        let addr = os.map(size).expect("mapping");
        assert!(unsafe { crate::memory::is_filled_with(addr, 0, size) });
        assert_eq!(os.live_blocks(), (0, 1));
        os.unmap(addr);
        assert_eq!(os.live_blocks(), (0, 0));
    }

    #[test]
    #[should_panic(expected = "never allocated")]
    fn test_double_free_is_fatal() {
        let os = OsMemory::new(64 * 1024).expect("os memory");
        let a = os.allocate_aligned().expect("block");
        os.free_aligned(a);
        os.free_aligned(a);
    }
}
