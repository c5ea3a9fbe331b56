//! Allocator Submodule - Bump Pointer Allocation
//!
//! Bump pointer allocation in a chunk is a single compare-and-swap on the chunk's
//! `top` offset. Mutators may race on the same chunk (a chunk can be the current
//! chunk of one mutator while another still holds it as retained), so the fast
//! path never writes `top` without a CAS.

use crate::heap::chunk::ChunkRef;
use std::sync::atomic::Ordering;

/// Claim `size` bytes of `chunk`, returning the start of the claimed range
///
/// `size` must already be aligned to the object alignment. Returns `None` when
/// the chunk does not have `size` free bytes.
#[inline]
pub fn attempt_allocation_parallel(chunk: ChunkRef, size: usize) -> Option<usize> {
    let top = chunk.top_offset_cell();
    let end = chunk.end() - chunk.address();
    let mut current = top.load(Ordering::Relaxed);

    loop {
        let new_top = current.checked_add(size)?;
        if new_top > end {
            return None;
        }

        match top.compare_exchange_weak(current, new_top, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return Some(chunk.address() + current),
            Err(actual) => current = actual,
        }
    }
}

/// Claim `size` bytes of a chunk only the caller can see
///
/// Used by the collector while the world is stopped.
#[inline]
pub fn attempt_allocation_serial(chunk: ChunkRef, size: usize) -> Option<usize> {
    let top = chunk.top();
    let new_top = top.checked_add(size)?;
    if new_top > chunk.end() {
        return None;
    }
    chunk.set_top(new_top);
    Some(top)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::chunk::{ChunkKind, CHUNK_HEADER_SIZE};
    use std::alloc::{alloc, dealloc, Layout};
    use std::thread;

    const SIZE: usize = 64 * 1024;

    struct Block(usize, Layout);

    impl Block {
        fn new() -> Self {
            let layout = Layout::from_size_align(SIZE, SIZE).expect("layout");
            let addr = unsafe { alloc(layout) } as usize;
            assert_ne!(addr, 0);
            Block(addr, layout)
        }

        fn chunk(&self) -> ChunkRef {
            let chunk = unsafe { ChunkRef::from_address(self.0) };
            chunk.initialize(ChunkKind::Aligned, SIZE, CHUNK_HEADER_SIZE, 1);
            chunk
        }
    }

    impl Drop for Block {
        fn drop(&mut self) {
            unsafe { dealloc(self.0 as *mut u8, self.1) };
        }
    }

    #[test]
    fn test_parallel_allocation_bumps_top() {
        let block = Block::new();
        let chunk = block.chunk();
        let first = attempt_allocation_parallel(chunk, 32).expect("space");
        let second = attempt_allocation_parallel(chunk, 64).expect("space");
        assert_eq!(first, chunk.objects_start());
        assert_eq!(second, first + 32);
        assert_eq!(chunk.used_bytes(), 96);
    }

    #[test]
    fn test_allocation_fails_when_full() {
        let block = Block::new();
        let chunk = block.chunk();
        let free = chunk.free_bytes();
        assert!(attempt_allocation_parallel(chunk, free + 8).is_none());
        assert!(attempt_allocation_parallel(chunk, free).is_some());
        assert!(attempt_allocation_serial(chunk, 8).is_none());
        assert_eq!(chunk.free_bytes(), 0);
    }

    #[test]
    fn test_serial_allocation() {
        let block = Block::new();
        let chunk = block.chunk();
        let a = attempt_allocation_serial(chunk, 16).expect("space");
        let b = attempt_allocation_serial(chunk, 16).expect("space");
        assert_eq!(b - a, 16);
    }

    #[test]
    fn test_racing_threads_never_overlap() {
        let block = Block::new();
        let chunk = block.chunk();
        let base = chunk.address();

        let results: Vec<Vec<usize>> = {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let addr = base;
                    thread::spawn(move || {
                        let chunk = unsafe { ChunkRef::from_address(addr) };
                        let mut mine = Vec::new();
                        while let Some(obj) = attempt_allocation_parallel(chunk, 48) {
                            mine.push(obj);
                        }
                        mine
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("allocator thread"))
                .collect()
        };

        let mut all: Vec<usize> = results.into_iter().flatten().collect();
        all.sort_unstable();
        let expected = (SIZE - CHUNK_HEADER_SIZE) / 48;
        assert_eq!(all.len(), expected);
        assert!(all.windows(2).all(|w| w[1] - w[0] == 48));
        drop(block);
    }
}
