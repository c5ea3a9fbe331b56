//! Chunk Accounting - counts and byte totals of chunks owned by a space
//!
//! Every space keeps its own record; each generation keeps a second record that
//! is updated alongside, so generation totals never require walking lists.

use serde::Serialize;

/// Chunk counts and bytes for one space or one generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunksAccounting {
    pub aligned_count: usize,
    pub aligned_bytes: usize,
    pub unaligned_count: usize,
    pub unaligned_bytes: usize,
}

impl ChunksAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_aligned_added(&mut self, bytes: usize) {
        self.aligned_count += 1;
        self.aligned_bytes += bytes;
    }

    pub fn note_aligned_removed(&mut self, bytes: usize) {
        crate::assert_context!(
            self.aligned_count > 0 && self.aligned_bytes >= bytes,
            "aligned accounting underflow: {:?} minus {} bytes",
            self,
            bytes
        );
        self.aligned_count -= 1;
        self.aligned_bytes -= bytes;
    }

    pub fn note_unaligned_added(&mut self, bytes: usize) {
        self.unaligned_count += 1;
        self.unaligned_bytes += bytes;
    }

    pub fn note_unaligned_removed(&mut self, bytes: usize) {
        crate::assert_context!(
            self.unaligned_count > 0 && self.unaligned_bytes >= bytes,
            "unaligned accounting underflow: {:?} minus {} bytes",
            self,
            bytes
        );
        self.unaligned_count -= 1;
        self.unaligned_bytes -= bytes;
    }

    /// Total chunk bytes, aligned and unaligned
    pub fn chunk_bytes(&self) -> usize {
        self.aligned_bytes + self.unaligned_bytes
    }

    pub fn chunk_count(&self) -> usize {
        self.aligned_count + self.unaligned_count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl std::ops::Add for ChunksAccounting {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            aligned_count: self.aligned_count + other.aligned_count,
            aligned_bytes: self.aligned_bytes + other.aligned_bytes,
            unaligned_count: self.unaligned_count + other.unaligned_count,
            unaligned_bytes: self.unaligned_bytes + other.unaligned_bytes,
        }
    }
}
