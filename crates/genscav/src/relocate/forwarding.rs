//! Relocation Plan - where compacted objects go
//!
//! Planning walks the marked objects of the old generation in chunk-list order
//! and slides each one down to a destination cursor that never overtakes it:
//!
//! ```text
//!   chunk A: [L1][..][L2][....][L3]      chunk B: [..][L4][L5]
//!            |    ___/   ______/                       |   |
//!            v   v      v                              |   |
//!   chunk A: [L1][L2][L3][L4][L5]  <───────────────────┴───┘
//!   chunk B: empty, released
//! ```
//!
//! Moves are recorded as runs of contiguous objects (`old_start..old_end` goes to
//! `new_start`). Copying the runs in the order they were planned never overwrites
//! an object that has not been moved yet, so a memmove per run suffices.
//!
//! Addresses are looked up with a binary search over the runs sorted by old
//! address; an address outside every run did not move.

use crate::heap::chunk::ChunkRef;

/// Objects in `old_start..old_end` move to `new_start..`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub old_start: usize,
    pub old_end: usize,
    pub new_start: usize,
}

impl Run {
    #[inline]
    pub fn len(&self) -> usize {
        self.old_end - self.old_start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.old_end == self.old_start
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.old_start && addr < self.old_end
    }

    #[inline]
    pub fn moves(&self) -> bool {
        self.old_start != self.new_start
    }
}

/// RelocationPlan - forwarding information of one mark-compact collection
#[derive(Debug, Default)]
pub struct RelocationPlan {
    /// In planning order, which is also copy order
    runs: Vec<Run>,
    /// Indexes into `runs`, sorted by `old_start`
    by_address: Vec<usize>,
    /// Top of every planned chunk once compaction is done
    new_tops: Vec<(ChunkRef, usize)>,
    sealed: bool,
}

impl RelocationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the object at `old` of `size` bytes moves to `new`
    pub fn add(&mut self, old: usize, size: usize, new: usize) {
        crate::assert_context!(!self.sealed, "adding to a sealed relocation plan");
        if let Some(last) = self.runs.last_mut() {
            if last.old_end == old && last.new_start + last.len() == new {
                last.old_end += size;
                return;
            }
        }
        self.runs.push(Run {
            old_start: old,
            old_end: old + size,
            new_start: new,
        });
    }

    /// Record the top `chunk` will have after compaction
    pub fn set_new_top(&mut self, chunk: ChunkRef, top: usize) {
        self.new_tops.push((chunk, top));
    }

    /// Finish planning; lookups are valid afterwards
    pub fn seal(&mut self) {
        let mut order: Vec<usize> = (0..self.runs.len()).collect();
        order.sort_unstable_by_key(|&i| self.runs[i].old_start);
        self.by_address = order;
        self.sealed = true;
    }

    /// New address of the object at `addr`, `None` if it does not move
    pub fn lookup(&self, addr: usize) -> Option<usize> {
        crate::assert_context!(self.sealed, "relocation plan used before sealing");
        let pos = self
            .by_address
            .partition_point(|&i| self.runs[i].old_start <= addr);
        if pos == 0 {
            return None;
        }
        let run = &self.runs[self.by_address[pos - 1]];
        if run.contains(addr) && run.moves() {
            Some(run.new_start + (addr - run.old_start))
        } else {
            None
        }
    }

    /// Address `addr` will have after compaction
    #[inline]
    pub fn relocate(&self, addr: usize) -> usize {
        self.lookup(addr).unwrap_or(addr)
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn new_tops(&self) -> &[(ChunkRef, usize)] {
        &self.new_tops
    }

    /// Bytes of objects that change address
    pub fn moved_bytes(&self) -> usize {
        self.runs.iter().filter(|r| r.moves()).map(Run::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_moves_merge() {
        let mut plan = RelocationPlan::new();
        plan.add(0x1100, 32, 0x1000);
        plan.add(0x1120, 16, 0x1020);
        plan.add(0x1200, 16, 0x1030);
        assert_eq!(plan.runs().len(), 2);
        assert_eq!(plan.runs()[0].len(), 48);
    }

    #[test]
    fn test_lookup_inside_and_outside_runs() {
        let mut plan = RelocationPlan::new();
        plan.add(0x1100, 32, 0x1000);
        plan.add(0x1200, 16, 0x1020);
        plan.add(0x5000, 16, 0x5000);
        plan.seal();

        assert_eq!(plan.lookup(0x1100), Some(0x1000));
        assert_eq!(plan.lookup(0x1110), Some(0x1010));
        assert_eq!(plan.lookup(0x1200), Some(0x1020));
        assert_eq!(plan.lookup(0x1180), None);
        assert_eq!(plan.lookup(0x0800), None);
        assert_eq!(plan.lookup(0x5000), None);
        assert_eq!(plan.relocate(0x5000), 0x5000);
        assert_eq!(plan.moved_bytes(), 48);
    }

    #[test]
    fn test_lookup_across_unordered_chunks() {
        // Chunk list order need not follow address order
        let mut plan = RelocationPlan::new();
        plan.add(0x9100, 16, 0x9000);
        plan.add(0x2040, 16, 0x9010);
        plan.seal();
        assert_eq!(plan.lookup(0x2040), Some(0x9010));
        assert_eq!(plan.lookup(0x9100), Some(0x9000));
    }
}
