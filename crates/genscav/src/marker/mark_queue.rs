//! Mark Queue - segmented FIFO worklist for mark-compact
//!
//! ```text
//!  pop ──► [segment: ####....] ─► [segment: ########] ─► [segment: ###.....] ◄── push
//!          (drained prefix)                                (free suffix)
//! ```
//!
//! Segments are held in a `VecDeque`. Objects are pushed at the tail segment and
//! popped from the head segment. A fully drained segment is dropped at once, so
//! the queue's footprint follows the amount of pending work rather than its peak.

use std::collections::VecDeque;

/// Entries per segment
pub const SEGMENT_CAPACITY: usize = 1024;

struct Segment {
    entries: Vec<usize>,
    read: usize,
}

impl Segment {
    fn new() -> Self {
        Self {
            entries: Vec::with_capacity(SEGMENT_CAPACITY),
            read: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.entries.len() == SEGMENT_CAPACITY
    }

    fn is_drained(&self) -> bool {
        self.read == self.entries.len()
    }
}

/// MarkQueue - single-threaded worklist of grey objects
pub struct MarkQueue {
    segments: VecDeque<Segment>,
    len: usize,
    pushed: u64,
    segments_allocated: u64,
    max_segments: usize,
}

impl MarkQueue {
    pub fn new() -> Self {
        Self {
            segments: VecDeque::new(),
            len: 0,
            pushed: 0,
            segments_allocated: 0,
            max_segments: 0,
        }
    }

    pub fn push(&mut self, obj: usize) {
        if self.segments.back().is_none_or(Segment::is_full) {
            self.segments.push_back(Segment::new());
            self.segments_allocated += 1;
            self.max_segments = self.max_segments.max(self.segments.len());
        }
        if let Some(tail) = self.segments.back_mut() {
            tail.entries.push(obj);
        }
        self.len += 1;
        self.pushed += 1;
    }

    pub fn pop(&mut self) -> Option<usize> {
        let head = self.segments.front_mut()?;
        let obj = head.entries[head.read];
        head.read += 1;
        if head.is_drained() {
            self.segments.pop_front();
        }
        self.len -= 1;
        Some(obj)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Segments currently held
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Objects pushed over the queue's lifetime
    pub fn total_pushed(&self) -> u64 {
        self.pushed
    }

    pub fn segments_allocated(&self) -> u64 {
        self.segments_allocated
    }

    pub fn max_segments(&self) -> usize {
        self.max_segments
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.len = 0;
    }
}

impl Default for MarkQueue {
    fn default() -> Self {
        Self::new()
    }
}
