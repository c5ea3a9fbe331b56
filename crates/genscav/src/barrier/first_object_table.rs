//! First-Object Table - finds the object covering the start of any card
//!
//! Scanning a dirty card needs the first object that begins on it, but objects
//! may start on earlier cards and span many. One byte per card encodes where to
//! look:
//!
//! ```text
//! 0..=63      the covering object starts `entry` words before the card start
//! 64 + k      go back 2^k cards and look again
//! 0xFF        no object covers the card start
//! ```
//!
//! An object `[start, end)` writes a direct entry on the first card starting at
//! or after `start`; since cards are at most 512 bytes that distance always fits
//! in 63 words. Every later card the object covers gets `64 + floor(log2(d))`,
//! `d` being its distance in cards from that first card, so a lookup never
//! overshoots and finishes in a logarithmic number of steps.

use crate::heap::chunk::{ChunkLayout, ChunkRef};
use crate::object::WORD_SIZE;
use crate::util::Alignment;
use std::sync::atomic::{AtomicU8, Ordering};

/// Entry for a card no object covers
pub const NO_OBJECT: u8 = 0xFF;

/// Largest direct entry, in words
pub const MAX_DIRECT_ENTRY: u8 = 63;

/// Base of the exponential back-off entries
pub const EXPONENT_BIAS: u8 = 64;

/// View of the first-object table embedded in one aligned chunk
#[derive(Clone, Copy)]
pub struct FirstObjectTable<'a> {
    chunk: ChunkRef,
    layout: &'a ChunkLayout,
}

impl<'a> FirstObjectTable<'a> {
    pub fn new(chunk: ChunkRef, layout: &'a ChunkLayout) -> Self {
        debug_assert!(chunk.is_aligned());
        Self { chunk, layout }
    }

    #[inline]
    fn slot(&self, index: usize) -> &AtomicU8 {
        crate::assert_context!(
            index < self.layout.num_cards,
            "first-object entry {} out of range for chunk {:#x}",
            index,
            self.chunk.address()
        );
        let addr = self.chunk.address() + self.layout.first_object_table_offset + index;
        // SAFETY: the table lies inside the chunk and the index was checked.
        unsafe { &*(addr as *const AtomicU8) }
    }

    #[inline]
    pub fn entry(&self, index: usize) -> u8 {
        self.slot(index).load(Ordering::Relaxed)
    }

    #[inline]
    fn set_entry(&self, index: usize, value: u8) {
        self.slot(index).store(value, Ordering::Relaxed);
    }

    #[inline]
    fn card_start(&self, index: usize) -> usize {
        self.chunk.objects_start() + (index << self.layout.card_shift)
    }

    /// Mark every card as uncovered
    pub fn clear(&self) {
        for index in 0..self.layout.num_cards {
            self.set_entry(index, NO_OBJECT);
        }
    }

    /// Record an object occupying `[start, end)`
    pub fn record_object(&self, start: usize, end: usize) {
        let offset = start - self.chunk.objects_start();
        let first = offset.div_ceil(self.layout.card_size);
        if first >= self.layout.num_cards || self.card_start(first) >= end {
            return;
        }

        let words = (self.card_start(first) - start) / WORD_SIZE;
        crate::assert_context!(
            words <= MAX_DIRECT_ENTRY as usize,
            "object at {:#x} is {} words before its first card",
            start,
            words
        );
        self.set_entry(first, words as u8);

        let mut index = first + 1;
        while index < self.layout.num_cards && self.card_start(index) < end {
            let exponent = Alignment::log2_floor(index - first);
            self.set_entry(index, EXPONENT_BIAS + exponent as u8);
            index += 1;
        }
    }

    /// Start of the object covering the start of card `index`
    pub fn covering_object(&self, index: usize) -> Option<usize> {
        let mut card = index;
        loop {
            match self.entry(card) {
                NO_OBJECT => return None,
                entry if entry <= MAX_DIRECT_ENTRY => {
                    return Some(self.card_start(card) - entry as usize * WORD_SIZE);
                }
                entry => {
                    let back = 1usize << (entry - EXPONENT_BIAS);
                    crate::assert_context!(
                        back <= card,
                        "first-object entry {} at card {} jumps before the chunk",
                        entry,
                        card
                    );
                    card -= back;
                }
            }
        }
    }

    /// Clear and record every object between `objects_start` and `top`
    pub fn rebuild(&self) {
        self.clear();
        self.chunk
            .for_each_object(|obj, size| self.record_object(obj, obj + size));
    }

    /// Check every entry below `top` against a walk of the chunk
    pub fn verify(&self) -> Vec<String> {
        let mut failures = Vec::new();
        let mut objects = Vec::new();
        self.chunk.for_each_object(|obj, size| objects.push((obj, obj + size)));

        let top = self.chunk.top();
        let mut cursor = 0;
        for index in 0..self.layout.num_cards {
            let start = self.card_start(index);
            if start >= top {
                break;
            }
            while cursor < objects.len() && objects[cursor].1 <= start {
                cursor += 1;
            }
            let expected = objects.get(cursor).map(|&(obj, _)| obj);
            let found = self.covering_object(index);
            if found != expected {
                failures.push(format!(
                    "chunk {:#x} card {}: first object {:?}, expected {:?}",
                    self.chunk.address(),
                    index,
                    found.map(|a| format!("{:#x}", a)),
                    expected.map(|a| format!("{:#x}", a))
                ));
            }
        }
        failures
    }
}
