//! Space - an ordered list of chunks playing one role
//!
//! A space owns two doubly linked lists, one of aligned and one of unaligned
//! chunks. The links live in the chunk headers; the space only records the ends
//! and its accounting. Moving a chunk between spaces is an extract followed by an
//! append, which the collector performs while the world is stopped.

use crate::heap::accounting::ChunksAccounting;
use crate::heap::chunk::{ChunkKind, ChunkRef};
use serde::Serialize;

/// Stable index of a space inside the heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SpaceId(usize);

impl SpaceId {
    pub const fn from_raw(index: usize) -> Self {
        SpaceId(index)
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Generation a space belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GenerationKind {
    Young,
    Old,
}

/// First and last chunk of one list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ChunkList {
    first: Option<ChunkRef>,
    last: Option<ChunkRef>,
}

impl ChunkList {
    fn append(&mut self, chunk: ChunkRef) {
        chunk.set_prev(self.last);
        chunk.set_next(None);
        match self.last {
            Some(last) => last.set_next(Some(chunk)),
            None => self.first = Some(chunk),
        }
        self.last = Some(chunk);
    }

    fn extract(&mut self, chunk: ChunkRef) {
        let prev = chunk.prev();
        let next = chunk.next();
        match prev {
            Some(p) => p.set_next(next),
            None => {
                crate::assert_context!(
                    self.first == Some(chunk),
                    "chunk {:#x} has no predecessor but is not the list head",
                    chunk.address()
                );
                self.first = next;
            }
        }
        match next {
            Some(n) => n.set_prev(prev),
            None => {
                crate::assert_context!(
                    self.last == Some(chunk),
                    "chunk {:#x} has no successor but is not the list tail",
                    chunk.address()
                );
                self.last = prev;
            }
        }
        chunk.set_prev(None);
        chunk.set_next(None);
    }

    fn iter(&self) -> ChunkIter {
        ChunkIter { next: self.first }
    }
}

/// Iterator following `next` links
///
/// The list must not be modified while iterating; collect first when the loop
/// body relinks chunks.
pub struct ChunkIter {
    next: Option<ChunkRef>,
}

impl Iterator for ChunkIter {
    type Item = ChunkRef;

    fn next(&mut self) -> Option<ChunkRef> {
        let current = self.next?;
        self.next = current.next();
        Some(current)
    }
}

/// Space - one role in a generation (eden, a survivor age, or old)
pub struct Space {
    id: SpaceId,
    name: String,
    generation: GenerationKind,
    age: usize,
    is_from_space: bool,
    aligned: ChunkList,
    unaligned: ChunkList,
    accounting: ChunksAccounting,
}

impl Space {
    pub fn new(id: SpaceId, name: impl Into<String>, generation: GenerationKind, age: usize) -> Self {
        Self {
            id,
            name: name.into(),
            generation,
            age,
            is_from_space: false,
            aligned: ChunkList::default(),
            unaligned: ChunkList::default(),
            accounting: ChunksAccounting::new(),
        }
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> GenerationKind {
        self.generation
    }

    pub fn is_young(&self) -> bool {
        self.generation == GenerationKind::Young
    }

    pub fn is_old(&self) -> bool {
        self.generation == GenerationKind::Old
    }

    /// 0 for eden, 1..=N for survivor ages, N + 1 for the old generation
    pub fn age(&self) -> usize {
        self.age
    }

    /// True while the current collection evacuates this space
    pub fn is_from_space(&self) -> bool {
        self.is_from_space
    }

    pub fn set_from_space(&mut self, from: bool) {
        self.is_from_space = from;
    }

    pub fn accounting(&self) -> &ChunksAccounting {
        &self.accounting
    }

    // === Chunk lists ===

    pub fn first_aligned_chunk(&self) -> Option<ChunkRef> {
        self.aligned.first
    }

    pub fn last_aligned_chunk(&self) -> Option<ChunkRef> {
        self.aligned.last
    }

    pub fn first_unaligned_chunk(&self) -> Option<ChunkRef> {
        self.unaligned.first
    }

    pub fn last_unaligned_chunk(&self) -> Option<ChunkRef> {
        self.unaligned.last
    }

    pub fn aligned_chunks(&self) -> ChunkIter {
        self.aligned.iter()
    }

    pub fn unaligned_chunks(&self) -> ChunkIter {
        self.unaligned.iter()
    }

    /// All chunks, aligned first
    pub fn chunks(&self) -> impl Iterator<Item = ChunkRef> {
        self.aligned.iter().chain(self.unaligned.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.aligned.first.is_none() && self.unaligned.first.is_none()
    }

    /// Link `chunk` at the tail of the matching list and take ownership of it
    pub fn append_chunk(&mut self, chunk: ChunkRef) {
        crate::assert_context!(
            chunk.space().is_none(),
            "chunk {:#x} appended to {} while owned by {:?}",
            chunk.address(),
            self.name,
            chunk.space()
        );
        let bytes = chunk.size();
        match chunk.kind() {
            ChunkKind::Aligned => {
                self.aligned.append(chunk);
                self.accounting.note_aligned_added(bytes);
            }
            ChunkKind::Unaligned => {
                self.unaligned.append(chunk);
                self.accounting.note_unaligned_added(bytes);
            }
        }
        chunk.set_space(Some(self.id));
    }

    /// Unlink `chunk`, leaving it unowned
    pub fn extract_chunk(&mut self, chunk: ChunkRef) {
        crate::assert_context!(
            chunk.space() == Some(self.id),
            "chunk {:#x} extracted from {} but owned by {:?}",
            chunk.address(),
            self.name,
            chunk.space()
        );
        let bytes = chunk.size();
        match chunk.kind() {
            ChunkKind::Aligned => {
                self.aligned.extract(chunk);
                self.accounting.note_aligned_removed(bytes);
            }
            ChunkKind::Unaligned => {
                self.unaligned.extract(chunk);
                self.accounting.note_unaligned_removed(bytes);
            }
        }
        chunk.set_space(None);
    }

    /// Unlink every chunk, returning them in list order
    pub fn take_all_chunks(&mut self) -> Vec<ChunkRef> {
        let chunks: Vec<ChunkRef> = self.chunks().collect();
        for &chunk in &chunks {
            self.extract_chunk(chunk);
        }
        chunks
    }

    // === Objects ===

    /// Bytes occupied by objects
    pub fn used_bytes(&self) -> usize {
        self.chunks().map(|c| c.used_bytes()).sum()
    }

    /// Visit every object of the space, aligned chunks first
    pub fn walk_objects<F>(&self, mut visitor: F)
    where
        F: FnMut(usize, usize),
    {
        for chunk in self.chunks() {
            chunk.for_each_object(&mut visitor);
        }
    }

    // === Verification ===

    /// Check both lists for link consistency and ownership
    pub fn verify_lists(&self) -> Vec<String> {
        let mut failures = Vec::new();
        self.verify_list(&self.aligned, ChunkKind::Aligned, &mut failures);
        self.verify_list(&self.unaligned, ChunkKind::Unaligned, &mut failures);

        let mut counted = ChunksAccounting::new();
        for chunk in self.chunks() {
            match chunk.kind() {
                ChunkKind::Aligned => counted.note_aligned_added(chunk.size()),
                ChunkKind::Unaligned => counted.note_unaligned_added(chunk.size()),
            }
        }
        if counted != self.accounting {
            failures.push(format!(
                "{}: accounting {:?} does not match chunks {:?}",
                self.name, self.accounting, counted
            ));
        }
        failures
    }

    fn verify_list(&self, list: &ChunkList, kind: ChunkKind, failures: &mut Vec<String>) {
        if list.first.is_none() != list.last.is_none() {
            failures.push(format!(
                "{}: {:?} list has first {:?} but last {:?}",
                self.name, kind, list.first, list.last
            ));
            return;
        }
        if let Some(first) = list.first {
            if first.prev().is_some() {
                failures.push(format!(
                    "{}: head chunk {:#x} has a predecessor",
                    self.name,
                    first.address()
                ));
            }
        }

        let mut previous: Option<ChunkRef> = None;
        for chunk in list.iter() {
            if chunk.prev() != previous {
                failures.push(format!(
                    "{}: chunk {:#x} prev link does not match its predecessor",
                    self.name,
                    chunk.address()
                ));
            }
            if chunk.space() != Some(self.id) {
                failures.push(format!(
                    "{}: chunk {:#x} records owner {:?}",
                    self.name,
                    chunk.address(),
                    chunk.space()
                ));
            }
            if chunk.kind() != kind {
                failures.push(format!(
                    "{}: chunk {:#x} of kind {:?} on the {:?} list",
                    self.name,
                    chunk.address(),
                    chunk.kind(),
                    kind
                ));
            }
            previous = Some(chunk);
        }
        if previous != list.last {
            failures.push(format!(
                "{}: {:?} list tail {:?} does not match the last linked chunk {:?}",
                self.name, kind, list.last, previous
            ));
        }
    }
}

impl std::fmt::Debug for Space {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Space")
            .field("name", &self.name)
            .field("age", &self.age)
            .field("from", &self.is_from_space)
            .field("accounting", &self.accounting)
            .finish()
    }
}
