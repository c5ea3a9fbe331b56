//! # genscav - Generational Scavenging Heap
//!
//! genscav is a chunked, generational heap with a stop-the-world collector for
//! runtimes that manage their own objects: eden and survivor spaces collected by
//! copying scavenges, and an old generation reclaimed either by copying or by
//! mark-compact.
//!
//! ## Overview
//!
//! - **Chunked heap**: memory comes in aligned chunks (many objects, found from any
//!   interior address by masking) and unaligned chunks (one large object each)
//! - **Lock-free allocation**: mutators bump-allocate in chunks they own with a
//!   single compare-and-swap
//! - **Scavenging**: survivors of the young generation are copied into survivor
//!   spaces, with the target spaces themselves serving as the grey set
//! - **Remembered set**: a write barrier dirties cards of old objects, so an
//!   incremental collection scans only dirty cards of the old generation
//! - **Two old generation strategies**: copying between two spaces, or
//!   mark-compact within one
//! - **Pinning**: pinned objects never move; their chunks are promoted whole
//! - **Pluggable policy**: [`CollectionPolicy`] decides when and how much to collect
//!
//! ## Quick Start
//!
//! ```rust
//! use genscav::{GcCause, Heap, HeapConfig, ObjectShape};
//!
//! fn main() -> Result<(), genscav::GcError> {
//!     let config = HeapConfig::with_chunk_size(256 * 1024).with_max_heap_size(32 * 1024 * 1024);
//!     let heap = Heap::new(config)?;
//!     let mutator = heap.attach_mutator();
//!
//!     // An object with two reference slots and 16 bytes of payload
//!     let list = mutator.allocate(&ObjectShape::plain(2, 16))?;
//!     let item = mutator.allocate(&ObjectShape::plain(0, 32))?;
//!     unsafe { heap.write_reference(list, 0, item)? };
//!
//!     // Roots keep objects alive and follow them when they move
//!     let root = heap.new_handle(list);
//!     heap.collect(GcCause::Explicit, false);
//!
//!     let list = heap.resolve(root)?;
//!     let item = unsafe { heap.read_reference(list, 0)? };
//!     assert_ne!(item, 0);
//!     heap.release_handle(root)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Mutator Threads                       │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐               │
//! │  │ current  │  │ current  │  │ current  │  bump (CAS)   │
//! │  │ retained │  │ retained │  │ retained │               │
//! │  └────┬─────┘  └────┬─────┘  └────┬─────┘               │
//! │       └─────────────┼─────────────┘                     │
//! │                     │ write barrier dirties cards        │
//! └─────────────────────┼───────────────────────────────────┘
//!                       │ chunks retired into eden
//! ┌─────────────────────┼───────────────────────────────────┐
//! │            Collector (world stopped)                     │
//! │                     ▼                                    │
//! │  ┌───────────────────────────────────────────┐          │
//! │  │ Incremental: scavenge                      │          │
//! │  │  - dirty cards, roots, grey objects        │          │
//! │  │  - eden/survivors ─► survivors / old       │          │
//! │  └───────────────────────────────────────────┘          │
//! │  ┌───────────────────────────────────────────┐          │
//! │  │ Complete: copying or mark-compact          │          │
//! │  │  - whole heap traced                       │          │
//! │  │  - old generation evacuated or compacted   │          │
//! │  └───────────────────────────────────────────┘          │
//! │                     │                                    │
//! │              ChunkAllocator free list ◄── released chunks│
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Safety
//!
//! Objects are addressed by raw `usize` addresses, so the object accessors on
//! [`Heap`] are `unsafe`. Callers must follow these rules:
//!
//! 1. **Keep live objects reachable from a root**: handles, root providers or pins
//! 2. **Store references through [`Heap::write_reference`]**: the write barrier
//!    must see every store into an old object
//! 3. **Re-read addresses after a collection**: unpinned objects may have moved
//!
//! ### Thread Safety
//!
//! [`Heap`] is `Send + Sync` and shared as `Arc<Heap>`. Each thread allocates
//! through its own [`Mutator`]; a collection waits for every running heap operation
//! and keeps new ones out until it is done.

pub mod allocator;
pub mod barrier;
pub mod config;
pub mod error;
pub mod gc;
pub mod heap;
pub mod logging;
pub mod marker;
pub mod memory;
pub mod object;
pub mod policy;
pub mod relocate;
pub mod runtime;
pub mod stats;
pub mod util;

pub use allocator::{Mutator, MutatorStats};
pub use config::{ConfigError, HeapConfig, OldGenerationKind};
pub use error::{GcError, Result};
pub use gc::{CollectionInfo, CollectionWatcher, GcCause};
pub use heap::{ChunkInfo, GenerationKind, Heap, ObjectInfo, PinnedObject, SpaceUsage};
pub use logging::{GcEvent, GcLogger};
pub use marker::{Handle, RootProvider, RootSet, RootType};
pub use object::ObjectShape;
pub use policy::{
    AlwaysCompletely, CollectionPolicy, FixedThresholdPolicy, HeapSizes, OnlyIncrementally,
};
pub use stats::{CollectionRecord, CollectionSummary};

#[doc(hidden)]
pub use log as __log;

/// genscav version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds_a_heap() {
        let config = HeapConfig::default().with_max_heap_size(64 * 1024 * 1024);
        let heap = Heap::new(config).expect("heap");
        assert_eq!(heap.policy().name(), "fixed-threshold");
        assert_eq!(heap.epoch(), 0);
    }

    #[test]
    fn test_version_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
