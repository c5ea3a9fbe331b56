//! Marker Module - roots and worklists for tracing
//!
//! Tracing is single-threaded and stop-the-world:
//! - the scavenger uses the target spaces themselves as its grey set
//!   (see `relocate::copy`)
//! - the mark-compact collector keeps grey objects on a [`MarkQueue`]
//!
//! Root Types:
//! - Stack, thread-local, global, code and image roots through [`RootProvider`]
//! - Global handles ([`HandleTable`])
//! - Pinned objects ([`PinnedObjects`])

pub mod mark_queue;
pub mod roots;

pub use mark_queue::{MarkQueue, SEGMENT_CAPACITY};
pub use roots::{
    Handle, HandleTable, PinnedObjects, RootProvider, RootSet, RootStats, RootType,
};
