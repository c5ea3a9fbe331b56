//! Allocator Module - Mutator Allocation
//!
//! Mutators never take the heap lock to allocate an object:
//!
//! - **Bump pointer allocation** in a chunk: one compare-and-swap on its `top`
//! - **Mutator chunks**: each mutator owns a current and a retained aligned chunk
//!   and takes new ones from the chunk allocator's free list
//! - **Large objects** (at or above `large_object_threshold`) get an unaligned
//!   chunk of their own
//!
//! The collector allocates through the serial variant of the bump pointer while
//! the world is stopped.

pub mod bump;
pub mod tlab;

pub use bump::{attempt_allocation_parallel, attempt_allocation_serial};
pub use tlab::{Mutator, MutatorState, MutatorStats};
