//! Barrier Module - Remembered Set and Write Barrier
//!
//! Generational collection needs to find old-to-young references without tracing
//! the old generation. Three pieces cooperate:
//!
//! - [`card_table`]: one dirty byte per card of an aligned chunk
//! - [`first_object_table`]: finds where objects start inside a dirty card
//! - [`remembered_set`]: the policy tying both to chunks and object headers
//!
//! The write barrier itself is [`post_write_barrier`], run after every reference
//! store through the heap.

pub mod card_table;
pub mod first_object_table;
pub mod remembered_set;

pub use card_table::{CardTable, CARD_CLEAN, CARD_DIRTY};
pub use first_object_table::FirstObjectTable;
pub use remembered_set::RememberedSet;

use crate::heap::chunk::ChunkLayout;
use crate::object;

/// Dirty the holder's card if the holder lives in the old generation
///
/// # Safety
/// `holder` must be the start of a live heap object.
#[inline]
pub unsafe fn post_write_barrier(remembered_set: &RememberedSet, layout: &ChunkLayout, holder: usize) {
    if remembered_set.is_enabled() && object::header(holder).is_remembered() {
        remembered_set.dirty_card_for_object(holder, layout);
    }
}
