//! Runtime Module - coordination between mutators and the collector
//!
//! The heap is driven by mutator threads; the only runtime service it needs is
//! the safepoint that stops them for a collection.

pub mod safepoint;

pub use safepoint::{MutatorGuard, Safepoint, WorldStopped};
