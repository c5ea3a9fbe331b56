//! Policy Module - when to collect, and how much
//!
//! The collector never decides on its own whether a collection is due or how
//! large the generations may grow; it asks a [`CollectionPolicy`]. The policy is
//! consulted:
//!
//! ```text
//!   mutator slow path ──► should_collect_on_allocation(sizes)
//!   collection start  ──► should_collect_completely(false, sizes)
//!   after incremental ──► should_collect_completely(true, sizes)
//!   each promotion    ──► tenuring_age()
//!   collection end    ──► maximum_free_aligned_chunk_bytes()
//! ```
//!
//! Policies must be cheap to query; they see sizes, never the heap itself.

pub mod basic;

pub use basic::{AlwaysCompletely, FixedThresholdPolicy, OnlyIncrementally, SizeLimits};

use crate::config::HeapConfig;
use crate::error::{GcError, Result};
use serde::Serialize;

/// Heap occupancy handed to the policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HeapSizes {
    /// Chunk bytes in eden, including chunks mutators currently allocate in
    pub eden_bytes: usize,
    /// Chunk bytes in all survivor spaces
    pub survivor_bytes: usize,
    /// Chunk bytes of the old generation
    pub old_bytes: usize,
    /// Chunk memory obtained from the OS, free list included
    pub committed_bytes: usize,
    /// Bytes of aligned chunks on the free list
    pub free_list_bytes: usize,
}

impl HeapSizes {
    pub fn young_bytes(&self) -> usize {
        self.eden_bytes + self.survivor_bytes
    }

    /// Bytes of chunks owned by a generation or a mutator
    pub fn used_bytes(&self) -> usize {
        self.young_bytes() + self.old_bytes
    }
}

/// Size bounds a policy works within
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PolicyLimits {
    pub min_heap_size: usize,
    pub initial_heap_size: usize,
    pub max_heap_size: usize,
    pub max_young_size: usize,
    pub max_free_chunk_bytes: usize,
}

impl PolicyLimits {
    pub fn from_config(config: &HeapConfig) -> Self {
        Self {
            min_heap_size: config.min_heap_size,
            initial_heap_size: config.initial_heap_size,
            max_heap_size: config.max_heap_size,
            max_young_size: config.max_young_size,
            max_free_chunk_bytes: config.max_free_chunk_bytes,
        }
    }

    /// Check `min <= initial <= max` and `young <= max`
    pub fn validate(&self) -> Result<()> {
        if self.min_heap_size > self.initial_heap_size {
            return Err(GcError::Configuration(format!(
                "minimum heap size {} exceeds initial heap size {}",
                self.min_heap_size, self.initial_heap_size
            )));
        }
        if self.initial_heap_size > self.max_heap_size {
            return Err(GcError::Configuration(format!(
                "initial heap size {} exceeds maximum heap size {}",
                self.initial_heap_size, self.max_heap_size
            )));
        }
        if self.max_young_size == 0 || self.max_young_size > self.max_heap_size {
            return Err(GcError::Configuration(format!(
                "maximum young generation size {} must be in 1..={}",
                self.max_young_size, self.max_heap_size
            )));
        }
        Ok(())
    }
}

/// Decides when collections happen and how large the heap may grow
///
/// # Examples
///
/// ```rust
/// use genscav::policy::{CollectionPolicy, HeapSizes, OnlyIncrementally};
/// use genscav::HeapConfig;
///
/// let config = HeapConfig::with_chunk_size(1024 * 1024);
/// let policy = OnlyIncrementally::from_config(&config).unwrap();
/// let sizes = HeapSizes::default();
/// assert!(!policy.should_collect_completely(false, &sizes));
/// assert!(!policy.should_collect_on_allocation(&sizes));
/// ```
pub trait CollectionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Asked on the allocation slow path before a new chunk is taken
    fn should_collect_on_allocation(&self, sizes: &HeapSizes) -> bool;

    /// Asked before a collection (`following_incremental == false`) and again
    /// right after an incremental one
    fn should_collect_completely(&self, following_incremental: bool, sizes: &HeapSizes) -> bool;

    /// Number of scavenges an object survives in the young generation
    fn tenuring_age(&self) -> usize;

    fn limits(&self) -> PolicyLimits;

    fn minimum_heap_size(&self) -> usize {
        self.limits().min_heap_size
    }

    fn initial_heap_size(&self) -> usize {
        self.limits().initial_heap_size
    }

    fn maximum_heap_size(&self) -> usize {
        self.limits().max_heap_size
    }

    fn maximum_young_generation_size(&self) -> usize {
        self.limits().max_young_size
    }

    fn set_maximum_young_generation_size(&self, bytes: usize) -> Result<()>;

    /// Free-list bytes kept after a collection; the rest goes back to the OS
    fn maximum_free_aligned_chunk_bytes(&self) -> usize {
        self.limits().max_free_chunk_bytes
    }

    fn on_collection_begin(&self, _complete: bool, _sizes: &HeapSizes) {}

    fn on_collection_end(&self, _complete: bool, _sizes: &HeapSizes) {}
}

/// The policy a heap uses when none is given
pub fn default_policy(config: &HeapConfig) -> Result<Box<dyn CollectionPolicy>> {
    Ok(Box::new(FixedThresholdPolicy::from_config(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> PolicyLimits {
        PolicyLimits {
            min_heap_size: 8,
            initial_heap_size: 16,
            max_heap_size: 64,
            max_young_size: 32,
            max_free_chunk_bytes: 4,
        }
    }

    #[test]
    fn test_limits_ordering() {
        assert!(limits().validate().is_ok());

        let bad = PolicyLimits {
            min_heap_size: 32,
            ..limits()
        };
        assert!(matches!(bad.validate(), Err(GcError::Configuration(_))));

        let bad = PolicyLimits {
            initial_heap_size: 128,
            ..limits()
        };
        assert!(bad.validate().is_err());

        let bad = PolicyLimits {
            max_young_size: 65,
            ..limits()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_heap_sizes_totals() {
        let sizes = HeapSizes {
            eden_bytes: 3,
            survivor_bytes: 4,
            old_bytes: 5,
            committed_bytes: 20,
            free_list_bytes: 8,
        };
        assert_eq!(sizes.young_bytes(), 7);
        assert_eq!(sizes.used_bytes(), 12);
    }
}
