//! Configuration Module - Heap Layout and Collector Parameters
//!
//! Manages all start-up parameters of the heap. The chunk geometry is fixed for
//! the lifetime of a heap; size targets are handed to the collection policy, which
//! may adjust some of them later.

use crate::util::constants::{
    DEFAULT_CARD_SIZE, DEFAULT_CHUNK_SIZE, GB, KB, MAX_CARD_SIZE, MB, MIN_CARD_SIZE,
    MIN_CHUNK_SIZE,
};
use serde::{Deserialize, Serialize};

/// Old generation reclamation strategy, selected once at start-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OldGenerationKind {
    /// Two spaces; survivors of a complete collection are copied across
    Copying,
    /// One space; complete collections mark, plan, fix and compact in place
    Compacting,
}

impl std::fmt::Display for OldGenerationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OldGenerationKind::Copying => f.write_str("copying"),
            OldGenerationKind::Compacting => f.write_str("compacting"),
        }
    }
}

impl std::str::FromStr for OldGenerationKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "copying" | "copy" => Ok(Self::Copying),
            "compacting" | "compact" | "mark-compact" => Ok(Self::Compacting),
            other => Err(ConfigError::InvalidOldGeneration(other.to_string())),
        }
    }
}

/// Main configuration of a heap
///
/// # Examples
///
/// ```rust
/// use genscav::{HeapConfig, OldGenerationKind};
///
/// let config = HeapConfig {
///     old_generation: OldGenerationKind::Compacting,
///     ..HeapConfig::default().with_max_heap_size(256 * 1024 * 1024)
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapConfig {
    /// Size and alignment of aligned chunks, a power of two
    ///
    /// Default: 1MB
    pub aligned_chunk_size: usize,

    /// Bytes of object area covered by one card table entry, a power of two
    /// between 64 and 512
    ///
    /// Default: 512
    pub card_size: usize,

    /// Objects of at least this many bytes get their own unaligned chunk
    ///
    /// Default: 1/8 of the aligned chunk size
    pub large_object_threshold: usize,

    /// Number of survivor ages in the young generation
    ///
    /// Default: 1
    pub max_survivor_spaces: usize,

    /// Strategy for reclaiming the old generation
    ///
    /// Default: Copying
    pub old_generation: OldGenerationKind,

    /// Maintain card tables so young-only collections are possible
    ///
    /// When disabled every collection is complete and chunks carry no tables.
    /// Default: true
    pub remembered_set: bool,

    /// Minimum heap size in bytes
    pub min_heap_size: usize,

    /// Initial heap size in bytes
    pub initial_heap_size: usize,

    /// Maximum committed chunk memory in bytes; mutator allocation fails beyond it
    ///
    /// Default: 1/2 of physical memory, at most 4GB
    pub max_heap_size: usize,

    /// Young generation size that triggers a collection on allocation
    ///
    /// Default: 1/4 of max_heap_size
    pub max_young_size: usize,

    /// Old generation size beyond which a collection becomes complete
    ///
    /// Default: 1/2 of max_heap_size
    pub old_collection_threshold: usize,

    /// Objects that survived this many collections are tenured
    ///
    /// Default: max_survivor_spaces
    pub tenuring_age: usize,

    /// Bytes of aligned chunks kept on the free list after a collection
    ///
    /// Default: 8 chunks
    pub max_free_chunk_bytes: usize,

    /// A mutator keeps an exhausted chunk as its retained chunk only if it still
    /// has this many free bytes
    ///
    /// Default: 4KB
    pub min_retained_chunk_bytes: usize,

    /// Fill produced and released chunks with poison patterns
    ///
    /// Default: on in debug builds
    pub zap_chunks: bool,

    /// Verify the heap before every collection
    pub verify_before_gc: bool,

    /// Verify the heap after every collection
    pub verify_after_gc: bool,

    /// Escalate verification failures to a fatal error
    ///
    /// Default: false, failures are logged and collection continues
    pub verify_fatal: bool,

    /// Log every collection at info level
    pub verbose: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        let total_memory = get_total_memory();
        let max_heap = calculate_max_heap(total_memory);

        HeapConfig {
            // Chunk geometry
            aligned_chunk_size: DEFAULT_CHUNK_SIZE,
            card_size: DEFAULT_CARD_SIZE,
            large_object_threshold: DEFAULT_CHUNK_SIZE / 8,

            // Generations
            max_survivor_spaces: 1,
            old_generation: OldGenerationKind::Copying,
            remembered_set: true,

            // Heap size
            min_heap_size: (max_heap / 16).max(8 * MB).min(max_heap),
            initial_heap_size: (max_heap / 16).max(8 * MB).min(max_heap),
            max_heap_size: max_heap,
            max_young_size: max_heap / 4,
            old_collection_threshold: max_heap / 2,
            tenuring_age: 1,

            // Chunk reuse
            max_free_chunk_bytes: 8 * DEFAULT_CHUNK_SIZE,
            min_retained_chunk_bytes: 4 * KB,

            // Debug
            zap_chunks: cfg!(debug_assertions),
            verify_before_gc: false,
            verify_after_gc: false,
            verify_fatal: false,
            verbose: false,
        }
    }
}

impl HeapConfig {
    /// Configuration with a given chunk size; thresholds derived from it follow
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        HeapConfig {
            aligned_chunk_size: chunk_size,
            large_object_threshold: chunk_size / 8,
            max_free_chunk_bytes: 8 * chunk_size,
            ..Default::default()
        }
    }

    /// Cap the heap at `max_heap_size`; the sizes derived from it follow
    ///
    /// Minimum and initial sizes are clamped, never raised.
    pub fn with_max_heap_size(self, max_heap_size: usize) -> Self {
        HeapConfig {
            min_heap_size: self.min_heap_size.min(max_heap_size),
            initial_heap_size: self.initial_heap_size.min(max_heap_size),
            max_heap_size,
            max_young_size: max_heap_size / 4,
            old_collection_threshold: max_heap_size / 2,
            ..self
        }
    }

    /// Validate configuration
    ///
    /// # Examples
    ///
    /// ```rust
    /// use genscav::HeapConfig;
    ///
    /// let config = HeapConfig {
    ///     aligned_chunk_size: 3 * 1024 * 1024,  // Invalid, not a power of two
    ///     ..Default::default()
    /// };
    ///
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Chunk geometry
        if !self.aligned_chunk_size.is_power_of_two() || self.aligned_chunk_size < MIN_CHUNK_SIZE
        {
            return Err(ConfigError::InvalidChunkSize(format!(
                "aligned_chunk_size must be a power of two >= {} bytes, got {}",
                MIN_CHUNK_SIZE, self.aligned_chunk_size
            )));
        }

        if !self.card_size.is_power_of_two()
            || self.card_size < MIN_CARD_SIZE
            || self.card_size > MAX_CARD_SIZE
        {
            return Err(ConfigError::InvalidCardSize(format!(
                "card_size must be a power of two between {} and {}, got {}",
                MIN_CARD_SIZE, MAX_CARD_SIZE, self.card_size
            )));
        }

        if self.large_object_threshold == 0
            || self.large_object_threshold > self.aligned_chunk_size / 2
        {
            return Err(ConfigError::InvalidThreshold(format!(
                "large_object_threshold must be in 1..={}, got {}",
                self.aligned_chunk_size / 2,
                self.large_object_threshold
            )));
        }

        // Generations
        if self.max_survivor_spaces > 15 {
            return Err(ConfigError::InvalidSurvivorSpaces(format!(
                "max_survivor_spaces must be at most 15, got {}",
                self.max_survivor_spaces
            )));
        }

        if self.tenuring_age > self.max_survivor_spaces {
            return Err(ConfigError::InvalidSurvivorSpaces(format!(
                "tenuring_age ({}) cannot exceed max_survivor_spaces ({})",
                self.tenuring_age, self.max_survivor_spaces
            )));
        }

        // Heap size
        if self.max_heap_size < 2 * self.aligned_chunk_size {
            return Err(ConfigError::InvalidHeapSize(
                "max_heap_size must hold at least two aligned chunks".to_string(),
            ));
        }

        if self.min_heap_size > self.max_heap_size {
            return Err(ConfigError::InvalidHeapSize(
                "min_heap_size cannot exceed max_heap_size".to_string(),
            ));
        }

        if self.initial_heap_size < self.min_heap_size
            || self.initial_heap_size > self.max_heap_size
        {
            return Err(ConfigError::InvalidHeapSize(
                "initial_heap_size must be between min and max heap size".to_string(),
            ));
        }

        if self.max_young_size == 0 || self.max_young_size > self.max_heap_size {
            return Err(ConfigError::InvalidHeapSize(
                "max_young_size must be in 1..=max_heap_size".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - GENSCAV_MAX_HEAP
    /// - GENSCAV_CHUNK_SIZE
    /// - GENSCAV_OLD_GEN (`copying` or `compacting`)
    /// - GENSCAV_VERIFY
    /// - GENSCAV_VERBOSE
    ///
    /// # Examples
    ///
    /// ```bash
    /// export GENSCAV_MAX_HEAP=268435456  # 256MB
    /// export GENSCAV_OLD_GEN=compacting
    /// export GENSCAV_VERIFY=1
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("GENSCAV_CHUNK_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                config.aligned_chunk_size = size;
                config.large_object_threshold = size / 8;
            }
        }

        if let Ok(val) = std::env::var("GENSCAV_MAX_HEAP") {
            if let Ok(size) = val.parse::<usize>() {
                config = config.with_max_heap_size(size);
            }
        }

        if let Ok(val) = std::env::var("GENSCAV_OLD_GEN") {
            match val.parse::<OldGenerationKind>() {
                Ok(kind) => config.old_generation = kind,
                Err(e) => log::warn!("ignoring GENSCAV_OLD_GEN: {}", e),
            }
        }

        if let Ok(val) = std::env::var("GENSCAV_VERIFY") {
            let enabled = val == "1" || val.eq_ignore_ascii_case("true");
            config.verify_before_gc = enabled;
            config.verify_after_gc = enabled;
        }

        if let Ok(val) = std::env::var("GENSCAV_VERBOSE") {
            config.verbose = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid heap size: {0}")]
    InvalidHeapSize(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Invalid card size: {0}")]
    InvalidCardSize(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Invalid survivor spaces: {0}")]
    InvalidSurvivorSpaces(String),

    #[error("Unknown old generation kind: {0}")]
    InvalidOldGeneration(String),
}

// ============================================================================
// CONSTANTS & HELPERS
// ============================================================================

/// Get total physical memory in bytes
pub fn get_total_memory() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions.
        let (pages, page_size) =
            unsafe { (libc::sysconf(libc::_SC_PHYS_PAGES), libc::sysconf(libc::_SC_PAGESIZE)) };
        if pages > 0 && page_size > 0 {
            return (pages as usize).saturating_mul(page_size as usize);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
            for line in meminfo.lines() {
                if line.starts_with("MemTotal:") {
                    let parts: Vec<&str> = line.split_whitespace().collect();
                    if parts.len() >= 2 {
                        if let Ok(kb) = parts[1].parse::<usize>() {
                            return kb * KB;
                        }
                    }
                }
            }
        }
    }

    8 * GB
}

/// Calculate max heap size based on available memory
fn calculate_max_heap(total_memory: usize) -> usize {
    (total_memory / 2).clamp(64 * MB, 4 * GB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HeapConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.aligned_chunk_size, MB);
        assert_eq!(config.card_size, 512);
        assert_eq!(config.old_generation, OldGenerationKind::Copying);
    }

    #[test]
    fn test_chunk_size_must_be_power_of_two() {
        let config = HeapConfig {
            aligned_chunk_size: 3 * MB,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChunkSize(_))
        ));
    }

    #[test]
    fn test_card_size_bounds() {
        let config = HeapConfig {
            card_size: 1024,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heap_size_ordering() {
        let config = HeapConfig {
            min_heap_size: 64 * MB,
            initial_heap_size: 32 * MB,
            max_heap_size: 128 * MB,
            max_young_size: 16 * MB,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHeapSize(_))
        ));
    }

    #[test]
    fn test_tenuring_age_bounded_by_survivors() {
        let config = HeapConfig {
            max_survivor_spaces: 1,
            tenuring_age: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_old_generation_parse() {
        assert_eq!(
            "compacting".parse::<OldGenerationKind>().ok(),
            Some(OldGenerationKind::Compacting)
        );
        assert!("generational".parse::<OldGenerationKind>().is_err());
    }

    #[test]
    fn test_with_chunk_size_derives_threshold() {
        let config = HeapConfig::with_chunk_size(256 * KB);
        assert_eq!(config.large_object_threshold, 32 * KB);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_max_heap_size_clamps_derived_sizes() {
        let config = HeapConfig::with_chunk_size(128 * KB).with_max_heap_size(4 * MB);
        assert_eq!(config.max_heap_size, 4 * MB);
        assert!(config.min_heap_size <= 4 * MB);
        assert!(config.initial_heap_size <= 4 * MB);
        assert_eq!(config.max_young_size, MB);
        assert!(config.validate().is_ok());
    }
}
