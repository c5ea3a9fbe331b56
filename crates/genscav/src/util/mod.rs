//! Util Module - Shared Utilities
//!
//! Utilities and helper functions used throughout the heap.

pub mod alignment;
pub mod atomic;
pub mod debug;

pub use alignment::Alignment;
pub use atomic::{AtomicUtils, SpinLock, SpinLockGuard};

/// Size constants
pub mod constants {
    /// 1 Kilobyte
    pub const KB: usize = 1024;
    /// 1 Megabyte
    pub const MB: usize = 1024 * 1024;
    /// 1 Gigabyte
    pub const GB: usize = 1024 * 1024 * 1024;

    /// Default aligned chunk size: 1MB
    pub const DEFAULT_CHUNK_SIZE: usize = MB;
    /// Smallest aligned chunk size accepted by the configuration
    pub const MIN_CHUNK_SIZE: usize = 64 * KB;
    /// Default card size: 512 bytes
    pub const DEFAULT_CARD_SIZE: usize = 512;
    /// Largest card size the first-object table can encode
    pub const MAX_CARD_SIZE: usize = 512;
    /// Smallest card size accepted by the configuration
    pub const MIN_CARD_SIZE: usize = 64;
}
