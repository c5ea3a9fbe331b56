//! Error Module - Heap and Collector Error Types
//!
//! Defines all error types used by the heap.
//!
//! # Error Categories
//!
//! ## Allocation Errors
//! - `OutOfMemory` - the chunk allocator could not produce memory for a mutator
//!
//! ## Configuration Errors
//! - `Configuration` - invalid heap configuration or policy size ordering
//! - `InvalidArgument` - invalid function argument
//!
//! ## Heap State Errors
//! - `InvalidObject` - an address that is not the start of a heap object
//! - `InvalidHandle` - a released or never issued global handle
//! - `Verification` - heap verification found broken invariants
//! - `Internal` - invariant violation; these are normally raised through [`fatal!`]
//!
//! Invariant violations inside a collection are never returned as errors: the heap
//! cannot be left half collected, so [`fatal!`] logs a diagnostic and aborts.

use thiserror::Error;

/// Main error type for all heap operations
///
/// # Examples
///
/// ```rust
/// use genscav::error::GcError;
///
/// fn handle_error(err: GcError) {
///     match err {
///         GcError::OutOfMemory { requested, available } => {
///             eprintln!("OOM: requested {}, available {}", requested, available);
///         }
///         _ => {
///             eprintln!("Other error: {}", err);
///         }
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum GcError {
    /// Out of memory - the heap limit or the operating system refused a chunk
    ///
    /// **When returned:** A mutator allocation still fails after a collection
    ///
    /// **Recovery strategy:** Drop references and retry, or fail the operation
    #[error("Out of memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory { requested: usize, available: usize },

    /// Configuration error
    ///
    /// **When returned:** Invalid heap configuration or a policy whose sizes violate
    /// `min <= initial <= max`
    ///
    /// **Recovery strategy:** Fix the configuration, nothing was allocated
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid argument
    ///
    /// **When returned:** Function argument fails validation
    ///
    /// **Example scenarios:**
    /// - Reference slot index beyond the object's slot count
    /// - Object shape that cannot be encoded in a header
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Address does not denote a heap object
    #[error("Invalid object address: {address:#x}")]
    InvalidObject { address: usize },

    /// Global handle was released or never issued
    #[error("Invalid handle: {0}")]
    InvalidHandle(usize),

    /// Heap verification failed
    ///
    /// **When returned:** `verify()` found one or more broken invariants
    ///
    /// **Recovery strategy:** None, the report is diagnostic evidence
    #[error("Heap verification failed with {} problem(s): {}", .failures.len(), .failures.join("; "))]
    Verification { failures: Vec<String> },

    /// Internal error - indicates a bug in the collector
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GcError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GcError::OutOfMemory { .. } | GcError::InvalidArgument(_) | GcError::InvalidHandle(_)
        )
    }

    /// Check if this error indicates a bug in the collector
    pub fn is_bug(&self) -> bool {
        matches!(self, GcError::Internal(_) | GcError::Verification { .. })
    }
}

impl From<crate::config::ConfigError> for GcError {
    fn from(err: crate::config::ConfigError) -> Self {
        GcError::Configuration(err.to_string())
    }
}

/// Result type alias for heap operations
pub type Result<T> = std::result::Result<T, GcError>;

/// Abort on a broken heap invariant
///
/// Logs the message at error level and panics. Continuing after a broken invariant
/// would corrupt the heap, so there is no recovery path.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::__log::error!("fatal heap invariant violation: {}", message);
        panic!("fatal heap invariant violation: {}", message);
    }};
}

/// Macro for assertion with context, fatal when violated
#[macro_export]
macro_rules! assert_context {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::fatal!("assertion failed at {}: {}", stringify!($cond), format_args!($($arg)+));
        }
    };
}

/// Ensure condition is true, otherwise return error
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}
