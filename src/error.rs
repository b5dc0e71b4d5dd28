//! # Error Types
//!
//! Fallible operations return `eyre::Result` with rich context, matching the
//! rest of the codebase. Failures that callers need to distinguish
//! programmatically are raised as [`StoreError`] values, which stay
//! downcastable through `eyre::Report`:
//!
//! ```ignore
//! match map.put(key, &value) {
//!     Err(e) if matches!(e.downcast_ref(), Some(StoreError::OutOfSpace { .. })) => evict(),
//!     other => other?,
//! }
//! ```
//!
//! Plain I/O failures (open, extend, map, flush) are `std::io::Error` wrapped
//! with `wrap_err_with` context naming the file and the operation.

/// Failure categories a caller may want to branch on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A reserved sentinel key (0 or the type minimum) was supplied to a
    /// primitive index.
    InvalidKey(i64),
    /// A zero-byte allocation was requested, or a codec could not size a
    /// value.
    InvalidSize(u64),
    /// The system allocator rejected a request.
    AllocationFailed { bytes: u64 },
    /// The allocator's configured limit would be exceeded.
    OutOfSpace { requested: u64, available: u64 },
    /// Encode or decode failed.
    Codec(String),
    /// A nonempty file carries an unknown magic number or version.
    IncompatibleFile { reason: String },
    /// The persisted index variant does not match the requested one.
    IncompatibleIndex { expected: u32, actual: u32 },
    /// The store was already closed.
    AlreadyClosed,
    /// Builder misconfiguration.
    Config(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::InvalidKey(key) => {
                write!(f, "key {} is a reserved sentinel and cannot be stored", key)
            }
            StoreError::InvalidSize(size) => {
                write!(f, "invalid allocation or value size: {}", size)
            }
            StoreError::AllocationFailed { bytes } => {
                write!(f, "system allocator rejected a request for {} bytes", bytes)
            }
            StoreError::OutOfSpace {
                requested,
                available,
            } => write!(
                f,
                "out of space: requested {} bytes but only {} available",
                requested, available
            ),
            StoreError::Codec(msg) => write!(f, "codec error: {}", msg),
            StoreError::IncompatibleFile { reason } => {
                write!(f, "incompatible store file: {}", reason)
            }
            StoreError::IncompatibleIndex { expected, actual } => write!(
                f,
                "incompatible index: expected {} but the persisted form holds {}",
                expected, actual
            ),
            StoreError::AlreadyClosed => write!(f, "store is closed"),
            StoreError::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}
