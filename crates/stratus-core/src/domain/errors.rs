//! Error types for the engine core.
//!
//! `DomainError` covers construction-time validation of domain values.
//! `EngineError` is the single error surface of engine operations: every
//! failing operation reports exactly one of its kinds.

use thiserror::Error;

/// Errors raised when constructing or parsing domain values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A bind handle was empty or malformed.
    #[error("Invalid bind handle: {0}")]
    InvalidBindHandle(String),

    /// A node handle was outside the representable range.
    #[error("Invalid node handle: {0}")]
    InvalidHandle(u64),

    /// A name was empty or otherwise unusable as a directory entry.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure kinds reported by engine operations.
///
/// Cloud failures that imply "nothing changed" (`Transport`, `AccessDenied`)
/// are propagated unchanged and are never accompanied by local mutation.
/// `Internal` marks a broken invariant or a storage fault; the surrounding
/// transaction is rolled back before it surfaces.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("no such node")]
    NotFound,

    #[error("node already exists")]
    Exists,

    #[error("access denied")]
    AccessDenied,

    #[error("not a directory")]
    NotADirectory,

    #[error("resource busy")]
    Busy,

    #[error("storage full")]
    StorageFull,

    #[error("cache entry evicted")]
    CacheEvicted,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True when the failure guarantees no state changed on either side.
    #[must_use]
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::AccessDenied)
    }
}

impl From<DomainError> for EngineError {
    fn from(err: DomainError) -> Self {
        Self::Internal(err.to_string())
    }
}
