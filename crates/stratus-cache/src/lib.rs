//! Stratus Cache - local file content
//!
//! Owns the on-disk bytes of files the engine has created or hydrated.
//! Entries are addressed by `(extension, inode id)`; the inode database
//! stores the same pair, which is how content survives a restart.

pub mod extensions;
pub mod file_cache;

pub use extensions::ExtensionRegistry;
pub use file_cache::{FileCache, FileInfo, IoContext};

use thiserror::Error;

/// Errors raised by the file cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The cache cannot hold any more entries.
    #[error("Cache full: {0}")]
    Full(String),

    /// The underlying filesystem failed.
    #[error("Cache I/O failed: {0}")]
    Io(String),

    /// No entry exists for the requested (extension, id) pair.
    #[error("Cache entry not found")]
    NotFound,
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}
