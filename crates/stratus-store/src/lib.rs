//! Stratus Store - persistent inode state
//!
//! Sqlite persistence for the inode database:
//! - the `inodes` table (one row per locally-known inode)
//! - the `inode_id` singleton (synthetic-id counter)
//!
//! The pool is deliberately limited to a single connection: holding a
//! transaction IS the database lock, and `sqlx`'s drop-without-commit
//! rollback gives every caller a scoped rollback guard for free.

pub mod inodes;
pub mod pool;

pub use inodes::{ChildRow, InodeRow, InodeStore, NewInode, Tx};
pub use pool::DatabasePool;

use thiserror::Error;

/// Errors raised by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be opened.
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    /// Schema migration failed.
    #[error("Store migration failed: {0}")]
    MigrationFailed(String),

    /// A statement failed to execute.
    #[error("Store query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// A row held a value the engine cannot interpret.
    #[error("Store row corrupt: {0}")]
    Corrupt(String),
}
