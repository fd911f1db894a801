//! Stratus Inodes - the inode database
//!
//! The process-wide authority for the inode graph. It keeps a stable,
//! persistent identity for every file and directory across renames, moves,
//! replacements and cloud-vs-local divergence, and reconciles three event
//! streams into one view:
//!
//! - cloud change notifications (applied in batches by [`events`])
//! - local mutations entering through mounted volumes
//! - direct engine calls (lookup, listing, create, move, unlink)
//!
//! State lives in three places that this crate keeps coherent: an in-memory
//! arena with four indexes ([`index`]), a durable sqlite record
//! (`stratus-store`) and the local content cache (`stratus-cache`).

mod db;
mod events;
mod index;
mod inode;

pub use db::{InodeDb, LookupOutcome};
pub use inode::{Inode, InodeKind, InodeRef};
