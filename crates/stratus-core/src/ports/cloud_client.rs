//! Cloud client port (driven/secondary port)
//!
//! This module defines the contract between the engine core and the cloud
//! transport. The core never caches a cloud node's name or parent beyond a
//! single operation: this port is the authority for both, which is what
//! keeps local shadows from going stale.
//!
//! ## Design Notes
//!
//! - Every method may block on network I/O; the core calls this port with no
//!   lock held and revalidates its in-memory state afterwards.
//! - Lookup-style methods (`get`, `exists`, `child_handle`, `parent_handle`)
//!   return `Option`/plain values: "absent" is an answer, not an error.
//! - Mutating methods return `EngineError` so transport and permission
//!   failures keep their kind all the way up to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::newtypes::{BindHandle, NodeHandle};
use crate::domain::EngineError;

/// Access level the cloud grants on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodePermissions {
    /// Node is visible but cannot be written.
    ReadOnly,
    /// Node contents can change but the node itself cannot be moved/removed.
    ReadWrite,
    /// Full control, including rename and removal.
    Full,
}

/// Description of a cloud node, as reported by the transport.
///
/// This is a port-level DTO: the core copies what it needs out of it and
/// never stores one long-term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// The node's cloud handle.
    pub handle: NodeHandle,
    /// Handle of the containing directory (`None` for the cloud root).
    pub parent_handle: Option<NodeHandle>,
    /// The node's current name.
    pub name: String,
    /// Whether the node is a directory.
    pub is_directory: bool,
    /// Bind token of the upload that is creating this node, when one is
    /// still in flight.
    pub bind_handle: Option<BindHandle>,
    /// Access the cloud grants us on this node.
    pub permissions: NodePermissions,
    /// Content size in bytes (zero for directories).
    pub size: u64,
    /// Last modification time.
    pub mtime: DateTime<Utc>,
}

/// Port trait for the cloud transport.
///
/// ## Implementation Notes
///
/// - `child_handle` resolves a `(parent, name)` slot and additionally reports
///   the bind token when the slot is occupied by an upload that has not
///   finished binding. The core relies on that token to recognise its own
///   uploads.
/// - `each_child` streams; the visitor must not call back into the engine.
#[async_trait::async_trait]
pub trait CloudClient: Send + Sync {
    /// Describe a node, or `None` if the cloud no longer knows it.
    async fn get(&self, handle: NodeHandle) -> Option<NodeInfo>;

    /// Whether the cloud still knows a node.
    async fn exists(&self, handle: NodeHandle) -> bool;

    /// Resolve `(parent, name)` to a child handle.
    ///
    /// Returns the child's handle and, when the child was created by an
    /// upload that is still binding, that upload's bind token.
    async fn child_handle(
        &self,
        parent: NodeHandle,
        name: &str,
    ) -> Option<(NodeHandle, Option<BindHandle>)>;

    /// Whether a directory has any children in the cloud.
    ///
    /// # Errors
    /// `NotFound` if the directory no longer exists.
    async fn has_children(&self, parent: NodeHandle) -> Result<bool, EngineError>;

    /// Stream the children of a directory into `visit`.
    ///
    /// # Errors
    /// `NotFound` if the directory no longer exists; `Transport` on I/O
    /// failure part-way through (the visitor may have seen a prefix).
    async fn each_child(
        &self,
        parent: NodeHandle,
        visit: &mut (dyn FnMut(NodeInfo) + Send),
    ) -> Result<(), EngineError>;

    /// Create a directory in the cloud.
    ///
    /// # Errors
    /// `NotFound` if the parent is gone; `AccessDenied`; `Transport`.
    async fn make_directory(
        &self,
        name: &str,
        parent: NodeHandle,
    ) -> Result<NodeInfo, EngineError>;

    /// Move (and possibly rename) a node.
    async fn move_node(
        &self,
        new_name: &str,
        handle: NodeHandle,
        new_parent: NodeHandle,
    ) -> Result<(), EngineError>;

    /// Remove a node.
    async fn remove(&self, handle: NodeHandle) -> Result<(), EngineError>;

    /// Replace `target` with `source`, atomically in the cloud.
    async fn replace(
        &self,
        source: NodeHandle,
        target: NodeHandle,
    ) -> Result<(), EngineError>;

    /// Handle of a node's parent, or `None` at (or above) the root.
    async fn parent_handle(&self, handle: NodeHandle) -> Option<NodeHandle>;
}
