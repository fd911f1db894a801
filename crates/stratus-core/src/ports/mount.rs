//! Mount port (driven/secondary port)
//!
//! A [`Mount`] is a user-facing projection of the cloud namespace, typically
//! backed by a kernel filesystem shim. The engine core never reads from a
//! mount; it only pushes invalidations at it so the kernel drops entries,
//! attributes or pins that the engine knows are stale.

use crate::domain::newtypes::{InodeId, NodeHandle};

/// Callbacks the engine issues against an active mount.
///
/// Implementations forward these to the kernel shim. They must be cheap and
/// non-blocking: the engine may invoke them while holding its own locks,
/// always after the underlying state change is already visible.
pub trait Mount: Send + Sync {
    /// The cloud node this mount is anchored on.
    fn root_handle(&self) -> NodeHandle;

    /// Drop the directory entry `name` under `parent`. `old_id` is supplied
    /// when the entry previously resolved to a known inode.
    fn invalidate_entry(&self, name: &str, parent: InodeId, old_id: Option<InodeId>);

    /// Drop cached attributes of an inode.
    fn invalidate_attributes(&self, id: InodeId);

    /// Drop any pin (kernel reference) held on an inode.
    fn invalidate_pin(&self, id: InodeId);

    /// Take the mount out of service; its root disappeared from the cloud.
    fn disable(&self);
}
