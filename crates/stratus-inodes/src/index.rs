//! The in-memory index set.
//!
//! Four maps over one arena, kept coherent under the database's index lock:
//!
//! - `by_id` owns every in-memory inode;
//! - `by_handle` holds every inode with a cloud handle;
//! - `by_location` holds only handle-less inodes that occupy a
//!   (parent, name) slot, keyed by an owned string;
//! - `by_bind` holds inodes whose upload is binding.
//!
//! All keys map to `InodeId`; only the arena holds strong references, so an
//! index entry can never keep a purged inode alive.

use std::collections::HashMap;

use stratus_core::domain::newtypes::{BindHandle, InodeId, NodeHandle};

use crate::inode::InodeRef;

#[derive(Default)]
pub(crate) struct IndexState {
    by_id: HashMap<InodeId, InodeRef>,
    by_handle: HashMap<NodeHandle, InodeId>,
    by_location: HashMap<(NodeHandle, String), InodeId>,
    by_bind: HashMap<BindHandle, InodeId>,
}

impl IndexState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly built inode, registering whichever secondary indexes
    /// its current state calls for.
    pub fn insert(&mut self, inode: &InodeRef) -> Option<InodeRef> {
        debug_assert!(!self.by_id.contains_key(&inode.id()));

        let mut displaced = None;

        if let Some(handle) = inode.handle() {
            let prior = self.by_handle.insert(handle, inode.id());
            debug_assert!(prior.is_none());
        } else if let Some((parent, name)) = inode.location() {
            // A newcomer at an occupied slot replaces the occupant.
            if let Some(prior_id) = self.by_location.insert((parent, name), inode.id()) {
                if let Some(prior) = self.by_id.get(&prior_id) {
                    prior.set_removed(true);
                    prior.set_location(None, None);
                    displaced = Some(InodeRef::clone(prior));
                }
            }
        }

        self.by_id.insert(inode.id(), InodeRef::clone(inode));
        displaced
    }

    pub fn get(&self, id: InodeId) -> Option<InodeRef> {
        self.by_id.get(&id).cloned()
    }

    pub fn get_by_handle(&self, handle: NodeHandle) -> Option<InodeRef> {
        let id = self.by_handle.get(&handle)?;
        self.by_id.get(id).cloned()
    }

    pub fn get_by_location(&self, parent: NodeHandle, name: &str) -> Option<InodeRef> {
        let id = self.by_location.get(&(parent, name.to_string()))?;
        self.by_id.get(id).cloned()
    }

    pub fn get_by_bind(&self, bind: &BindHandle) -> Option<InodeRef> {
        let id = self.by_bind.get(bind)?;
        self.by_id.get(id).cloned()
    }

    /// Reserve a bind handle for a file whose upload is starting.
    ///
    /// Fails if the handle is taken or the file already holds one: an inode
    /// may hold at most one bind handle at a time.
    pub fn bind(&mut self, bind: BindHandle, inode: &InodeRef) -> Result<(), ()> {
        if self.by_bind.contains_key(&bind) || inode.bind_handle().is_some() {
            return Err(());
        }
        inode.set_bind_handle(Some(bind.clone()));
        self.by_bind.insert(bind, inode.id());
        Ok(())
    }

    /// Release an inode's bind handle, if it holds one.
    pub fn unbind(&mut self, inode: &InodeRef) -> Option<BindHandle> {
        let bind = inode.bind_handle()?;
        self.by_bind.remove(&bind);
        inode.set_bind_handle(None);
        Some(bind)
    }

    /// Turn a local-only inode cloud-resident under `handle`.
    ///
    /// Drops its location and bind entries, keeps its cached name/parent as
    /// metadata, and indexes it by handle. Any stale mapping for `handle`
    /// is displaced.
    pub fn promote(&mut self, inode: &InodeRef, handle: NodeHandle) {
        if let Some((parent, name)) = inode.location() {
            if inode.handle().is_none() {
                self.by_location.remove(&(parent, name));
            }
        }
        self.unbind(inode);

        if let Some(old) = inode.handle() {
            if old != handle {
                self.by_handle.remove(&old);
            }
        }
        inode.set_handle(Some(handle));
        self.by_handle.insert(handle, inode.id());
    }

    /// Move a local-only inode to a new (parent, name) slot.
    ///
    /// Returns the slot's previous occupant, which is marked removed ("it
    /// is replaced").
    pub fn relocate(
        &mut self,
        inode: &InodeRef,
        name: String,
        parent: NodeHandle,
    ) -> Option<InodeRef> {
        debug_assert!(inode.handle().is_none());

        if let Some((old_parent, old_name)) = inode.location() {
            self.by_location.remove(&(old_parent, old_name));
        }

        let mut displaced = None;
        if let Some(prior_id) = self
            .by_location
            .insert((parent, name.clone()), inode.id())
        {
            if prior_id != inode.id() {
                if let Some(prior) = self.by_id.get(&prior_id) {
                    prior.set_removed(true);
                    prior.set_location(None, None);
                    displaced = Some(InodeRef::clone(prior));
                }
            }
        }

        inode.set_location(Some(name), Some(parent));
        displaced
    }

    /// Evict an inode from the local namespace without marking it removed:
    /// a cloud node took its slot, but its content may still be reachable
    /// by id.
    pub fn displace(&mut self, inode: &InodeRef) {
        if let Some((parent, name)) = inode.location() {
            if inode.handle().is_none() {
                self.by_location.remove(&(parent, name));
            }
        }
        inode.set_location(None, None);
    }

    /// Mark an inode removed and drop it from the namespace index. It stays
    /// in the arena (and `by_handle`) until the last reference falls.
    pub fn mark_removed(&mut self, inode: &InodeRef) {
        if let Some((parent, name)) = inode.location() {
            if inode.handle().is_none() {
                self.by_location.remove(&(parent, name));
            }
        }
        inode.set_removed(true);
    }

    /// Purge an inode from every index. Called during eviction, when only
    /// the arena still references it.
    pub fn remove(&mut self, inode: &InodeRef) {
        if let Some(handle) = inode.handle() {
            self.by_handle.remove(&handle);
        }
        if let Some((parent, name)) = inode.location() {
            if inode.handle().is_none() {
                self.by_location.remove(&(parent, name));
            }
        }
        self.unbind(inode);
        self.by_id.remove(&inode.id());
    }

    /// Every inode currently in the arena.
    pub fn inodes(&self) -> Vec<InodeRef> {
        self.by_id.values().cloned().collect()
    }

    /// Inodes referenced by nothing but the arena, optionally filtered to
    /// those idle for at least `min_idle`. Candidates for eviction.
    pub fn unreferenced(&self, min_idle: Option<std::time::Duration>) -> Vec<InodeRef> {
        self.by_id
            .values()
            .filter(|inode| InodeRef::strong_count(*inode) == 1)
            .filter(|inode| min_idle.map_or(true, |idle| inode.idle_for() >= idle))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// True when every secondary index is empty too; checked at shutdown
    /// after the arena drains.
    pub fn fully_drained(&self) -> bool {
        self.by_id.is_empty()
            && self.by_handle.is_empty()
            && self.by_location.is_empty()
            && self.by_bind.is_empty()
    }
}
