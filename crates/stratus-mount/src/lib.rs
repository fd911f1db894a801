//! Stratus Mount - the set of active user-facing mounts
//!
//! The engine core notifies every active mount when state it may have
//! cached becomes stale. Reads (`each`) are concurrent; registration and
//! disabling take the write lock briefly.

use std::sync::{Arc, RwLock};

use stratus_core::domain::newtypes::NodeHandle;
use stratus_core::ports::Mount;

/// Registry of active mounts.
#[derive(Default)]
pub struct MountRegistry {
    mounts: RwLock<Vec<Arc<dyn Mount>>>,
}

impl MountRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mount.
    pub fn add(&self, mount: Arc<dyn Mount>) {
        tracing::debug!(root = %mount.root_handle(), "Mount registered");
        self.mounts.write().unwrap().push(mount);
    }

    /// Invoke `f` for every active mount.
    ///
    /// `f` must not mutate the registry.
    pub fn each(&self, mut f: impl FnMut(&dyn Mount)) {
        for mount in self.mounts.read().unwrap().iter() {
            f(mount.as_ref());
        }
    }

    /// Take every mount anchored on `root` out of service.
    ///
    /// Called when the cloud removes a directory that mounts project.
    pub fn disable(&self, root: NodeHandle) {
        let mut mounts = self.mounts.write().unwrap();
        mounts.retain(|mount| {
            if mount.root_handle() != root {
                return true;
            }
            tracing::warn!(root = %root, "Disabling mount: its root was removed");
            mount.disable();
            false
        });
    }

    /// Number of active mounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mounts.read().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mounts.read().unwrap().is_empty()
    }
}
