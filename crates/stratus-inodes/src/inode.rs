//! The in-memory inode.
//!
//! An inode's identity (`id`, kind, a file's extension) is fixed at
//! construction. Everything else lives behind a small mutex: the cloud
//! handle, the cached or local (name, parent) location, the bind handle of
//! an in-flight upload, the removed flag, and an attached [`FileInfo`].
//!
//! The database's index lock serializes mutation; the per-inode mutex exists
//! so readers on mount threads can take attributes without the big lock.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use stratus_cache::FileInfo;
use stratus_core::domain::newtypes::{BindHandle, FileExtension, InodeId, NodeHandle};
use stratus_core::ports::NodeInfo;

/// Which kind of node an inode describes.
#[derive(Debug, Clone)]
pub enum InodeKind {
    Directory,
    /// Files carry their extension, fixed at creation; it addresses the
    /// inode's content in the file cache across renames.
    File { extension: FileExtension },
}

#[derive(Debug)]
struct InodeState {
    handle: Option<NodeHandle>,
    /// For a local-only inode this is its authoritative location; for a
    /// cloud-resident one it is a cached copy of what the cloud last said.
    name: Option<String>,
    parent_handle: Option<NodeHandle>,
    bind_handle: Option<BindHandle>,
    removed: bool,
    accessed: Instant,
    file_info: Option<Arc<FileInfo>>,
}

/// The core's long-lived representation of a file or directory.
#[derive(Debug)]
pub struct Inode {
    id: InodeId,
    kind: InodeKind,
    state: Mutex<InodeState>,
}

/// Shared reference to an inode. The arena owns one; every outstanding
/// clone extends the inode's visibility until eviction.
pub type InodeRef = Arc<Inode>;

impl Inode {
    /// Build an inode for a node the cloud described.
    pub(crate) fn from_cloud(info: &NodeInfo, extension: FileExtension) -> InodeRef {
        let kind = if info.is_directory {
            InodeKind::Directory
        } else {
            InodeKind::File { extension }
        };

        Arc::new(Self {
            id: InodeId::from_handle(info.handle),
            kind,
            state: Mutex::new(InodeState {
                handle: Some(info.handle),
                name: Some(info.name.clone()),
                parent_handle: info.parent_handle,
                bind_handle: None,
                removed: false,
                accessed: Instant::now(),
                file_info: None,
            }),
        })
    }

    /// Build a file inode that exists only locally.
    pub(crate) fn local_file(
        id: InodeId,
        extension: FileExtension,
        name: String,
        parent_handle: NodeHandle,
    ) -> InodeRef {
        Arc::new(Self {
            id,
            kind: InodeKind::File { extension },
            state: Mutex::new(InodeState {
                handle: None,
                name: Some(name),
                parent_handle: Some(parent_handle),
                bind_handle: None,
                removed: false,
                accessed: Instant::now(),
                file_info: None,
            }),
        })
    }

    /// Build a file inode rehydrated from a store row, with a known id and
    /// whatever identity the row and the cloud agreed on.
    pub(crate) fn rehydrated_file(
        id: InodeId,
        extension: FileExtension,
        handle: Option<NodeHandle>,
        name: Option<String>,
        parent_handle: Option<NodeHandle>,
    ) -> InodeRef {
        Arc::new(Self {
            id,
            kind: InodeKind::File { extension },
            state: Mutex::new(InodeState {
                handle,
                name,
                parent_handle,
                bind_handle: None,
                removed: false,
                accessed: Instant::now(),
                file_info: None,
            }),
        })
    }

    #[must_use]
    pub fn id(&self) -> InodeId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> &InodeKind {
        &self.kind
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, InodeKind::Directory)
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        !self.is_directory()
    }

    /// A file's extension; `None` for directories.
    #[must_use]
    pub fn extension(&self) -> Option<&FileExtension> {
        match &self.kind {
            InodeKind::Directory => None,
            InodeKind::File { extension } => Some(extension),
        }
    }

    #[must_use]
    pub fn handle(&self) -> Option<NodeHandle> {
        self.state.lock().unwrap().handle
    }

    /// True once the inode exists in the cloud.
    #[must_use]
    pub fn is_cloud_resident(&self) -> bool {
        self.handle().is_some()
    }

    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.state.lock().unwrap().name.clone()
    }

    #[must_use]
    pub fn parent_handle(&self) -> Option<NodeHandle> {
        self.state.lock().unwrap().parent_handle
    }

    /// The inode's (parent, name) slot, when it has one.
    #[must_use]
    pub fn location(&self) -> Option<(NodeHandle, String)> {
        let state = self.state.lock().unwrap();
        match (state.parent_handle, &state.name) {
            (Some(parent), Some(name)) => Some((parent, name.clone())),
            _ => None,
        }
    }

    #[must_use]
    pub fn bind_handle(&self) -> Option<BindHandle> {
        self.state.lock().unwrap().bind_handle.clone()
    }

    #[must_use]
    pub fn removed(&self) -> bool {
        self.state.lock().unwrap().removed
    }

    #[must_use]
    pub fn file_info(&self) -> Option<Arc<FileInfo>> {
        self.state.lock().unwrap().file_info.clone()
    }

    /// How long since the inode was last returned to a caller.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.state.lock().unwrap().accessed.elapsed()
    }

    pub(crate) fn touch(&self) {
        self.state.lock().unwrap().accessed = Instant::now();
    }

    pub(crate) fn set_removed(&self, removed: bool) {
        self.state.lock().unwrap().removed = removed;
    }

    pub(crate) fn set_bind_handle(&self, bind: Option<BindHandle>) {
        self.state.lock().unwrap().bind_handle = bind;
    }

    pub(crate) fn set_handle(&self, handle: Option<NodeHandle>) {
        self.state.lock().unwrap().handle = handle;
    }

    pub(crate) fn set_location(&self, name: Option<String>, parent: Option<NodeHandle>) {
        let mut state = self.state.lock().unwrap();
        state.name = name;
        state.parent_handle = parent;
    }

    pub(crate) fn attach_file_info(&self, info: Arc<FileInfo>) {
        self.state.lock().unwrap().file_info = Some(info);
    }

    /// Refresh cached cloud metadata from a fresh description.
    pub(crate) fn apply_info(&self, info: &NodeInfo) {
        let mut state = self.state.lock().unwrap();
        state.handle = Some(info.handle);
        state.name = Some(info.name.clone());
        state.parent_handle = info.parent_handle;
    }
}
