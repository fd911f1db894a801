//! Shared test fixtures: an in-memory cloud, a recording mount, and a
//! fully wired engine harness.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use stratus_cache::FileCache;
use stratus_core::config::EngineConfig;
use stratus_core::domain::newtypes::{BindHandle, InodeId, NodeHandle};
use stratus_core::domain::EngineError;
use stratus_core::ports::{
    CloudClient, Mount, NodeEvent, NodeEventKind, NodeInfo, NodePermissions,
};
use stratus_inodes::InodeDb;
use stratus_mount::MountRegistry;
use stratus_store::DatabasePool;

// ============================================================================
// Fake cloud
// ============================================================================

#[derive(Debug, Clone)]
struct CloudNode {
    handle: NodeHandle,
    parent: Option<NodeHandle>,
    name: String,
    is_directory: bool,
    bind_handle: Option<BindHandle>,
    size: u64,
}

#[derive(Default)]
struct CloudState {
    nodes: HashMap<NodeHandle, CloudNode>,
}

/// Scripted in-memory cloud implementing the transport port.
pub struct FakeCloud {
    state: Mutex<CloudState>,
    next_handle: AtomicU64,
    /// Error returned by the next mutating call, if set.
    fail_next: Mutex<Option<EngineError>>,
    /// Number of lookups served; used to prove an operation never reached
    /// the cloud.
    pub lookups: AtomicUsize,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CloudState::default()),
            next_handle: AtomicU64::new(1000),
            fail_next: Mutex::new(None),
            lookups: AtomicUsize::new(0),
        })
    }

    fn allocate(&self) -> NodeHandle {
        NodeHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst)).unwrap()
    }

    fn info(node: &CloudNode) -> NodeInfo {
        NodeInfo {
            handle: node.handle,
            parent_handle: node.parent,
            name: node.name.clone(),
            is_directory: node.is_directory,
            bind_handle: node.bind_handle.clone(),
            permissions: NodePermissions::Full,
            size: node.size,
            mtime: Utc::now(),
        }
    }

    fn take_failure(&self) -> Result<(), EngineError> {
        match self.fail_next.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Make the next mutating call fail with `err`.
    pub fn fail_next_mutation(&self, err: EngineError) {
        *self.fail_next.lock().unwrap() = Some(err);
    }

    pub fn add_root(&self) -> NodeHandle {
        self.insert(None, "", true, None)
    }

    pub fn add_directory(&self, parent: NodeHandle, name: &str) -> NodeHandle {
        self.insert(Some(parent), name, true, None)
    }

    pub fn add_file(&self, parent: NodeHandle, name: &str) -> NodeHandle {
        self.insert(Some(parent), name, false, None)
    }

    /// A file whose creating upload is still binding.
    pub fn add_binding_file(
        &self,
        parent: NodeHandle,
        name: &str,
        bind: BindHandle,
    ) -> NodeHandle {
        self.insert(Some(parent), name, false, Some(bind))
    }

    fn insert(
        &self,
        parent: Option<NodeHandle>,
        name: &str,
        is_directory: bool,
        bind_handle: Option<BindHandle>,
    ) -> NodeHandle {
        let handle = self.allocate();
        self.state.lock().unwrap().nodes.insert(
            handle,
            CloudNode {
                handle,
                parent,
                name: name.to_string(),
                is_directory,
                bind_handle,
                size: 0,
            },
        );
        handle
    }

    pub fn remove_node(&self, handle: NodeHandle) {
        self.state.lock().unwrap().nodes.remove(&handle);
    }

    pub fn node_name(&self, handle: NodeHandle) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(&handle)
            .map(|n| n.name.clone())
    }
}

#[async_trait::async_trait]
impl CloudClient for FakeCloud {
    async fn get(&self, handle: NodeHandle) -> Option<NodeInfo> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(&handle)
            .map(Self::info)
    }

    async fn exists(&self, handle: NodeHandle) -> bool {
        self.state.lock().unwrap().nodes.contains_key(&handle)
    }

    async fn child_handle(
        &self,
        parent: NodeHandle,
        name: &str,
    ) -> Option<(NodeHandle, Option<BindHandle>)> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .nodes
            .values()
            .find(|n| n.parent == Some(parent) && n.name == name)
            .map(|n| (n.handle, n.bind_handle.clone()))
    }

    async fn has_children(&self, parent: NodeHandle) -> Result<bool, EngineError> {
        let state = self.state.lock().unwrap();
        if !state.nodes.contains_key(&parent) {
            return Err(EngineError::NotFound);
        }
        Ok(state.nodes.values().any(|n| n.parent == Some(parent)))
    }

    async fn each_child(
        &self,
        parent: NodeHandle,
        visit: &mut (dyn FnMut(NodeInfo) + Send),
    ) -> Result<(), EngineError> {
        let children: Vec<NodeInfo> = {
            let state = self.state.lock().unwrap();
            if !state.nodes.contains_key(&parent) {
                return Err(EngineError::NotFound);
            }
            state
                .nodes
                .values()
                .filter(|n| n.parent == Some(parent))
                .map(Self::info)
                .collect()
        };
        for child in children {
            visit(child);
        }
        Ok(())
    }

    async fn make_directory(
        &self,
        name: &str,
        parent: NodeHandle,
    ) -> Result<NodeInfo, EngineError> {
        self.take_failure()?;
        if !self.state.lock().unwrap().nodes.contains_key(&parent) {
            return Err(EngineError::NotFound);
        }
        let handle = self.insert(Some(parent), name, true, None);
        let state = self.state.lock().unwrap();
        Ok(Self::info(&state.nodes[&handle]))
    }

    async fn move_node(
        &self,
        new_name: &str,
        handle: NodeHandle,
        new_parent: NodeHandle,
    ) -> Result<(), EngineError> {
        self.take_failure()?;
        let mut state = self.state.lock().unwrap();
        let node = state.nodes.get_mut(&handle).ok_or(EngineError::NotFound)?;
        node.name = new_name.to_string();
        node.parent = Some(new_parent);
        Ok(())
    }

    async fn remove(&self, handle: NodeHandle) -> Result<(), EngineError> {
        self.take_failure()?;
        self.state
            .lock()
            .unwrap()
            .nodes
            .remove(&handle)
            .map(|_| ())
            .ok_or(EngineError::NotFound)
    }

    async fn replace(
        &self,
        source: NodeHandle,
        target: NodeHandle,
    ) -> Result<(), EngineError> {
        self.take_failure()?;
        let mut state = self.state.lock().unwrap();
        let doomed = state.nodes.remove(&target).ok_or(EngineError::NotFound)?;
        let node = state.nodes.get_mut(&source).ok_or(EngineError::NotFound)?;
        node.name = doomed.name;
        node.parent = doomed.parent;
        Ok(())
    }

    async fn parent_handle(&self, handle: NodeHandle) -> Option<NodeHandle> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(&handle)
            .and_then(|n| n.parent)
    }
}

// ============================================================================
// Recording mount
// ============================================================================

/// Invalidation calls the engine issued against a mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Entry {
        name: String,
        parent: InodeId,
        old_id: Option<InodeId>,
    },
    Attributes(InodeId),
    Pin(InodeId),
}

pub struct RecordingMount {
    root: NodeHandle,
    invalidations: Mutex<Vec<Invalidation>>,
    disabled: AtomicBool,
}

impl RecordingMount {
    pub fn new(root: NodeHandle) -> Arc<Self> {
        Arc::new(Self {
            root,
            invalidations: Mutex::new(Vec::new()),
            disabled: AtomicBool::new(false),
        })
    }

    pub fn invalidations(&self) -> Vec<Invalidation> {
        self.invalidations.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.invalidations.lock().unwrap().clear();
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Entry invalidations for `name` under `parent`, with or without an
    /// old id attached.
    pub fn entry_invalidations(&self, name: &str, parent: InodeId) -> usize {
        self.invalidations
            .lock()
            .unwrap()
            .iter()
            .filter(|inv| {
                matches!(inv, Invalidation::Entry { name: n, parent: p, .. }
                    if n == name && *p == parent)
            })
            .count()
    }
}

impl Mount for RecordingMount {
    fn root_handle(&self) -> NodeHandle {
        self.root
    }

    fn invalidate_entry(&self, name: &str, parent: InodeId, old_id: Option<InodeId>) {
        self.invalidations.lock().unwrap().push(Invalidation::Entry {
            name: name.to_string(),
            parent,
            old_id,
        });
    }

    fn invalidate_attributes(&self, id: InodeId) {
        self.invalidations
            .lock()
            .unwrap()
            .push(Invalidation::Attributes(id));
    }

    fn invalidate_pin(&self, id: InodeId) {
        self.invalidations.lock().unwrap().push(Invalidation::Pin(id));
    }

    fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub cache_dir: tempfile::TempDir,
    pub pool: Arc<DatabasePool>,
    pub cache: Arc<FileCache>,
    pub mounts: Arc<MountRegistry>,
    pub cloud: Arc<FakeCloud>,
    pub mount: Arc<RecordingMount>,
    pub root: NodeHandle,
    pub db: InodeDb,
}

fn test_config() -> EngineConfig {
    EngineConfig {
        quiesce_retry_ms: 20,
        ..EngineConfig::default()
    }
}

/// Wire up a complete engine over an in-memory store, a temp-dir cache,
/// a scripted cloud with one root directory, and one recording mount.
pub async fn harness() -> Harness {
    let cache_dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(DatabasePool::in_memory().await.unwrap());
    let cache = Arc::new(FileCache::new(cache_dir.path().to_path_buf()).unwrap());
    let mounts = Arc::new(MountRegistry::new());
    let cloud = FakeCloud::new();

    let root = cloud.add_root();
    let mount = RecordingMount::new(root);
    mounts.add(mount.clone());

    let db = InodeDb::new(
        pool.clone(),
        cache.clone(),
        mounts.clone(),
        cloud.clone(),
        &test_config(),
    )
    .await
    .unwrap();

    Harness {
        cache_dir,
        pool,
        cache,
        mounts,
        cloud,
        mount,
        root,
        db,
    }
}

impl Harness {
    /// Simulate a process restart: a fresh engine over the surviving pool,
    /// cache directory, cloud and mounts.
    pub async fn restart(self) -> Harness {
        let Harness {
            cache_dir,
            pool,
            mounts,
            cloud,
            mount,
            root,
            db,
            ..
        } = self;
        drop(db);

        // Content descriptors do not survive a restart; the directory does.
        let cache = Arc::new(FileCache::new(cache_dir.path().to_path_buf()).unwrap());

        let db = InodeDb::new(
            pool.clone(),
            cache.clone(),
            mounts.clone(),
            cloud.clone(),
            &test_config(),
        )
        .await
        .unwrap();

        Harness {
            cache_dir,
            pool,
            cache,
            mounts,
            cloud,
            mount,
            root,
            db,
        }
    }

    /// Fetch the root directory's inode.
    pub async fn root_dir(&self) -> stratus_inodes::InodeRef {
        self.db.get(self.root, false).await.unwrap().unwrap()
    }
}

// ============================================================================
// Event builders
// ============================================================================

pub fn added_event(
    handle: NodeHandle,
    parent: NodeHandle,
    name: &str,
    bind: Option<BindHandle>,
) -> NodeEvent {
    NodeEvent {
        kind: NodeEventKind::Added,
        handle,
        parent_handle: Some(parent),
        name: name.to_string(),
        is_directory: false,
        bind_handle: bind,
        info: None,
    }
}

pub fn removed_event(
    handle: NodeHandle,
    parent: NodeHandle,
    name: &str,
    is_directory: bool,
) -> NodeEvent {
    NodeEvent {
        kind: NodeEventKind::Removed,
        handle,
        parent_handle: Some(parent),
        name: name.to_string(),
        is_directory,
        bind_handle: None,
        info: None,
    }
}

pub fn modified_event(handle: NodeHandle, parent: NodeHandle, name: &str) -> NodeEvent {
    NodeEvent {
        kind: NodeEventKind::Modified,
        handle,
        parent_handle: Some(parent),
        name: name.to_string(),
        is_directory: false,
        bind_handle: None,
        info: None,
    }
}

pub fn moved_event(
    handle: NodeHandle,
    parent: NodeHandle,
    name: &str,
    info: Option<NodeInfo>,
) -> NodeEvent {
    NodeEvent {
        kind: NodeEventKind::Moved,
        handle,
        parent_handle: Some(parent),
        name: name.to_string(),
        is_directory: false,
        bind_handle: None,
        info,
    }
}

pub fn permissions_event(handle: NodeHandle, parent: NodeHandle, name: &str) -> NodeEvent {
    NodeEvent {
        kind: NodeEventKind::PermissionsChanged,
        handle,
        parent_handle: Some(parent),
        name: name.to_string(),
        is_directory: false,
        bind_handle: None,
        info: None,
    }
}

/// Mint a unique bind token.
pub fn bind_token() -> BindHandle {
    BindHandle::new(uuid::Uuid::new_v4().to_string()).unwrap()
}
