//! The inode database.
//!
//! Sole owner of the inode graph. Answers "what inode sits at this
//! (parent, name)?", "what inode has this handle?", "which inodes carry
//! local changes?"; performs moves, replaces and unlinks; admits new
//! children; applies cloud event batches.
//!
//! ## Locking
//!
//! Two locks exist: the index lock (a `tokio` mutex over [`IndexState`])
//! and the store's single connection, which is held for exactly the life
//! of a transaction. The global order is index first, transaction second;
//! no call site begins a transaction before taking the index lock when it
//! needs both, and none takes the index lock while holding a transaction.
//!
//! Every call into the cloud client may block on the network, so both the
//! index lock and any transaction are released first and races revalidated
//! on return. Dropping a transaction without committing rolls it back, so
//! an early error return leaves the store untouched.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, Notify};

use stratus_cache::{CacheError, ExtensionRegistry, FileCache, FileInfo};
use stratus_core::config::EngineConfig;
use stratus_core::domain::newtypes::{BindHandle, FileExtension, InodeId, NodeHandle};
use stratus_core::domain::{DomainError, EngineError};
use stratus_core::ports::{CloudClient, NodeEventQueue, NodeInfo};
use stratus_mount::MountRegistry;
use stratus_store::{DatabasePool, InodeRow, InodeStore, NewInode, Tx};

use crate::events::EventObserver;
use crate::index::IndexState;
use crate::inode::{Inode, InodeRef};

pub(crate) fn internal<E: std::fmt::Display>(err: E) -> EngineError {
    EngineError::Internal(err.to_string())
}

pub(crate) fn cache_error(err: CacheError) -> EngineError {
    match err {
        CacheError::Full(_) => EngineError::StorageFull,
        CacheError::Io(msg) => EngineError::Internal(msg),
        CacheError::NotFound => EngineError::CacheEvicted,
    }
}

/// Result of a path traversal.
#[derive(Debug)]
pub enum LookupOutcome {
    /// Every component resolved.
    Found(InodeRef),
    /// Everything but the final component resolved; useful for
    /// create-on-miss.
    MissingFinal { parent: InodeRef, name: String },
    /// An intermediate component was missing.
    Missing,
}

/// The inode database.
pub struct InodeDb {
    pub(crate) index: Mutex<IndexState>,
    pub(crate) pool: Arc<DatabasePool>,
    pub(crate) store: InodeStore,
    pub(crate) cache: Arc<FileCache>,
    pub(crate) extensions: ExtensionRegistry,
    pub(crate) mounts: Arc<MountRegistry>,
    pub(crate) client: Arc<dyn CloudClient>,
    drained: Notify,
    discard: AtomicBool,
    quiesce_retry: Duration,
    evict_idle: Duration,
}

impl InodeDb {
    /// Open the inode database.
    ///
    /// Clears every persisted bind handle: pending uploads never survive a
    /// restart.
    pub async fn new(
        pool: Arc<DatabasePool>,
        cache: Arc<FileCache>,
        mounts: Arc<MountRegistry>,
        client: Arc<dyn CloudClient>,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let db = Self {
            index: Mutex::new(IndexState::new()),
            pool,
            store: InodeStore::new(),
            cache,
            extensions: ExtensionRegistry::new(),
            mounts,
            client,
            drained: Notify::new(),
            discard: AtomicBool::new(false),
            quiesce_retry: Duration::from_millis(config.quiesce_retry_ms),
            evict_idle: Duration::from_secs(config.evict_idle_secs),
        };

        let mut tx = db.pool.begin().await.map_err(internal)?;
        db.store
            .clear_bind_handles(&mut tx)
            .await
            .map_err(internal)?;
        tx.commit().await.map_err(internal)?;

        tracing::debug!("Inode database ready");
        Ok(db)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Fetch the inode for a cloud handle.
    ///
    /// Checks memory, then the store (rehydrating through the file cache),
    /// then the cloud. Returns `None` for unknown or removed inodes.
    pub async fn get(
        &self,
        handle: NodeHandle,
        in_memory_only: bool,
    ) -> Result<Option<InodeRef>, EngineError> {
        {
            let index = self.index.lock().await;
            if let Some(inode) = index.get_by_handle(handle) {
                if inode.removed() {
                    return Ok(None);
                }
                inode.touch();
                return Ok(Some(inode));
            }
            if in_memory_only {
                return Ok(None);
            }

            let mut tx = self.pool.begin().await.map_err(internal)?;
            if let Some(row) = self.store.by_handle(&mut tx, handle).await.map_err(internal)? {
                return self.rehydrate(index, tx, row).await;
            }
        }

        self.get_from_cloud(handle).await
    }

    /// Fetch the inode for a local id.
    pub async fn get_by_id(
        &self,
        id: InodeId,
        in_memory_only: bool,
    ) -> Result<Option<InodeRef>, EngineError> {
        {
            let index = self.index.lock().await;
            if let Some(inode) = index.get(id) {
                if inode.removed() {
                    return Ok(None);
                }
                inode.touch();
                return Ok(Some(inode));
            }
            if in_memory_only {
                return Ok(None);
            }

            let mut tx = self.pool.begin().await.map_err(internal)?;
            if let Some(row) = self.store.by_id(&mut tx, id).await.map_err(internal)? {
                return self.rehydrate(index, tx, row).await;
            }
        }

        // A synthetic inode should have been in the store.
        let Some(handle) = id.as_handle() else {
            return Ok(None);
        };
        self.get_from_cloud(handle).await
    }

    /// Rebuild a file inode from its store row.
    ///
    /// The row's content must still be in the file cache and its identity
    /// must still check out against the cloud; a row that fails either test
    /// is stale and is deleted on the spot.
    async fn rehydrate(
        &self,
        index: MutexGuard<'_, IndexState>,
        mut tx: Tx,
        row: InodeRow,
    ) -> Result<Option<InodeRef>, EngineError> {
        let extension = self.extensions.get(&row.extension);
        let id = row.id;

        let Some(file_info) = self.cache.info(&extension, id) else {
            self.store.remove_by_id(&mut tx, id).await.map_err(internal)?;
            tx.commit().await.map_err(internal)?;
            return Ok(None);
        };

        // Latch identity, then release everything before calling the cloud.
        let stored_handle = row.handle;
        let mut name = row.name;
        let mut parent = row.parent_handle;
        drop(tx);
        drop(index);

        let mut live_handle = None;
        let reachable = match stored_handle {
            Some(handle) => match self.client.get(handle).await {
                Some(info) => {
                    live_handle = Some(info.handle);
                    name = Some(info.name);
                    parent = info.parent_handle;
                    true
                }
                None => false,
            },
            // Never uploaded: reachable only while its parent survives.
            None => match parent {
                Some(parent) => self.client.exists(parent).await,
                None => false,
            },
        };

        let mut index = self.index.lock().await;

        if !reachable {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            self.store.remove_by_id(&mut tx, id).await.map_err(internal)?;
            tx.commit().await.map_err(internal)?;
            return Ok(None);
        }

        // Another task may have loaded the inode while we were away.
        if let Some(existing) = index.get(id) {
            if existing.removed() {
                return Ok(None);
            }
            existing.touch();
            return Ok(Some(existing));
        }

        let inode = Inode::rehydrated_file(id, extension, live_handle, name, parent);
        inode.attach_file_info(file_info);
        inode.touch();
        index.insert(&inode);

        if let Some(handle) = live_handle {
            // A cloud-resident row records neither name nor parent.
            let mut tx = self.pool.begin().await.map_err(internal)?;
            self.store
                .set_identity(&mut tx, id, None, Some(handle), None, None)
                .await
                .map_err(internal)?;
            tx.commit().await.map_err(internal)?;
        }

        Ok(Some(inode))
    }

    /// Fetch a node description from the cloud and instantiate it.
    async fn get_from_cloud(&self, handle: NodeHandle) -> Result<Option<InodeRef>, EngineError> {
        let Some(info) = self.client.get(handle).await else {
            return Ok(None);
        };

        let mut index = self.index.lock().await;

        // Another task may have won the race while we were away.
        if let Some(existing) = index.get_by_handle(handle) {
            existing.touch();
            return Ok(Some(existing));
        }

        // The node may be the cloud side of an inode we are still binding;
        // that inode is the identity the caller really wants.
        if let Some(bind) = &info.bind_handle {
            if let Some(bound) = index.get_by_bind(bind) {
                bound.touch();
                return Ok(Some(bound));
            }
        }

        Ok(Some(self.build_from_info(&mut index, &info)))
    }

    pub(crate) fn build_from_info(&self, index: &mut IndexState, info: &NodeInfo) -> InodeRef {
        let extension = if info.is_directory {
            FileExtension::none()
        } else {
            self.extensions.from_name(&info.name)
        };
        let inode = Inode::from_cloud(info, extension);
        inode.touch();
        index.insert(&inode);
        inode
    }

    // ========================================================================
    // Children
    // ========================================================================

    fn directory_handle(&self, parent: &InodeRef) -> Result<NodeHandle, EngineError> {
        if !parent.is_directory() {
            return Err(EngineError::NotADirectory);
        }
        parent
            .handle()
            .ok_or_else(|| internal("directory has no handle"))
    }

    /// Fetch the child of a directory by name.
    pub async fn child(
        &self,
        parent: &InodeRef,
        name: &str,
    ) -> Result<Option<InodeRef>, EngineError> {
        if name.is_empty() {
            return Err(DomainError::InvalidName("empty child name".to_string()).into());
        }

        let Some(id) = self.has_child(parent, name).await? else {
            return Ok(None);
        };
        self.get_by_id(id, false).await
    }

    /// Probe memory for an inode occupying a (parent, name) slot.
    pub async fn child_in_memory(
        &self,
        parent_handle: NodeHandle,
        name: &str,
    ) -> Option<InodeRef> {
        let index = self.index.lock().await;
        let inode = index.get_by_location(parent_handle, name)?;
        inode.touch();
        Some(inode)
    }

    /// Resolve a (parent, name) slot to an inode id.
    ///
    /// The cloud always wins the slot: if it reports a child there, any
    /// local-only row at the same slot is evicted from the namespace (its
    /// name and parent are nulled; the inode itself survives and its
    /// content stays reachable by id).
    pub async fn has_child(
        &self,
        parent: &InodeRef,
        name: &str,
    ) -> Result<Option<InodeId>, EngineError> {
        if name.is_empty() {
            return Err(DomainError::InvalidName("empty child name".to_string()).into());
        }
        let parent_handle = self.directory_handle(parent)?;

        // Ask the cloud first, with no lock held.
        let resolved = self.client.child_handle(parent_handle, name).await;

        let mut index = self.index.lock().await;
        let mut tx = self.pool.begin().await.map_err(internal)?;

        if let Some((child_handle, bind)) = resolved {
            let mut id = InodeId::from_handle(child_handle);

            // The slot may belong to a pending upload being bound, or to a
            // row we already key by this handle.
            if let Some(known) = self
                .store
                .id_by_bind_or_handle(&mut tx, bind.as_ref(), child_handle)
                .await
                .map_err(internal)?
            {
                id = known;
                self.store
                    .set_identity(&mut tx, id, None, Some(child_handle), None, None)
                    .await
                    .map_err(internal)?;
                if let Some(inode) = index.get(id) {
                    index.promote(&inode, child_handle);
                }
            }

            // Any other local row at this slot has been replaced.
            if let Some(other) = self
                .store
                .id_by_location(&mut tx, name, parent_handle)
                .await
                .map_err(internal)?
            {
                self.store
                    .set_location(&mut tx, other, None, None)
                    .await
                    .map_err(internal)?;
                if let Some(inode) = index.get(other) {
                    index.displace(&inode);
                }
            }

            tx.commit().await.map_err(internal)?;
            return Ok(Some(id));
        }

        // Cloud has nothing there; fall back to the local namespace.
        self.store
            .id_by_location(&mut tx, name, parent_handle)
            .await
            .map_err(internal)
    }

    /// Whether a directory has any children, cloud or local.
    pub async fn has_children(&self, parent: &InodeRef) -> Result<bool, EngineError> {
        let parent_handle = self.directory_handle(parent)?;

        if self.client.has_children(parent_handle).await? {
            return Ok(true);
        }

        let _index = self.index.lock().await;
        let mut tx = self.pool.begin().await.map_err(internal)?;
        self.store
            .has_local_children(&mut tx, parent_handle)
            .await
            .map_err(internal)
    }

    /// Enumerate the children of a directory, merging the cloud and local
    /// views.
    ///
    /// Cloud names reported twice are genuine cloud duplicates; neither
    /// twin is instantiated. A cloud child supersedes a local row of the
    /// same name; superseded and unreadable rows are pruned in the same
    /// transaction that lists the directory.
    pub async fn children(&self, parent: &InodeRef) -> Result<Vec<InodeRef>, EngineError> {
        use std::collections::btree_map::Entry;
        use std::collections::BTreeMap;

        let parent_handle = self.directory_handle(parent)?;

        // Stream the cloud view; `None` marks a duplicated name.
        let mut cloud: BTreeMap<String, Option<NodeInfo>> = BTreeMap::new();
        self.client
            .each_child(parent_handle, &mut |info| match cloud.entry(info.name.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(Some(info));
                }
                Entry::Occupied(mut slot) => {
                    slot.insert(None);
                }
            })
            .await?;

        let mut index = self.index.lock().await;
        let mut tx = self.pool.begin().await.map_err(internal)?;

        // Partition the local rows against the cloud view.
        let mut pending = Vec::new();
        let mut stale = Vec::new();
        for row in self
            .store
            .children_of(&mut tx, parent_handle)
            .await
            .map_err(internal)?
        {
            let Some(row_name) = row.name.clone() else {
                continue;
            };
            match cloud.get(&row_name) {
                // Cloud child of the same name supersedes the local row.
                Some(Some(_)) => stale.push(row.id),
                // Duplicate name: invisible, leave the row alone.
                Some(None) => {}
                None => pending.push(row),
            }
        }

        let mut result = Vec::new();

        // Instantiate the cloud children.
        for info in cloud.into_values().flatten() {
            if let Some(existing) = index.get_by_handle(info.handle) {
                existing.touch();
                result.push(existing);
                continue;
            }

            if info.is_directory {
                result.push(self.build_from_info(&mut index, &info));
                continue;
            }

            // A file may have cached content under a previously assigned id.
            let known = self
                .store
                .extension_and_id_by_handle(&mut tx, info.handle)
                .await
                .map_err(internal)?;

            match known {
                Some((raw_extension, id)) => {
                    let extension = self.extensions.get(&raw_extension);
                    match self.cache.info(&extension, id) {
                        Some(file_info) => {
                            let inode = Inode::rehydrated_file(
                                id,
                                extension,
                                Some(info.handle),
                                Some(info.name.clone()),
                                info.parent_handle,
                            );
                            inode.attach_file_info(file_info);
                            inode.touch();
                            index.insert(&inode);
                            result.push(inode);
                        }
                        None => {
                            // Content is gone; forget the stale record.
                            stale.push(id);
                            result.push(self.build_from_info(&mut index, &info));
                        }
                    }
                }
                None => result.push(self.build_from_info(&mut index, &info)),
            }
        }

        // Instantiate the local-only children.
        for row in pending {
            if let Some(existing) = index.get(row.id) {
                existing.touch();
                result.push(existing);
                continue;
            }

            let extension = self.extensions.get(&row.extension);
            match self.cache.info(&extension, row.id) {
                Some(file_info) => {
                    let name = row.name.unwrap_or_default();
                    let inode = Inode::local_file(row.id, extension, name, parent_handle);
                    inode.attach_file_info(file_info);
                    inode.touch();
                    index.insert(&inode);
                    result.push(inode);
                }
                None => stale.push(row.id),
            }
        }

        // Prune stale records inside the same transaction.
        for id in stale {
            self.store.remove_by_id(&mut tx, id).await.map_err(internal)?;
        }
        tx.commit().await.map_err(internal)?;

        Ok(result)
    }

    /// Traverse a slash-separated path from `root`.
    pub async fn lookup(&self, root: NodeHandle, path: &str) -> Result<LookupOutcome, EngineError> {
        let Some(mut current) = self.get(root, false).await? else {
            return Ok(LookupOutcome::Missing);
        };

        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let last = components.len().saturating_sub(1);

        for (position, component) in components.iter().enumerate() {
            if !current.is_directory() {
                return Err(EngineError::NotADirectory);
            }
            match self.child(&current, component).await? {
                Some(next) => current = next,
                None if position == last => {
                    return Ok(LookupOutcome::MissingFinal {
                        parent: current,
                        name: (*component).to_string(),
                    });
                }
                None => return Ok(LookupOutcome::Missing),
            }
        }

        Ok(LookupOutcome::Found(current))
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create a directory in the cloud and return its inode.
    pub async fn make_directory(
        &self,
        parent: &InodeRef,
        name: &str,
    ) -> Result<InodeRef, EngineError> {
        if name.is_empty() {
            return Err(DomainError::InvalidName("empty directory name".to_string()).into());
        }
        let parent_handle = self.directory_handle(parent)?;

        let info = self.client.make_directory(name, parent_handle).await?;

        let mut index = self.index.lock().await;

        // Another task may have instantiated the inode off a cloud event.
        if let Some(existing) = index.get_by_handle(info.handle) {
            existing.touch();
            return Ok(existing);
        }

        tracing::debug!(name, handle = %info.handle, "Directory created");
        Ok(self.build_from_info(&mut index, &info))
    }

    /// Create a file that exists only locally until its first upload.
    ///
    /// Allocates a synthetic id inside the same transaction that inserts
    /// the row, creates the cache entry, and schedules the (empty, dirty)
    /// content for upload.
    pub async fn make_file(&self, parent: &InodeRef, name: &str) -> Result<InodeRef, EngineError> {
        if name.is_empty() {
            return Err(DomainError::InvalidName("empty file name".to_string()).into());
        }
        let parent_handle = self.directory_handle(parent)?;

        let mut index = self.index.lock().await;
        let mut tx = self.pool.begin().await.map_err(internal)?;

        let extension = self.extensions.from_name(name);
        let id = self.store.allocate_id(&mut tx).await.map_err(internal)?;

        self.store
            .insert(
                &mut tx,
                &NewInode {
                    id,
                    extension: extension.as_str(),
                    handle: None,
                    name: Some(name),
                    parent_handle: Some(parent_handle),
                    bind_handle: None,
                    modified: true,
                },
            )
            .await
            .map_err(internal)?;

        let file_info = self.cache.create(&extension, id).map_err(cache_error)?;

        if let Err(err) = tx.commit().await {
            self.cache.remove(&extension, id);
            return Err(internal(err));
        }

        let inode = Inode::local_file(id, extension, name.to_string(), parent_handle);
        inode.attach_file_info(Arc::clone(&file_info));
        inode.touch();
        index.insert(&inode);

        self.mounts
            .each(|mount| mount.invalidate_entry(name, parent.id(), None));
        drop(index);

        // New content is born dirty; schedule its first upload.
        self.cache.context(&file_info).modified();

        tracing::debug!(name, id = %id, "Local file created");
        Ok(inode)
    }

    /// Give a cloud-resident file a cache entry and a store row so local
    /// writes have somewhere to land.
    pub async fn materialize(&self, file: &InodeRef) -> Result<Arc<FileInfo>, EngineError> {
        if let Some(info) = file.file_info() {
            return Ok(info);
        }
        let handle = file
            .handle()
            .ok_or_else(|| internal("cannot materialize a local-only file"))?;
        let extension = file
            .extension()
            .cloned()
            .ok_or(EngineError::NotADirectory)?;

        let _index = self.index.lock().await;

        // Another task may have materialized it while we waited.
        if let Some(info) = file.file_info() {
            return Ok(info);
        }

        let mut tx = self.pool.begin().await.map_err(internal)?;
        if self
            .store
            .by_id(&mut tx, file.id())
            .await
            .map_err(internal)?
            .is_none()
        {
            self.store
                .insert(
                    &mut tx,
                    &NewInode {
                        id: file.id(),
                        extension: extension.as_str(),
                        handle: Some(handle),
                        name: None,
                        parent_handle: None,
                        bind_handle: None,
                        modified: false,
                    },
                )
                .await
                .map_err(internal)?;
        }

        let info = self.cache.create(&extension, file.id()).map_err(cache_error)?;

        if let Err(err) = tx.commit().await {
            self.cache.remove(&extension, file.id());
            return Err(internal(err));
        }

        file.attach_file_info(Arc::clone(&info));
        Ok(info)
    }

    // ========================================================================
    // Move / replace / unlink
    // ========================================================================

    /// Move an inode to a new (name, parent).
    ///
    /// A cloud-resident source is moved by the cloud; the eventual change
    /// event updates local state. A local-only source moves synchronously.
    pub async fn move_inode(
        &self,
        source: &InodeRef,
        target_name: &str,
        target_parent: &InodeRef,
    ) -> Result<(), EngineError> {
        if target_name.is_empty() {
            return Err(DomainError::InvalidName("empty target name".to_string()).into());
        }
        let target_parent_handle = self.directory_handle(target_parent)?;

        if let Some(handle) = source.handle() {
            return self
                .client
                .move_node(target_name, handle, target_parent_handle)
                .await;
        }

        let old_location = source.location();

        let mut index = self.index.lock().await;
        let mut tx = self.pool.begin().await.map_err(internal)?;
        self.store
            .set_location(&mut tx, source.id(), Some(target_name), Some(target_parent_handle))
            .await
            .map_err(internal)?;
        tx.commit().await.map_err(internal)?;

        index.relocate(source, target_name.to_string(), target_parent_handle);

        self.mounts.each(|mount| {
            if let Some((old_parent, old_name)) = &old_location {
                mount.invalidate_entry(old_name, InodeId::from_handle(*old_parent), None);
            }
            mount.invalidate_entry(target_name, target_parent.id(), None);
        });

        Ok(())
    }

    /// Replace `target` with `source` at (target_name, target_parent).
    pub async fn replace(
        &self,
        source: &InodeRef,
        target: &InodeRef,
        target_name: &str,
        target_parent: &InodeRef,
    ) -> Result<(), EngineError> {
        match (source.is_directory(), target.is_directory()) {
            (true, true) => {
                // Directories exist in the cloud by construction; the event
                // stream does the local bookkeeping.
                let source_handle = self
                    .directory_handle(source)
                    .map_err(|_| internal("replace source has no handle"))?;
                let target_handle = self
                    .directory_handle(target)
                    .map_err(|_| internal("replace target has no handle"))?;
                return self.client.replace(source_handle, target_handle).await;
            }
            (false, false) => {}
            _ => return Err(internal("cannot replace across inode kinds")),
        }

        let target_parent_handle = self.directory_handle(target_parent)?;
        let source_handle = source.handle();
        let target_handle = target.handle();
        let source_location = source.location();

        // Cloud phase first: failure here means nothing changed anywhere.
        match (source_handle, target_handle) {
            (Some(sh), Some(th)) => self.client.replace(sh, th).await?,
            (Some(sh), None) => {
                self.client
                    .move_node(target_name, sh, target_parent_handle)
                    .await?
            }
            (None, Some(th)) => self.client.remove(th).await?,
            (None, None) => {}
        }

        let mut index = self.index.lock().await;
        let mut tx = self.pool.begin().await.map_err(internal)?;

        self.store
            .remove_by_id(&mut tx, target.id())
            .await
            .map_err(internal)?;

        if source_handle.is_none() {
            self.store
                .set_location(&mut tx, source.id(), Some(target_name), Some(target_parent_handle))
                .await
                .map_err(internal)?;
        }

        tx.commit().await.map_err(internal)?;

        if target_handle.is_none() {
            index.mark_removed(target);
        }
        if source_handle.is_none() {
            index.relocate(source, target_name.to_string(), target_parent_handle);
        }

        self.mounts.each(|mount| {
            if source_handle.is_none() {
                if let Some((old_parent, old_name)) = &source_location {
                    mount.invalidate_entry(old_name, InodeId::from_handle(*old_parent), None);
                }
            }
            if target_handle.is_none() {
                mount.invalidate_entry(target_name, target_parent.id(), None);
            }
        });

        Ok(())
    }

    /// Unlink an inode.
    pub async fn unlink(&self, inode: &InodeRef) -> Result<(), EngineError> {
        if inode.is_directory() {
            return self.unlink_directory(inode).await;
        }
        self.unlink_file(inode).await
    }

    async fn unlink_directory(&self, dir: &InodeRef) -> Result<(), EngineError> {
        let handle = dir
            .handle()
            .ok_or_else(|| internal("directory has no handle"))?;

        self.client.remove(handle).await?;

        // The removal event stream does the rest of the bookkeeping.
        let mut index = self.index.lock().await;
        index.mark_removed(dir);
        Ok(())
    }

    async fn unlink_file(&self, file: &InodeRef) -> Result<(), EngineError> {
        let location = file.location();
        let extension = file
            .extension()
            .cloned()
            .ok_or_else(|| internal("file has no extension"))?;

        if let Some(handle) = file.handle() {
            self.client.remove(handle).await?;
        }

        let mut index = self.index.lock().await;
        let mut tx = self.pool.begin().await.map_err(internal)?;
        self.store
            .remove_by_id(&mut tx, file.id())
            .await
            .map_err(internal)?;
        tx.commit().await.map_err(internal)?;

        index.mark_removed(file);

        self.mounts.each(|mount| {
            if let Some((parent, name)) = &location {
                mount.invalidate_entry(name, InodeId::from_handle(*parent), None);
            }
        });
        drop(index);

        // Deletes cached content and cancels any pending upload.
        self.cache.remove(&extension, file.id());

        tracing::debug!(id = %file.id(), "File unlinked");
        Ok(())
    }

    // ========================================================================
    // Binding
    // ========================================================================

    /// Reserve a bind handle: the file's upload is in flight and the
    /// eventual `Added` event must resolve back to this inode.
    pub async fn binding(&self, file: &InodeRef, bind: BindHandle) -> Result<(), EngineError> {
        if file.is_directory() {
            return Err(internal("directories are never bound"));
        }

        let mut index = self.index.lock().await;
        let mut tx = self.pool.begin().await.map_err(internal)?;

        index.bind(bind.clone(), file).map_err(|()| EngineError::Busy)?;

        // The index entry and the column must agree at every transaction
        // boundary; back the reservation out if the write fails.
        let written = self
            .store
            .set_bind_handle(&mut tx, file.id(), Some(&bind))
            .await
            .map_err(internal);
        let committed = match written {
            Ok(()) => tx.commit().await.map_err(internal),
            Err(err) => Err(err),
        };
        if let Err(err) = committed {
            index.unbind(file);
            return Err(err);
        }

        tracing::debug!(id = %file.id(), bind = %bind, "Binding reserved");
        Ok(())
    }

    /// The inode currently being bound under `bind`, if any.
    pub async fn binding_by(&self, bind: &BindHandle) -> Option<InodeRef> {
        let index = self.index.lock().await;
        index.get_by_bind(bind)
    }

    /// Release a file's bind handle (upload abandoned or fully settled).
    pub async fn bound(&self, file: &InodeRef) -> Result<(), EngineError> {
        let mut index = self.index.lock().await;
        let mut tx = self.pool.begin().await.map_err(internal)?;

        self.store
            .set_bind_handle(&mut tx, file.id(), None)
            .await
            .map_err(internal)?;
        tx.commit().await.map_err(internal)?;

        index.unbind(file);
        Ok(())
    }

    /// Swap a freshly assigned cloud handle into a file.
    ///
    /// Records the handle, drops the bind handle and the local (name,
    /// parent) from the row, and re-keys the in-memory indexes. The file's
    /// id never changes.
    pub async fn promote(&self, file: &InodeRef, handle: NodeHandle) -> Result<(), EngineError> {
        let mut index = self.index.lock().await;
        let mut tx = self.pool.begin().await.map_err(internal)?;

        self.store
            .set_identity(&mut tx, file.id(), None, Some(handle), None, None)
            .await
            .map_err(internal)?;
        tx.commit().await.map_err(internal)?;

        index.promote(file, handle);

        tracing::debug!(id = %file.id(), handle = %handle, "File bound to cloud identity");
        Ok(())
    }

    // ========================================================================
    // Modified tracking
    // ========================================================================

    /// Set or clear an inode's dirty bit.
    pub async fn set_modified(&self, id: InodeId, modified: bool) -> Result<(), EngineError> {
        let _index = self.index.lock().await;
        let mut tx = self.pool.begin().await.map_err(internal)?;
        self.store
            .set_modified(&mut tx, id, modified)
            .await
            .map_err(internal)?;
        tx.commit().await.map_err(internal)?;
        Ok(())
    }

    /// Whether an inode's dirty bit is set.
    pub async fn is_modified(&self, id: InodeId) -> Result<bool, EngineError> {
        let _index = self.index.lock().await;
        let mut tx = self.pool.begin().await.map_err(internal)?;
        Ok(self
            .store
            .is_modified(&mut tx, id)
            .await
            .map_err(internal)?
            .unwrap_or(false))
    }

    /// Every dirty inode, as (effective handle, id) pairs. A local-only
    /// inode is reached through its parent's handle.
    async fn modified_pairs(&self) -> Result<Vec<(Option<NodeHandle>, InodeId)>, EngineError> {
        let _index = self.index.lock().await;
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let rows = self.store.modified_rows(&mut tx).await.map_err(internal)?;
        Ok(rows
            .into_iter()
            .map(|row| (row.handle.or(row.parent_handle), row.id))
            .collect())
    }

    /// Every dirty file under `parent`.
    ///
    /// Classifies each dirty inode by climbing parent handles until it
    /// reaches `parent` (related), the cloud root, or a vanished handle
    /// (both unrelated); membership sets memoize the climbs.
    pub async fn modified_in(&self, parent: NodeHandle) -> Result<Vec<InodeRef>, EngineError> {
        let entries = self.modified_pairs().await?;

        let mut related: HashSet<Option<NodeHandle>> = HashSet::new();
        let mut unrelated: HashSet<Option<NodeHandle>> = HashSet::new();
        related.insert(Some(parent));
        unrelated.insert(None);

        let mut result = Vec::new();

        for (start, id) in entries {
            let mut ancestors: HashSet<Option<NodeHandle>> = HashSet::new();
            let mut cursor = start;

            loop {
                if unrelated.contains(&cursor) {
                    unrelated.extend(ancestors.iter().copied());
                    break;
                }
                if related.contains(&cursor) {
                    related.extend(ancestors.iter().copied());
                    if let Some(inode) = self.get_by_id(id, false).await? {
                        if inode.is_file() {
                            result.push(inode);
                        }
                    }
                    break;
                }

                ancestors.insert(cursor);
                cursor = match cursor {
                    Some(handle) => self.client.parent_handle(handle).await,
                    // Unreachable: None is seeded into the unrelated set.
                    None => break,
                };
            }
        }

        Ok(result)
    }

    // ========================================================================
    // Existence, events, shutdown
    // ========================================================================

    /// Whether an inode still exists, in memory or in the store.
    pub async fn exists(&self, id: InodeId) -> Result<bool, EngineError> {
        let index = self.index.lock().await;
        if let Some(inode) = index.get(id) {
            return Ok(!inode.removed());
        }

        let mut tx = self.pool.begin().await.map_err(internal)?;
        Ok(self
            .store
            .handle_by_id(&mut tx, id)
            .await
            .map_err(internal)?
            .is_some())
    }

    /// Apply a batch of cloud events under one transaction.
    pub async fn apply_events(&self, events: NodeEventQueue) -> Result<(), EngineError> {
        if self.discard() {
            tracing::debug!(count = events.len(), "Discarding node events");
            return Ok(());
        }

        let observer = EventObserver::new(self).await?;
        observer.run(events).await
    }

    /// Stop applying cloud events; used while tearing a session down.
    pub fn set_discard(&self, discard: bool) {
        self.discard.store(discard, Ordering::SeqCst);
    }

    #[must_use]
    pub fn discard(&self) -> bool {
        self.discard.load(Ordering::SeqCst)
    }

    /// Evict unreferenced inodes that have idled past the configured
    /// threshold.
    pub async fn evict_idle(&self) -> Result<(), EngineError> {
        self.evict(Some(self.evict_idle)).await
    }

    /// Evict unreferenced inodes from memory.
    ///
    /// An evicted inode that was marked removed takes its cached content
    /// and its store row with it. Every eviction pass wakes `clear`.
    pub async fn evict(&self, min_idle: Option<Duration>) -> Result<(), EngineError> {
        let victims = {
            let mut index = self.index.lock().await;
            let victims = index.unreferenced(min_idle);
            for inode in &victims {
                index.remove(inode);
            }
            victims
        };

        let mut doomed_rows = Vec::new();
        for inode in &victims {
            tracing::debug!(id = %inode.id(), "Evicting inode from memory");
            if inode.removed() && inode.is_file() {
                if let (Some(extension), Some(_)) = (inode.extension(), inode.file_info()) {
                    self.cache.remove(extension, inode.id());
                }
                doomed_rows.push(inode.id());
            }
        }

        if !doomed_rows.is_empty() {
            let _index = self.index.lock().await;
            let mut tx = self.pool.begin().await.map_err(internal)?;
            for id in doomed_rows {
                self.store.remove_by_id(&mut tx, id).await.map_err(internal)?;
            }
            tx.commit().await.map_err(internal)?;
        }

        if !victims.is_empty() {
            self.drained.notify_waiters();
        }

        Ok(())
    }

    /// Quiescence barrier: drain every inode from memory.
    ///
    /// Other subsystems may still hold transient references, so this loops:
    /// evict, then wait (bounded) for a purge notification, until the arena
    /// is empty. It never times out.
    pub async fn clear(&self) -> Result<(), EngineError> {
        tracing::debug!("Waiting for inodes to drain from memory");

        loop {
            self.evict(None).await?;

            {
                let index = self.index.lock().await;
                if index.is_empty() {
                    assert!(index.fully_drained());
                    break;
                }
            }

            tokio::select! {
                _ = self.drained.notified() => {}
                _ = tokio::time::sleep(self.quiesce_retry) => {}
            }
        }

        tracing::debug!("Inodes drained from memory");
        Ok(())
    }

    /// Number of inodes currently in memory.
    pub async fn resident(&self) -> usize {
        self.index.lock().await.len()
    }
}
