//! The file content cache.
//!
//! Maps `(extension, inode id)` to a [`FileInfo`] descriptor and owns the
//! content file behind it. Content files are named `<id><extension>` under
//! the cache root, so a cold descriptor can be rebuilt from disk alone.
//!
//! Uploads are out of scope here: marking a file modified through its
//! [`IoContext`] records the id in a pending set that a transport layer
//! drains; removing the entry cancels the pending upload.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use stratus_core::domain::newtypes::{FileExtension, InodeId};

use crate::CacheError;

/// Mutable state of a cached file.
#[derive(Debug, Clone)]
struct FileState {
    size: u64,
    mtime: DateTime<Utc>,
    dirty: bool,
}

/// Descriptor of a cached file's local state.
#[derive(Debug)]
pub struct FileInfo {
    extension: FileExtension,
    id: InodeId,
    path: PathBuf,
    state: Mutex<FileState>,
}

impl FileInfo {
    fn new(extension: FileExtension, id: InodeId, path: PathBuf, size: u64, mtime: DateTime<Utc>) -> Self {
        Self {
            extension,
            id,
            path,
            state: Mutex::new(FileState {
                size,
                mtime,
                dirty: false,
            }),
        }
    }

    #[must_use]
    pub fn extension(&self) -> &FileExtension {
        &self.extension
    }

    #[must_use]
    pub fn id(&self) -> InodeId {
        self.id
    }

    /// Path of the content file on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.state.lock().unwrap().size
    }

    #[must_use]
    pub fn mtime(&self) -> DateTime<Utc> {
        self.state.lock().unwrap().mtime
    }

    /// Whether local content has diverged from the cloud.
    #[must_use]
    pub fn modified(&self) -> bool {
        self.state.lock().unwrap().dirty
    }

    /// Record a local write.
    pub fn written(&self, size: u64, mtime: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        state.size = size;
        state.mtime = mtime;
        state.dirty = true;
    }

    /// Clear the dirty bit once an upload has landed.
    pub fn flushed(&self) {
        self.state.lock().unwrap().dirty = false;
    }

    fn mark_dirty(&self) {
        self.state.lock().unwrap().dirty = true;
    }
}

struct CacheInner {
    root: PathBuf,
    entries: Mutex<HashMap<(FileExtension, InodeId), Arc<FileInfo>>>,
    pending_uploads: Mutex<HashSet<InodeId>>,
    max_entries: Option<usize>,
}

/// The file content cache.
pub struct FileCache {
    inner: Arc<CacheInner>,
}

impl FileCache {
    /// Open a cache rooted at `root`, creating the directory if needed.
    pub fn new(root: PathBuf) -> Result<Self, CacheError> {
        Self::with_limit(root, None)
    }

    /// Open a cache with a bound on the number of resident entries.
    pub fn with_limit(root: PathBuf, max_entries: Option<usize>) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&root)?;

        tracing::debug!(root = %root.display(), "File cache opened");

        Ok(Self {
            inner: Arc::new(CacheInner {
                root,
                entries: Mutex::new(HashMap::new()),
                pending_uploads: Mutex::new(HashSet::new()),
                max_entries,
            }),
        })
    }

    fn content_path(&self, extension: &FileExtension, id: InodeId) -> PathBuf {
        self.inner.root.join(format!("{}{}", id, extension))
    }

    /// Create an empty content file and its descriptor.
    ///
    /// # Errors
    /// `Full` when the entry limit is reached; `Io` when the content file
    /// cannot be created.
    pub fn create(
        &self,
        extension: &FileExtension,
        id: InodeId,
    ) -> Result<Arc<FileInfo>, CacheError> {
        let mut entries = self.inner.entries.lock().unwrap();

        if let Some(limit) = self.inner.max_entries {
            if entries.len() >= limit {
                return Err(CacheError::Full(format!("{} entries", limit)));
            }
        }

        let path = self.content_path(extension, id);
        std::fs::File::create(&path)?;

        let info = Arc::new(FileInfo::new(
            extension.clone(),
            id,
            path,
            0,
            Utc::now(),
        ));
        entries.insert((extension.clone(), id), Arc::clone(&info));

        tracing::debug!(id = %id, extension = %extension, "Cache entry created");

        Ok(info)
    }

    /// Fetch the descriptor for an entry, rebuilding it from disk if the
    /// content file survives from an earlier run. `None` means the content
    /// is gone and any database row naming it is stale.
    pub fn info(&self, extension: &FileExtension, id: InodeId) -> Option<Arc<FileInfo>> {
        let mut entries = self.inner.entries.lock().unwrap();

        if let Some(info) = entries.get(&(extension.clone(), id)) {
            return Some(Arc::clone(info));
        }

        let path = self.content_path(extension, id);
        let metadata = std::fs::metadata(&path).ok()?;
        let mtime = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let info = Arc::new(FileInfo::new(
            extension.clone(),
            id,
            path,
            metadata.len(),
            mtime,
        ));
        entries.insert((extension.clone(), id), Arc::clone(&info));

        Some(info)
    }

    /// Drop an entry: delete its content file and cancel any pending upload.
    pub fn remove(&self, extension: &FileExtension, id: InodeId) {
        let removed = self
            .inner
            .entries
            .lock()
            .unwrap()
            .remove(&(extension.clone(), id));

        self.inner.pending_uploads.lock().unwrap().remove(&id);

        let path = match removed {
            Some(info) => info.path().to_path_buf(),
            None => self.content_path(extension, id),
        };

        if let Err(err) = std::fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(id = %id, error = %err, "Failed to delete cached content");
            }
        }

        tracing::debug!(id = %id, extension = %extension, "Cache entry removed");
    }

    /// Obtain an I/O context for a cached file.
    #[must_use]
    pub fn context(&self, info: &Arc<FileInfo>) -> IoContext {
        IoContext {
            inner: Arc::clone(&self.inner),
            info: Arc::clone(info),
        }
    }

    /// Ids whose content awaits upload, in no particular order.
    #[must_use]
    pub fn pending_uploads(&self) -> Vec<InodeId> {
        self.inner
            .pending_uploads
            .lock()
            .unwrap()
            .iter()
            .copied()
            .collect()
    }

    /// Number of resident entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().unwrap().is_empty()
    }
}

/// Per-file I/O handle handed to mounts and the upload pipeline.
pub struct IoContext {
    inner: Arc<CacheInner>,
    info: Arc<FileInfo>,
}

impl IoContext {
    /// Mark the file's content modified and schedule it for upload.
    pub fn modified(&self) {
        self.info.mark_dirty();
        self.inner
            .pending_uploads
            .lock()
            .unwrap()
            .insert(self.info.id());

        tracing::trace!(id = %self.info.id(), "File scheduled for upload");
    }

    #[must_use]
    pub fn info(&self) -> &Arc<FileInfo> {
        &self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> (tempfile::TempDir, FileCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().to_path_buf()).unwrap();
        (dir, cache)
    }

    fn ext(raw: &str) -> FileExtension {
        FileExtension::new(raw)
    }

    fn id(raw: u64) -> InodeId {
        InodeId::new(InodeId::SYNTHETIC_BASE + raw)
    }

    #[test]
    fn test_create_and_info() {
        let (_dir, cache) = cache();
        let created = cache.create(&ext("txt"), id(1)).unwrap();

        assert_eq!(created.size(), 0);
        assert!(!created.modified());
        assert!(created.path().exists());

        let fetched = cache.info(&ext("txt"), id(1)).unwrap();
        assert!(Arc::ptr_eq(&created, &fetched));
    }

    #[test]
    fn test_info_rebuilds_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        {
            let cache = FileCache::new(root.clone()).unwrap();
            let info = cache.create(&ext("jpg"), id(2)).unwrap();
            std::fs::write(info.path(), b"pixels").unwrap();
        }

        // A fresh cache instance finds the surviving content file.
        let cache = FileCache::new(root).unwrap();
        let info = cache.info(&ext("jpg"), id(2)).unwrap();
        assert_eq!(info.size(), 6);
        assert!(!info.modified());
    }

    #[test]
    fn test_info_missing_is_none() {
        let (_dir, cache) = cache();
        assert!(cache.info(&ext("txt"), id(3)).is_none());
    }

    #[test]
    fn test_remove_deletes_content_and_cancels_upload() {
        let (_dir, cache) = cache();
        let info = cache.create(&ext("txt"), id(4)).unwrap();
        let path = info.path().to_path_buf();

        cache.context(&info).modified();
        assert_eq!(cache.pending_uploads(), vec![id(4)]);

        cache.remove(&ext("txt"), id(4));
        assert!(!path.exists());
        assert!(cache.pending_uploads().is_empty());
        assert!(cache.info(&ext("txt"), id(4)).is_none());
    }

    #[test]
    fn test_modified_marks_dirty_and_schedules() {
        let (_dir, cache) = cache();
        let info = cache.create(&ext("txt"), id(5)).unwrap();

        cache.context(&info).modified();
        assert!(info.modified());
        assert_eq!(cache.pending_uploads(), vec![id(5)]);

        info.flushed();
        assert!(!info.modified());
    }

    #[test]
    fn test_entry_limit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::with_limit(dir.path().to_path_buf(), Some(1)).unwrap();

        cache.create(&ext("txt"), id(6)).unwrap();
        let err = cache.create(&ext("txt"), id(7)).unwrap_err();
        assert!(matches!(err, CacheError::Full(_)));
    }

    #[test]
    fn test_written_updates_state() {
        let (_dir, cache) = cache();
        let info = cache.create(&ext("txt"), id(8)).unwrap();

        let now = Utc::now();
        info.written(42, now);
        assert_eq!(info.size(), 42);
        assert_eq!(info.mtime(), now);
        assert!(info.modified());
    }
}
