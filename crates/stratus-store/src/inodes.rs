//! Inode table statements
//!
//! One method per prepared statement the inode database uses. Every method
//! runs inside a caller-supplied transaction so a whole operation commits or
//! rolls back as a unit.
//!
//! ## Type Mapping
//!
//! | Domain Type   | SQL Type | Strategy                              |
//! |---------------|----------|---------------------------------------|
//! | InodeId       | INTEGER  | raw u64 stored as i64                 |
//! | NodeHandle    | INTEGER  | raw u64 stored as i64 (fits 48 bits)  |
//! | BindHandle    | TEXT     | opaque token string                   |
//! | FileExtension | TEXT     | normalized string; interned on read   |

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

use stratus_core::domain::newtypes::{BindHandle, InodeId, NodeHandle};

use crate::StoreError;

/// The store's exclusive transaction handle.
pub type Tx = Transaction<'static, Sqlite>;

/// A full row of the `inodes` table.
#[derive(Debug, Clone)]
pub struct InodeRow {
    pub bind_handle: Option<BindHandle>,
    pub extension: String,
    pub handle: Option<NodeHandle>,
    pub id: InodeId,
    pub modified: bool,
    pub name: Option<String>,
    pub parent_handle: Option<NodeHandle>,
}

/// The projection used when listing a directory's local children.
#[derive(Debug, Clone)]
pub struct ChildRow {
    pub extension: String,
    pub handle: Option<NodeHandle>,
    pub id: InodeId,
    pub name: Option<String>,
}

/// Field values for a freshly inserted inode.
#[derive(Debug, Clone)]
pub struct NewInode<'a> {
    pub id: InodeId,
    pub extension: &'a str,
    pub handle: Option<NodeHandle>,
    pub name: Option<&'a str>,
    pub parent_handle: Option<NodeHandle>,
    pub bind_handle: Option<&'a BindHandle>,
    pub modified: bool,
}

// ============================================================================
// Conversion helpers
// ============================================================================

fn to_i64(raw: u64) -> i64 {
    raw as i64
}

fn handle_param(handle: Option<NodeHandle>) -> Option<i64> {
    handle.map(|h| to_i64(h.get()))
}

fn handle_from(raw: Option<i64>) -> Result<Option<NodeHandle>, StoreError> {
    match raw {
        None => Ok(None),
        Some(v) => NodeHandle::new(v as u64)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(e.to_string())),
    }
}

fn bind_from(raw: Option<String>) -> Result<Option<BindHandle>, StoreError> {
    match raw {
        None => Ok(None),
        Some(s) => BindHandle::new(s)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(e.to_string())),
    }
}

fn inode_row(row: &SqliteRow) -> Result<InodeRow, StoreError> {
    Ok(InodeRow {
        bind_handle: bind_from(row.get("bind_handle"))?,
        extension: row.get("extension"),
        handle: handle_from(row.get("handle"))?,
        id: InodeId::new(row.get::<i64, _>("id") as u64),
        modified: row.get("modified"),
        name: row.get("name"),
        parent_handle: handle_from(row.get("parent_handle"))?,
    })
}

fn child_row(row: &SqliteRow) -> Result<ChildRow, StoreError> {
    Ok(ChildRow {
        extension: row.get("extension"),
        handle: handle_from(row.get("handle"))?,
        id: InodeId::new(row.get::<i64, _>("id") as u64),
        name: row.get("name"),
    })
}

// ============================================================================
// InodeStore
// ============================================================================

/// Statement set for the `inodes` and `inode_id` tables.
#[derive(Debug, Default)]
pub struct InodeStore;

impl InodeStore {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Insert a new inode row.
    pub async fn insert(&self, tx: &mut Tx, row: &NewInode<'_>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO inodes \
             (bind_handle, extension, handle, id, modified, name, parent_handle) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(row.bind_handle.map(|b| b.as_str().to_string()))
        .bind(row.extension)
        .bind(handle_param(row.handle))
        .bind(to_i64(row.id.get()))
        .bind(row.modified)
        .bind(row.name)
        .bind(handle_param(row.parent_handle))
        .execute(&mut **tx)
        .await?;

        tracing::trace!(id = %row.id, "Inserted inode row");
        Ok(())
    }

    /// Delete an inode row by id.
    pub async fn remove_by_id(&self, tx: &mut Tx, id: InodeId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM inodes WHERE id = ?")
            .bind(to_i64(id.get()))
            .execute(&mut **tx)
            .await?;

        tracing::trace!(id = %id, "Deleted inode row");
        Ok(())
    }

    /// Update an inode's (name, parent) location.
    ///
    /// Passing `None` for both evicts the row from the local namespace
    /// without deleting it (the "replaced" state).
    pub async fn set_location(
        &self,
        tx: &mut Tx,
        id: InodeId,
        name: Option<&str>,
        parent_handle: Option<NodeHandle>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE inodes SET name = ?, parent_handle = ? WHERE id = ?")
            .bind(name)
            .bind(handle_param(parent_handle))
            .bind(to_i64(id.get()))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Update an inode's bind handle.
    pub async fn set_bind_handle(
        &self,
        tx: &mut Tx,
        id: InodeId,
        bind_handle: Option<&BindHandle>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE inodes SET bind_handle = ? WHERE id = ?")
            .bind(bind_handle.map(|b| b.as_str().to_string()))
            .bind(to_i64(id.get()))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Update bind handle, cloud handle and location in one statement.
    ///
    /// Used when an inode's cloud identity changes: a bound upload completes
    /// or a slot resolution discovers the row now lives in the cloud. A
    /// cloud-resident row never records a name or parent.
    pub async fn set_identity(
        &self,
        tx: &mut Tx,
        id: InodeId,
        bind_handle: Option<&BindHandle>,
        handle: Option<NodeHandle>,
        name: Option<&str>,
        parent_handle: Option<NodeHandle>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE inodes \
             SET bind_handle = ?, handle = ?, name = ?, parent_handle = ? \
             WHERE id = ?",
        )
        .bind(bind_handle.map(|b| b.as_str().to_string()))
        .bind(handle_param(handle))
        .bind(name)
        .bind(handle_param(parent_handle))
        .bind(to_i64(id.get()))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Update an inode's modified (dirty) bit.
    pub async fn set_modified(
        &self,
        tx: &mut Tx,
        id: InodeId,
        modified: bool,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE inodes SET modified = ? WHERE id = ?")
            .bind(modified)
            .bind(to_i64(id.get()))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Fetch a full row by id.
    pub async fn by_id(&self, tx: &mut Tx, id: InodeId) -> Result<Option<InodeRow>, StoreError> {
        let row = sqlx::query("SELECT * FROM inodes WHERE id = ?")
            .bind(to_i64(id.get()))
            .fetch_optional(&mut **tx)
            .await?;

        row.as_ref().map(inode_row).transpose()
    }

    /// Fetch a full row by cloud handle.
    pub async fn by_handle(
        &self,
        tx: &mut Tx,
        handle: NodeHandle,
    ) -> Result<Option<InodeRow>, StoreError> {
        let row = sqlx::query("SELECT * FROM inodes WHERE handle = ?")
            .bind(to_i64(handle.get()))
            .fetch_optional(&mut **tx)
            .await?;

        row.as_ref().map(inode_row).transpose()
    }

    /// Fetch the id of the inode occupying a (name, parent) slot.
    pub async fn id_by_location(
        &self,
        tx: &mut Tx,
        name: &str,
        parent_handle: NodeHandle,
    ) -> Result<Option<InodeId>, StoreError> {
        let row = sqlx::query("SELECT id FROM inodes WHERE name = ? AND parent_handle = ?")
            .bind(name)
            .bind(to_i64(parent_handle.get()))
            .fetch_optional(&mut **tx)
            .await?;

        Ok(row.map(|r| InodeId::new(r.get::<i64, _>("id") as u64)))
    }

    /// Fetch (extension, id) by cloud handle.
    pub async fn extension_and_id_by_handle(
        &self,
        tx: &mut Tx,
        handle: NodeHandle,
    ) -> Result<Option<(String, InodeId)>, StoreError> {
        let row = sqlx::query("SELECT extension, id FROM inodes WHERE handle = ?")
            .bind(to_i64(handle.get()))
            .fetch_optional(&mut **tx)
            .await?;

        Ok(row.map(|r| {
            (
                r.get::<String, _>("extension"),
                InodeId::new(r.get::<i64, _>("id") as u64),
            )
        }))
    }

    /// Fetch (extension, id) by (name, parent) slot.
    pub async fn extension_and_id_by_location(
        &self,
        tx: &mut Tx,
        name: &str,
        parent_handle: NodeHandle,
    ) -> Result<Option<(String, InodeId)>, StoreError> {
        let row =
            sqlx::query("SELECT extension, id FROM inodes WHERE name = ? AND parent_handle = ?")
                .bind(name)
                .bind(to_i64(parent_handle.get()))
                .fetch_optional(&mut **tx)
                .await?;

        Ok(row.map(|r| {
            (
                r.get::<String, _>("extension"),
                InodeId::new(r.get::<i64, _>("id") as u64),
            )
        }))
    }

    /// Fetch the id of an inode known either by cloud handle or by the bind
    /// handle of the upload creating it.
    pub async fn id_by_bind_or_handle(
        &self,
        tx: &mut Tx,
        bind_handle: Option<&BindHandle>,
        handle: NodeHandle,
    ) -> Result<Option<InodeId>, StoreError> {
        let row = sqlx::query(
            "SELECT id FROM inodes \
             WHERE handle = ? \
                OR (bind_handle IS NOT NULL AND bind_handle = ?)",
        )
        .bind(to_i64(handle.get()))
        .bind(bind_handle.map(|b| b.as_str().to_string()))
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(|r| InodeId::new(r.get::<i64, _>("id") as u64)))
    }

    /// Fetch an inode's stored handle column, or `None` if the row is gone.
    pub async fn handle_by_id(
        &self,
        tx: &mut Tx,
        id: InodeId,
    ) -> Result<Option<Option<NodeHandle>>, StoreError> {
        let row = sqlx::query("SELECT handle FROM inodes WHERE id = ?")
            .bind(to_i64(id.get()))
            .fetch_optional(&mut **tx)
            .await?;

        row.map(|r| handle_from(r.get("handle"))).transpose()
    }

    /// List the locally-recorded children of a directory.
    pub async fn children_of(
        &self,
        tx: &mut Tx,
        parent_handle: NodeHandle,
    ) -> Result<Vec<ChildRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT extension, handle, id, name FROM inodes WHERE parent_handle = ?",
        )
        .bind(to_i64(parent_handle.get()))
        .fetch_all(&mut **tx)
        .await?;

        rows.iter().map(child_row).collect()
    }

    /// Whether any row records this directory as its parent.
    pub async fn has_local_children(
        &self,
        tx: &mut Tx,
        parent_handle: NodeHandle,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT id FROM inodes WHERE parent_handle = ? LIMIT 1")
            .bind(to_i64(parent_handle.get()))
            .fetch_optional(&mut **tx)
            .await?;

        Ok(row.is_some())
    }

    /// Fetch an inode's modified bit, or `None` if the row is gone.
    pub async fn is_modified(
        &self,
        tx: &mut Tx,
        id: InodeId,
    ) -> Result<Option<bool>, StoreError> {
        let row = sqlx::query("SELECT modified FROM inodes WHERE id = ?")
            .bind(to_i64(id.get()))
            .fetch_optional(&mut **tx)
            .await?;

        Ok(row.map(|r| r.get("modified")))
    }

    /// Fetch every row whose modified bit is set.
    pub async fn modified_rows(&self, tx: &mut Tx) -> Result<Vec<InodeRow>, StoreError> {
        let rows = sqlx::query("SELECT * FROM inodes WHERE modified = 1")
            .fetch_all(&mut **tx)
            .await?;

        rows.iter().map(inode_row).collect()
    }

    /// Allocate a synthetic inode id: read the counter, then advance it.
    ///
    /// Both statements run inside the caller's transaction, so the id is
    /// only consumed if the row that uses it commits.
    pub async fn allocate_id(&self, tx: &mut Tx) -> Result<InodeId, StoreError> {
        let row = sqlx::query("SELECT next FROM inode_id")
            .fetch_one(&mut **tx)
            .await?;

        let next = row.get::<i64, _>("next") as u64;
        if next < InodeId::SYNTHETIC_BASE {
            return Err(StoreError::Corrupt(format!(
                "synthetic id counter below base: {}",
                next
            )));
        }

        sqlx::query("UPDATE inode_id SET next = next + 1")
            .execute(&mut **tx)
            .await?;

        Ok(InodeId::new(next))
    }

    /// Clear every bind handle. Runs at startup: pending uploads never
    /// survive a restart.
    pub async fn clear_bind_handles(&self, tx: &mut Tx) -> Result<(), StoreError> {
        sqlx::query("UPDATE inodes SET bind_handle = NULL")
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
