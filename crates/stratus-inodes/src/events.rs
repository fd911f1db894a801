//! Cloud event application.
//!
//! An [`EventObserver`] lives for exactly one event batch. Its constructor
//! takes the index lock and then the store connection (the one global lock
//! order) and opens the batch's transaction; `run` dispatches each event by
//! kind and commits exactly once after the last event. Dropping the
//! observer without committing rolls the batch back, so a failure leaves
//! the store in its pre-batch state.

use tokio::sync::MutexGuard;

use stratus_core::domain::newtypes::InodeId;
use stratus_core::domain::EngineError;
use stratus_core::ports::{NodeEvent, NodeEventKind, NodeEventQueue};
use stratus_store::Tx;

use crate::db::{internal, InodeDb};
use crate::index::IndexState;

pub(crate) struct EventObserver<'a> {
    db: &'a InodeDb,
    index: MutexGuard<'a, IndexState>,
    tx: Tx,
}

impl<'a> EventObserver<'a> {
    pub(crate) async fn new(db: &'a InodeDb) -> Result<Self, EngineError> {
        // Index lock first, then the store connection.
        let index = db.index.lock().await;
        let tx = db.pool.begin().await.map_err(internal)?;
        Ok(Self { db, index, tx })
    }

    /// Apply a batch in queue order, then commit.
    pub(crate) async fn run(mut self, events: NodeEventQueue) -> Result<(), EngineError> {
        let count = events.len();
        tracing::debug!(count, "Processing node events");

        let began = std::time::Instant::now();

        for event in events {
            match event.kind {
                NodeEventKind::Added => self.added(&event).await?,
                NodeEventKind::Modified => self.modified(&event),
                NodeEventKind::Moved => self.moved(&event).await?,
                NodeEventKind::Removed => self.removed(&event).await?,
                NodeEventKind::PermissionsChanged => self.permissions(&event),
            }
        }

        self.tx.commit().await.map_err(internal)?;

        tracing::debug!(
            count,
            elapsed_ms = began.elapsed().as_millis() as u64,
            "Node events processed"
        );
        Ok(())
    }

    /// Invalidate the event's directory entry in every mount.
    fn invalidate_entry(&self, event: &NodeEvent) {
        let Some(parent) = event.parent_handle else {
            return;
        };
        self.db.mounts.each(|mount| {
            mount.invalidate_entry(&event.name, InodeId::from_handle(parent), None);
        });
    }

    async fn added(&mut self, event: &NodeEvent) -> Result<(), EngineError> {
        tracing::debug!(
            name = %event.name,
            handle = %event.handle,
            "Node added"
        );

        // The node may complete one of our own pending uploads: the bind
        // handle stitches it back to the local inode that originated it.
        if let Some(bind) = &event.bind_handle {
            if let Some(inode) = self.index.get_by_bind(bind) {
                tracing::debug!(
                    id = %inode.id(),
                    handle = %event.handle,
                    "Added node is the cloud identity of a pending upload"
                );

                self.db
                    .store
                    .set_identity(&mut self.tx, inode.id(), None, Some(event.handle), None, None)
                    .await
                    .map_err(internal)?;

                self.index.promote(&inode, event.handle);
                inode.set_location(Some(event.name.clone()), event.parent_handle);
                inode.set_removed(false);

                self.invalidate_entry(event);
                return Ok(());
            }
        }

        if let Some(parent) = event.parent_handle {
            // The node may replace an in-memory inode at its slot.
            if let Some(inode) = self.index.get_by_location(parent, &event.name) {
                tracing::debug!(id = %inode.id(), "Added node replaces a warm inode");

                self.index.mark_removed(&inode);
                self.db
                    .mounts
                    .each(|mount| mount.invalidate_pin(inode.id()));

                self.invalidate_entry(event);
                return Ok(());
            }

            // Or one known only to the store.
            if let Some((raw_extension, id)) = self
                .db
                .store
                .extension_and_id_by_location(&mut self.tx, &event.name, parent)
                .await
                .map_err(internal)?
            {
                tracing::debug!(id = %id, "Added node replaces a cold inode");

                self.db
                    .store
                    .remove_by_id(&mut self.tx, id)
                    .await
                    .map_err(internal)?;

                let extension = self.db.extensions.get(&raw_extension);
                self.db.cache.remove(&extension, id);
            }
        }

        self.invalidate_entry(event);
        Ok(())
    }

    fn modified(&mut self, event: &NodeEvent) {
        tracing::debug!(
            name = %event.name,
            handle = %event.handle,
            "Node modified"
        );

        // Cloud metadata is authoritative and fetched lazily; only cached
        // attributes in the mounts need busting, and only for warm inodes.
        if let Some(inode) = self.index.get_by_handle(event.handle) {
            self.db
                .mounts
                .each(|mount| mount.invalidate_attributes(inode.id()));
        }
    }

    async fn moved(&mut self, event: &NodeEvent) -> Result<(), EngineError> {
        tracing::debug!(
            name = %event.name,
            handle = %event.handle,
            "Node moved"
        );

        if let Some(parent) = event.parent_handle {
            // Whatever occupied the target slot has been replaced.
            if let Some(inode) = self.index.get_by_location(parent, &event.name) {
                tracing::debug!(id = %inode.id(), "Moved node replaces a warm inode");
                self.index.mark_removed(&inode);
            }

            if let Some((raw_extension, id)) = self
                .db
                .store
                .extension_and_id_by_location(&mut self.tx, &event.name, parent)
                .await
                .map_err(internal)?
            {
                tracing::debug!(id = %id, "Moved node replaces a cold inode");

                self.db
                    .store
                    .remove_by_id(&mut self.tx, id)
                    .await
                    .map_err(internal)?;

                let extension = self.db.extensions.get(&raw_extension);
                self.db.cache.remove(&extension, id);
            }
        }

        // Relocate the moved inode itself, if it is in memory.
        if let Some(inode) = self.index.get_by_handle(event.handle) {
            tracing::debug!(id = %inode.id(), target = %event.name, "Inode changed location");

            match &event.info {
                Some(info) => inode.apply_info(info),
                None => inode.set_location(Some(event.name.clone()), event.parent_handle),
            }

            self.db.mounts.each(|mount| {
                mount.invalidate_pin(inode.id());
            });
            self.invalidate_entry(event);
            return Ok(());
        }

        // Bust any negative entry cached at the target.
        self.invalidate_entry(event);
        Ok(())
    }

    fn permissions(&mut self, event: &NodeEvent) {
        // Access is checked lazily on each operation; nothing to do now.
        tracing::trace!(handle = %event.handle, "Node permissions changed");
    }

    async fn removed(&mut self, event: &NodeEvent) -> Result<(), EngineError> {
        tracing::debug!(
            name = %event.name,
            handle = %event.handle,
            "Node removed"
        );

        // A mount anchored on a removed directory cannot outlive it.
        if event.is_directory {
            self.db.mounts.disable(event.handle);
        }

        if let Some(inode) = self.index.get_by_handle(event.handle) {
            tracing::debug!(id = %inode.id(), "Removed node matches a warm inode");

            self.index.mark_removed(&inode);

            if let Some(parent) = event.parent_handle {
                self.db.mounts.each(|mount| {
                    mount.invalidate_entry(
                        &event.name,
                        InodeId::from_handle(parent),
                        Some(inode.id()),
                    );
                });
            }
            return Ok(());
        }

        if let Some((raw_extension, id)) = self
            .db
            .store
            .extension_and_id_by_handle(&mut self.tx, event.handle)
            .await
            .map_err(internal)?
        {
            tracing::debug!(id = %id, "Removed node matches a cold inode");

            self.db
                .store
                .remove_by_id(&mut self.tx, id)
                .await
                .map_err(internal)?;

            let extension = self.db.extensions.get(&raw_extension);
            self.db.cache.remove(&extension, id);
        }

        self.invalidate_entry(event);
        Ok(())
    }
}
