//! In-memory backend.

use crate::backend::{AfterCommit, Backend, ChangeBatch};
use crate::cache::EntityCache;
use crate::entity::{Entity, EntityId, EntityRegistry, EntityType, PropertyMap};
use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use crate::types::TransactionId;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A backend that keeps committed entities in an [`EntityCache`].
///
/// Batches are applied under one write lock; readers take the read lock and
/// receive copies, so nobody observes a half-applied batch.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    committed: RwLock<EntityCache>,
    active: Mutex<BTreeSet<TransactionId>>,
    dirty: AtomicBool,
    batches_applied: AtomicU64,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-loaded with committed entities.
    pub fn with_entities(entities: impl IntoIterator<Item = Box<dyn Entity>>) -> Self {
        let mut cache = EntityCache::new();
        cache.add_all(entities);
        Self {
            committed: RwLock::new(cache),
            ..Self::default()
        }
    }

    /// Returns a copy of the committed table.
    #[must_use]
    pub fn snapshot(&self) -> EntityCache {
        self.committed.read().clone()
    }

    /// Returns the number of committed entities per type.
    #[must_use]
    pub fn count_entities(&self) -> BTreeMap<EntityType, usize> {
        self.committed.read().count_entities()
    }

    /// Returns the number of committed entities.
    #[must_use]
    pub fn size(&self) -> usize {
        self.committed.read().size()
    }

    /// Returns true if a tracked mutation happened since the last
    /// [`InMemoryBackend::take_dirty`].
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Returns and clears the dirty flag.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Returns the transactions begun and not yet finished.
    #[must_use]
    pub fn active_transactions(&self) -> Vec<TransactionId> {
        self.active.lock().iter().copied().collect()
    }

    /// Returns the number of batches applied by [`Backend::update`].
    #[must_use]
    pub fn batches_applied(&self) -> u64 {
        self.batches_applied.load(Ordering::Relaxed)
    }

    /// Applies full snapshots received from outside the process.
    ///
    /// Existing entities are updated in place when the kind is unchanged;
    /// anything else is built through `registry`. No change set is emitted.
    /// Either every snapshot is applied or none is.
    ///
    /// # Errors
    ///
    /// Fails if a snapshot lacks an id, names an unknown kind or carries a
    /// value its kind rejects.
    pub fn receive_entities<'a>(
        &self,
        snapshots: impl IntoIterator<Item = &'a PropertyMap>,
        registry: &EntityRegistry,
    ) -> StoreResult<usize> {
        let mut committed = self.committed.write();
        let mut received = Vec::new();
        for snapshot in snapshots {
            let id = snapshot
                .id()
                .ok_or_else(|| StoreError::invalid_property("id", "missing id"))?;
            let existing = committed
                .get_by_id(&EntityId::from(id))
                .ok()
                .filter(|entity| Some(entity.entity_type().name()) == snapshot.type_tag());
            let entity = match existing {
                Some(entity) => {
                    let mut entity = entity.clone_box();
                    entity.update_properties(snapshot)?;
                    entity
                }
                None => registry.materialize(snapshot)?,
            };
            received.push(entity);
        }

        let count = received.len();
        committed.add_all(received);
        tracing::debug!(count, "received entities");
        Ok(count)
    }

    /// Removes ids received from outside the process. Unknown ids are
    /// ignored. Returns the number of entities removed.
    pub fn receive_deletions<'a>(&self, ids: impl IntoIterator<Item = &'a EntityId>) -> usize {
        let mut committed = self.committed.write();
        let removed = ids
            .into_iter()
            .filter_map(|id| committed.remove(id))
            .count();
        tracing::debug!(removed, "received deletions");
        removed
    }
}

impl Backend for InMemoryBackend {
    fn get_by_id(&self, id: &EntityId) -> StoreResult<Box<dyn Entity>> {
        self.committed.read().get_by_id(id).map(|entity| entity.clone_box())
    }

    fn contains_with_id(&self, id: &EntityId) -> bool {
        self.committed.read().contains_with_id(id)
    }

    fn find_first(&self, query: &dyn Query) -> Option<Box<dyn Entity>> {
        self.committed
            .read()
            .find_first(query)
            .map(|entity| entity.clone_box())
    }

    fn find_all(&self, query: &dyn Query, into: &mut Vec<Box<dyn Entity>>) {
        let committed = self.committed.read();
        into.extend(
            committed
                .find_all(query)
                .into_iter()
                .map(|entity| entity.clone_box()),
        );
    }

    fn size(&self) -> usize {
        self.committed.read().size()
    }

    fn update(&self, batch: ChangeBatch, after_commit: AfterCommit) -> StoreResult<()> {
        {
            let mut committed = self.committed.write();
            committed.remove_all(&batch.deleted);
            committed.add_all(batch.modified);
        }
        self.batches_applied.fetch_add(1, Ordering::Relaxed);
        after_commit();
        Ok(())
    }

    fn on_entity_modified(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn on_transaction_started(&self, transaction: TransactionId) {
        self.active.lock().insert(transaction);
    }

    fn on_transaction_finished(&self, transaction: TransactionId) {
        self.active.lock().remove(&transaction);
    }
}
