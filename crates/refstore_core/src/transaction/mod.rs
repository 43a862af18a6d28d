//! The unit of work.
//!
//! A [`Transaction`] collects modified and deleted entities for one logical
//! change, repairs references through the integrity fixpoint, and hands the
//! result to the backend as one atomic batch.
//!
//! Reads overlay the working set on committed state: entities persisted or
//! modified in the transaction are visible to its own lookups and queries,
//! and deleted ids are hidden from them before commit.
//!
//! ```rust,ignore
//! let mut txn = store.begin("close customer");
//! txn.delete(&customer_id)?;
//! txn.commit()?; // orders referencing the customer repair themselves
//! ```

mod integrity;
mod state;

pub use state::TransactionState;

use crate::backend::{AfterCommit, ChangeBatch};
use crate::cache::EntityCache;
use crate::change_feed::ChangeSet;
use crate::entity::{
    downcast_entity, Entity, EntityId, EntityKind, EntityType, IntoPropertyValue, PropertyDeltas,
    PropertyMap, ID_KEY,
};
use crate::error::{StoreError, StoreResult};
use crate::query::{Query, TypedQuery};
use crate::store::StoreContext;
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Ids listed by `Display` before switching to a count.
const DISPLAYED_IDS: usize = 7;

/// A unit of work over a store.
///
/// Transactions are confined to the thread that owns them. Any number of
/// them may be open against the same store.
pub struct Transaction {
    id: TransactionId,
    name: String,
    context: Arc<StoreContext>,
    state: TransactionState,

    modified: EntityCache,
    deleted: BTreeSet<EntityId>,
    properties: PropertyDeltas,
    after_commit: Arc<Mutex<Vec<AfterCommit>>>,

    auto_commit: bool,
    ignore_modifications: bool,
    ensure_integrity_on_commit: bool,

    /// Set while an integrity pass runs hooks.
    ensuring_integrity: bool,
    /// The entity currently checked out to its integrity hook.
    checking: Option<EntityId>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, name: String, context: Arc<StoreContext>) -> Self {
        context.backend.on_transaction_started(id);
        context.stats.record_transaction_start();
        let auto_commit = context.config.auto_commit;
        let ensure_integrity_on_commit = context.config.ensure_integrity_on_commit;
        tracing::debug!(transaction = %id, %name, "begin");

        Self {
            id,
            name,
            context,
            state: TransactionState::Active,
            modified: EntityCache::new(),
            deleted: BTreeSet::new(),
            properties: PropertyDeltas::new(),
            after_commit: Arc::new(Mutex::new(Vec::new())),
            auto_commit,
            ignore_modifications: false,
            ensure_integrity_on_commit,
            ensuring_integrity: false,
            checking: None,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the name given at `begin`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns true while the transaction can be committed or rolled back.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns true if every change is written through immediately.
    #[must_use]
    pub fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// Switches auto-commit on or off. Changes already pending are written
    /// with the next auto-committed change or by [`Transaction::commit`].
    pub fn set_auto_commit(&mut self, auto_commit: bool) {
        self.auto_commit = auto_commit;
    }

    /// Returns true if field modifications are currently dropped.
    #[must_use]
    pub fn ignores_modifications(&self) -> bool {
        self.ignore_modifications
    }

    /// Drops field modifications while set, e.g. while loading data that
    /// came from outside and must not be sent back out.
    pub fn set_ignore_modifications(&mut self, ignore: bool) {
        self.ignore_modifications = ignore;
    }

    /// Returns true if commits run the integrity fixpoint.
    #[must_use]
    pub fn ensures_integrity_on_commit(&self) -> bool {
        self.ensure_integrity_on_commit
    }

    /// Enables or disables the integrity fixpoint for this transaction.
    pub fn set_ensure_integrity_on_commit(&mut self, ensure: bool) {
        self.ensure_integrity_on_commit = ensure;
    }

    /// Returns true while an integrity pass is running hooks.
    #[must_use]
    pub fn is_ensuring_integrity(&self) -> bool {
        self.ensuring_integrity
    }

    // --- recording -------------------------------------------------------

    /// Registers an entity as modified, recording a full snapshot delta.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the id was deleted in this transaction or
    /// the transaction is finished. In auto-commit mode, write errors are
    /// returned too.
    pub fn persist(&mut self, entity: &dyn Entity) -> StoreResult<()> {
        self.state.ensure_recording()?;
        let id = entity.id().clone();
        if self.deleted.contains(&id) {
            return Err(StoreError::illegal_state(format!(
                "cannot persist deleted entity {}",
                entity.type_and_id()
            )));
        }

        self.properties.insert(id, entity.create_properties_map());
        self.modified.add(entity.clone_box());
        tracing::info!(transaction = %self.id, entity = %entity.type_and_id(), "persist");
        self.write_through()
    }

    /// Records a single-field change on a tracked entity.
    ///
    /// The entity's modification time is bumped and the delta holds only
    /// `id` and `field`. Changes to entities the transaction cannot see are
    /// dropped, as is everything while modifications are ignored.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the transaction is finished. In auto-commit
    /// mode, write errors are returned too.
    pub fn modified(
        &mut self,
        entity: &mut dyn Entity,
        field: &str,
        value: impl IntoPropertyValue,
    ) -> StoreResult<()> {
        self.state.ensure_recording()?;
        if self.ignore_modifications {
            return Ok(());
        }
        let id = entity.id().clone();
        if !self.contains_with_id(&id) {
            tracing::debug!(entity = %entity.type_and_id(), field, "modification of untracked entity dropped");
            return Ok(());
        }

        entity.identity_mut().touch();
        self.modified.add(entity.clone_box());
        self.properties
            .entry(id.clone())
            .or_insert_with(|| PropertyMap::for_id(&id))
            .set(field, value);
        self.context.backend.on_entity_modified();
        self.context.stats.record_modification();
        tracing::debug!(transaction = %self.id, entity = %entity.type_and_id(), field, "modified");
        self.write_through()
    }

    /// Marks an id as deleted.
    ///
    /// Deleting an id twice is a no-op. While an integrity pass runs, a new
    /// deletion returns [`StoreError::IntegrityRestart`]; hooks propagate it
    /// with `?` and the pass is redone.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the transaction is finished, or
    /// `IntegrityRestart` as described above.
    pub fn delete(&mut self, id: &EntityId) -> StoreResult<()> {
        self.state.ensure_recording()?;
        if self.deleted.contains(id) {
            return Ok(());
        }

        self.deleted.insert(id.clone());
        self.modified.remove(id);
        self.properties.remove(id);
        self.context.backend.on_entity_modified();
        tracing::info!(transaction = %self.id, %id, "delete");

        if self.ensuring_integrity {
            return Err(StoreError::IntegrityRestart);
        }
        self.write_through()
    }

    /// Runs the entity's [`Entity::on_delete`] hook, then deletes it.
    ///
    /// # Errors
    ///
    /// Errors from the hook prevent the deletion; otherwise as
    /// [`Transaction::delete`].
    pub fn delete_entity(&mut self, entity: &mut dyn Entity) -> StoreResult<()> {
        entity.on_delete(self)?;
        let id = entity.id().clone();
        self.delete(&id)
    }

    /// Runs `callback` once the batch has been applied. In auto-commit mode
    /// it runs immediately.
    pub fn run_after_commit(&mut self, callback: impl FnOnce() + Send + 'static) {
        if self.auto_commit {
            callback();
        } else {
            self.after_commit.lock().push(Box::new(callback));
        }
    }

    // --- reads -----------------------------------------------------------

    /// Returns true if the id was deleted in this transaction.
    #[must_use]
    pub fn is_deleted(&self, id: &EntityId) -> bool {
        self.deleted.contains(id)
    }

    /// Returns true if the id resolves in this transaction.
    #[must_use]
    pub fn contains_with_id(&self, id: &EntityId) -> bool {
        if self.deleted.contains(id) {
            return false;
        }
        self.checking.as_ref() == Some(id)
            || self.modified.contains_with_id(id)
            || self.context.backend.contains_with_id(id)
    }

    /// Returns a copy of the entity, preferring the working set.
    ///
    /// # Errors
    ///
    /// Returns `EntityDoesNotExist` if the id was deleted here or is not
    /// committed.
    pub fn get_by_id(&self, id: &EntityId) -> StoreResult<Box<dyn Entity>> {
        if self.deleted.contains(id) {
            return Err(StoreError::not_found(id));
        }
        match self.modified.get_by_id(id) {
            Ok(entity) => Ok(entity.clone_box()),
            Err(_) => self.context.backend.get_by_id(id),
        }
    }

    /// Typed variant of [`Transaction::get_by_id`].
    ///
    /// # Errors
    ///
    /// Returns `EntityDoesNotExist` as [`Transaction::get_by_id`], or
    /// `TypeMismatch` if the entity is another kind.
    pub fn get<E: EntityKind>(&self, id: &EntityId) -> StoreResult<E> {
        downcast_entity(self.get_by_id(id)?)
    }

    /// Resolves ids in order.
    ///
    /// # Errors
    ///
    /// Returns `EntityDoesNotExist` for the first id that does not resolve.
    pub fn get_by_ids<'i>(
        &self,
        ids: impl IntoIterator<Item = &'i EntityId>,
    ) -> StoreResult<Vec<Box<dyn Entity>>> {
        ids.into_iter().map(|id| self.get_by_id(id)).collect()
    }

    /// Returns every visible entity matching `query`: working-set matches
    /// first, then committed matches not shadowed by the working set.
    pub fn find_all(&self, query: &dyn Query) -> Vec<Box<dyn Entity>> {
        let started = Instant::now();
        let mut result: Vec<Box<dyn Entity>> = self
            .modified
            .find_all(&self.visible(query, false))
            .into_iter()
            .map(|entity| entity.clone_box())
            .collect();
        self.context
            .backend
            .find_all(&self.visible(query, true), &mut result);
        self.record_query(query, started, result.len());
        result
    }

    /// Returns the first visible entity matching `query`.
    pub fn find_first(&self, query: &dyn Query) -> Option<Box<dyn Entity>> {
        let started = Instant::now();
        let found = match self.modified.find_first(&self.visible(query, false)) {
            Some(entity) => Some(entity.clone_box()),
            None => self.context.backend.find_first(&self.visible(query, true)),
        };
        self.record_query(query, started, usize::from(found.is_some()));
        found
    }

    /// Returns every visible entity of kind `E` matching `predicate`.
    pub fn find_all_of<E, F>(&self, predicate: F) -> Vec<E>
    where
        E: EntityKind,
        F: Fn(&E) -> bool,
    {
        self.find_all(&TypedQuery::<E, F>::new(predicate))
            .into_iter()
            .filter_map(|entity| downcast_entity::<E>(entity).ok())
            .collect()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Ids pending upsert.
    #[must_use]
    pub fn modified_ids(&self) -> Vec<EntityId> {
        self.modified.ids()
    }

    /// Ids pending removal.
    #[must_use]
    pub fn deleted_ids(&self) -> &BTreeSet<EntityId> {
        &self.deleted
    }

    /// The recorded delta for one entity.
    #[must_use]
    pub fn property_delta(&self, id: &EntityId) -> Option<&PropertyMap> {
        self.properties.get(id)
    }

    /// All recorded deltas.
    #[must_use]
    pub fn property_deltas(&self) -> &PropertyDeltas {
        &self.properties
    }

    // --- lifecycle -------------------------------------------------------

    /// Runs the integrity fixpoint (unless disabled) and applies the
    /// pending changes as one batch.
    ///
    /// Committing an empty transaction only runs the after-commit callbacks.
    /// On failure nothing is written, the pending changes are kept and the
    /// transaction stays active so the caller can inspect or retry.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the transaction is not active,
    /// `IntegrityNotConverged` if repairs do not settle, errors raised by
    /// integrity hooks, or the backend's write error.
    pub fn commit(&mut self) -> StoreResult<()> {
        self.state.ensure_active("commit")?;

        if self.is_empty() {
            run_callbacks(&self.after_commit);
            self.finish(TransactionState::Committed);
            self.context.stats.record_commit();
            tracing::info!(transaction = %self.id, name = %self.name, "committed empty transaction");
            return Ok(());
        }

        self.state = TransactionState::Committing;
        match self.write_pending() {
            Ok(()) => {
                self.finish(TransactionState::Committed);
                self.context.stats.record_commit();
                tracing::info!(transaction = %self.id, name = %self.name, "committed");
                Ok(())
            }
            Err(err) => {
                self.state = TransactionState::Active;
                self.context.stats.record_commit_failure();
                tracing::warn!(transaction = %self.id, name = %self.name, error = %err, "commit failed");
                Err(err)
            }
        }
    }

    /// Discards pending changes and callbacks without touching the backend.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the transaction is not active.
    pub fn rollback(&mut self) -> StoreResult<()> {
        self.state.ensure_active("roll back")?;
        let discarded = self.modified.size() + self.deleted.len();
        self.clear_pending();
        self.after_commit.lock().clear();
        self.finish(TransactionState::RolledBack);
        self.context.stats.record_rollback();
        tracing::info!(transaction = %self.id, name = %self.name, discarded, "rolled back");
        Ok(())
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.context.backend.on_transaction_finished(self.id);
    }

    fn clear_pending(&mut self) {
        self.modified.clear();
        self.deleted.clear();
        self.properties.clear();
    }

    fn write_through(&mut self) -> StoreResult<()> {
        if !self.auto_commit
            || self.ensuring_integrity
            || self.state != TransactionState::Active
        {
            return Ok(());
        }
        self.write_pending()
    }

    /// Runs the fixpoint, writes the batch, publishes its change set and
    /// clears the working set.
    fn write_pending(&mut self) -> StoreResult<()> {
        if self.ensure_integrity_on_commit {
            self.ensure_integrity()?;
        }

        let batch = self.pending_batch();
        let change = self.change_set(&batch);
        let (written, deleted) = (batch.modified.len(), batch.deleted.len());
        let applied = Arc::new(AtomicBool::new(false));
        let signal = Arc::clone(&applied);

        // Apply and publish under one lock so feed order is apply order.
        let sequence = {
            let _commit = self.context.commit_lock.lock();
            self.context
                .backend
                .update(batch, Box::new(move || signal.store(true, Ordering::Release)))?;
            self.context.change_feed.emit(change)
        };
        if applied.load(Ordering::Acquire) {
            run_callbacks(&self.after_commit);
        }
        self.context.stats.record_batch(written, deleted);
        self.clear_pending();
        tracing::info!(transaction = %self.id, written, deleted, %sequence, "batch applied");
        Ok(())
    }

    fn pending_batch(&self) -> ChangeBatch {
        ChangeBatch {
            transaction: self.id,
            modified: self.modified.get_all().map(|entity| entity.clone_box()).collect(),
            deleted: self.deleted.clone(),
            properties: self.properties.clone(),
        }
    }

    /// Builds the downstream view of a batch. Entities without a recorded
    /// delta are sent as full snapshots.
    fn change_set(&self, batch: &ChangeBatch) -> ChangeSet {
        let mut change = ChangeSet::new(self.id, self.name.clone());
        for entity in &batch.modified {
            let mut delta = batch
                .properties
                .get(entity.id())
                .cloned()
                .unwrap_or_else(|| entity.create_properties_map());
            delta.set_type(entity.entity_type());
            delta.set(ID_KEY, entity.id());
            change.updates.insert(entity.id().clone(), delta);
        }
        change.deleted = batch.deleted.clone();
        change
    }

    fn visible<'q>(&'q self, query: &'q dyn Query, committed: bool) -> Visible<'q> {
        Visible {
            query,
            deleted: &self.deleted,
            shadowed_by: committed.then_some(&self.modified),
        }
    }

    fn record_query(&self, query: &dyn Query, started: Instant, matched: usize) {
        self.context.stats.record_query();
        let elapsed = started.elapsed();
        let config = &self.context.config;
        if elapsed > config.slow_query_warn {
            tracing::warn!(query = query.describe(), ?elapsed, matched, "slow query");
        } else if elapsed > config.slow_query_debug {
            tracing::debug!(query = query.describe(), ?elapsed, matched, "slow query");
        }
    }
}

fn run_callbacks(queue: &Mutex<Vec<AfterCommit>>) {
    let pending = std::mem::take(&mut *queue.lock());
    for callback in pending {
        callback();
    }
}

/// Restricts a query to what a transaction can see.
struct Visible<'q> {
    query: &'q dyn Query,
    deleted: &'q BTreeSet<EntityId>,
    shadowed_by: Option<&'q EntityCache>,
}

impl Query for Visible<'_> {
    fn test(&self, entity: &dyn Entity) -> bool {
        let id = entity.id();
        !self.deleted.contains(id)
            && !self
                .shadowed_by
                .is_some_and(|modified| modified.contains_with_id(id))
            && self.query.test(entity)
    }

    fn entity_type(&self) -> Option<EntityType> {
        self.query.entity_type()
    }

    fn test_type(&self, candidate: EntityType) -> bool {
        self.query.test_type(candidate)
    }

    fn describe(&self) -> &'static str {
        self.query.describe()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.state.is_finished() {
            tracing::debug!(transaction = %self.id, name = %self.name, "dropped without commit or rollback");
            self.context.stats.record_rollback();
            self.context.backend.on_transaction_finished(self.id);
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transaction '{}' ({}, {})", self.name, self.id, self.state)?;
        write_ids(f, "modified", &self.modified.ids())?;
        write_ids(f, "deleted", &self.deleted.iter().cloned().collect::<Vec<_>>())
    }
}

fn write_ids(f: &mut fmt::Formatter<'_>, label: &str, ids: &[EntityId]) -> fmt::Result {
    if ids.is_empty() {
        return Ok(());
    }
    if ids.len() > DISPLAYED_IDS {
        return write!(f, " {label}: {} entities", ids.len());
    }
    let joined = ids.iter().map(EntityId::as_str).collect::<Vec<_>>().join(", ");
    write!(f, " {label}: [{joined}]")
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("modified", &self.modified.ids())
            .field("deleted", &self.deleted)
            .field("auto_commit", &self.auto_commit)
            .finish_non_exhaustive()
    }
}
