//! The committed side of the store.
//!
//! A [`Backend`] holds committed entities, answers id and predicate lookups,
//! and applies commit batches atomically. Transactions overlay their
//! uncommitted working set on top of it.

mod memory;

pub use memory::InMemoryBackend;

use crate::entity::{Entity, EntityId, PropertyDeltas};
use crate::error::StoreResult;
use crate::query::Query;
use crate::types::TransactionId;
use std::collections::BTreeSet;

/// Callback run once a batch has been applied.
pub type AfterCommit = Box<dyn FnOnce() + Send>;

/// One atomic unit of upserts and deletions.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    /// The committing transaction.
    pub transaction: TransactionId,
    /// Entities to upsert. Never contains a deleted id.
    pub modified: Vec<Box<dyn Entity>>,
    /// Ids to remove.
    pub deleted: BTreeSet<EntityId>,
    /// Per-entity field deltas for the upserts.
    pub properties: PropertyDeltas,
}

impl ChangeBatch {
    /// Creates an empty batch for a transaction.
    #[must_use]
    pub fn new(transaction: TransactionId) -> Self {
        Self {
            transaction,
            ..Self::default()
        }
    }

    /// Returns true if the batch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Returns the number of upserts plus deletions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modified.len() + self.deleted.len()
    }
}

/// Durable, query-capable store behind transactions.
///
/// Implementations must apply [`Backend::update`] atomically with respect to
/// other updates and reads: no reader may observe part of a batch.
pub trait Backend: Send + Sync {
    /// Returns a copy of the committed entity.
    ///
    /// # Errors
    ///
    /// Returns `EntityDoesNotExist` if there is none.
    fn get_by_id(&self, id: &EntityId) -> StoreResult<Box<dyn Entity>>;

    /// Returns true if a committed entity has this id.
    fn contains_with_id(&self, id: &EntityId) -> bool;

    /// Returns a copy of the first committed entity matching `query`.
    fn find_first(&self, query: &dyn Query) -> Option<Box<dyn Entity>>;

    /// Appends copies of all committed entities matching `query`.
    fn find_all(&self, query: &dyn Query, into: &mut Vec<Box<dyn Entity>>);

    /// Number of committed entities.
    fn size(&self) -> usize;

    /// Applies a batch atomically, then runs `after_commit`.
    ///
    /// `after_commit` must not run unless the whole batch was applied.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the batch could not be applied; nothing from it
    /// may be visible afterwards.
    fn update(&self, batch: ChangeBatch, after_commit: AfterCommit) -> StoreResult<()>;

    /// Fired on every tracked field mutation, before commit.
    fn on_entity_modified(&self) {}

    /// Fired when a transaction is begun.
    fn on_transaction_started(&self, _transaction: TransactionId) {}

    /// Fired when a transaction commits, rolls back or is dropped.
    fn on_transaction_finished(&self, _transaction: TransactionId) {}
}
