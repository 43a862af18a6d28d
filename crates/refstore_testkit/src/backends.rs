//! Instrumented backends.
//!
//! Both wrap an [`InMemoryBackend`] and delegate reads to it.

use parking_lot::Mutex;
use refstore_core::{
    AfterCommit, Backend, ChangeBatch, Entity, EntityId, InMemoryBackend, PropertyDeltas, Query,
    StoreError, StoreResult, TransactionId,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

/// What a [`RecordingBackend`] saw in one `update` call.
#[derive(Debug, Clone)]
pub struct RecordedBatch {
    /// The committing transaction.
    pub transaction: TransactionId,
    /// Upserted ids, sorted.
    pub modified: Vec<EntityId>,
    /// Removed ids.
    pub deleted: BTreeSet<EntityId>,
    /// Deltas as handed over.
    pub properties: PropertyDeltas,
}

/// Records every batch and lifecycle notification.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    inner: InMemoryBackend,
    batches: Mutex<Vec<RecordedBatch>>,
    finished: Mutex<Vec<TransactionId>>,
    modifications: AtomicUsize,
}

impl RecordingBackend {
    /// Creates a backend with committed entities.
    pub fn with_entities(entities: Vec<Box<dyn Entity>>) -> Self {
        Self {
            inner: InMemoryBackend::with_entities(entities),
            ..Self::default()
        }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &InMemoryBackend {
        &self.inner
    }

    /// Batches received so far.
    pub fn batches(&self) -> Vec<RecordedBatch> {
        self.batches.lock().clone()
    }

    /// The most recent batch.
    pub fn last_batch(&self) -> Option<RecordedBatch> {
        self.batches.lock().last().cloned()
    }

    /// Transactions reported finished, in order.
    pub fn finished(&self) -> Vec<TransactionId> {
        self.finished.lock().clone()
    }

    /// Number of dirty notifications.
    pub fn modifications(&self) -> usize {
        self.modifications.load(Ordering::SeqCst)
    }
}

impl Backend for RecordingBackend {
    fn get_by_id(&self, id: &EntityId) -> StoreResult<Box<dyn Entity>> {
        self.inner.get_by_id(id)
    }

    fn contains_with_id(&self, id: &EntityId) -> bool {
        self.inner.contains_with_id(id)
    }

    fn find_first(&self, query: &dyn Query) -> Option<Box<dyn Entity>> {
        self.inner.find_first(query)
    }

    fn find_all(&self, query: &dyn Query, into: &mut Vec<Box<dyn Entity>>) {
        self.inner.find_all(query, into);
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn update(&self, batch: ChangeBatch, after_commit: AfterCommit) -> StoreResult<()> {
        let mut modified: Vec<EntityId> = batch.modified.iter().map(|e| e.id().clone()).collect();
        modified.sort();
        self.batches.lock().push(RecordedBatch {
            transaction: batch.transaction,
            modified,
            deleted: batch.deleted.clone(),
            properties: batch.properties.clone(),
        });
        self.inner.update(batch, after_commit)
    }

    fn on_entity_modified(&self) {
        self.modifications.fetch_add(1, Ordering::SeqCst);
        self.inner.on_entity_modified();
    }

    fn on_transaction_started(&self, transaction: TransactionId) {
        self.inner.on_transaction_started(transaction);
    }

    fn on_transaction_finished(&self, transaction: TransactionId) {
        self.finished.lock().push(transaction);
        self.inner.on_transaction_finished(transaction);
    }
}

/// Rejects a configurable number of updates without applying them.
#[derive(Debug, Default)]
pub struct FailingBackend {
    inner: InMemoryBackend,
    failures_left: AtomicUsize,
    rejected: AtomicUsize,
}

impl FailingBackend {
    /// Creates a backend whose next `failures` updates fail.
    pub fn new(failures: usize, entities: Vec<Box<dyn Entity>>) -> Self {
        Self {
            inner: InMemoryBackend::with_entities(entities),
            failures_left: AtomicUsize::new(failures),
            rejected: AtomicUsize::new(0),
        }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &InMemoryBackend {
        &self.inner
    }

    /// Number of updates rejected so far.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

impl Backend for FailingBackend {
    fn get_by_id(&self, id: &EntityId) -> StoreResult<Box<dyn Entity>> {
        self.inner.get_by_id(id)
    }

    fn contains_with_id(&self, id: &EntityId) -> bool {
        self.inner.contains_with_id(id)
    }

    fn find_first(&self, query: &dyn Query) -> Option<Box<dyn Entity>> {
        self.inner.find_first(query)
    }

    fn find_all(&self, query: &dyn Query, into: &mut Vec<Box<dyn Entity>>) {
        self.inner.find_all(query, into);
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn update(&self, batch: ChangeBatch, after_commit: AfterCommit) -> StoreResult<()> {
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if fail {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::backend(format!(
                "injected failure for {} ({} changes)",
                batch.transaction,
                batch.len()
            )));
        }
        self.inner.update(batch, after_commit)
    }

    fn on_entity_modified(&self) {
        self.inner.on_entity_modified();
    }

    fn on_transaction_started(&self, transaction: TransactionId) {
        self.inner.on_transaction_started(transaction);
    }

    fn on_transaction_finished(&self, transaction: TransactionId) {
        self.inner.on_transaction_finished(transaction);
    }
}
