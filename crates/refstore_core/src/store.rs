//! The store facade.

use crate::backend::Backend;
use crate::change_feed::{ChangeFeed, ChangeSet};
use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::stats::StoreStats;
use crate::transaction::Transaction;
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// Everything a transaction needs from its store.
///
/// Passed explicitly into every transaction; there is no ambient
/// "current store" or "current transaction".
pub(crate) struct StoreContext {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) change_feed: ChangeFeed,
    pub(crate) stats: StoreStats,
    pub(crate) config: StoreConfig,
    /// Held from backend update through change feed emission.
    pub(crate) commit_lock: Mutex<()>,
}

/// Entry point: begins transactions against one backend.
///
/// # Example
///
/// ```rust,ignore
/// use refstore_core::{InMemoryBackend, Store, StoreConfig};
/// use std::sync::Arc;
///
/// let store = Store::new(StoreConfig::default(), Arc::new(InMemoryBackend::new()));
///
/// store.transaction("create customer", |txn| {
///     txn.persist(&Customer::new("Ada"))
/// })?;
/// ```
pub struct Store {
    context: Arc<StoreContext>,
    next_transaction: AtomicU64,
}

impl Store {
    /// Creates a store over `backend`.
    pub fn new(config: StoreConfig, backend: Arc<dyn Backend>) -> Self {
        let change_feed = ChangeFeed::with_max_history(config.change_feed_history);
        Self {
            context: Arc::new(StoreContext {
                backend,
                change_feed,
                stats: StoreStats::new(),
                config,
                commit_lock: Mutex::new(()),
            }),
            next_transaction: AtomicU64::new(1),
        }
    }

    /// Begins a named transaction.
    pub fn begin(&self, name: impl Into<String>) -> Transaction {
        let id = TransactionId::new(self.next_transaction.fetch_add(1, Ordering::SeqCst));
        Transaction::new(id, name.into(), Arc::clone(&self.context))
    }

    /// Runs `f` in a new transaction, committing if it returns `Ok` and
    /// rolling back otherwise.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or the commit error.
    pub fn transaction<F, T>(&self, name: impl Into<String>, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> StoreResult<T>,
    {
        let mut txn = self.begin(name);
        match f(&mut txn) {
            Ok(result) => {
                txn.commit()?;
                Ok(result)
            }
            Err(e) => {
                // Try to roll back, but don't mask the original error
                let _ = txn.rollback();
                Err(e)
            }
        }
    }

    /// Subscribes to committed change sets.
    pub fn subscribe(&self) -> Receiver<ChangeSet> {
        self.context.change_feed.subscribe()
    }

    /// Returns the change feed, e.g. to poll its history.
    pub fn change_feed(&self) -> &ChangeFeed {
        &self.context.change_feed
    }

    /// Returns the store statistics.
    pub fn stats(&self) -> &StoreStats {
        &self.context.stats
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.context.config
    }

    /// Returns the backend.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.context.backend
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.context.config)
            .field("stats", &self.context.stats.snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::error::StoreError;

    fn store() -> Store {
        Store::new(StoreConfig::default(), Arc::new(InMemoryBackend::new()))
    }

    #[test]
    fn transaction_ids_increase() {
        let store = store();
        let a = store.begin("a");
        let b = store.begin("b");
        assert!(a.id() < b.id());
        assert_eq!(b.name(), "b");
    }

    #[test]
    fn new_transactions_inherit_config() {
        let config = StoreConfig::new()
            .auto_commit(true)
            .ensure_integrity_on_commit(false);
        let store = Store::new(config, Arc::new(InMemoryBackend::new()));
        let txn = store.begin("inherit");
        assert!(txn.is_auto_commit());
        assert!(!txn.ensures_integrity_on_commit());
    }

    #[test]
    fn transaction_helper_rolls_back_on_error() {
        let store = store();
        let err = store
            .transaction("fails", |_txn| -> StoreResult<()> {
                Err(StoreError::illegal_state("nope"))
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::IllegalState { .. }));

        let stats = store.stats().snapshot();
        assert_eq!(stats.transactions_rolled_back, 1);
        assert_eq!(stats.transactions_committed, 0);
    }

    #[test]
    fn transaction_helper_commits_on_ok() {
        let store = store();
        let value = store.transaction("ok", |_txn| Ok(42)).unwrap();
        assert_eq!(value, 42);
        assert_eq!(store.stats().transactions_committed(), 1);
    }
}
