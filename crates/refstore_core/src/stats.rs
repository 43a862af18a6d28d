//! Store statistics.
//!
//! Counters are atomic and can be read while transactions are in flight.
//!
//! ```rust,ignore
//! let stats = store.stats().snapshot();
//! println!("commits: {}", stats.transactions_committed);
//! println!("fixpoint passes: {}", stats.integrity_passes);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Store statistics.
#[derive(Debug, Default)]
pub struct StoreStats {
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
    commit_failures: AtomicU64,

    /// Completed integrity passes, restarted ones included.
    integrity_passes: AtomicU64,
    integrity_restarts: AtomicU64,

    entities_written: AtomicU64,
    entities_deleted: AtomicU64,

    queries: AtomicU64,
    modifications: AtomicU64,
}

impl StoreStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_batch(&self, written: usize, deleted: usize) {
        self.entities_written
            .fetch_add(written as u64, Ordering::Relaxed);
        self.entities_deleted
            .fetch_add(deleted as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit_failure(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_integrity_pass(&self) {
        self.integrity_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_integrity_restart(&self) {
        self.integrity_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_modification(&self) {
        self.modifications.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of transactions started.
    pub fn transactions_started(&self) -> u64 {
        self.transactions_started.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions committed, empty ones included.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions rolled back.
    pub fn transactions_rolled_back(&self) -> u64 {
        self.transactions_rolled_back.load(Ordering::Relaxed)
    }

    /// Returns the number of commits that failed.
    pub fn commit_failures(&self) -> u64 {
        self.commit_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of integrity passes run.
    pub fn integrity_passes(&self) -> u64 {
        self.integrity_passes.load(Ordering::Relaxed)
    }

    /// Returns the number of integrity passes abandoned for a restart.
    pub fn integrity_restarts(&self) -> u64 {
        self.integrity_restarts.load(Ordering::Relaxed)
    }

    /// Returns the number of entities upserted by commits.
    pub fn entities_written(&self) -> u64 {
        self.entities_written.load(Ordering::Relaxed)
    }

    /// Returns the number of entities removed by commits.
    pub fn entities_deleted(&self) -> u64 {
        self.entities_deleted.load(Ordering::Relaxed)
    }

    /// Returns the number of queries evaluated through transactions.
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Returns the number of tracked field modifications.
    pub fn modifications(&self) -> u64 {
        self.modifications.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started(),
            transactions_committed: self.transactions_committed(),
            transactions_rolled_back: self.transactions_rolled_back(),
            commit_failures: self.commit_failures(),
            integrity_passes: self.integrity_passes(),
            integrity_restarts: self.integrity_restarts(),
            entities_written: self.entities_written(),
            entities_deleted: self.entities_deleted(),
            queries: self.queries(),
            modifications: self.modifications(),
        }
    }
}

/// A point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Transactions started.
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions rolled back.
    pub transactions_rolled_back: u64,
    /// Failed commits.
    pub commit_failures: u64,
    /// Integrity passes run.
    pub integrity_passes: u64,
    /// Integrity passes restarted.
    pub integrity_restarts: u64,
    /// Entities upserted.
    pub entities_written: u64,
    /// Entities removed.
    pub entities_deleted: u64,
    /// Queries evaluated.
    pub queries: u64,
    /// Tracked field modifications.
    pub modifications: u64,
}
