//! Change feed for observing committed change sets.
//!
//! Every successful commit, auto-commit writes included, publishes one
//! [`ChangeSet`]. Nothing is published for rolled back or failed commits.
//!
//! # Usage
//!
//! ```rust,ignore
//! let receiver = store.subscribe();
//!
//! std::thread::spawn(move || {
//!     while let Ok(change) = receiver.recv() {
//!         println!("{} updated, {} deleted", change.updates.len(), change.deleted.len());
//!     }
//! });
//! ```

use crate::entity::{EntityId, PropertyMap};
use crate::types::{SequenceNumber, TransactionId};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// The downstream view of one committed batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    /// Position in the feed, assigned on emission.
    pub sequence: SequenceNumber,
    /// The committing transaction.
    pub transaction: TransactionId,
    /// The transaction's name.
    pub name: String,
    /// Upserts. Every map carries `@type` and `id`.
    pub updates: BTreeMap<EntityId, PropertyMap>,
    /// Removed ids.
    pub deleted: BTreeSet<EntityId>,
}

impl ChangeSet {
    /// Creates an unsequenced change set.
    pub fn new(transaction: TransactionId, name: impl Into<String>) -> Self {
        Self {
            sequence: SequenceNumber::default(),
            transaction,
            name: name.into(),
            updates: BTreeMap::new(),
            deleted: BTreeSet::new(),
        }
    }

    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deleted.is_empty()
    }
}

/// Distributes committed change sets to subscribers.
///
/// Preserves commit order, supports multiple subscribers and keeps a
/// bounded history for polling.
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<ChangeSet>>>,
    history: RwLock<Vec<ChangeSet>>,
    max_history: usize,
    last_sequence: AtomicU64,
}

impl ChangeFeed {
    /// Creates a new change feed.
    pub fn new() -> Self {
        Self::with_max_history(10_000)
    }

    /// Creates a change feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
            last_sequence: AtomicU64::new(0),
        }
    }

    /// Subscribes to the change feed.
    ///
    /// The receiver gets every change set emitted after this call.
    pub fn subscribe(&self) -> Receiver<ChangeSet> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Assigns the next sequence number and publishes the change set.
    pub fn emit(&self, mut change: ChangeSet) -> SequenceNumber {
        // Sequence assignment and delivery happen under the history lock so
        // subscribers observe sequences in order.
        let mut history = self.history.write();
        let sequence = SequenceNumber::new(self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1);
        change.sequence = sequence;

        self.subscribers
            .write()
            .retain(|tx| tx.send(change.clone()).is_ok());

        history.push(change);
        if history.len() > self.max_history {
            let to_remove = history.len() - self.max_history;
            history.drain(0..to_remove);
        }
        sequence
    }

    /// Returns change sets with sequence > `cursor`, up to `limit`.
    pub fn poll(&self, cursor: SequenceNumber, limit: usize) -> Vec<ChangeSet> {
        self.history
            .read()
            .iter()
            .filter(|change| change.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the last sequence number assigned, even if its change set
    /// has already left the history.
    pub fn latest_sequence(&self) -> SequenceNumber {
        SequenceNumber::new(self.last_sequence.load(Ordering::SeqCst))
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of change sets in history.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscriber_count())
            .field("history", &self.history_len())
            .field("max_history", &self.max_history)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn change(txn: u64, deleted: &str) -> ChangeSet {
        let mut change = ChangeSet::new(TransactionId::new(txn), "test");
        change.deleted.insert(EntityId::from(deleted));
        change
    }

    #[test]
    fn emit_and_receive() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();

        let sequence = feed.emit(change(1, "a"));

        let received = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(received.sequence, sequence);
        assert!(received.deleted.contains("a"));
    }

    #[test]
    fn multiple_subscribers() {
        let feed = ChangeFeed::new();
        let rx1 = feed.subscribe();
        let rx2 = feed.subscribe();

        feed.emit(change(1, "a"));

        assert_eq!(rx1.recv().unwrap(), rx2.recv().unwrap());
    }

    #[test]
    fn disconnected_subscriber_removed() {
        let feed = ChangeFeed::new();
        let rx1 = feed.subscribe();
        {
            let _rx2 = feed.subscribe();
        }
        assert_eq!(feed.subscriber_count(), 2);

        feed.emit(change(1, "a"));

        assert_eq!(feed.subscriber_count(), 1);
        assert!(rx1.recv().is_ok());
    }

    #[test]
    fn poll_from_cursor() {
        let feed = ChangeFeed::new();
        for txn in 1..=5 {
            feed.emit(change(txn, "x"));
        }

        let changes = feed.poll(SequenceNumber::new(2), 10);
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].sequence, SequenceNumber::new(3));
        assert_eq!(feed.poll(SequenceNumber::new(0), 2).len(), 2);
    }

    #[test]
    fn history_limit() {
        let feed = ChangeFeed::with_max_history(3);
        for txn in 1..=5 {
            feed.emit(change(txn, "x"));
        }

        assert_eq!(feed.history_len(), 3);
        assert_eq!(feed.latest_sequence(), SequenceNumber::new(5));
        let changes = feed.poll(SequenceNumber::new(0), 10);
        assert_eq!(changes[0].sequence, SequenceNumber::new(3));
    }

    #[test]
    fn sequences_advance_without_history() {
        let feed = ChangeFeed::with_max_history(0);
        let rx = feed.subscribe();

        let first = feed.emit(change(1, "a"));
        let second = feed.emit(change(2, "b"));

        assert_eq!(first, SequenceNumber::new(1));
        assert_eq!(second, SequenceNumber::new(2));
        assert_eq!(feed.history_len(), 0);
        assert_eq!(feed.latest_sequence(), SequenceNumber::new(2));
        assert!(feed.poll(SequenceNumber::default(), 10).is_empty());
        let received: Vec<u64> = rx.try_iter().map(|c| c.sequence.as_u64()).collect();
        assert_eq!(received, vec![1, 2]);
    }

    #[test]
    fn concurrent_emitters_get_distinct_sequences() {
        let feed = Arc::new(ChangeFeed::new());
        let rx = feed.subscribe();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let feed = Arc::clone(&feed);
                thread::spawn(move || {
                    for i in 0..25 {
                        feed.emit(change(t * 100 + i, "x"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let sequences: Vec<u64> = rx.try_iter().map(|c| c.sequence.as_u64()).collect();
        assert_eq!(sequences, (1..=100).collect::<Vec<_>>());
    }

    #[test]
    fn change_set_serializes_to_json() {
        let mut change = ChangeSet::new(TransactionId::new(4), "rename");
        let mut props = PropertyMap::for_id(&EntityId::from("o1"));
        props.set("customerId", None::<&str>);
        change.updates.insert(EntityId::from("o1"), props);

        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["transaction"], 4);
        assert_eq!(json["updates"]["o1"]["id"], "o1");
        assert!(json["updates"]["o1"]["customerId"].is_null());
    }
}
