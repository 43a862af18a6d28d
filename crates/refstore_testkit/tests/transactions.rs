//! Integration tests for the transaction lifecycle, overlay reads, deltas
//! and the change feed.

use refstore_core::{
    AllOfType, Backend, Entity, EntityId, EntityKind, Identity, InMemoryBackend, PropertyMap, SequenceNumber,
    Store, StoreConfig, StoreError, TransactionState, TYPE_KEY,
};
use refstore_testkit::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn id(s: &str) -> EntityId {
    EntityId::from(s)
}

#[test]
fn ids_are_stable_and_set_once() {
    let customer = Customer::default();
    let first = customer.id().clone();
    assert_eq!(customer.id(), &first);
    assert!(matches!(
        customer.set_id(id("other")),
        Err(StoreError::IllegalState { .. })
    ));

    let fresh = Identity::new();
    fresh.set_id("c9").unwrap();
    assert!(fresh.set_id("c10").is_err());
    assert_eq!(fresh.id().as_str(), "c9");
}

#[test]
fn empty_commit_never_writes() {
    let backend = Arc::new(RecordingBackend::default());
    let store = Store::new(StoreConfig::default(), backend.clone());
    let ran = Arc::new(AtomicBool::new(false));

    let mut txn = store.begin("empty");
    let flag = Arc::clone(&ran);
    txn.run_after_commit(move || flag.store(true, Ordering::SeqCst));
    txn.commit().unwrap();

    assert!(ran.load(Ordering::SeqCst));
    assert!(backend.batches().is_empty());
    assert_eq!(backend.finished(), vec![txn.id()]);
    assert_eq!(store.change_feed().history_len(), 0);
}

#[test]
fn reads_see_uncommitted_writes() {
    let store = TestStore::new();
    let mut txn = store.begin("read your writes");
    let customer = Customer::new("c1", "Ada");

    txn.persist(&customer).unwrap();

    let read = txn.get::<Customer>(&id("c1")).unwrap();
    assert_eq!(read.name, "Ada");
    assert!(txn.contains_with_id(&id("c1")));
    assert!(!store.is_committed("c1"));

    let other = store.begin("isolated");
    assert!(other.get_by_id(&id("c1")).unwrap_err().is_not_found());
}

#[test]
fn deleted_wins_over_modified() {
    let store = TestStore::with_entities(vec![boxed(Customer::new("c1", "Ada"))]);
    let mut txn = store.begin("deleted wins");

    let mut customer = txn.get::<Customer>(&id("c1")).unwrap();
    customer.name = "Grace".into();
    txn.modified(&mut customer, "name", "Grace").unwrap();
    txn.delete(&id("c1")).unwrap();

    assert!(txn.get_by_id(&id("c1")).unwrap_err().is_not_found());
    assert!(!txn.contains_with_id(&id("c1")));
    assert!(txn.find_all(&AllOfType::of::<Customer>()).is_empty());
    assert!(txn.modified_ids().is_empty());
    assert!(txn.property_delta(&id("c1")).is_none());

    // Further modifications of the deleted entity are dropped.
    txn.modified(&mut customer, "name", "Linus").unwrap();
    assert!(txn.modified_ids().is_empty());
    assert!(matches!(
        txn.persist(&customer),
        Err(StoreError::IllegalState { .. })
    ));
}

#[test]
fn field_deltas_are_minimal_and_persist_is_full() {
    let backend = Arc::new(RecordingBackend::with_entities(vec![
        boxed(Customer::new("c1", "Ada")),
        boxed(Order::new("o1", Some("c1"))),
    ]));
    let store = Store::new(StoreConfig::default(), backend.clone());
    let mut txn = store.begin("deltas");

    let mut order = txn.get::<Order>(&id("o1")).unwrap();
    order.number = "2024-7".into();
    txn.modified(&mut order, "number", "2024-7").unwrap();
    txn.persist(&Customer::new("c2", "Ada")).unwrap();
    txn.commit().unwrap();

    let batch = backend.last_batch().unwrap();
    let order_delta = &batch.properties[&id("o1")];
    assert_eq!(order_delta.len(), 2);
    assert_eq!(order_delta.get_str("number"), Some("2024-7"));
    assert!(!order_delta.contains(CUSTOMER_ID));

    let customer_delta = &batch.properties[&id("c2")];
    assert_eq!(customer_delta.type_tag(), Some("Customer"));
    assert_eq!(customer_delta.get_str("name"), Some("Ada"));
}

#[test]
fn backend_failure_keeps_pending_changes() {
    let backend = Arc::new(FailingBackend::new(
        1,
        vec![boxed(Customer::new("c1", "Ada"))],
    ));
    let store = Store::new(StoreConfig::default(), backend.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut txn = store.begin("flaky");
    txn.persist(&Customer::new("c2", "Grace")).unwrap();
    txn.delete(&id("c1")).unwrap();
    let counter = Arc::clone(&calls);
    txn.run_after_commit(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let err = txn.commit().unwrap_err();
    assert!(matches!(err, StoreError::Backend { .. }));
    assert_eq!(txn.state(), TransactionState::Active);
    assert_eq!(txn.modified_ids(), vec![id("c2")]);
    assert!(txn.is_deleted(&id("c1")));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(backend.inner().contains_with_id(&id("c1")));
    assert!(store.change_feed().poll(SequenceNumber::default(), 10).is_empty());

    txn.commit().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!backend.inner().contains_with_id(&id("c1")));
    assert!(backend.inner().contains_with_id(&id("c2")));
}

#[test]
fn finished_transactions_reject_everything() {
    let store = TestStore::new();

    let mut committed = store.begin("committed");
    committed.persist(&Customer::new("c1", "Ada")).unwrap();
    committed.commit().unwrap();
    assert!(committed.commit().is_err());
    assert!(committed.rollback().is_err());
    assert!(committed.delete(&id("c1")).is_err());

    let mut rolled_back = store.begin("rolled back");
    rolled_back.rollback().unwrap();
    assert!(rolled_back.commit().is_err());
    assert!(rolled_back.rollback().is_err());
    assert_eq!(rolled_back.state(), TransactionState::RolledBack);
}

#[test]
fn auto_commit_writes_each_change() {
    let backend = Arc::new(RecordingBackend::default());
    let config = StoreConfig::default().auto_commit(true);
    let store = Store::new(config, backend.clone());
    let feed = store.subscribe();

    let mut txn = store.begin("auto");
    let mut customer = Customer::new("c1", "Ada");
    txn.persist(&customer).unwrap();
    customer.name = "Grace".into();
    txn.modified(&mut customer, "name", "Grace").unwrap();
    txn.delete(&id("c1")).unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    txn.run_after_commit(move || flag.store(true, Ordering::SeqCst));
    assert!(ran.load(Ordering::SeqCst));

    let batches = backend.batches();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[1].properties[&id("c1")].len(), 2);
    assert!(batches[2].deleted.contains(&id("c1")));
    assert!(txn.is_empty());
    assert_eq!(feed.try_iter().count(), 3);

    txn.commit().unwrap();
    assert_eq!(backend.batches().len(), 3);
}

#[test]
fn auto_commit_still_repairs_references() {
    let store = TestStore::with_config(
        StoreConfig::default().auto_commit(true),
        vec![boxed(Customer::new("c1", "Ada"))],
    );

    let mut txn = store.begin("auto repair");
    txn.delete(&id("c1")).unwrap();
    txn.persist(&Order::new("o1", Some("c1"))).unwrap();

    assert_eq!(store.committed::<Order>("o1").customer_id, None);
}

#[test]
fn ignored_modifications_are_not_recorded() {
    let store = TestStore::with_entities(vec![boxed(Customer::new("c1", "Ada"))]);
    let mut txn = store.begin("bulk load");
    txn.set_ignore_modifications(true);

    let mut customer = txn.get::<Customer>(&id("c1")).unwrap();
    txn.modified(&mut customer, "name", "Grace").unwrap();
    assert!(txn.is_empty());
    assert!(!store.backend.is_dirty());

    txn.set_ignore_modifications(false);
    txn.modified(&mut customer, "name", "Grace").unwrap();
    assert_eq!(txn.modified_ids(), vec![id("c1")]);
    assert!(store.backend.is_dirty());
}

#[test]
fn change_sets_carry_type_and_id() {
    let store = TestStore::with_entities(vec![
        boxed(Customer::new("c1", "Ada")),
        boxed(Order::new("o1", Some("c1"))),
    ]);
    let feed = store.subscribe();

    store
        .transaction("delete customer", |txn| txn.delete(&id("c1")))
        .unwrap();

    let change = feed.try_recv().unwrap();
    assert_eq!(change.name, "delete customer");
    assert_eq!(change.sequence, SequenceNumber::new(1));
    assert!(change.deleted.contains(&id("c1")));

    let order = &change.updates[&id("o1")];
    assert_eq!(order.get_str(TYPE_KEY), Some("Order"));
    assert_eq!(order.id(), Some("o1"));
    assert_eq!(order.get(CUSTOMER_ID), Some(&None));

    let json = serde_json::to_value(&change).unwrap();
    assert_eq!(json["updates"]["o1"]["@type"], "Order");
    assert_eq!(json["deleted"][0], "c1");
}

#[test]
fn rollback_publishes_nothing() {
    let store = TestStore::new();
    let feed = store.subscribe();

    let mut txn = store.begin("discard");
    txn.persist(&Customer::new("c1", "Ada")).unwrap();
    txn.rollback().unwrap();

    assert!(feed.try_recv().is_err());
    assert_eq!(store.backend.size(), 0);
    assert!(store.backend.active_transactions().is_empty());
}

#[test]
fn after_commit_sees_applied_batch() {
    let backend = Arc::new(InMemoryBackend::new());
    let store = Store::new(StoreConfig::default(), backend.clone());
    let seen = Arc::new(AtomicBool::new(false));

    let mut txn = store.begin("callback");
    txn.persist(&Customer::new("c1", "Ada")).unwrap();
    let committed = Arc::clone(&backend);
    let flag = Arc::clone(&seen);
    txn.run_after_commit(move || {
        flag.store(committed.contains_with_id(&EntityId::from("c1")), Ordering::SeqCst);
    });
    txn.commit().unwrap();

    assert!(seen.load(Ordering::SeqCst));
}

#[test]
fn received_entities_bypass_the_change_feed() {
    let store = TestStore::new();
    let feed = store.subscribe();
    let registry = fixture_registry();

    let snapshots: Vec<PropertyMap> = vec![
        [("@type", "Customer"), ("id", "c1"), ("name", "Ada")]
            .into_iter()
            .collect(),
        [("@type", "Order"), ("id", "o1"), (CUSTOMER_ID, "c1")]
            .into_iter()
            .collect(),
    ];
    assert_eq!(store.backend.receive_entities(&snapshots, &registry).unwrap(), 2);
    assert!(feed.try_recv().is_err());
    assert_eq!(store.committed::<Order>("o1").customer_id, Some(id("c1")));

    store.backend.receive_deletions([&id("c1")]);
    assert!(!store.is_committed("c1"));
}

#[test]
fn change_feed_follows_apply_order() {
    let store = Arc::new(TestStore::with_entities(vec![boxed(Customer::new("c1", "Ada"))]));
    let writers: Vec<_> = (0..4)
        .map(|w| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for round in 0..50 {
                    let mut txn = store.begin(format!("rename {w}"));
                    let mut customer = txn.get::<Customer>(&id("c1")).unwrap();
                    customer.name = format!("w{w}_{round}");
                    let name = customer.name.clone();
                    txn.modified(&mut customer, "name", name).unwrap();
                    txn.commit().unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    let changes = store.change_feed().poll(SequenceNumber::default(), usize::MAX);
    assert_eq!(changes.len(), 200);
    assert!(changes.windows(2).all(|pair| pair[0].sequence < pair[1].sequence));

    // A replica applying deltas in sequence order ends where the backend did.
    let mut replica = None;
    for change in &changes {
        if let Some(name) = change.updates[&id("c1")].get_str("name") {
            replica = Some(name.to_owned());
        }
    }
    assert_eq!(replica, Some(store.committed::<Customer>("c1").name));
}

#[test]
fn concurrent_commits_are_atomic_for_readers() {
    let store = Arc::new(TestStore::new());
    let writers: Vec<_> = (0..4)
        .map(|w| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for round in 0..25 {
                    let mut txn = store.begin(format!("writer {w}"));
                    let customer = format!("c{w}_{round}");
                    txn.persist(&Customer::new(&customer, "x")).unwrap();
                    txn.persist(&Order::new(&format!("o{w}_{round}"), Some(customer.as_str())))
                        .unwrap();
                    txn.commit().unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for _ in 0..200 {
                let counts = store.backend.count_entities();
                let customers = counts.get(&Customer::ENTITY_TYPE).copied().unwrap_or(0);
                let orders = counts.get(&Order::ENTITY_TYPE).copied().unwrap_or(0);
                assert_eq!(customers, orders, "observed a half-applied batch");
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(store.backend.size(), 200);
    let stats = store.stats().snapshot();
    assert_eq!(stats.transactions_committed, 100);
    assert_eq!(stats.entities_written, 200);
    assert_eq!(store.change_feed().latest_sequence(), SequenceNumber::new(100));
}
