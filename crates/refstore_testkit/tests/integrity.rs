//! Integration tests for the integrity fixpoint and cascade repair.

use proptest::prelude::*;
use refstore_core::{
    AllOfType, Backend, Entity, EntityId, Query, ReferencesQuery, Store, StoreConfig, StoreError,
    TypedQuery,
};
use refstore_testkit::prelude::*;
use std::sync::Arc;

fn id(s: &str) -> EntityId {
    EntityId::from(s)
}

#[test]
fn deleting_a_customer_clears_order_reference() {
    let backend = Arc::new(RecordingBackend::with_entities(vec![
        boxed(Customer::new("c1", "Ada")),
        boxed(Order::new("o1", Some("c1"))),
    ]));
    let store = Store::new(StoreConfig::default(), backend.clone());

    let mut txn = store.begin("delete customer");
    txn.delete(&id("c1")).unwrap();
    txn.commit().unwrap();

    let batch = backend.last_batch().unwrap();
    assert_eq!(batch.deleted.iter().collect::<Vec<_>>(), vec![&id("c1")]);
    assert_eq!(batch.modified, vec![id("o1")]);

    let delta = &batch.properties[&id("o1")];
    assert_eq!(delta.get(CUSTOMER_ID), Some(&None));
    assert_eq!(delta.id(), Some("o1"));
    assert_eq!(delta.len(), 2);

    let order = backend.inner().get_by_id(&id("o1")).unwrap();
    assert!(order.referenced_ids().is_empty());
}

#[test]
fn cascade_reaches_uncommitted_referrers() {
    let store = TestStore::with_entities(vec![boxed(Customer::new("c1", "Ada"))]);

    let mut txn = store.begin("new order, old customer");
    txn.persist(&Order::new("o1", Some("c1"))).unwrap();
    txn.delete(&id("c1")).unwrap();
    txn.commit().unwrap();

    assert!(!store.is_committed("c1"));
    assert_eq!(store.committed::<Order>("o1").customer_id, None);
}

#[test]
fn deleting_an_order_removes_its_lines() {
    let store = scenarios::order_book(1, 2);

    store
        .transaction("drop order", |txn| txn.delete(&id("o0_0")))
        .unwrap();

    assert!(!store.is_committed("o0_0"));
    assert!(!store.is_committed("l0_0"));
    assert!(store.is_committed("o0_1"));
    assert!(store.is_committed("l0_1"));
}

#[test]
fn chain_collapses_in_one_commit() {
    let store = scenarios::chain_store(3);

    let mut txn = store.begin("collapse");
    txn.delete(&id("n0")).unwrap();
    txn.commit().unwrap();

    assert_eq!(store.backend.size(), 0);
    assert_eq!(store.backend.batches_applied(), 1);
    assert!(store.stats().integrity_restarts() >= 2);
}

#[test]
fn long_chain_collapses_within_pass_ceiling() {
    let store = scenarios::chain_store(200);

    let mut txn = store.begin("collapse");
    txn.delete(&id("n0")).unwrap();
    txn.commit().unwrap();

    assert_eq!(store.backend.size(), 0);
    assert_eq!(store.backend.batches_applied(), 1);
    assert_eq!(store.stats().integrity_restarts(), 199);
    let event = store.change_feed().poll(Default::default(), 1).pop().unwrap();
    assert_eq!(event.deleted.len(), 200);
}

#[test]
fn deleting_mid_chain_keeps_the_head() {
    let store = scenarios::chain_store(5);

    store
        .transaction("cut", |txn| txn.delete(&id("n2")))
        .unwrap();

    assert!(store.is_committed("n0"));
    assert!(store.is_committed("n1"));
    for gone in ["n2", "n3", "n4"] {
        assert!(!store.is_committed(gone), "{gone} survived");
    }
}

#[test]
fn rivals_never_converge_and_nothing_is_written() {
    let (a, b) = Rival::pair("a", "b");
    let backend = Arc::new(RecordingBackend::default());
    let config = StoreConfig::default().max_integrity_passes(8);
    let store = Store::new(config, backend.clone());

    let mut txn = store.begin("rivals");
    txn.persist(&a).unwrap();
    txn.persist(&b).unwrap();
    let err = txn.commit().unwrap_err();

    assert_eq!(err, StoreError::IntegrityNotConverged { passes: 8 });
    assert!(backend.batches().is_empty());
    assert_eq!(backend.inner().size(), 0);
    assert!(store.change_feed().poll(Default::default(), 10).is_empty());
    assert_eq!(store.stats().commit_failures(), 1);
}

#[test]
fn missing_master_without_repair_aborts_commit() {
    let store = TestStore::with_entities(vec![
        boxed(Order::new("o1", None)),
        boxed(Attachment::new("a1", "o1")),
    ]);

    let mut txn = store.begin("orphan");
    txn.delete(&id("o1")).unwrap();
    let err = txn.commit().unwrap_err();

    assert!(matches!(err, StoreError::MissingMaster { ref id, .. } if id.as_str() == "a1"));
    assert!(store.is_committed("o1"));
    assert!(txn.is_active());

    txn.rollback().unwrap();
}

#[test]
fn integrity_can_be_skipped_per_transaction() {
    let store = TestStore::with_entities(vec![
        boxed(Customer::new("c1", "Ada")),
        boxed(Order::new("o1", Some("c1"))),
    ]);

    let mut txn = store.begin("raw delete");
    txn.set_ensure_integrity_on_commit(false);
    txn.delete(&id("c1")).unwrap();
    txn.commit().unwrap();

    assert_eq!(store.committed::<Order>("o1").customer_id, Some(id("c1")));
}

#[test]
fn referrers_are_found_by_query() {
    let store = scenarios::order_book(2, 2);
    let txn = store.begin("query");

    let referrers = ReferencesQuery::new("c1").list(&txn);
    let mut ids: Vec<_> = referrers.iter().map(|e| e.id().clone()).collect();
    ids.sort();
    assert_eq!(ids, vec![id("o1_0"), id("o1_1")]);

    let lines = TypedQuery::new(|line: &OrderLine| line.product == "widget").list(&txn);
    assert_eq!(lines.len(), 4);
    assert!(AllOfType::of::<Rival>().get_first(&txn).is_none());
}

proptest! {
    #[test]
    fn no_order_points_at_a_deleted_customer(graph in order_graph_strategy(6, 12)) {
        let store = TestStore::with_entities(graph.entities());

        let mut txn = store.begin("delete customers");
        for customer in graph.deleted_ids() {
            txn.delete(&customer).unwrap();
        }
        txn.commit().unwrap();

        let deleted = graph.deleted_ids();
        for (o, customer) in graph.orders.iter().enumerate() {
            let order: Order = store.committed(&format!("o{o}"));
            match (customer, &order.customer_id) {
                (None, reference) => prop_assert_eq!(reference, &None),
                (Some(c), reference) => {
                    let expected = EntityId::from(format!("c{c}"));
                    if deleted.contains(&expected) {
                        prop_assert_eq!(reference, &None);
                    } else {
                        prop_assert_eq!(reference, &Some(expected));
                    }
                }
            }
        }
        for customer in &deleted {
            prop_assert!(!store.is_committed(customer.as_str()));
        }
    }

    #[test]
    fn chains_of_any_length_converge(len in 1usize..40, cut in 0usize..40) {
        let cut = cut % len;
        let store = scenarios::chain_store(len);

        store
            .transaction("cut", |txn| txn.delete(&EntityId::from(format!("n{cut}"))))
            .unwrap();

        prop_assert_eq!(store.backend.size(), cut);
    }
}
