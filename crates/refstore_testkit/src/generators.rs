//! Property-based test generators using proptest.

use crate::fixtures::{boxed, Customer, Order};
use proptest::prelude::*;
use refstore_core::{Entity, EntityId};

/// Strategy for generating entity ids.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}")
        .expect("Invalid regex")
        .prop_map(EntityId::from)
}

/// Strategy for generating property values, `None` being null.
pub fn property_value_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop::string::string_regex("[ -~]{0,24}").expect("Invalid regex"))
}

/// Customers, orders pointing at them (or at nobody) and a subset of
/// customers to delete.
#[derive(Debug, Clone)]
pub struct OrderGraph {
    /// Number of customers `c0..`.
    pub customers: usize,
    /// Customer index of each order `o0..`, `None` for no customer.
    pub orders: Vec<Option<usize>>,
    /// Customer indices to delete.
    pub deleted: Vec<usize>,
}

impl OrderGraph {
    /// Committed entities for the graph.
    pub fn entities(&self) -> Vec<Box<dyn Entity>> {
        let customers = (0..self.customers)
            .map(|c| boxed(Customer::new(&format!("c{c}"), &format!("Customer {c}"))));
        let orders = self.orders.iter().enumerate().map(|(o, customer)| {
            let customer = customer.map(|c| format!("c{c}"));
            boxed(Order::new(&format!("o{o}"), customer.as_deref()))
        });
        customers.chain(orders).collect()
    }

    /// Ids of the customers to delete.
    pub fn deleted_ids(&self) -> Vec<EntityId> {
        self.deleted
            .iter()
            .map(|c| EntityId::from(format!("c{c}")))
            .collect()
    }
}

/// Strategy for generating order graphs with up to `max_customers`
/// customers and `max_orders` orders.
pub fn order_graph_strategy(
    max_customers: usize,
    max_orders: usize,
) -> impl Strategy<Value = OrderGraph> {
    (1..=max_customers).prop_flat_map(move |customers| {
        (
            prop::collection::vec(prop::option::of(0..customers), 0..=max_orders),
            prop::collection::vec(0..customers, 0..=customers),
        )
            .prop_map(move |(orders, deleted)| OrderGraph {
                customers,
                orders,
                deleted,
            })
    })
}
