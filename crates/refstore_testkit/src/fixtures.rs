//! Fixture entity kinds and store helpers.
//!
//! The kinds cover the repair policies integrity hooks typically use:
//! clearing a dangling reference ([`Order`]), deleting an orphan
//! ([`OrderLine`], [`Node`]), failing loudly ([`Attachment`]) and never
//! settling ([`Rival`]).

use refstore_core::{
    Entity, EntityId, EntityKind, EntityRegistry, EntityType, Identity, InMemoryBackend,
    PropertyMap, Store, StoreConfig, StoreResult, Transaction,
};
use std::sync::Arc;

/// Field name of [`Order::customer_id`].
pub const CUSTOMER_ID: &str = "customerId";

/// A customer. References nothing.
#[derive(Debug, Clone, Default)]
pub struct Customer {
    identity: Identity,
    /// Display name.
    pub name: String,
}

impl Customer {
    /// Creates a customer with a known id.
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            identity: Identity::with_id(id),
            name: name.to_owned(),
        }
    }
}

impl Entity for Customer {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut Identity {
        &mut self.identity
    }

    fn entity_type(&self) -> EntityType {
        Self::ENTITY_TYPE
    }

    fn store_fields(&self, properties: &mut PropertyMap) {
        properties.set("name", self.name.as_str());
    }

    fn update_fields(&mut self, properties: &PropertyMap) -> StoreResult<()> {
        self.name = properties.get_str("name").unwrap_or_default().to_owned();
        Ok(())
    }
}

impl EntityKind for Customer {
    const ENTITY_TYPE: EntityType = EntityType::new("Customer");
}

/// An order. Clears its customer reference when the customer is gone.
#[derive(Debug, Clone, Default)]
pub struct Order {
    identity: Identity,
    /// The ordering customer, if any.
    pub customer_id: Option<EntityId>,
    /// Order number.
    pub number: String,
}

impl Order {
    /// Creates an order for a customer.
    pub fn new(id: &str, customer: Option<&str>) -> Self {
        Self {
            identity: Identity::with_id(id),
            customer_id: customer.map(EntityId::from),
            number: String::new(),
        }
    }

    /// Points the order at another customer, recording the change.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Transaction::modified`].
    pub fn set_customer(&mut self, txn: &mut Transaction, customer: Option<&EntityId>) -> StoreResult<()> {
        self.customer_id = customer.cloned();
        txn.modified(self, CUSTOMER_ID, customer)
    }
}

impl Entity for Order {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut Identity {
        &mut self.identity
    }

    fn entity_type(&self) -> EntityType {
        Self::ENTITY_TYPE
    }

    fn referenced_ids(&self) -> Vec<EntityId> {
        self.customer_id.iter().cloned().collect()
    }

    fn store_fields(&self, properties: &mut PropertyMap) {
        properties.set(CUSTOMER_ID, self.customer_id.as_ref());
        properties.set("number", self.number.as_str());
    }

    fn update_fields(&mut self, properties: &PropertyMap) -> StoreResult<()> {
        self.customer_id = properties.get_id(CUSTOMER_ID);
        self.number = properties.get_str("number").unwrap_or_default().to_owned();
        Ok(())
    }

    fn ensure_integrity(&mut self, txn: &mut Transaction) -> StoreResult<()> {
        let Some(customer) = self.customer_id.clone() else {
            return Ok(());
        };
        match txn.get_by_id(&customer) {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => self.set_customer(txn, None),
            Err(err) => Err(err),
        }
    }
}

impl EntityKind for Order {
    const ENTITY_TYPE: EntityType = EntityType::new("Order");
}

/// A line of an order. Deletes itself when its order is gone.
#[derive(Debug, Clone, Default)]
pub struct OrderLine {
    identity: Identity,
    /// The owning order.
    pub order_id: Option<EntityId>,
    /// Product name.
    pub product: String,
}

impl OrderLine {
    /// Creates a line of an order.
    pub fn new(id: &str, order: &str, product: &str) -> Self {
        Self {
            identity: Identity::with_id(id),
            order_id: Some(EntityId::from(order)),
            product: product.to_owned(),
        }
    }
}

impl Entity for OrderLine {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut Identity {
        &mut self.identity
    }

    fn entity_type(&self) -> EntityType {
        Self::ENTITY_TYPE
    }

    fn referenced_ids(&self) -> Vec<EntityId> {
        self.order_id.iter().cloned().collect()
    }

    fn store_fields(&self, properties: &mut PropertyMap) {
        properties.set("orderId", self.order_id.as_ref());
        properties.set("product", self.product.as_str());
    }

    fn update_fields(&mut self, properties: &PropertyMap) -> StoreResult<()> {
        self.order_id = properties.get_id("orderId");
        self.product = properties.get_str("product").unwrap_or_default().to_owned();
        Ok(())
    }

    fn ensure_integrity(&mut self, txn: &mut Transaction) -> StoreResult<()> {
        let has_master = self
            .order_id
            .as_ref()
            .is_some_and(|order| txn.contains_with_id(order));
        if has_master {
            Ok(())
        } else {
            self.repair_missing_master(txn)
        }
    }

    fn repair_missing_master(&mut self, txn: &mut Transaction) -> StoreResult<()> {
        txn.delete(self.id())
    }
}

impl EntityKind for OrderLine {
    const ENTITY_TYPE: EntityType = EntityType::new("OrderLine");
}

/// An attachment of an order. Has no repair policy, so losing its order is
/// a data-integrity error.
#[derive(Debug, Clone, Default)]
pub struct Attachment {
    identity: Identity,
    /// The owning order.
    pub order_id: Option<EntityId>,
}

impl Attachment {
    /// Creates an attachment of an order.
    pub fn new(id: &str, order: &str) -> Self {
        Self {
            identity: Identity::with_id(id),
            order_id: Some(EntityId::from(order)),
        }
    }
}

impl Entity for Attachment {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut Identity {
        &mut self.identity
    }

    fn entity_type(&self) -> EntityType {
        Self::ENTITY_TYPE
    }

    fn referenced_ids(&self) -> Vec<EntityId> {
        self.order_id.iter().cloned().collect()
    }

    fn store_fields(&self, properties: &mut PropertyMap) {
        properties.set("orderId", self.order_id.as_ref());
    }

    fn update_fields(&mut self, properties: &PropertyMap) -> StoreResult<()> {
        self.order_id = properties.get_id("orderId");
        Ok(())
    }

    fn ensure_integrity(&mut self, txn: &mut Transaction) -> StoreResult<()> {
        let has_master = self
            .order_id
            .as_ref()
            .is_some_and(|order| txn.contains_with_id(order));
        if has_master {
            Ok(())
        } else {
            self.repair_missing_master(txn)
        }
    }
}

impl EntityKind for Attachment {
    const ENTITY_TYPE: EntityType = EntityType::new("Attachment");
}

/// A link in a chain. Deletes itself when its parent is gone.
#[derive(Debug, Clone, Default)]
pub struct Node {
    identity: Identity,
    /// The previous link.
    pub parent: Option<EntityId>,
}

impl Node {
    /// Creates a node.
    pub fn new(id: &str, parent: Option<&str>) -> Self {
        Self {
            identity: Identity::with_id(id),
            parent: parent.map(EntityId::from),
        }
    }

    /// Builds `n0 <- n1 <- ... <- n{len-1}`, each pointing at its
    /// predecessor.
    pub fn chain(len: usize) -> Vec<Node> {
        (0..len)
            .map(|i| {
                let parent = (i > 0).then(|| format!("n{}", i - 1));
                Node::new(&format!("n{i}"), parent.as_deref())
            })
            .collect()
    }
}

impl Entity for Node {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut Identity {
        &mut self.identity
    }

    fn entity_type(&self) -> EntityType {
        Self::ENTITY_TYPE
    }

    fn referenced_ids(&self) -> Vec<EntityId> {
        self.parent.iter().cloned().collect()
    }

    fn store_fields(&self, properties: &mut PropertyMap) {
        properties.set("parent", self.parent.as_ref());
    }

    fn update_fields(&mut self, properties: &PropertyMap) -> StoreResult<()> {
        self.parent = properties.get_id("parent");
        Ok(())
    }

    fn ensure_integrity(&mut self, txn: &mut Transaction) -> StoreResult<()> {
        match &self.parent {
            Some(parent) if !txn.contains_with_id(parent) => txn.delete(self.id()),
            _ => Ok(()),
        }
    }
}

impl EntityKind for Node {
    const ENTITY_TYPE: EntityType = EntityType::new("Node");
}

/// Bumps its partner's counter on every check. Two rivals pointing at each
/// other never reach a fixpoint.
#[derive(Debug, Clone, Default)]
pub struct Rival {
    identity: Identity,
    /// The rival to bump.
    pub partner: Option<EntityId>,
    /// Times the partner bumped this one.
    pub counter: u64,
}

impl Rival {
    /// Creates two rivals pointing at each other.
    pub fn pair(a: &str, b: &str) -> (Rival, Rival) {
        let rival = |id: &str, partner: &str| Rival {
            identity: Identity::with_id(id),
            partner: Some(EntityId::from(partner)),
            counter: 0,
        };
        (rival(a, b), rival(b, a))
    }
}

impl Entity for Rival {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut Identity {
        &mut self.identity
    }

    fn entity_type(&self) -> EntityType {
        Self::ENTITY_TYPE
    }

    fn referenced_ids(&self) -> Vec<EntityId> {
        self.partner.iter().cloned().collect()
    }

    fn store_fields(&self, properties: &mut PropertyMap) {
        properties.set("partner", self.partner.as_ref());
        properties.set("counter", self.counter.to_string());
    }

    fn update_fields(&mut self, properties: &PropertyMap) -> StoreResult<()> {
        self.partner = properties.get_id("partner");
        self.counter = properties.parse("counter")?.unwrap_or_default();
        Ok(())
    }

    fn ensure_integrity(&mut self, txn: &mut Transaction) -> StoreResult<()> {
        let Some(partner) = self.partner.clone() else {
            return Ok(());
        };
        let mut other = txn.get::<Rival>(&partner)?;
        other.counter += 1;
        let counter = other.counter.to_string();
        txn.modified(&mut other, "counter", counter)
    }
}

impl EntityKind for Rival {
    const ENTITY_TYPE: EntityType = EntityType::new("Rival");
}

/// A registry knowing every fixture kind.
pub fn fixture_registry() -> EntityRegistry {
    let mut registry = EntityRegistry::new();
    registry
        .register::<Customer>()
        .register::<Order>()
        .register::<OrderLine>()
        .register::<Attachment>()
        .register::<Node>()
        .register::<Rival>();
    registry
}

/// Boxes an entity.
pub fn boxed<E: Entity>(entity: E) -> Box<dyn Entity> {
    Box::new(entity)
}

/// A store over an in-memory backend the test can inspect.
pub struct TestStore {
    /// The store.
    pub store: Store,
    /// The backend behind it.
    pub backend: Arc<InMemoryBackend>,
}

impl TestStore {
    /// Creates an empty store with default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default(), Vec::new())
    }

    /// Creates a store with committed entities.
    pub fn with_entities(entities: Vec<Box<dyn Entity>>) -> Self {
        Self::with_config(StoreConfig::default(), entities)
    }

    /// Creates a store with a configuration and committed entities.
    pub fn with_config(config: StoreConfig, entities: Vec<Box<dyn Entity>>) -> Self {
        let backend = Arc::new(InMemoryBackend::with_entities(entities));
        Self {
            store: Store::new(config, backend.clone()),
            backend,
        }
    }

    /// Returns true if the id is committed.
    pub fn is_committed(&self, id: &str) -> bool {
        self.backend.snapshot().contains_with_id(&EntityId::from(id))
    }

    /// Returns the committed entity as kind `E`.
    ///
    /// # Panics
    ///
    /// Panics if the id is not committed or is another kind.
    pub fn committed<E: EntityKind>(&self, id: &str) -> E {
        let txn = self.store.begin("inspect");
        txn.get::<E>(&EntityId::from(id))
            .unwrap_or_else(|err| panic!("{id} is not a committed {}: {err}", E::ENTITY_TYPE))
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Customers `c0..`, each with `orders_per_customer` orders
    /// `o{customer}_{n}` carrying one line `l{customer}_{n}`.
    pub fn order_book(customers: usize, orders_per_customer: usize) -> TestStore {
        let mut entities = Vec::new();
        for c in 0..customers {
            let customer = format!("c{c}");
            entities.push(boxed(Customer::new(&customer, &format!("Customer {c}"))));
            for n in 0..orders_per_customer {
                let order = format!("o{c}_{n}");
                entities.push(boxed(Order::new(&order, Some(&customer))));
                entities.push(boxed(OrderLine::new(&format!("l{c}_{n}"), &order, "widget")));
            }
        }
        TestStore::with_entities(entities)
    }

    /// A committed chain of `len` nodes.
    pub fn chain_store(len: usize) -> TestStore {
        TestStore::with_entities(Node::chain(len).into_iter().map(boxed).collect())
    }
}
