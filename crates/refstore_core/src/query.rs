//! Predicates for finding entities.
//!
//! A query is a type filter plus a predicate. An entity matches iff its type
//! passes [`Query::test_type`] and [`Query::test`] returns true. There is no
//! planner and no index beyond type and id: queries are evaluated by scanning.
//!
//! ```rust,ignore
//! use refstore_core::{TypedQuery, Query};
//!
//! let open = TypedQuery::new(|order: &Order| !order.is_closed());
//! for order in open.list(&txn) {
//!     println!("{}", order.type_and_id());
//! }
//! ```

use crate::entity::{Entity, EntityId, EntityKind, EntityType};
use crate::transaction::Transaction;
use std::fmt;
use std::marker::PhantomData;

/// A typed predicate over entities.
pub trait Query {
    /// The matching predicate.
    fn test(&self, entity: &dyn Entity) -> bool;

    /// The declared entity kind, `None` for queries over every kind.
    fn entity_type(&self) -> Option<EntityType> {
        None
    }

    /// Returns true if entities of `candidate` kind may match.
    ///
    /// Defaults to equality with [`Query::entity_type`].
    fn test_type(&self, candidate: EntityType) -> bool {
        self.entity_type().map_or(true, |declared| declared == candidate)
    }

    /// Returns true if every entity passing the type filter matches, letting
    /// callers skip per-entity evaluation.
    fn matches_all(&self) -> bool {
        false
    }

    /// Short name for log lines.
    fn describe(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Runs the query against a transaction.
    fn list(&self, txn: &Transaction) -> Vec<Box<dyn Entity>>
    where
        Self: Sized,
    {
        txn.find_all(self)
    }

    /// Returns the first match within a transaction.
    fn get_first(&self, txn: &Transaction) -> Option<Box<dyn Entity>>
    where
        Self: Sized,
    {
        txn.find_first(self)
    }

    /// Applies the query to already-fetched entities.
    fn filter<'a, I>(&self, entities: I) -> Vec<&'a dyn Entity>
    where
        I: IntoIterator<Item = &'a dyn Entity>,
        Self: Sized,
    {
        entities
            .into_iter()
            .filter(|entity| self.test_type(entity.entity_type()) && self.test(*entity))
            .collect()
    }
}

/// Matches every entity of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllOfType {
    entity_type: EntityType,
}

impl AllOfType {
    /// Creates a query over all entities of `entity_type`.
    #[must_use]
    pub const fn new(entity_type: EntityType) -> Self {
        Self { entity_type }
    }

    /// Creates a query over all entities of kind `E`.
    #[must_use]
    pub const fn of<E: EntityKind>() -> Self {
        Self::new(E::ENTITY_TYPE)
    }
}

impl Query for AllOfType {
    fn test(&self, _entity: &dyn Entity) -> bool {
        true
    }

    fn entity_type(&self) -> Option<EntityType> {
        Some(self.entity_type)
    }

    fn matches_all(&self) -> bool {
        true
    }
}

/// A closure over `&dyn Entity`, optionally restricted to one kind.
pub struct FnQuery<F> {
    predicate: F,
    entity_type: Option<EntityType>,
}

impl<F: Fn(&dyn Entity) -> bool> FnQuery<F> {
    /// Creates a query over every kind.
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            entity_type: None,
        }
    }

    /// Creates a query over one kind.
    pub fn of_type(entity_type: EntityType, predicate: F) -> Self {
        Self {
            predicate,
            entity_type: Some(entity_type),
        }
    }
}

impl<F: Fn(&dyn Entity) -> bool> Query for FnQuery<F> {
    fn test(&self, entity: &dyn Entity) -> bool {
        (self.predicate)(entity)
    }

    fn entity_type(&self) -> Option<EntityType> {
        self.entity_type
    }
}

impl<F> fmt::Debug for FnQuery<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnQuery")
            .field("entity_type", &self.entity_type)
            .finish_non_exhaustive()
    }
}

/// A closure over a concrete entity kind.
pub struct TypedQuery<E, F> {
    predicate: F,
    _marker: PhantomData<fn(&E)>,
}

impl<E: EntityKind, F: Fn(&E) -> bool> TypedQuery<E, F> {
    /// Creates a query over entities of kind `E`.
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _marker: PhantomData,
        }
    }
}

impl<E: EntityKind, F: Fn(&E) -> bool> Query for TypedQuery<E, F> {
    fn test(&self, entity: &dyn Entity) -> bool {
        entity
            .downcast_ref::<E>()
            .is_some_and(|typed| (self.predicate)(typed))
    }

    fn entity_type(&self) -> Option<EntityType> {
        Some(E::ENTITY_TYPE)
    }
}

impl<E: EntityKind, F> fmt::Debug for TypedQuery<E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedQuery")
            .field("entity_type", &E::ENTITY_TYPE)
            .finish_non_exhaustive()
    }
}

/// Matches entities whose references include a given id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferencesQuery {
    target: EntityId,
}

impl ReferencesQuery {
    /// Creates a query for entities referencing `target`.
    #[must_use]
    pub fn new(target: impl Into<EntityId>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// The referenced id.
    #[must_use]
    pub fn target(&self) -> &EntityId {
        &self.target
    }
}

impl Query for ReferencesQuery {
    fn test(&self, entity: &dyn Entity) -> bool {
        entity.id() != &self.target && entity.referenced_ids().contains(&self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Identity;

    #[derive(Debug, Clone)]
    struct Leaf {
        identity: Identity,
        parent: Option<EntityId>,
    }

    impl Leaf {
        fn new(id: &str, parent: Option<&str>) -> Self {
            Self {
                identity: Identity::with_id(id),
                parent: parent.map(EntityId::from),
            }
        }
    }

    impl Entity for Leaf {
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
    }

    impl EntityKind for Leaf {
        const ENTITY_TYPE: EntityType = EntityType::new("Leaf");
    }

    #[test]
    fn default_type_filter_is_equality() {
        let query = AllOfType::of::<Leaf>();
        assert!(query.test_type(Leaf::ENTITY_TYPE));
        assert!(!query.test_type(EntityType::new("Branch")));
        assert!(query.matches_all());

        let untyped = FnQuery::new(|_: &dyn Entity| true);
        assert!(untyped.test_type(EntityType::new("Anything")));
        assert!(!untyped.matches_all());
    }

    #[test]
    fn typed_query_downcasts() {
        let with_parent = TypedQuery::new(|leaf: &Leaf| leaf.parent.is_some());
        assert!(with_parent.test(&Leaf::new("l1", Some("root"))));
        assert!(!with_parent.test(&Leaf::new("l2", None)));
    }

    #[test]
    fn filter_applies_type_and_predicate() {
        let leaves = [Leaf::new("l1", Some("root")), Leaf::new("l2", None)];
        let entities: Vec<&dyn Entity> = leaves.iter().map(|l| l as &dyn Entity).collect();

        let query = ReferencesQuery::new("root");
        let matched = query.filter(entities.iter().copied());
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id().as_str(), "l1");

        let wrong_type = FnQuery::of_type(EntityType::new("Branch"), |_: &dyn Entity| true);
        assert!(wrong_type.filter(entities).is_empty());
    }

    #[test]
    fn references_query_ignores_self_reference() {
        let query = ReferencesQuery::new("loop");
        assert!(!query.test(&Leaf::new("loop", Some("loop"))));
        assert_eq!(query.target().as_str(), "loop");
    }

    #[test]
    fn describe_names_query_type() {
        assert!(AllOfType::of::<Leaf>().describe().ends_with("AllOfType"));
    }
}
