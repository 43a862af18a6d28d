//! The entity contract.

use crate::entity::properties::{PropertyMap, ID_KEY};
use crate::entity::{EntityId, EntityType, Identity};
use crate::error::{StoreError, StoreResult};
use crate::transaction::Transaction;
use std::any::Any;
use std::fmt;
use std::time::SystemTime;

/// Object-safe plumbing every entity gets for free.
///
/// Implemented for all `Entity + Clone` types; never implement it by hand.
pub trait EntityObject {
    /// Clones the entity behind a fresh box.
    fn clone_box(&self) -> Box<dyn Entity>;

    /// Upcasts for downcasting to the concrete kind.
    fn as_any(&self) -> &dyn Any;

    /// Mutable variant of [`EntityObject::as_any`].
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Owned variant of [`EntityObject::as_any`].
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Entity + Clone> EntityObject for T {
    fn clone_box(&self) -> Box<dyn Entity> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A mutable, identity-bearing record in the store.
///
/// Entities own no other entity. They point at other entities by holding
/// their ids and resolve them through a [`Transaction`] when needed; a
/// resolution may fail if the target was deleted.
///
/// Equality between entities is identity: two values describe the same
/// entity iff their ids match.
///
/// Hooks that receive a `&mut Transaction` run while the entity is checked
/// out of the transaction's working set. Inside them, use `self` rather than
/// looking the entity up by its own id.
pub trait Entity: EntityObject + fmt::Debug + Send + Sync + 'static {
    /// Identity state (id and modification time).
    fn identity(&self) -> &Identity;

    /// Mutable identity state.
    fn identity_mut(&mut self) -> &mut Identity;

    /// The concrete kind of this entity.
    fn entity_type(&self) -> EntityType;

    /// Ids of the entities this entity currently points at.
    fn referenced_ids(&self) -> Vec<EntityId> {
        Vec::new()
    }

    /// Writes this entity's own fields (not `@type`/`id`) into `properties`.
    fn store_fields(&self, _properties: &mut PropertyMap) {}

    /// Applies fields from a full snapshot.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProperty` if a value cannot be interpreted.
    fn update_fields(&mut self, _properties: &PropertyMap) -> StoreResult<()> {
        Ok(())
    }

    /// Self-check and self-repair, called by the transaction during commit.
    ///
    /// May mutate the entity (recording changes via
    /// [`Transaction::modified`]), delete it, or delete other entities.
    /// Deleting anything during a check makes the transaction return
    /// [`StoreError::IntegrityRestart`]; propagate it with `?`.
    ///
    /// # Errors
    ///
    /// Any error other than `IntegrityRestart` aborts the commit.
    fn ensure_integrity(&mut self, _txn: &mut Transaction) -> StoreResult<()> {
        Ok(())
    }

    /// Runs before the entity is marked deleted by [`Transaction::delete_entity`].
    ///
    /// # Errors
    ///
    /// An error prevents the deletion.
    fn on_delete(&mut self, _txn: &mut Transaction) -> StoreResult<()> {
        Ok(())
    }

    /// Called by an entity's own integrity check when its owning master
    /// reference is unset or dangling.
    ///
    /// # Errors
    ///
    /// The default signals a data-integrity error.
    fn repair_missing_master(&mut self, _txn: &mut Transaction) -> StoreResult<()> {
        Err(StoreError::MissingMaster {
            id: self.id().clone(),
            entity_type: self.entity_type(),
        })
    }

    /// Returns the id, generating one on first access.
    fn id(&self) -> &EntityId {
        self.identity().id()
    }

    /// Assigns the id.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the entity already has an id.
    fn set_id(&self, id: EntityId) -> StoreResult<()> {
        self.identity().set_id(id)
    }

    /// Returns true if this entity has the given id.
    fn is_id(&self, id: &str) -> bool {
        self.id().as_str() == id
    }

    /// Time of the last tracked mutation.
    fn last_modified(&self) -> SystemTime {
        self.identity().last_modified()
    }

    /// Writes `@type`, `id` and every field into `properties`.
    fn store_properties(&self, properties: &mut PropertyMap) {
        properties.set_type(self.entity_type());
        properties.set(ID_KEY, self.id());
        self.store_fields(properties);
    }

    /// Returns a full snapshot of the entity.
    fn create_properties_map(&self) -> PropertyMap {
        let mut properties = PropertyMap::new();
        self.store_properties(&mut properties);
        properties
    }

    /// Applies a full snapshot of this same entity.
    ///
    /// # Errors
    ///
    /// Returns `PropertiesMismatch` if the snapshot's `id` is not this
    /// entity's id.
    fn update_properties(&mut self, properties: &PropertyMap) -> StoreResult<()> {
        if properties.id() != Some(self.id().as_str()) {
            return Err(StoreError::PropertiesMismatch {
                expected: self.id().clone(),
                actual: properties.id().map(str::to_owned),
            });
        }
        self.update_fields(properties)
    }

    /// Resolves [`Entity::referenced_ids`] through `txn`, skipping ids that
    /// no longer resolve.
    fn referenced_entities(&self, txn: &Transaction) -> Vec<Box<dyn Entity>> {
        self.referenced_ids()
            .iter()
            .filter_map(|id| txn.get_by_id(id).ok())
            .collect()
    }

    /// `Type:id`, for log lines.
    fn type_and_id(&self) -> String {
        format!("{}:{}", self.entity_type(), self.id())
    }
}

/// An entity kind with a statically known type tag.
pub trait EntityKind: Entity + Clone {
    /// The `@type` tag shared by all entities of this kind.
    const ENTITY_TYPE: EntityType;
}

impl Clone for Box<dyn Entity> {
    fn clone(&self) -> Self {
        (**self).clone_box()
    }
}

impl PartialEq for dyn Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for dyn Entity {}

impl dyn Entity {
    /// Returns true if the entity is of kind `E`.
    #[must_use]
    pub fn is<E: Entity>(&self) -> bool {
        self.as_any().is::<E>()
    }

    /// Borrows the entity as kind `E`.
    #[must_use]
    pub fn downcast_ref<E: Entity>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    /// Mutably borrows the entity as kind `E`.
    pub fn downcast_mut<E: Entity>(&mut self) -> Option<&mut E> {
        self.as_any_mut().downcast_mut::<E>()
    }
}

/// Unboxes an entity as kind `E`.
///
/// # Errors
///
/// Returns `TypeMismatch` if the entity is of another kind.
pub fn downcast_entity<E: EntityKind>(entity: Box<dyn Entity>) -> StoreResult<E> {
    if !entity.is::<E>() {
        return Err(StoreError::TypeMismatch {
            id: entity.id().clone(),
            expected: E::ENTITY_TYPE,
            actual: entity.entity_type(),
        });
    }
    entity
        .into_any()
        .downcast::<E>()
        .map(|boxed| *boxed)
        .map_err(|_| StoreError::illegal_state("downcast failed after type check"))
}
