//! Type-tag to constructor registry for materializing snapshots.

use crate::entity::properties::PropertyMap;
use crate::entity::{Entity, EntityId, EntityKind};
use crate::error::{StoreError, StoreResult};
use std::collections::BTreeMap;
use std::fmt;

type Constructor = Box<dyn Fn(EntityId) -> StoreResult<Box<dyn Entity>> + Send + Sync>;

/// Creates entities from `@type` tags.
///
/// Used when snapshots arrive from outside the process (bulk loads,
/// replicas) and have to be turned back into concrete entity kinds.
#[derive(Default)]
pub struct EntityRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl EntityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a kind that can be built from `Default` plus an id.
    pub fn register<E: EntityKind + Default>(&mut self) -> &mut Self {
        self.register_with(E::ENTITY_TYPE.name(), |id| {
            let entity = E::default();
            entity.set_id(id)?;
            Ok(Box::new(entity))
        })
    }

    /// Registers a constructor under an explicit tag.
    pub fn register_with<F>(&mut self, type_tag: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(EntityId) -> StoreResult<Box<dyn Entity>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(type_tag.into(), Box::new(constructor));
        self
    }

    /// Returns true if a constructor exists for the tag.
    #[must_use]
    pub fn contains(&self, type_tag: &str) -> bool {
        self.constructors.contains_key(type_tag)
    }

    /// Returns the registered tags.
    pub fn type_tags(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Creates an empty entity of the given kind with the given id.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` if nothing is registered for the tag.
    pub fn create_entity(&self, type_tag: &str, id: EntityId) -> StoreResult<Box<dyn Entity>> {
        let constructor =
            self.constructors
                .get(type_tag)
                .ok_or_else(|| StoreError::UnknownEntityType {
                    type_tag: type_tag.to_owned(),
                })?;
        constructor(id)
    }

    /// Creates an entity and applies a full snapshot to it.
    ///
    /// # Errors
    ///
    /// Fails if the snapshot lacks `@type` or `id`, names an unknown kind, or
    /// carries values the kind rejects.
    pub fn materialize(&self, snapshot: &PropertyMap) -> StoreResult<Box<dyn Entity>> {
        let type_tag = snapshot
            .type_tag()
            .ok_or_else(|| StoreError::invalid_property("@type", "missing type tag"))?;
        let id = snapshot
            .id()
            .ok_or_else(|| StoreError::invalid_property("id", "missing id"))?;
        let mut entity = self.create_entity(type_tag, EntityId::from(id))?;
        entity.update_properties(snapshot)?;
        Ok(entity)
    }
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("types", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityType, Identity};

    #[derive(Debug, Clone, Default)]
    struct Label {
        identity: Identity,
        name: String,
    }

    impl Entity for Label {
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

    impl EntityKind for Label {
        const ENTITY_TYPE: EntityType = EntityType::new("Label");
    }

    #[test]
    fn materialize_round_trips_snapshot() {
        let mut registry = EntityRegistry::new();
        registry.register::<Label>();

        let snapshot: PropertyMap = [("@type", "Label"), ("id", "l1"), ("name", "urgent")]
            .into_iter()
            .collect();
        let entity = registry.materialize(&snapshot).unwrap();
        assert_eq!(entity.id().as_str(), "l1");
        assert_eq!(entity.downcast_ref::<Label>().unwrap().name, "urgent");
        assert_eq!(entity.create_properties_map(), snapshot);
    }

    #[test]
    fn unknown_type_is_reported() {
        let registry = EntityRegistry::new();
        let err = registry
            .create_entity("Ghost", EntityId::from("g1"))
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::UnknownEntityType {
                type_tag: "Ghost".into()
            }
        );
    }

    #[test]
    fn snapshot_without_type_is_rejected() {
        let mut registry = EntityRegistry::new();
        registry.register::<Label>();
        let snapshot: PropertyMap = [("id", "l1")].into_iter().collect();
        assert!(registry.materialize(&snapshot).is_err());
    }
}
