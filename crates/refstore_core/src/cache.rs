//! In-memory secondary index of entities by type and id.

use crate::entity::{Entity, EntityId, EntityType};
use crate::error::{StoreError, StoreResult};
use crate::query::Query;
use std::collections::BTreeMap;

/// Entities indexed by type, then by id.
///
/// Used as a transaction's working set and as a backend's committed table.
/// There is no locking here; owners decide how the cache is shared.
#[derive(Debug, Default, Clone)]
pub struct EntityCache {
    entities_by_type: BTreeMap<EntityType, BTreeMap<EntityId, Box<dyn Entity>>>,
}

impl EntityCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an entity.
    ///
    /// Ids are unique across types, so an entity with the same id stored
    /// under another type is dropped first.
    pub fn add(&mut self, entity: Box<dyn Entity>) {
        let entity_type = entity.entity_type();
        let id = entity.id().clone();
        if let Some(previous) = self.type_of(&id) {
            if previous != entity_type {
                self.remove(&id);
            }
        }
        self.entities_by_type
            .entry(entity_type)
            .or_default()
            .insert(id, entity);
    }

    /// Adds or replaces several entities.
    pub fn add_all(&mut self, entities: impl IntoIterator<Item = Box<dyn Entity>>) {
        for entity in entities {
            self.add(entity);
        }
    }

    /// Removes an entity, returning it if it was present.
    pub fn remove(&mut self, id: &EntityId) -> Option<Box<dyn Entity>> {
        let entity_type = self.type_of(id)?;
        let entities_by_id = self.entities_by_type.get_mut(&entity_type)?;
        let removed = entities_by_id.remove(id);
        if entities_by_id.is_empty() {
            self.entities_by_type.remove(&entity_type);
        }
        removed
    }

    /// Removes several entities. Missing ids are ignored.
    pub fn remove_all<'a>(&mut self, ids: impl IntoIterator<Item = &'a EntityId>) {
        for id in ids {
            self.remove(id);
        }
    }

    /// Returns true if an entity with this id is present.
    #[must_use]
    pub fn contains_with_id(&self, id: &EntityId) -> bool {
        self.entities_by_type
            .values()
            .any(|entities_by_id| entities_by_id.contains_key(id))
    }

    /// Returns the entity with this id.
    ///
    /// # Errors
    ///
    /// Returns `EntityDoesNotExist` if it is not present.
    pub fn get_by_id(&self, id: &EntityId) -> StoreResult<&dyn Entity> {
        self.entities_by_type
            .values()
            .find_map(|entities_by_id| entities_by_id.get(id))
            .map(|entity| &**entity)
            .ok_or_else(|| StoreError::not_found(id))
    }

    /// Mutable variant of [`EntityCache::get_by_id`].
    ///
    /// # Errors
    ///
    /// Returns `EntityDoesNotExist` if it is not present.
    pub fn get_by_id_mut(&mut self, id: &EntityId) -> StoreResult<&mut (dyn Entity + 'static)> {
        self.entities_by_type
            .values_mut()
            .find_map(|entities_by_id| entities_by_id.get_mut(id))
            .map(|entity| &mut **entity)
            .ok_or_else(|| StoreError::not_found(id))
    }

    /// Resolves every id into `into`, failing on the first missing one.
    ///
    /// # Errors
    ///
    /// Returns `EntityDoesNotExist` for the first id that is not present.
    pub fn get_by_ids<'a, 'i, C>(
        &'a self,
        ids: impl IntoIterator<Item = &'i EntityId>,
        into: &mut C,
    ) -> StoreResult<()>
    where
        C: Extend<&'a dyn Entity>,
    {
        for id in ids {
            into.extend(Some(self.get_by_id(id)?));
        }
        Ok(())
    }

    /// Resolves ids in order, keeping duplicates.
    ///
    /// # Errors
    ///
    /// Returns `EntityDoesNotExist` for the first id that is not present.
    pub fn get_by_ids_as_list<'i>(
        &self,
        ids: impl IntoIterator<Item = &'i EntityId>,
    ) -> StoreResult<Vec<&dyn Entity>> {
        let mut result = Vec::new();
        self.get_by_ids(ids, &mut result)?;
        Ok(result)
    }

    /// Resolves ids into a map keyed by id, collapsing duplicates.
    ///
    /// # Errors
    ///
    /// Returns `EntityDoesNotExist` for the first id that is not present.
    pub fn get_by_ids_as_set<'i>(
        &self,
        ids: impl IntoIterator<Item = &'i EntityId>,
    ) -> StoreResult<BTreeMap<EntityId, &dyn Entity>> {
        let mut result = BTreeMap::new();
        for id in ids {
            result.insert(id.clone(), self.get_by_id(id)?);
        }
        Ok(result)
    }

    /// Appends every entity matching `query` to `into`.
    pub fn find_all_into<'a, C>(&'a self, query: &dyn Query, into: &mut C)
    where
        C: Extend<&'a dyn Entity>,
    {
        for (entity_type, entities_by_id) in &self.entities_by_type {
            if !query.test_type(*entity_type) {
                continue;
            }
            if query.matches_all() {
                into.extend(entities_by_id.values().map(|entity| &**entity));
            } else {
                into.extend(
                    entities_by_id
                        .values()
                        .map(|entity| &**entity)
                        .filter(|entity| query.test(*entity)),
                );
            }
        }
    }

    /// Returns every entity matching `query`.
    #[must_use]
    pub fn find_all(&self, query: &dyn Query) -> Vec<&dyn Entity> {
        let mut result = Vec::new();
        self.find_all_into(query, &mut result);
        result
    }

    /// Returns the first entity matching `query`.
    #[must_use]
    pub fn find_first(&self, query: &dyn Query) -> Option<&dyn Entity> {
        self.entities_by_type
            .iter()
            .filter(|(entity_type, _)| query.test_type(**entity_type))
            .flat_map(|(_, entities_by_id)| entities_by_id.values())
            .map(|entity| &**entity)
            .find(|entity| query.matches_all() || query.test(*entity))
    }

    /// Iterates over all entities.
    pub fn get_all(&self) -> impl Iterator<Item = &dyn Entity> {
        self.entities_by_type
            .values()
            .flat_map(|entities_by_id| entities_by_id.values())
            .map(|entity| &**entity)
    }

    /// Returns all ids, in type then id order.
    #[must_use]
    pub fn ids(&self) -> Vec<EntityId> {
        self.entities_by_type
            .values()
            .flat_map(|entities_by_id| entities_by_id.keys().cloned())
            .collect()
    }

    /// Drains every entity out of the cache.
    pub fn drain(&mut self) -> Vec<Box<dyn Entity>> {
        std::mem::take(&mut self.entities_by_type)
            .into_values()
            .flat_map(BTreeMap::into_values)
            .collect()
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.entities_by_type.clear();
    }

    /// Returns the number of entities.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entities_by_type.values().map(BTreeMap::len).sum()
    }

    /// Returns true if there are no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities_by_type.values().all(BTreeMap::is_empty)
    }

    /// Returns the number of entities per type.
    #[must_use]
    pub fn count_entities(&self) -> BTreeMap<EntityType, usize> {
        self.entities_by_type
            .iter()
            .map(|(entity_type, entities_by_id)| (*entity_type, entities_by_id.len()))
            .collect()
    }

    fn type_of(&self, id: &EntityId) -> Option<EntityType> {
        self.entities_by_type
            .iter()
            .find(|(_, entities_by_id)| entities_by_id.contains_key(id))
            .map(|(entity_type, _)| *entity_type)
    }
}
