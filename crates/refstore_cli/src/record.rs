//! Schema-driven records loaded from snapshot files.

use refstore_core::{
    Entity, EntityId, EntityRegistry, EntityType, Identity, PropertyMap, PropertyValue,
    StoreResult, Transaction, ID_KEY, TYPE_KEY,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What to do when a reference field points at a missing entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DanglingPolicy {
    /// Set the field to null.
    #[default]
    Clear,
    /// Delete the referring record.
    Delete,
}

/// Reference fields of one record type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    /// Field name to dangling policy.
    #[serde(default)]
    pub references: BTreeMap<String, DanglingPolicy>,
}

/// A record whose type tag and fields come from a snapshot.
#[derive(Debug, Clone)]
pub struct DynamicRecord {
    identity: Identity,
    entity_type: EntityType,
    schema: Arc<TypeSchema>,
    fields: BTreeMap<String, PropertyValue>,
}

impl DynamicRecord {
    /// Creates an empty record.
    pub fn new(entity_type: EntityType, schema: Arc<TypeSchema>, id: EntityId) -> Self {
        Self {
            identity: Identity::with_id(id),
            entity_type,
            schema,
            fields: BTreeMap::new(),
        }
    }

    /// Returns a field, `None` when absent or null.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|value| value.as_deref())
    }

    /// Sets a field on this copy only. Record it with
    /// [`Transaction::modified`] to make it stick.
    pub fn set_field(&mut self, name: &str, value: PropertyValue) {
        self.fields.insert(name.to_owned(), value);
    }

    /// Reference fields whose target does not satisfy `exists`.
    pub fn dangling_references(
        &self,
        exists: impl Fn(&EntityId) -> bool,
    ) -> Vec<(String, EntityId, DanglingPolicy)> {
        self.schema
            .references
            .iter()
            .filter_map(|(field, policy)| {
                let target = EntityId::from(self.field(field)?);
                (!exists(&target)).then(|| (field.clone(), target, *policy))
            })
            .collect()
    }
}

impl Entity for DynamicRecord {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn identity_mut(&mut self) -> &mut Identity {
        &mut self.identity
    }

    fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    fn referenced_ids(&self) -> Vec<EntityId> {
        self.schema
            .references
            .keys()
            .filter_map(|field| self.field(field))
            .map(EntityId::from)
            .collect()
    }

    fn store_fields(&self, properties: &mut PropertyMap) {
        for (field, value) in &self.fields {
            properties.set(field.as_str(), value.clone());
        }
    }

    fn update_fields(&mut self, properties: &PropertyMap) -> StoreResult<()> {
        self.fields = properties
            .iter()
            .filter(|(field, _)| field.as_str() != TYPE_KEY && field.as_str() != ID_KEY)
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();
        Ok(())
    }

    fn ensure_integrity(&mut self, txn: &mut Transaction) -> StoreResult<()> {
        let schema = Arc::clone(&self.schema);
        for (field, policy) in &schema.references {
            let Some(target) = self.field(field).map(EntityId::from) else {
                continue;
            };
            if txn.contains_with_id(&target) {
                continue;
            }
            match policy {
                DanglingPolicy::Clear => {
                    tracing::debug!(record = %self.type_and_id(), field = %field, %target, "clearing dangling reference");
                    self.set_field(field, None);
                    txn.modified(self, field, None::<&str>)?;
                }
                DanglingPolicy::Delete => return self.repair_missing_master(txn),
            }
        }
        Ok(())
    }

    fn repair_missing_master(&mut self, txn: &mut Transaction) -> StoreResult<()> {
        let id = self.id().clone();
        tracing::debug!(record = %self.type_and_id(), "deleting record with missing master");
        txn.delete(&id)
    }
}

/// Record types of one snapshot, keyed by tag.
///
/// Tags are interned for the life of the process so they can back an
/// [`EntityType`].
#[derive(Debug, Default)]
pub struct RecordTypes {
    types: BTreeMap<String, (EntityType, Arc<TypeSchema>)>,
}

impl RecordTypes {
    /// Creates the types declared in a schema.
    pub fn new(schema: &BTreeMap<String, TypeSchema>) -> Self {
        let mut types = Self::default();
        for (name, type_schema) in schema {
            types.insert(name, type_schema.clone());
        }
        types
    }

    /// Returns the tag for `name`, adding a type without references if it
    /// is not known yet.
    pub fn intern(&mut self, name: &str) -> EntityType {
        match self.types.get(name) {
            Some((entity_type, _)) => *entity_type,
            None => self.insert(name, TypeSchema::default()),
        }
    }

    fn insert(&mut self, name: &str, schema: TypeSchema) -> EntityType {
        let tag: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let entity_type = EntityType::new(tag);
        self.types
            .insert(name.to_owned(), (entity_type, Arc::new(schema)));
        entity_type
    }

    /// Returns the schema of a type.
    pub fn schema(&self, name: &str) -> Option<&TypeSchema> {
        self.types.get(name).map(|(_, schema)| schema.as_ref())
    }

    /// Known type tags.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Builds a registry that creates a [`DynamicRecord`] for every type.
    pub fn registry(&self) -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        for (name, (entity_type, schema)) in &self.types {
            let entity_type = *entity_type;
            let schema = Arc::clone(schema);
            registry.register_with(name.clone(), move |id| {
                let record = DynamicRecord::new(entity_type, Arc::clone(&schema), id);
                Ok(Box::new(record) as Box<dyn Entity>)
            });
        }
        registry
    }
}
