//! Property snapshots and change deltas.

use crate::entity::{EntityId, EntityType};
use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::{self, BTreeMap};

/// Key holding the type tag in a snapshot.
pub const TYPE_KEY: &str = "@type";

/// Key holding the entity id in a snapshot or delta.
pub const ID_KEY: &str = "id";

/// Serialized value of a single field. `None` is an explicit null.
pub type PropertyValue = Option<String>;

/// Field name to serialized value map.
///
/// Used both for full snapshots (`@type`, `id` and every field) and for
/// field-level deltas (`id` plus the fields that changed).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyMap(BTreeMap<String, PropertyValue>);

impl PropertyMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a delta seeded with the entity id.
    #[must_use]
    pub fn for_id(id: &EntityId) -> Self {
        let mut map = Self::new();
        map.set(ID_KEY, id.as_str());
        map
    }

    /// Sets a field.
    pub fn set(&mut self, field: impl Into<String>, value: impl IntoPropertyValue) {
        self.0.insert(field.into(), value.into_property_value());
    }

    /// Returns the raw value of a field, `None` when the field is absent.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&PropertyValue> {
        self.0.get(field)
    }

    /// Returns a field as a string slice, `None` when absent or null.
    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(|value| value.as_deref())
    }

    /// Returns a field as an id, `None` when absent or null.
    #[must_use]
    pub fn get_id(&self, field: &str) -> Option<EntityId> {
        self.get_str(field).map(EntityId::from)
    }

    /// Parses a field, `None` when absent or null.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProperty` if the value does not parse.
    pub fn parse<T>(&self, field: &str) -> StoreResult<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get_str(field)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| StoreError::invalid_property(field, e.to_string()))
            })
            .transpose()
    }

    /// Returns the `id` entry.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.get_str(ID_KEY)
    }

    /// Returns the `@type` entry.
    #[must_use]
    pub fn type_tag(&self) -> Option<&str> {
        self.get_str(TYPE_KEY)
    }

    /// Returns true if the field is present (null counts as present).
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Copies every entry of `other` over this map.
    pub fn merge(&mut self, other: &PropertyMap) {
        for (field, value) in &other.0 {
            self.0.insert(field.clone(), value.clone());
        }
    }

    /// Adds the `@type` tag.
    pub fn set_type(&mut self, entity_type: EntityType) {
        self.set(TYPE_KEY, entity_type.name());
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over entries in field order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, PropertyValue> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a PropertyMap {
    type Item = (&'a String, &'a PropertyValue);
    type IntoIter = btree_map::Iter<'a, String, PropertyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<K: Into<String>, V: IntoPropertyValue> FromIterator<(K, V)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into_property_value()))
                .collect(),
        )
    }
}

/// Conversion into a serialized field value.
pub trait IntoPropertyValue {
    /// Converts the value.
    fn into_property_value(self) -> PropertyValue;
}

impl IntoPropertyValue for PropertyValue {
    fn into_property_value(self) -> PropertyValue {
        self
    }
}

impl IntoPropertyValue for &str {
    fn into_property_value(self) -> PropertyValue {
        Some(self.to_owned())
    }
}

impl IntoPropertyValue for String {
    fn into_property_value(self) -> PropertyValue {
        Some(self)
    }
}

impl IntoPropertyValue for &EntityId {
    fn into_property_value(self) -> PropertyValue {
        Some(self.to_string())
    }
}

impl IntoPropertyValue for Option<&EntityId> {
    fn into_property_value(self) -> PropertyValue {
        self.map(ToString::to_string)
    }
}

impl IntoPropertyValue for Option<&str> {
    fn into_property_value(self) -> PropertyValue {
        self.map(str::to_owned)
    }
}

/// Per-entity deltas of one change set, keyed by id.
pub type PropertyDeltas = BTreeMap<EntityId, PropertyMap>;
