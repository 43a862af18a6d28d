//! Entity identifiers, type tags and per-entity identity state.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::OnceLock;
use std::time::SystemTime;
use uuid::Uuid;

/// Opaque unique identifier for an entity.
///
/// Ids are unique within one store regardless of entity type. They are
/// plain values: entities point at each other by holding ids, never by
/// holding the other entity.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an id from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a new random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&EntityId> for EntityId {
    fn from(id: &EntityId) -> Self {
        id.clone()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Discriminator naming the concrete kind of an entity.
///
/// This is the `@type` tag in property snapshots and the partition key of
/// [`crate::EntityCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EntityType(&'static str);

impl EntityType {
    /// Creates a type tag.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the tag.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Identity state embedded in every entity.
///
/// The id is generated on first access and never changes afterwards.
/// `last_modified` is initialized lazily and bumped by tracked mutations.
#[derive(Debug, Default)]
pub struct Identity {
    id: OnceLock<EntityId>,
    last_modified: OnceLock<SystemTime>,
}

impl Identity {
    /// Creates an identity whose id is generated on first access.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an identity with a known id.
    #[must_use]
    pub fn with_id(id: impl Into<EntityId>) -> Self {
        Self {
            id: OnceLock::from(id.into()),
            last_modified: OnceLock::new(),
        }
    }

    /// Returns the id, generating one if none has been assigned yet.
    pub fn id(&self) -> &EntityId {
        self.id.get_or_init(EntityId::generate)
    }

    /// Returns true once an id has been assigned or generated.
    #[must_use]
    pub fn has_id(&self) -> bool {
        self.id.get().is_some()
    }

    /// Assigns the id.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if an id is already assigned.
    pub fn set_id(&self, id: impl Into<EntityId>) -> StoreResult<()> {
        let id = id.into();
        self.id.set(id).map_err(|rejected| {
            StoreError::illegal_state(format!(
                "id already set: {} (rejected {rejected})",
                self.id()
            ))
        })
    }

    /// Returns the last modification time, initializing it to now if unset.
    pub fn last_modified(&self) -> SystemTime {
        *self.last_modified.get_or_init(SystemTime::now)
    }

    /// Marks the entity as modified now.
    pub fn touch(&mut self) {
        self.last_modified = OnceLock::from(SystemTime::now());
    }
}

impl Clone for Identity {
    // The id is pinned before copying so that both copies agree on it.
    fn clone(&self) -> Self {
        Self {
            id: OnceLock::from(self.id().clone()),
            last_modified: self.last_modified.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(EntityId::generate(), EntityId::generate());
    }

    #[test]
    fn lazy_id_is_stable() {
        let identity = Identity::new();
        assert!(!identity.has_id());
        let first = identity.id().clone();
        assert_eq!(identity.id(), &first);
        assert!(identity.has_id());
    }

    #[test]
    fn set_id_twice_fails() {
        let identity = Identity::new();
        identity.set_id("a").unwrap();
        let err = identity.set_id("b").unwrap_err();
        assert!(matches!(err, StoreError::IllegalState { .. }));
        assert_eq!(identity.id().as_str(), "a");
    }

    #[test]
    fn set_id_after_generation_fails() {
        let identity = Identity::new();
        let _ = identity.id();
        assert!(identity.set_id("late").is_err());
    }

    #[test]
    fn clone_shares_lazily_generated_id() {
        let identity = Identity::new();
        let copy = identity.clone();
        assert_eq!(identity.id(), copy.id());
    }

    #[test]
    fn touch_moves_last_modified_forward() {
        let mut identity = Identity::with_id("x");
        let before = identity.last_modified();
        identity.touch();
        assert!(identity.last_modified() >= before);
    }

    #[test]
    fn entity_type_display() {
        assert_eq!(EntityType::new("Order").to_string(), "Order");
    }

    proptest! {
        #[test]
        fn with_id_keeps_given_id(raw in "[a-z0-9]{1,24}") {
            let identity = Identity::with_id(raw.as_str());
            prop_assert_eq!(identity.id().as_str(), raw.as_str());
            prop_assert!(identity.set_id("other").is_err());
        }
    }
}
