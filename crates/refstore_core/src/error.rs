//! Error types for refstore core.

use crate::entity::{EntityId, EntityType};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// An id-based lookup found nothing.
    ///
    /// Integrity hooks catch this to trigger repair of dangling references.
    #[error("entity does not exist: {id}")]
    EntityDoesNotExist {
        /// The id that failed to resolve.
        id: EntityId,
    },

    /// Operation not permitted in the current state.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// An entity was deleted while an integrity pass was examining the
    /// working set. The pass is abandoned and redone; this never escapes
    /// `commit()`.
    #[error("entity deleted while ensuring integrity")]
    IntegrityRestart,

    /// The integrity fixpoint did not stabilize.
    #[error("integrity repair did not converge after {passes} passes")]
    IntegrityNotConverged {
        /// Number of passes that were run.
        passes: usize,
    },

    /// An entity lost its owning master and does not know how to repair itself.
    #[error("master entity is missing for {entity_type}:{id}")]
    MissingMaster {
        /// The orphaned entity.
        id: EntityId,
        /// Its type tag.
        entity_type: EntityType,
    },

    /// A lookup resolved an entity of a different kind than requested.
    #[error("entity {id} is a {actual}, expected {expected}")]
    TypeMismatch {
        /// The id that was looked up.
        id: EntityId,
        /// The requested kind.
        expected: EntityType,
        /// The kind actually stored.
        actual: EntityType,
    },

    /// A property snapshot belongs to another entity.
    #[error("properties of {actual:?} applied to entity {expected}")]
    PropertiesMismatch {
        /// Id of the receiving entity.
        expected: EntityId,
        /// Id carried by the snapshot.
        actual: Option<String>,
    },

    /// A property value could not be interpreted.
    #[error("invalid property {field}: {message}")]
    InvalidProperty {
        /// Field name.
        field: String,
        /// Description of the problem.
        message: String,
    },

    /// No constructor is registered for a type tag.
    #[error("unknown entity type: {type_tag}")]
    UnknownEntityType {
        /// The unresolved `@type` tag.
        type_tag: String,
    },

    /// The backend failed to apply a batch.
    #[error("backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates an entity-does-not-exist error.
    pub fn not_found(id: impl Into<EntityId>) -> Self {
        Self::EntityDoesNotExist { id: id.into() }
    }

    /// Creates an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Creates an invalid property error.
    pub fn invalid_property(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidProperty {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns true for failed id lookups.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityDoesNotExist { .. })
    }
}
