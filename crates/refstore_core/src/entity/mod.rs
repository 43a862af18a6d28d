//! Entity model: identity, property snapshots and the entity contract.

mod id;
mod properties;
mod registry;
mod traits;

pub use id::{EntityId, EntityType, Identity};
pub use properties::{
    IntoPropertyValue, PropertyDeltas, PropertyMap, PropertyValue, ID_KEY, TYPE_KEY,
};
pub use registry::EntityRegistry;
pub use traits::{downcast_entity, Entity, EntityKind, EntityObject};
