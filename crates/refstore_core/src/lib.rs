//! # refstore core
//!
//! In-memory transactional entity store with application-level referential
//! integrity.
//!
//! This crate provides:
//! - An entity model where entities reference each other by id only
//! - An entity cache indexed by type and id
//! - Predicate queries evaluated over cache and backend
//! - Transactions that overlay uncommitted changes on committed state
//! - An integrity fixpoint that repairs dangling references before commit
//! - A change feed of committed per-field deltas

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod cache;
mod change_feed;
mod config;
mod entity;
mod error;
mod query;
mod stats;
mod store;
mod transaction;
mod types;

pub use backend::{AfterCommit, Backend, ChangeBatch, InMemoryBackend};
pub use cache::EntityCache;
pub use change_feed::{ChangeFeed, ChangeSet};
pub use config::StoreConfig;
pub use entity::{
    downcast_entity, Entity, EntityId, EntityKind, EntityObject, EntityRegistry, EntityType,
    Identity, IntoPropertyValue, PropertyDeltas, PropertyMap, PropertyValue, ID_KEY, TYPE_KEY,
};
pub use error::{StoreError, StoreResult};
pub use query::{AllOfType, FnQuery, Query, ReferencesQuery, TypedQuery};
pub use stats::{StatsSnapshot, StoreStats};
pub use store::Store;
pub use transaction::{Transaction, TransactionState};
pub use types::{SequenceNumber, TransactionId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
