//! Snapshot files: a record schema plus full entity snapshots.
//!
//! ```json
//! {
//!   "schema": { "Order": { "references": { "customerId": "clear" } } },
//!   "entities": [
//!     { "@type": "Customer", "id": "c1", "name": "Ada" },
//!     { "@type": "Order", "id": "o1", "customerId": "c1" }
//!   ]
//! }
//! ```

use crate::record::{DanglingPolicy, DynamicRecord, RecordTypes, TypeSchema};
use refstore_core::{Entity, EntityId, InMemoryBackend, PropertyMap, Store, StoreConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Contents of a snapshot file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    /// Reference fields per record type.
    #[serde(default)]
    pub schema: BTreeMap<String, TypeSchema>,
    /// Full entity snapshots.
    #[serde(default)]
    pub entities: Vec<PropertyMap>,
}

impl Snapshot {
    /// Reads a snapshot file.
    pub fn read(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let file = fs::File::open(path)
            .map_err(|e| format!("cannot open snapshot {}: {e}", path.display()))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Writes the snapshot as pretty-printed JSON.
    pub fn write(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Loads the entities into a fresh in-memory store.
    pub fn load(&self, config: StoreConfig) -> Result<LoadedStore, Box<dyn std::error::Error>> {
        let mut types = RecordTypes::new(&self.schema);
        for entity in &self.entities {
            if let Some(tag) = entity.type_tag() {
                types.intern(tag);
            }
        }

        let backend = Arc::new(InMemoryBackend::new());
        let received = backend.receive_entities(&self.entities, &types.registry())?;
        tracing::info!(entities = received, types = self.schema.len(), "snapshot loaded");

        Ok(LoadedStore {
            store: Store::new(config, backend.clone()),
            backend,
            types,
            schema: self.schema.clone(),
        })
    }
}

/// A reference field pointing at a missing entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingReference {
    /// The referring record.
    pub record: EntityId,
    /// Its type tag.
    pub entity_type: String,
    /// The reference field.
    pub field: String,
    /// The missing target.
    pub target: EntityId,
    /// Repair applied on commit.
    pub policy: DanglingPolicy,
}

/// A store populated from a snapshot.
#[derive(Debug)]
pub struct LoadedStore {
    /// The store.
    pub store: Store,
    /// Its backend, for committed-state inspection.
    pub backend: Arc<InMemoryBackend>,
    /// Record types seen in the snapshot.
    pub types: RecordTypes,
    schema: BTreeMap<String, TypeSchema>,
}

impl LoadedStore {
    /// Committed entity count per type tag.
    pub fn type_counts(&self) -> BTreeMap<String, usize> {
        self.backend
            .count_entities()
            .into_iter()
            .map(|(entity_type, count)| (entity_type.name().to_owned(), count))
            .collect()
    }

    /// Dangling references in the committed state, ordered by record.
    pub fn dangling(&self) -> Vec<DanglingReference> {
        let committed = self.backend.snapshot();
        let mut dangling: Vec<DanglingReference> = committed
            .get_all()
            .filter_map(|entity| entity.downcast_ref::<DynamicRecord>())
            .flat_map(|record| {
                record
                    .dangling_references(|id| committed.contains_with_id(id))
                    .into_iter()
                    .map(move |(field, target, policy)| DanglingReference {
                        record: record.id().clone(),
                        entity_type: record.entity_type().name().to_owned(),
                        field,
                        target,
                        policy,
                    })
            })
            .collect();
        dangling.sort_by(|a, b| (&a.record, &a.field).cmp(&(&b.record, &b.field)));
        dangling
    }

    /// Snapshot of the committed state, ordered by type and id.
    pub fn to_snapshot(&self) -> Snapshot {
        let mut entities: Vec<PropertyMap> = self
            .backend
            .snapshot()
            .get_all()
            .map(|entity| entity.create_properties_map())
            .collect();
        entities.sort_by(|a, b| (a.type_tag(), a.id()).cmp(&(b.type_tag(), b.id())));
        Snapshot {
            schema: self.schema.clone(),
            entities,
        }
    }
}
