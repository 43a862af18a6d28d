//! Apply command implementation.
//!
//! Loads a snapshot, runs field updates and deletions through one
//! transaction and prints the committed change set. Dangling references
//! are repaired according to the snapshot schema before the commit.

use crate::record::DynamicRecord;
use crate::snapshot::Snapshot;
use refstore_core::{ChangeSet, EntityId, PropertyValue, StoreConfig, ID_KEY, TYPE_KEY};
use std::path::{Path, PathBuf};
use tracing::info;

/// Options for the apply command.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Ids to delete.
    pub deletes: Vec<String>,
    /// Field assignments, `id.field=value`. `null` clears the field.
    pub sets: Vec<String>,
    /// Where to write the resulting snapshot.
    pub output: Option<PathBuf>,
    /// Commit without repairing references.
    pub skip_integrity: bool,
}

/// A parsed `id.field=value` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Target record.
    pub id: EntityId,
    /// Field to set.
    pub field: String,
    /// New value, `None` for null.
    pub value: PropertyValue,
}

impl Assignment {
    /// Parses `id.field=value`. The last `.` before `=` separates id and
    /// field, so ids may contain dots.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (target, value) = raw
            .split_once('=')
            .ok_or_else(|| format!("expected id.field=value, got {raw:?}"))?;
        let (id, field) = target
            .rsplit_once('.')
            .ok_or_else(|| format!("expected id.field before '=', got {target:?}"))?;
        if id.is_empty() || field.is_empty() {
            return Err(format!("empty id or field in {raw:?}"));
        }
        if field == ID_KEY || field == TYPE_KEY {
            return Err(format!("field {field:?} cannot be assigned"));
        }

        Ok(Self {
            id: EntityId::from(id),
            field: field.to_owned(),
            value: (value != "null").then(|| value.to_owned()),
        })
    }
}

/// Runs the apply command.
pub fn run(path: &Path, options: &ApplyOptions) -> Result<(), Box<dyn std::error::Error>> {
    match apply(path, options)? {
        Some(change) => println!("{}", serde_json::to_string_pretty(&change)?),
        None => println!("No changes"),
    }
    Ok(())
}

/// Applies the changes and returns the committed change set, `None` when
/// nothing was written.
pub fn apply(
    path: &Path,
    options: &ApplyOptions,
) -> Result<Option<ChangeSet>, Box<dyn std::error::Error>> {
    let assignments = options
        .sets
        .iter()
        .map(|raw| Assignment::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let loaded = Snapshot::read(path)?.load(StoreConfig::default())?;
    let changes = loaded.store.subscribe();

    let mut txn = loaded.store.begin(format!("apply {}", path.display()));
    txn.set_ensure_integrity_on_commit(!options.skip_integrity);

    for assignment in &assignments {
        let mut entity = txn.get_by_id(&assignment.id)?;
        let record = entity
            .downcast_mut::<DynamicRecord>()
            .ok_or_else(|| format!("{} is not a snapshot record", assignment.id))?;
        record.set_field(&assignment.field, assignment.value.clone());
        txn.modified(record, &assignment.field, assignment.value.clone())?;
    }
    for id in &options.deletes {
        txn.delete(&EntityId::from(id.as_str()))?;
    }

    info!(transaction = %txn, "applying");
    txn.commit()?;

    if let Some(output) = &options.output {
        loaded.to_snapshot().write(output)?;
        info!(path = %output.display(), entities = loaded.backend.size(), "snapshot written");
    }

    Ok(changes.try_recv().ok())
}
