//! Inspect command implementation.

use crate::snapshot::{DanglingReference, Snapshot};
use refstore_core::StoreConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Snapshot inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Snapshot path.
    pub path: String,
    /// Number of entities.
    pub entity_count: usize,
    /// Entity count per type.
    pub types: BTreeMap<String, usize>,
    /// Declared reference fields per type.
    pub references: BTreeMap<String, Vec<String>>,
    /// References whose target is missing.
    pub dangling: Vec<DanglingReference>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Loads a snapshot and collects its statistics.
pub fn inspect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let loaded = Snapshot::read(path)?.load(StoreConfig::default())?;

    let references: BTreeMap<String, Vec<String>> = loaded
        .types
        .names()
        .filter_map(|name| {
            let schema = loaded.types.schema(name)?;
            (!schema.references.is_empty())
                .then(|| (name.to_owned(), schema.references.keys().cloned().collect()))
        })
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        entity_count: loaded.backend.size(),
        types: loaded.type_counts(),
        references,
        dangling: loaded.dangling(),
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Refstore Snapshot Inspection");
    println!("============================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Entities: {}", result.entity_count);
    for (entity_type, count) in &result.types {
        println!("  {entity_type:<20} {count}");
    }

    if !result.references.is_empty() {
        println!();
        println!("References:");
        for (entity_type, fields) in &result.references {
            println!("  {entity_type}: {}", fields.join(", "));
        }
    }

    println!();
    if result.dangling.is_empty() {
        println!("✓ No dangling references");
    } else {
        println!("✗ {} dangling references:", result.dangling.len());
        for reference in &result.dangling {
            println!(
                "  {}:{}.{} -> {} ({:?})",
                reference.entity_type,
                reference.record,
                reference.field,
                reference.target,
                reference.policy
            );
        }
    }
}
