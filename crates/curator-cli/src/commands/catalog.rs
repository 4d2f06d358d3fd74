use std::path::Path;

use anyhow::Result;
use curator_engine::catalog::load_catalog_or_default;
use curator_engine::EngineSettings;
use curator_types::SchemaCatalog;
use serde_json::{json, Value};

fn catalog_json(catalog: &SchemaCatalog) -> Value {
    let tables: serde_json::Map<String, Value> = catalog
        .entries()
        .map(|entry| {
            let fields: serde_json::Map<String, Value> = entry
                .columns
                .iter()
                .map(|c| (c.clone(), Value::from(entry.field_expr(c))))
                .collect();
            (
                entry.table.to_string(),
                json!({
                    "columns": entry.columns,
                    "source_kinds": entry.source_kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                    "primary_key": entry.primary_key,
                    "fields": fields,
                }),
            )
        })
        .collect();
    json!({ "tables": tables })
}

/// Execute the `catalog` command.
pub fn execute(settings: &EngineSettings, schema_config: Option<&Path>, json: bool) -> Result<()> {
    let path = schema_config.or(settings.schema_config.as_deref());
    let catalog = load_catalog_or_default(path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&catalog_json(&catalog))?);
        return Ok(());
    }

    for entry in catalog.entries() {
        let kinds: Vec<&str> = entry.source_kinds.iter().map(|k| k.as_str()).collect();
        println!(
            "{:14} {} columns  <- {}",
            entry.table.as_str(),
            entry.columns.len(),
            kinds.join(", ")
        );
        if !entry.primary_key.is_empty() {
            println!("  key: {}", entry.primary_key.join(", "));
        }
    }
    Ok(())
}
