//! Catalog documents and the swappable catalog handle.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{bail, Context, Result};
use curator_types::{SchemaCatalog, SchemaEntry, SourceKind, TableName};
use serde::Deserialize;

use crate::field::FieldExpr;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDocument {
    tables: BTreeMap<String, TableDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TableDocument {
    columns: Vec<String>,
    #[serde(default, alias = "resource_types")]
    source_kinds: Vec<String>,
    #[serde(default)]
    primary_key: Vec<String>,
    #[serde(default)]
    fields: BTreeMap<String, String>,
}

/// Encoding of a catalog document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Pick the format from a file extension; anything but `.json` is YAML.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

fn clean(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse and validate a catalog document.
///
/// # Errors
///
/// Returns an error for malformed documents, invalid field expressions
/// (all of them reported together) or structural catalog problems.
pub fn parse_catalog_str(content: &str, format: DocumentFormat) -> Result<SchemaCatalog> {
    let document: CatalogDocument = match format {
        DocumentFormat::Json => {
            serde_json::from_str(content).context("Failed to parse catalog JSON")?
        }
        DocumentFormat::Yaml => {
            serde_yaml::from_str(content).context("Failed to parse catalog YAML")?
        }
    };

    let mut errors = Vec::new();
    let mut entries = Vec::with_capacity(document.tables.len());
    for (name, table) in document.tables {
        let fields: BTreeMap<String, String> = table
            .fields
            .into_iter()
            .map(|(column, expr)| (column.trim().to_string(), expr))
            .collect();
        for (column, expr) in &fields {
            if let Err(e) = FieldExpr::parse(expr) {
                errors.push(format!("{name}.{column}: {e}"));
            }
        }
        entries.push(SchemaEntry {
            table: TableName::new(name.trim()),
            columns: clean(table.columns),
            source_kinds: clean(table.source_kinds)
                .into_iter()
                .map(SourceKind::new)
                .collect(),
            primary_key: clean(table.primary_key),
            fields,
        });
    }
    if !errors.is_empty() {
        bail!("Invalid field expressions:\n  - {}", errors.join("\n  - "));
    }

    Ok(SchemaCatalog::new(entries)?)
}

/// Load a catalog document from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is invalid.
pub fn load_catalog(path: &Path) -> Result<SchemaCatalog> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Schema configuration file not found: {}", path.display()))?;
    let catalog = parse_catalog_str(&content, DocumentFormat::from_path(path))
        .with_context(|| format!("Invalid schema configuration: {}", path.display()))?;
    tracing::info!(path = %path.display(), tables = catalog.len(), "Loaded schema catalog");
    Ok(catalog)
}

/// Load `path` when given, otherwise the built-in catalog.
///
/// # Errors
///
/// Returns an error if `path` is given and cannot be loaded.
pub fn load_catalog_or_default(path: Option<&Path>) -> Result<SchemaCatalog> {
    path.map_or_else(|| Ok(SchemaCatalog::healthcare()), load_catalog)
}

/// Shared, atomically swappable catalog.
///
/// Directives take a [`snapshot`](Self::snapshot) when they start, so a
/// swap only affects directives submitted afterwards.
#[derive(Debug)]
pub struct CatalogHandle {
    current: RwLock<Arc<SchemaCatalog>>,
}

impl CatalogHandle {
    #[must_use]
    pub fn new(catalog: SchemaCatalog) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    /// The catalog new directives will use.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SchemaCatalog> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace the catalog, returning the previous one.
    pub fn swap(&self, catalog: SchemaCatalog) -> Arc<SchemaCatalog> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(catalog))
    }

    /// Load `path` and swap it in. The current catalog stays on failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be loaded.
    pub fn reload(&self, path: &Path) -> Result<()> {
        let catalog = load_catalog(path)?;
        self.swap(catalog);
        Ok(())
    }
}

impl Default for CatalogHandle {
    fn default() -> Self {
        Self::new(SchemaCatalog::healthcare())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r"
tables:
  invoices:
    columns: [id, amount, customer]
    source_kinds: [Invoice]
    primary_key: [id]
    fields:
      customer: ref:customer.reference
";

    #[test]
    fn parse_yaml_document() {
        let catalog = parse_catalog_str(YAML, DocumentFormat::Yaml).unwrap();
        let entry = catalog.resolve("invoices").unwrap();
        assert_eq!(entry.columns, vec!["id", "amount", "customer"]);
        assert_eq!(entry.primary_key, vec!["id"]);
        assert_eq!(catalog.table_for_source_kind("Invoice").unwrap().as_str(), "invoices");
    }

    #[test]
    fn parse_json_with_legacy_resource_types() {
        let json = r#"{"tables": {"patients": {"columns": ["id", " ", "gender"], "resource_types": ["Patient"]}}}"#;
        let catalog = parse_catalog_str(json, DocumentFormat::Json).unwrap();
        let entry = catalog.resolve("patients").unwrap();
        assert_eq!(entry.columns, vec!["id", "gender"]);
        assert!(entry.claims("Patient"));
    }

    #[test]
    fn empty_tables_rejected() {
        let err = parse_catalog_str("tables: {}", DocumentFormat::Yaml).unwrap_err();
        assert!(format!("{err:#}").contains("at least one table"));
    }

    #[test]
    fn bad_expressions_all_reported() {
        let yaml = r"
tables:
  a:
    columns: [x, y]
    source_kinds: [A]
    fields:
      x: 'p..q'
      y: 'concat:'
";
        let err = parse_catalog_str(yaml, DocumentFormat::Yaml).unwrap_err().to_string();
        assert!(err.contains("a.x"));
        assert!(err.contains("a.y"));
    }

    #[test]
    fn builtin_expressions_compile() {
        let catalog = SchemaCatalog::healthcare();
        for entry in catalog.entries() {
            for column in &entry.columns {
                FieldExpr::parse(entry.field_expr(column)).unwrap();
            }
        }
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(DocumentFormat::from_path(Path::new("c.JSON")), DocumentFormat::Json);
        assert_eq!(DocumentFormat::from_path(Path::new("c.yml")), DocumentFormat::Yaml);
    }

    #[test]
    fn swap_leaves_existing_snapshots_untouched() {
        let handle = CatalogHandle::default();
        let before = handle.snapshot();
        let replacement = parse_catalog_str(YAML, DocumentFormat::Yaml).unwrap();
        let previous = handle.swap(replacement);

        assert!(Arc::ptr_eq(&before, &previous));
        assert!(before.resolve("patients").is_ok());
        assert!(handle.snapshot().resolve("patients").is_err());
        assert!(handle.snapshot().resolve("invoices").is_ok());
    }

    #[test]
    fn failed_reload_keeps_current() {
        let handle = CatalogHandle::default();
        assert!(handle.reload(Path::new("/no/such/catalog.yaml")).is_err());
        assert!(handle.snapshot().resolve("patients").is_ok());
    }
}
