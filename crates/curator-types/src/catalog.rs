//! Schema catalog: table definitions and source-kind routing.
//!
//! A [`SchemaCatalog`] is built once and never mutated. Reloading produces a
//! new catalog; swapping it in is the engine's concern.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Target table name (e.g. `"patients"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableName(String);

impl TableName {
    /// Create a new table name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for TableName {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// Discriminator carried by a raw record (e.g. `"Patient"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceKind(String);

impl SourceKind {
    /// Create a new source kind.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for SourceKind {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Definition of one target table.
///
/// `fields` maps a column to the path expression that extracts it from a
/// raw record. Columns without an entry read the top-level key of the same
/// name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub table: TableName,
    pub columns: Vec<String>,
    pub source_kinds: Vec<SourceKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_key: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl SchemaEntry {
    /// Path expression used to fill `column`.
    #[must_use]
    pub fn field_expr<'a>(&'a self, column: &'a str) -> &'a str {
        self.fields.get(column).map_or(column, String::as_str)
    }

    /// Whether records of `kind` are routed to this table.
    #[must_use]
    pub fn claims(&self, kind: &str) -> bool {
        self.source_kinds.iter().any(|k| k.as_str() == kind)
    }
}

/// Structural problems found while assembling a catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("schema catalog must include at least one table")]
    Empty,
    #[error("table '{table}' declares no columns")]
    NoColumns { table: String },
    #[error("table '{table}' declares column '{column}' more than once")]
    DuplicateColumn { table: String, column: String },
    #[error("table '{table}' maps field for unknown column '{column}'")]
    UnknownFieldColumn { table: String, column: String },
    #[error("table '{table}' primary key references unknown column '{column}'")]
    UnknownKeyColumn { table: String, column: String },
    #[error("source kind '{kind}' is claimed by both '{first}' and '{second}'")]
    KindClaimedTwice {
        kind: String,
        first: String,
        second: String,
    },
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Static mapping from source kinds to target tables and column layouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaCatalog {
    tables: BTreeMap<TableName, SchemaEntry>,
    routes: HashMap<SourceKind, TableName>,
}

impl SchemaCatalog {
    /// Assemble a catalog, rejecting structurally invalid definitions.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the catalog is empty, a table has no
    /// (or duplicate) columns, a field or key names an unknown column, or
    /// two tables claim the same source kind.
    pub fn new(entries: impl IntoIterator<Item = SchemaEntry>) -> Result<Self, CatalogError> {
        let mut tables = BTreeMap::new();
        let mut routes: HashMap<SourceKind, TableName> = HashMap::new();

        for mut entry in entries {
            let table = entry.table.as_str().to_string();
            if entry.columns.is_empty() {
                return Err(CatalogError::NoColumns { table });
            }
            let mut seen = HashSet::new();
            for column in &entry.columns {
                if !seen.insert(column.as_str()) {
                    return Err(CatalogError::DuplicateColumn {
                        table,
                        column: column.clone(),
                    });
                }
            }
            if let Some(column) = entry.fields.keys().find(|c| !seen.contains(c.as_str())) {
                return Err(CatalogError::UnknownFieldColumn {
                    table,
                    column: column.clone(),
                });
            }
            if let Some(column) = entry.primary_key.iter().find(|c| !seen.contains(c.as_str())) {
                return Err(CatalogError::UnknownKeyColumn {
                    table,
                    column: column.clone(),
                });
            }

            entry.source_kinds.dedup();
            for kind in &entry.source_kinds {
                if let Some(first) = routes.get(kind) {
                    if first != &entry.table {
                        return Err(CatalogError::KindClaimedTwice {
                            kind: kind.to_string(),
                            first: first.to_string(),
                            second: table,
                        });
                    }
                }
                routes.insert(kind.clone(), entry.table.clone());
            }
            tables.insert(entry.table.clone(), entry);
        }

        if tables.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Self { tables, routes })
    }

    /// Look up a table definition.
    ///
    /// Matching is exact first, then case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnsupportedTable`] if no table matches.
    pub fn resolve(&self, table: &str) -> Result<&SchemaEntry, PipelineError> {
        let wanted = table.trim();
        if let Some(entry) = self.tables.get(&TableName::new(wanted)) {
            return Ok(entry);
        }
        self.tables
            .values()
            .find(|entry| entry.table.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| PipelineError::UnsupportedTable {
                table: wanted.to_string(),
                available: self.tables.keys().map(ToString::to_string).collect(),
            })
    }

    /// Table that claims records of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnmappedSource`] if no table claims it.
    pub fn table_for_source_kind(&self, kind: &str) -> Result<&TableName, PipelineError> {
        self.route(kind)
            .ok_or_else(|| PipelineError::UnmappedSource {
                kind: kind.trim().to_string(),
            })
    }

    /// Non-failing variant of [`Self::table_for_source_kind`].
    #[must_use]
    pub fn route(&self, kind: &str) -> Option<&TableName> {
        self.routes.get(&SourceKind::new(kind.trim()))
    }

    /// Table names in catalog order.
    pub fn table_names(&self) -> impl Iterator<Item = &TableName> {
        self.tables.keys()
    }

    /// Table definitions in catalog order.
    pub fn entries(&self) -> impl Iterator<Item = &SchemaEntry> {
        self.tables.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Built-in healthcare catalog used when no schema config is supplied.
    #[must_use]
    pub fn healthcare() -> Self {
        let entries = vec![
            entry(
                "patients",
                &[
                    ("id", "id"),
                    ("birthdate", "date:birthDate"),
                    ("deathdate", "date:deceasedDateTime"),
                    ("ssn", "extension[url~SocialSecurityNumber].valueString"),
                    ("drivers", "null"),
                    ("passport", "null"),
                    ("prefix", "name.0.prefix.0"),
                    ("first", "name.0.given.0"),
                    ("last", "name.0.family"),
                    ("suffix", "name.0.suffix.0"),
                    ("maiden", "null"),
                    ("marital", "maritalStatus.text"),
                    ("race", "null"),
                    ("ethnicity", "null"),
                    ("gender", "gender"),
                    ("birthplace", "extension.2.valueAddress.city"),
                    (
                        "address",
                        "concat:address.0.line.0,address.0.line.1,address.0.city,\
                         address.0.state,address.0.postalCode,address.0.country",
                    ),
                ],
                &["Patient"],
                &["id"],
            ),
            entry(
                "encounters",
                &[
                    ("id", "id"),
                    ("date", "date:period.start | meta.lastUpdated"),
                    ("patient", "ref:subject.reference"),
                    ("code", "type.0.coding.0.code | class.code"),
                    ("description", "type.0.text | class.display"),
                    ("reasoncode", "reasonCode.0.coding.0.code"),
                    ("reasondescription", "reasonCode.0.text"),
                ],
                &["Encounter"],
                &["id"],
            ),
            entry(
                "conditions",
                &[
                    ("start", "date:onsetDateTime"),
                    ("stop", "date:abatementDateTime | assertedDate"),
                    ("patient", "ref:subject.reference"),
                    ("encounter", ENCOUNTER_REF),
                    ("code", "code.coding.0.code"),
                    ("description", "code.text"),
                ],
                &["Condition"],
                &[],
            ),
            entry(
                "observations",
                &[
                    ("date", "date:effectiveDateTime"),
                    ("patient", "ref:subject.reference"),
                    ("encounter", ENCOUNTER_REF),
                    ("code", "code.coding.0.code"),
                    ("description", "code.text"),
                    ("value", "valueQuantity.value | valueCodeableConcept.text"),
                    ("units", "valueQuantity.unit"),
                ],
                &["Observation"],
                &[],
            ),
            entry(
                "medications",
                &[
                    ("start", "date:authoredOn | dispenseRequest.validityPeriod.start"),
                    ("stop", "date:dispenseRequest.validityPeriod.end"),
                    ("patient", "ref:subject.reference"),
                    ("encounter", ENCOUNTER_REF),
                    ("code", "medicationCodeableConcept.coding.0.code"),
                    ("description", "medicationCodeableConcept.text"),
                    ("reasoncode", "reasonCode.0.coding.0.code"),
                    ("reasondescription", "reasonCode.0.text"),
                ],
                &["MedicationRequest", "MedicationOrder", "MedicationPrescription"],
                &[],
            ),
            entry(
                "procedures",
                &[
                    ("date", "date:performedDateTime"),
                    ("patient", "ref:subject.reference"),
                    ("encounter", ENCOUNTER_REF),
                    ("code", "code.coding.0.code"),
                    ("description", "code.text"),
                    ("reasoncode", "reasonCode.0.coding.0.code"),
                    ("reasondescription", "reasonCode.0.text"),
                ],
                &["Procedure"],
                &[],
            ),
        ];
        let mut routes = HashMap::new();
        let mut tables = BTreeMap::new();
        for entry in entries {
            for kind in &entry.source_kinds {
                routes.insert(kind.clone(), entry.table.clone());
            }
            tables.insert(entry.table.clone(), entry);
        }
        Self { tables, routes }
    }
}

const ENCOUNTER_REF: &str = "ref:encounter.reference | context.reference";

fn entry(
    table: &str,
    fields: &[(&str, &str)],
    kinds: &[&str],
    primary_key: &[&str],
) -> SchemaEntry {
    SchemaEntry {
        table: TableName::new(table),
        columns: fields.iter().map(|(c, _)| (*c).to_string()).collect(),
        source_kinds: kinds.iter().map(|k| SourceKind::new(*k)).collect(),
        primary_key: primary_key.iter().map(|c| (*c).to_string()).collect(),
        fields: fields
            .iter()
            .filter(|(column, expr)| column != expr)
            .map(|(c, e)| ((*c).to_string(), (*e).to_string()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple(table: &str, kinds: &[&str]) -> SchemaEntry {
        SchemaEntry {
            table: TableName::new(table),
            columns: vec!["id".into(), "name".into()],
            source_kinds: kinds.iter().map(|k| SourceKind::new(*k)).collect(),
            primary_key: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    #[test]
    fn healthcare_catalog_has_six_sorted_tables() {
        let catalog = SchemaCatalog::healthcare();
        let names: Vec<&str> = catalog.table_names().map(TableName::as_str).collect();
        assert_eq!(
            names,
            vec![
                "conditions",
                "encounters",
                "medications",
                "observations",
                "patients",
                "procedures"
            ]
        );
        assert_eq!(catalog.resolve("patients").unwrap().columns.len(), 17);
    }

    #[test]
    fn resolve_unknown_table_lists_available() {
        let catalog = SchemaCatalog::healthcare();
        let err = catalog.resolve("invoices").unwrap_err();
        match err {
            PipelineError::UnsupportedTable { table, available } => {
                assert_eq!(table, "invoices");
                assert!(available.contains(&"patients".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn resolve_is_case_insensitive_fallback() {
        let catalog = SchemaCatalog::healthcare();
        assert_eq!(catalog.resolve(" Patients ").unwrap().table.as_str(), "patients");
    }

    #[test]
    fn medication_kinds_route_to_one_table() {
        let catalog = SchemaCatalog::healthcare();
        for kind in ["MedicationRequest", "MedicationOrder", "MedicationPrescription"] {
            assert_eq!(catalog.table_for_source_kind(kind).unwrap().as_str(), "medications");
        }
        assert!(matches!(
            catalog.table_for_source_kind("Claim"),
            Err(PipelineError::UnmappedSource { .. })
        ));
    }

    #[test]
    fn healthcare_catalog_passes_validation() {
        let catalog = SchemaCatalog::healthcare();
        let rebuilt = SchemaCatalog::new(catalog.entries().cloned()).unwrap();
        assert_eq!(rebuilt, catalog);
    }

    #[test]
    fn empty_catalog_rejected() {
        assert_eq!(SchemaCatalog::new(Vec::new()).unwrap_err(), CatalogError::Empty);
    }

    #[test]
    fn kind_claimed_twice_rejected() {
        let err = SchemaCatalog::new(vec![simple("a", &["K"]), simple("b", &["K"])]).unwrap_err();
        assert!(matches!(err, CatalogError::KindClaimedTwice { .. }));
    }

    #[test]
    fn duplicate_column_rejected() {
        let mut bad = simple("a", &["K"]);
        bad.columns.push("id".into());
        let err = SchemaCatalog::new(vec![bad]).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateColumn { .. }));
    }

    #[test]
    fn unknown_key_column_rejected() {
        let mut bad = simple("a", &["K"]);
        bad.primary_key = vec!["missing".into()];
        let err = SchemaCatalog::new(vec![bad]).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownKeyColumn { .. }));
    }

    #[test]
    fn field_expr_defaults_to_column_name() {
        let catalog = SchemaCatalog::healthcare();
        let patients = catalog.resolve("patients").unwrap();
        assert_eq!(patients.field_expr("id"), "id");
        assert_eq!(patients.field_expr("first"), "name.0.given.0");
    }
}
