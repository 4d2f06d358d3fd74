//! Flattening raw documents into catalog-shaped rows.
//!
//! Reading happens up front ([`read_sources`], blocking I/O). Everything
//! after that is synchronous, in-memory work.

use std::collections::HashSet;

use curator_types::{PipelineError, Row, SchemaCatalog, SourceHandle, TableName, TransformResult};
use serde_json::Value;

use crate::field::FieldExpr;

/// Raw bytes of one source document, or why they could not be read.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub content: Result<Vec<u8>, String>,
}

/// Read every source. Unreadable files are kept as failed documents.
#[must_use]
pub fn read_sources(sources: &[SourceHandle]) -> Vec<Document> {
    sources
        .iter()
        .map(|source| Document {
            name: source.name(),
            content: std::fs::read(&source.path).map_err(|e| e.to_string()),
        })
        .collect()
}

/// Row-count policy of one transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOptions {
    pub max_records: Option<usize>,
    pub require_rows: bool,
}

#[derive(Default)]
struct Tally {
    malformed: u64,
    first_failure: Option<(String, String)>,
}

impl Tally {
    /// Input that cannot be attributed to any table. Counted, never fatal.
    fn unrouted(&mut self, document: &str, message: &str) {
        tracing::warn!(document, message, "Skipping unroutable input");
        self.malformed += 1;
    }

    /// An entry of this table that could not be flattened.
    fn fail(&mut self, document: &str, message: String) {
        tracing::warn!(document, %message, "Skipping malformed input");
        self.malformed += 1;
        if self.first_failure.is_none() {
            self.first_failure = Some((document.to_string(), message));
        }
    }
}

/// Entries of a document: a bundle's `entry[].resource`, or the document
/// itself when it is a bare resource.
fn resources<'a>(document: &'a Value) -> Result<Vec<Option<&'a Value>>, String> {
    let Value::Object(map) = document else {
        return Err("top-level value is not an object".to_string());
    };
    match map.get("entry") {
        Some(Value::Array(entries)) => Ok(entries
            .iter()
            .map(|e| e.get("resource").filter(|r| r.is_object()))
            .collect()),
        Some(_) => Err("'entry' is not an array".to_string()),
        None if map.contains_key("resourceType") => Ok(vec![Some(document)]),
        None => Ok(Vec::new()),
    }
}

/// Flatten `documents` into rows for `table`.
///
/// Rows are deduplicated on full-row identity (first occurrence kept),
/// then truncated to `max_records`. Malformed documents and entries are
/// counted and skipped. Only entries routed to `table` can fail it;
/// undecodable documents and entries without a kind belong to no table.
///
/// # Errors
///
/// - [`PipelineError::UnsupportedTable`] if the catalog lacks `table`.
/// - [`PipelineError::SchemaMismatch`] if a field expression is invalid.
/// - [`PipelineError::Parse`] if malformed entries of `table` left it empty.
/// - [`PipelineError::EmptyTransform`] if no rows were produced and rows
///   are required.
pub fn transform(
    catalog: &SchemaCatalog,
    table: &TableName,
    documents: &[Document],
    options: TransformOptions,
) -> Result<TransformResult, PipelineError> {
    let entry = catalog.resolve(table.as_str())?;
    let exprs = entry
        .columns
        .iter()
        .map(|column| FieldExpr::parse(entry.field_expr(column)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PipelineError::SchemaMismatch {
            table: entry.table.to_string(),
            message: e.to_string(),
        })?;

    let mut tally = Tally::default();
    let mut seen: HashSet<Row> = HashSet::new();
    let mut rows = Vec::new();
    let mut duplicates = 0u64;

    for document in documents {
        let bytes = match &document.content {
            Ok(bytes) => bytes,
            Err(e) => {
                tally.unrouted(&document.name, &format!("unreadable: {e}"));
                continue;
            }
        };
        let value: Value = match serde_json::from_slice(bytes) {
            Ok(v) => v,
            Err(e) => {
                tally.unrouted(&document.name, &format!("invalid JSON: {e}"));
                continue;
            }
        };
        let entries = match resources(&value) {
            Ok(entries) => entries,
            Err(e) => {
                tally.unrouted(&document.name, &e);
                continue;
            }
        };

        for (index, resource) in entries.into_iter().enumerate() {
            let Some(kind) = resource
                .and_then(|r| r.get("resourceType"))
                .and_then(Value::as_str)
            else {
                tally.unrouted(&document.name, &format!("entry {index} has no resource kind"));
                continue;
            };
            if catalog.route(kind) != Some(&entry.table) {
                continue;
            }
            let Some(resource) = resource else { continue };

            let values: Result<Vec<_>, _> =
                exprs.iter().map(|expr| expr.evaluate(resource)).collect();
            match values {
                Ok(values) => {
                    let row = Row::new(values);
                    if seen.insert(row.clone()) {
                        rows.push(row);
                    } else {
                        duplicates += 1;
                    }
                }
                Err(e) => tally.fail(&document.name, format!("entry {index}: {e}")),
            }
        }
    }

    if let Some(cap) = options.max_records {
        rows.truncate(cap);
    }

    if rows.is_empty() {
        if let Some((document, message)) = tally.first_failure {
            return Err(PipelineError::Parse { document, message });
        }
        if options.require_rows {
            return Err(PipelineError::EmptyTransform {
                table: entry.table.to_string(),
                malformed: tally.malformed,
            });
        }
    }

    tracing::info!(
        table = %entry.table,
        rows = rows.len(),
        duplicates,
        malformed = tally.malformed,
        "Transform complete"
    );
    Ok(TransformResult {
        table: entry.table.clone(),
        columns: entry.columns.clone(),
        rows,
        malformed: tally.malformed,
        duplicates,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(name: &str, value: &Value) -> Document {
        Document {
            name: name.to_string(),
            content: Ok(serde_json::to_vec(value).unwrap()),
        }
    }

    fn bundle(resources: &[Value]) -> Value {
        json!({"resourceType": "Bundle", "entry": resources.iter().map(|r| json!({"resource": r})).collect::<Vec<_>>()})
    }

    fn encounter(id: &str) -> Value {
        json!({
            "resourceType": "Encounter",
            "id": id,
            "period": {"start": "2020-01-01T08:00:00Z"},
            "subject": {"reference": "urn:uuid:p1"},
            "class": {"code": "AMB", "display": "ambulatory"}
        })
    }

    fn opts(max_records: Option<usize>, require_rows: bool) -> TransformOptions {
        TransformOptions {
            max_records,
            require_rows,
        }
    }

    fn encounters() -> TableName {
        TableName::new("encounters")
    }

    #[test]
    fn flattens_in_column_order() {
        let catalog = SchemaCatalog::healthcare();
        let docs = vec![doc("b.json", &bundle(&[encounter("e1")]))];
        let result = transform(&catalog, &encounters(), &docs, opts(None, true)).unwrap();
        assert_eq!(result.columns[..3], ["id", "date", "patient"]);
        let row = &result.rows[0];
        assert_eq!(row.len(), result.columns.len());
        assert_eq!(row.get(0), Some("e1"));
        assert_eq!(row.get(1), Some("2020-01-01"));
        assert_eq!(row.get(2), Some("p1"));
        assert_eq!(row.get(3), Some("AMB"));
        assert_eq!(row.get(5), None);
    }

    #[test]
    fn exact_duplicates_dropped_first_kept() {
        let catalog = SchemaCatalog::healthcare();
        let docs = vec![doc(
            "b.json",
            &bundle(&[encounter("e1"), encounter("e2"), encounter("e1")]),
        )];
        let result = transform(&catalog, &encounters(), &docs, opts(None, true)).unwrap();
        let ids: Vec<_> = result.rows.iter().map(|r| r.get(0).unwrap()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);
        assert_eq!(result.duplicates, 1);
    }

    #[test]
    fn truncation_keeps_first_rows() {
        let catalog = SchemaCatalog::healthcare();
        let all: Vec<Value> = (0..5).map(|i| encounter(&format!("e{i}"))).collect();
        let docs = vec![doc("b.json", &bundle(&all))];
        let result = transform(&catalog, &encounters(), &docs, opts(Some(2), true)).unwrap();
        let ids: Vec<_> = result.rows.iter().map(|r| r.get(0).unwrap()).collect();
        assert_eq!(ids, vec!["e0", "e1"]);
    }

    #[test]
    fn other_kinds_ignored_and_malformed_counted() {
        let catalog = SchemaCatalog::healthcare();
        let docs = vec![
            doc(
                "b.json",
                &json!({"entry": [
                    {"resource": encounter("e1")},
                    {"resource": {"resourceType": "Patient", "id": "p1"}},
                    {"resource": {"resourceType": "Claim", "id": "c1"}},
                    {"fullUrl": "no resource here"},
                    {"resource": {"resourceType": "Encounter", "id": {"nested": true}}}
                ]}),
            ),
            Document {
                name: "broken.json".into(),
                content: Ok(b"{not json".to_vec()),
            },
        ];
        let result = transform(&catalog, &encounters(), &docs, opts(None, true)).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.malformed, 3);
    }

    #[test]
    fn empty_output_fails_when_rows_required() {
        let catalog = SchemaCatalog::healthcare();
        let docs = vec![doc("b.json", &bundle(&[json!({"resourceType": "Patient", "id": "p"})]))];
        let err = transform(&catalog, &encounters(), &docs, opts(None, true)).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyTransform { malformed: 0, .. }));

        let ok = transform(&catalog, &encounters(), &docs, opts(None, false)).unwrap();
        assert!(ok.rows.is_empty());
    }

    #[test]
    fn parse_failures_that_empty_the_table_escalate() {
        let catalog = SchemaCatalog::healthcare();
        let docs = vec![doc(
            "bad.json",
            &bundle(&[json!({"resourceType": "Encounter", "id": {"nested": true}})]),
        )];
        let err = transform(&catalog, &encounters(), &docs, opts(None, false)).unwrap_err();
        match err {
            PipelineError::Parse { document, .. } => assert_eq!(document, "bad.json"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn undecodable_documents_never_fail_a_table() {
        let catalog = SchemaCatalog::healthcare();
        let docs = vec![Document {
            name: "bad.json".into(),
            content: Ok(b"[1, 2".to_vec()),
        }];
        let ok = transform(&catalog, &encounters(), &docs, opts(None, false)).unwrap();
        assert!(ok.rows.is_empty());
        assert_eq!(ok.malformed, 1);

        let err = transform(&catalog, &encounters(), &docs, opts(None, true)).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyTransform { malformed: 1, .. }));
    }

    #[test]
    fn entries_without_kind_do_not_fail_unrelated_tables() {
        let catalog = SchemaCatalog::healthcare();
        let docs = vec![doc(
            "followup.json",
            &json!({"resourceType": "Bundle", "entry": [
                {"resource": encounter("e1")},
                {"request": {"method": "POST"}}
            ]}),
        )];
        let procedures = TableName::new("procedures");
        let ok = transform(&catalog, &procedures, &docs, opts(None, false)).unwrap();
        assert!(ok.rows.is_empty());
        assert_eq!(ok.malformed, 1);

        let loaded = transform(&catalog, &encounters(), &docs, opts(None, false)).unwrap();
        assert_eq!(loaded.rows.len(), 1);
    }

    #[test]
    fn bare_resource_document_accepted() {
        let catalog = SchemaCatalog::healthcare();
        let docs = vec![doc("single.json", &encounter("solo"))];
        let result = transform(&catalog, &encounters(), &docs, opts(None, true)).unwrap();
        assert_eq!(result.rows[0].get(0), Some("solo"));
    }
}
