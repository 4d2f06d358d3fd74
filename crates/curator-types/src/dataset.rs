//! Directive-scoped intermediate results: extracted sources and flattened rows.

use std::path::PathBuf;

use serde::Serialize;

use crate::catalog::TableName;

/// A located source document, not yet read.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SourceHandle {
    pub path: PathBuf,
}

impl SourceHandle {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File name used in log and error messages.
    #[must_use]
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |n| n.to_string_lossy().into_owned())
    }
}

/// Output of the extract step. `sources` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractResult {
    pub table: TableName,
    pub source_count: usize,
    pub sources: Vec<SourceHandle>,
}

/// One flattened record; values follow the catalog column order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Row(Vec<Option<String>>);

impl Row {
    #[must_use]
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn values(&self) -> &[Option<String>] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value of column `index`, `None` for nulls.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).and_then(|v| v.as_deref())
    }
}

/// Output of the transform step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformResult {
    pub table: TableName,
    pub columns: Vec<String>,
    /// Deduplicated on full-row identity, then truncated.
    pub rows: Vec<Row>,
    /// Entries or documents that could not be flattened.
    pub malformed: u64,
    /// Exact duplicates dropped.
    pub duplicates: u64,
}

impl TransformResult {
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.rows.len() as u64
    }
}
