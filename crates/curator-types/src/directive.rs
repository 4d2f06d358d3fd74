//! Directives: what the caller asks the pipeline to do.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::TableName;

/// Table selection of a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Table(TableName),
    All,
}

impl Target {
    /// Parse a caller-supplied table name; `"all"` (any case) selects every table.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        if name.eq_ignore_ascii_case("all") {
            Self::All
        } else {
            Self::Table(TableName::new(name))
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table(t) => f.write_str(t.as_str()),
            Self::All => f.write_str("all"),
        }
    }
}

impl Serialize for Target {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Fully resolved options of one directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectiveOptions {
    /// Replace warehouse contents instead of appending.
    pub truncate: bool,
    /// Keep stored rows whose key reappears instead of failing the load.
    /// `truncate` takes precedence.
    pub upsert: bool,
    /// Keep only the first N rows after deduplication.
    pub max_records: Option<usize>,
    pub enable_upload: bool,
    pub enable_warehouse_load: bool,
    /// An empty transform fails the table instead of skipping it.
    pub require_rows: bool,
    pub chunk_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_timeout: Option<Duration>,
}

impl Default for DirectiveOptions {
    fn default() -> Self {
        Self {
            truncate: false,
            upsert: false,
            max_records: None,
            enable_upload: false,
            enable_warehouse_load: false,
            require_rows: true,
            chunk_size: 1000,
            step_timeout: None,
        }
    }
}

/// A resolved directive. Immutable once submitted to the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Directive {
    pub target: Target,
    pub options: DirectiveOptions,
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    /// Catalog document used for this directive only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_config: Option<PathBuf>,
}

/// Caller-facing directive input. Everything except `table` overrides a
/// process-wide default when set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DirectiveRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_config: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_records: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_upload: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_warehouse_load: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upsert: Option<bool>,
}

impl DirectiveRequest {
    /// Request targeting one table (or `"all"`) with no overrides.
    #[must_use]
    pub fn for_table(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            ..Self::default()
        }
    }
}
