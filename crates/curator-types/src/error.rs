//! Pipeline error taxonomy.
//!
//! Every recoverable failure a table can hit while moving through the
//! pipeline is a [`PipelineError`]. Each variant maps to exactly one
//! [`ErrorClass`], and the class's signature is the key the repair
//! knowledge store is indexed by.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::repair::ErrorSignature;

/// Stable classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    UnsupportedTable,
    UnmappedSource,
    MissingRawDir,
    NoSourcesFound,
    ParseError,
    EmptyTransform,
    WriteFailure,
    UploadFailure,
    DuplicateKey,
    SchemaMismatch,
    WarehouseFailure,
    UnsupportedOperation,
    Timeout,
}

impl ErrorClass {
    /// Every class, in taxonomy order.
    pub const ALL: [ErrorClass; 13] = [
        Self::UnsupportedTable,
        Self::UnmappedSource,
        Self::MissingRawDir,
        Self::NoSourcesFound,
        Self::ParseError,
        Self::EmptyTransform,
        Self::WriteFailure,
        Self::UploadFailure,
        Self::DuplicateKey,
        Self::SchemaMismatch,
        Self::WarehouseFailure,
        Self::UnsupportedOperation,
        Self::Timeout,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedTable => "unsupported_table",
            Self::UnmappedSource => "unmapped_source",
            Self::MissingRawDir => "missing_raw_dir",
            Self::NoSourcesFound => "no_sources_found",
            Self::ParseError => "parse_error",
            Self::EmptyTransform => "empty_transform",
            Self::WriteFailure => "write_failure",
            Self::UploadFailure => "upload_failure",
            Self::DuplicateKey => "duplicate_key",
            Self::SchemaMismatch => "schema_mismatch",
            Self::WarehouseFailure => "warehouse_failure",
            Self::UnsupportedOperation => "unsupported_operation",
            Self::Timeout => "timeout",
        }
    }

    /// Signature under which repair decisions for this class are stored.
    #[must_use]
    pub fn signature(self) -> ErrorSignature {
        ErrorSignature::new(self.as_str())
    }

    /// Inverse of [`Self::signature`]. Unknown signatures return `None`.
    #[must_use]
    pub fn from_signature(signature: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == signature)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure of one pipeline step for one table.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("unsupported table '{table}' (available: {})", available.join(", "))]
    UnsupportedTable {
        table: String,
        available: Vec<String>,
    },

    #[error("no table is mapped to source kind '{kind}'")]
    UnmappedSource { kind: String },

    #[error("raw directory not found: {}", path.display())]
    MissingRawDirectory { path: PathBuf },

    #[error("no source documents for table '{table}' under {} matching '{pattern}'", dir.display())]
    NoSourcesFound {
        table: String,
        dir: PathBuf,
        pattern: String,
    },

    #[error("unreadable document {document}: {message}")]
    Parse { document: String, message: String },

    #[error("no rows produced for table '{table}' ({malformed} malformed entries)")]
    EmptyTransform { table: String, malformed: u64 },

    #[error("failed to write {}: {message}", path.display())]
    WriteFailure { path: PathBuf, message: String },

    #[error("failed to upload to {uri}: {message}")]
    UploadFailure { uri: String, message: String },

    #[error("duplicate key loading '{table}': {message}")]
    DuplicateKey { table: String, message: String },

    #[error("schema mismatch loading '{table}': {message}")]
    SchemaMismatch { table: String, message: String },

    #[error("warehouse load of '{table}' failed: {message}")]
    Warehouse { table: String, message: String },

    #[error("{medium} connector does not support {operation}")]
    UnsupportedOperation { medium: String, operation: String },

    #[error("{stage} step for '{table}' exceeded {:.1}s", timeout.as_secs_f64())]
    Timeout {
        table: String,
        stage: String,
        timeout: Duration,
    },
}

impl PipelineError {
    /// Classification used for repair lookup and reporting.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnsupportedTable { .. } => ErrorClass::UnsupportedTable,
            Self::UnmappedSource { .. } => ErrorClass::UnmappedSource,
            Self::MissingRawDirectory { .. } => ErrorClass::MissingRawDir,
            Self::NoSourcesFound { .. } => ErrorClass::NoSourcesFound,
            Self::Parse { .. } => ErrorClass::ParseError,
            Self::EmptyTransform { .. } => ErrorClass::EmptyTransform,
            Self::WriteFailure { .. } => ErrorClass::WriteFailure,
            Self::UploadFailure { .. } => ErrorClass::UploadFailure,
            Self::DuplicateKey { .. } => ErrorClass::DuplicateKey,
            Self::SchemaMismatch { .. } => ErrorClass::SchemaMismatch,
            Self::Warehouse { .. } => ErrorClass::WarehouseFailure,
            Self::UnsupportedOperation { .. } => ErrorClass::UnsupportedOperation,
            Self::Timeout { .. } => ErrorClass::Timeout,
        }
    }

    /// Shorthand for `self.class().signature()`.
    #[must_use]
    pub fn signature(&self) -> ErrorSignature {
        self.class().signature()
    }

    pub fn unsupported(medium: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            medium: medium.into(),
            operation: operation.into(),
        }
    }
}

/// Serializable snapshot of a [`PipelineError`] for outcomes and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub class: ErrorClass,
    pub message: String,
}

impl From<&PipelineError> for ErrorRecord {
    fn from(err: &PipelineError) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_round_trip_through_class() {
        for class in ErrorClass::ALL {
            assert_eq!(ErrorClass::from_signature(class.signature().as_str()), Some(class));
        }
        assert_eq!(ErrorClass::from_signature("solar_flare"), None);
    }

    #[test]
    fn signature_is_independent_of_message() {
        let a = PipelineError::UploadFailure {
            uri: "s3://a/x".into(),
            message: "connection reset".into(),
        };
        let b = PipelineError::UploadFailure {
            uri: "s3://b/y".into(),
            message: "403".into(),
        };
        assert_eq!(a.signature(), b.signature());
        assert_eq!(a.signature().as_str(), "upload_failure");
    }

    #[test]
    fn unsupported_table_message_lists_choices() {
        let err = PipelineError::UnsupportedTable {
            table: "invoices".into(),
            available: vec!["patients".into(), "encounters".into()],
        };
        assert_eq!(
            err.to_string(),
            "unsupported table 'invoices' (available: patients, encounters)"
        );
    }

    #[test]
    fn class_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorClass::MissingRawDir).unwrap();
        assert_eq!(json, "\"missing_raw_dir\"");
    }

    #[test]
    fn error_record_captures_class_and_message() {
        let err = PipelineError::unsupported("local", "upload");
        let record = ErrorRecord::from(&err);
        assert_eq!(record.class, ErrorClass::UnsupportedOperation);
        assert_eq!(record.message, "local connector does not support upload");
    }
}
