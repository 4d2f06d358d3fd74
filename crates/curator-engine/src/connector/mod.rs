//! Persistence media for finished tables.
//!
//! Every medium implements [`Connector`]. The executor only talks to the
//! trait; adding a medium means adding an implementation, never a branch.

pub mod encode;
pub mod local;
pub mod object_store;
pub mod warehouse;

use std::path::PathBuf;

use curator_types::{PipelineError, TableName, TransformResult};

use crate::cancel::CancelToken;

pub use encode::{CsvEncoder, RowEncoder};
pub use local::LocalConnector;
pub use object_store::{FsObjectStore, ObjectStorageConnector, ObjectStore};
pub use warehouse::SqliteWarehouse;

/// `<table>_<UTC timestamp with microseconds>.<ext>`.
#[must_use]
pub fn artifact_file_name(table: &TableName, extension: &str) -> String {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%6f");
    format!("{table}_{stamp}.{extension}")
}

/// A table written to local disk by a previous step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub table: TableName,
    pub path: PathBuf,
    pub row_count: u64,
}

/// How a load treats what the destination already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Insert; an existing key fails the load.
    #[default]
    Append,
    /// Delete everything, then insert.
    Replace,
    /// Insert rows whose key is new; rows with an existing key are kept as stored.
    Upsert,
}

impl LoadMode {
    /// `truncate` wins over `upsert`.
    #[must_use]
    pub fn select(truncate: bool, upsert: bool) -> Self {
        if truncate {
            Self::Replace
        } else if upsert {
            Self::Upsert
        } else {
            Self::Append
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Replace => "replace",
            Self::Upsert => "upsert",
        }
    }
}

/// Per-call settings for a connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub mode: LoadMode,
    /// Rows per insert batch, for media that batch.
    pub chunk_size: usize,
    /// Key columns, for media that enforce keys.
    pub primary_key: Vec<String>,
    /// Claimed by the medium right before its write becomes visible.
    pub cancel: CancelToken,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            mode: LoadMode::Append,
            chunk_size: 1000,
            primary_key: Vec::new(),
            cancel: CancelToken::new(),
        }
    }
}

/// Where a connector put the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// File path, object URI or `medium:table` reference.
    pub location: String,
    pub rows: u64,
}

/// A persistence medium.
///
/// Both operations default to [`PipelineError::UnsupportedOperation`], so a
/// medium implements only what it can do. Calls block; the executor runs
/// them off the async runtime.
pub trait Connector: Send + Sync {
    /// Short medium name used in logs and errors.
    fn medium(&self) -> &'static str;

    /// Persist transformed rows directly.
    ///
    /// # Errors
    ///
    /// Returns a classified [`PipelineError`] for the medium's failures.
    fn persist(
        &self,
        data: &TransformResult,
        options: &LoadOptions,
    ) -> Result<Delivery, PipelineError> {
        let _ = (data, options);
        Err(PipelineError::unsupported(self.medium(), "persist"))
    }

    /// Load a previously written artifact.
    ///
    /// # Errors
    ///
    /// Returns a classified [`PipelineError`] for the medium's failures.
    fn load_from_artifact(
        &self,
        artifact: &Artifact,
        options: &LoadOptions,
    ) -> Result<Delivery, PipelineError> {
        let _ = (artifact, options);
        Err(PipelineError::unsupported(self.medium(), "load_from_artifact"))
    }
}
