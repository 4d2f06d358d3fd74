//! Object storage connector.
//!
//! Cloud SDKs plug in behind [`ObjectStore`]. The shipped [`FsObjectStore`]
//! mirrors `bucket/key` under a local root.

use std::path::PathBuf;
use std::sync::Arc;

use curator_types::{PipelineError, TableName, TransformResult};

use super::{artifact_file_name, Artifact, Connector, Delivery, LoadOptions, RowEncoder};

/// Minimal object store capability.
pub trait ObjectStore: Send + Sync {
    /// URI scheme used when reporting object locations.
    fn scheme(&self) -> &'static str {
        "s3"
    }

    /// Store `body` at `bucket/key`, replacing any existing object.
    ///
    /// # Errors
    ///
    /// Returns a message describing the failure.
    fn put(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), String>;
}

/// Object store backed by a directory: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), String> {
        let path = self.root.join(bucket).join(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&path, body).map_err(|e| format!("{}: {e}", path.display()))
    }
}

/// Mirrors artifacts to `<scheme>://<bucket>/<prefix>/<table>/<file>`.
pub struct ObjectStorageConnector {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
    encoder: Arc<dyn RowEncoder>,
}

impl ObjectStorageConnector {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        prefix: &str,
        encoder: Arc<dyn RowEncoder>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.trim_matches('/').to_string(),
            encoder,
        }
    }

    /// Object key for `file_name` of `table`.
    #[must_use]
    pub fn key_for(&self, table: &TableName, file_name: &str) -> String {
        if self.prefix.is_empty() {
            format!("{table}/{file_name}")
        } else {
            format!("{}/{table}/{file_name}", self.prefix)
        }
    }

    fn upload(
        &self,
        table: &TableName,
        file_name: &str,
        body: &[u8],
        rows: u64,
        options: &LoadOptions,
    ) -> Result<Delivery, PipelineError> {
        let key = self.key_for(table, file_name);
        let uri = format!("{}://{}/{key}", self.store.scheme(), self.bucket);
        if !options.cancel.commit() {
            return Err(PipelineError::UploadFailure {
                uri,
                message: "upload cancelled".to_string(),
            });
        }
        self.store
            .put(&self.bucket, &key, body)
            .map_err(|message| PipelineError::UploadFailure {
                uri: uri.clone(),
                message,
            })?;
        tracing::info!(table = %table, uri = %uri, "Uploaded artifact");
        Ok(Delivery {
            location: uri,
            rows,
        })
    }
}

impl Connector for ObjectStorageConnector {
    fn medium(&self) -> &'static str {
        "object_storage"
    }

    fn persist(
        &self,
        data: &TransformResult,
        options: &LoadOptions,
    ) -> Result<Delivery, PipelineError> {
        let file_name = artifact_file_name(&data.table, self.encoder.extension());
        let body = self
            .encoder
            .encode(&data.columns, &data.rows)
            .map_err(|message| PipelineError::UploadFailure {
                uri: self.key_for(&data.table, &file_name),
                message,
            })?;
        self.upload(&data.table, &file_name, &body, data.row_count(), options)
    }

    fn load_from_artifact(
        &self,
        artifact: &Artifact,
        options: &LoadOptions,
    ) -> Result<Delivery, PipelineError> {
        let file_name = artifact
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::UploadFailure {
                uri: artifact.path.display().to_string(),
                message: "artifact path has no file name".to_string(),
            })?;
        let body = std::fs::read(&artifact.path).map_err(|e| PipelineError::UploadFailure {
            uri: artifact.path.display().to_string(),
            message: format!("cannot read artifact: {e}"),
        })?;
        self.upload(&artifact.table, &file_name, &body, artifact.row_count, options)
    }
}
