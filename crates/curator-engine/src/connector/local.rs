//! Local file system connector.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use curator_types::{PipelineError, TransformResult};

use super::{artifact_file_name, Connector, Delivery, LoadOptions, RowEncoder};

/// Writes `<root>/<table>/<table>_<timestamp>.<ext>`.
///
/// Artifacts are never overwritten; a name collision picks a suffixed name.
pub struct LocalConnector {
    root: PathBuf,
    encoder: Arc<dyn RowEncoder>,
}

impl LocalConnector {
    pub fn new(root: impl Into<PathBuf>, encoder: Arc<dyn RowEncoder>) -> Self {
        Self {
            root: root.into(),
            encoder,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_new(dir: &Path, file_name: &str, body: &[u8]) -> std::io::Result<PathBuf> {
        let (stem, ext) = file_name.rsplit_once('.').unwrap_or((file_name, ""));
        for attempt in 0u32.. {
            let candidate = if attempt == 0 {
                dir.join(file_name)
            } else {
                dir.join(format!("{stem}_{attempt}.{ext}"))
            };
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(mut file) => {
                    file.write_all(body)?;
                    file.sync_all()?;
                    return Ok(candidate);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }
        }
        Err(std::io::Error::other("artifact names exhausted"))
    }
}

impl Connector for LocalConnector {
    fn medium(&self) -> &'static str {
        "local"
    }

    fn persist(
        &self,
        data: &TransformResult,
        options: &LoadOptions,
    ) -> Result<Delivery, PipelineError> {
        let dir = self.root.join(data.table.as_str());
        let write_failure = |path: &Path, message: String| PipelineError::WriteFailure {
            path: path.to_path_buf(),
            message,
        };

        let body = self
            .encoder
            .encode(&data.columns, &data.rows)
            .map_err(|e| write_failure(&dir, format!("encoding failed: {e}")))?;
        if !options.cancel.commit() {
            return Err(write_failure(&dir, "write cancelled".to_string()));
        }
        std::fs::create_dir_all(&dir).map_err(|e| write_failure(&dir, e.to_string()))?;

        let file_name = artifact_file_name(&data.table, self.encoder.extension());
        let path = Self::write_new(&dir, &file_name, &body)
            .map_err(|e| write_failure(&dir.join(&file_name), e.to_string()))?;

        tracing::info!(
            table = %data.table,
            rows = data.rows.len(),
            path = %path.display(),
            "Wrote artifact"
        );
        Ok(Delivery {
            location: path.display().to_string(),
            rows: data.row_count(),
        })
    }
}
