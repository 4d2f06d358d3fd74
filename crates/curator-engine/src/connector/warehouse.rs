//! `SQLite` warehouse connector.
//!
//! Destination tables are created on first load with `TEXT` columns and
//! the catalog's primary key. Table creation and every batch of one load
//! run in a single transaction, so a failed or cancelled load leaves the
//! destination as it was.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use curator_types::{PipelineError, Row, TableName, TransformResult};
use rusqlite::{Connection, ErrorCode};

use super::{Artifact, Connector, Delivery, LoadMode, LoadOptions, RowEncoder};

/// Upper bound on bound parameters per statement.
const MAX_PARAMS: usize = 32_000;

pub struct SqliteWarehouse {
    conn: Mutex<Connection>,
    encoder: Arc<dyn RowEncoder>,
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

impl SqliteWarehouse {
    /// Open or create a warehouse database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created.
    pub fn open(path: &Path, encoder: Arc<dyn RowEncoder>) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            conn: Mutex::new(Connection::open(path)?),
            encoder,
        })
    }

    /// In-memory warehouse (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory(encoder: Arc<dyn RowEncoder>) -> anyhow::Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            encoder,
        })
    }

    fn lock_conn(&self, table: &TableName) -> Result<MutexGuard<'_, Connection>, PipelineError> {
        self.conn.lock().map_err(|_| PipelineError::Warehouse {
            table: table.to_string(),
            message: "warehouse lock poisoned".to_string(),
        })
    }

    /// Row count of `table` (for inspection and tests).
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Warehouse`] if the table cannot be read.
    pub fn count(&self, table: &TableName) -> Result<u64, PipelineError> {
        let conn = self.lock_conn(table)?;
        let n: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", quote(table.as_str())), [], |r| {
                r.get(0)
            })
            .map_err(|e| classify(table, &e))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    fn existing_columns(conn: &Connection, table: &TableName) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table.as_str())))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    fn insert(
        &self,
        table: &TableName,
        columns: &[String],
        rows: &[Row],
        options: &LoadOptions,
    ) -> Result<u64, PipelineError> {
        let cancelled = || PipelineError::Warehouse {
            table: table.to_string(),
            message: "load cancelled".to_string(),
        };
        let conn = self.lock_conn(table)?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| classify(table, &e))?;
        let existing = Self::existing_columns(&tx, table).map_err(|e| classify(table, &e))?;

        if existing.is_empty() {
            let mut defs: Vec<String> = columns.iter().map(|c| format!("{} TEXT", quote(c))).collect();
            if !options.primary_key.is_empty() {
                let key: Vec<String> = options.primary_key.iter().map(|c| quote(c)).collect();
                defs.push(format!("PRIMARY KEY ({})", key.join(", ")));
            }
            tx.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quote(table.as_str()),
                defs.join(", ")
            ))
            .map_err(|e| classify(table, &e))?;
        } else {
            let known: HashSet<&str> = existing.iter().map(String::as_str).collect();
            let unknown: Vec<&str> = columns
                .iter()
                .map(String::as_str)
                .filter(|c| !known.contains(c))
                .collect();
            if !unknown.is_empty() {
                return Err(PipelineError::SchemaMismatch {
                    table: table.to_string(),
                    message: format!("destination has no column(s) {}", unknown.join(", ")),
                });
            }
        }

        if options.mode == LoadMode::Replace {
            tx.execute(&format!("DELETE FROM {}", quote(table.as_str())), [])
                .map_err(|e| classify(table, &e))?;
        }

        let width = columns.len().max(1);
        let chunk = options.chunk_size.clamp(1, (MAX_PARAMS / width).max(1));
        let column_list: Vec<String> = columns.iter().map(|c| quote(c)).collect();
        let placeholder = format!("({})", vec!["?"; width].join(", "));
        let verb = if options.mode == LoadMode::Upsert {
            "INSERT OR IGNORE"
        } else {
            "INSERT"
        };
        let mut inserted = 0u64;

        for batch in rows.chunks(chunk) {
            if options.cancel.is_cancelled() {
                return Err(cancelled());
            }
            let sql = format!(
                "{verb} INTO {} ({}) VALUES {}",
                quote(table.as_str()),
                column_list.join(", "),
                vec![placeholder.as_str(); batch.len()].join(", ")
            );
            let params: Vec<&Option<String>> = batch.iter().flat_map(|r| r.values()).collect();
            if params.len() != batch.len() * width {
                return Err(PipelineError::SchemaMismatch {
                    table: table.to_string(),
                    message: format!("row width differs from {width} columns"),
                });
            }
            let n = tx
                .execute(&sql, rusqlite::params_from_iter(params))
                .map_err(|e| classify(table, &e))?;
            inserted += n as u64;
            tracing::debug!(table = %table, batch = batch.len(), "Inserted warehouse batch");
        }

        if !options.cancel.commit() {
            tracing::warn!(table = %table, "Warehouse load cancelled, rolling back");
            return Err(cancelled());
        }
        tx.commit().map_err(|e| classify(table, &e))?;
        tracing::info!(
            table = %table,
            rows = inserted,
            mode = options.mode.as_str(),
            "Warehouse load complete"
        );
        Ok(inserted)
    }
}

/// Map a `SQLite` failure onto the pipeline taxonomy.
fn classify(table: &TableName, err: &rusqlite::Error) -> PipelineError {
    let message = err.to_string();
    if let rusqlite::Error::SqliteFailure(inner, _) = err {
        if inner.code == ErrorCode::ConstraintViolation
            && (inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
        {
            return PipelineError::DuplicateKey {
                table: table.to_string(),
                message,
            };
        }
    }
    if message.contains("has no column named") {
        return PipelineError::SchemaMismatch {
            table: table.to_string(),
            message,
        };
    }
    PipelineError::Warehouse {
        table: table.to_string(),
        message,
    }
}

impl Connector for SqliteWarehouse {
    fn medium(&self) -> &'static str {
        "warehouse"
    }

    fn persist(
        &self,
        data: &TransformResult,
        options: &LoadOptions,
    ) -> Result<Delivery, PipelineError> {
        let rows = self.insert(&data.table, &data.columns, &data.rows, options)?;
        Ok(Delivery {
            location: format!("warehouse:{}", data.table),
            rows,
        })
    }

    fn load_from_artifact(
        &self,
        artifact: &Artifact,
        options: &LoadOptions,
    ) -> Result<Delivery, PipelineError> {
        let warehouse_err = |message: String| PipelineError::Warehouse {
            table: artifact.table.to_string(),
            message,
        };
        let body = std::fs::read(&artifact.path)
            .map_err(|e| warehouse_err(format!("cannot read {}: {e}", artifact.path.display())))?;
        let (columns, rows) = self.encoder.decode(&body).map_err(|e| {
            PipelineError::SchemaMismatch {
                table: artifact.table.to_string(),
                message: format!("artifact does not decode: {e}"),
            }
        })?;
        let inserted = self.insert(&artifact.table, &columns, &rows, options)?;
        Ok(Delivery {
            location: format!("warehouse:{}", artifact.table),
            rows: inserted,
        })
    }
}
