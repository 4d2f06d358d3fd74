//! Process-wide engine settings and directive resolution.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use curator_types::{Directive, DirectiveOptions, DirectiveRequest, Target};
use serde::{Deserialize, Serialize};

/// Prefix of every environment variable the engine reads.
pub const ENV_PREFIX: &str = "CURATOR_";

/// Process-wide defaults. Every directive starts from these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    /// File-name glob for source documents.
    pub source_pattern: String,
    /// Catalog document; the built-in catalog is used when unset.
    pub schema_config: Option<PathBuf>,
    pub repair_store: PathBuf,
    /// Row cap per table. `0` means no cap.
    pub max_records: usize,
    pub require_rows: bool,
    pub step_timeout_secs: Option<u64>,
    /// Tables processed concurrently by an `all` directive.
    pub parallelism: usize,
    pub upload: UploadSettings,
    pub warehouse: WarehouseSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            source_pattern: "*.json".to_string(),
            schema_config: None,
            repair_store: PathBuf::from("data/state/repairs.db"),
            max_records: 0,
            require_rows: true,
            step_timeout_secs: None,
            parallelism: 1,
            upload: UploadSettings::default(),
            warehouse: WarehouseSettings::default(),
        }
    }
}

/// Object storage mirror settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadSettings {
    pub enabled: bool,
    pub bucket: Option<String>,
    pub prefix: String,
    /// Local directory standing in for the object store.
    pub root: PathBuf,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bucket: None,
            prefix: "processed".to_string(),
            root: PathBuf::from("data/object-store"),
        }
    }
}

/// Warehouse load settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WarehouseSettings {
    pub enabled: bool,
    pub path: PathBuf,
    /// Replace table contents instead of appending.
    pub truncate: bool,
    /// Skip rows whose primary key is already stored.
    pub upsert: bool,
    pub chunk_size: usize,
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("data/warehouse.db"),
            truncate: false,
            upsert: false,
            chunk_size: 1000,
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl EngineSettings {
    /// Overlay `CURATOR_*` variables from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error listing every variable with an unparsable value.
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    /// Overlay `CURATOR_*` variables read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error listing every variable with an unparsable value.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let mut errors = Vec::new();
        let get = |key: &str| lookup(&format!("{ENV_PREFIX}{key}"));

        let number = |key: &str, errors: &mut Vec<String>| -> Option<u64> {
            let raw = get(key)?;
            raw.trim().parse::<u64>().map_or_else(
                |_| {
                    errors.push(format!("{ENV_PREFIX}{key}: expected a number, got '{raw}'"));
                    None
                },
                Some,
            )
        };
        let max_records = number("MAX_RECORDS", &mut errors);
        let step_timeout = number("STEP_TIMEOUT_SECS", &mut errors);
        let parallelism = number("PARALLELISM", &mut errors);
        let chunk_size = number("WAREHOUSE_CHUNK_SIZE", &mut errors);

        let flag = |key: &str, errors: &mut Vec<String>| -> Option<bool> {
            let raw = get(key)?;
            let parsed = parse_flag(&raw);
            if parsed.is_none() {
                errors.push(format!("{ENV_PREFIX}{key}: expected a boolean, got '{raw}'"));
            }
            parsed
        };
        let require_rows = flag("REQUIRE_ROWS", &mut errors);
        let upload_enabled = flag("UPLOAD_ENABLED", &mut errors);
        let warehouse_enabled = flag("WAREHOUSE_ENABLED", &mut errors);
        let warehouse_truncate = flag("WAREHOUSE_TRUNCATE", &mut errors);
        let warehouse_upsert = flag("WAREHOUSE_UPSERT", &mut errors);

        if !errors.is_empty() {
            bail!("Invalid environment overrides:\n  - {}", errors.join("\n  - "));
        }

        if let Some(v) = get("RAW_DIR") {
            self.raw_dir = PathBuf::from(v);
        }
        if let Some(v) = get("PROCESSED_DIR") {
            self.processed_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SOURCE_PATTERN") {
            self.source_pattern = v;
        }
        if let Some(v) = get("SCHEMA_CONFIG") {
            self.schema_config = (!v.trim().is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = get("REPAIR_STORE") {
            self.repair_store = PathBuf::from(v);
        }
        if let Some(v) = get("UPLOAD_BUCKET") {
            self.upload.bucket = (!v.trim().is_empty()).then_some(v);
        }
        if let Some(v) = get("UPLOAD_PREFIX") {
            self.upload.prefix = v;
        }
        if let Some(v) = get("OBJECT_STORE_ROOT") {
            self.upload.root = PathBuf::from(v);
        }
        if let Some(v) = get("WAREHOUSE_PATH") {
            self.warehouse.path = PathBuf::from(v);
        }

        #[allow(clippy::cast_possible_truncation)]
        {
            if let Some(v) = max_records {
                self.max_records = v as usize;
            }
            if let Some(v) = parallelism {
                self.parallelism = v as usize;
            }
            if let Some(v) = chunk_size {
                self.warehouse.chunk_size = v as usize;
            }
        }
        if step_timeout.is_some() {
            self.step_timeout_secs = step_timeout;
        }
        if let Some(v) = require_rows {
            self.require_rows = v;
        }
        if let Some(v) = upload_enabled {
            self.upload.enabled = v;
        }
        if let Some(v) = warehouse_enabled {
            self.warehouse.enabled = v;
        }
        if let Some(v) = warehouse_truncate {
            self.warehouse.truncate = v;
        }
        if let Some(v) = warehouse_upsert {
            self.warehouse.upsert = v;
        }
        Ok(())
    }

    /// Resolve a caller request into an immutable [`Directive`].
    ///
    /// Request fields win over settings. A `max_records` of zero on either
    /// side means no cap.
    ///
    /// # Errors
    ///
    /// Returns an error if the request names no table.
    pub fn directive(&self, request: &DirectiveRequest) -> Result<Directive> {
        let Some(table) = request.table.as_deref().filter(|t| !t.trim().is_empty()) else {
            bail!("directive does not name a table (use \"all\" for every table)");
        };

        let max_records = request.max_records.unwrap_or(self.max_records);
        let options = DirectiveOptions {
            truncate: request.truncate.unwrap_or(self.warehouse.truncate),
            upsert: request.upsert.unwrap_or(self.warehouse.upsert),
            max_records: (max_records > 0).then_some(max_records),
            enable_upload: request.enable_upload.unwrap_or(self.upload.enabled),
            enable_warehouse_load: request
                .enable_warehouse_load
                .unwrap_or(self.warehouse.enabled),
            require_rows: self.require_rows,
            chunk_size: self.warehouse.chunk_size.max(1),
            step_timeout: self.step_timeout_secs.map(Duration::from_secs),
        };

        Ok(Directive {
            target: Target::parse(table),
            options,
            raw_dir: request.input_dir.clone().unwrap_or_else(|| self.raw_dir.clone()),
            processed_dir: request
                .output_dir
                .clone()
                .unwrap_or_else(|| self.processed_dir.clone()),
            schema_config: request.schema_config.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = EngineSettings::default();
        settings
            .apply_env(env(&[
                ("CURATOR_RAW_DIR", "/in"),
                ("CURATOR_MAX_RECORDS", "25"),
                ("CURATOR_UPLOAD_ENABLED", "yes"),
                ("CURATOR_UPLOAD_BUCKET", "lake"),
                ("CURATOR_WAREHOUSE_CHUNK_SIZE", "50"),
            ]))
            .unwrap();
        assert_eq!(settings.raw_dir, PathBuf::from("/in"));
        assert_eq!(settings.max_records, 25);
        assert!(settings.upload.enabled);
        assert_eq!(settings.upload.bucket.as_deref(), Some("lake"));
        assert_eq!(settings.warehouse.chunk_size, 50);
    }

    #[test]
    fn bad_env_values_all_reported() {
        let mut settings = EngineSettings::default();
        let err = settings
            .apply_env(env(&[
                ("CURATOR_MAX_RECORDS", "lots"),
                ("CURATOR_WAREHOUSE_ENABLED", "maybe"),
            ]))
            .unwrap_err()
            .to_string();
        assert!(err.contains("CURATOR_MAX_RECORDS"));
        assert!(err.contains("CURATOR_WAREHOUSE_ENABLED"));
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn directive_request_overrides_settings() {
        let mut settings = EngineSettings::default();
        settings.max_records = 100;
        settings.upload.enabled = true;
        let request = DirectiveRequest {
            table: Some("patients".into()),
            input_dir: Some(PathBuf::from("/other")),
            max_records: Some(5),
            enable_upload: Some(false),
            ..DirectiveRequest::default()
        };
        let directive = settings.directive(&request).unwrap();
        assert_eq!(directive.raw_dir, PathBuf::from("/other"));
        assert_eq!(directive.processed_dir, PathBuf::from("data/processed"));
        assert_eq!(directive.options.max_records, Some(5));
        assert!(!directive.options.enable_upload);
    }

    #[test]
    fn upsert_comes_from_settings_or_request() {
        let mut settings = EngineSettings::default();
        settings
            .apply_env(env(&[("CURATOR_WAREHOUSE_UPSERT", "yes")]))
            .unwrap();
        assert!(settings.warehouse.upsert);
        let directive = settings.directive(&DirectiveRequest::for_table("all")).unwrap();
        assert!(directive.options.upsert);

        let directive = settings
            .directive(&DirectiveRequest {
                upsert: Some(false),
                ..DirectiveRequest::for_table("all")
            })
            .unwrap();
        assert!(!directive.options.upsert);
    }

    #[test]
    fn zero_max_records_means_uncapped() {
        let settings = EngineSettings::default();
        let directive = settings
            .directive(&DirectiveRequest {
                max_records: Some(0),
                ..DirectiveRequest::for_table("all")
            })
            .unwrap();
        assert_eq!(directive.target, Target::All);
        assert_eq!(directive.options.max_records, None);
    }

    #[test]
    fn directive_requires_table() {
        let settings = EngineSettings::default();
        assert!(settings.directive(&DirectiveRequest::default()).is_err());
    }
}
