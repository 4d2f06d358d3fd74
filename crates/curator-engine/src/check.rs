//! Pre-flight checks for a settings file: nothing is extracted or written
//! except the repair store, which is opened to prove it is usable.

use std::path::Path;

use curator_state::{RepairStore, SqliteRepairStore};
use serde::Serialize;

use crate::catalog::load_catalog_or_default;
use crate::config::validator::validate_settings;
use crate::config::EngineSettings;

/// One named check and what it found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckItem {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub items: Vec<CheckItem>,
}

impl CheckResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.items.iter().all(|item| item.ok)
    }

    fn push(&mut self, name: &'static str, outcome: Result<String, String>) {
        let (ok, detail) = match outcome {
            Ok(detail) => (true, detail),
            Err(detail) => (false, detail),
        };
        if ok {
            tracing::debug!(check = name, detail = %detail, "Check passed");
        } else {
            tracing::warn!(check = name, detail = %detail, "Check failed");
        }
        self.items.push(CheckItem { name, ok, detail });
    }
}

fn directory(path: &Path) -> Result<String, String> {
    if path.is_dir() {
        Ok(path.display().to_string())
    } else {
        Err(format!("{} is not a directory", path.display()))
    }
}

/// Run every check and report all of them, failed or not.
#[must_use]
pub fn check_settings(settings: &EngineSettings) -> CheckResult {
    let mut result = CheckResult::default();

    result.push(
        "settings",
        validate_settings(settings)
            .map(|()| "valid".to_string())
            .map_err(|e| format!("{e:#}")),
    );
    result.push(
        "catalog",
        load_catalog_or_default(settings.schema_config.as_deref())
            .map(|catalog| format!("{} tables", catalog.len()))
            .map_err(|e| format!("{e:#}")),
    );
    result.push("raw_dir", directory(&settings.raw_dir));
    result.push(
        "repair_store",
        SqliteRepairStore::open(&settings.repair_store)
            .and_then(|store| store.list())
            .map(|decisions| format!("{} decisions", decisions.len()))
            .map_err(|e| e.to_string()),
    );
    if settings.upload.enabled {
        result.push(
            "upload",
            settings
                .upload
                .bucket
                .as_deref()
                .map(|bucket| format!("s3://{bucket}/{}", settings.upload.prefix))
                .ok_or_else(|| "no bucket configured".to_string()),
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_every_check() {
        let dir = tempfile::tempdir().unwrap();
        let settings = EngineSettings {
            raw_dir: dir.path().to_path_buf(),
            repair_store: dir.path().join("state/repairs.db"),
            ..EngineSettings::default()
        };
        let result = check_settings(&settings);
        assert!(result.passed(), "{result:?}");
        let names: Vec<_> = result.items.iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["settings", "catalog", "raw_dir", "repair_store"]);
        assert_eq!(result.items[1].detail, "6 tables");
    }

    #[test]
    fn missing_raw_dir_fails_but_others_still_run() {
        let dir = tempfile::tempdir().unwrap();
        let settings = EngineSettings {
            raw_dir: dir.path().join("absent"),
            repair_store: dir.path().join("repairs.db"),
            ..EngineSettings::default()
        };
        let result = check_settings(&settings);
        assert!(!result.passed());
        let raw = result.items.iter().find(|i| i.name == "raw_dir").unwrap();
        assert!(!raw.ok);
        assert!(result.items.iter().any(|i| i.name == "repair_store" && i.ok));
    }
}
