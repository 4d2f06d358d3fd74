pub mod catalog;
pub mod check;
pub mod repairs;
pub mod run;
pub mod session;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use curator_engine::catalog::{load_catalog_or_default, CatalogHandle};
use curator_engine::config::{parser, validator};
use curator_engine::{DirectiveExecutor, EngineSettings};
use curator_state::SqliteRepairStore;
use curator_types::{DirectiveReport, TableStatus};

/// Defaults, then the settings file, then `CURATOR_*` variables.
pub fn load_settings(path: Option<&Path>) -> Result<EngineSettings> {
    let mut settings = match path {
        Some(path) => parser::parse_settings(path)?,
        None => EngineSettings::default(),
    };
    settings.apply_process_env()?;
    Ok(settings)
}

/// Validate settings and wire the executor: catalog, repair store, media.
pub fn build_executor(settings: &EngineSettings) -> Result<DirectiveExecutor> {
    validator::validate_settings(settings)?;
    let catalog = load_catalog_or_default(settings.schema_config.as_deref())?;
    let store = SqliteRepairStore::open(&settings.repair_store).with_context(|| {
        format!(
            "Failed to open repair store: {}",
            settings.repair_store.display()
        )
    })?;
    DirectiveExecutor::from_settings(
        settings,
        Arc::new(CatalogHandle::new(catalog)),
        Arc::new(store),
    )
}

/// Print a report as aligned text.
pub fn print_report(report: &DirectiveReport) {
    println!(
        "Directive '{}' {} in {:.2}s",
        report.target, report.status, report.duration_secs
    );
    for outcome in &report.outcomes {
        let detail = match outcome.status {
            TableStatus::Loaded => outcome
                .load_result
                .as_ref()
                .map(|load| {
                    let mut parts = vec![format!("{} rows -> {}", load.row_count, load.local_path.display())];
                    if let Some(uri) = &load.remote_uri {
                        parts.push(uri.clone());
                    }
                    if let Some(rows) = load.warehouse_rows {
                        parts.push(format!("warehouse {rows} rows"));
                    }
                    parts.join(", ")
                })
                .unwrap_or_default(),
            TableStatus::Skipped | TableStatus::Failed => {
                let reason = outcome.reason.as_deref().unwrap_or("-");
                match &outcome.error {
                    Some(error) => format!("{reason}: {}", error.message),
                    None => reason.to_string(),
                }
            }
        };
        println!(
            "  {:14} {:8} attempts={} malformed={}  {}",
            outcome.table.as_str(),
            outcome.status.to_string(),
            outcome.attempts,
            outcome.malformed,
            detail
        );
    }
    println!("  Total rows:    {}", report.total_rows());
}
