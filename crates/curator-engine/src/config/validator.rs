//! Semantic validation for engine settings.

use anyhow::{bail, Result};

use crate::config::settings::EngineSettings;

/// Validate settings after all layers are applied.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing every problem found.
pub fn validate_settings(settings: &EngineSettings) -> Result<()> {
    let mut errors = Vec::new();

    if settings.source_pattern.trim().is_empty() {
        errors.push("source_pattern must not be empty".to_string());
    }
    if settings.source_pattern.contains('/') || settings.source_pattern.contains('\\') {
        errors.push(format!(
            "source_pattern '{}' must match file names, not paths",
            settings.source_pattern
        ));
    }
    if settings.parallelism == 0 {
        errors.push("parallelism must be > 0".to_string());
    }
    if settings.step_timeout_secs == Some(0) {
        errors.push("step_timeout_secs must be > 0".to_string());
    }
    if settings.warehouse.chunk_size == 0 {
        errors.push("warehouse.chunk_size must be > 0".to_string());
    }
    if settings.upload.enabled {
        match settings.upload.bucket.as_deref().map(str::trim) {
            None | Some("") => {
                errors.push("upload.bucket is required when upload is enabled".to_string());
            }
            Some(bucket) if bucket.contains('/') => {
                errors.push(format!("upload.bucket '{bucket}' must not contain '/'"));
            }
            Some(_) => {}
        }
    }
    if settings.raw_dir.as_os_str().is_empty() {
        errors.push("raw_dir must not be empty".to_string());
    }
    if settings.processed_dir.as_os_str().is_empty() {
        errors.push("processed_dir must not be empty".to_string());
    }

    if !errors.is_empty() {
        bail!("Settings validation failed:\n  - {}", errors.join("\n  - "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        validate_settings(&EngineSettings::default()).unwrap();
    }

    #[test]
    fn all_errors_reported_together() {
        let mut settings = EngineSettings::default();
        settings.parallelism = 0;
        settings.warehouse.chunk_size = 0;
        settings.step_timeout_secs = Some(0);
        settings.upload.enabled = true;
        let err = validate_settings(&settings).unwrap_err().to_string();
        assert!(err.contains("parallelism"));
        assert!(err.contains("chunk_size"));
        assert!(err.contains("step_timeout_secs"));
        assert!(err.contains("upload.bucket"));
    }

    #[test]
    fn bucket_not_needed_when_upload_disabled() {
        let mut settings = EngineSettings::default();
        settings.upload.bucket = None;
        validate_settings(&settings).unwrap();
    }

    #[test]
    fn pattern_must_be_a_file_glob() {
        let mut settings = EngineSettings::default();
        settings.source_pattern = "raw/*.json".into();
        assert!(validate_settings(&settings).is_err());
    }
}
