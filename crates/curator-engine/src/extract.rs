//! Source discovery.

use std::path::{Path, PathBuf};

use curator_types::{ExtractResult, PipelineError, SchemaCatalog, SourceHandle};
use regex::Regex;

/// Compiled file-name glob supporting `*` and `?`.
#[derive(Debug, Clone)]
pub struct SourcePattern {
    raw: String,
    regex: Regex,
}

impl SourcePattern {
    /// Compile a glob.
    ///
    /// # Errors
    ///
    /// Returns an error if the translated expression is rejected.
    pub fn new(glob: &str) -> Result<Self, regex::Error> {
        let mut expr = String::with_capacity(glob.len() + 8);
        expr.push('^');
        for ch in glob.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');
        Ok(Self {
            raw: glob.to_string(),
            regex: Regex::new(&expr)?,
        })
    }

    #[must_use]
    pub fn matches(&self, file_name: &str) -> bool {
        self.regex.is_match(file_name)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

/// Locate the source documents for `table` under `raw_dir`.
///
/// The table is validated against the catalog before the file system is
/// touched. Results are sorted by path.
///
/// # Errors
///
/// - [`PipelineError::UnsupportedTable`] if the catalog lacks `table`.
/// - [`PipelineError::MissingRawDirectory`] if `raw_dir` is not a readable
///   directory.
/// - [`PipelineError::NoSourcesFound`] if nothing matches `pattern`.
pub fn extract(
    catalog: &SchemaCatalog,
    table: &str,
    raw_dir: &Path,
    pattern: &SourcePattern,
) -> Result<ExtractResult, PipelineError> {
    let entry = catalog.resolve(table)?;

    if !raw_dir.is_dir() {
        return Err(PipelineError::MissingRawDirectory {
            path: raw_dir.to_path_buf(),
        });
    }

    let listing = std::fs::read_dir(raw_dir).map_err(|e| {
        tracing::warn!(dir = %raw_dir.display(), error = %e, "Cannot list raw directory");
        PipelineError::MissingRawDirectory {
            path: raw_dir.to_path_buf(),
        }
    })?;

    let mut paths: Vec<PathBuf> = listing
        .filter_map(Result::ok)
        .filter(|dirent| dirent.file_type().is_ok_and(|t| t.is_file()))
        .filter(|dirent| pattern.matches(&dirent.file_name().to_string_lossy()))
        .map(|dirent| dirent.path())
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(PipelineError::NoSourcesFound {
            table: entry.table.to_string(),
            dir: raw_dir.to_path_buf(),
            pattern: pattern.as_str().to_string(),
        });
    }

    tracing::info!(
        table = %entry.table,
        sources = paths.len(),
        dir = %raw_dir.display(),
        "Discovered source documents"
    );
    Ok(ExtractResult {
        table: entry.table.clone(),
        source_count: paths.len(),
        sources: paths.into_iter().map(SourceHandle::new).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_pattern() -> SourcePattern {
        SourcePattern::new("*.json").unwrap()
    }

    #[test]
    fn glob_translation() {
        let p = SourcePattern::new("bundle_??.json").unwrap();
        assert!(p.matches("bundle_01.json"));
        assert!(!p.matches("bundle_1.json"));
        assert!(!p.matches("bundle_01.jsonl"));
        assert!(json_pattern().matches("a.b.json"));
        assert!(!json_pattern().matches("ajson"));
    }

    #[test]
    fn unsupported_table_checked_before_io() {
        let catalog = SchemaCatalog::healthcare();
        let err = extract(
            &catalog,
            "invoices",
            Path::new("/definitely/missing"),
            &json_pattern(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedTable { .. }));
    }

    #[test]
    fn missing_raw_dir() {
        let catalog = SchemaCatalog::healthcare();
        let err = extract(
            &catalog,
            "patients",
            Path::new("/definitely/missing"),
            &json_pattern(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::MissingRawDirectory { .. }));
    }

    #[test]
    fn empty_dir_is_no_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("nested.json")).unwrap();
        let err = extract(
            &SchemaCatalog::healthcare(),
            "patients",
            dir.path(),
            &json_pattern(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::NoSourcesFound { .. }));
    }

    #[test]
    fn sources_sorted_by_path() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.json", "a.json", "b.json"] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }
        let result = extract(
            &SchemaCatalog::healthcare(),
            "patients",
            dir.path(),
            &json_pattern(),
        )
        .unwrap();
        let names: Vec<String> = result.sources.iter().map(SourceHandle::name).collect();
        assert_eq!(names, vec!["a.json", "b.json", "c.json"]);
        assert_eq!(result.source_count, 3);
    }
}
