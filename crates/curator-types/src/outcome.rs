//! Per-table outcomes and the directive report.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::TableName;
use crate::directive::Target;
use crate::error::{ErrorRecord, PipelineError};

/// Terminal state of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Loaded,
    Skipped,
    Failed,
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Loaded => "loaded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        })
    }
}

/// Where one table's artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    pub table: TableName,
    pub local_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_uri: Option<String>,
    pub row_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warehouse_rows: Option<u64>,
}

/// Outcome of one table within a directive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectiveOutcome {
    pub table: TableName,
    pub status: TableStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_result: Option<LoadResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    /// Short machine-readable reason for skipped tables (an error signature
    /// or `"no_rows"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Pipeline passes run for this table. Zero when repair memory skipped it.
    pub attempts: u32,
    pub malformed: u64,
}

impl DirectiveOutcome {
    #[must_use]
    pub fn loaded(table: TableName, load: LoadResult, attempts: u32, malformed: u64) -> Self {
        Self {
            table,
            status: TableStatus::Loaded,
            load_result: Some(load),
            error: None,
            reason: None,
            attempts,
            malformed,
        }
    }

    #[must_use]
    pub fn skipped(table: TableName, reason: impl Into<String>, error: Option<&PipelineError>) -> Self {
        Self {
            table,
            status: TableStatus::Skipped,
            load_result: None,
            error: error.map(ErrorRecord::from),
            reason: Some(reason.into()),
            attempts: 0,
            malformed: 0,
        }
    }

    #[must_use]
    pub fn failed(table: TableName, error: &PipelineError) -> Self {
        Self {
            table,
            status: TableStatus::Failed,
            load_result: None,
            error: Some(ErrorRecord::from(error)),
            reason: Some(error.signature().to_string()),
            attempts: 0,
            malformed: 0,
        }
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_malformed(mut self, malformed: u64) -> Self {
        self.malformed = malformed;
        self
    }

    /// Rows loaded, zero unless the table loaded.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.load_result.as_ref().map_or(0, |l| l.row_count)
    }
}

/// Overall status of a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveStatus {
    /// Every table loaded.
    Succeeded,
    /// At least one table loaded, at least one did not.
    PartiallySucceeded,
    /// No table loaded.
    Failed,
    /// An `Abort` decision halted the directive.
    Aborted,
}

impl fmt::Display for DirectiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Succeeded => "succeeded",
            Self::PartiallySucceeded => "partially_succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        })
    }
}

/// Everything a caller needs to explain what a directive did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectiveReport {
    pub target: Target,
    pub status: DirectiveStatus,
    pub outcomes: Vec<DirectiveOutcome>,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl DirectiveReport {
    /// Build a report, deriving the overall status from the outcomes.
    #[must_use]
    pub fn new(
        target: Target,
        outcomes: Vec<DirectiveOutcome>,
        aborted: bool,
        started_at: DateTime<Utc>,
        duration_secs: f64,
    ) -> Self {
        let status = Self::derive_status(&outcomes, aborted);
        Self {
            target,
            status,
            outcomes,
            started_at,
            duration_secs,
        }
    }

    fn derive_status(outcomes: &[DirectiveOutcome], aborted: bool) -> DirectiveStatus {
        if aborted {
            return DirectiveStatus::Aborted;
        }
        let loaded = outcomes
            .iter()
            .filter(|o| o.status == TableStatus::Loaded)
            .count();
        match loaded {
            0 => DirectiveStatus::Failed,
            n if n == outcomes.len() => DirectiveStatus::Succeeded,
            _ => DirectiveStatus::PartiallySucceeded,
        }
    }

    /// Outcome for `table`, if it was reached.
    #[must_use]
    pub fn outcome(&self, table: &str) -> Option<&DirectiveOutcome> {
        self.outcomes.iter().find(|o| o.table.as_str() == table)
    }

    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.outcomes.iter().map(DirectiveOutcome::row_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(table: &str, rows: u64) -> DirectiveOutcome {
        DirectiveOutcome::loaded(
            TableName::new(table),
            LoadResult {
                table: TableName::new(table),
                local_path: PathBuf::from(format!("/tmp/{table}.csv")),
                remote_uri: None,
                row_count: rows,
                warehouse_rows: None,
            },
            1,
            0,
        )
    }

    fn report(outcomes: Vec<DirectiveOutcome>, aborted: bool) -> DirectiveReport {
        DirectiveReport::new(Target::All, outcomes, aborted, Utc::now(), 0.0)
    }

    #[test]
    fn all_loaded_is_success() {
        let r = report(vec![loaded("a", 3), loaded("b", 4)], false);
        assert_eq!(r.status, DirectiveStatus::Succeeded);
        assert_eq!(r.total_rows(), 7);
    }

    #[test]
    fn mixed_is_partial() {
        let skipped = DirectiveOutcome::skipped(TableName::new("b"), "duplicate_key", None);
        let r = report(vec![loaded("a", 3), skipped], false);
        assert_eq!(r.status, DirectiveStatus::PartiallySucceeded);
    }

    #[test]
    fn nothing_loaded_is_failed() {
        let err = PipelineError::NoSourcesFound {
            table: "a".into(),
            dir: PathBuf::from("/raw"),
            pattern: "*.json".into(),
        };
        let r = report(vec![DirectiveOutcome::failed(TableName::new("a"), &err)], false);
        assert_eq!(r.status, DirectiveStatus::Failed);
        assert_eq!(r.outcomes[0].reason.as_deref(), Some("no_sources_found"));
    }

    #[test]
    fn abort_wins_over_loaded_tables() {
        let r = report(vec![loaded("a", 3)], true);
        assert_eq!(r.status, DirectiveStatus::Aborted);
    }

    #[test]
    fn outcome_serializes_without_empty_fields() {
        let json = serde_json::to_value(loaded("a", 2)).unwrap();
        assert_eq!(json["status"], "loaded");
        assert!(json.get("error").is_none());
        assert_eq!(json["load_result"]["row_count"], 2);
    }
}
