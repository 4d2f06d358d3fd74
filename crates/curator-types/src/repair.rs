//! Repair knowledge types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::TableName;

/// Stable, message-independent key of an error class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorSignature(String);

impl ErrorSignature {
    #[must_use]
    pub fn new(signature: impl Into<String>) -> Self {
        Self(signature.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for ErrorSignature {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

/// What the executor does after a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairAction {
    /// Re-run the failed step once with identical inputs.
    Retry,
    /// Record the table as skipped and continue with the next one.
    SkipTable,
    /// Stop the whole directive.
    Abort,
    /// Record the table as failed and continue with the next one.
    Fail,
}

impl RepairAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::SkipTable => "skip_table",
            Self::Abort => "abort",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for RepairAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown repair action name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown repair action '{0}'")]
pub struct UnknownAction(pub String);

impl FromStr for RepairAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(Self::Retry),
            "skip_table" | "skip" => Ok(Self::SkipTable),
            "abort" => Ok(Self::Abort),
            "fail" => Ok(Self::Fail),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

/// A persisted decision: for `table` failing with `error_signature`, take `action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairDecision {
    pub table: TableName,
    pub error_signature: ErrorSignature,
    pub action: RepairAction,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RepairDecision {
    #[must_use]
    pub fn new(
        table: TableName,
        error_signature: ErrorSignature,
        action: RepairAction,
        reason: Option<String>,
    ) -> Self {
        Self {
            table,
            error_signature,
            action,
            created_at: Utc::now(),
            reason,
        }
    }
}
