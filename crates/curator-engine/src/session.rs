//! Per-conversation memory used to resolve follow-up directives.
//!
//! A [`SessionContext`] belongs to the caller. The executor never touches
//! it; the caller resolves a request through it before submitting, and
//! records the outcome afterwards.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use curator_types::{DirectiveReport, DirectiveRequest, DirectiveStatus};
use serde::Serialize;

/// Turns kept per session; older turns are dropped first.
pub const MAX_TURNS: usize = 40;

/// One submitted directive and how it ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub request: DirectiveRequest,
    pub status: DirectiveStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    preferred_table: Option<String>,
    history: VecDeque<Turn>,
}

impl SessionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Table used when neither the request nor the history names one.
    pub fn prefer_table(&mut self, table: impl Into<String>) {
        self.preferred_table = Some(table.into());
    }

    #[must_use]
    pub fn preferred_table(&self) -> Option<&str> {
        self.preferred_table.as_deref()
    }

    /// The most recent request, as it was resolved.
    #[must_use]
    pub fn last_request(&self) -> Option<&DirectiveRequest> {
        self.history.back().map(|turn| &turn.request)
    }

    /// Fill unset fields of `request` from the previous directive.
    ///
    /// A request without a table reuses the previous directive's table,
    /// falling back to the preferred table.
    #[must_use]
    pub fn resolve(&self, request: &DirectiveRequest) -> DirectiveRequest {
        let last = self.last_request();
        let mut resolved = request.clone();
        if resolved.table.as_deref().map_or(true, |t| t.trim().is_empty()) {
            resolved.table = last
                .and_then(|l| l.table.clone())
                .or_else(|| self.preferred_table.clone());
        }
        if let Some(last) = last {
            resolved.input_dir = resolved.input_dir.or_else(|| last.input_dir.clone());
            resolved.output_dir = resolved.output_dir.or_else(|| last.output_dir.clone());
            resolved.schema_config = resolved
                .schema_config
                .or_else(|| last.schema_config.clone());
            resolved.max_records = resolved.max_records.or(last.max_records);
            resolved.enable_upload = resolved.enable_upload.or(last.enable_upload);
            resolved.enable_warehouse_load = resolved
                .enable_warehouse_load
                .or(last.enable_warehouse_load);
            resolved.truncate = resolved.truncate.or(last.truncate);
            resolved.upsert = resolved.upsert.or(last.upsert);
        }
        resolved
    }

    /// Record a finished directive.
    pub fn remember(&mut self, request: DirectiveRequest, report: &DirectiveReport) {
        if self.history.len() == MAX_TURNS {
            self.history.pop_front();
        }
        self.history.push_back(Turn {
            request,
            status: report.status,
            at: Utc::now(),
        });
    }

    pub fn history(&self) -> impl Iterator<Item = &Turn> {
        self.history.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use curator_types::Target;

    use super::*;

    fn report(status: DirectiveStatus) -> DirectiveReport {
        let mut r = DirectiveReport::new(Target::All, Vec::new(), false, Utc::now(), 0.0);
        r.status = status;
        r
    }

    #[test]
    fn follow_up_reuses_table_and_overrides() {
        let mut session = SessionContext::new();
        let first = DirectiveRequest {
            table: Some("encounters".into()),
            input_dir: Some(PathBuf::from("/raw/batch-7")),
            max_records: Some(10),
            upsert: Some(true),
            ..DirectiveRequest::default()
        };
        session.remember(first, &report(DirectiveStatus::Succeeded));

        let follow_up = DirectiveRequest {
            max_records: Some(20),
            ..DirectiveRequest::default()
        };
        let resolved = session.resolve(&follow_up);
        assert_eq!(resolved.table.as_deref(), Some("encounters"));
        assert_eq!(resolved.input_dir, Some(PathBuf::from("/raw/batch-7")));
        assert_eq!(resolved.max_records, Some(20));
        assert_eq!(resolved.upsert, Some(true));
    }

    #[test]
    fn preferred_table_when_no_history() {
        let mut session = SessionContext::new();
        session.prefer_table("patients");
        let resolved = session.resolve(&DirectiveRequest {
            table: Some("  ".into()),
            ..DirectiveRequest::default()
        });
        assert_eq!(resolved.table.as_deref(), Some("patients"));
    }

    #[test]
    fn explicit_table_wins() {
        let mut session = SessionContext::new();
        session.prefer_table("patients");
        let resolved = session.resolve(&DirectiveRequest::for_table("all"));
        assert_eq!(resolved.table.as_deref(), Some("all"));
    }

    #[test]
    fn history_is_bounded() {
        let mut session = SessionContext::new();
        for i in 0..(MAX_TURNS + 5) {
            session.remember(
                DirectiveRequest::for_table(format!("t{i}")),
                &report(DirectiveStatus::Failed),
            );
        }
        assert_eq!(session.history().count(), MAX_TURNS);
        assert_eq!(
            session.history().next().unwrap().request.table.as_deref(),
            Some("t5")
        );
        assert_eq!(session.last_request().unwrap().table.as_deref(), Some("t44"));
    }
}
