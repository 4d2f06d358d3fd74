//! Deterministic mapping from error class to repair action.

use curator_types::{ErrorClass, RepairAction, TableStatus};

/// Decides what to do about a failure nobody has decided on before.
pub trait RepairPolicy: Send + Sync {
    /// Action for a first-seen failure of `class`.
    fn action_for(&self, class: ErrorClass) -> RepairAction;

    /// Terminal table status once a `Retry` has been used up.
    fn exhausted_status(&self, class: ErrorClass) -> TableStatus {
        match class {
            ErrorClass::UploadFailure => TableStatus::Skipped,
            _ => TableStatus::Failed,
        }
    }
}

/// Optional strategy consulted before the built-in table.
pub type PolicyOverride = fn(ErrorClass) -> Option<RepairAction>;

/// The built-in policy table, total over [`ErrorClass`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy {
    overrides: Option<PolicyOverride>,
}

impl DefaultPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consult `strategy` first; fall back to the table when it returns `None`.
    #[must_use]
    pub fn with_override(strategy: PolicyOverride) -> Self {
        Self {
            overrides: Some(strategy),
        }
    }

    /// The built-in table.
    #[must_use]
    pub fn table(class: ErrorClass) -> RepairAction {
        match class {
            ErrorClass::UnsupportedTable
            | ErrorClass::MissingRawDir
            | ErrorClass::UnsupportedOperation
            | ErrorClass::Timeout => RepairAction::Abort,
            ErrorClass::DuplicateKey | ErrorClass::SchemaMismatch => RepairAction::SkipTable,
            ErrorClass::UploadFailure | ErrorClass::WarehouseFailure => RepairAction::Retry,
            ErrorClass::UnmappedSource
            | ErrorClass::NoSourcesFound
            | ErrorClass::ParseError
            | ErrorClass::EmptyTransform
            | ErrorClass::WriteFailure => RepairAction::Fail,
        }
    }
}

impl RepairPolicy for DefaultPolicy {
    fn action_for(&self, class: ErrorClass) -> RepairAction {
        self.overrides
            .and_then(|strategy| strategy(class))
            .unwrap_or_else(|| Self::table(class))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_mappings() {
        let policy = DefaultPolicy::new();
        assert_eq!(policy.action_for(ErrorClass::DuplicateKey), RepairAction::SkipTable);
        assert_eq!(policy.action_for(ErrorClass::UploadFailure), RepairAction::Retry);
        assert_eq!(policy.action_for(ErrorClass::UnsupportedTable), RepairAction::Abort);
        assert_eq!(policy.action_for(ErrorClass::MissingRawDir), RepairAction::Abort);
        assert_eq!(policy.action_for(ErrorClass::Timeout), RepairAction::Abort);
        assert_eq!(policy.action_for(ErrorClass::WriteFailure), RepairAction::Fail);
        assert_eq!(policy.action_for(ErrorClass::NoSourcesFound), RepairAction::Fail);
    }

    #[test]
    fn exhausted_upload_is_skipped() {
        let policy = DefaultPolicy::new();
        assert_eq!(policy.exhausted_status(ErrorClass::UploadFailure), TableStatus::Skipped);
        assert_eq!(policy.exhausted_status(ErrorClass::WarehouseFailure), TableStatus::Failed);
    }

    #[test]
    fn override_wins_then_falls_back() {
        fn never_retry(class: ErrorClass) -> Option<RepairAction> {
            (DefaultPolicy::table(class) == RepairAction::Retry).then_some(RepairAction::Fail)
        }
        let policy = DefaultPolicy::with_override(never_retry);
        assert_eq!(policy.action_for(ErrorClass::UploadFailure), RepairAction::Fail);
        assert_eq!(policy.action_for(ErrorClass::DuplicateKey), RepairAction::SkipTable);
    }
}
