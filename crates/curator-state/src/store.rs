//! Repair store trait definition.

use curator_types::{ErrorSignature, RepairAction, RepairDecision, TableName};

use crate::error;

/// Durable memory of how past failures were handled.
///
/// There is at most one live decision per `(table, error_signature)`.
/// The trait deliberately exposes no delete: resetting the store is an
/// operator action on the concrete implementation.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn RepairStore>`,
/// and must serialize writes to the same key.
pub trait RepairStore: Send + Sync {
    /// Read the live decision for a key.
    ///
    /// Returns `Ok(None)` when nothing has been recorded.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn lookup(
        &self,
        table: &TableName,
        signature: &ErrorSignature,
    ) -> error::Result<Option<RepairDecision>>;

    /// Upsert the decision for a key (last write wins) and return it.
    ///
    /// `created_at` never moves backwards for a key, even if the wall
    /// clock does.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn record(
        &self,
        table: &TableName,
        signature: &ErrorSignature,
        action: RepairAction,
        reason: Option<&str>,
    ) -> error::Result<RepairDecision>;

    /// Record a fresh occurrence of a failure in one atomic write.
    ///
    /// A new key gets `action`. An existing key keeps its stored action
    /// and only has `reason` and `created_at` refreshed. Returns the live
    /// decision; racing writers on one key all observe the first action.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn touch_or_insert(
        &self,
        table: &TableName,
        signature: &ErrorSignature,
        action: RepairAction,
        reason: Option<&str>,
    ) -> error::Result<RepairDecision>;

    /// All decisions recorded for `table`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn decisions_for_table(&self, table: &TableName) -> error::Result<Vec<RepairDecision>>;

    /// Every decision, ordered by table then signature.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn list(&self) -> error::Result<Vec<RepairDecision>>;
}
