//! `SQLite`-backed implementation of [`RepairStore`].
//!
//! Uses a single `Mutex<Connection>`, so writes to any key are serialized.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use curator_types::{ErrorSignature, RepairAction, RepairDecision, TableName};
use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::{self, StateError};
use crate::store::RepairStore;

/// Idempotent DDL for the decision table.
const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS repair_decisions (
    table_name TEXT NOT NULL,
    error_signature TEXT NOT NULL,
    action TEXT NOT NULL,
    reason TEXT,
    created_at TEXT NOT NULL,
    PRIMARY KEY (table_name, error_signature)
);
";

const SELECT_COLUMNS: &str =
    "SELECT table_name, error_signature, action, reason, created_at FROM repair_decisions";

/// `SQLite`-backed repair knowledge.
///
/// Create with [`SqliteRepairStore::open`] for file-backed persistence
/// or [`SqliteRepairStore::in_memory`] for tests.
pub struct SqliteRepairStore {
    conn: Mutex<Connection>,
}

impl SqliteRepairStore {
    /// Open or create a store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory can't be created,
    /// or [`StateError::Sqlite`] if the database can't be opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Sqlite`] if the database can't be initialized.
    pub fn in_memory() -> error::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Delete every decision. Returns the number removed.
    ///
    /// Operator reset; not part of [`RepairStore`].
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] on storage failure.
    pub fn clear(&self) -> error::Result<u64> {
        let conn = self.lock_conn()?;
        let n = conn
            .execute("DELETE FROM repair_decisions", [])
            .map_err(|e| StateError::context("clear", e))?;
        Ok(n as u64)
    }

    /// Delete the decisions of one table. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] on storage failure.
    pub fn clear_table(&self, table: &TableName) -> error::Result<u64> {
        let conn = self.lock_conn()?;
        let n = conn
            .execute(
                "DELETE FROM repair_decisions WHERE table_name = ?1",
                [table.as_str()],
            )
            .map_err(|e| StateError::context("clear_table", e))?;
        Ok(n as u64)
    }

    fn lock_conn(&self) -> error::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StateError::LockPoisoned)
    }

    /// Fixed-width UTC timestamp; sorts lexicographically.
    fn now_text() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn select_one(
        conn: &Connection,
        table: &TableName,
        signature: &ErrorSignature,
    ) -> error::Result<Option<RepairDecision>> {
        let raw = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE table_name = ?1 AND error_signature = ?2"),
                [table.as_str(), signature.as_str()],
                RawDecision::from_row,
            )
            .optional()
            .map_err(|e| StateError::context("lookup", e))?;
        raw.map(RawDecision::decode).transpose()
    }

    fn select_many(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> error::Result<Vec<RepairDecision>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| StateError::context("list: prepare", e))?;
        let rows = stmt
            .query_map(params, RawDecision::from_row)
            .map_err(|e| StateError::context("list: query", e))?;
        let mut out = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| StateError::context("list: row", e))?;
            out.push(raw.decode()?);
        }
        Ok(out)
    }
}

/// A row as stored, before the action and timestamp are parsed.
struct RawDecision {
    table: String,
    signature: String,
    action: String,
    reason: Option<String>,
    created_at: String,
}

impl RawDecision {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            table: row.get(0)?,
            signature: row.get(1)?,
            action: row.get(2)?,
            reason: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn decode(self) -> error::Result<RepairDecision> {
        let corrupt = |detail: String| StateError::Corrupt {
            table: self.table.clone(),
            signature: self.signature.clone(),
            detail,
        };
        let action = RepairAction::from_str(&self.action).map_err(|e| corrupt(e.to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(format!("bad created_at '{}': {e}", self.created_at)))?
            .with_timezone(&Utc);
        Ok(RepairDecision {
            table: TableName::new(self.table),
            error_signature: ErrorSignature::new(self.signature),
            action,
            created_at,
            reason: self.reason,
        })
    }
}

impl RepairStore for SqliteRepairStore {
    fn lookup(
        &self,
        table: &TableName,
        signature: &ErrorSignature,
    ) -> error::Result<Option<RepairDecision>> {
        let conn = self.lock_conn()?;
        Self::select_one(&conn, table, signature)
    }

    fn record(
        &self,
        table: &TableName,
        signature: &ErrorSignature,
        action: RepairAction,
        reason: Option<&str>,
    ) -> error::Result<RepairDecision> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO repair_decisions (table_name, error_signature, action, reason, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(table_name, error_signature) DO UPDATE SET \
             action = excluded.action, reason = excluded.reason, \
             created_at = MAX(created_at, excluded.created_at)",
            rusqlite::params![
                table.as_str(),
                signature.as_str(),
                action.as_str(),
                reason,
                Self::now_text(),
            ],
        )
        .map_err(|e| StateError::context("record: upsert", e))?;
        Self::select_one(&conn, table, signature)?
            .ok_or_else(|| StateError::context("record: reread", rusqlite::Error::QueryReturnedNoRows))
    }

    fn touch_or_insert(
        &self,
        table: &TableName,
        signature: &ErrorSignature,
        action: RepairAction,
        reason: Option<&str>,
    ) -> error::Result<RepairDecision> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO repair_decisions (table_name, error_signature, action, reason, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(table_name, error_signature) DO UPDATE SET \
             reason = excluded.reason, \
             created_at = MAX(created_at, excluded.created_at)",
            rusqlite::params![
                table.as_str(),
                signature.as_str(),
                action.as_str(),
                reason,
                Self::now_text(),
            ],
        )
        .map_err(|e| StateError::context("touch_or_insert: upsert", e))?;
        Self::select_one(&conn, table, signature)?.ok_or_else(|| {
            StateError::context("touch_or_insert: reread", rusqlite::Error::QueryReturnedNoRows)
        })
    }

    fn decisions_for_table(&self, table: &TableName) -> error::Result<Vec<RepairDecision>> {
        let conn = self.lock_conn()?;
        Self::select_many(
            &conn,
            &format!("{SELECT_COLUMNS} WHERE table_name = ?1 ORDER BY created_at DESC, error_signature"),
            [table.as_str()],
        )
    }

    fn list(&self) -> error::Result<Vec<RepairDecision>> {
        let conn = self.lock_conn()?;
        Self::select_many(
            &conn,
            &format!("{SELECT_COLUMNS} ORDER BY table_name, error_signature"),
            [],
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn t(name: &str) -> TableName {
        TableName::new(name)
    }

    fn sig(name: &str) -> ErrorSignature {
        ErrorSignature::new(name)
    }

    #[test]
    fn lookup_missing_is_none() {
        let store = SqliteRepairStore::in_memory().unwrap();
        assert!(store.lookup(&t("patients"), &sig("duplicate_key")).unwrap().is_none());
    }

    #[test]
    fn record_then_lookup() {
        let store = SqliteRepairStore::in_memory().unwrap();
        let written = store
            .record(&t("medications"), &sig("duplicate_key"), RepairAction::SkipTable, Some("pk clash"))
            .unwrap();
        let read = store
            .lookup(&t("medications"), &sig("duplicate_key"))
            .unwrap()
            .unwrap();
        assert_eq!(read, written);
        assert_eq!(read.action, RepairAction::SkipTable);
        assert_eq!(read.reason.as_deref(), Some("pk clash"));
    }

    #[test]
    fn record_is_last_write_wins() {
        let store = SqliteRepairStore::in_memory().unwrap();
        let first = store
            .record(&t("a"), &sig("upload_failure"), RepairAction::Retry, None)
            .unwrap();
        let second = store
            .record(&t("a"), &sig("upload_failure"), RepairAction::SkipTable, Some("gave up"))
            .unwrap();
        assert_eq!(second.action, RepairAction::SkipTable);
        assert!(second.created_at >= first.created_at);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn created_at_never_moves_backwards() {
        let store = SqliteRepairStore::in_memory().unwrap();
        {
            let conn = store.lock_conn().unwrap();
            conn.execute(
                "INSERT INTO repair_decisions VALUES ('a', 'timeout', 'abort', NULL, '2999-01-01T00:00:00.000000Z')",
                [],
            )
            .unwrap();
        }
        let updated = store
            .record(&t("a"), &sig("timeout"), RepairAction::Fail, None)
            .unwrap();
        assert_eq!(updated.action, RepairAction::Fail);
        assert_eq!(updated.created_at.to_rfc3339_opts(SecondsFormat::Micros, true), "2999-01-01T00:00:00.000000Z");
    }

    #[test]
    fn touch_keeps_stored_action_and_refreshes_reason() {
        let store = SqliteRepairStore::in_memory().unwrap();
        let first = store
            .record(&t("a"), &sig("warehouse_failure"), RepairAction::Fail, Some("operator"))
            .unwrap();
        let touched = store
            .touch_or_insert(&t("a"), &sig("warehouse_failure"), RepairAction::Retry, Some("disk I/O error"))
            .unwrap();
        assert_eq!(touched.action, RepairAction::Fail);
        assert_eq!(touched.reason.as_deref(), Some("disk I/O error"));
        assert!(touched.created_at >= first.created_at);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn touch_inserts_proposed_action_for_new_key() {
        let store = SqliteRepairStore::in_memory().unwrap();
        let live = store
            .touch_or_insert(&t("a"), &sig("timeout"), RepairAction::Abort, None)
            .unwrap();
        assert_eq!(live.action, RepairAction::Abort);
    }

    #[test]
    fn concurrent_touches_never_replace_the_first_action() {
        let store = Arc::new(SqliteRepairStore::in_memory().unwrap());
        let handles: Vec<_> = [RepairAction::Retry, RepairAction::SkipTable, RepairAction::Fail]
            .into_iter()
            .map(|action| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .touch_or_insert(&t("a"), &sig("schema_mismatch"), action, Some("late"))
                        .unwrap()
                })
            })
            .collect();
        let seen: Vec<RepairDecision> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let stored = store.lookup(&t("a"), &sig("schema_mismatch")).unwrap().unwrap();
        assert!(seen.iter().all(|d| d.action == stored.action));
    }

    #[test]
    fn keys_are_independent() {
        let store = SqliteRepairStore::in_memory().unwrap();
        store.record(&t("a"), &sig("duplicate_key"), RepairAction::SkipTable, None).unwrap();
        store.record(&t("a"), &sig("upload_failure"), RepairAction::Retry, None).unwrap();
        store.record(&t("b"), &sig("duplicate_key"), RepairAction::Abort, None).unwrap();

        assert_eq!(store.decisions_for_table(&t("a")).unwrap().len(), 2);
        let all = store.list().unwrap();
        let keys: Vec<(&str, &str)> = all
            .iter()
            .map(|d| (d.table.as_str(), d.error_signature.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![("a", "duplicate_key"), ("a", "upload_failure"), ("b", "duplicate_key")]
        );
    }

    #[test]
    fn clear_removes_everything() {
        let store = SqliteRepairStore::in_memory().unwrap();
        store.record(&t("a"), &sig("x"), RepairAction::Fail, None).unwrap();
        store.record(&t("b"), &sig("y"), RepairAction::Fail, None).unwrap();
        assert_eq!(store.clear_table(&t("a")).unwrap(), 1);
        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn unknown_action_is_reported_corrupt() {
        let store = SqliteRepairStore::in_memory().unwrap();
        {
            let conn = store.lock_conn().unwrap();
            conn.execute(
                "INSERT INTO repair_decisions VALUES ('a', 'x', 'explode', NULL, '2024-01-01T00:00:00.000000Z')",
                [],
            )
            .unwrap();
        }
        let err = store.lookup(&t("a"), &sig("x")).unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("repairs.db");
        {
            let store = SqliteRepairStore::open(&path).unwrap();
            store
                .record(&t("medications"), &sig("duplicate_key"), RepairAction::SkipTable, None)
                .unwrap();
        }
        let store = SqliteRepairStore::open(&path).unwrap();
        let decision = store
            .lookup(&t("medications"), &sig("duplicate_key"))
            .unwrap()
            .unwrap();
        assert_eq!(decision.action, RepairAction::SkipTable);
    }
}
