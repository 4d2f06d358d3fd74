//! Repair store error types.

/// Errors produced by [`RepairStore`](crate::RepairStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// `SQLite` failure with the operation that hit it.
    #[error("{op}: {source}")]
    Context {
        op: &'static str,
        source: rusqlite::Error,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be decoded.
    #[error("corrupt repair decision for ({table}, {signature}): {detail}")]
    Corrupt {
        table: String,
        signature: String,
        detail: String,
    },

    /// Internal mutex was poisoned by a panicked thread.
    #[error("repair store lock poisoned")]
    LockPoisoned,
}

impl StateError {
    pub(crate) fn context(op: &'static str, source: rusqlite::Error) -> Self {
        Self::Context { op, source }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
