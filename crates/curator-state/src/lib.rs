//! Durable repair knowledge for the curator pipeline.
//!
//! Provides the [`RepairStore`] trait and a [`SqliteRepairStore`]
//! implementation. Decisions are keyed by `(table, error_signature)` and
//! survive process restarts.

#![warn(clippy::pedantic)]

pub mod error;
pub mod sqlite;
pub mod store;

pub use error::StateError;
pub use sqlite::SqliteRepairStore;
pub use store::RepairStore;
