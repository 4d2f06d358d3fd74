//! Directive execution for the curator ETL pipeline.
//!
//! Extracts raw JSON bundles, flattens them into catalog-shaped rows and
//! persists them through pluggable connectors, consulting durable repair
//! memory whenever a table fails.

pub mod cancel;
pub mod catalog;
pub mod check;
pub mod config;
pub mod connector;
pub mod errors;
pub mod executor;
pub mod extract;
pub mod field;
pub mod policy;
pub mod session;
pub mod transform;

pub use cancel::CancelToken;
pub use catalog::CatalogHandle;
pub use check::{check_settings, CheckResult};
pub use config::EngineSettings;
pub use errors::EngineError;
pub use executor::DirectiveExecutor;
pub use policy::{DefaultPolicy, RepairPolicy};
pub use session::SessionContext;
