//! Shared data model for the curator pipeline.
//!
//! Pure types only: the schema catalog, directives, flattened rows,
//! per-table outcomes, repair decisions and the pipeline error taxonomy.
//! The state store and the engine both depend on this crate and on
//! nothing else in the workspace.

pub mod catalog;
pub mod dataset;
pub mod directive;
pub mod error;
pub mod outcome;
pub mod repair;

pub use catalog::{CatalogError, SchemaCatalog, SchemaEntry, SourceKind, TableName};
pub use dataset::{ExtractResult, Row, SourceHandle, TransformResult};
pub use directive::{Directive, DirectiveOptions, DirectiveRequest, Target};
pub use error::{ErrorClass, ErrorRecord, PipelineError};
pub use outcome::{DirectiveOutcome, DirectiveReport, DirectiveStatus, LoadResult, TableStatus};
pub use repair::{ErrorSignature, RepairAction, RepairDecision};
