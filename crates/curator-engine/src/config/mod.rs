//! Engine settings: defaults, YAML files, environment overlay and validation.

pub mod parser;
pub mod settings;
pub mod validator;

pub use settings::{EngineSettings, UploadSettings, WarehouseSettings};
