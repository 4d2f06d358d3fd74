use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use curator_engine::EngineSettings;
use curator_types::{DirectiveRequest, DirectiveStatus};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Table name, or "all" for every catalog table
    pub table: String,
    /// Raw bundle directory
    #[arg(long)]
    pub input_dir: Option<PathBuf>,
    /// Directory for CSV artifacts
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// Catalog document used for this run only
    #[arg(long)]
    pub schema_config: Option<PathBuf>,
    /// Keep at most N rows per table (0 = no cap)
    #[arg(long)]
    pub max_records: Option<usize>,
    /// Mirror artifacts to object storage
    #[arg(long)]
    pub upload: bool,
    /// Load artifacts into the warehouse
    #[arg(long)]
    pub warehouse: bool,
    /// Replace warehouse contents instead of appending
    #[arg(long)]
    pub truncate: bool,
    /// Keep stored rows whose key reappears instead of failing the load
    #[arg(long)]
    pub upsert: bool,
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    fn request(&self) -> DirectiveRequest {
        DirectiveRequest {
            table: Some(self.table.clone()),
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            schema_config: self.schema_config.clone(),
            max_records: self.max_records,
            enable_upload: self.upload.then_some(true),
            enable_warehouse_load: self.warehouse.then_some(true),
            truncate: self.truncate.then_some(true),
            upsert: self.upsert.then_some(true),
        }
    }
}

/// Execute the `run` command: resolve the directive, run it, print the report.
pub async fn execute(settings: &EngineSettings, args: RunArgs) -> Result<()> {
    let mut settings = settings.clone();
    // The warehouse medium is only wired when enabled.
    if args.warehouse {
        settings.warehouse.enabled = true;
    }
    let executor = super::build_executor(&settings)?;
    let directive = settings.directive(&args.request())?;

    let report = executor.run(directive).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        super::print_report(&report);
    }

    match report.status {
        DirectiveStatus::Succeeded | DirectiveStatus::PartiallySucceeded => Ok(()),
        status => anyhow::bail!("Directive '{}' {status}", report.target),
    }
}
