use anyhow::{Context, Result};
use clap::Subcommand;
use curator_engine::EngineSettings;
use curator_state::{RepairStore, SqliteRepairStore};
use curator_types::TableName;

#[derive(Debug, Subcommand)]
pub enum RepairsCommand {
    /// List remembered decisions
    List {
        /// Only decisions for this table
        #[arg(long)]
        table: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Forget remembered decisions
    Reset {
        /// Only decisions for this table
        #[arg(long)]
        table: Option<String>,
    },
}

/// Execute a `repairs` subcommand against the configured store.
pub fn execute(settings: &EngineSettings, command: &RepairsCommand) -> Result<()> {
    let store = SqliteRepairStore::open(&settings.repair_store).with_context(|| {
        format!(
            "Failed to open repair store: {}",
            settings.repair_store.display()
        )
    })?;

    match command {
        RepairsCommand::List { table, json } => {
            let decisions = match table {
                Some(table) => store.decisions_for_table(&TableName::new(table.trim()))?,
                None => store.list()?,
            };
            if *json {
                println!("{}", serde_json::to_string_pretty(&decisions)?);
                return Ok(());
            }
            if decisions.is_empty() {
                println!("No repair decisions recorded.");
            }
            for d in &decisions {
                println!(
                    "{:14} {:22} {:10} {}  {}",
                    d.table.as_str(),
                    d.error_signature.as_str(),
                    d.action.as_str(),
                    d.created_at.to_rfc3339(),
                    d.reason.as_deref().unwrap_or("")
                );
            }
        }
        RepairsCommand::Reset { table } => {
            let removed = match table {
                Some(table) => store.clear_table(&TableName::new(table.trim()))?,
                None => store.clear()?,
            };
            tracing::info!(removed, table = table.as_deref().unwrap_or("*"), "Repair decisions reset");
            println!("Removed {removed} decision(s).");
        }
    }
    Ok(())
}
