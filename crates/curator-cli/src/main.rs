mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "curator",
    version,
    about = "Curates raw healthcare JSON bundles into tabular datasets"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Settings YAML file (defaults are used when omitted)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a directive for one table or "all"
    Run(commands::run::RunArgs),
    /// Read JSON directive requests from stdin, one per line
    Session {
        /// Table used when a request names none
        #[arg(long)]
        prefer_table: Option<String>,
    },
    /// Validate settings, catalog, raw directory and repair store
    Check,
    /// Show the schema catalog
    Catalog {
        /// Catalog document (JSON or YAML) instead of the configured one
        #[arg(long)]
        schema_config: Option<PathBuf>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Inspect or reset remembered repair decisions
    Repairs {
        #[command(subcommand)]
        command: commands::repairs::RepairsCommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    let settings = commands::load_settings(cli.settings.as_deref())?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(&settings, args).await,
        Commands::Session { prefer_table } => {
            commands::session::execute(&settings, prefer_table).await
        }
        Commands::Check => commands::check::execute(&settings),
        Commands::Catalog { schema_config, json } => {
            commands::catalog::execute(&settings, schema_config.as_deref(), json)
        }
        Commands::Repairs { command } => commands::repairs::execute(&settings, &command),
    }
}
