use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragmill_core::service::SchedulerService;
use ragmill_core::Config;

mod commands;

#[derive(Parser)]
#[command(name = "ragmill")]
#[command(about = "Scheduler for the ragmill ingestion pipeline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Set log level")]
    log_level: Option<String>,

    #[arg(long, global = true, help = "Use an in-memory job store")]
    ephemeral: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and its HTTP API
    Serve,

    /// Manage scheduled jobs
    Jobs {
        #[command(subcommand)]
        command: commands::jobs::JobsCommand,
    },

    /// Create a job from a named preset
    Preset {
        /// Preset name (see `ragmill presets`)
        name: String,
        /// Job id (the multiple preset derives `<id>_1..N`)
        job_id: String,
        /// Pipeline config overrides as a JSON object
        #[arg(long)]
        config: Option<String>,
    },

    /// List the preset catalogue
    Presets,

    /// Export jobs and stats as a JSON document
    Export {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import jobs from an exported JSON document
    Import {
        /// Path to the document
        file: PathBuf,
    },

    /// Show scheduler statistics
    Status,

    /// Run the health evaluation
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(&path.display().to_string())?,
        None => Config::from_env()?,
    };
    if cli.ephemeral {
        config.store.url = "memory:".to_string();
    }

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    let service = Arc::new(SchedulerService::build(config).await?);

    match cli.command {
        Commands::Serve => commands::serve::run(service).await?,
        Commands::Jobs { command } => commands::jobs::run(service, command).await?,
        Commands::Preset {
            name,
            job_id,
            config,
        } => commands::jobs::create_from_preset(service, &name, &job_id, config.as_deref()).await?,
        Commands::Presets => commands::jobs::list_presets(),
        Commands::Export { output } => commands::jobs::export(service, output.as_deref()).await?,
        Commands::Import { file } => commands::jobs::import(service, &file).await?,
        Commands::Status => commands::jobs::status(service),
        Commands::Health => commands::jobs::health(service).await,
    }

    Ok(())
}
