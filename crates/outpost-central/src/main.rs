//! Outpost central daemon - registers units, keeps per-pair cursors, and
//! periodically drives push/pull cycles against every due unit.

mod client;
mod cursor;
mod db;
mod error;
mod registry;
mod scheduler;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use outpost_core::db::Database;
use outpost_core::models::DatasetSchema;
use outpost_core::SyncService;

use client::UnitClient;
use error::{Error, Result};
use registry::{parse_window, SqliteUnitRegistry, UnitRegistration, UnitRegistry};
use scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "outpost-central")]
#[command(about = "Central coordinator for Outpost dataset synchronization")]
#[command(version)]
struct Cli {
    /// Path to the central database file
    #[arg(long, value_name = "PATH", default_value = "outpost-central.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run {
        /// Seconds between scheduler runs
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
    },
    /// Perform a single scheduler run and exit
    Once,
    /// Manage registered units
    Unit {
        #[command(subcommand)]
        command: UnitCommands,
    },
    /// Manage synchronized datasets
    Dataset {
        #[command(subcommand)]
        command: DatasetCommands,
    },
}

#[derive(Subcommand)]
enum UnitCommands {
    /// Register a unit or update its settings
    Add {
        id: String,
        /// Base URL of the unit's sync endpoint
        #[arg(long)]
        address: String,
        /// Bearer token the unit expects
        #[arg(long)]
        token: Option<String>,
        /// Daily contact window, e.g. 22:00-04:00
        #[arg(long, value_name = "HH:MM-HH:MM")]
        window: Option<String>,
        /// Minutes between successful synchronizations
        #[arg(long, default_value_t = 60)]
        sync_interval: i64,
        /// Minutes to wait before retrying after a failure
        #[arg(long, default_value_t = 15)]
        retry_interval: i64,
    },
    /// List registered units
    List,
    /// Remove a unit and its cursors
    Remove { id: String },
}

#[derive(Subcommand)]
enum DatasetCommands {
    /// Register a dataset with its attribute schema (JSON file)
    Add {
        name: String,
        /// Path to the schema definition
        #[arg(long, value_name = "PATH")]
        schema: PathBuf,
    },
    /// List registered datasets
    List,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses real env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("outpost_central=info".parse().expect("valid directive"))
                .add_directive("outpost_core=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    let service = open_service(&cli.db)?;

    match cli.command {
        Commands::Run { interval_secs } => {
            let mut scheduler = Scheduler::new(service, UnitClient::new()?);
            tracing::info!(interval_secs, "outpost-central scheduler started");
            scheduler.run(Duration::from_secs(interval_secs)).await;
        }
        Commands::Once => {
            let mut scheduler = Scheduler::new(service, UnitClient::new()?);
            let report = scheduler.run_once().await?;
            println!(
                "Synchronized {} pair(s), {} failed, {} skipped.",
                report.synced, report.failed, report.skipped
            );
        }
        Commands::Unit { command } => run_unit(&service, command)?,
        Commands::Dataset { command } => run_dataset(&service, command)?,
    }

    Ok(())
}

fn open_service(path: &std::path::Path) -> Result<SyncService> {
    let database = Database::open(path)?;
    db::migrate(database.connection())?;
    Ok(SyncService::new(database))
}

fn run_unit(service: &SyncService, command: UnitCommands) -> Result<()> {
    let registry = SqliteUnitRegistry::new(service.database().connection());
    match command {
        UnitCommands::Add {
            id,
            address,
            token,
            window,
            sync_interval,
            retry_interval,
        } => {
            let address = address.trim().trim_end_matches('/').to_string();
            if !address.starts_with("http://") && !address.starts_with("https://") {
                return Err(Error::InvalidInput(
                    "address must include http:// or https://".to_string(),
                ));
            }
            let active_window = window.as_deref().map(parse_window).transpose()?;
            registry.upsert(&UnitRegistration {
                id: id.clone(),
                address,
                token,
                active_window,
                sync_interval_minutes: sync_interval,
                retry_interval_minutes: retry_interval,
                has_errors: false,
            })?;
            println!("Registered unit '{id}'.");
        }
        UnitCommands::List => {
            for unit in registry.list()? {
                let window = unit.active_window.map_or_else(
                    || "always".to_string(),
                    |(start, end)| format!("{start}-{end}"),
                );
                let flag = if unit.has_errors { " [errors]" } else { "" };
                println!(
                    "{} {} every {}m, retry {}m, window {}{}",
                    unit.id,
                    unit.address,
                    unit.sync_interval_minutes,
                    unit.retry_interval_minutes,
                    window,
                    flag,
                );
            }
        }
        UnitCommands::Remove { id } => {
            registry.remove(&id)?;
            println!("Removed unit '{id}'.");
        }
    }
    Ok(())
}

fn run_dataset(service: &SyncService, command: DatasetCommands) -> Result<()> {
    match command {
        DatasetCommands::Add { name, schema } => {
            let raw = std::fs::read_to_string(&schema).map_err(outpost_core::Error::from)?;
            let schema: DatasetSchema =
                serde_json::from_str(&raw).map_err(outpost_core::Error::from)?;
            service.create_dataset(&name, &schema)?;
            println!("Registered dataset '{name}'.");
        }
        DatasetCommands::List => {
            for name in service.list_datasets()? {
                println!("{name}");
            }
        }
    }
    Ok(())
}
