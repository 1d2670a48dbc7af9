//! Outpost unit daemon - serves the peer sync operations for a field
//! replica and gives operators a view into recorded conflicts.

mod config;
mod error;
mod routes;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use outpost_core::db::Database;
use outpost_core::models::DatasetSchema;
use outpost_core::{FeatureId, SyncService};

use config::UnitConfig;
use routes::{app_router, AppState};

#[derive(Parser)]
#[command(name = "outpost-unit")]
#[command(about = "Field unit daemon for Outpost dataset synchronization")]
#[command(version)]
struct Cli {
    /// Path to the unit configuration file
    #[arg(long, value_name = "PATH", default_value = config::CONFIG_FILE_NAME)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync server
    Serve {
        /// Override the configured bind address
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },
    /// Inspect and resolve recorded conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Manage synchronized datasets
    Dataset {
        #[command(subcommand)]
        command: DatasetCommands,
    },
}

#[derive(Subcommand)]
enum ConflictCommands {
    /// List recorded conflicts
    List {
        /// Restrict to one dataset
        #[arg(long)]
        dataset: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Close an active conflict after manual review
    Resolve {
        /// Dataset the conflict belongs to
        dataset: String,
        /// Feature id under conflict
        feature_id: String,
    },
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
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses real env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("outpost_unit=info".parse().expect("valid directive"))
                .add_directive("outpost_core=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    let config = UnitConfig::load_from_path(&cli.config)?;

    let db = Database::open(&config.db_path)?;
    let service = SyncService::new(db);
    provision_datasets(&service, &config)?;

    match cli.command {
        Commands::Serve { bind } => {
            let bind_addr = bind.unwrap_or_else(|| config.bind_addr.clone());
            let state = AppState::new(service, config.auth_token.clone());
            let router = app_router(state);

            let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
            tracing::info!("outpost-unit listening on {}", bind_addr);
            axum::serve(listener, router).await?;
        }
        Commands::Conflicts { command } => run_conflicts(&service, command)?,
        Commands::Dataset { command } => run_dataset(&service, command)?,
    }

    Ok(())
}

/// Create any configured dataset that does not exist yet
fn provision_datasets(service: &SyncService, config: &UnitConfig) -> outpost_core::Result<()> {
    let existing = service.list_datasets()?;
    for (name, schema) in &config.datasets {
        if !existing.contains(name) {
            service.create_dataset(name, schema)?;
            tracing::info!(dataset = name, "registered dataset");
        }
    }
    Ok(())
}

fn run_conflicts(
    service: &SyncService,
    command: ConflictCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        ConflictCommands::List { dataset, json } => {
            let records = service.list_conflicts(dataset.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No conflicts recorded.");
            } else {
                for record in records {
                    let resolved = record
                        .resolved_at
                        .map_or_else(String::new, |at| format!(" (resolved {at})"));
                    println!(
                        "{} {} {:?} at revision {}{}",
                        record.dataset,
                        record.feature_id,
                        record.state,
                        record.local_revision,
                        resolved,
                    );
                }
            }
        }
        ConflictCommands::Resolve {
            dataset,
            feature_id,
        } => {
            service.resolve_conflict(&dataset, &FeatureId::new(feature_id.as_str()))?;
            println!("Resolved conflict on '{feature_id}' in dataset '{dataset}'.");
        }
    }
    Ok(())
}

fn run_dataset(
    service: &SyncService,
    command: DatasetCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        DatasetCommands::Add { name, schema } => {
            let raw = std::fs::read_to_string(&schema)?;
            let schema: DatasetSchema = serde_json::from_str(&raw)?;
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
