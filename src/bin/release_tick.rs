//! # Release Tick
//!
//! Runs one orchestration batch against PostgreSQL and prints the tick summary
//! as JSON. Meant to be invoked by the external scheduler that owns the tick cadence.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use release_core::config::ConfigManager;
use release_core::database::DatabaseConnection;
use release_core::logging::init_structured_logging;
use release_core::orchestration::{
    CollaboratorRegistry, CollaboratorRole, NoopCollaborator, OrchestratorContext, PgPollerScheduler,
};
use release_core::repository::PgReleaseStore;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "release-tick")]
#[command(about = "Advance every schedulable release by one tick")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Environment to load (development, test, production)
    #[arg(short, long)]
    environment: Option<String>,

    /// Configuration directory (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Override the lock owner id of this instance
    #[arg(long)]
    instance_id: Option<String>,

    /// Pretty-print the summary
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() {
    init_structured_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(success) => {
            if !success {
                process::exit(1);
            }
        }
        Err(err) => {
            error!(error = %err, "Tick failed");
            eprintln!("release-tick: {err:#}");
            process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let manager = match &cli.environment {
        Some(environment) => ConfigManager::load_from_directory_with_env(cli.config_dir, environment),
        None => ConfigManager::load_from_directory(cli.config_dir),
    }
    .context("loading configuration")?;

    let mut config = manager.config().clone();
    if let Some(instance_id) = cli.instance_id {
        config.scheduler.instance_id = instance_id;
    }

    let connection = DatabaseConnection::connect(&config)
        .await
        .context("connecting to the database")?;

    let collaborators = Arc::new(CollaboratorRegistry::new());
    for provider in &config.collaborators {
        // Integration clients live outside this crate; configured roles get a named no-op
        if let Some(role) = CollaboratorRole::for_provider(provider) {
            collaborators.register(role, Arc::new(NoopCollaborator::named(provider.provider())));
        }
    }

    let context = OrchestratorContext::new(
        Arc::new(PgReleaseStore::new(connection.pool().clone())),
        collaborators,
        Arc::new(PgPollerScheduler::new(connection.pool().clone())),
        config,
    );

    info!(
        environment = %manager.environment(),
        instance_id = %context.config().scheduler.instance_id,
        "Running tick"
    );
    let summary = context.tick_scheduler().run_tick().await;

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&summary)?
    } else {
        serde_json::to_string(&summary)?
    };
    println!("{rendered}");

    connection.close().await;
    Ok(summary.success)
}
