use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eonet_client::EonetClient;
use eonet_etl::{EtlConfig, Pipeline};
use eonet_storage::{InitMode, Storage};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "eonetl")]
#[command(about = "EONET natural-event ingest service")]
struct Cli {
    /// Path to a YAML config file (defaults to ./config.yaml when present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Schema initialization mode: Create, Revive, or Auto (case-insensitive).
    #[arg(long = "db-init", default_value = "Auto")]
    db_init: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute one ingest run with health endpoints served alongside.
    Run,
    /// Probe the feed and the database, then exit.
    Health,
    /// Serve the health/metrics endpoints without running the pipeline.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Mode validation is fatal before anything touches the database.
    let mode = InitMode::from_str(&cli.db_init)?;

    let config = EtlConfig::load(cli.config.as_deref()).context("loading configuration")?;

    let storage = Storage::connect(&config.database)
        .await
        .context("connecting to database")?;
    storage
        .initialize(mode)
        .await
        .context("initializing database schema")?;

    let client = EonetClient::new(config.feed.clone()).context("building feed client")?;
    let port = config.server.port;
    let pipeline = Arc::new(Pipeline::new(config, Arc::new(client), Arc::new(storage)));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Health => {
            tokio::time::timeout(Duration::from_secs(30), pipeline.health_check())
                .await
                .context("health check timed out")?
                .context("health check failed")?;
            info!("health check passed");
        }
        Commands::Serve => {
            eonet_web::serve(pipeline, port, shutdown_signal()).await?;
        }
        Commands::Run => {
            let server = tokio::spawn(eonet_web::serve(pipeline.clone(), port, shutdown_signal()));
            let outcome = pipeline.run().await;
            server.abort();
            outcome?;
            info!("ingest run completed");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
}
