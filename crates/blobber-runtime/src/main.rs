//! # Blobber Node
//!
//! ## Startup Sequence
//!
//! 1. Parse CLI flags, install logging
//! 2. Load and validate configuration (file, then flag overrides)
//! 3. Bootstrap: keys, metadata store (bounded retry), blob store, chain
//! 4. Register on chain, start background routines
//! 5. Run until Ctrl+C, then shut down gracefully

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use blobber_runtime::{BlobberRuntime, NodeConfig};

#[derive(Parser, Debug)]
#[command(name = "blobber")]
#[command(about = "Storage node for allocation-backed file storage", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node key file (overrides `keys_file`)
    #[arg(long)]
    keys_file: Option<PathBuf>,

    /// Metadata store path (overrides `storage.path`)
    #[arg(long)]
    storage_path: Option<PathBuf>,

    /// Blob directory (overrides `storage.blob_dir`)
    #[arg(long)]
    blob_dir: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to install log subscriber")
}

fn load_config(cli: &Cli) -> Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            info!("No config file given, using defaults");
            NodeConfig::default()
        }
    };

    if let Some(keys) = &cli.keys_file {
        config.keys_file = keys.clone();
    }
    if let Some(path) = &cli.storage_path {
        config.storage.path = path.clone();
    }
    if let Some(dir) = &cli.blob_dir {
        config.storage.blob_dir = dir.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = load_config(&cli)?;
    let runtime = BlobberRuntime::bootstrap(config)
        .await
        .context("Bootstrap failed")?;
    runtime.start().await.context("Startup failed")?;

    info!("Blobber is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;
    Ok(())
}
