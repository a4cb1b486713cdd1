//! IndexSync Daemon
//!
//! Background process that keeps a search index in step with a content
//! repository.

mod daemon;
mod signals;
mod spool;

use anyhow::{Context, Result};
use clap::Parser;
use indexsync_core::SyncConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use daemon::Daemon;

#[derive(Debug, Parser)]
#[command(name = "indexsync-daemon", version, about = "Incremental index synchronization daemon")]
struct Args {
    /// Configuration file (defaults to <data dir>/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run every tracker until caught up, then exit
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SyncConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SyncConfig::load(),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting IndexSync daemon v{}", env!("CARGO_PKG_VERSION"));

    let daemon = Daemon::new(config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async move {
            if args.once {
                daemon.run_once().await
            } else {
                daemon.run().await
            }
        })
}
