//! Block ingestion service binary
//!
//! Follows the chain head, backfills gaps between the stored bounds and
//! publishes decoded events for watched contracts.

use anyhow::{Context, Result};
use clap::Parser;
use eth_tracker::config::Config;
use eth_tracker::service;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Blockchain event tracker
#[derive(Parser)]
#[command(name = "tracker")]
#[command(about = "Ingest blocks and publish events for watched contracts")]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "TRACKER_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// HTTP JSON-RPC endpoint, overrides chain.rpc_endpoint
    #[arg(long, env = "TRACKER_RPC_URL")]
    rpc_url: Option<String>,

    /// WebSocket endpoint, overrides chain.ws_endpoint
    #[arg(long, env = "TRACKER_WS_URL")]
    ws_url: Option<String>,

    /// Path to RocksDB database directory, overrides core.db_path
    #[arg(short, long, env = "TRACKER_DB_PATH")]
    db_path: Option<PathBuf>,

    /// First block to cover on a fresh database, overrides chain.start_block
    #[arg(long, env = "TRACKER_START_BLOCK")]
    start_block: Option<u64>,

    /// Replay gaps larger than backfill.max_backlog
    #[arg(long, env = "TRACKER_FORCE_BACKFILL")]
    force_backfill: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(url) = self.rpc_url {
            config.chain.rpc_endpoint = url;
        }
        if let Some(url) = self.ws_url {
            config.chain.ws_endpoint = url;
        }
        if let Some(path) = self.db_path {
            config.core.db_path = path;
        }
        if let Some(block) = self.start_block {
            config.chain.start_block = block;
        }
        if self.force_backfill {
            config.backfill.force = true;
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if std::env::var_os("DEBUG").is_some() {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();

    let mut config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        info!("Config file {:?} not found, using defaults", args.config);
        Config::default()
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!("Starting block tracker");
    info!("RPC URL: {}", config.chain.rpc_endpoint);
    info!("WebSocket URL: {}", config.chain.ws_endpoint);
    info!("Database: {:?}", config.core.db_path);

    service::run(config).await?;

    info!("Tracker stopped");
    Ok(())
}
