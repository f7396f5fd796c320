//! CLI implementation for trackerctl
//!
//! Operator commands over the progress store: inspect and move the bounds,
//! list gaps, mark blocks by hand and compact old markers. All commands
//! output pretty JSON.

use crate::store::{ProgressStore, RocksProgressStore};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Progress store CLI tool
#[derive(Parser)]
#[command(name = "trackerctl")]
#[command(about = "Inspect and repair block tracker progress")]
pub struct Cli {
    /// Path to the RocksDB database directory
    #[arg(short, long, default_value = "./tracker_db")]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the lower and upper bounds
    Bounds,
    /// Set the lower bound
    SetLower {
        /// Block number
        block: u64,
    },
    /// Set the upper bound
    SetUpper {
        /// Block number
        block: u64,
    },
    /// List block numbers without a presence marker
    Missing {
        /// Start of the range (defaults to the lower bound)
        #[arg(long)]
        from: Option<u64>,
        /// End of the range, inclusive (defaults to the upper bound)
        #[arg(long)]
        to: Option<u64>,
        /// Maximum number of block numbers to print
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Mark a block as processed
    Mark {
        /// Block number
        block: u64,
    },
    /// Show the presence marker of a block
    Marker {
        /// Block number
        block: u64,
    },
    /// Delete markers below the lower bound
    Compact,
}

/// Run one command against an open store.
pub fn execute(store: &dyn ProgressStore, command: Commands) -> Result<Value> {
    let result = match command {
        Commands::Bounds => {
            let lower = store.get_lower_bound()?;
            let upper = store.get_upper_bound()?;
            json!({ "lower": lower, "upper": upper })
        }
        Commands::SetLower { block } => {
            store.set_lower_bound(block)?;
            json!({ "status": "ok", "lower": block })
        }
        Commands::SetUpper { block } => {
            store.set_upper_bound(block)?;
            json!({ "status": "ok", "upper": block })
        }
        Commands::Missing { from, to, limit } => {
            let lo = match from {
                Some(lo) => lo,
                None => store.get_lower_bound()?.context("Lower bound is not set")?,
            };
            let hi = match to {
                Some(hi) => hi,
                None => store.get_upper_bound()?.context("Upper bound is not set")?,
            };
            if hi < lo {
                anyhow::bail!("Empty range: {} > {}", lo, hi);
            }

            let missing = store.missing_between(lo, hi)?;
            let blocks: Vec<u64> = missing.iter().take(limit).collect();
            json!({
                "from": lo,
                "to": hi,
                "count": missing.count(),
                "blocks": blocks,
                "truncated": missing.count() > blocks.len() as u64,
            })
        }
        Commands::Mark { block } => {
            store.mark_processed(block)?;
            json!({ "status": "ok", "block": block })
        }
        Commands::Marker { block } => match store.get_marker(block)? {
            Some(marker) => json!({
                "block": block,
                "marker": { "processed_at": marker.processed_at },
            }),
            None => json!({ "block": block, "marker": null }),
        },
        Commands::Compact => {
            let removed = store.compact()?;
            json!({ "status": "ok", "removed": removed })
        }
    };
    Ok(result)
}

/// Run the CLI command and print JSON output.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let store = RocksProgressStore::open(&cli.db_path)
        .with_context(|| format!("Failed to open database at {:?}", cli.db_path))?;

    let result = execute(&store, cli.command)?;

    // Pretty print JSON
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
