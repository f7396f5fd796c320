//! Configuration and address list loading
//!
//! The service reads a TOML file with one table per component. Every field
//! has a default, so an empty file plus command line overrides is enough to
//! run against a local node.
//!
//! Address lists (watchlist, indexes, blacklist) live in separate text files
//! with one address per line.

use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub chain: ChainConfig,
    pub core: CoreConfig,
    pub realtime: RealtimeConfig,
    pub backfill: BackfillSection,
    pub cache: CacheConfig,
    pub publisher: PublisherConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChainConfig {
    pub rpc_endpoint: String,
    pub ws_endpoint: String,
    /// First block to cover on a fresh database. 0 starts at the current head.
    pub start_block: u64,
    pub archive_node: bool,
    /// How far behind the head a pruned node still replays failed calls.
    pub state_retention_blocks: u64,
    pub request_timeout_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: "http://127.0.0.1:8545".to_string(),
            ws_endpoint: "ws://127.0.0.1:8546".to_string(),
            start_block: 0,
            archive_node: false,
            state_retention_blocks: 128,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub db_path: PathBuf,
    /// Worker count. 0 means three per CPU.
    pub pool_size: usize,
    pub queue_size: usize,
    pub batch_size: usize,
    pub shutdown_grace_secs: u64,
    pub max_storage_failures: u32,
    pub stats_interval_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./tracker_db"),
            pool_size: 0,
            queue_size: 100,
            batch_size: 100,
            shutdown_grace_secs: 30,
            max_storage_failures: 10,
            stats_interval_secs: 15,
        }
    }
}

impl CoreConfig {
    pub fn workers(&self) -> usize {
        if self.pool_size > 0 {
            return self.pool_size;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cpus * 3
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RealtimeConfig {
    pub resubscribe_interval_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            resubscribe_interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackfillSection {
    pub busy_interval_secs: u64,
    pub idle_interval_secs: u64,
    pub max_backlog: u64,
    pub force: bool,
    pub skip_when_queued_above: usize,
}

impl Default for BackfillSection {
    fn default() -> Self {
        Self {
            busy_interval_secs: 2,
            idle_interval_secs: 30,
            max_backlog: 100_000,
            force: false,
            skip_when_queued_above: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub watchlist: Option<PathBuf>,
    pub indexes: Option<PathBuf>,
    pub blacklist: Option<PathBuf>,
    /// High-volume tokens whose events need a watched counterparty.
    pub noisy_contracts: Vec<Address>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublisherKind {
    #[default]
    Console,
    Webhook,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublisherConfig {
    pub kind: PublisherKind,
    pub endpoint: Option<String>,
    pub dedup_window_secs: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            kind: PublisherKind::Console,
            endpoint: None,
            dedup_window_secs: 20 * 60,
        }
    }
}

impl Config {
    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file: {:?}", path))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.publisher.kind == PublisherKind::Webhook && self.publisher.endpoint.is_none() {
            anyhow::bail!("publisher.endpoint is required for the webhook publisher");
        }
        if self.core.queue_size == 0 {
            anyhow::bail!("core.queue_size must be at least 1");
        }
        if self.core.batch_size == 0 {
            anyhow::bail!("core.batch_size must be at least 1");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.chain.request_timeout_secs)
    }
}

/// Load an address list from a file.
///
/// Each line holds one address in hex, with or without the 0x prefix.
/// Empty lines and lines starting with '#' are ignored. An empty list is
/// valid.
pub fn load_address_list(path: &Path) -> Result<Vec<Address>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read address list: {:?}", path))?;

    let mut addresses = Vec::new();
    for (line_num, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let addr = parse_address(line)
            .with_context(|| format!("Invalid address on line {} of {:?}", line_num + 1, path))?;
        addresses.push(addr);
    }

    Ok(addresses)
}

/// Load an optional address list, treating an unset path as empty.
pub fn load_optional_list(path: Option<&Path>) -> Result<Vec<Address>> {
    match path {
        Some(path) => load_address_list(path),
        None => Ok(Vec::new()),
    }
}

/// Parse an address from a hex string.
///
/// Accepts addresses with or without 0x prefix.
pub fn parse_address(s: &str) -> Result<Address> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).with_context(|| format!("Invalid hex address: {}", s))?;

    if bytes.len() != 20 {
        anyhow::bail!(
            "Address must be 20 bytes (40 hex chars), got {} bytes",
            bytes.len()
        );
    }

    Ok(Address::from_slice(&bytes))
}
