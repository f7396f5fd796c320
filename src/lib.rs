//! Block ingestion and gap reconciliation
//!
//! Follows a chain's head, records which blocks were fully processed in a
//! persistent progress store, and backfills every gap between the stored
//! bounds. Logs and reverted calls touching watched contracts are decoded
//! into events and handed to a deduplicating publisher.

pub mod abi;
pub mod backfill;
pub mod cache;
pub mod chain;
pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod handler_index;
pub mod handler_misc;
pub mod handler_pool;
pub mod handler_token;
pub mod keys;
pub mod missing;
pub mod pool;
pub mod processor;
pub mod publisher;
pub mod realtime;
pub mod records;
pub mod router;
pub mod rpc;
pub mod service;
pub mod stats;
pub mod store;
pub mod types;
pub mod ws;

#[cfg(test)]
mod testutil;

// Re-export the main types for convenience
pub use error::{ProcessError, RouteError};
pub use event::Event;
pub use missing::MissingBlocks;
pub use records::BlockMarker;
pub use store::{ProgressStore, RocksProgressStore};
