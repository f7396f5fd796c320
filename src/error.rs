//! Error kinds callers branch on
//!
//! I/O-facing code returns `anyhow::Result`; these enums exist where the
//! caller's reaction depends on what went wrong.

use crate::abi::DecodeError;
use thiserror::Error;

/// Why one block could not be processed.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Shutdown in progress. Not a failure.
    #[error("processing cancelled")]
    Cancelled,

    /// Chain client failure, retried by a later backfill tick.
    #[error("fetch failed: {0:#}")]
    Fetch(anyhow::Error),

    /// Block or receipt data unreadable or inconsistent.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Event could not be handed to the publisher.
    #[error("publish failed: {0:#}")]
    Publish(anyhow::Error),

    /// Progress store I/O failure.
    #[error("progress store failed: {0:#}")]
    Store(anyhow::Error),
}

impl ProcessError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::Cancelled => "cancelled",
            ProcessError::Fetch(_) => "fetch",
            ProcessError::Integrity(_) => "integrity",
            ProcessError::Publish(_) => "publish",
            ProcessError::Store(_) => "store",
        }
    }
}

/// Failure inside the Event Router.
#[derive(Debug, Error)]
pub enum RouteError {
    /// A single handler could not decode its payload.
    #[error("{handler}: {source}")]
    Decode {
        handler: &'static str,
        #[source]
        source: DecodeError,
    },

    #[error("publish failed: {0:#}")]
    Publish(anyhow::Error),
}

impl From<RouteError> for ProcessError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::Publish(e) => ProcessError::Publish(e),
            decode @ RouteError::Decode { .. } => ProcessError::Integrity(decode.to_string()),
        }
    }
}
