//! Event publishers
//!
//! The router hands every decoded event to a `Publisher`. Delivery is
//! at-least-once; duplicates are suppressed by the dedup key, either by the
//! receiving endpoint (webhook `Idempotency-Key`) or locally by
//! `DedupPublisher` within its time window.

use crate::event::Event;
use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Sink for decoded events.
pub trait Publisher: Send + Sync {
    fn send<'a>(&'a self, event: &'a Event) -> BoxFuture<'a, Result<()>>;

    /// Release the underlying connection.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Writes each event to the log as one JSON line.
#[derive(Debug, Default)]
pub struct ConsolePublisher;

impl Publisher for ConsolePublisher {
    fn send<'a>(&'a self, event: &'a Event) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let body = serde_json::to_string(event).context("Failed to serialize event")?;
            info!(tx_type = %event.tx_type, block = event.block, event = %body, "event");
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// POSTs each event as JSON to an HTTP endpoint.
pub struct WebhookPublisher {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookPublisher {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, endpoint })
    }
}

impl Publisher for WebhookPublisher {
    fn send<'a>(&'a self, event: &'a Event) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.client
                .post(&self.endpoint)
                .header("Idempotency-Key", event.dedup_key())
                .header("X-Event-Type", event.tx_type.as_str())
                .json(event)
                .send()
                .await
                .context("Failed to POST event")?
                .error_for_status()
                .context("Webhook rejected event")?;
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            debug!(endpoint = %self.endpoint, "webhook publisher closed");
        })
    }
}

/// Drops events whose dedup key was already published within the window.
pub struct DedupPublisher {
    inner: Arc<dyn Publisher>,
    seen: Cache<String, ()>,
}

/// Upper bound on remembered keys.
const DEDUP_CAPACITY: u64 = 1_000_000;

impl DedupPublisher {
    pub fn new(inner: Arc<dyn Publisher>, window: Duration) -> Self {
        let seen = Cache::builder()
            .max_capacity(DEDUP_CAPACITY)
            .time_to_live(window)
            .build();
        Self { inner, seen }
    }
}

impl Publisher for DedupPublisher {
    fn send<'a>(&'a self, event: &'a Event) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let key = event.dedup_key();
            let claimed = self.seen.entry(key.clone()).or_insert(());
            if !claimed.is_fresh() {
                debug!(key = %key, "duplicate event suppressed");
                return Ok(());
            }

            if let Err(e) = self.inner.send(event).await {
                // Let a later retry publish it
                self.seen.invalidate(&key);
                return Err(e);
            }
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingPublisher;
    use serde_json::json;

    fn event(tx_hash: &str, index: Option<u64>) -> Event {
        Event {
            block: 1,
            index,
            contract_address: "0x0000000000000000000000000000000000000001".to_string(),
            success: index.is_some(),
            timestamp: 0,
            tx_hash: tx_hash.to_string(),
            tx_type: "TOKEN_TRANSFER".to_string(),
            payload: json!({}),
        }
    }

    #[tokio::test]
    async fn test_dedup_suppresses_repeats() {
        let inner = Arc::new(RecordingPublisher::default());
        let publisher = DedupPublisher::new(inner.clone(), Duration::from_secs(60));

        publisher.send(&event("0xaa", Some(0))).await.unwrap();
        publisher.send(&event("0xaa", Some(0))).await.unwrap();
        publisher.send(&event("0xaa", Some(1))).await.unwrap();
        publisher.send(&event("0xaa", None)).await.unwrap();
        publisher.send(&event("0xaa", None)).await.unwrap();

        assert_eq!(inner.events().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_send_can_be_retried() {
        let inner = Arc::new(RecordingPublisher::failing());
        let publisher = DedupPublisher::new(inner.clone(), Duration::from_secs(60));

        assert!(publisher.send(&event("0xbb", Some(2))).await.is_err());
        inner.set_failing(false);
        publisher.send(&event("0xbb", Some(2))).await.unwrap();
        assert_eq!(inner.events().len(), 1);
    }

    #[tokio::test]
    async fn test_console_publisher_accepts_events() {
        let publisher = ConsolePublisher;
        publisher.send(&event("0xcc", Some(0))).await.unwrap();
        publisher.close().await;
    }
}
