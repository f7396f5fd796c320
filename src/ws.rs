//! WebSocket `newHeads` subscription
//!
//! Each call to `subscribe` opens its own connection. A reader task owns the
//! socket: it forwards headers into a bounded channel, answers pings, and on
//! shutdown sends `eth_unsubscribe` before closing the socket.

use crate::chain::{HeadSource, HeadSubscription};
use crate::types::Header;
use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Headers buffered between the socket reader and the subscriber.
const HEADER_BUFFER: usize = 64;

/// Request id of the `eth_subscribe` call on every connection.
const SUBSCRIBE_ID: u64 = 1;
const UNSUBSCRIBE_ID: u64 = 2;

/// Head source backed by a node's WebSocket endpoint.
pub struct WsHeadSource {
    url: String,
    timeout: Duration,
}

impl WsHeadSource {
    pub fn new(url: String, timeout: Duration) -> Self {
        Self { url, timeout }
    }

    async fn open(&self) -> Result<HeadSubscription> {
        let (ws_stream, _) = tokio::time::timeout(self.timeout, connect_async(self.url.as_str()))
            .await
            .context("WebSocket connect timed out")?
            .context("Failed to connect WebSocket")?;

        let (mut write, mut read) = ws_stream.split();

        let subscribe = json!({
            "jsonrpc": "2.0",
            "id": SUBSCRIBE_ID,
            "method": "eth_subscribe",
            "params": ["newHeads"]
        });
        write
            .send(Message::Text(subscribe.to_string()))
            .await
            .context("Failed to send eth_subscribe")?;

        let subscription_id = tokio::time::timeout(self.timeout, wait_for_subscription(&mut read))
            .await
            .context("Subscription confirmation timed out")??;
        info!(subscription = %subscription_id, "subscribed to new heads");

        let (tx, rx) = mpsc::channel(HEADER_BUFFER);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        let unsubscribe = json!({
                            "jsonrpc": "2.0",
                            "id": UNSUBSCRIBE_ID,
                            "method": "eth_unsubscribe",
                            "params": [subscription_id]
                        });
                        if let Err(e) = write.send(Message::Text(unsubscribe.to_string())).await {
                            debug!(error = %e, "eth_unsubscribe not delivered");
                        }
                        let _ = write.send(Message::Close(None)).await;
                        debug!("head subscription closed");
                        break;
                    }
                    msg = read.next() => {
                        let item = match msg {
                            Some(Ok(Message::Text(text))) => match parse_notification(&text, &subscription_id) {
                                Some(item) => item,
                                None => continue,
                            },
                            Some(Ok(Message::Ping(data))) => {
                                let _ = write.send(Message::Pong(data)).await;
                                continue;
                            }
                            Some(Ok(Message::Close(frame))) => {
                                Err(anyhow::anyhow!("WebSocket closed by server: {:?}", frame))
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => Err(anyhow::Error::new(e).context("WebSocket read failed")),
                            None => Err(anyhow::anyhow!("WebSocket stream ended")),
                        };

                        let fatal = item.is_err();
                        if tx.send(item).await.is_err() {
                            // Receiver dropped, nobody is listening anymore
                            break;
                        }
                        if fatal {
                            break;
                        }
                    }
                }
            }
        });

        Ok(HeadSubscription::new(rx, shutdown, task))
    }
}

impl HeadSource for WsHeadSource {
    fn subscribe(&self) -> BoxFuture<'_, Result<HeadSubscription>> {
        Box::pin(self.open())
    }
}

/// Read until the `eth_subscribe` response arrives and return the subscription id.
async fn wait_for_subscription<S>(read: &mut S) -> Result<String>
where
    S: StreamExt<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    while let Some(msg) = read.next().await {
        if let Message::Text(text) = msg.context("WebSocket read failed")? {
            let parsed: Value =
                serde_json::from_str(&text).context("Malformed subscription response")?;

            if parsed.get("id") == Some(&json!(SUBSCRIBE_ID)) {
                if let Some(result) = parsed.get("result").and_then(|v| v.as_str()) {
                    return Ok(result.to_string());
                }
                if let Some(error) = parsed.get("error") {
                    anyhow::bail!("Subscription error: {}", error);
                }
            }
        }
    }
    anyhow::bail!("WebSocket closed during subscription")
}

/// Extract a header from an `eth_subscription` notification.
///
/// Returns `None` for frames that are not notifications for `subscription_id`.
fn parse_notification(text: &str, subscription_id: &str) -> Option<Result<Header>> {
    let parsed: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "skipping malformed WebSocket frame");
            return None;
        }
    };

    if parsed.get("method").and_then(|m| m.as_str()) != Some("eth_subscription") {
        return None;
    }
    let params = parsed.get("params")?;
    if params.get("subscription").and_then(|s| s.as_str()) != Some(subscription_id) {
        return None;
    }
    let result = params.get("result")?.clone();
    Some(serde_json::from_value(result).context("Malformed header notification"))
}
