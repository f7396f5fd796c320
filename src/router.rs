//! Event router
//!
//! Owns two lookup tables built once at startup: log topic hash → handler
//! and 4-byte call selector (hex) → handler. Handlers decode; the router
//! publishes whatever they produce.

use crate::abi::{checksum, event_topic, selector_hex, DecodeError};
use crate::error::RouteError;
use crate::event::Event;
use crate::publisher::Publisher;
use crate::types::Log;
use alloy_primitives::{Address, B256};
use anyhow::Result;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Event type emitted for contract deployments by watched senders.
pub const CONTRACT_CREATION: &str = "CONTRACT_CREATION";

/// A log from a successful transaction together with its block time.
#[derive(Debug, Clone, Copy)]
pub struct LogPayload<'a> {
    pub log: &'a Log,
    pub timestamp: u64,
}

/// Call data of a failed transaction sent to a watched contract.
#[derive(Debug, Clone)]
pub struct InputDataPayload {
    pub from: Address,
    pub revert_reason: String,
    pub input: Vec<u8>,
    pub block: u64,
    pub contract_address: Address,
    pub timestamp: u64,
    pub tx_hash: B256,
}

impl InputDataPayload {
    /// First four bytes of the call data.
    pub fn selector(&self) -> Option<[u8; 4]> {
        let bytes = self.input.get(..4)?;
        let mut out = [0u8; 4];
        out.copy_from_slice(bytes);
        Some(out)
    }
}

/// A successful deployment whose sender is watched.
#[derive(Debug, Clone)]
pub struct ContractCreationPayload {
    pub from: Address,
    pub block: u64,
    pub contract_address: Address,
    pub timestamp: u64,
    pub tx_hash: B256,
    pub success: bool,
}

/// Decoder for one event type.
///
/// `events` and `selectors` are canonical signatures; the router hashes them
/// into its lookup tables. Returning `Ok(None)` means "nothing to publish".
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Event signatures, e.g. `Transfer(address,address,uint256)`.
    fn events(&self) -> Vec<&'static str>;

    /// Function signatures whose reverted calls this handler understands.
    fn selectors(&self) -> Vec<&'static str>;

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError>;

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError>;
}

/// Collects handlers and rejects conflicting registrations.
#[derive(Default)]
pub struct RouterBuilder {
    handlers: BTreeMap<&'static str, Arc<dyn Handler>>,
    log_routes: HashMap<B256, Arc<dyn Handler>>,
    input_routes: HashMap<String, Arc<dyn Handler>>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its name, event topics and selectors.
    pub fn register(mut self, handler: Arc<dyn Handler>) -> Result<Self> {
        let name = handler.name();
        if self.handlers.contains_key(name) {
            anyhow::bail!("handler {} registered twice", name);
        }

        for signature in handler.events() {
            let topic = event_topic(signature);
            if let Some(existing) = self.log_routes.get(&topic) {
                anyhow::bail!(
                    "event {} of {} already routed to {}",
                    signature,
                    name,
                    existing.name()
                );
            }
            self.log_routes.insert(topic, handler.clone());
        }

        for signature in handler.selectors() {
            let key = selector_hex(signature);
            if let Some(existing) = self.input_routes.get(&key) {
                anyhow::bail!(
                    "selector {} ({}) of {} already routed to {}",
                    key,
                    signature,
                    name,
                    existing.name()
                );
            }
            self.input_routes.insert(key, handler.clone());
        }

        self.handlers.insert(name, handler);
        Ok(self)
    }

    pub fn build(self, publisher: Arc<dyn Publisher>) -> Router {
        Router {
            publisher,
            handlers: self.handlers,
            log_routes: self.log_routes,
            input_routes: self.input_routes,
        }
    }
}

/// Immutable dispatch table shared by all workers.
pub struct Router {
    publisher: Arc<dyn Publisher>,
    handlers: BTreeMap<&'static str, Arc<dyn Handler>>,
    log_routes: HashMap<B256, Arc<dyn Handler>>,
    input_routes: HashMap<String, Arc<dyn Handler>>,
}

impl Router {
    /// Dispatch a log by its first topic. Unknown topics are ignored.
    pub async fn process_log(&self, payload: LogPayload<'_>) -> Result<(), RouteError> {
        let Some(topic) = payload.log.topics.first() else {
            return Ok(());
        };
        let Some(handler) = self.log_routes.get(topic) else {
            return Ok(());
        };

        let event = handler
            .handle_log(&payload)
            .map_err(|source| RouteError::Decode {
                handler: handler.name(),
                source,
            })?;
        self.publish(event).await
    }

    /// Dispatch reverted call data by its selector. Unknown selectors are ignored.
    pub async fn process_input_data(&self, payload: InputDataPayload) -> Result<(), RouteError> {
        let Some(selector) = payload.selector() else {
            return Ok(());
        };
        let Some(handler) = self.input_routes.get(&hex::encode(selector)) else {
            return Ok(());
        };

        let event = handler
            .handle_input(&payload)
            .map_err(|source| RouteError::Decode {
                handler: handler.name(),
                source,
            })?;
        self.publish(event).await
    }

    pub async fn process_contract_creation(
        &self,
        payload: ContractCreationPayload,
    ) -> Result<(), RouteError> {
        let event = Event {
            block: payload.block,
            index: None,
            contract_address: checksum(&payload.contract_address),
            success: payload.success,
            timestamp: payload.timestamp,
            tx_hash: format!("0x{:x}", payload.tx_hash),
            tx_type: CONTRACT_CREATION.to_string(),
            payload: json!({ "from": checksum(&payload.from) }),
        };
        self.publish(Some(event)).await
    }

    /// Names of the registered handlers, sorted.
    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    pub fn handler(&self, name: &str) -> Option<&Arc<dyn Handler>> {
        self.handlers.get(name)
    }

    async fn publish(&self, event: Option<Event>) -> Result<(), RouteError> {
        match event {
            Some(event) => self
                .publisher
                .send(&event)
                .await
                .map_err(RouteError::Publish),
            None => Ok(()),
        }
    }
}
