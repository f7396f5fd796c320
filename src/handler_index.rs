//! Registry handlers
//!
//! Additions and removals on a watchable index (token or pool registry)
//! update the address cache, so blocks processed afterwards see the new
//! membership without a restart. Reverted calls never touch the cache.

use crate::abi::{self, call_args, checksum, DecodeError};
use crate::event::Event;
use crate::handler::{log_event, revert_event, HandlerContext};
use crate::router::{Handler, InputDataPayload, LogPayload};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

const INDEX_ADD: &str = "INDEX_ADD";
const INDEX_REMOVE: &str = "INDEX_REMOVE";
const CUSTODIAL_REGISTRATION: &str = "CUSTODIAL_REGISTRATION";

pub struct IndexAddHandler {
    ctx: Arc<HandlerContext>,
}

impl IndexAddHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

impl Handler for IndexAddHandler {
    fn name(&self) -> &'static str {
        INDEX_ADD
    }

    fn events(&self) -> Vec<&'static str> {
        vec!["AddressAdded(address)"]
    }

    fn selectors(&self) -> Vec<&'static str> {
        vec!["add(address)"]
    }

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError> {
        let log = payload.log;
        let address = abi::data_address(&log.data, 0)?;

        let cache = self.ctx.cache();
        if cache.is_watchable_index(&log.address) {
            cache.add(address);
            info!(index = %log.address, address = %address, "watching new index member");
        }

        Ok(Some(log_event(
            INDEX_ADD,
            payload,
            json!({ "address": checksum(&address) }),
        )))
    }

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError> {
        let address = abi::data_address(call_args(&payload.input)?, 0)?;

        Ok(Some(revert_event(
            INDEX_ADD,
            payload,
            json!({ "address": checksum(&address) }),
        )))
    }
}

pub struct IndexRemoveHandler {
    ctx: Arc<HandlerContext>,
}

impl IndexRemoveHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

impl Handler for IndexRemoveHandler {
    fn name(&self) -> &'static str {
        INDEX_REMOVE
    }

    fn events(&self) -> Vec<&'static str> {
        vec!["AddressRemoved(address)"]
    }

    fn selectors(&self) -> Vec<&'static str> {
        vec!["remove(address)"]
    }

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError> {
        let log = payload.log;
        let address = abi::data_address(&log.data, 0)?;

        let cache = self.ctx.cache();
        if cache.is_watchable_index(&log.address) {
            cache.remove(&address);
            info!(index = %log.address, address = %address, "index member removed");
        }

        Ok(Some(log_event(
            INDEX_REMOVE,
            payload,
            json!({ "address": checksum(&address) }),
        )))
    }

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError> {
        let address = abi::data_address(call_args(&payload.input)?, 0)?;

        Ok(Some(revert_event(
            INDEX_REMOVE,
            payload,
            json!({ "address": checksum(&address) }),
        )))
    }
}

/// Account registrations on the custodial registry.
///
/// Owns the `register(address)` selector.
pub struct CustodialRegistrationHandler;

impl Handler for CustodialRegistrationHandler {
    fn name(&self) -> &'static str {
        CUSTODIAL_REGISTRATION
    }

    fn events(&self) -> Vec<&'static str> {
        vec!["NewRegistration(address)"]
    }

    fn selectors(&self) -> Vec<&'static str> {
        vec!["register(address)"]
    }

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError> {
        let account = abi::topic_address(&payload.log.topics, 1)?;

        Ok(Some(log_event(
            CUSTODIAL_REGISTRATION,
            payload,
            json!({ "account": checksum(&account) }),
        )))
    }

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError> {
        let account = abi::data_address(call_args(&payload.input)?, 0)?;

        Ok(Some(revert_event(
            CUSTODIAL_REGISTRATION,
            payload,
            json!({ "account": checksum(&account) }),
        )))
    }
}
