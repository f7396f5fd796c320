//! Shared handler plumbing
//!
//! `HandlerContext` carries what decoders need beyond the payload itself:
//! the address cache and the set of noisy high-volume tokens whose events
//! are only kept when a counterparty is in the network.

use crate::abi::checksum;
use crate::cache::AddressCache;
use crate::event::Event;
use crate::handler_index::{CustodialRegistrationHandler, IndexAddHandler, IndexRemoveHandler};
use crate::handler_misc::{FaucetGiveHandler, OwnershipHandler, SealHandler};
use crate::handler_pool::{
    LimitSetHandler, PoolDepositHandler, PoolSwapHandler, QuoterPriceHandler, QuoterUpdatedHandler,
};
use crate::handler_token::{
    TokenApproveHandler, TokenBurnHandler, TokenMintHandler, TokenTransferHandler,
};
use crate::publisher::Publisher;
use crate::router::{InputDataPayload, LogPayload, Router, RouterBuilder};
use alloy_primitives::{Address, U256};
use anyhow::Result;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

pub struct HandlerContext {
    cache: Arc<AddressCache>,
    noisy: HashSet<Address>,
}

impl HandlerContext {
    pub fn new(cache: Arc<AddressCache>, noisy: impl IntoIterator<Item = Address>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            noisy: noisy.into_iter().collect(),
        })
    }

    pub fn cache(&self) -> &AddressCache {
        &self.cache
    }

    /// Whether an event on `contract` between `a` and `b` is worth publishing.
    ///
    /// Quiet contracts always pass. Noisy ones pass only when the contract is
    /// watched and at least one counterparty is too.
    pub fn within_network(&self, contract: &Address, a: &Address, b: &Address) -> bool {
        if !self.noisy.contains(contract) {
            return true;
        }
        self.cache.exists_either_of(contract, a, b)
    }
}

/// Build an event from a successful transaction's log.
pub(crate) fn log_event(tx_type: &str, payload: &LogPayload<'_>, data: Value) -> Event {
    Event {
        block: payload.log.block_number,
        index: Some(payload.log.log_index),
        contract_address: checksum(&payload.log.address),
        success: true,
        timestamp: payload.timestamp,
        tx_hash: format!("0x{:x}", payload.log.transaction_hash),
        tx_type: tx_type.to_string(),
        payload: data,
    }
}

/// Build an event from a reverted call. `revertReason` is added to the payload.
pub(crate) fn revert_event(tx_type: &str, payload: &InputDataPayload, mut data: Value) -> Event {
    if let Value::Object(map) = &mut data {
        map.insert(
            "revertReason".to_string(),
            Value::String(payload.revert_reason.clone()),
        );
    }
    Event {
        block: payload.block,
        index: None,
        contract_address: checksum(&payload.contract_address),
        success: false,
        timestamp: payload.timestamp,
        tx_hash: format!("0x{:x}", payload.tx_hash),
        tx_type: tx_type.to_string(),
        payload: data,
    }
}

/// Decimal string form of an amount.
pub(crate) fn amount(value: U256) -> String {
    value.to_string()
}

/// Router with every built-in handler registered.
pub fn default_router(ctx: Arc<HandlerContext>, publisher: Arc<dyn Publisher>) -> Result<Router> {
    let router = RouterBuilder::new()
        .register(Arc::new(TokenTransferHandler::new(ctx.clone())))?
        .register(Arc::new(TokenApproveHandler::new(ctx.clone())))?
        .register(Arc::new(TokenMintHandler))?
        .register(Arc::new(TokenBurnHandler))?
        .register(Arc::new(FaucetGiveHandler))?
        .register(Arc::new(IndexAddHandler::new(ctx.clone())))?
        .register(Arc::new(IndexRemoveHandler::new(ctx.clone())))?
        .register(Arc::new(CustodialRegistrationHandler))?
        .register(Arc::new(OwnershipHandler))?
        .register(Arc::new(PoolDepositHandler))?
        .register(Arc::new(PoolSwapHandler))?
        .register(Arc::new(QuoterPriceHandler))?
        .register(Arc::new(QuoterUpdatedHandler))?
        .register(Arc::new(LimitSetHandler::new(ctx)))?
        .register(Arc::new(SealHandler))?
        .build(publisher);

    tracing::debug!(handlers = ?router.handler_names(), "router built");
    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingPublisher;
    use alloy_primitives::address;

    #[test]
    fn test_default_router_has_no_conflicts() {
        let ctx = HandlerContext::new(Arc::new(AddressCache::new()), []);
        let router = default_router(ctx, Arc::new(RecordingPublisher::default())).unwrap();
        let names = router.handler_names();
        assert_eq!(names.len(), 15);
        assert!(names.contains(&"TOKEN_TRANSFER"));
        assert!(names.contains(&"CUSTODIAL_REGISTRATION"));
        assert!(router.handler("POOL_SWAP").is_some());
    }

    #[test]
    fn test_within_network() {
        let noisy = address!("765DE816845861e75A25fCA122bb6898B8B1282a");
        let quiet = address!("00000000000000000000000000000000000000c1");
        let member = address!("00000000000000000000000000000000000000c2");
        let outsider = address!("00000000000000000000000000000000000000c3");

        let cache = Arc::new(AddressCache::bootstrap(&[noisy, quiet, member], &[], &[]));
        let ctx = HandlerContext::new(cache, [noisy]);

        assert!(ctx.within_network(&quiet, &outsider, &outsider));
        assert!(ctx.within_network(&noisy, &outsider, &member));
        assert!(!ctx.within_network(&noisy, &outsider, &outsider));
    }
}
