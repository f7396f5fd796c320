//! Swap pool, quoter and limiter handlers

use crate::abi::{self, call_args, checksum, DecodeError};
use crate::event::Event;
use crate::handler::{amount, log_event, revert_event, HandlerContext};
use crate::router::{Handler, InputDataPayload, LogPayload};
use serde_json::json;
use std::sync::Arc;

const POOL_DEPOSIT: &str = "POOL_DEPOSIT";
const POOL_SWAP: &str = "POOL_SWAP";
const QUOTER_PRICE_INDEX_UPDATED: &str = "QUOTER_PRICE_INDEX_UPDATED";
const QUOTER_UPDATED: &str = "QUOTER_UPDATED";
const LIMIT_SET: &str = "LIMIT_SET";

pub struct PoolDepositHandler;

impl Handler for PoolDepositHandler {
    fn name(&self) -> &'static str {
        POOL_DEPOSIT
    }

    fn events(&self) -> Vec<&'static str> {
        vec!["Deposit(address,address,uint256)"]
    }

    fn selectors(&self) -> Vec<&'static str> {
        vec!["deposit(address,uint256)"]
    }

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError> {
        let log = payload.log;
        let initiator = abi::topic_address(&log.topics, 1)?;
        let token_in = abi::topic_address(&log.topics, 2)?;
        let amount_in = abi::data_u256(&log.data, 0)?;

        Ok(Some(log_event(
            POOL_DEPOSIT,
            payload,
            json!({
                "initiator": checksum(&initiator),
                "tokenIn": checksum(&token_in),
                "amountIn": amount(amount_in),
            }),
        )))
    }

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError> {
        let args = call_args(&payload.input)?;
        let token_in = abi::data_address(args, 0)?;
        let amount_in = abi::data_u256(args, 1)?;

        Ok(Some(revert_event(
            POOL_DEPOSIT,
            payload,
            json!({
                "initiator": checksum(&payload.from),
                "tokenIn": checksum(&token_in),
                "amountIn": amount(amount_in),
            }),
        )))
    }
}

/// Swaps. A reverted `withdraw(tokenOut, tokenIn, amount)` is reported as a
/// swap with zero output and fee.
pub struct PoolSwapHandler;

impl Handler for PoolSwapHandler {
    fn name(&self) -> &'static str {
        POOL_SWAP
    }

    fn events(&self) -> Vec<&'static str> {
        vec!["Swap(address,address,address,uint256,uint256,uint256)"]
    }

    fn selectors(&self) -> Vec<&'static str> {
        vec!["withdraw(address,address,uint256)"]
    }

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError> {
        let log = payload.log;
        let initiator = abi::topic_address(&log.topics, 1)?;
        let token_in = abi::topic_address(&log.topics, 2)?;
        let token_out = abi::data_address(&log.data, 0)?;
        let amount_in = abi::data_u256(&log.data, 1)?;
        let amount_out = abi::data_u256(&log.data, 2)?;
        let fee = abi::data_u256(&log.data, 3)?;

        Ok(Some(log_event(
            POOL_SWAP,
            payload,
            json!({
                "initiator": checksum(&initiator),
                "tokenIn": checksum(&token_in),
                "tokenOut": checksum(&token_out),
                "amountIn": amount(amount_in),
                "amountOut": amount(amount_out),
                "fee": amount(fee),
            }),
        )))
    }

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError> {
        let args = call_args(&payload.input)?;
        let token_out = abi::data_address(args, 0)?;
        let token_in = abi::data_address(args, 1)?;
        let amount_in = abi::data_u256(args, 2)?;

        Ok(Some(revert_event(
            POOL_SWAP,
            payload,
            json!({
                "initiator": checksum(&payload.from),
                "tokenIn": checksum(&token_in),
                "tokenOut": checksum(&token_out),
                "amountIn": amount(amount_in),
                "amountOut": "0",
                "fee": "0",
            }),
        )))
    }
}

pub struct QuoterPriceHandler;

impl Handler for QuoterPriceHandler {
    fn name(&self) -> &'static str {
        QUOTER_PRICE_INDEX_UPDATED
    }

    fn events(&self) -> Vec<&'static str> {
        vec!["PriceIndexUpdated(address,uint256)"]
    }

    fn selectors(&self) -> Vec<&'static str> {
        vec!["setPriceIndexValue(address,uint256)"]
    }

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError> {
        let data = &payload.log.data;
        let token = abi::data_address(data, 0)?;
        let exchange_rate = abi::data_u256(data, 1)?;

        Ok(Some(log_event(
            QUOTER_PRICE_INDEX_UPDATED,
            payload,
            json!({
                "token": checksum(&token),
                "exchangeRate": amount(exchange_rate),
            }),
        )))
    }

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError> {
        let args = call_args(&payload.input)?;
        let token = abi::data_address(args, 0)?;
        let exchange_rate = abi::data_u256(args, 1)?;

        Ok(Some(revert_event(
            QUOTER_PRICE_INDEX_UPDATED,
            payload,
            json!({
                "token": checksum(&token),
                "exchangeRate": amount(exchange_rate),
            }),
        )))
    }
}

pub struct QuoterUpdatedHandler;

impl Handler for QuoterUpdatedHandler {
    fn name(&self) -> &'static str {
        QUOTER_UPDATED
    }

    fn events(&self) -> Vec<&'static str> {
        vec!["QuoterUpdated(address)"]
    }

    fn selectors(&self) -> Vec<&'static str> {
        vec!["setQuoter(address)"]
    }

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError> {
        let new_quoter = abi::topic_address(&payload.log.topics, 1)?;

        Ok(Some(log_event(
            QUOTER_UPDATED,
            payload,
            json!({ "newQuoter": checksum(&new_quoter) }),
        )))
    }

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError> {
        let new_quoter = abi::data_address(call_args(&payload.input)?, 0)?;

        Ok(Some(revert_event(
            QUOTER_UPDATED,
            payload,
            json!({ "newQuoter": checksum(&new_quoter) }),
        )))
    }
}

/// Per-holder spending limits. Subject to the noisy-token filter.
pub struct LimitSetHandler {
    ctx: Arc<HandlerContext>,
}

impl LimitSetHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

impl Handler for LimitSetHandler {
    fn name(&self) -> &'static str {
        LIMIT_SET
    }

    fn events(&self) -> Vec<&'static str> {
        vec!["LimitSet(address,address,uint256)"]
    }

    fn selectors(&self) -> Vec<&'static str> {
        vec!["setLimitFor(address,address,uint256)"]
    }

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError> {
        let log = payload.log;
        let token = abi::topic_address(&log.topics, 1)?;
        let holder = abi::topic_address(&log.topics, 2)?;
        let value = abi::data_u256(&log.data, 0)?;

        if !self.ctx.within_network(&log.address, &token, &holder) {
            return Ok(None);
        }

        Ok(Some(log_event(
            LIMIT_SET,
            payload,
            json!({
                "token": checksum(&token),
                "holder": checksum(&holder),
                "value": amount(value),
            }),
        )))
    }

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError> {
        let args = call_args(&payload.input)?;
        let token = abi::data_address(args, 0)?;
        let holder = abi::data_address(args, 1)?;
        let value = abi::data_u256(args, 2)?;

        if !self
            .ctx
            .within_network(&payload.contract_address, &token, &holder)
        {
            return Ok(None);
        }

        Ok(Some(revert_event(
            LIMIT_SET,
            payload,
            json!({
                "token": checksum(&token),
                "holder": checksum(&holder),
                "value": amount(value),
            }),
        )))
    }
}
