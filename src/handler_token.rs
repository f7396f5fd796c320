//! Token handlers: transfers, approvals, mints and burns

use crate::abi::{self, call_args, checksum, DecodeError};
use crate::event::Event;
use crate::handler::{amount, log_event, revert_event, HandlerContext};
use crate::router::{Handler, InputDataPayload, LogPayload};
use serde_json::json;
use std::sync::Arc;

const TOKEN_TRANSFER: &str = "TOKEN_TRANSFER";
const TOKEN_APPROVE: &str = "TOKEN_APPROVE";
const TOKEN_MINT: &str = "TOKEN_MINT";
const TOKEN_BURN: &str = "TOKEN_BURN";

const TRANSFER_EVENT: &str = "Transfer(address,address,uint256)";
const TRANSFER_SIG: &str = "transfer(address,uint256)";
const TRANSFER_FROM_SIG: &str = "transferFrom(address,address,uint256)";

pub struct TokenTransferHandler {
    ctx: Arc<HandlerContext>,
}

impl TokenTransferHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

impl Handler for TokenTransferHandler {
    fn name(&self) -> &'static str {
        TOKEN_TRANSFER
    }

    fn events(&self) -> Vec<&'static str> {
        vec![TRANSFER_EVENT]
    }

    fn selectors(&self) -> Vec<&'static str> {
        vec![TRANSFER_SIG, TRANSFER_FROM_SIG]
    }

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError> {
        let log = payload.log;
        let from = abi::topic_address(&log.topics, 1)?;
        let to = abi::topic_address(&log.topics, 2)?;
        let value = abi::data_u256(&log.data, 0)?;

        if !self.ctx.within_network(&log.address, &from, &to) {
            return Ok(None);
        }

        Ok(Some(log_event(
            TOKEN_TRANSFER,
            payload,
            json!({
                "from": checksum(&from),
                "to": checksum(&to),
                "value": amount(value),
            }),
        )))
    }

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError> {
        let args = call_args(&payload.input)?;
        let (from, to, value) = match payload.selector() {
            Some(s) if s == abi::selector(TRANSFER_SIG) => {
                (payload.from, abi::data_address(args, 0)?, abi::data_u256(args, 1)?)
            }
            Some(s) if s == abi::selector(TRANSFER_FROM_SIG) => (
                abi::data_address(args, 0)?,
                abi::data_address(args, 1)?,
                abi::data_u256(args, 2)?,
            ),
            _ => return Ok(None),
        };

        if !self.ctx.within_network(&payload.contract_address, &from, &to) {
            return Ok(None);
        }

        Ok(Some(revert_event(
            TOKEN_TRANSFER,
            payload,
            json!({
                "from": checksum(&from),
                "to": checksum(&to),
                "value": amount(value),
            }),
        )))
    }
}

pub struct TokenApproveHandler {
    ctx: Arc<HandlerContext>,
}

impl TokenApproveHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

impl Handler for TokenApproveHandler {
    fn name(&self) -> &'static str {
        TOKEN_APPROVE
    }

    fn events(&self) -> Vec<&'static str> {
        vec!["Approval(address,address,uint256)"]
    }

    fn selectors(&self) -> Vec<&'static str> {
        vec!["approve(address,uint256)"]
    }

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError> {
        let log = payload.log;
        let owner = abi::topic_address(&log.topics, 1)?;
        let spender = abi::topic_address(&log.topics, 2)?;
        let value = abi::data_u256(&log.data, 0)?;

        if !self.ctx.within_network(&log.address, &owner, &spender) {
            return Ok(None);
        }

        Ok(Some(log_event(
            TOKEN_APPROVE,
            payload,
            json!({
                "owner": checksum(&owner),
                "spender": checksum(&spender),
                "value": amount(value),
            }),
        )))
    }

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError> {
        let args = call_args(&payload.input)?;
        let spender = abi::data_address(args, 0)?;
        let value = abi::data_u256(args, 1)?;

        if !self
            .ctx
            .within_network(&payload.contract_address, &payload.from, &spender)
        {
            return Ok(None);
        }

        Ok(Some(revert_event(
            TOKEN_APPROVE,
            payload,
            json!({
                "owner": checksum(&payload.from),
                "spender": checksum(&spender),
                "value": amount(value),
            }),
        )))
    }
}

pub struct TokenMintHandler;

impl Handler for TokenMintHandler {
    fn name(&self) -> &'static str {
        TOKEN_MINT
    }

    fn events(&self) -> Vec<&'static str> {
        vec!["Mint(address,address,uint256)"]
    }

    fn selectors(&self) -> Vec<&'static str> {
        vec!["mintTo(address,uint256)"]
    }

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError> {
        let log = payload.log;
        let minter = abi::topic_address(&log.topics, 1)?;
        let to = abi::topic_address(&log.topics, 2)?;
        let value = abi::data_u256(&log.data, 0)?;

        Ok(Some(log_event(
            TOKEN_MINT,
            payload,
            json!({
                "minter": checksum(&minter),
                "to": checksum(&to),
                "value": amount(value),
            }),
        )))
    }

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError> {
        let args = call_args(&payload.input)?;
        let to = abi::data_address(args, 0)?;
        let value = abi::data_u256(args, 1)?;

        Ok(Some(revert_event(
            TOKEN_MINT,
            payload,
            json!({
                "minter": checksum(&payload.from),
                "to": checksum(&to),
                "value": amount(value),
            }),
        )))
    }
}

pub struct TokenBurnHandler;

impl Handler for TokenBurnHandler {
    fn name(&self) -> &'static str {
        TOKEN_BURN
    }

    fn events(&self) -> Vec<&'static str> {
        vec!["Burn(address,uint256)"]
    }

    fn selectors(&self) -> Vec<&'static str> {
        vec!["burn(uint256)"]
    }

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError> {
        let log = payload.log;
        let burner = abi::topic_address(&log.topics, 1)?;
        let value = abi::data_u256(&log.data, 0)?;

        Ok(Some(log_event(
            TOKEN_BURN,
            payload,
            json!({
                "burner": checksum(&burner),
                "value": amount(value),
            }),
        )))
    }

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError> {
        let args = call_args(&payload.input)?;
        let value = abi::data_u256(args, 0)?;

        Ok(Some(revert_event(
            TOKEN_BURN,
            payload,
            json!({
                "burner": checksum(&payload.from),
                "value": amount(value),
            }),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::encode::{address_topic, address_word, call, data, u256_word};
    use crate::abi::event_topic;
    use crate::cache::AddressCache;
    use crate::testutil::{log, tx_hash};
    use alloy_primitives::{address, Address, B256};

    const TOKEN: Address = address!("00000000000000000000000000000000000000d1");
    const ALICE: Address = address!("00000000000000000000000000000000000000d2");
    const BOB: Address = address!("00000000000000000000000000000000000000d3");

    fn ctx(noisy: bool) -> Arc<HandlerContext> {
        let cache = Arc::new(AddressCache::bootstrap(&[TOKEN, ALICE], &[], &[]));
        HandlerContext::new(cache, if noisy { vec![TOKEN] } else { vec![] })
    }

    fn transfer_log(from: Address, to: Address, value: u64) -> crate::types::Log {
        log(
            TOKEN,
            vec![event_topic(TRANSFER_EVENT), address_topic(from), address_topic(to)],
            data(&[u256_word(value)]),
            500,
            4,
            tx_hash(9),
        )
    }

    fn revert(input: Vec<u8>) -> InputDataPayload {
        InputDataPayload {
            from: ALICE,
            revert_reason: "ERC20: insufficient balance".to_string(),
            input,
            block: 501,
            contract_address: TOKEN,
            timestamp: 1_700_000_501,
            tx_hash: B256::repeat_byte(0x42),
        }
    }

    #[test]
    fn test_transfer_log() {
        let handler = TokenTransferHandler::new(ctx(false));
        let log = transfer_log(ALICE, BOB, 1_000);
        let event = handler
            .handle_log(&LogPayload { log: &log, timestamp: 77 })
            .unwrap()
            .unwrap();

        assert_eq!(event.tx_type, TOKEN_TRANSFER);
        assert_eq!(event.block, 500);
        assert_eq!(event.index, Some(4));
        assert!(event.success);
        assert_eq!(event.timestamp, 77);
        assert_eq!(event.payload["from"], checksum(&ALICE));
        assert_eq!(event.payload["to"], checksum(&BOB));
        assert_eq!(event.payload["value"], "1000");
    }

    #[test]
    fn test_noisy_transfer_needs_member() {
        let handler = TokenTransferHandler::new(ctx(true));
        let stranger = Address::repeat_byte(0x99);

        let outside = transfer_log(stranger, BOB, 1);
        assert!(handler
            .handle_log(&LogPayload { log: &outside, timestamp: 0 })
            .unwrap()
            .is_none());

        let inside = transfer_log(stranger, ALICE, 1);
        assert!(handler
            .handle_log(&LogPayload { log: &inside, timestamp: 0 })
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_transfer_log_missing_topic() {
        let handler = TokenTransferHandler::new(ctx(false));
        let mut log = transfer_log(ALICE, BOB, 1);
        log.topics.truncate(2);
        assert!(handler
            .handle_log(&LogPayload { log: &log, timestamp: 0 })
            .is_err());
    }

    #[test]
    fn test_transfer_reverts() {
        let handler = TokenTransferHandler::new(ctx(false));

        let direct = handler
            .handle_input(&revert(call(
                TRANSFER_SIG,
                &[address_word(BOB), u256_word(5)],
            )))
            .unwrap()
            .unwrap();
        assert!(!direct.success);
        assert_eq!(direct.index, None);
        assert_eq!(direct.payload["from"], checksum(&ALICE));
        assert_eq!(direct.payload["to"], checksum(&BOB));
        assert_eq!(direct.payload["revertReason"], "ERC20: insufficient balance");
        assert_eq!(direct.dedup_key(), format!("{}:0x{:x}", TOKEN_TRANSFER, B256::repeat_byte(0x42)));

        let delegated = handler
            .handle_input(&revert(call(
                TRANSFER_FROM_SIG,
                &[address_word(BOB), address_word(ALICE), u256_word(6)],
            )))
            .unwrap()
            .unwrap();
        assert_eq!(delegated.payload["from"], checksum(&BOB));
        assert_eq!(delegated.payload["to"], checksum(&ALICE));
        assert_eq!(delegated.payload["value"], "6");
    }

    #[test]
    fn test_truncated_call_data_is_decode_error() {
        let handler = TokenTransferHandler::new(ctx(false));
        let input = call(TRANSFER_SIG, &[address_word(BOB)]);
        assert!(handler.handle_input(&revert(input)).is_err());
    }

    #[test]
    fn test_mint_and_burn() {
        let mint_log = log(
            TOKEN,
            vec![
                event_topic("Mint(address,address,uint256)"),
                address_topic(ALICE),
                address_topic(BOB),
            ],
            data(&[u256_word(50)]),
            10,
            0,
            tx_hash(1),
        );
        let mint = TokenMintHandler
            .handle_log(&LogPayload { log: &mint_log, timestamp: 0 })
            .unwrap()
            .unwrap();
        assert_eq!(mint.payload["minter"], checksum(&ALICE));
        assert_eq!(mint.payload["to"], checksum(&BOB));

        let burn = TokenBurnHandler
            .handle_input(&revert(call("burn(uint256)", &[u256_word(3)])))
            .unwrap()
            .unwrap();
        assert_eq!(burn.payload["burner"], checksum(&ALICE));
        assert_eq!(burn.payload["value"], "3");
    }

    #[test]
    fn test_approve_revert_uses_sender_as_owner() {
        let handler = TokenApproveHandler::new(ctx(false));
        let event = handler
            .handle_input(&revert(call(
                "approve(address,uint256)",
                &[address_word(BOB), u256_word(12)],
            )))
            .unwrap()
            .unwrap();
        assert_eq!(event.payload["owner"], checksum(&ALICE));
        assert_eq!(event.payload["spender"], checksum(&BOB));
    }
}
