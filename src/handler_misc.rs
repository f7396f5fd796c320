//! Faucet, ownership and seal handlers

use crate::abi::{self, call_args, checksum, DecodeError};
use crate::event::Event;
use crate::handler::{amount, log_event, revert_event};
use crate::router::{Handler, InputDataPayload, LogPayload};
use alloy_primitives::Address;
use serde_json::json;

const FAUCET_GIVE: &str = "FAUCET_GIVE";
const OWNERSHIP_TRANSFERRED: &str = "OWNERSHIP_TRANSFERRED";
const SEAL_STATE_CHANGE: &str = "SEAL_STATE_CHANGE";

const GIVE_TO_SIG: &str = "giveTo(address)";
const GIMME_SIG: &str = "gimme()";

/// Faucet payouts. Reverted calls carry no token or amount, so both are zero.
pub struct FaucetGiveHandler;

impl Handler for FaucetGiveHandler {
    fn name(&self) -> &'static str {
        FAUCET_GIVE
    }

    fn events(&self) -> Vec<&'static str> {
        vec!["Give(address,address,uint256)"]
    }

    fn selectors(&self) -> Vec<&'static str> {
        vec![GIVE_TO_SIG, GIMME_SIG]
    }

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError> {
        let log = payload.log;
        let recipient = abi::topic_address(&log.topics, 1)?;
        let token = abi::topic_address(&log.topics, 2)?;
        let given = abi::data_u256(&log.data, 0)?;

        Ok(Some(log_event(
            FAUCET_GIVE,
            payload,
            json!({
                "recipient": checksum(&recipient),
                "token": checksum(&token),
                "amount": amount(given),
            }),
        )))
    }

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError> {
        let recipient = match payload.selector() {
            Some(s) if s == abi::selector(GIVE_TO_SIG) => {
                abi::data_address(call_args(&payload.input)?, 0)?
            }
            Some(s) if s == abi::selector(GIMME_SIG) => Address::ZERO,
            _ => return Ok(None),
        };

        Ok(Some(revert_event(
            FAUCET_GIVE,
            payload,
            json!({
                "recipient": checksum(&recipient),
                "token": checksum(&Address::ZERO),
                "amount": "0",
            }),
        )))
    }
}

pub struct OwnershipHandler;

impl Handler for OwnershipHandler {
    fn name(&self) -> &'static str {
        OWNERSHIP_TRANSFERRED
    }

    fn events(&self) -> Vec<&'static str> {
        vec!["OwnershipTransferred(address,address)"]
    }

    fn selectors(&self) -> Vec<&'static str> {
        vec!["transferOwnership(address)"]
    }

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError> {
        let log = payload.log;
        let previous_owner = abi::topic_address(&log.topics, 1)?;
        let new_owner = abi::topic_address(&log.topics, 2)?;

        Ok(Some(log_event(
            OWNERSHIP_TRANSFERRED,
            payload,
            json!({
                "previousOwner": checksum(&previous_owner),
                "newOwner": checksum(&new_owner),
            }),
        )))
    }

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError> {
        let new_owner = abi::data_address(call_args(&payload.input)?, 0)?;

        Ok(Some(revert_event(
            OWNERSHIP_TRANSFERRED,
            payload,
            json!({
                "previousOwner": checksum(&payload.from),
                "newOwner": checksum(&new_owner),
            }),
        )))
    }
}

pub struct SealHandler;

impl Handler for SealHandler {
    fn name(&self) -> &'static str {
        SEAL_STATE_CHANGE
    }

    fn events(&self) -> Vec<&'static str> {
        vec!["SealStateChange(bool,uint256)"]
    }

    fn selectors(&self) -> Vec<&'static str> {
        vec!["seal(uint256)"]
    }

    fn handle_log(&self, payload: &LogPayload<'_>) -> Result<Option<Event>, DecodeError> {
        let log = payload.log;
        let is_final = abi::topic_bool(&log.topics, 1)?;
        let seal_state = abi::data_u256(&log.data, 0)?;

        Ok(Some(log_event(
            SEAL_STATE_CHANGE,
            payload,
            json!({
                "final": is_final,
                "sealState": amount(seal_state),
            }),
        )))
    }

    fn handle_input(&self, payload: &InputDataPayload) -> Result<Option<Event>, DecodeError> {
        let seal_state = abi::data_u256(call_args(&payload.input)?, 0)?;

        Ok(Some(revert_event(
            SEAL_STATE_CHANGE,
            payload,
            json!({ "sealState": amount(seal_state) }),
        )))
    }
}
