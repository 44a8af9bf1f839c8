// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0
//! EVM xCall event bindings
//!
//! Topic-indexed ABI logs. Indexed `string` parameters are stored as their
//! keccak hash, so `from`/`to` network addresses are only recoverable where
//! the contract indexes a plain `address`.

use alloy_primitives::{keccak256, Address, Log, LogData, B256, I256, U256};
use alloy_sol_types::SolEvent;

use super::{
    decode_error, require_outcome, require_req_id, require_sn, EventCodec, ExecutionOutcome,
    RawLog, XCallEvent, XCallEventType,
};
use crate::chain::{ChainFamily, ChainId};
use crate::error::Result;

mod abi {
    alloy_sol_types::sol! {
        #[allow(missing_docs)]
        event CallMessageSent(address indexed from, string indexed to, uint256 indexed sn);

        #[allow(missing_docs)]
        event CallMessage(
            string indexed from,
            string indexed to,
            uint256 indexed sn,
            uint256 req_id,
            bytes data
        );

        #[allow(missing_docs)]
        event CallExecuted(uint256 indexed req_id, int256 code, string msg);

        #[allow(missing_docs)]
        event ResponseMessage(uint256 indexed sn, int256 code);

        #[allow(missing_docs)]
        event RollbackMessage(uint256 indexed sn);
    }
}

/// Codec for EVM xCall logs
#[derive(Debug, Clone, Copy, Default)]
pub struct EvmCodec;

impl EvmCodec {
    fn topic_of(event_type: XCallEventType) -> B256 {
        match event_type {
            XCallEventType::CallMessageSent => abi::CallMessageSent::SIGNATURE_HASH,
            XCallEventType::CallMessage => abi::CallMessage::SIGNATURE_HASH,
            XCallEventType::CallExecuted => abi::CallExecuted::SIGNATURE_HASH,
            XCallEventType::ResponseMessage => abi::ResponseMessage::SIGNATURE_HASH,
            XCallEventType::RollbackMessage => abi::RollbackMessage::SIGNATURE_HASH,
        }
    }
}

impl EventCodec for EvmCodec {
    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }

    fn signature_of(&self, event_type: XCallEventType) -> &'static str {
        match event_type {
            XCallEventType::CallMessageSent => abi::CallMessageSent::SIGNATURE,
            XCallEventType::CallMessage => abi::CallMessage::SIGNATURE,
            XCallEventType::CallExecuted => abi::CallExecuted::SIGNATURE,
            XCallEventType::ResponseMessage => abi::ResponseMessage::SIGNATURE,
            XCallEventType::RollbackMessage => abi::RollbackMessage::SIGNATURE,
        }
    }

    fn matches(&self, log: &RawLog, event_type: XCallEventType, contract: Option<&str>) -> bool {
        let RawLog::Evm(log) = log else {
            return false;
        };
        log.data.topics().first() == Some(&Self::topic_of(event_type))
            && contract.map_or(true, |address| {
                address
                    .parse::<Address>()
                    .is_ok_and(|address| address == log.address)
            })
    }

    fn decode(
        &self,
        raw: &RawLog,
        event_type: XCallEventType,
        chain: ChainId,
    ) -> Result<XCallEvent> {
        let RawLog::Evm(log) = raw else {
            return Err(decode_error(
                event_type,
                format!("expected an EVM log, got a {} log", raw.family()),
            ));
        };

        let mut event = XCallEvent::new(event_type, chain);
        match event_type {
            XCallEventType::CallMessageSent => {
                let decoded: abi::CallMessageSent = decode_as(log, event_type)?;
                event.from = Some(decoded.from.to_checksum(None));
                event.sn = Some(decoded.sn);
            }
            XCallEventType::CallMessage => {
                let decoded: abi::CallMessage = decode_as(log, event_type)?;
                event.from_digest = Some(decoded.from);
                event.sn = Some(decoded.sn);
                event.req_id = Some(decoded.req_id);
            }
            XCallEventType::CallExecuted => {
                let decoded: abi::CallExecuted = decode_as(log, event_type)?;
                event.req_id = Some(decoded.req_id);
                event.outcome = Some(ExecutionOutcome::new(
                    code_to_i64(decoded.code, event_type)?,
                    decoded.msg,
                ));
            }
            XCallEventType::ResponseMessage => {
                let decoded: abi::ResponseMessage = decode_as(log, event_type)?;
                event.sn = Some(decoded.sn);
                event.outcome = Some(ExecutionOutcome::new(
                    code_to_i64(decoded.code, event_type)?,
                    "",
                ));
            }
            XCallEventType::RollbackMessage => {
                let decoded: abi::RollbackMessage = decode_as(log, event_type)?;
                event.sn = Some(decoded.sn);
            }
        }
        event.raw = Some(raw.clone());
        Ok(event)
    }

    fn encode(&self, event: &XCallEvent, contract: &str) -> Result<RawLog> {
        let event_type = event.event_type;
        let address: Address = contract
            .parse()
            .map_err(|e| decode_error(event_type, format!("contract `{contract}`: {e}")))?;

        let data: LogData = match event_type {
            XCallEventType::CallMessageSent => abi::CallMessageSent {
                from: event
                    .from
                    .as_deref()
                    .and_then(account_of)
                    .unwrap_or(Address::ZERO),
                to: hashed(event.to.as_deref()),
                sn: require_sn(event)?,
            }
            .encode_log_data(),
            XCallEventType::CallMessage => abi::CallMessage {
                from: event
                    .from
                    .as_deref()
                    .map(|from| keccak256(from.as_bytes()))
                    .or(event.from_digest)
                    .unwrap_or(B256::ZERO),
                to: hashed(event.to.as_deref()),
                sn: require_sn(event)?,
                req_id: require_req_id(event)?,
                data: Default::default(),
            }
            .encode_log_data(),
            XCallEventType::CallExecuted => {
                let outcome = require_outcome(event)?;
                abi::CallExecuted {
                    req_id: require_req_id(event)?,
                    code: code_to_i256(outcome.code, event_type)?,
                    msg: outcome.message.clone(),
                }
                .encode_log_data()
            }
            XCallEventType::ResponseMessage => {
                let outcome = require_outcome(event)?;
                abi::ResponseMessage {
                    sn: require_sn(event)?,
                    code: code_to_i256(outcome.code, event_type)?,
                }
                .encode_log_data()
            }
            XCallEventType::RollbackMessage => abi::RollbackMessage {
                sn: require_sn(event)?,
            }
            .encode_log_data(),
        };

        Ok(RawLog::Evm(Log { address, data }))
    }

    fn salvage(&self, raw: &RawLog, event_type: XCallEventType, chain: ChainId) -> XCallEvent {
        let mut event = XCallEvent::new(event_type, chain);
        let RawLog::Evm(log) = raw else {
            return event;
        };
        let topics = log.data.topics();
        let word = |position: usize| {
            topics
                .get(position)
                .map(|topic| U256::from_be_bytes(topic.0))
        };
        match event_type {
            XCallEventType::CallMessageSent => {
                event.from = topics
                    .get(1)
                    .map(|topic| Address::from_word(*topic).to_checksum(None));
                event.sn = word(3);
            }
            XCallEventType::CallMessage => {
                event.from_digest = topics.get(1).copied();
                event.sn = word(3);
                // req_id is the first head word of the data section
                event.req_id = log.data.data.get(..32).map(U256::from_be_slice);
            }
            XCallEventType::CallExecuted => event.req_id = word(1),
            XCallEventType::ResponseMessage | XCallEventType::RollbackMessage => {
                event.sn = word(1);
            }
        }
        event
    }
}

fn decode_as<E: SolEvent>(log: &Log, event_type: XCallEventType) -> Result<E> {
    E::decode_log_data(&log.data).map_err(|e| decode_error(event_type, e.to_string()))
}

fn code_to_i64(code: I256, event_type: XCallEventType) -> Result<i64> {
    i64::try_from(code).map_err(|e| decode_error(event_type, format!("code {code}: {e}")))
}

fn code_to_i256(code: i64, event_type: XCallEventType) -> Result<I256> {
    I256::try_from(code).map_err(|e| decode_error(event_type, format!("code {code}: {e}")))
}

/// Topic value for an indexed `string` parameter
fn hashed(value: Option<&str>) -> B256 {
    value.map(|value| keccak256(value.as_bytes())).unwrap_or(B256::ZERO)
}

/// Accepts both a bare address and a `"<networkId>/<address>"` form
fn account_of(value: &str) -> Option<Address> {
    value
        .rsplit_once('/')
        .map_or(value, |(_, account)| account)
        .parse()
        .ok()
}
