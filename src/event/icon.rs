//! ICON-family event logs
//!
//! ICON records an event as `{ scoreAddress, indexed, data }` where
//! `indexed[0]` is the event signature and every integer is a hex string.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use super::{
    decode_error, missing_field, require_outcome, require_req_id, require_sn, EventCodec,
    ExecutionOutcome, RawLog, XCallEvent, XCallEventType,
};
use crate::chain::{ChainFamily, ChainId};
use crate::error::Result;

/// An event log as returned by `icx_getTransactionResult`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IconEventLog {
    pub score_address: String,
    pub indexed: Vec<String>,
    #[serde(default)]
    pub data: Vec<Option<String>>,
}

/// Codec for ICON-style event logs
#[derive(Debug, Clone, Copy, Default)]
pub struct IconCodec;

impl IconCodec {
    fn log<'a>(log: &'a RawLog, event_type: XCallEventType) -> Result<&'a IconEventLog> {
        match log {
            RawLog::Icon(log) => Ok(log),
            other => Err(decode_error(
                event_type,
                format!("expected an ICON event log, got a {} log", other.family()),
            )),
        }
    }
}

impl EventCodec for IconCodec {
    fn family(&self) -> ChainFamily {
        ChainFamily::Icon
    }

    fn signature_of(&self, event_type: XCallEventType) -> &'static str {
        match event_type {
            XCallEventType::CallMessage => "CallMessage(str,str,int,int,bytes)",
            XCallEventType::CallExecuted => "CallExecuted(int,int,str)",
            XCallEventType::CallMessageSent => "CallMessageSent(Address,str,int)",
            XCallEventType::ResponseMessage => "ResponseMessage(int,int,str)",
            XCallEventType::RollbackMessage => "RollbackMessage(int)",
        }
    }

    fn matches(&self, log: &RawLog, event_type: XCallEventType, contract: Option<&str>) -> bool {
        let RawLog::Icon(log) = log else {
            return false;
        };
        log.indexed.first().map(String::as_str) == Some(self.signature_of(event_type))
            && contract.map_or(true, |address| address == log.score_address)
    }

    fn decode(
        &self,
        raw: &RawLog,
        event_type: XCallEventType,
        chain: ChainId,
    ) -> Result<XCallEvent> {
        let log = Self::log(raw, event_type)?;
        if !self.matches(raw, event_type, None) {
            return Err(decode_error(event_type, "signature mismatch"));
        }

        let mut event = XCallEvent::new(event_type, chain);
        match event_type {
            XCallEventType::CallMessageSent => {
                event.from = Some(indexed(log, event_type, 1, "_from")?.to_string());
                event.to = Some(indexed(log, event_type, 2, "_to")?.to_string());
                event.sn = Some(parse_hex_u256(
                    event_type,
                    indexed(log, event_type, 3, "_sn")?,
                )?);
            }
            XCallEventType::CallMessage => {
                event.from = Some(indexed(log, event_type, 1, "_from")?.to_string());
                event.to = Some(indexed(log, event_type, 2, "_to")?.to_string());
                event.sn = Some(parse_hex_u256(
                    event_type,
                    indexed(log, event_type, 3, "_sn")?,
                )?);
                event.req_id = Some(parse_hex_u256(
                    event_type,
                    data(log, event_type, 0, "_reqId")?,
                )?);
            }
            XCallEventType::CallExecuted => {
                event.req_id = Some(parse_hex_u256(
                    event_type,
                    indexed(log, event_type, 1, "_reqId")?,
                )?);
                event.outcome = Some(outcome(log, event_type)?);
            }
            XCallEventType::ResponseMessage => {
                event.sn = Some(parse_hex_u256(
                    event_type,
                    indexed(log, event_type, 1, "_sn")?,
                )?);
                event.outcome = Some(outcome(log, event_type)?);
            }
            XCallEventType::RollbackMessage => {
                event.sn = Some(parse_hex_u256(
                    event_type,
                    indexed(log, event_type, 1, "_sn")?,
                )?);
            }
        }
        event.raw = Some(raw.clone());
        Ok(event)
    }

    fn encode(&self, event: &XCallEvent, contract: &str) -> Result<RawLog> {
        let event_type = event.event_type;
        let signature = self.signature_of(event_type).to_string();
        let from = event.from.clone().unwrap_or_default();
        let to = event.to.clone().unwrap_or_default();

        let (indexed, data) = match event_type {
            XCallEventType::CallMessageSent => (
                vec![signature, from, to, format_hex_u256(require_sn(event)?)],
                vec![],
            ),
            XCallEventType::CallMessage => (
                vec![signature, from, to, format_hex_u256(require_sn(event)?)],
                vec![
                    Some(format_hex_u256(require_req_id(event)?)),
                    Some("0x".to_string()),
                ],
            ),
            XCallEventType::CallExecuted => {
                let outcome = require_outcome(event)?;
                (
                    vec![signature, format_hex_u256(require_req_id(event)?)],
                    vec![
                        Some(format_hex_i64(outcome.code)),
                        Some(outcome.message.clone()),
                    ],
                )
            }
            XCallEventType::ResponseMessage => {
                let outcome = require_outcome(event)?;
                (
                    vec![signature, format_hex_u256(require_sn(event)?)],
                    vec![
                        Some(format_hex_i64(outcome.code)),
                        Some(outcome.message.clone()),
                    ],
                )
            }
            XCallEventType::RollbackMessage => {
                (vec![signature, format_hex_u256(require_sn(event)?)], vec![])
            }
        };

        Ok(RawLog::Icon(IconEventLog {
            score_address: contract.to_string(),
            indexed,
            data,
        }))
    }

    fn salvage(&self, raw: &RawLog, event_type: XCallEventType, chain: ChainId) -> XCallEvent {
        let mut event = XCallEvent::new(event_type, chain);
        let RawLog::Icon(log) = raw else {
            return event;
        };
        let hex = |value: Option<&str>| {
            value.and_then(|value| parse_hex_u256(event_type, value).ok())
        };
        let at = |position: usize| log.indexed.get(position).map(String::as_str);
        match event_type {
            XCallEventType::CallMessageSent => {
                event.from = at(1).map(str::to_string);
                event.sn = hex(at(3));
            }
            XCallEventType::CallMessage => {
                event.from = at(1).map(str::to_string);
                event.sn = hex(at(3));
                event.req_id = hex(log.data.first().and_then(Option::as_deref));
            }
            XCallEventType::CallExecuted => event.req_id = hex(at(1)),
            XCallEventType::ResponseMessage | XCallEventType::RollbackMessage => {
                event.sn = hex(at(1));
            }
        }
        event
    }
}

fn indexed<'a>(
    log: &'a IconEventLog,
    event_type: XCallEventType,
    position: usize,
    field: &str,
) -> Result<&'a str> {
    log.indexed
        .get(position)
        .map(String::as_str)
        .ok_or_else(|| missing_field(event_type, field))
}

fn data<'a>(
    log: &'a IconEventLog,
    event_type: XCallEventType,
    position: usize,
    field: &str,
) -> Result<&'a str> {
    log.data
        .get(position)
        .and_then(Option::as_deref)
        .ok_or_else(|| missing_field(event_type, field))
}

fn outcome(log: &IconEventLog, event_type: XCallEventType) -> Result<ExecutionOutcome> {
    let code = parse_hex_i64(event_type, data(log, event_type, 0, "_code")?)?;
    // The message slot is optional in older contract versions.
    let message = log
        .data
        .get(1)
        .and_then(Option::as_deref)
        .unwrap_or_default();
    Ok(ExecutionOutcome::new(code, message))
}

/// Parses an ICON hex integer (`0x2a`)
pub(crate) fn parse_hex_u256(event_type: XCallEventType, value: &str) -> Result<U256> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| decode_error(event_type, format!("`{value}` is not a hex integer")))?;
    U256::from_str_radix(digits, 16)
        .map_err(|e| decode_error(event_type, format!("`{value}` is not a hex integer: {e}")))
}

/// Parses a signed ICON hex integer (`0x1`, `-0x1`)
pub(crate) fn parse_hex_i64(event_type: XCallEventType, value: &str) -> Result<i64> {
    let (negative, unsigned) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let digits = unsigned
        .strip_prefix("0x")
        .ok_or_else(|| decode_error(event_type, format!("`{value}` is not a hex integer")))?;
    let magnitude = i64::from_str_radix(digits, 16)
        .map_err(|e| decode_error(event_type, format!("`{value}` is not a hex integer: {e}")))?;
    Ok(if negative { -magnitude } else { magnitude })
}

pub(crate) fn format_hex_u256(value: U256) -> String {
    format!("0x{value:x}")
}

pub(crate) fn format_hex_i64(value: i64) -> String {
    if value < 0 {
        format!("-0x{:x}", value.unsigned_abs())
    } else {
        format!("0x{value:x}")
    }
}
