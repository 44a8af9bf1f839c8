//! Cosmos-family (CosmWasm) events
//!
//! CosmWasm contracts emit ABCI events of type `wasm-<EventName>` whose
//! fields are key/value attributes with decimal integer values.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use super::{
    decode_error, missing_field, require_outcome, require_req_id, require_sn, EventCodec,
    ExecutionOutcome, RawLog, XCallEvent, XCallEventType,
};
use crate::chain::{ChainFamily, ChainId};
use crate::error::Result;

/// Attribute carrying the emitting contract on every `wasm-*` event
pub const CONTRACT_ADDRESS_KEY: &str = "_contract_address";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

/// An ABCI event as returned in `tx_result.events`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosmosEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

impl CosmosEvent {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attribute| attribute.key == key)
            .map(|attribute| attribute.value.as_str())
    }
}

/// Codec for CosmWasm xCall events
#[derive(Debug, Clone, Copy, Default)]
pub struct CosmosCodec;

impl EventCodec for CosmosCodec {
    fn family(&self) -> ChainFamily {
        ChainFamily::Cosmos
    }

    fn signature_of(&self, event_type: XCallEventType) -> &'static str {
        match event_type {
            XCallEventType::CallMessageSent => "wasm-CallMessageSent",
            XCallEventType::CallMessage => "wasm-CallMessage",
            XCallEventType::CallExecuted => "wasm-CallExecuted",
            XCallEventType::ResponseMessage => "wasm-ResponseMessage",
            XCallEventType::RollbackMessage => "wasm-RollbackMessage",
        }
    }

    fn matches(&self, log: &RawLog, event_type: XCallEventType, contract: Option<&str>) -> bool {
        let RawLog::Cosmos(event) = log else {
            return false;
        };
        event.kind == self.signature_of(event_type)
            && contract.map_or(true, |address| {
                event.attribute(CONTRACT_ADDRESS_KEY) == Some(address)
            })
    }

    fn decode(
        &self,
        raw: &RawLog,
        event_type: XCallEventType,
        chain: ChainId,
    ) -> Result<XCallEvent> {
        let RawLog::Cosmos(log) = raw else {
            return Err(decode_error(
                event_type,
                format!("expected a Cosmos event, got a {} log", raw.family()),
            ));
        };
        if !self.matches(raw, event_type, None) {
            return Err(decode_error(event_type, "event type mismatch"));
        }

        let mut event = XCallEvent::new(event_type, chain);
        match event_type {
            XCallEventType::CallMessageSent => {
                event.from = log.attribute("from").map(str::to_string);
                event.to = log.attribute("to").map(str::to_string);
                event.sn = Some(decimal(log, event_type, "sn")?);
            }
            XCallEventType::CallMessage => {
                event.from = log.attribute("from").map(str::to_string);
                event.to = log.attribute("to").map(str::to_string);
                event.sn = Some(decimal(log, event_type, "sn")?);
                event.req_id = Some(decimal(log, event_type, "reqId")?);
            }
            XCallEventType::CallExecuted => {
                event.req_id = Some(decimal(log, event_type, "reqId")?);
                event.outcome = Some(outcome(log, event_type)?);
            }
            XCallEventType::ResponseMessage => {
                event.sn = Some(decimal(log, event_type, "sn")?);
                event.outcome = Some(outcome(log, event_type)?);
            }
            XCallEventType::RollbackMessage => {
                event.sn = Some(decimal(log, event_type, "sn")?);
            }
        }
        event.raw = Some(raw.clone());
        Ok(event)
    }

    fn encode(&self, event: &XCallEvent, contract: &str) -> Result<RawLog> {
        let event_type = event.event_type;
        let mut attributes = vec![attribute(CONTRACT_ADDRESS_KEY, contract)];

        if let Some(from) = &event.from {
            attributes.push(attribute("from", from));
        }
        if let Some(to) = &event.to {
            attributes.push(attribute("to", to));
        }
        match event_type {
            XCallEventType::CallMessageSent | XCallEventType::RollbackMessage => {
                attributes.push(attribute("sn", &require_sn(event)?.to_string()));
            }
            XCallEventType::CallMessage => {
                attributes.push(attribute("sn", &require_sn(event)?.to_string()));
                attributes.push(attribute("reqId", &require_req_id(event)?.to_string()));
                attributes.push(attribute("data", ""));
            }
            XCallEventType::CallExecuted => {
                let outcome = require_outcome(event)?;
                attributes.push(attribute("reqId", &require_req_id(event)?.to_string()));
                attributes.push(attribute("code", &outcome.code.to_string()));
                attributes.push(attribute("msg", &outcome.message));
            }
            XCallEventType::ResponseMessage => {
                let outcome = require_outcome(event)?;
                attributes.push(attribute("sn", &require_sn(event)?.to_string()));
                attributes.push(attribute("code", &outcome.code.to_string()));
                attributes.push(attribute("msg", &outcome.message));
            }
        }

        Ok(RawLog::Cosmos(CosmosEvent {
            kind: self.signature_of(event_type).to_string(),
            attributes,
        }))
    }

    fn salvage(&self, raw: &RawLog, event_type: XCallEventType, chain: ChainId) -> XCallEvent {
        let mut event = XCallEvent::new(event_type, chain);
        let RawLog::Cosmos(log) = raw else {
            return event;
        };
        event.from = log.attribute("from").map(str::to_string);
        event.sn = decimal(log, event_type, "sn").ok();
        event.req_id = decimal(log, event_type, "reqId").ok();
        event
    }
}

fn attribute(key: &str, value: &str) -> EventAttribute {
    EventAttribute {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn decimal(event: &CosmosEvent, event_type: XCallEventType, key: &str) -> Result<U256> {
    let value = event
        .attribute(key)
        .ok_or_else(|| missing_field(event_type, key))?;
    U256::from_str_radix(value, 10)
        .map_err(|e| decode_error(event_type, format!("`{key}` = `{value}`: {e}")))
}

fn outcome(event: &CosmosEvent, event_type: XCallEventType) -> Result<ExecutionOutcome> {
    let value = event
        .attribute("code")
        .ok_or_else(|| missing_field(event_type, "code"))?;
    let code = value
        .parse::<i64>()
        .map_err(|e| decode_error(event_type, format!("`code` = `{value}`: {e}")))?;
    Ok(ExecutionOutcome::new(
        code,
        event.attribute("msg").unwrap_or_default(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_call_message_sent_from_tx_result_json() {
        let json = r#"{
            "type": "wasm-CallMessageSent",
            "attributes": [
                {"key": "_contract_address", "value": "archway17gq4lm4mww9yx8ykv2hpppkmrx2p8qwxtfdwyjetq3xzrkm8jq9qqvg3k9", "index": true},
                {"key": "from", "value": "archway1c3czcvdv9x5gfr4ypd8ghr9wlhkjhk6cqnkzgj", "index": true},
                {"key": "to", "value": "0x1.icon/hx0000000000000000000000000000000000000001", "index": true},
                {"key": "sn", "value": "1207", "index": true}
            ]
        }"#;
        let log: CosmosEvent = serde_json::from_str(json).unwrap();
        let event = CosmosCodec
            .decode(
                &RawLog::Cosmos(log),
                XCallEventType::CallMessageSent,
                ChainId::Archway,
            )
            .unwrap();
        assert_eq!(event.sn, Some(U256::from(1207)));
        assert_eq!(
            event.to.as_deref(),
            Some("0x1.icon/hx0000000000000000000000000000000000000001")
        );
    }

    #[test]
    fn test_signature_is_event_type_string() {
        insta::assert_snapshot!(
            CosmosCodec.signature_of(XCallEventType::RollbackMessage),
            @"wasm-RollbackMessage"
        );
    }

    #[test]
    fn test_decode_missing_req_id_is_error() {
        let raw = RawLog::Cosmos(CosmosEvent {
            kind: "wasm-CallMessage".to_string(),
            attributes: vec![attribute("sn", "5")],
        });
        let result = CosmosCodec.decode(&raw, XCallEventType::CallMessage, ChainId::Archway);
        assert!(matches!(
            result,
            Err(crate::XCallError::Decode { event: XCallEventType::CallMessage, .. })
        ));
    }

    #[test]
    fn test_salvage_keeps_readable_fields() {
        let raw = RawLog::Cosmos(CosmosEvent {
            kind: "wasm-CallMessage".to_string(),
            attributes: vec![
                attribute("from", "0x1.icon/cx21e94c08c03daee80c25d8ee3ea22a20786ec231"),
                attribute("sn", "5"),
                attribute("reqId", "not-a-number"),
            ],
        });
        let event = CosmosCodec.salvage(&raw, XCallEventType::CallMessage, ChainId::Archway);
        assert_eq!(event.sn, Some(U256::from(5)));
        assert_eq!(event.req_id, None);
        assert_eq!(
            event.from.as_deref(),
            Some("0x1.icon/cx21e94c08c03daee80c25d8ee3ea22a20786ec231")
        );
    }

    #[test]
    fn test_decode_rejects_hex_values() {
        let raw = RawLog::Cosmos(CosmosEvent {
            kind: "wasm-RollbackMessage".to_string(),
            attributes: vec![attribute("sn", "0x5")],
        });
        assert!(CosmosCodec
            .decode(&raw, XCallEventType::RollbackMessage, ChainId::Archway)
            .is_err());
    }

    #[test]
    fn test_contract_filter_uses_contract_address_attribute() {
        let event = XCallEvent::new(XCallEventType::RollbackMessage, ChainId::Archway)
            .with_sn(U256::from(3));
        let raw = CosmosCodec.encode(&event, "archway1xcall").unwrap();
        assert!(CosmosCodec.matches(&raw, XCallEventType::RollbackMessage, Some("archway1xcall")));
        assert!(!CosmosCodec.matches(&raw, XCallEventType::RollbackMessage, Some("archway1other")));
    }
}
