//! xCall protocol events and their per-family log codecs
//!
//! The xCall contract emits the same five protocol events on every chain, but
//! each chain family records them differently: ICON-style chains use event
//! logs with `indexed`/`data` string arrays, EVM chains use topic-indexed
//! ABI logs, and Cosmos-style chains use typed ABCI events with key/value
//! attributes. An [`EventCodec`] hides that difference behind pure functions.
//!
//! # Example
//!
//! ```rust
//! use xcall_relay::{codec_for, ChainFamily, XCallEventType};
//!
//! let codec = codec_for(ChainFamily::Icon);
//! assert_eq!(
//!     codec.signature_of(XCallEventType::CallMessageSent),
//!     "CallMessageSent(Address,str,int)"
//! );
//! ```

mod cosmos;
mod evm;
mod icon;

use std::fmt;

use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};

use crate::chain::{ChainFamily, ChainId};
use crate::error::{Result, XCallError};

pub use cosmos::{CosmosCodec, CosmosEvent, EventAttribute};
pub use evm::EvmCodec;
pub use icon::{IconCodec, IconEventLog};
pub(crate) use icon::format_hex_u256;

/// The protocol events tracked by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum XCallEventType {
    /// Emitted on the source chain when an outbound call is accepted
    CallMessageSent,
    /// Emitted on the destination chain when the call is registered
    CallMessage,
    /// Emitted on the destination chain once the call ran
    CallExecuted,
    /// Emitted on the source chain when the destination acknowledges
    ResponseMessage,
    /// Emitted on the source chain when a rollback may be executed
    RollbackMessage,
}

impl XCallEventType {
    pub const ALL: [XCallEventType; 5] = [
        XCallEventType::CallMessageSent,
        XCallEventType::CallMessage,
        XCallEventType::CallExecuted,
        XCallEventType::ResponseMessage,
        XCallEventType::RollbackMessage,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            XCallEventType::CallMessageSent => "CallMessageSent",
            XCallEventType::CallMessage => "CallMessage",
            XCallEventType::CallExecuted => "CallExecuted",
            XCallEventType::ResponseMessage => "ResponseMessage",
            XCallEventType::RollbackMessage => "RollbackMessage",
        }
    }
}

impl fmt::Display for XCallEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result code and message carried by `CallExecuted` and `ResponseMessage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub code: i64,
    pub message: String,
}

impl ExecutionOutcome {
    /// xCall result code for a successful execution
    pub const SUCCESS: i64 = 1;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Self::SUCCESS
    }

    /// A failed execution reverted on the destination when the contract
    /// reported a negative code or a revert message.
    pub fn has_revert_indicator(&self) -> bool {
        !self.is_success() && (self.code < 0 || !self.message.is_empty())
    }
}

/// A chain-native log record, kept verbatim for auditing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "log", rename_all = "lowercase")]
pub enum RawLog {
    Icon(IconEventLog),
    Cosmos(CosmosEvent),
    Evm(alloy_primitives::Log),
}

impl RawLog {
    pub fn family(&self) -> ChainFamily {
        match self {
            RawLog::Icon(_) => ChainFamily::Icon,
            RawLog::Cosmos(_) => ChainFamily::Cosmos,
            RawLog::Evm(_) => ChainFamily::Evm,
        }
    }
}

/// A decoded xCall protocol event
///
/// `sn` is only comparable between events of the same source chain; the
/// registry correlates across chains, never by comparing raw `sn` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XCallEvent {
    pub event_type: XCallEventType,
    /// Sequence number assigned by the source chain's xCall contract
    pub sn: Option<U256>,
    /// Request id assigned by the destination chain's xCall contract
    pub req_id: Option<U256>,
    /// The chain the event was observed on
    pub origin_chain: ChainId,
    /// Sender network address, when the chain records it in clear text
    pub from: Option<String>,
    /// keccak256 of the sender network address, when the chain only
    /// indexes its hash
    #[serde(default)]
    pub from_digest: Option<B256>,
    /// Target network address, when the chain records it in clear text
    pub to: Option<String>,
    pub outcome: Option<ExecutionOutcome>,
    /// The log this event was decoded from. Always present after decoding.
    pub raw: Option<RawLog>,
}

impl XCallEvent {
    pub fn new(event_type: XCallEventType, origin_chain: ChainId) -> Self {
        Self {
            event_type,
            sn: None,
            req_id: None,
            origin_chain,
            from: None,
            from_digest: None,
            to: None,
            outcome: None,
            raw: None,
        }
    }

    pub fn with_sn(mut self, sn: U256) -> Self {
        self.sn = Some(sn);
        self
    }

    pub fn with_req_id(mut self, req_id: U256) -> Self {
        self.req_id = Some(req_id);
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_from_digest(mut self, digest: B256) -> Self {
        self.from_digest = Some(digest);
        self
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn with_outcome(mut self, outcome: ExecutionOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Compares everything except the retained raw log
    pub fn same_payload(&self, other: &XCallEvent) -> bool {
        self.event_type == other.event_type
            && self.sn == other.sn
            && self.req_id == other.req_id
            && self.origin_chain == other.origin_chain
            && self.outcome == other.outcome
    }
}

/// Per-family encoding and decoding of xCall events
///
/// All methods are pure. A log set without a matching record is a normal
/// outcome (`None`); a matching record missing required fields is a
/// [`XCallError::Decode`] error, never a defaulted event.
pub trait EventCodec: Send + Sync + fmt::Debug {
    fn family(&self) -> ChainFamily;

    /// Chain-native signature (ICON/EVM) or event type string (Cosmos)
    fn signature_of(&self, event_type: XCallEventType) -> &'static str;

    /// Returns true when `log` is a record of `event_type`, optionally
    /// emitted by `contract`
    fn matches(&self, log: &RawLog, event_type: XCallEventType, contract: Option<&str>) -> bool;

    fn find_event<'a>(
        &self,
        logs: &'a [RawLog],
        event_type: XCallEventType,
        contract: Option<&str>,
    ) -> Option<&'a RawLog> {
        logs.iter()
            .find(|log| self.matches(log, event_type, contract))
    }

    fn decode(&self, log: &RawLog, event_type: XCallEventType, chain: ChainId)
        -> Result<XCallEvent>;

    /// Renders `event` as it would be emitted by `contract`
    fn encode(&self, event: &XCallEvent, contract: &str) -> Result<RawLog>;

    /// Reads whatever correlation fields (`from`, `sn`, `reqId`) a record
    /// carries without requiring the rest, so that a record failing
    /// [`EventCodec::decode`] can still be attributed to its transfer.
    fn salvage(&self, log: &RawLog, event_type: XCallEventType, chain: ChainId) -> XCallEvent;
}

/// Returns the codec for a chain family
pub fn codec_for(family: ChainFamily) -> &'static dyn EventCodec {
    match family {
        ChainFamily::Icon => &IconCodec,
        ChainFamily::Cosmos => &CosmosCodec,
        ChainFamily::Evm => &EvmCodec,
    }
}

/// One record of a requested type found in a log set
#[derive(Debug)]
pub struct ExtractedEvent<'a> {
    pub log: &'a RawLog,
    pub event_type: XCallEventType,
    pub decoded: Result<XCallEvent>,
}

/// Decodes every record of the requested types found in `logs`, in log order
///
/// Malformed records are returned as errors alongside the valid events so the
/// caller can flag them instead of silently dropping them.
pub fn extract_events<'a>(
    codec: &dyn EventCodec,
    logs: &'a [RawLog],
    event_types: &[XCallEventType],
    contract: Option<&str>,
    chain: ChainId,
) -> Vec<ExtractedEvent<'a>> {
    logs.iter()
        .flat_map(|log| {
            event_types
                .iter()
                .copied()
                .filter(|event_type| codec.matches(log, *event_type, contract))
                .map(|event_type| ExtractedEvent {
                    log,
                    event_type,
                    decoded: codec.decode(log, event_type, chain),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

pub(crate) fn decode_error(event: XCallEventType, reason: impl Into<String>) -> XCallError {
    XCallError::Decode {
        event,
        reason: reason.into(),
    }
}

pub(crate) fn missing_field(event: XCallEventType, field: &str) -> XCallError {
    decode_error(event, format!("missing field `{field}`"))
}

pub(crate) fn require_sn(event: &XCallEvent) -> Result<U256> {
    event.sn.ok_or_else(|| missing_field(event.event_type, "sn"))
}

pub(crate) fn require_req_id(event: &XCallEvent) -> Result<U256> {
    event
        .req_id
        .ok_or_else(|| missing_field(event.event_type, "reqId"))
}

pub(crate) fn require_outcome(event: &XCallEvent) -> Result<&ExecutionOutcome> {
    event
        .outcome
        .as_ref()
        .ok_or_else(|| missing_field(event.event_type, "code"))
}
