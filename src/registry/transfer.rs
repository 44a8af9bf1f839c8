//! Transfer records and their state machine

use std::collections::BTreeMap;
use std::fmt;

use alloy_primitives::{keccak256, B256, U256};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapter::{Transaction, TransferIntent};
use crate::chain::{network_address, ChainId, NetworkAddress};
use crate::event::{XCallEvent, XCallEventType};

/// Locally generated transfer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId(Uuid);

impl TransferId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a cross-chain transfer
///
/// ```text
/// CREATED -> SOURCE_TX_PENDING -> SOURCE_TX_CONFIRMED -> AWAITING_CALL_MESSAGE
///         -> CALL_MESSAGE_RECEIVED -> CALL_EXECUTED
///
/// SOURCE_TX_PENDING -> SOURCE_TX_FAILED
/// CALL_MESSAGE_RECEIVED -> EXECUTION_FAILED -> ROLLBACK_REQUIRED
///         -> ROLLBACK_READY -> ROLLBACK_EXECUTED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Created,
    SourceTxPending,
    SourceTxConfirmed,
    SourceTxFailed,
    AwaitingCallMessage,
    CallMessageReceived,
    CallExecuted,
    ExecutionFailed,
    RollbackRequired,
    RollbackReady,
    RollbackExecuted,
}

impl TransferStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Created => "CREATED",
            TransferStatus::SourceTxPending => "SOURCE_TX_PENDING",
            TransferStatus::SourceTxConfirmed => "SOURCE_TX_CONFIRMED",
            TransferStatus::SourceTxFailed => "SOURCE_TX_FAILED",
            TransferStatus::AwaitingCallMessage => "AWAITING_CALL_MESSAGE",
            TransferStatus::CallMessageReceived => "CALL_MESSAGE_RECEIVED",
            TransferStatus::CallExecuted => "CALL_EXECUTED",
            TransferStatus::ExecutionFailed => "EXECUTION_FAILED",
            TransferStatus::RollbackRequired => "ROLLBACK_REQUIRED",
            TransferStatus::RollbackReady => "ROLLBACK_READY",
            TransferStatus::RollbackExecuted => "ROLLBACK_EXECUTED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::CallExecuted
                | TransferStatus::SourceTxFailed
                | TransferStatus::RollbackExecuted
        )
    }

    /// States the scanner can still move forward by watching a chain
    pub const fn awaits_chain(self) -> bool {
        matches!(
            self,
            TransferStatus::SourceTxPending
                | TransferStatus::AwaitingCallMessage
                | TransferStatus::CallMessageReceived
                | TransferStatus::RollbackRequired
        )
    }

    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Created, SourceTxPending)
                | (SourceTxPending, SourceTxConfirmed)
                | (SourceTxPending, SourceTxFailed)
                | (SourceTxConfirmed, AwaitingCallMessage)
                | (AwaitingCallMessage, CallMessageReceived)
                | (CallMessageReceived, CallExecuted)
                | (CallMessageReceived, ExecutionFailed)
                | (ExecutionFailed, RollbackRequired)
                | (RollbackRequired, RollbackReady)
                | (RollbackReady, RollbackExecuted)
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reportable protocol anomalies that need manual attention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// The source transaction succeeded without emitting `CallMessageSent`
    MissingCallMessageSent { tx_hash: Option<String> },
    /// A matching log failed to decode
    MalformedEvent {
        event: XCallEventType,
        chain: ChainId,
        reason: String,
    },
    /// A second event of an already recorded type carried different fields
    ConflictingEvent { event: XCallEventType },
}

/// Coarse status for consumers that only render progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    Pending,
    AwaitingConfirmation,
    Failed,
    NeedsRollback,
    Complete,
    Anomalous,
}

/// The registry's unit of record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transfer {
    pub id: TransferId,
    pub intent: TransferIntent,
    pub status: TransferStatus,
    pub source_transaction: Option<Transaction>,
    pub rollback_transaction: Option<Transaction>,
    pub events: BTreeMap<XCallEventType, XCallEvent>,
    /// First height to scan per chain, read before submission
    pub start_heights: BTreeMap<ChainId, u64>,
    /// Last fully scanned height per chain
    pub cursors: BTreeMap<ChainId, u64>,
    pub anomalies: Vec<Anomaly>,
    /// Set while a rollback transaction is being submitted or awaited
    pub rollback_in_flight: bool,
    /// Events seen before the state they depend on was reached
    #[serde(skip)]
    pub(crate) deferred: Vec<XCallEvent>,
}

impl Transfer {
    pub(crate) fn new(intent: TransferIntent) -> Self {
        Self {
            id: TransferId::new(),
            intent,
            status: TransferStatus::Created,
            source_transaction: None,
            rollback_transaction: None,
            events: BTreeMap::new(),
            start_heights: BTreeMap::new(),
            cursors: BTreeMap::new(),
            anomalies: Vec::new(),
            rollback_in_flight: false,
            deferred: Vec::new(),
        }
    }

    pub fn source(&self) -> ChainId {
        self.intent.source
    }

    pub fn destination(&self) -> ChainId {
        self.intent.destination
    }

    pub fn source_hash(&self) -> Option<&str> {
        self.source_transaction
            .as_ref()
            .and_then(|tx| tx.hash.as_deref())
    }

    /// Sequence number from the recorded `CallMessageSent`
    pub fn sn(&self) -> Option<U256> {
        self.events
            .get(&XCallEventType::CallMessageSent)
            .and_then(|event| event.sn)
    }

    /// Request id from the recorded destination `CallMessage`
    pub fn req_id(&self) -> Option<U256> {
        self.events
            .get(&XCallEventType::CallMessage)
            .and_then(|event| event.req_id)
    }

    /// keccak256 of the sender's network address, the form EVM destinations
    /// index `CallMessage._from` by. Both the recorded spelling and its
    /// lower-case form are returned since EVM sources render addresses
    /// either way.
    pub fn sender_digests(&self) -> Vec<B256> {
        let Some(from) = self
            .event(XCallEventType::CallMessageSent)
            .and_then(|event| event.from.as_deref())
        else {
            return Vec::new();
        };
        let address = if from.parse::<NetworkAddress>().is_ok() {
            from.to_string()
        } else {
            network_address(self.source(), from)
        };
        let lower = address.to_lowercase();
        let mut digests = vec![keccak256(address.as_bytes())];
        if lower != address {
            digests.push(keccak256(lower.as_bytes()));
        }
        digests
    }

    pub fn event(&self, event_type: XCallEventType) -> Option<&XCallEvent> {
        self.events.get(&event_type)
    }

    pub fn cursor(&self, chain: ChainId) -> Option<u64> {
        self.cursors.get(&chain).copied()
    }

    /// Next height to scan on `chain`, if a starting point is known
    pub fn next_height(&self, chain: ChainId) -> Option<u64> {
        self.cursor(chain)
            .map(|last| last + 1)
            .or_else(|| self.start_heights.get(&chain).copied())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn phase(&self) -> TransferPhase {
        if !self.anomalies.is_empty() && !self.is_terminal() {
            return TransferPhase::Anomalous;
        }
        match self.status {
            TransferStatus::Created | TransferStatus::SourceTxPending => TransferPhase::Pending,
            TransferStatus::SourceTxConfirmed
            | TransferStatus::AwaitingCallMessage
            | TransferStatus::CallMessageReceived => TransferPhase::AwaitingConfirmation,
            TransferStatus::SourceTxFailed | TransferStatus::ExecutionFailed => {
                TransferPhase::Failed
            }
            TransferStatus::RollbackRequired | TransferStatus::RollbackReady => {
                TransferPhase::NeedsRollback
            }
            TransferStatus::CallExecuted | TransferStatus::RollbackExecuted => {
                TransferPhase::Complete
            }
        }
    }
}
