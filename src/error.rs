use thiserror::Error;

use crate::chain::ChainId;
use crate::event::XCallEventType;
use crate::registry::{TransferId, TransferStatus};

#[derive(Error, Debug)]
pub enum XCallError {
    #[error("Chain not supported: {chain}")]
    ChainNotSupported { chain: String },

    #[error("RPC unavailable on {chain}: {reason}")]
    RpcUnavailable { chain: ChainId, reason: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Malformed {event} log: {reason}")]
    Decode {
        event: XCallEventType,
        reason: String,
    },

    #[error("Submission failed on {chain}: {reason}")]
    SubmissionFailed { chain: ChainId, reason: String },

    #[error("Invalid transition for transfer {id}: {from} -> {to}")]
    InvalidTransition {
        id: TransferId,
        from: TransferStatus,
        to: TransferStatus,
    },

    #[error("Unknown transfer: {0}")]
    UnknownTransfer(TransferId),

    #[error("A rollback for transfer {id} is already in flight")]
    RollbackInFlight { id: TransferId },

    #[error("Transfer {id} is still {status}")]
    TransferActive { id: TransferId, status: TransferStatus },

    #[error("Scan cursor for transfer {id} on {chain} cannot move from {last} to {requested}")]
    InvalidCursor {
        id: TransferId,
        chain: ChainId,
        last: u64,
        requested: u64,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URL: {reason}")]
    InvalidUrl { reason: String },

    #[error("RPC error: {0}")]
    Rpc(#[from] alloy_json_rpc::RpcError<alloy_transport::TransportErrorKind>),

    #[error("Contract call failed: {0}")]
    ContractCall(#[from] alloy_contract::Error),

    #[error("ABI encoding/decoding error: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Hex conversion error: {0}")]
    Hex(#[from] alloy_primitives::hex::FromHexError),
}

impl XCallError {
    /// Returns true for failures that callers should treat as "try again on
    /// the next tick" rather than as a verdict on the transfer.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            XCallError::RpcUnavailable { .. } | XCallError::Network(_) | XCallError::Rpc(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, XCallError>;
