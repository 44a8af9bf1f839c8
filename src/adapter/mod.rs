//! Chain adapters
//!
//! A [`ChainAdapter`] wraps one chain's RPC client and hides the family's
//! block, transaction and submission shapes behind one capability set. The
//! relay holds exactly one adapter per chain in an [`AdapterRegistry`] and
//! shares it across every transfer touching that chain.
//!
//! # Height conventions
//!
//! Every adapter maps the scanner's logical height onto the chain's native
//! block numbering with [`ChainAdapter::native_height`]. ICON-family chains
//! read the block stored at `height - 1`; Cosmos and EVM chains use the
//! height unchanged.

mod cosmos;
mod evm;
mod icon;
mod retry;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Bytes, U256};
use async_trait::async_trait;
use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::chain::{network_address, ChainId};
use crate::error::{Result, XCallError};
use crate::event::{codec_for, EventCodec, RawLog};

pub use cosmos::CosmosAdapter;
pub use evm::EvmAdapter;
pub use icon::IconAdapter;
pub(crate) use retry::{undetermined, with_retry};

/// A block reduced to what the scanner needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Logical height the block was requested at
    pub height: u64,
    /// Height in the chain's own numbering
    pub native_height: u64,
    /// Transaction hashes in block order
    pub tx_hashes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Success,
    Failure,
}

/// A mined transaction's outcome and its log records in emission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResult {
    pub hash: String,
    pub status: TxStatus,
    pub logs: Vec<RawLog>,
    /// The chain-native receipt as returned by the RPC
    pub raw: serde_json::Value,
}

/// Result of looking a transaction up by hash
#[derive(Debug, Clone, PartialEq)]
pub enum TxLookup {
    Found(TxResult),
    /// Known to the node but not yet mined or indexed
    Pending,
    /// Unknown to the node, or the read stayed undetermined after retries
    NotFound,
}

/// A submitted transaction
///
/// Created when a submission returns. `hash` may be missing when the wallet
/// accepted the call without reporting one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub chain_id: ChainId,
    pub hash: Option<String>,
    pub status: TxStatus,
    pub raw_receipt: Option<serde_json::Value>,
}

impl Transaction {
    pub fn submitted(chain_id: ChainId, hash: Option<String>) -> Self {
        Self {
            chain_id,
            hash,
            status: TxStatus::Pending,
            raw_receipt: None,
        }
    }

    /// Records the mined result. A resolved transaction is never changed again.
    pub fn resolve(&mut self, result: &TxResult) {
        if self.status == TxStatus::Pending {
            self.status = result.status;
            self.raw_receipt = Some(result.raw.clone());
        }
    }
}

/// The asset being moved, which decides the submission method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferAsset {
    /// bnUSD, moved with the token's own `crossTransfer`
    BnUsd,
    /// Any other token, deposited with or withdrawn from the asset manager
    Token { address: String },
    /// The chain's native coin
    Native,
}

/// A user's request to move an asset to another chain
///
/// # Example
///
/// ```rust
/// use alloy_primitives::U256;
/// use xcall_relay::{ChainId, TransferAsset, TransferIntent};
///
/// let intent = TransferIntent::builder()
///     .source(ChainId::IconMainnet)
///     .destination(ChainId::Archway)
///     .asset(TransferAsset::BnUsd)
///     .amount(U256::from(1_000_000_000_000_000_000u128))
///     .recipient("archway1c3czcvdv9x5gfr4ypd8ghr9wlhkjhk6cqnkzgj".to_string())
///     .account("hx0000000000000000000000000000000000000001".to_string())
///     .fee(U256::from(10u64))
///     .build();
/// assert_eq!(
///     intent.destination_address(),
///     "archway-1/archway1c3czcvdv9x5gfr4ypd8ghr9wlhkjhk6cqnkzgj"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
pub struct TransferIntent {
    pub source: ChainId,
    pub destination: ChainId,
    pub asset: TransferAsset,
    pub amount: U256,
    /// Receiving account on the destination chain
    pub recipient: String,
    /// Sending account on the source chain
    pub account: String,
    /// Protocol fee attached to the call (the rollback-enabled quote)
    pub fee: U256,
    /// Withdraw ICON assets as their liquid-finance native form
    #[builder(default)]
    pub liquid_finance: bool,
}

impl TransferIntent {
    /// `"<destinationNetworkId>/<recipient>"` as passed to the contracts
    pub fn destination_address(&self) -> String {
        network_address(self.destination, &self.recipient)
    }
}

/// Native coin attached to a CosmWasm execute message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

/// Family-specific call data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum CallPayload {
    /// SCORE method call with named, hex-encoded parameters
    Icon {
        method: String,
        params: serde_json::Value,
    },
    /// CosmWasm execute message with attached funds
    Cosmos {
        msg: serde_json::Value,
        funds: Vec<Coin>,
    },
    /// ABI-encoded calldata
    Evm { input: Bytes },
}

/// A contract call handed to the [`crate::TransactionSigner`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractCall {
    pub chain: ChainId,
    /// Signing account
    pub from: String,
    pub contract: String,
    /// Native value attached to the call
    pub value: U256,
    pub payload: CallPayload,
}

/// Capability set implemented once per chain family.
///
/// Read operations retry transient RPC failures with a fixed budget. Once
/// the budget is spent, `fetch_block` and `fetch_transaction_result` report
/// "not found" instead of failing, and callers keep polling.
#[async_trait]
pub trait ChainAdapter: Send + Sync + fmt::Debug {
    fn chain_id(&self) -> ChainId;

    /// Address of the chain's xCall contract, used to filter event logs
    fn xcall_address(&self) -> &str;

    fn codec(&self) -> &'static dyn EventCodec {
        codec_for(self.chain_id().family())
    }

    /// Maps a logical scan height to the chain's native block number
    fn native_height(&self, height: u64) -> u64 {
        height
    }

    /// Latest block height.
    ///
    /// # Errors
    ///
    /// [`XCallError::RpcUnavailable`] once the retry budget is spent.
    async fn fetch_block_height(&self) -> Result<u64>;

    async fn fetch_block(&self, height: u64) -> Result<Option<Block>>;

    /// Safe to call before the transaction is mined.
    async fn fetch_transaction_result(&self, hash: &str) -> Result<TxLookup>;

    /// Protocol fee charged by this chain's xCall contract for a call to
    /// `destination`
    async fn fetch_xcall_fee(&self, destination: ChainId, rollback: bool) -> Result<U256>;

    /// Submits the cross-chain transfer. Not idempotent.
    async fn submit_transfer(&self, intent: &TransferIntent) -> Result<Transaction>;

    /// Grants `spender` an allowance of `amount` over `token`. Returns
    /// `None` when nothing needs to be sent.
    async fn approve(
        &self,
        token: &str,
        owner: &str,
        spender: &str,
        amount: U256,
    ) -> Result<Option<Transaction>>;

    /// Executes a ready rollback on this (source) chain's xCall contract
    async fn execute_rollback(&self, sn: U256, account: &str) -> Result<Transaction>;
}

/// One shared adapter per chain, looked up by [`ChainId`]
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ChainId, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter, replacing any previous one for the same chain
    pub fn with(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    pub fn insert(&mut self, adapter: Arc<dyn ChainAdapter>) {
        self.adapters.insert(adapter.chain_id(), adapter);
    }

    pub fn get(&self, chain: ChainId) -> Result<Arc<dyn ChainAdapter>> {
        self.adapters
            .get(&chain)
            .cloned()
            .ok_or_else(|| XCallError::ChainNotSupported {
                chain: chain.to_string(),
            })
    }

    pub fn chains(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.adapters.keys().copied()
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chains: Vec<_> = self.chains().collect();
        chains.sort();
        f.debug_struct("AdapterRegistry")
            .field("chains", &chains)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChainAdapter;

    #[test]
    fn test_registry_lookup() {
        let registry = AdapterRegistry::new()
            .with(Arc::new(FakeChainAdapter::new(ChainId::IconMainnet)))
            .with(Arc::new(FakeChainAdapter::new(ChainId::Archway)));

        assert_eq!(
            registry.get(ChainId::Archway).unwrap().chain_id(),
            ChainId::Archway
        );
        assert!(matches!(
            registry.get(ChainId::Avalanche),
            Err(XCallError::ChainNotSupported { chain }) if chain == "0xa86a.avax"
        ));
        insta::assert_snapshot!(
            format!("{registry:?}"),
            @"AdapterRegistry { chains: [IconMainnet, Archway] }"
        );
    }

    #[test]
    fn test_transaction_resolves_once() {
        let mut tx = Transaction::submitted(ChainId::Avalanche, Some("0xabc".to_string()));
        let mined = TxResult {
            hash: "0xabc".to_string(),
            status: TxStatus::Success,
            logs: vec![],
            raw: serde_json::json!({"status": "0x1"}),
        };
        tx.resolve(&mined);
        assert_eq!(tx.status, TxStatus::Success);

        let later = TxResult {
            status: TxStatus::Failure,
            ..mined
        };
        tx.resolve(&later);
        assert_eq!(tx.status, TxStatus::Success);
    }

    #[test]
    fn test_intent_serializes_asset_kind() {
        let json = serde_json::to_value(TransferAsset::Token {
            address: "archway1token".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"token": {"address": "archway1token"}}));
    }
}
