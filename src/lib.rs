//! # xcall-relay
//!
//! A Rust client for the xCall cross-chain messaging protocol.
//!
//! This library submits cross-chain transfers on a source chain, follows the
//! protocol's events across ICON, Cosmos (CosmWasm) and EVM chains, and drives
//! the rollback path when execution fails on the destination.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use alloy_primitives::U256;
//! use tokio_util::sync::CancellationToken;
//! use xcall_relay::{
//!     AdapterRegistry, ChainConfig, ChainId, CosmosAdapter, IconAdapter, TransactionSigner,
//!     TransferAsset, TransferIntent, TransferStatus, XCallError, XCallRelayer,
//! };
//!
//! # async fn example(signer: Arc<dyn TransactionSigner>) -> Result<(), XCallError> {
//! let icon = IconAdapter::new(ChainConfig::from_env(ChainId::IconMainnet)?, signer.clone());
//! let archway = CosmosAdapter::new(ChainConfig::from_env(ChainId::Archway)?, signer);
//!
//! let relayer = XCallRelayer::builder()
//!     .adapters(
//!         AdapterRegistry::new()
//!             .with(Arc::new(icon))
//!             .with(Arc::new(archway)),
//!     )
//!     .build();
//!
//! let fee = relayer
//!     .quote_fee(ChainId::IconMainnet, ChainId::Archway, true)
//!     .await?;
//! let transfer = relayer
//!     .submit_transfer(
//!         TransferIntent::builder()
//!             .source(ChainId::IconMainnet)
//!             .destination(ChainId::Archway)
//!             .asset(TransferAsset::BnUsd)
//!             .amount(U256::from(10u64).pow(U256::from(18u64)))
//!             .recipient("archway1c3czcvdv9x5gfr4ypd8ghr9wlhkjhk6cqnkzgj".to_string())
//!             .account("hx0000000000000000000000000000000000000001".to_string())
//!             .fee(fee)
//!             .build(),
//!     )
//!     .await?;
//!
//! match relayer.track(transfer.id, CancellationToken::new()).await? {
//!     TransferStatus::CallExecuted => println!("delivered"),
//!     TransferStatus::RollbackReady => {
//!         relayer
//!             .execute_rollback(transfer.id, "hx0000000000000000000000000000000000000001")
//!             .await?;
//!     }
//!     status => println!("stopped at {status}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **One adapter per chain family** behind the [`ChainAdapter`] trait
//! - **Pure event codecs** for ICON event logs, EVM topics and Cosmos
//!   attributes
//! - **Single-writer transfer registry** with an explicit state machine and
//!   correlation indexes
//! - **Gap-free block scanning** that survives RPC outages
//! - **Deterministic tests** through injected clocks, signers and fake chains
//!
//! ## Public API
//!
//! - [`XCallRelayer`] - Orchestrates submission, tracking and rollback
//! - [`ChainAdapter`], [`IconAdapter`], [`CosmosAdapter`], [`EvmAdapter`] and
//!   [`AdapterRegistry`] - Chain access
//! - [`EventCodec`], [`IconCodec`], [`CosmosCodec`], [`EvmCodec`] - Event
//!   decoding and encoding
//! - [`TransferRegistry`] and [`RegistryHandle`] - Transfer records
//! - [`EventScanner`] - Chain polling
//! - [`FeeOracle`] and [`FeeQuote`] - Protocol fees
//! - [`XCallError`] and [`Result`] - Error types for error handling

mod adapter;
mod chain;
mod config;
mod error;
mod event;
mod fee;
mod registry;
mod relayer;
mod scanner;

// Contract bindings for direct EVM access
pub mod contracts;
pub mod providers;
pub mod traits;

// Public module for advanced users who need custom instrumentation
pub mod spans;

// Fakes for downstream tests
pub mod testing;

pub use adapter::{
    AdapterRegistry, Block, CallPayload, ChainAdapter, Coin, ContractCall, CosmosAdapter,
    EvmAdapter, IconAdapter, Transaction, TransferAsset, TransferIntent, TxLookup, TxResult,
    TxStatus,
};
pub use chain::{network_address, ChainFamily, ChainId, NetworkAddress, NATIVE_ADDRESS};
pub use config::{ChainConfig, PollingConfig, RetryPolicy};
pub use error::{Result, XCallError};
pub use event::{
    codec_for, extract_events, CosmosCodec, CosmosEvent, EventAttribute, EventCodec, EvmCodec,
    ExecutionOutcome, ExtractedEvent, IconCodec, IconEventLog, RawLog, XCallEvent, XCallEventType,
};
pub use fee::{FeeOracle, FeeQuote};
pub use providers::TokioClock;
pub use registry::{
    Anomaly, RecordOutcome, RegistryHandle, Transfer, TransferId, TransferPhase, TransferRegistry,
    TransferStatus, TransferUpdate,
};
pub use relayer::XCallRelayer;
pub use scanner::EventScanner;
pub use traits::{Clock, TransactionSigner};
