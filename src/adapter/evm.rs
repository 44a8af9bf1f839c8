// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0
//! EVM-family adapter over an alloy [`Provider`].
//!
//! Block heights are used unchanged. Receipts are read with
//! `eth_getTransactionReceipt`; a missing receipt for a transaction the node
//! knows about is reported as pending.

use std::fmt;
use std::sync::Arc;

use alloy_network::{BlockResponse, Ethereum, ReceiptResponse};
use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_provider::Provider;
use alloy_rpc_types::{BlockNumberOrTag, Log, ReceiptEnvelope, TransactionReceipt};
use alloy_transport::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use tracing::{debug, info, instrument, trace};

use super::{
    undetermined, with_retry, Block, CallPayload, ChainAdapter, ContractCall, Transaction,
    TransferAsset, TransferIntent, TxLookup, TxResult, TxStatus,
};
use crate::chain::ChainId;
use crate::config::{ChainConfig, RetryPolicy};
use crate::contracts::{
    approve_calldata, execute_rollback_calldata, AssetManagerCalls, BnUsdCalls, Erc20Contract,
    XCallContract,
};
use crate::error::{Result, XCallError};
use crate::event::RawLog;
use crate::providers::TokioClock;
use crate::traits::{Clock, TransactionSigner};

/// Adapter for EVM chains (Avalanche and Fuji)
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use alloy_provider::ProviderBuilder;
/// use xcall_relay::{ChainConfig, ChainId, EvmAdapter, TransactionSigner};
///
/// # async fn example(signer: Arc<dyn TransactionSigner>) -> Result<(), Box<dyn std::error::Error>> {
/// let config = ChainConfig::from_env(ChainId::Avalanche)?;
/// let provider = ProviderBuilder::new().connect(config.rpc_url.as_str()).await?;
/// let adapter = EvmAdapter::new(config, provider, signer);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EvmAdapter<P: Provider<Ethereum> + Clone> {
    config: ChainConfig,
    provider: P,
    signer: Arc<dyn TransactionSigner>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl<P: Provider<Ethereum> + Clone> fmt::Debug for EvmAdapter<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmAdapter")
            .field("chain", &self.config.chain)
            .field("rpc_url", &self.config.rpc_url.as_str())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl<P: Provider<Ethereum> + Clone> EvmAdapter<P> {
    pub fn new(config: ChainConfig, provider: P, signer: Arc<dyn TransactionSigner>) -> Self {
        Self {
            config,
            provider,
            signer,
            clock: Arc::new(TokioClock::new()),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns a reference to the underlying alloy provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn unavailable(&self, reason: impl fmt::Display) -> XCallError {
        XCallError::RpcUnavailable {
            chain: self.config.chain,
            reason: reason.to_string(),
        }
    }

    fn transport(&self, error: RpcError<TransportErrorKind>) -> XCallError {
        self.unavailable(error)
    }

    fn contract_error(&self, error: alloy_contract::Error) -> XCallError {
        match error {
            alloy_contract::Error::TransportError(e) => self.transport(e),
            other => XCallError::ContractCall(other),
        }
    }

    fn address(&self, value: &str, what: &str) -> Result<Address> {
        value.parse().map_err(|e| XCallError::SubmissionFailed {
            chain: self.config.chain,
            reason: format!("{what} `{value}` is not an EVM address: {e}"),
        })
    }

    async fn submit(
        &self,
        account: &str,
        contract: &str,
        value: U256,
        input: Bytes,
    ) -> Result<Transaction> {
        let call = ContractCall {
            chain: self.config.chain,
            from: account.to_string(),
            contract: contract.to_string(),
            value,
            payload: CallPayload::Evm { input },
        };
        let hash = self.signer.sign_and_send(call).await?;
        info!(
            chain = %self.config.chain,
            contract,
            value = %value,
            tx_hash = hash.as_deref().unwrap_or("<none>"),
            event = "evm_call_submitted"
        );
        Ok(Transaction::submitted(self.config.chain, hash))
    }

    async fn receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>> {
        self.provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| self.transport(e))
    }

    async fn is_known(&self, hash: TxHash) -> Result<bool> {
        self.provider
            .get_transaction_by_hash(hash)
            .await
            .map(|tx| tx.is_some())
            .map_err(|e| self.transport(e))
    }
}

fn receipt_logs(receipt: &TransactionReceipt) -> &[Log] {
    match &receipt.inner {
        ReceiptEnvelope::Eip1559(r) => &r.receipt.logs,
        ReceiptEnvelope::Eip2930(r) => &r.receipt.logs,
        ReceiptEnvelope::Legacy(r) => &r.receipt.logs,
        ReceiptEnvelope::Eip4844(r) => &r.receipt.logs,
        ReceiptEnvelope::Eip7702(r) => &r.receipt.logs,
    }
}

fn into_tx_result(receipt: &TransactionReceipt) -> Result<TxResult> {
    let status = if receipt.status() {
        TxStatus::Success
    } else {
        TxStatus::Failure
    };
    Ok(TxResult {
        hash: receipt.transaction_hash.to_string(),
        status,
        logs: receipt_logs(receipt)
            .iter()
            .map(|log| RawLog::Evm(log.inner.clone()))
            .collect(),
        raw: serde_json::to_value(receipt)?,
    })
}

#[async_trait]
impl<P> ChainAdapter for EvmAdapter<P>
where
    P: Provider<Ethereum> + Clone + 'static,
{
    fn chain_id(&self) -> ChainId {
        self.config.chain
    }

    fn xcall_address(&self) -> &str {
        &self.config.xcall
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn fetch_block_height(&self) -> Result<u64> {
        let height = with_retry(
            self.clock.as_ref(),
            self.retry,
            self.config.chain,
            "eth_blockNumber",
            move || async move {
                self.provider
                    .get_block_number()
                    .await
                    .map_err(|e| self.transport(e))
            },
        )
        .await?;
        debug!(height, event = "evm_block_height_fetched");
        Ok(height)
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn fetch_block(&self, height: u64) -> Result<Option<Block>> {
        let result = with_retry(
            self.clock.as_ref(),
            self.retry,
            self.config.chain,
            "eth_getBlockByNumber",
            move || async move {
                self.provider
                    .get_block_by_number(BlockNumberOrTag::Number(height))
                    .await
                    .map_err(|e| self.transport(e))
            },
        )
        .await;

        let Some(block) = undetermined(result, None, self.config.chain, "eth_getBlockByNumber")?
        else {
            trace!(height, "Block not yet available");
            return Ok(None);
        };

        Ok(Some(Block {
            height,
            native_height: self.native_height(height),
            tx_hashes: block
                .transactions()
                .hashes()
                .map(|hash| hash.to_string())
                .collect(),
        }))
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn fetch_transaction_result(&self, hash: &str) -> Result<TxLookup> {
        let tx_hash: TxHash = hash.parse()?;
        let result = with_retry(
            self.clock.as_ref(),
            self.retry,
            self.config.chain,
            "eth_getTransactionReceipt",
            move || async move {
                match self.receipt(tx_hash).await? {
                    Some(receipt) => Ok(TxLookup::Found(into_tx_result(&receipt)?)),
                    None if self.is_known(tx_hash).await? => Ok(TxLookup::Pending),
                    None => Ok(TxLookup::NotFound),
                }
            },
        )
        .await;
        undetermined(
            result,
            TxLookup::NotFound,
            self.config.chain,
            "eth_getTransactionReceipt",
        )
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn fetch_xcall_fee(&self, destination: ChainId, rollback: bool) -> Result<U256> {
        let xcall = XCallContract::new(
            self.address(&self.config.xcall, "xCall contract")?,
            self.provider.clone(),
        );
        let xcall = &xcall;
        with_retry(
            self.clock.as_ref(),
            self.retry,
            self.config.chain,
            "getFee",
            move || async move {
                xcall
                    .fee(destination.network_id(), rollback)
                    .await
                    .map_err(|e| self.contract_error(e))
            },
        )
        .await
    }

    #[instrument(skip(self, intent), fields(chain = %self.config.chain, destination = %intent.destination))]
    async fn submit_transfer(&self, intent: &TransferIntent) -> Result<Transaction> {
        let destination = intent.destination_address();
        let (contract, value, input) = match &intent.asset {
            TransferAsset::BnUsd => (
                self.config.bnusd.clone(),
                intent.fee,
                BnUsdCalls::cross_transfer(&destination, intent.amount),
            ),
            TransferAsset::Token { address } => (
                self.config.asset_manager.clone(),
                intent.fee,
                AssetManagerCalls::deposit(
                    self.address(address, "token")?,
                    intent.amount,
                    &destination,
                ),
            ),
            TransferAsset::Native => (
                self.config.asset_manager.clone(),
                intent.fee.saturating_add(intent.amount),
                AssetManagerCalls::deposit_native(intent.amount, &destination),
            ),
        };
        self.submit(&intent.account, &contract, value, input).await
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn approve(
        &self,
        token: &str,
        owner: &str,
        spender: &str,
        amount: U256,
    ) -> Result<Option<Transaction>> {
        let erc20 = Erc20Contract::new(self.address(token, "token")?, self.provider.clone());
        let owner_address = self.address(owner, "owner")?;
        let spender_address = self.address(spender, "spender")?;

        let erc20 = &erc20;
        let allowance = with_retry(
            self.clock.as_ref(),
            self.retry,
            self.config.chain,
            "allowance",
            move || async move {
                erc20
                    .allowance(owner_address, spender_address)
                    .await
                    .map_err(|e| self.contract_error(e))
            },
        )
        .await?;

        if allowance >= amount {
            debug!(
                token,
                allowance = %allowance,
                amount = %amount,
                event = "evm_allowance_sufficient"
            );
            return Ok(None);
        }

        let input = approve_calldata(spender_address, amount);
        self.submit(owner, token, U256::ZERO, input).await.map(Some)
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn execute_rollback(&self, sn: U256, account: &str) -> Result<Transaction> {
        let input = execute_rollback_calldata(sn);
        self.submit(account, &self.config.xcall, U256::ZERO, input)
            .await
    }
}
