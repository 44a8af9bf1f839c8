//! ICON-family adapter over the `/api/v3` JSON-RPC endpoint.
//!
//! Height convention: `fetch_block(H)` returns the block stored at native
//! height `H - 1` (`icx_getBlockByHeight` is called with the decremented
//! height).

use std::fmt;
use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, trace};

use super::{
    undetermined, with_retry, Block, CallPayload, ChainAdapter, ContractCall, Transaction,
    TransferAsset, TransferIntent, TxLookup, TxResult, TxStatus,
};
use crate::chain::ChainId;
use crate::config::{ChainConfig, RetryPolicy};
use crate::error::{Result, XCallError};
use crate::event::{format_hex_u256, IconEventLog, RawLog};
use crate::providers::TokioClock;
use crate::traits::{Clock, TransactionSigner};

/// `icx_getTransactionResult`: transaction is in the pool
const ERROR_PENDING: i64 = -31002;
/// `icx_getTransactionResult`: transaction is being executed
const ERROR_EXECUTING: i64 = -31003;
/// Unknown transaction or block
const ERROR_NOT_FOUND: i64 = -31004;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct IconBlock {
    height: u64,
    #[serde(default)]
    confirmed_transaction_list: Vec<IconBlockTransaction>,
}

#[derive(Debug, Deserialize)]
struct IconBlockTransaction {
    #[serde(rename = "txHash", alias = "tx_hash")]
    tx_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IconTxResult {
    tx_hash: String,
    status: String,
    #[serde(default)]
    event_logs: Vec<IconEventLog>,
}

/// Adapter for ICON mainnet and Lisbon
#[derive(Clone)]
pub struct IconAdapter {
    config: ChainConfig,
    client: Client,
    signer: Arc<dyn TransactionSigner>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl fmt::Debug for IconAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IconAdapter")
            .field("chain", &self.config.chain)
            .field("rpc_url", &self.config.rpc_url.as_str())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl IconAdapter {
    pub fn new(config: ChainConfig, signer: Arc<dyn TransactionSigner>) -> Self {
        Self {
            config,
            client: Client::new(),
            signer,
            clock: Arc::new(TokioClock::new()),
            retry: RetryPolicy::default(),
        }
    }

    /// Shares an existing HTTP client (one per process is enough)
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn unavailable(&self, reason: impl fmt::Display) -> XCallError {
        XCallError::RpcUnavailable {
            chain: self.config.chain,
            reason: reason.to_string(),
        }
    }

    /// Sends one JSON-RPC request. Transport failures are errors; a
    /// JSON-RPC error object is returned as the inner `Err`.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<std::result::Result<T, RpcErrorObject>> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        trace!(method, "Sending ICON JSON-RPC request");

        let response = self
            .client
            .post(self.config.rpc_url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;
        let body: RpcResponse<T> = response.json().await.map_err(|e| self.unavailable(e))?;

        match (body.result, body.error) {
            (_, Some(error)) => Ok(Err(error)),
            (Some(result), None) => Ok(Ok(result)),
            (None, None) => Err(self.unavailable(format!("{method}: empty response"))),
        }
    }

    async fn call_result<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        self.call(method, params).await?.map_err(|error| {
            self.unavailable(format!("{method}: {} ({})", error.message, error.code))
        })
    }

    async fn submit(
        &self,
        account: &str,
        contract: &str,
        value: U256,
        method: &str,
        params: Value,
    ) -> Result<Transaction> {
        let call = ContractCall {
            chain: self.config.chain,
            from: account.to_string(),
            contract: contract.to_string(),
            value,
            payload: CallPayload::Icon {
                method: method.to_string(),
                params,
            },
        };
        let hash = self.signer.sign_and_send(call).await?;
        info!(
            chain = %self.config.chain,
            contract,
            method,
            tx_hash = hash.as_deref().unwrap_or("<none>"),
            event = "icon_call_submitted"
        );
        Ok(Transaction::submitted(self.config.chain, hash))
    }
}

/// Builds the SCORE call for a transfer intent
fn transfer_call(
    config: &ChainConfig,
    intent: &TransferIntent,
) -> Result<(String, &'static str, Value)> {
    let destination = intent.destination_address();
    let amount = format_hex_u256(intent.amount);
    match &intent.asset {
        TransferAsset::BnUsd => Ok((
            config.bnusd.clone(),
            "crossTransfer",
            json!({ "_to": destination, "_value": amount, "_data": "0x" }),
        )),
        TransferAsset::Token { address } => {
            let method = if intent.liquid_finance {
                "withdrawNativeTo"
            } else {
                "withdrawTo"
            };
            Ok((
                config.asset_manager.clone(),
                method,
                json!({ "asset": address, "to": destination, "amount": amount }),
            ))
        }
        TransferAsset::Native => Err(XCallError::SubmissionFailed {
            chain: config.chain,
            reason: "native ICX cannot be bridged through the asset manager".to_string(),
        }),
    }
}

fn tx_status(status: &str) -> TxStatus {
    if status == "0x1" {
        TxStatus::Success
    } else {
        TxStatus::Failure
    }
}

fn parse_hex(chain: ChainId, value: &str) -> Result<U256> {
    value
        .strip_prefix("0x")
        .and_then(|digits| U256::from_str_radix(digits, 16).ok())
        .ok_or_else(|| XCallError::RpcUnavailable {
            chain,
            reason: format!("`{value}` is not a hex integer"),
        })
}

fn into_tx_result(raw: Value) -> Result<TxResult> {
    let parsed: IconTxResult = serde_json::from_value(raw.clone())?;
    Ok(TxResult {
        hash: parsed.tx_hash,
        status: tx_status(&parsed.status),
        logs: parsed.event_logs.into_iter().map(RawLog::Icon).collect(),
        raw,
    })
}

#[async_trait]
impl ChainAdapter for IconAdapter {
    fn chain_id(&self) -> ChainId {
        self.config.chain
    }

    fn xcall_address(&self) -> &str {
        &self.config.xcall
    }

    fn native_height(&self, height: u64) -> u64 {
        height.saturating_sub(1)
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn fetch_block_height(&self) -> Result<u64> {
        let block: IconBlock = with_retry(
            self.clock.as_ref(),
            self.retry,
            self.config.chain,
            "icx_getLastBlock",
            || self.call_result("icx_getLastBlock", Value::Null),
        )
        .await?;
        debug!(height = block.height, event = "icon_block_height_fetched");
        Ok(block.height)
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn fetch_block(&self, height: u64) -> Result<Option<Block>> {
        let native_height = self.native_height(height);
        let params = json!({ "height": format!("0x{native_height:x}") });
        let result = with_retry(
            self.clock.as_ref(),
            self.retry,
            self.config.chain,
            "icx_getBlockByHeight",
            || self.call::<IconBlock>("icx_getBlockByHeight", params.clone()),
        )
        .await;

        let outcome = undetermined(
            result.map(Some),
            None,
            self.config.chain,
            "icx_getBlockByHeight",
        )?;
        let block = match outcome {
            Some(Ok(block)) => block,
            Some(Err(error)) if error.code == ERROR_NOT_FOUND => return Ok(None),
            Some(Err(error)) => {
                return Err(self.unavailable(format!(
                    "icx_getBlockByHeight: {} ({})",
                    error.message, error.code
                )))
            }
            None => return Ok(None),
        };

        Ok(Some(Block {
            height,
            native_height: block.height,
            tx_hashes: block
                .confirmed_transaction_list
                .into_iter()
                .filter_map(|tx| tx.tx_hash)
                .map(|hash| {
                    if hash.starts_with("0x") {
                        hash
                    } else {
                        format!("0x{hash}")
                    }
                })
                .collect(),
        }))
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn fetch_transaction_result(&self, hash: &str) -> Result<TxLookup> {
        let params = json!({ "txHash": hash });
        let result = with_retry(
            self.clock.as_ref(),
            self.retry,
            self.config.chain,
            "icx_getTransactionResult",
            || self.call::<Value>("icx_getTransactionResult", params.clone()),
        )
        .await;

        let outcome = undetermined(
            result.map(Some),
            None,
            self.config.chain,
            "icx_getTransactionResult",
        )?;
        match outcome {
            Some(Ok(raw)) => Ok(TxLookup::Found(into_tx_result(raw)?)),
            Some(Err(error)) => match error.code {
                ERROR_PENDING | ERROR_EXECUTING => Ok(TxLookup::Pending),
                ERROR_NOT_FOUND => Ok(TxLookup::NotFound),
                code => Err(self.unavailable(format!(
                    "icx_getTransactionResult: {} ({code})",
                    error.message
                ))),
            },
            None => Ok(TxLookup::NotFound),
        }
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn fetch_xcall_fee(&self, destination: ChainId, rollback: bool) -> Result<U256> {
        let params = json!({
            "to": self.config.xcall,
            "dataType": "call",
            "data": {
                "method": "getFee",
                "params": {
                    "_net": destination.network_id(),
                    "_rollback": if rollback { "0x1" } else { "0x0" },
                },
            },
        });
        let fee: String = with_retry(
            self.clock.as_ref(),
            self.retry,
            self.config.chain,
            "icx_call",
            || self.call_result("icx_call", params.clone()),
        )
        .await?;
        parse_hex(self.config.chain, &fee)
    }

    #[instrument(skip(self, intent), fields(chain = %self.config.chain, destination = %intent.destination))]
    async fn submit_transfer(&self, intent: &TransferIntent) -> Result<Transaction> {
        let (contract, method, params) = transfer_call(&self.config, intent)?;
        self.submit(&intent.account, &contract, intent.fee, method, params)
            .await
    }

    async fn approve(
        &self,
        token: &str,
        _owner: &str,
        _spender: &str,
        _amount: U256,
    ) -> Result<Option<Transaction>> {
        debug!(token, event = "icon_approve_not_required");
        Ok(None)
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn execute_rollback(&self, sn: U256, account: &str) -> Result<Transaction> {
        let xcall = self.config.xcall.clone();
        self.submit(
            account,
            &xcall,
            U256::ZERO,
            "executeRollback",
            json!({ "_sn": format_hex_u256(sn) }),
        )
        .await
    }
}
