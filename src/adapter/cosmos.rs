//! Cosmos-family (CosmWasm) adapter.
//!
//! Reads go to the CometBFT RPC (`/status`, `/block`, `/tx`); contract
//! queries go to the LCD smart query endpoint. Height convention: identity.

use std::fmt;
use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, trace};

use super::{
    undetermined, with_retry, Block, CallPayload, ChainAdapter, Coin, ContractCall, Transaction,
    TransferAsset, TransferIntent, TxLookup, TxResult, TxStatus,
};
use crate::chain::ChainId;
use crate::config::{ChainConfig, RetryPolicy};
use crate::error::{Result, XCallError};
use crate::event::{CosmosEvent, RawLog};
use crate::providers::TokioClock;
use crate::traits::{Clock, TransactionSigner};

#[derive(Debug, Deserialize)]
struct CometResponse<T> {
    result: Option<T>,
    error: Option<CometError>,
}

#[derive(Debug, Deserialize)]
struct CometError {
    code: i64,
    message: String,
    #[serde(default)]
    data: String,
}

impl CometError {
    fn is_not_found(&self) -> bool {
        self.data.contains("not found")
    }

    /// `/block` for a height the node has not reached yet
    fn is_future_height(&self) -> bool {
        self.data.contains("must be less than or equal to")
    }
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
struct SyncInfo {
    latest_block_height: String,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    block: CometBlock,
}

#[derive(Debug, Deserialize)]
struct CometBlock {
    header: BlockHeader,
    data: BlockData,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    height: String,
}

#[derive(Debug, Deserialize)]
struct BlockData {
    #[serde(default)]
    txs: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct CometTx {
    hash: String,
    tx_result: CometTxResult,
}

#[derive(Debug, Deserialize)]
struct CometTxResult {
    code: u32,
    #[serde(default)]
    events: Vec<CosmosEvent>,
}

#[derive(Debug, Deserialize)]
struct SmartQueryResponse<T> {
    data: T,
}

/// CosmWasm `Uint128`, serialized as a decimal string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Uint128 {
    String(String),
    Number(u128),
}

impl Uint128 {
    fn to_u256(&self, chain: ChainId) -> Result<U256> {
        match self {
            Uint128::String(value) => {
                U256::from_str_radix(value, 10).map_err(|e| XCallError::RpcUnavailable {
                    chain,
                    reason: format!("`{value}` is not a decimal amount: {e}"),
                })
            }
            Uint128::Number(value) => Ok(U256::from(*value)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AllowanceResponse {
    allowance: Uint128,
}

/// Adapter for Archway and other CosmWasm chains
#[derive(Clone)]
pub struct CosmosAdapter {
    config: ChainConfig,
    client: Client,
    signer: Arc<dyn TransactionSigner>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl fmt::Debug for CosmosAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CosmosAdapter")
            .field("chain", &self.config.chain)
            .field("rpc_url", &self.config.rpc_url.as_str())
            .field("lcd_url", &self.config.lcd_url.as_ref().map(|url| url.as_str()))
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// CometBFT transaction hash: upper-case hex SHA-256 of the raw tx bytes
pub fn tx_hash(tx_bytes: &[u8]) -> String {
    alloy_primitives::hex::encode_upper(Sha256::digest(tx_bytes))
}

impl CosmosAdapter {
    pub fn new(config: ChainConfig, signer: Arc<dyn TransactionSigner>) -> Self {
        Self {
            config,
            client: Client::new(),
            signer,
            clock: Arc::new(TokioClock::new()),
            retry: RetryPolicy::default(),
        }
    }

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

    fn rpc_endpoint(&self, path_and_query: &str) -> String {
        format!(
            "{}/{path_and_query}",
            self.config.rpc_url.as_str().trim_end_matches('/')
        )
    }

    fn fee_denom(&self) -> Result<&str> {
        self.config.fee_denom.as_deref().ok_or_else(|| {
            XCallError::InvalidConfig(format!("{} has no fee denomination", self.config.chain))
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path_and_query: &str,
    ) -> Result<std::result::Result<T, CometError>> {
        let url = self.rpc_endpoint(path_and_query);
        trace!(url = %url, "Sending CometBFT request");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;
        let body: CometResponse<T> = response.json().await.map_err(|e| self.unavailable(e))?;

        match (body.result, body.error) {
            (_, Some(error)) => Ok(Err(error)),
            (Some(result), None) => Ok(Ok(result)),
            (None, None) => Err(self.unavailable(format!("{path_and_query}: empty response"))),
        }
    }

    /// CosmWasm smart query through the LCD
    async fn smart_query<T: DeserializeOwned>(&self, contract: &str, query: &Value) -> Result<T> {
        let lcd = self.config.require_lcd_url()?;
        let encoded = URL_SAFE.encode(serde_json::to_vec(query)?);
        let url = format!(
            "{}/cosmwasm/wasm/v1/contract/{contract}/smart/{encoded}",
            lcd.as_str().trim_end_matches('/')
        );
        trace!(url = %url, "Sending CosmWasm smart query");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;
        if response.status().is_server_error() {
            return Err(self.unavailable(format!("smart query returned {}", response.status())));
        }
        let body: SmartQueryResponse<T> = response
            .error_for_status()
            .map_err(|e| self.unavailable(e))?
            .json()
            .await
            .map_err(|e| self.unavailable(e))?;
        Ok(body.data)
    }

    async fn submit(
        &self,
        account: &str,
        contract: &str,
        value: U256,
        msg: Value,
    ) -> Result<Transaction> {
        let funds = if value.is_zero() {
            Vec::new()
        } else {
            vec![Coin {
                denom: self.fee_denom()?.to_string(),
                amount: value.to_string(),
            }]
        };
        let call = ContractCall {
            chain: self.config.chain,
            from: account.to_string(),
            contract: contract.to_string(),
            value,
            payload: CallPayload::Cosmos { msg, funds },
        };
        let hash = self.signer.sign_and_send(call).await?;
        info!(
            chain = %self.config.chain,
            contract,
            tx_hash = hash.as_deref().unwrap_or("<none>"),
            event = "cosmwasm_execute_submitted"
        );
        Ok(Transaction::submitted(self.config.chain, hash))
    }
}

/// Builds the CosmWasm execute message for a transfer intent
fn transfer_msg(config: &ChainConfig, intent: &TransferIntent) -> Result<(String, Value)> {
    let destination = intent.destination_address();
    let amount = intent.amount.to_string();
    match &intent.asset {
        TransferAsset::BnUsd => Ok((
            config.bnusd.clone(),
            json!({ "cross_transfer": { "amount": amount, "to": destination, "data": [] } }),
        )),
        TransferAsset::Token { address } => Ok((
            config.asset_manager.clone(),
            json!({
                "deposit": {
                    "token_address": address,
                    "amount": amount,
                    "to": destination,
                    "data": [],
                }
            }),
        )),
        TransferAsset::Native => Err(XCallError::SubmissionFailed {
            chain: config.chain,
            reason: "native coins cannot be deposited to the asset manager".to_string(),
        }),
    }
}

fn into_block(chain: ChainId, height: u64, result: BlockResult) -> Result<Block> {
    let malformed = |reason: String| XCallError::RpcUnavailable { chain, reason };
    let native_height = result
        .block
        .header
        .height
        .parse::<u64>()
        .map_err(|e| malformed(format!("block height `{}`: {e}", result.block.header.height)))?;
    let tx_hashes = result
        .block
        .data
        .txs
        .unwrap_or_default()
        .iter()
        .map(|tx| STANDARD.decode(tx).map(|bytes| tx_hash(&bytes)))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| malformed(format!("undecodable tx in block {height}: {e}")))?;
    Ok(Block {
        height,
        native_height,
        tx_hashes,
    })
}

fn into_tx_result(raw: Value) -> Result<TxResult> {
    let parsed: CometTx = serde_json::from_value(raw.clone())?;
    Ok(TxResult {
        hash: parsed.hash,
        status: if parsed.tx_result.code == 0 {
            TxStatus::Success
        } else {
            TxStatus::Failure
        },
        logs: parsed
            .tx_result
            .events
            .into_iter()
            .map(RawLog::Cosmos)
            .collect(),
        raw,
    })
}

#[async_trait]
impl ChainAdapter for CosmosAdapter {
    fn chain_id(&self) -> ChainId {
        self.config.chain
    }

    fn xcall_address(&self) -> &str {
        &self.config.xcall
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn fetch_block_height(&self) -> Result<u64> {
        let status: StatusResult = with_retry(
            self.clock.as_ref(),
            self.retry,
            self.config.chain,
            "status",
            move || async move {
                self.get("status")
                    .await?
                    .map_err(|error| self.unavailable(format!("status: {}", error.message)))
            },
        )
        .await?;
        let height = status
            .sync_info
            .latest_block_height
            .parse::<u64>()
            .map_err(|e| self.unavailable(format!("latest_block_height: {e}")))?;
        debug!(height, event = "cosmos_block_height_fetched");
        Ok(height)
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn fetch_block(&self, height: u64) -> Result<Option<Block>> {
        let path = format!("block?height={}", self.native_height(height));
        let result = with_retry(
            self.clock.as_ref(),
            self.retry,
            self.config.chain,
            "block",
            || self.get::<BlockResult>(&path),
        )
        .await;

        match undetermined(result.map(Some), None, self.config.chain, "block")? {
            Some(Ok(block)) => into_block(self.config.chain, height, block).map(Some),
            Some(Err(error)) if error.is_future_height() || error.is_not_found() => Ok(None),
            Some(Err(error)) => Err(self.unavailable(format!(
                "block: {} ({}) {}",
                error.message, error.code, error.data
            ))),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn fetch_transaction_result(&self, hash: &str) -> Result<TxLookup> {
        let path = format!("tx?hash=0x{}", hash.trim_start_matches("0x"));
        let result = with_retry(
            self.clock.as_ref(),
            self.retry,
            self.config.chain,
            "tx",
            || self.get::<Value>(&path),
        )
        .await;

        match undetermined(result.map(Some), None, self.config.chain, "tx")? {
            Some(Ok(raw)) => Ok(TxLookup::Found(into_tx_result(raw)?)),
            // CometBFT only indexes committed transactions
            Some(Err(error)) if error.is_not_found() => Ok(TxLookup::Pending),
            Some(Err(error)) => Err(self.unavailable(format!(
                "tx: {} ({}) {}",
                error.message, error.code, error.data
            ))),
            None => Ok(TxLookup::NotFound),
        }
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn fetch_xcall_fee(&self, destination: ChainId, rollback: bool) -> Result<U256> {
        let query = json!({ "get_fee": { "nid": destination.network_id(), "rollback": rollback } });
        let fee: Uint128 = with_retry(
            self.clock.as_ref(),
            self.retry,
            self.config.chain,
            "get_fee",
            || self.smart_query(&self.config.xcall, &query),
        )
        .await?;
        fee.to_u256(self.config.chain)
    }

    #[instrument(skip(self, intent), fields(chain = %self.config.chain, destination = %intent.destination))]
    async fn submit_transfer(&self, intent: &TransferIntent) -> Result<Transaction> {
        let (contract, msg) = transfer_msg(&self.config, intent)?;
        self.submit(&intent.account, &contract, intent.fee, msg)
            .await
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn approve(
        &self,
        token: &str,
        owner: &str,
        spender: &str,
        amount: U256,
    ) -> Result<Option<Transaction>> {
        let query = json!({ "allowance": { "owner": owner, "spender": spender } });
        let response: AllowanceResponse = with_retry(
            self.clock.as_ref(),
            self.retry,
            self.config.chain,
            "allowance",
            || self.smart_query(token, &query),
        )
        .await?;
        let allowance = response.allowance.to_u256(self.config.chain)?;

        if allowance >= amount {
            debug!(
                token,
                allowance = %allowance,
                amount = %amount,
                event = "cw20_allowance_sufficient"
            );
            return Ok(None);
        }

        let increase = amount - allowance;
        let msg = json!({
            "increase_allowance": { "spender": spender, "amount": increase.to_string() }
        });
        self.submit(owner, token, U256::ZERO, msg).await.map(Some)
    }

    #[instrument(skip(self), fields(chain = %self.config.chain))]
    async fn execute_rollback(&self, sn: U256, account: &str) -> Result<Transaction> {
        let msg = json!({ "execute_rollback": { "sequence_no": sn.to_string() } });
        let xcall = self.config.xcall.clone();
        self.submit(account, &xcall, U256::ZERO, msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeClock, FakeSigner};
    use httpmock::{Method, MockServer};

    fn config(rpc_url: &str, lcd_url: &str) -> ChainConfig {
        ChainConfig::builder()
            .chain(ChainId::Archway)
            .rpc_url(rpc_url.parse().unwrap())
            .lcd_url(lcd_url.parse().unwrap())
            .xcall("archway17gq4lm4mww9yx8ykv2hpppkmrx2p8qwxtfdwyjetq3xzrkm8jq9qqvg3k9".to_string())
            .asset_manager("archway1assetmanager".to_string())
            .bnusd("archway1bnusd".to_string())
            .fee_denom("aarch".to_string())
            .build()
    }

    fn adapter(server: &MockServer, signer: FakeSigner) -> CosmosAdapter {
        CosmosAdapter::new(config(&server.base_url(), &server.base_url()), Arc::new(signer))
            .with_clock(Arc::new(FakeClock::new()))
            .with_retry(RetryPolicy::no_retry())
    }

    #[test]
    fn test_tx_hash_is_upper_hex_sha256() {
        let bytes = STANDARD.decode("YWJj").unwrap();
        insta::assert_snapshot!(
            tx_hash(&bytes),
            @"BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        );
    }

    #[tokio::test]
    async fn test_height_convention_is_identity() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(Method::GET)
                    .path("/block")
                    .query_param("height", "100");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0",
                    "id": -1,
                    "result": {
                        "block": {
                            "header": { "height": "100" },
                            "data": { "txs": ["YWJj"] }
                        }
                    }
                }));
            })
            .await;

        let adapter = adapter(&server, FakeSigner::new());
        assert_eq!(adapter.native_height(100), 100);
        let block = adapter.fetch_block(100).await.unwrap().unwrap();
        mock.assert_async().await;
        assert_eq!(block.native_height, 100);
        assert_eq!(
            block.tx_hashes,
            vec!["BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD".to_string()]
        );
    }

    #[tokio::test]
    async fn test_empty_block_has_no_transactions() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(Method::GET).path("/block");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0",
                    "id": -1,
                    "result": {
                        "block": { "header": { "height": "7" }, "data": { "txs": null } }
                    }
                }));
            })
            .await;

        let block = adapter(&server, FakeSigner::new())
            .fetch_block(7)
            .await
            .unwrap()
            .unwrap();
        assert!(block.tx_hashes.is_empty());
    }

    #[tokio::test]
    async fn test_future_block_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(Method::GET).path("/block");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0",
                    "id": -1,
                    "error": {
                        "code": -32603,
                        "message": "Internal error",
                        "data": "height 500 must be less than or equal to the current blockchain height 499"
                    }
                }));
            })
            .await;

        let block = adapter(&server, FakeSigner::new()).fetch_block(500).await.unwrap();
        assert_eq!(block, None);
    }

    #[tokio::test]
    async fn test_unindexed_tx_is_pending() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(Method::GET).path("/tx");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0",
                    "id": -1,
                    "error": {
                        "code": -32603,
                        "message": "Internal error",
                        "data": "tx (ABC) not found"
                    }
                }));
            })
            .await;

        let lookup = adapter(&server, FakeSigner::new())
            .fetch_transaction_result("ABC")
            .await
            .unwrap();
        assert_eq!(lookup, TxLookup::Pending);
    }

    #[test]
    fn test_tx_result_parsing() {
        let raw = json!({
            "hash": "ABC",
            "height": "12",
            "tx_result": {
                "code": 0,
                "events": [
                    { "type": "message", "attributes": [{ "key": "action", "value": "/cosmwasm.wasm.v1.MsgExecuteContract" }] },
                    { "type": "wasm-CallMessageSent", "attributes": [{ "key": "sn", "value": "9" }] }
                ]
            }
        });
        let result = into_tx_result(raw).unwrap();
        assert_eq!(result.status, TxStatus::Success);
        assert_eq!(result.logs.len(), 2);

        let failed = into_tx_result(json!({
            "hash": "DEF",
            "tx_result": { "code": 5, "events": [] }
        }))
        .unwrap();
        assert_eq!(failed.status, TxStatus::Failure);
    }

    #[tokio::test]
    async fn test_fee_smart_query() {
        let server = MockServer::start_async().await;
        let query = URL_SAFE.encode(
            serde_json::to_vec(&json!({ "get_fee": { "nid": "0x1.icon", "rollback": true } }))
                .unwrap(),
        );
        server
            .mock_async(|when, then| {
                when.method(Method::GET).path(format!(
                    "/cosmwasm/wasm/v1/contract/archway17gq4lm4mww9yx8ykv2hpppkmrx2p8qwxtfdwyjetq3xzrkm8jq9qqvg3k9/smart/{query}"
                ));
                then.status(200).json_body(json!({ "data": "250000000000000000" }));
            })
            .await;

        let fee = adapter(&server, FakeSigner::new())
            .fetch_xcall_fee(ChainId::IconMainnet, true)
            .await
            .unwrap();
        assert_eq!(fee, U256::from(250_000_000_000_000_000u64));
    }

    #[tokio::test]
    async fn test_approve_increases_missing_allowance() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(Method::GET)
                    .path_contains("/cosmwasm/wasm/v1/contract/archway1token/smart/");
                then.status(200).json_body(json!({
                    "data": { "allowance": "40", "expires": { "never": {} } }
                }));
            })
            .await;

        let signer = FakeSigner::new().with_hash("CAFE");
        let tx = adapter(&server, signer.clone())
            .approve("archway1token", "archway1owner", "archway1assetmanager", U256::from(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.hash.as_deref(), Some("CAFE"));

        let calls = signer.calls();
        assert_eq!(
            calls[0].payload,
            CallPayload::Cosmos {
                msg: json!({
                    "increase_allowance": { "spender": "archway1assetmanager", "amount": "60" }
                }),
                funds: vec![],
            }
        );
    }

    #[tokio::test]
    async fn test_approve_is_noop_when_allowance_covers_amount() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(Method::GET).path_contains("/smart/");
                then.status(200)
                    .json_body(json!({ "data": { "allowance": "100", "expires": { "never": {} } } }));
            })
            .await;

        let signer = FakeSigner::new();
        let result = adapter(&server, signer.clone())
            .approve("archway1token", "archway1owner", "archway1assetmanager", U256::from(100))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(signer.calls().is_empty());
    }

    #[test]
    fn test_deposit_message_for_cw20() {
        let intent = TransferIntent::builder()
            .source(ChainId::Archway)
            .destination(ChainId::IconMainnet)
            .asset(TransferAsset::Token {
                address: "archway1usdc".to_string(),
            })
            .amount(U256::from(5_000_000))
            .recipient("hx0000000000000000000000000000000000000001".to_string())
            .account("archway1sender".to_string())
            .fee(U256::from(3))
            .build();
        let (contract, msg) = transfer_msg(&config("http://rpc", "http://lcd"), &intent).unwrap();
        assert_eq!(contract, "archway1assetmanager");
        assert_eq!(
            msg,
            json!({
                "deposit": {
                    "token_address": "archway1usdc",
                    "amount": "5000000",
                    "to": "0x1.icon/hx0000000000000000000000000000000000000001",
                    "data": [],
                }
            })
        );
    }
}
