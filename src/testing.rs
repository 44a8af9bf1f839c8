//! Test utilities and fake implementations for the relay
//!
//! These fakes stand in for chain RPCs, wallets and time so that whole
//! transfers, including multi-minute cross-chain waits, RPC outages and
//! rollbacks, can be driven deterministically in unit and integration tests.

use alloy_primitives::U256;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::adapter::{
    Block, ChainAdapter, ContractCall, Transaction, TransferIntent, TxLookup, TxResult, TxStatus,
};
use crate::chain::{ChainFamily, ChainId};
use crate::event::{codec_for, XCallEvent};
use crate::traits::{Clock, TransactionSigner};
use crate::{Result, XCallError};

// ============================================================================
// Fake Chain Adapter
// ============================================================================

#[derive(Debug, Default)]
struct FakeChainState {
    height: u64,
    blocks: HashMap<u64, Vec<String>>,
    transactions: HashMap<String, VecDeque<TxLookup>>,
    fees: HashMap<(ChainId, bool), U256>,
    failing_reads: u32,
    submission_hash: Option<Option<String>>,
    submission_error: Option<String>,
    submission_count: u64,
    submissions: Vec<TransferIntent>,
    approvals: Vec<(String, U256)>,
    rollbacks: Vec<U256>,
    block_requests: Vec<u64>,
}

/// A scripted chain.
///
/// Blocks up to the current height that were never scripted are empty.
/// Heights above the current height are "not produced yet".
///
/// This allows testing scenarios like:
/// - Destination events spread over several blocks
/// - Transactions that stay pending for a few polls
/// - RPC outages in the middle of a scan
/// - Rejected submissions
#[derive(Clone, Debug)]
pub struct FakeChainAdapter {
    chain: ChainId,
    xcall: String,
    state: Arc<Mutex<FakeChainState>>,
}

impl FakeChainAdapter {
    pub fn new(chain: ChainId) -> Self {
        let xcall = match chain.family() {
            ChainFamily::Icon => "cxa07f426062a1384bdd762afa6a87d123fbc81c75",
            ChainFamily::Cosmos => {
                "archway19hzhgtshxcgfhrwu4p7akh7dlxnuxgwtlf8wz5ulczfzc9k6xjeqk5qmwk"
            }
            ChainFamily::Evm => "0xfC83a3F252090B26f92F91DFB9dC3Eb710AdAf1b",
        };
        Self {
            chain,
            xcall: xcall.to_string(),
            state: Arc::new(Mutex::new(FakeChainState::default())),
        }
    }

    /// Set the latest block height
    pub fn set_height(&self, height: u64) {
        self.state.lock().unwrap().height = height;
    }

    /// Place transactions in the block at `height`
    pub fn add_block(&self, height: u64, tx_hashes: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .blocks
            .entry(height)
            .or_default()
            .extend(tx_hashes.iter().map(|hash| hash.to_string()));
    }

    /// Script a sequence of lookups for a hash. The last one repeats.
    pub fn add_lookup_sequence(&self, hash: &str, lookups: Vec<TxLookup>) {
        self.state
            .lock()
            .unwrap()
            .transactions
            .insert(hash.to_string(), lookups.into());
    }

    /// Renders `events` with this chain's codec and returns the mined result
    pub fn mined(&self, hash: &str, status: TxStatus, events: &[XCallEvent]) -> TxResult {
        let codec = codec_for(self.chain.family());
        let logs = events
            .iter()
            .map(|event| codec.encode(event, &self.xcall).unwrap())
            .collect();
        TxResult {
            hash: hash.to_string(),
            status,
            logs,
            raw: serde_json::json!({ "hash": hash }),
        }
    }

    /// Add a successful transaction emitting `events` without placing it in
    /// a block
    pub fn add_transaction(&self, hash: &str, status: TxStatus, events: &[XCallEvent]) {
        let result = self.mined(hash, status, events);
        self.add_lookup_sequence(hash, vec![TxLookup::Found(result)]);
    }

    /// Mine a successful transaction emitting `events` into the block at
    /// `height`, raising the chain height if needed
    pub fn add_mined_transaction(&self, height: u64, hash: &str, events: &[XCallEvent]) {
        self.add_transaction(hash, TxStatus::Success, events);
        self.add_block(height, &[hash]);
        let mut state = self.state.lock().unwrap();
        state.height = state.height.max(height);
    }

    pub fn set_fee(&self, destination: ChainId, rollback: bool, fee: U256) {
        self.state
            .lock()
            .unwrap()
            .fees
            .insert((destination, rollback), fee);
    }

    /// Make the next `count` read RPCs fail with `RpcUnavailable`
    pub fn fail_next_reads(&self, count: u32) {
        self.state.lock().unwrap().failing_reads = count;
    }

    /// Hash returned by the next submissions; `None` simulates a wallet that
    /// accepted the call without reporting a hash
    pub fn set_submission_hash(&self, hash: Option<&str>) {
        self.state.lock().unwrap().submission_hash = Some(hash.map(str::to_string));
    }

    pub fn reject_submissions(&self, reason: &str) {
        self.state.lock().unwrap().submission_error = Some(reason.to_string());
    }

    pub fn submissions(&self) -> Vec<TransferIntent> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn approvals(&self) -> Vec<(String, U256)> {
        self.state.lock().unwrap().approvals.clone()
    }

    pub fn rollbacks(&self) -> Vec<U256> {
        self.state.lock().unwrap().rollbacks.clone()
    }

    /// Every height passed to `fetch_block`, in call order
    pub fn block_requests(&self) -> Vec<u64> {
        self.state.lock().unwrap().block_requests.clone()
    }

    fn read(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(XCallError::RpcUnavailable {
                chain: self.chain,
                reason: "Simulated RPC error".to_string(),
            });
        }
        Ok(())
    }

    fn submit(&self) -> Result<Transaction> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.submission_error {
            return Err(XCallError::SubmissionFailed {
                chain: self.chain,
                reason: reason.clone(),
            });
        }
        state.submission_count += 1;
        let hash = match &state.submission_hash {
            Some(hash) => hash.clone(),
            None => Some(format!("0x{:064x}", state.submission_count)),
        };
        Ok(Transaction::submitted(self.chain, hash))
    }
}

#[async_trait]
impl ChainAdapter for FakeChainAdapter {
    fn chain_id(&self) -> ChainId {
        self.chain
    }

    fn xcall_address(&self) -> &str {
        &self.xcall
    }

    async fn fetch_block_height(&self) -> Result<u64> {
        self.read()?;
        Ok(self.state.lock().unwrap().height)
    }

    async fn fetch_block(&self, height: u64) -> Result<Option<Block>> {
        self.state.lock().unwrap().block_requests.push(height);
        self.read()?;
        let state = self.state.lock().unwrap();
        if height > state.height {
            return Ok(None);
        }
        Ok(Some(Block {
            height,
            native_height: self.native_height(height),
            tx_hashes: state.blocks.get(&height).cloned().unwrap_or_default(),
        }))
    }

    async fn fetch_transaction_result(&self, hash: &str) -> Result<TxLookup> {
        self.read()?;
        let mut state = self.state.lock().unwrap();
        let Some(lookups) = state.transactions.get_mut(hash) else {
            return Ok(TxLookup::NotFound);
        };
        if lookups.len() > 1 {
            Ok(lookups.pop_front().unwrap())
        } else {
            Ok(lookups.front().cloned().unwrap_or(TxLookup::NotFound))
        }
    }

    async fn fetch_xcall_fee(&self, destination: ChainId, rollback: bool) -> Result<U256> {
        self.read()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .fees
            .get(&(destination, rollback))
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn submit_transfer(&self, intent: &TransferIntent) -> Result<Transaction> {
        let tx = self.submit()?;
        self.state.lock().unwrap().submissions.push(intent.clone());
        Ok(tx)
    }

    async fn approve(
        &self,
        token: &str,
        _owner: &str,
        _spender: &str,
        amount: U256,
    ) -> Result<Option<Transaction>> {
        let tx = self.submit()?;
        self.state
            .lock()
            .unwrap()
            .approvals
            .push((token.to_string(), amount));
        Ok(Some(tx))
    }

    async fn execute_rollback(&self, sn: U256, _account: &str) -> Result<Transaction> {
        let tx = self.submit()?;
        self.state.lock().unwrap().rollbacks.push(sn);
        Ok(tx)
    }
}

// ============================================================================
// Fake Signer
// ============================================================================

/// A wallet that records every call it is asked to sign.
#[derive(Clone, Debug, Default)]
pub struct FakeSigner {
    hash: Option<String>,
    rejection: Option<String>,
    calls: Arc<Mutex<Vec<ContractCall>>>,
}

impl FakeSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `hash` for every signed call
    pub fn with_hash(mut self, hash: &str) -> Self {
        self.hash = Some(hash.to_string());
        self
    }

    /// Reject every call as a user would in the wallet prompt
    pub fn rejecting(mut self, reason: &str) -> Self {
        self.rejection = Some(reason.to_string());
        self
    }

    pub fn calls(&self) -> Vec<ContractCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionSigner for FakeSigner {
    async fn sign_and_send(&self, call: ContractCall) -> Result<Option<String>> {
        let chain = call.chain;
        self.calls.lock().unwrap().push(call);
        match &self.rejection {
            Some(reason) => Err(XCallError::SubmissionFailed {
                chain,
                reason: reason.clone(),
            }),
            None => Ok(self.hash.clone()),
        }
    }
}

// ============================================================================
// Fake Clock
// ============================================================================

/// A fake clock that allows fast-forwarding time in tests.
///
/// Sleeping returns at once and is recorded. A clock can also cancel a token
/// after a number of sleeps, which stops a polling loop deterministically.
#[derive(Clone, Debug)]
pub struct FakeClock {
    current_time: Arc<Mutex<Instant>>,
    sleep_log: Arc<Mutex<Vec<Duration>>>,
    cancel_after: Arc<Mutex<Option<(usize, CancellationToken)>>>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self {
            current_time: Arc::new(Mutex::new(Instant::now())),
            sleep_log: Arc::new(Mutex::new(Vec::new())),
            cancel_after: Arc::new(Mutex::new(None)),
        }
    }
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel `token` once `sleeps` sleeps have been recorded
    pub fn cancel_after(&self, sleeps: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((sleeps, token));
    }

    /// Fast-forward the clock by the given duration
    pub fn advance(&self, duration: Duration) {
        let mut time = self.current_time.lock().unwrap();
        *time += duration;
    }

    /// Every recorded sleep, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleep_log.lock().unwrap().clone()
    }

    /// Get the total time "slept" by this clock
    pub fn total_sleep_time(&self) -> Duration {
        self.sleep_log.lock().unwrap().iter().sum()
    }

    /// Get the number of times sleep was called
    pub fn sleep_count(&self) -> usize {
        self.sleep_log.lock().unwrap().len()
    }
}

#[async_trait]
impl Clock for FakeClock {
    async fn sleep(&self, duration: Duration) {
        let count = {
            let mut log = self.sleep_log.lock().unwrap();
            log.push(duration);
            log.len()
        };
        self.advance(duration);
        if let Some((limit, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if count >= *limit {
                token.cancel();
            }
        }
    }

    fn now(&self) -> Instant {
        *self.current_time.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::XCallEventType;

    #[tokio::test]
    async fn test_fake_clock_tracks_sleep_calls() {
        let clock = FakeClock::new();

        clock.sleep(Duration::from_secs(60)).await;
        clock.sleep(Duration::from_secs(120)).await;

        assert_eq!(clock.sleep_count(), 2);
        assert_eq!(clock.total_sleep_time(), Duration::from_secs(180));
    }

    #[tokio::test]
    async fn test_fake_clock_cancels_after_limit() {
        let clock = FakeClock::new();
        let token = CancellationToken::new();
        clock.cancel_after(2, token.clone());

        clock.sleep(Duration::from_secs(1)).await;
        assert!(!token.is_cancelled());
        clock.sleep(Duration::from_secs(1)).await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_lookup_sequence_repeats_last() {
        let chain = FakeChainAdapter::new(ChainId::Archway);
        let mined = chain.mined("AB", TxStatus::Success, &[]);
        chain.add_lookup_sequence(
            "AB",
            vec![TxLookup::Pending, TxLookup::Found(mined.clone())],
        );

        assert_eq!(
            chain.fetch_transaction_result("AB").await.unwrap(),
            TxLookup::Pending
        );
        for _ in 0..2 {
            assert_eq!(
                chain.fetch_transaction_result("AB").await.unwrap(),
                TxLookup::Found(mined.clone())
            );
        }
    }

    #[tokio::test]
    async fn test_mined_transaction_decodes_with_chain_codec() {
        let chain = FakeChainAdapter::new(ChainId::IconMainnet);
        let event = XCallEvent::new(XCallEventType::CallMessageSent, ChainId::IconMainnet)
            .with_from("hx0000000000000000000000000000000000000001")
            .with_to("archway-1/archway1recipient")
            .with_sn(U256::from(42u64));
        chain.add_mined_transaction(10, "0x01", &[event]);

        let block = chain.fetch_block(10).await.unwrap().unwrap();
        assert_eq!(block.tx_hashes, vec!["0x01".to_string()]);
        assert!(chain.fetch_block(11).await.unwrap().is_none());

        let TxLookup::Found(result) = chain.fetch_transaction_result("0x01").await.unwrap() else {
            panic!("expected a mined transaction");
        };
        let decoded = chain
            .codec()
            .decode(&result.logs[0], XCallEventType::CallMessageSent, ChainId::IconMainnet)
            .unwrap();
        assert_eq!(decoded.sn, Some(U256::from(42u64)));
    }

    #[tokio::test]
    async fn test_failing_reads_recover() {
        let chain = FakeChainAdapter::new(ChainId::Avalanche);
        chain.set_height(5);
        chain.fail_next_reads(1);

        assert!(chain.fetch_block_height().await.is_err());
        assert_eq!(chain.fetch_block_height().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_fake_signer_rejection_is_recorded() {
        let signer = FakeSigner::new().rejecting("user rejected");
        let call = ContractCall {
            chain: ChainId::Avalanche,
            from: "0x1234567890123456789012345678901234567890".to_string(),
            contract: "0xfC83a3F252090B26f92F91DFB9dC3Eb710AdAf1b".to_string(),
            value: U256::ZERO,
            payload: crate::adapter::CallPayload::Evm {
                input: Default::default(),
            },
        };

        let result = signer.sign_and_send(call).await;

        assert!(matches!(result, Err(XCallError::SubmissionFailed { .. })));
        assert_eq!(signer.calls().len(), 1);
    }
}
