// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! The relay facade
//!
//! [`XCallRelayer`] wires the chain adapters, the transfer registry, the
//! event scanner and the fee oracle into the operations an application
//! calls: quote, submit, track and roll back.

use std::sync::Arc;

use alloy_primitives::U256;
use bon::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use crate::adapter::{AdapterRegistry, Transaction, TransferIntent, TxLookup};
use crate::chain::ChainId;
use crate::config::PollingConfig;
use crate::error::{Result, XCallError};
use crate::event::{missing_field, XCallEventType};
use crate::fee::{FeeOracle, FeeQuote};
use crate::providers::TokioClock;
use crate::registry::{RegistryHandle, Transfer, TransferId, TransferStatus};
use crate::scanner::EventScanner;
use crate::spans;
use crate::traits::Clock;

fn default_clock() -> Arc<dyn Clock> {
    Arc::new(TokioClock::new())
}

/// Cross-chain transfer relay
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use alloy_primitives::U256;
/// use tokio_util::sync::CancellationToken;
/// use xcall_relay::testing::FakeChainAdapter;
/// use xcall_relay::{AdapterRegistry, ChainId, TransferAsset, TransferIntent, XCallRelayer};
///
/// # async fn example() -> xcall_relay::Result<()> {
/// let adapters = AdapterRegistry::new()
///     .with(Arc::new(FakeChainAdapter::new(ChainId::IconMainnet)))
///     .with(Arc::new(FakeChainAdapter::new(ChainId::Archway)));
/// let relayer = XCallRelayer::builder().adapters(adapters).build();
///
/// let fee = relayer
///     .quote_fee(ChainId::IconMainnet, ChainId::Archway, true)
///     .await?;
/// let transfer = relayer
///     .submit_transfer(
///         TransferIntent::builder()
///             .source(ChainId::IconMainnet)
///             .destination(ChainId::Archway)
///             .asset(TransferAsset::BnUsd)
///             .amount(U256::from(1_000u64))
///             .recipient("archway1recipient".to_string())
///             .account("hx0000000000000000000000000000000000000001".to_string())
///             .fee(fee)
///             .build(),
///     )
///     .await?;
/// let status = relayer.track(transfer.id, CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Builder, Clone)]
pub struct XCallRelayer {
    adapters: AdapterRegistry,
    #[builder(default)]
    registry: RegistryHandle,
    #[builder(default = default_clock())]
    clock: Arc<dyn Clock>,
    #[builder(default)]
    polling: PollingConfig,
}

impl std::fmt::Debug for XCallRelayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XCallRelayer")
            .field("adapters", &self.adapters)
            .field("polling", &self.polling)
            .finish_non_exhaustive()
    }
}

impl XCallRelayer {
    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// A scanner sharing this relayer's adapters, registry and clock
    pub fn scanner(&self) -> EventScanner {
        EventScanner::new(self.adapters.clone(), self.registry.clone())
            .with_clock(self.clock.clone())
            .with_config(self.polling)
    }

    pub fn fee_oracle(&self) -> FeeOracle {
        FeeOracle::new(self.adapters.clone())
    }

    pub async fn quote_fee(
        &self,
        source: ChainId,
        destination: ChainId,
        with_rollback: bool,
    ) -> Result<U256> {
        self.fee_oracle()
            .quote(source, destination, with_rollback)
            .instrument(spans::quote_fee(source, destination))
            .await
    }

    pub async fn quote_fees(&self, source: ChainId, destination: ChainId) -> Result<FeeQuote> {
        self.fee_oracle()
            .quote_both(source, destination)
            .instrument(spans::quote_fee(source, destination))
            .await
    }

    /// Registers and submits a transfer.
    ///
    /// Both chains' heights are read before anything is sent, so scanning
    /// later starts at a block no later than the one carrying the transfer's
    /// events. A submission that returns no hash leaves the record in
    /// `CREATED`.
    ///
    /// # Errors
    ///
    /// - [`XCallError::ChainNotSupported`] when either chain has no adapter
    /// - [`XCallError::RpcUnavailable`] when a start height cannot be read;
    ///   nothing has been submitted in that case
    /// - [`XCallError::SubmissionFailed`] when the wallet rejected the call;
    ///   no record is kept
    pub async fn submit_transfer(&self, intent: TransferIntent) -> Result<Transfer> {
        let span = spans::submit_transfer(intent.source, intent.destination, &intent.amount);
        async move {
            let source = self.adapters.get(intent.source)?;
            let destination = self.adapters.get(intent.destination)?;

            let (source_height, destination_height) =
                tokio::try_join!(source.fetch_block_height(), destination.fetch_block_height())
                    .inspect_err(|e| spans::record_error(e))?;

            let id = self.registry.with(|registry| registry.create(intent.clone())).id;
            tracing::Span::current().record("transfer_id", id.to_string());

            let tx = match source.submit_transfer(&intent).await {
                Ok(tx) => tx,
                Err(e) => {
                    spans::record_error(&e);
                    warn!(
                        transfer_id = %id,
                        error = %e,
                        event = "transfer_submission_failed"
                    );
                    self.registry.with(|registry| registry.remove(id))?;
                    return Err(e);
                }
            };
            if let Some(hash) = &tx.hash {
                tracing::Span::current().record("tx_hash", hash.as_str());
            }

            let transfer = self.registry.with(|registry| {
                registry.set_start_height(id, intent.source, source_height)?;
                registry.set_start_height(id, intent.destination, destination_height)?;
                registry.record_submission(id, tx)
            })?;
            info!(
                transfer_id = %id,
                status = %transfer.status,
                source_height,
                destination_height,
                event = "transfer_submitted"
            );
            Ok(transfer)
        }
        .instrument(span)
        .await
    }

    /// Grants `spender` an allowance on `chain`. `None` when the chain has
    /// no allowance model or the allowance already covers `amount`.
    pub async fn approve(
        &self,
        chain: ChainId,
        token: &str,
        owner: &str,
        spender: &str,
        amount: U256,
    ) -> Result<Option<Transaction>> {
        self.adapters
            .get(chain)?
            .approve(token, owner, spender, amount)
            .await
    }

    /// Follows a transfer until it settles or `cancel` fires. See
    /// [`EventScanner::track`].
    pub async fn track(&self, id: TransferId, cancel: CancellationToken) -> Result<TransferStatus> {
        self.scanner().track(id, cancel).await
    }

    /// Executes a ready rollback on the source chain and waits for it to be
    /// mined. The transfer is claimed for the duration, so a second call
    /// cannot submit another rollback for the same message.
    ///
    /// # Errors
    ///
    /// [`XCallError::InvalidTransition`] unless the transfer is
    /// `ROLLBACK_READY`, [`XCallError::RollbackInFlight`] while another
    /// rollback for it is pending, or the adapter's error when submission
    /// fails.
    pub async fn execute_rollback(&self, id: TransferId, account: &str) -> Result<Transfer> {
        let transfer = self
            .registry
            .with(|registry| registry.begin_rollback(id))?;
        let prepared = transfer
            .sn()
            .ok_or_else(|| missing_field(XCallEventType::CallMessageSent, "sn"))
            .and_then(|sn| Ok((sn, self.adapters.get(transfer.source())?)));
        let (sn, adapter) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                self.registry.with(|registry| registry.abort_rollback(id))?;
                return Err(e);
            }
        };

        let span = spans::execute_rollback(id, transfer.source(), &sn);
        async move {
            let mut tx = match adapter.execute_rollback(sn, account).await {
                Ok(tx) => tx,
                Err(e) => {
                    spans::record_error(&e);
                    self.registry.with(|registry| registry.abort_rollback(id))?;
                    return Err(e);
                }
            };
            let Some(hash) = tx.hash.clone() else {
                warn!(transfer_id = %id, event = "rollback_submitted_without_hash");
                return self.registry.with(|registry| registry.record_rollback(id, tx));
            };
            tracing::Span::current().record("tx_hash", hash.as_str());

            let result = loop {
                match adapter.fetch_transaction_result(&hash).await {
                    Ok(TxLookup::Found(result)) => break result,
                    Ok(_) => {}
                    Err(e) => warn!(
                        transfer_id = %id,
                        tx_hash = %hash,
                        error = %e,
                        event = "rollback_poll_failed"
                    ),
                }
                self.clock.sleep(self.polling.tx_poll_interval).await;
            };
            tx.resolve(&result);

            let transfer = self
                .registry
                .with(|registry| registry.record_rollback(id, tx))?;
            if transfer.status == TransferStatus::RollbackExecuted {
                info!(transfer_id = %id, tx_hash = %hash, event = "rollback_executed");
            } else {
                spans::record_error_with_context(
                    "RollbackFailed",
                    "Rollback transaction failed on the source chain",
                    Some(hash.as_str()),
                );
                warn!(transfer_id = %id, tx_hash = %hash, event = "rollback_transaction_failed");
            }
            Ok(transfer)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{TransferAsset, TxStatus};
    use crate::event::{ExecutionOutcome, XCallEvent};
    use crate::testing::{FakeChainAdapter, FakeClock};
    use std::time::Duration;

    struct Harness {
        icon: FakeChainAdapter,
        archway: FakeChainAdapter,
        clock: FakeClock,
        relayer: XCallRelayer,
    }

    fn harness() -> Harness {
        let icon = FakeChainAdapter::new(ChainId::IconMainnet);
        let archway = FakeChainAdapter::new(ChainId::Archway);
        let clock = FakeClock::new();
        let relayer = XCallRelayer::builder()
            .adapters(
                AdapterRegistry::new()
                    .with(Arc::new(icon.clone()))
                    .with(Arc::new(archway.clone())),
            )
            .clock(Arc::new(clock.clone()))
            .build();
        Harness {
            icon,
            archway,
            clock,
            relayer,
        }
    }

    fn intent() -> TransferIntent {
        TransferIntent::builder()
            .source(ChainId::IconMainnet)
            .destination(ChainId::Archway)
            .asset(TransferAsset::BnUsd)
            .amount(U256::from(500u64))
            .recipient("archway1recipient".to_string())
            .account("hx0000000000000000000000000000000000000001".to_string())
            .fee(U256::from(3u64))
            .build()
    }

    /// Drives a submitted transfer to `ROLLBACK_READY` through the registry
    fn make_rollback_ready(relayer: &XCallRelayer, id: TransferId, hash: &str) {
        let mined = FakeChainAdapter::new(ChainId::IconMainnet).mined(hash, TxStatus::Success, &[]);
        relayer.registry().with(|registry| {
            registry.resolve_source_transaction(id, &mined).unwrap();
            for event in [
                XCallEvent::new(XCallEventType::CallMessageSent, ChainId::IconMainnet)
                    .with_sn(U256::from(9u64)),
                XCallEvent::new(XCallEventType::CallMessage, ChainId::Archway)
                    .with_sn(U256::from(9u64))
                    .with_req_id(U256::from(4u64)),
                XCallEvent::new(XCallEventType::CallExecuted, ChainId::Archway)
                    .with_req_id(U256::from(4u64))
                    .with_outcome(ExecutionOutcome::new(0, "insufficient balance")),
                XCallEvent::new(XCallEventType::RollbackMessage, ChainId::IconMainnet)
                    .with_sn(U256::from(9u64)),
            ] {
                registry.record_event(id, event).unwrap();
            }
        });
    }

    #[tokio::test]
    async fn test_submit_records_start_heights() {
        let h = harness();
        h.icon.set_height(700);
        h.archway.set_height(1_200);

        let transfer = h.relayer.submit_transfer(intent()).await.unwrap();

        assert_eq!(transfer.status, TransferStatus::SourceTxPending);
        assert_eq!(transfer.start_heights.get(&ChainId::Archway), Some(&1_200));
        assert_eq!(transfer.start_heights.get(&ChainId::IconMainnet), Some(&700));
        assert_eq!(h.icon.submissions(), vec![intent()]);
    }

    #[tokio::test]
    async fn test_rejected_submission_leaves_no_record() {
        let h = harness();
        h.icon.reject_submissions("user rejected");

        let err = h.relayer.submit_transfer(intent()).await.unwrap_err();

        assert!(matches!(err, XCallError::SubmissionFailed { .. }));
        assert!(h.relayer.registry().with(|registry| registry.is_empty()));
    }

    #[tokio::test]
    async fn test_unreadable_height_submits_nothing() {
        let h = harness();
        h.archway.fail_next_reads(1);

        let err = h.relayer.submit_transfer(intent()).await.unwrap_err();

        assert!(err.is_transient());
        assert!(h.icon.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_submission_without_hash_stays_created() {
        let h = harness();
        h.icon.set_submission_hash(None);

        let transfer = h.relayer.submit_transfer(intent()).await.unwrap();

        assert_eq!(transfer.status, TransferStatus::Created);
        assert!(transfer.source_transaction.is_some());
    }

    #[tokio::test]
    async fn test_rollback_requires_ready_state() {
        let h = harness();
        let transfer = h.relayer.submit_transfer(intent()).await.unwrap();

        let err = h
            .relayer
            .execute_rollback(transfer.id, "hx0000000000000000000000000000000000000001")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            XCallError::InvalidTransition {
                from: TransferStatus::SourceTxPending,
                to: TransferStatus::RollbackExecuted,
                ..
            }
        ));
        assert!(h.icon.rollbacks().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_waits_for_receipt() {
        let h = harness();
        h.icon.set_submission_hash(Some("0xrollback"));
        let transfer = h.relayer.submit_transfer(intent()).await.unwrap();
        make_rollback_ready(&h.relayer, transfer.id, "0xrollback");
        let mined = h.icon.mined("0xrollback", TxStatus::Success, &[]);
        h.icon.add_lookup_sequence(
            "0xrollback",
            vec![TxLookup::Pending, TxLookup::Found(mined)],
        );

        let transfer = h
            .relayer
            .execute_rollback(transfer.id, "hx0000000000000000000000000000000000000001")
            .await
            .unwrap();

        assert_eq!(transfer.status, TransferStatus::RollbackExecuted);
        assert_eq!(h.icon.rollbacks(), vec![U256::from(9u64)]);
        assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn test_failed_rollback_stays_ready() {
        let h = harness();
        h.icon.set_submission_hash(Some("0xrollback"));
        let transfer = h.relayer.submit_transfer(intent()).await.unwrap();
        make_rollback_ready(&h.relayer, transfer.id, "0xrollback");
        h.icon.add_transaction("0xrollback", TxStatus::Failure, &[]);

        let transfer = h
            .relayer
            .execute_rollback(transfer.id, "hx0000000000000000000000000000000000000001")
            .await
            .unwrap();

        assert_eq!(transfer.status, TransferStatus::RollbackReady);
        assert_eq!(
            transfer.rollback_transaction.map(|tx| tx.status),
            Some(TxStatus::Failure)
        );
    }

    #[tokio::test]
    async fn test_pending_rollback_blocks_a_second_submission() {
        let h = harness();
        h.icon.set_submission_hash(Some("0xrollback"));
        let transfer = h.relayer.submit_transfer(intent()).await.unwrap();
        make_rollback_ready(&h.relayer, transfer.id, "0xrollback");
        h.relayer
            .registry()
            .with(|registry| registry.begin_rollback(transfer.id))
            .unwrap();

        let err = h
            .relayer
            .execute_rollback(transfer.id, "hx0000000000000000000000000000000000000001")
            .await
            .unwrap_err();

        assert!(matches!(err, XCallError::RollbackInFlight { .. }));
        assert!(h.icon.rollbacks().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_rollback_releases_the_claim() {
        let h = harness();
        h.icon.set_submission_hash(Some("0xrollback"));
        let transfer = h.relayer.submit_transfer(intent()).await.unwrap();
        make_rollback_ready(&h.relayer, transfer.id, "0xrollback");
        h.icon.reject_submissions("user rejected");

        h.relayer
            .execute_rollback(transfer.id, "hx0000000000000000000000000000000000000001")
            .await
            .unwrap_err();

        let transfer = h.relayer.registry().get(transfer.id).unwrap();
        assert_eq!(transfer.status, TransferStatus::RollbackReady);
        assert!(!transfer.rollback_in_flight);
    }

    #[tokio::test]
    async fn test_quote_fees_reads_source_chain() {
        let h = harness();
        h.icon.set_fee(ChainId::Archway, true, U256::from(40u64));
        h.icon.set_fee(ChainId::Archway, false, U256::from(25u64));

        let quote = h
            .relayer
            .quote_fees(ChainId::IconMainnet, ChainId::Archway)
            .await
            .unwrap();

        assert_eq!(
            quote,
            FeeQuote {
                no_rollback: U256::from(25u64),
                rollback: U256::from(40u64),
            }
        );
    }
}
