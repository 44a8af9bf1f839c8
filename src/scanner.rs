//! Event scanner
//!
//! Drives transfers forward by watching chains:
//!
//! - `SOURCE_TX_PENDING`: poll the source transaction until it is mined, then
//!   decode `CallMessageSent` from its logs.
//! - `AWAITING_CALL_MESSAGE` / `CALL_MESSAGE_RECEIVED`: scan destination
//!   blocks for `CallMessage` and `CallExecuted`.
//! - `ROLLBACK_REQUIRED`: scan source blocks for `RollbackMessage`.
//!
//! Block scans are gap-free and resume one past the transfer's cursor for
//! that chain. A block only counts as scanned once every transaction in it
//! has been read; anything less leaves the cursor where it is and the block
//! is retried on the next tick.
//!
//! RPC failures never fail a transfer. They are logged and treated as "no
//! event yet"; the next poll tries again.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Instrument};

use crate::adapter::{AdapterRegistry, ChainAdapter, TxLookup, TxResult, TxStatus};
use crate::chain::ChainId;
use crate::config::PollingConfig;
use crate::error::{Result, XCallError};
use crate::event::{extract_events, ExtractedEvent, XCallEvent, XCallEventType};
use crate::providers::TokioClock;
use crate::registry::{Anomaly, RegistryHandle, Transfer, TransferId, TransferStatus};
use crate::spans;
use crate::traits::Clock;

const DESTINATION_EVENTS: [XCallEventType; 2] =
    [XCallEventType::CallMessage, XCallEventType::CallExecuted];
const ROLLBACK_EVENTS: [XCallEventType; 2] = [
    XCallEventType::ResponseMessage,
    XCallEventType::RollbackMessage,
];

/// Result of reading one block
enum BlockScan {
    /// Every transaction was read
    Complete,
    /// The block or one of its transactions could not be read yet
    Incomplete,
}

/// Polls chains on behalf of registered transfers
#[derive(Clone)]
pub struct EventScanner {
    adapters: AdapterRegistry,
    registry: RegistryHandle,
    clock: Arc<dyn Clock>,
    config: PollingConfig,
}

impl std::fmt::Debug for EventScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScanner")
            .field("adapters", &self.adapters)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EventScanner {
    pub fn new(adapters: AdapterRegistry, registry: RegistryHandle) -> Self {
        Self {
            adapters,
            registry,
            clock: Arc::new(TokioClock::new()),
            config: PollingConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: PollingConfig) -> Self {
        self.config = config;
        self
    }

    fn transfer(&self, id: TransferId) -> Result<Transfer> {
        self.registry
            .get(id)
            .ok_or(XCallError::UnknownTransfer(id))
    }

    fn status(&self, id: TransferId) -> Result<TransferStatus> {
        Ok(self.transfer(id)?.status)
    }

    /// Runs one step for the transfer's current state and returns the
    /// resulting status
    pub async fn poll_once(&self, id: TransferId) -> Result<TransferStatus> {
        match self.status(id)? {
            TransferStatus::SourceTxPending => self.poll_source_transaction(id).await,
            TransferStatus::AwaitingCallMessage | TransferStatus::CallMessageReceived => {
                self.scan_destination(id).await
            }
            TransferStatus::RollbackRequired => self.scan_rollback(id).await,
            status => Ok(status),
        }
    }

    /// Polls every active transfer once. Transfers are independent, so one
    /// failing does not stop the others.
    pub async fn poll_active(&self) -> Vec<(TransferId, Result<TransferStatus>)> {
        let ids = self.registry.with(|registry| registry.active());
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push((id, self.poll_once(id).await));
        }
        results
    }

    /// Polls until the transfer no longer waits on a chain or `cancel` fires.
    ///
    /// Cancelling stops further polls at once and keeps every state change
    /// already recorded. There is no overall deadline: cross-chain delivery
    /// can legitimately take minutes.
    pub async fn track(&self, id: TransferId, cancel: CancellationToken) -> Result<TransferStatus> {
        let span = spans::track_transfer(id);
        async move {
            let mut polls: u64 = 0;
            loop {
                if cancel.is_cancelled() {
                    let status = self.status(id)?;
                    info!(
                        transfer_id = %id,
                        status = %status,
                        polls,
                        event = "tracking_cancelled"
                    );
                    return Ok(status);
                }

                let status = match self.poll_once(id).await {
                    Ok(status) => status,
                    Err(e) => {
                        spans::record_error(&e);
                        return Err(e);
                    }
                };
                polls += 1;
                if !status.awaits_chain() {
                    let span = tracing::Span::current();
                    span.record("polls", polls);
                    span.record("final_status", status.as_str());
                    info!(
                        transfer_id = %id,
                        status = %status,
                        polls,
                        event = "tracking_finished"
                    );
                    return Ok(status);
                }

                let interval = if status == TransferStatus::SourceTxPending {
                    self.config.tx_poll_interval
                } else {
                    self.config.block_poll_interval
                };
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = self.clock.sleep(interval) => {}
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Checks the source transaction and, once it is mined successfully,
    /// records its `CallMessageSent`
    pub async fn poll_source_transaction(&self, id: TransferId) -> Result<TransferStatus> {
        let transfer = self.transfer(id)?;
        if transfer.status != TransferStatus::SourceTxPending {
            return Ok(transfer.status);
        }
        let Some(hash) = transfer.source_hash().map(str::to_string) else {
            return Ok(transfer.status);
        };
        let adapter = self.adapters.get(transfer.source())?;
        let span = spans::poll_source_transaction(id, transfer.source(), &hash);

        async {
            let result = match adapter.fetch_transaction_result(&hash).await {
                Ok(TxLookup::Found(result)) => result,
                Ok(lookup) => {
                    trace!(transfer_id = %id, lookup = ?lookup, "Source transaction not mined yet");
                    return Ok(transfer.status);
                }
                Err(e) => {
                    warn!(
                        transfer_id = %id,
                        chain = %transfer.source(),
                        error = %e,
                        event = "source_transaction_poll_failed"
                    );
                    return Ok(transfer.status);
                }
            };

            let status = self
                .registry
                .with(|registry| registry.resolve_source_transaction(id, &result))?;
            if status == TransferStatus::SourceTxConfirmed {
                self.record_call_message_sent(id, adapter.as_ref(), &result)?;
            }
            self.status(id)
        }
        .instrument(span)
        .await
    }

    fn record_call_message_sent(
        &self,
        id: TransferId,
        adapter: &dyn ChainAdapter,
        result: &TxResult,
    ) -> Result<()> {
        let codec = adapter.codec();
        let chain = adapter.chain_id();
        let Some(log) = codec.find_event(
            &result.logs,
            XCallEventType::CallMessageSent,
            Some(adapter.xcall_address()),
        ) else {
            return self.registry.with(|registry| {
                registry.flag_anomaly(
                    id,
                    Anomaly::MissingCallMessageSent {
                        tx_hash: Some(result.hash.clone()),
                    },
                )
            });
        };

        match codec.decode(log, XCallEventType::CallMessageSent, chain) {
            Ok(event) => {
                info!(
                    transfer_id = %id,
                    chain = %chain,
                    sn = ?event.sn,
                    event = "call_message_sent_found"
                );
                self.apply(id, event)
            }
            Err(e) => self.flag_malformed(id, chain, XCallEventType::CallMessageSent, &e),
        }
    }

    /// Scans new destination blocks for `CallMessage` and `CallExecuted`
    pub async fn scan_destination(&self, id: TransferId) -> Result<TransferStatus> {
        let destination = self.transfer(id)?.destination();
        self.scan_chain(id, destination, &DESTINATION_EVENTS, |status| {
            matches!(
                status,
                TransferStatus::AwaitingCallMessage | TransferStatus::CallMessageReceived
            )
        })
        .await
    }

    /// Scans new source blocks for the `RollbackMessage` that makes a
    /// rollback executable
    pub async fn scan_rollback(&self, id: TransferId) -> Result<TransferStatus> {
        let source = self.transfer(id)?.source();
        self.scan_chain(id, source, &ROLLBACK_EVENTS, |status| {
            status == TransferStatus::RollbackRequired
        })
        .await
    }

    async fn scan_chain(
        &self,
        id: TransferId,
        chain: ChainId,
        event_types: &[XCallEventType],
        keep_scanning: fn(TransferStatus) -> bool,
    ) -> Result<TransferStatus> {
        let transfer = self.transfer(id)?;
        if !keep_scanning(transfer.status) {
            return Ok(transfer.status);
        }
        let adapter = self.adapters.get(chain)?;

        let latest = match adapter.fetch_block_height().await {
            Ok(height) => height,
            Err(e) => {
                warn!(
                    transfer_id = %id,
                    chain = %chain,
                    error = %e,
                    event = "block_height_poll_failed"
                );
                return Ok(transfer.status);
            }
        };
        let first = match transfer.next_height(chain) {
            Some(height) => height,
            None => {
                self.registry
                    .with(|registry| registry.set_start_height(id, chain, latest))?;
                latest
            }
        };
        if first > latest {
            trace!(transfer_id = %id, chain = %chain, latest, "No new blocks");
            return Ok(transfer.status);
        }

        let span = spans::scan_chain(id, chain, first, latest);
        async {
            for height in first..=latest {
                let scan = self
                    .scan_block(id, adapter.as_ref(), height, event_types)
                    .instrument(spans::scan_block(chain, height))
                    .await?;
                if let BlockScan::Incomplete = scan {
                    break;
                }
                self.registry
                    .with(|registry| registry.advance_cursor(id, chain, height))?;
                if !keep_scanning(self.status(id)?) {
                    break;
                }
            }
            self.status(id)
        }
        .instrument(span)
        .await
    }

    async fn scan_block(
        &self,
        id: TransferId,
        adapter: &dyn ChainAdapter,
        height: u64,
        event_types: &[XCallEventType],
    ) -> Result<BlockScan> {
        let chain = adapter.chain_id();
        let block = match adapter.fetch_block(height).await {
            Ok(Some(block)) => block,
            Ok(None) => {
                debug!(chain = %chain, height, event = "block_not_available");
                return Ok(BlockScan::Incomplete);
            }
            Err(e) => {
                warn!(
                    chain = %chain,
                    height,
                    error = %e,
                    event = "block_fetch_failed"
                );
                return Ok(BlockScan::Incomplete);
            }
        };
        if block.tx_hashes.is_empty() {
            trace!(chain = %chain, height, "Empty block");
            return Ok(BlockScan::Complete);
        }

        for hash in &block.tx_hashes {
            let result = match adapter.fetch_transaction_result(hash).await {
                Ok(TxLookup::Found(result)) => result,
                Ok(lookup) => {
                    debug!(
                        chain = %chain,
                        height,
                        tx_hash = %hash,
                        lookup = ?lookup,
                        event = "block_transaction_unavailable"
                    );
                    return Ok(BlockScan::Incomplete);
                }
                Err(e) => {
                    warn!(
                        chain = %chain,
                        height,
                        tx_hash = %hash,
                        error = %e,
                        event = "block_transaction_fetch_failed"
                    );
                    return Ok(BlockScan::Incomplete);
                }
            };
            if result.status != TxStatus::Success {
                continue;
            }

            let extracted = extract_events(
                adapter.codec(),
                &result.logs,
                event_types,
                Some(adapter.xcall_address()),
                chain,
            );
            for ExtractedEvent {
                log,
                event_type,
                decoded,
            } in extracted
            {
                match decoded {
                    Ok(event) => self.route(id, chain, event)?,
                    Err(e @ XCallError::Decode { .. }) => {
                        let salvaged = adapter.codec().salvage(log, event_type, chain);
                        self.route_malformed(id, chain, height, &result.hash, salvaged, &e)?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(BlockScan::Complete)
    }

    /// Flags a record that failed to decode, but only on the transfer its
    /// readable ids point to. Records that cannot be attributed are skipped.
    fn route_malformed(
        &self,
        id: TransferId,
        chain: ChainId,
        height: u64,
        tx_hash: &str,
        salvaged: XCallEvent,
        error: &XCallError,
    ) -> Result<()> {
        let owner = self
            .registry
            .with(|registry| registry.correlate(chain, &salvaged));
        if owner == Some(id) {
            return self.flag_malformed(id, chain, salvaged.event_type, error);
        }
        warn!(
            chain = %chain,
            height,
            tx_hash = %tx_hash,
            event_type = %salvaged.event_type,
            error = %error,
            event = "malformed_event_skipped"
        );
        Ok(())
    }

    /// Applies `event` if it correlates to the transfer being scanned
    fn route(&self, id: TransferId, chain: ChainId, event: XCallEvent) -> Result<()> {
        let owner = self
            .registry
            .with(|registry| registry.correlate(chain, &event));
        match owner {
            Some(owner) if owner == id => {
                info!(
                    transfer_id = %id,
                    chain = %chain,
                    event_type = %event.event_type,
                    sn = ?event.sn,
                    req_id = ?event.req_id,
                    event = "xcall_event_found"
                );
                self.apply(id, event)
            }
            _ => {
                trace!(
                    chain = %chain,
                    event_type = %event.event_type,
                    "Event belongs to another transfer"
                );
                Ok(())
            }
        }
    }

    fn apply(&self, id: TransferId, event: XCallEvent) -> Result<()> {
        let chain = event.origin_chain;
        let event_type = event.event_type;
        match self
            .registry
            .with(|registry| registry.record_event(id, event))
        {
            Ok(outcome) => {
                debug!(
                    transfer_id = %id,
                    event_type = %event_type,
                    outcome = ?outcome,
                    event = "xcall_event_recorded"
                );
                Ok(())
            }
            Err(e @ XCallError::Decode { .. }) => self.flag_malformed(id, chain, event_type, &e),
            Err(e) => Err(e),
        }
    }

    fn flag_malformed(
        &self,
        id: TransferId,
        chain: ChainId,
        event: XCallEventType,
        error: &XCallError,
    ) -> Result<()> {
        self.registry.with(|registry| {
            registry.flag_anomaly(
                id,
                Anomaly::MalformedEvent {
                    event,
                    chain,
                    reason: error.to_string(),
                },
            )
        })
    }
}
