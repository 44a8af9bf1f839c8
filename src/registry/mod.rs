//! Transfer registry
//!
//! The registry is the single writer for every [`Transfer`]. Scanners and
//! the relayer read snapshots and request changes through its operations;
//! every change is guarded by the record's current state, so replaying an
//! event or a poll result is harmless.
//!
//! Correlation goes through two explicit indexes: `(source chain, sn)` and
//! `(destination chain, reqId)`. Sequence numbers from different chains are
//! never compared with each other.
//!
//! # Example
//!
//! ```rust
//! use alloy_primitives::U256;
//! use xcall_relay::{ChainId, TransferAsset, TransferIntent, TransferRegistry, TransferStatus};
//!
//! let mut registry = TransferRegistry::new();
//! let transfer = registry.create(
//!     TransferIntent::builder()
//!         .source(ChainId::IconMainnet)
//!         .destination(ChainId::Archway)
//!         .asset(TransferAsset::BnUsd)
//!         .amount(U256::from(10u64))
//!         .recipient("archway1recipient".to_string())
//!         .account("hx0000000000000000000000000000000000000001".to_string())
//!         .fee(U256::from(1u64))
//!         .build(),
//! );
//! assert_eq!(transfer.status, TransferStatus::Created);
//! assert!(registry
//!     .transition(transfer.id, TransferStatus::CallExecuted)
//!     .is_err());
//! ```

mod transfer;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use alloy_primitives::U256;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::adapter::{Transaction, TransferIntent, TxResult, TxStatus};
use crate::chain::{ChainId, NetworkAddress};
use crate::error::{Result, XCallError};
use crate::event::{XCallEvent, XCallEventType};

pub use transfer::{Anomaly, Transfer, TransferId, TransferPhase, TransferStatus};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Status change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferUpdate {
    pub id: TransferId,
    pub status: TransferStatus,
}

/// What `record_event` did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The event was stored; carries the resulting status
    Applied(TransferStatus),
    /// The same event was already recorded
    Duplicate,
    /// The event arrived before the state it depends on; it is held and
    /// applied once that state is reached
    Deferred,
    /// The event does not belong to this transfer, or the transfer has
    /// already finished
    Ignored,
}

/// In-memory record of every tracked transfer
#[derive(Debug)]
pub struct TransferRegistry {
    transfers: HashMap<TransferId, Transfer>,
    sn_index: HashMap<(ChainId, U256), TransferId>,
    req_index: HashMap<(ChainId, U256), TransferId>,
    updates: broadcast::Sender<TransferUpdate>,
}

impl Default for TransferRegistry {
    fn default() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            transfers: HashMap::new(),
            sn_index: HashMap::new(),
            req_index: HashMap::new(),
            updates,
        }
    }
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, intent: TransferIntent) -> Transfer {
        let transfer = Transfer::new(intent);
        info!(
            transfer_id = %transfer.id,
            source = %transfer.source(),
            destination = %transfer.destination(),
            event = "transfer_created"
        );
        self.notify(transfer.id, transfer.status);
        self.transfers.insert(transfer.id, transfer.clone());
        transfer
    }

    pub fn get(&self, id: TransferId) -> Option<Transfer> {
        self.transfers.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Ids of transfers that have not reached a terminal state
    pub fn active(&self) -> Vec<TransferId> {
        let mut ids: Vec<_> = self
            .transfers
            .values()
            .filter(|transfer| !transfer.is_terminal())
            .map(|transfer| transfer.id)
            .collect();
        ids.sort();
        ids
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferUpdate> {
        self.updates.subscribe()
    }

    /// Drops a finished transfer (or one that never left `CREATED`) and
    /// its index entries
    pub fn remove(&mut self, id: TransferId) -> Result<Transfer> {
        let transfer = self.record(id)?;
        if !transfer.is_terminal() && transfer.status != TransferStatus::Created {
            return Err(XCallError::TransferActive {
                id,
                status: transfer.status,
            });
        }
        self.sn_index.retain(|_, owner| *owner != id);
        self.req_index.retain(|_, owner| *owner != id);
        debug!(transfer_id = %id, event = "transfer_removed");
        self.transfers
            .remove(&id)
            .ok_or(XCallError::UnknownTransfer(id))
    }

    /// Moves a transfer to `next`.
    ///
    /// # Errors
    ///
    /// [`XCallError::InvalidTransition`] when `next` is not reachable from
    /// the current state, including any move out of a terminal state.
    pub fn transition(&mut self, id: TransferId, next: TransferStatus) -> Result<Transfer> {
        let transfer = self.record_mut(id)?;
        let from = transfer.status;
        if !from.can_transition_to(next) {
            return Err(XCallError::InvalidTransition { id, from, to: next });
        }
        transfer.status = next;
        let snapshot = transfer.clone();
        info!(
            transfer_id = %id,
            from = %from,
            to = %next,
            event = "transfer_transitioned"
        );
        self.notify(id, next);
        Ok(snapshot)
    }

    /// Records the first scan height for `chain`. Ignored once scanning on
    /// that chain has started.
    pub fn set_start_height(&mut self, id: TransferId, chain: ChainId, height: u64) -> Result<()> {
        let transfer = self.record_mut(id)?;
        if transfer.cursors.contains_key(&chain) {
            return Ok(());
        }
        transfer.start_heights.insert(chain, height);
        Ok(())
    }

    /// Stores the submitted source transaction. The transfer only becomes
    /// pending when the submission produced a hash.
    ///
    /// # Errors
    ///
    /// [`XCallError::InvalidTransition`] unless the transfer is still
    /// `CREATED`; the record is left untouched.
    pub fn record_submission(&mut self, id: TransferId, tx: Transaction) -> Result<Transfer> {
        let transfer = self.record_mut(id)?;
        if transfer.status != TransferStatus::Created {
            return Err(XCallError::InvalidTransition {
                id,
                from: transfer.status,
                to: TransferStatus::SourceTxPending,
            });
        }
        let has_hash = tx.hash.is_some();
        transfer.source_transaction = Some(tx);
        if has_hash {
            self.transition(id, TransferStatus::SourceTxPending)
        } else {
            warn!(transfer_id = %id, event = "submission_without_hash");
            self.record(id).cloned()
        }
    }

    /// Applies the mined source transaction result. No-op unless the
    /// transfer is still `SOURCE_TX_PENDING`.
    pub fn resolve_source_transaction(
        &mut self,
        id: TransferId,
        result: &TxResult,
    ) -> Result<TransferStatus> {
        let transfer = self.record_mut(id)?;
        if transfer.status != TransferStatus::SourceTxPending {
            return Ok(transfer.status);
        }
        if let Some(tx) = transfer.source_transaction.as_mut() {
            tx.resolve(result);
        }
        let next = match result.status {
            TxStatus::Success => TransferStatus::SourceTxConfirmed,
            TxStatus::Failure => TransferStatus::SourceTxFailed,
            TxStatus::Pending => return Ok(TransferStatus::SourceTxPending),
        };
        Ok(self.transition(id, next)?.status)
    }

    /// Claims the rollback of a `ROLLBACK_READY` transfer so that only one
    /// rollback transaction is submitted at a time.
    ///
    /// # Errors
    ///
    /// [`XCallError::InvalidTransition`] outside `ROLLBACK_READY`, and
    /// [`XCallError::RollbackInFlight`] when another rollback is pending.
    pub fn begin_rollback(&mut self, id: TransferId) -> Result<Transfer> {
        let transfer = self.record_mut(id)?;
        if transfer.status != TransferStatus::RollbackReady {
            return Err(XCallError::InvalidTransition {
                id,
                from: transfer.status,
                to: TransferStatus::RollbackExecuted,
            });
        }
        if transfer.rollback_in_flight {
            return Err(XCallError::RollbackInFlight { id });
        }
        transfer.rollback_in_flight = true;
        debug!(transfer_id = %id, event = "rollback_claimed");
        Ok(transfer.clone())
    }

    /// Releases a rollback claim whose transaction was never sent
    pub fn abort_rollback(&mut self, id: TransferId) -> Result<()> {
        self.record_mut(id)?.rollback_in_flight = false;
        Ok(())
    }

    /// Stores the rollback transaction and, once it succeeded, finishes the
    /// transfer. Releases the rollback claim.
    ///
    /// # Errors
    ///
    /// [`XCallError::InvalidTransition`] unless the transfer is
    /// `ROLLBACK_READY`; the record is left untouched.
    pub fn record_rollback(&mut self, id: TransferId, tx: Transaction) -> Result<Transfer> {
        let transfer = self.record_mut(id)?;
        if transfer.status != TransferStatus::RollbackReady {
            return Err(XCallError::InvalidTransition {
                id,
                from: transfer.status,
                to: TransferStatus::RollbackExecuted,
            });
        }
        let succeeded = tx.status == TxStatus::Success;
        transfer.rollback_transaction = Some(tx);
        transfer.rollback_in_flight = false;
        if succeeded {
            self.transition(id, TransferStatus::RollbackExecuted)
        } else {
            self.record(id).cloned()
        }
    }

    pub fn flag_anomaly(&mut self, id: TransferId, anomaly: Anomaly) -> Result<()> {
        let transfer = self.record_mut(id)?;
        if transfer.anomalies.contains(&anomaly) {
            return Ok(());
        }
        warn!(
            transfer_id = %id,
            anomaly = ?anomaly,
            event = "transfer_anomaly_flagged"
        );
        transfer.anomalies.push(anomaly);
        Ok(())
    }

    pub fn anomalies(&self, id: TransferId) -> Result<Vec<Anomaly>> {
        Ok(self.record(id)?.anomalies.clone())
    }

    pub fn phase(&self, id: TransferId) -> Result<TransferPhase> {
        Ok(self.record(id)?.phase())
    }

    /// Applies a decoded protocol event.
    ///
    /// Idempotent: a replayed event is reported as [`RecordOutcome::Duplicate`]
    /// and changes nothing. Events whose prerequisite has not been recorded
    /// yet are held and re-applied after the next successful application.
    ///
    /// # Errors
    ///
    /// [`XCallError::Decode`] when the event lacks the field it is
    /// correlated by.
    pub fn record_event(&mut self, id: TransferId, event: XCallEvent) -> Result<RecordOutcome> {
        let outcome = self.apply_event(id, event)?;
        if matches!(outcome, RecordOutcome::Applied(_)) {
            self.drain_deferred(id)?;
            let status = self.record(id)?.status;
            return Ok(RecordOutcome::Applied(status));
        }
        Ok(outcome)
    }

    /// Finds the transfer an event observed on `chain` belongs to
    pub fn correlate(&self, chain: ChainId, event: &XCallEvent) -> Option<TransferId> {
        match event.event_type {
            XCallEventType::CallMessageSent
            | XCallEventType::RollbackMessage
            | XCallEventType::ResponseMessage => {
                let sn = event.sn?;
                self.sn_index.get(&(chain, sn)).copied()
            }
            XCallEventType::CallMessage => self.correlate_call_message(chain, event),
            XCallEventType::CallExecuted => {
                let req_id = event.req_id?;
                self.req_index.get(&(chain, req_id)).copied()
            }
        }
    }

    /// Advances the scan cursor for `chain` to `height`.
    ///
    /// # Errors
    ///
    /// [`XCallError::InvalidCursor`] when `height` is not exactly one past
    /// the last scanned height.
    pub fn advance_cursor(&mut self, id: TransferId, chain: ChainId, height: u64) -> Result<()> {
        let transfer = self.record_mut(id)?;
        if let Some(last) = transfer.cursor(chain) {
            if height != last + 1 {
                return Err(XCallError::InvalidCursor {
                    id,
                    chain,
                    last,
                    requested: height,
                });
            }
        }
        transfer.cursors.insert(chain, height);
        Ok(())
    }

    fn correlate_call_message(&self, chain: ChainId, event: &XCallEvent) -> Option<TransferId> {
        let sn = event.sn?;
        if let Some(from) = event.from.as_deref() {
            let source = from.parse::<NetworkAddress>().ok()?.chain;
            return self
                .sn_index
                .get(&(source, sn))
                .copied()
                .filter(|id| self.destination_of(*id) == Some(chain));
        }

        // EVM destinations only index the hash of the sender's network
        // address, which still pins the source chain.
        let digest = event.from_digest?;
        let mut owners = self
            .sn_index
            .iter()
            .filter(|((_, indexed_sn), _)| *indexed_sn == sn)
            .map(|(_, id)| *id)
            .filter(|id| {
                self.transfers.get(id).is_some_and(|transfer| {
                    transfer.destination() == chain && transfer.sender_digests().contains(&digest)
                })
            });
        let owner = owners.next()?;
        if owners.next().is_some() {
            warn!(
                chain = %chain,
                sn = %sn,
                event = "call_message_correlation_ambiguous"
            );
            return None;
        }
        Some(owner)
    }

    fn destination_of(&self, id: TransferId) -> Option<ChainId> {
        self.transfers.get(&id).map(Transfer::destination)
    }

    fn apply_event(&mut self, id: TransferId, event: XCallEvent) -> Result<RecordOutcome> {
        let transfer = self.record_mut(id)?;
        let event_type = event.event_type;

        if let Some(existing) = transfer.events.get(&event_type) {
            if existing.same_payload(&event) {
                debug!(transfer_id = %id, event_type = %event_type, event = "duplicate_event");
                return Ok(RecordOutcome::Duplicate);
            }
            let anomaly = Anomaly::ConflictingEvent { event: event_type };
            self.flag_anomaly(id, anomaly)?;
            return Ok(RecordOutcome::Ignored);
        }
        if transfer.is_terminal() {
            return Ok(RecordOutcome::Ignored);
        }

        let status = transfer.status;
        match event_type {
            XCallEventType::CallMessageSent => {
                let sn = crate::event::require_sn(&event)?;
                match status {
                    TransferStatus::SourceTxConfirmed => {
                        let source = transfer.source();
                        transfer.events.insert(event_type, event);
                        self.sn_index.insert((source, sn), id);
                        self.transition(id, TransferStatus::AwaitingCallMessage)?;
                        Ok(RecordOutcome::Applied(TransferStatus::AwaitingCallMessage))
                    }
                    _ => Ok(self.defer(id, event)),
                }
            }
            XCallEventType::CallMessage => {
                let sn = crate::event::require_sn(&event)?;
                let req_id = crate::event::require_req_id(&event)?;
                match (status, transfer.sn()) {
                    (TransferStatus::AwaitingCallMessage, Some(expected)) if expected == sn => {
                        let destination = transfer.destination();
                        transfer.events.insert(event_type, event);
                        self.req_index.insert((destination, req_id), id);
                        self.transition(id, TransferStatus::CallMessageReceived)?;
                        Ok(RecordOutcome::Applied(TransferStatus::CallMessageReceived))
                    }
                    (_, Some(expected)) if expected != sn => Ok(self.mismatch(id, &event)),
                    _ => Ok(self.defer(id, event)),
                }
            }
            XCallEventType::CallExecuted => {
                let req_id = crate::event::require_req_id(&event)?;
                let outcome = crate::event::require_outcome(&event)?.clone();
                match (status, transfer.req_id()) {
                    (TransferStatus::CallMessageReceived, Some(expected)) if expected == req_id => {
                        transfer.events.insert(event_type, event);
                        if outcome.is_success() {
                            self.transition(id, TransferStatus::CallExecuted)?;
                        } else {
                            self.transition(id, TransferStatus::ExecutionFailed)?;
                            if outcome.has_revert_indicator() {
                                self.transition(id, TransferStatus::RollbackRequired)?;
                            }
                        }
                        Ok(RecordOutcome::Applied(self.record(id)?.status))
                    }
                    (_, Some(expected)) if expected != req_id => Ok(self.mismatch(id, &event)),
                    _ => Ok(self.defer(id, event)),
                }
            }
            XCallEventType::RollbackMessage => {
                let sn = crate::event::require_sn(&event)?;
                match (status, transfer.sn()) {
                    (_, Some(expected)) if expected != sn => Ok(self.mismatch(id, &event)),
                    (TransferStatus::RollbackRequired, Some(_)) => {
                        transfer.events.insert(event_type, event);
                        self.transition(id, TransferStatus::RollbackReady)?;
                        Ok(RecordOutcome::Applied(TransferStatus::RollbackReady))
                    }
                    _ => Ok(self.defer(id, event)),
                }
            }
            XCallEventType::ResponseMessage => {
                let sn = crate::event::require_sn(&event)?;
                match transfer.sn() {
                    Some(expected) if expected == sn => {
                        transfer.events.insert(event_type, event);
                        Ok(RecordOutcome::Applied(status))
                    }
                    Some(_) => Ok(self.mismatch(id, &event)),
                    None => Ok(self.defer(id, event)),
                }
            }
        }
    }

    fn defer(&mut self, id: TransferId, event: XCallEvent) -> RecordOutcome {
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return RecordOutcome::Ignored;
        };
        if transfer.deferred.iter().any(|held| held.same_payload(&event)) {
            return RecordOutcome::Deferred;
        }
        warn!(
            transfer_id = %id,
            event_type = %event.event_type,
            status = %transfer.status,
            event = "event_deferred"
        );
        transfer.deferred.push(event);
        RecordOutcome::Deferred
    }

    fn mismatch(&self, id: TransferId, event: &XCallEvent) -> RecordOutcome {
        warn!(
            transfer_id = %id,
            event_type = %event.event_type,
            sn = ?event.sn,
            req_id = ?event.req_id,
            event = "event_correlation_mismatch"
        );
        RecordOutcome::Ignored
    }

    fn drain_deferred(&mut self, id: TransferId) -> Result<()> {
        loop {
            let held = std::mem::take(&mut self.record_mut(id)?.deferred);
            if held.is_empty() {
                return Ok(());
            }
            let mut progressed = false;
            for event in held {
                if let RecordOutcome::Applied(_) = self.apply_event(id, event)? {
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    fn notify(&self, id: TransferId, status: TransferStatus) {
        // No receivers is fine; updates are best effort.
        let _ = self.updates.send(TransferUpdate { id, status });
    }

    fn record(&self, id: TransferId) -> Result<&Transfer> {
        self.transfers
            .get(&id)
            .ok_or(XCallError::UnknownTransfer(id))
    }

    fn record_mut(&mut self, id: TransferId) -> Result<&mut Transfer> {
        self.transfers
            .get_mut(&id)
            .ok_or(XCallError::UnknownTransfer(id))
    }
}

/// Shared handle to one [`TransferRegistry`]
///
/// The lock is only ever held inside [`RegistryHandle::with`], never across
/// an `.await`.
#[derive(Debug, Clone, Default)]
pub struct RegistryHandle {
    inner: Arc<Mutex<TransferRegistry>>,
}

impl RegistryHandle {
    pub fn new(registry: TransferRegistry) -> Self {
        Self {
            inner: Arc::new(Mutex::new(registry)),
        }
    }

    /// Runs `f` with exclusive access to the registry
    pub fn with<R>(&self, f: impl FnOnce(&mut TransferRegistry) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn get(&self, id: TransferId) -> Option<Transfer> {
        self.with(|registry| registry.get(id))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferUpdate> {
        self.with(|registry| registry.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::TransferAsset;
    use crate::event::ExecutionOutcome;

    fn intent() -> TransferIntent {
        TransferIntent::builder()
            .source(ChainId::IconMainnet)
            .destination(ChainId::Archway)
            .asset(TransferAsset::BnUsd)
            .amount(U256::from(100u64))
            .recipient("archway1recipient".to_string())
            .account("hx0000000000000000000000000000000000000001".to_string())
            .fee(U256::from(1u64))
            .build()
    }

    fn mined(status: TxStatus) -> TxResult {
        TxResult {
            hash: "0xsource".to_string(),
            status,
            logs: vec![],
            raw: serde_json::json!({}),
        }
    }

    fn sent(sn: u64) -> XCallEvent {
        XCallEvent::new(XCallEventType::CallMessageSent, ChainId::IconMainnet)
            .with_sn(U256::from(sn))
    }

    fn call_message(sn: u64, req_id: u64) -> XCallEvent {
        XCallEvent::new(XCallEventType::CallMessage, ChainId::Archway)
            .with_from("0x1.icon/cxa07f426062a1384bdd762afa6a87d123fbc81c75")
            .with_sn(U256::from(sn))
            .with_req_id(U256::from(req_id))
    }

    fn executed(req_id: u64, code: i64, message: &str) -> XCallEvent {
        XCallEvent::new(XCallEventType::CallExecuted, ChainId::Archway)
            .with_req_id(U256::from(req_id))
            .with_outcome(ExecutionOutcome::new(code, message))
    }

    /// A transfer whose source transaction has been mined successfully
    fn confirmed(registry: &mut TransferRegistry) -> TransferId {
        let id = registry.create(intent()).id;
        registry
            .record_submission(
                id,
                Transaction::submitted(ChainId::IconMainnet, Some("0xsource".to_string())),
            )
            .unwrap();
        registry
            .resolve_source_transaction(id, &mined(TxStatus::Success))
            .unwrap();
        id
    }

    #[test]
    fn test_call_message_sent_moves_to_awaiting_and_stores_sn() {
        let mut registry = TransferRegistry::new();
        let id = confirmed(&mut registry);

        let outcome = registry.record_event(id, sent(42)).unwrap();

        assert_eq!(
            outcome,
            RecordOutcome::Applied(TransferStatus::AwaitingCallMessage)
        );
        let transfer = registry.get(id).unwrap();
        assert_eq!(transfer.sn(), Some(U256::from(42u64)));
        assert_eq!(
            transfer.event(XCallEventType::CallMessageSent).unwrap().sn,
            Some(U256::from(42u64))
        );
    }

    #[test]
    fn test_replayed_event_is_idempotent() {
        let mut registry = TransferRegistry::new();
        let id = confirmed(&mut registry);

        registry.record_event(id, sent(42)).unwrap();
        let before = registry.get(id).unwrap();
        let outcome = registry.record_event(id, sent(42)).unwrap();

        assert_eq!(outcome, RecordOutcome::Duplicate);
        assert_eq!(registry.get(id).unwrap(), before);
    }

    #[test]
    fn test_successful_execution_completes() {
        let mut registry = TransferRegistry::new();
        let id = confirmed(&mut registry);
        registry.record_event(id, sent(42)).unwrap();
        registry.record_event(id, call_message(42, 7)).unwrap();

        let outcome = registry.record_event(id, executed(7, 1, "")).unwrap();

        assert_eq!(outcome, RecordOutcome::Applied(TransferStatus::CallExecuted));
        assert_eq!(registry.get(id).unwrap().phase(), TransferPhase::Complete);
    }

    #[test]
    fn test_reverted_execution_requires_rollback() {
        let mut registry = TransferRegistry::new();
        let id = confirmed(&mut registry);
        registry.record_event(id, sent(42)).unwrap();
        registry.record_event(id, call_message(42, 7)).unwrap();

        let outcome = registry
            .record_event(id, executed(7, 0, "execution reverted"))
            .unwrap();

        assert_eq!(
            outcome,
            RecordOutcome::Applied(TransferStatus::RollbackRequired)
        );

        let rollback = XCallEvent::new(XCallEventType::RollbackMessage, ChainId::IconMainnet)
            .with_sn(U256::from(42u64));
        let outcome = registry.record_event(id, rollback).unwrap();
        assert_eq!(outcome, RecordOutcome::Applied(TransferStatus::RollbackReady));
    }

    #[test]
    fn test_failure_without_revert_indicator_stops_at_execution_failed() {
        let mut registry = TransferRegistry::new();
        let id = confirmed(&mut registry);
        registry.record_event(id, sent(42)).unwrap();
        registry.record_event(id, call_message(42, 7)).unwrap();

        registry.record_event(id, executed(7, 0, "")).unwrap();

        let transfer = registry.get(id).unwrap();
        assert_eq!(transfer.status, TransferStatus::ExecutionFailed);
        assert_eq!(transfer.phase(), TransferPhase::Failed);
    }

    #[test]
    fn test_out_of_order_execution_is_deferred_then_applied() {
        let mut registry = TransferRegistry::new();
        let id = confirmed(&mut registry);
        registry.record_event(id, sent(42)).unwrap();

        let early = registry.record_event(id, executed(7, 1, "")).unwrap();
        assert_eq!(early, RecordOutcome::Deferred);
        assert_eq!(
            registry.get(id).unwrap().status,
            TransferStatus::AwaitingCallMessage
        );

        let outcome = registry.record_event(id, call_message(42, 7)).unwrap();
        assert_eq!(outcome, RecordOutcome::Applied(TransferStatus::CallExecuted));
    }

    #[test]
    fn test_call_message_for_other_sn_is_ignored() {
        let mut registry = TransferRegistry::new();
        let id = confirmed(&mut registry);
        registry.record_event(id, sent(42)).unwrap();

        let outcome = registry.record_event(id, call_message(43, 7)).unwrap();

        assert_eq!(outcome, RecordOutcome::Ignored);
        assert_eq!(
            registry.get(id).unwrap().status,
            TransferStatus::AwaitingCallMessage
        );
    }

    #[test]
    fn test_terminal_state_rejects_transitions() {
        let mut registry = TransferRegistry::new();
        let id = registry.create(intent()).id;
        registry
            .record_submission(
                id,
                Transaction::submitted(ChainId::IconMainnet, Some("0xsource".to_string())),
            )
            .unwrap();
        registry
            .resolve_source_transaction(id, &mined(TxStatus::Failure))
            .unwrap();

        let err = registry
            .transition(id, TransferStatus::SourceTxConfirmed)
            .unwrap_err();
        insta::assert_snapshot!(
            err.to_string().replace(&id.to_string(), "<id>"),
            @"Invalid transition for transfer <id>: SOURCE_TX_FAILED -> SOURCE_TX_CONFIRMED"
        );
        assert_eq!(
            registry.record_event(id, sent(1)).unwrap(),
            RecordOutcome::Ignored
        );
    }

    #[test]
    fn test_submission_without_hash_stays_created() {
        let mut registry = TransferRegistry::new();
        let id = registry.create(intent()).id;

        let transfer = registry
            .record_submission(id, Transaction::submitted(ChainId::IconMainnet, None))
            .unwrap();

        assert_eq!(transfer.status, TransferStatus::Created);
    }

    #[test]
    fn test_correlation_indexes() {
        let mut registry = TransferRegistry::new();
        let id = confirmed(&mut registry);
        registry.record_event(id, sent(42)).unwrap();
        registry.record_event(id, call_message(42, 7)).unwrap();

        assert_eq!(
            registry.correlate(ChainId::Archway, &call_message(42, 7)),
            Some(id)
        );
        assert_eq!(
            registry.correlate(ChainId::Archway, &executed(7, 1, "")),
            Some(id)
        );
        // reqId is scoped to the destination chain
        assert_eq!(
            registry.correlate(ChainId::Avalanche, &executed(7, 1, "")),
            None
        );
        // sn is scoped to the source chain
        let foreign = XCallEvent::new(XCallEventType::CallMessage, ChainId::Archway)
            .with_from("0xa86a.avax/0x1234567890123456789012345678901234567890")
            .with_sn(U256::from(42u64))
            .with_req_id(U256::from(8u64));
        assert_eq!(registry.correlate(ChainId::Archway, &foreign), None);
    }

    #[test]
    fn test_cursor_rejects_gaps_and_rewinds() {
        let mut registry = TransferRegistry::new();
        let id = registry.create(intent()).id;

        registry.advance_cursor(id, ChainId::Archway, 100).unwrap();
        registry.advance_cursor(id, ChainId::Archway, 101).unwrap();

        assert!(matches!(
            registry.advance_cursor(id, ChainId::Archway, 101),
            Err(XCallError::InvalidCursor { last: 101, requested: 101, .. })
        ));
        assert!(matches!(
            registry.advance_cursor(id, ChainId::Archway, 103),
            Err(XCallError::InvalidCursor { last: 101, requested: 103, .. })
        ));
        assert_eq!(registry.get(id).unwrap().next_height(ChainId::Archway), Some(102));
    }

    #[test]
    fn test_missing_sent_event_is_anomalous() {
        let mut registry = TransferRegistry::new();
        let id = confirmed(&mut registry);

        registry
            .flag_anomaly(
                id,
                Anomaly::MissingCallMessageSent {
                    tx_hash: Some("0xsource".to_string()),
                },
            )
            .unwrap();

        assert_eq!(registry.phase(id).unwrap(), TransferPhase::Anomalous);
        assert_eq!(registry.anomalies(id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let mut registry = TransferRegistry::new();
        let mut updates = registry.subscribe();
        let id = confirmed(&mut registry);

        let statuses: Vec<_> = std::iter::from_fn(|| updates.try_recv().ok())
            .map(|update| update.status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                TransferStatus::Created,
                TransferStatus::SourceTxPending,
                TransferStatus::SourceTxConfirmed
            ]
        );
        assert_eq!(registry.active(), vec![id]);
    }

    /// A transfer from `source` to Avalanche whose `CallMessageSent` from
    /// `sender` carried `sn`
    fn sent_to_avalanche(
        registry: &mut TransferRegistry,
        source: ChainId,
        sender: &str,
        sn: u64,
    ) -> TransferId {
        let id = registry
            .create(
                TransferIntent::builder()
                    .source(source)
                    .destination(ChainId::Avalanche)
                    .asset(TransferAsset::BnUsd)
                    .amount(U256::from(100u64))
                    .recipient("0x0000000000000000000000000000000000000002".to_string())
                    .account(sender.to_string())
                    .fee(U256::from(1u64))
                    .build(),
            )
            .id;
        registry
            .record_submission(
                id,
                Transaction::submitted(source, Some("0xsource".to_string())),
            )
            .unwrap();
        registry
            .resolve_source_transaction(id, &mined(TxStatus::Success))
            .unwrap();
        registry
            .record_event(
                id,
                XCallEvent::new(XCallEventType::CallMessageSent, source)
                    .with_from(sender)
                    .with_sn(U256::from(sn)),
            )
            .unwrap();
        id
    }

    #[test]
    fn test_hashed_sender_picks_the_right_source_for_shared_sn() {
        let mut registry = TransferRegistry::new();
        let from_icon = sent_to_avalanche(
            &mut registry,
            ChainId::IconMainnet,
            "hx0000000000000000000000000000000000000001",
            5,
        );
        let from_archway =
            sent_to_avalanche(&mut registry, ChainId::Archway, "archway1sender", 5);
        let delivered = |network_address: &str| {
            XCallEvent::new(XCallEventType::CallMessage, ChainId::Avalanche)
                .with_sn(U256::from(5u64))
                .with_req_id(U256::from(3u64))
                .with_from_digest(alloy_primitives::keccak256(network_address.as_bytes()))
        };

        assert_eq!(
            registry.correlate(ChainId::Avalanche, &delivered("archway-1/archway1sender")),
            Some(from_archway)
        );
        assert_eq!(
            registry.correlate(
                ChainId::Avalanche,
                &delivered("0x1.icon/hx0000000000000000000000000000000000000001")
            ),
            Some(from_icon)
        );
        assert_eq!(
            registry.correlate(ChainId::Avalanche, &delivered("archway-1/archway1stranger")),
            None
        );
        let unhashed = XCallEvent::new(XCallEventType::CallMessage, ChainId::Avalanche)
            .with_sn(U256::from(5u64));
        assert_eq!(registry.correlate(ChainId::Avalanche, &unhashed), None);
    }

    #[test]
    fn test_late_writes_leave_the_record_untouched() {
        let mut registry = TransferRegistry::new();
        let id = confirmed(&mut registry);
        let before = registry.get(id).unwrap();

        let resubmitted = registry.record_submission(
            id,
            Transaction::submitted(ChainId::IconMainnet, Some("0xother".to_string())),
        );
        assert!(matches!(
            resubmitted,
            Err(XCallError::InvalidTransition {
                from: TransferStatus::SourceTxConfirmed,
                ..
            })
        ));

        let rollback = registry.record_rollback(
            id,
            Transaction::submitted(ChainId::IconMainnet, Some("0xrollback".to_string())),
        );
        assert!(matches!(
            rollback,
            Err(XCallError::InvalidTransition { .. })
        ));
        assert_eq!(registry.get(id).unwrap(), before);
        assert!(registry.get(id).unwrap().rollback_transaction.is_none());
    }

    /// A transfer whose rollback can be executed
    fn rollback_ready(registry: &mut TransferRegistry) -> TransferId {
        let id = confirmed(registry);
        registry.record_event(id, sent(42)).unwrap();
        registry.record_event(id, call_message(42, 7)).unwrap();
        registry
            .record_event(id, executed(7, 0, "execution reverted"))
            .unwrap();
        registry
            .record_event(
                id,
                XCallEvent::new(XCallEventType::RollbackMessage, ChainId::IconMainnet)
                    .with_sn(U256::from(42u64)),
            )
            .unwrap();
        id
    }

    #[test]
    fn test_only_one_rollback_claim_at_a_time() {
        let mut registry = TransferRegistry::new();
        let id = rollback_ready(&mut registry);

        assert!(registry.begin_rollback(id).unwrap().rollback_in_flight);
        assert!(matches!(
            registry.begin_rollback(id),
            Err(XCallError::RollbackInFlight { id: claimed }) if claimed == id
        ));

        registry.abort_rollback(id).unwrap();
        registry.begin_rollback(id).unwrap();
        let failed = Transaction {
            status: TxStatus::Failure,
            ..Transaction::submitted(ChainId::IconMainnet, Some("0xrollback".to_string()))
        };
        let transfer = registry.record_rollback(id, failed).unwrap();
        assert_eq!(transfer.status, TransferStatus::RollbackReady);
        assert!(!transfer.rollback_in_flight);
        registry.begin_rollback(id).unwrap();
    }

    #[test]
    fn test_rollback_claim_requires_rollback_ready() {
        let mut registry = TransferRegistry::new();
        let id = confirmed(&mut registry);

        assert!(matches!(
            registry.begin_rollback(id),
            Err(XCallError::InvalidTransition { .. })
        ));
        assert!(!registry.get(id).unwrap().rollback_in_flight);
    }

    #[test]
    fn test_remove_only_finished_transfers() {
        let mut registry = TransferRegistry::new();
        let id = confirmed(&mut registry);

        assert!(matches!(
            registry.remove(id),
            Err(XCallError::TransferActive { .. })
        ));

        let untouched = registry.create(intent()).id;
        registry.remove(untouched).unwrap();
        assert!(registry.get(untouched).is_none());
    }
}
