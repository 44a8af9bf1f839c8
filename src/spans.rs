//! OpenTelemetry span helpers for relay operations
//!
//! Static span names with structured attributes, kept separate from the
//! relay logic. The relayer and scanner use them internally; they are public
//! so applications can wrap their own calls in the same span tree.
//!
//! # Example
//!
//! ```rust,no_run
//! use xcall_relay::{spans, ChainId, TransferId};
//!
//! let id = TransferId::new();
//! let span = spans::scan_chain(id, ChainId::Archway, 1_200, 1_210);
//! let _guard = span.enter();
//! // Your custom scanning logic here
//! ```

use alloy_primitives::U256;
use tracing::Span;

use crate::chain::ChainId;
use crate::registry::TransferId;

/// Create span for submitting a transfer on its source chain.
///
/// Parent: Application span
/// Children: xcall_relay.fetch_start_height, signer calls
#[inline]
pub fn submit_transfer(source: ChainId, destination: ChainId, amount: &U256) -> Span {
    tracing::info_span!(
        "xcall_relay.submit_transfer",
        source = %source,
        destination = %destination,
        amount = %amount,
        transfer_id = tracing::field::Empty,
        tx_hash = tracing::field::Empty,
        error.type = tracing::field::Empty,
        error.message = tracing::field::Empty,
        error.source = tracing::field::Empty,
        error.context = tracing::field::Empty,
        otel.status_code = "OK",
    )
}

/// Create span for following one transfer until it settles.
///
/// Parent: Application span
/// Children: xcall_relay.poll_source_transaction, xcall_relay.scan_chain
#[inline]
pub fn track_transfer(id: TransferId) -> Span {
    tracing::info_span!(
        "xcall_relay.track_transfer",
        transfer_id = %id,
        polls = tracing::field::Empty,
        final_status = tracing::field::Empty,
        error.type = tracing::field::Empty,
        error.message = tracing::field::Empty,
        error.source = tracing::field::Empty,
        otel.status_code = "OK",
    )
}

/// Create span for one poll of the source transaction.
///
/// Parent: xcall_relay.track_transfer
/// Children: Adapter RPC calls
#[inline]
pub fn poll_source_transaction(id: TransferId, chain: ChainId, tx_hash: &str) -> Span {
    tracing::debug_span!(
        "xcall_relay.poll_source_transaction",
        transfer_id = %id,
        chain = %chain,
        tx_hash = tx_hash,
    )
}

/// Create span for scanning a height range on one chain.
///
/// Parent: xcall_relay.track_transfer
/// Children: xcall_relay.scan_block
#[inline]
pub fn scan_chain(id: TransferId, chain: ChainId, from_height: u64, to_height: u64) -> Span {
    tracing::debug_span!(
        "xcall_relay.scan_chain",
        transfer_id = %id,
        chain = %chain,
        from_height = from_height,
        to_height = to_height,
    )
}

/// Create span for scanning the transactions of one block.
///
/// Parent: xcall_relay.scan_chain
/// Children: Adapter RPC calls
#[inline]
pub fn scan_block(chain: ChainId, height: u64) -> Span {
    tracing::trace_span!("xcall_relay.scan_block", chain = %chain, height = height)
}

/// Create span for a protocol fee quote.
///
/// Parent: Application span
/// Children: Adapter RPC calls
#[inline]
pub fn quote_fee(source: ChainId, destination: ChainId) -> Span {
    tracing::debug_span!(
        "xcall_relay.quote_fee",
        source = %source,
        destination = %destination,
    )
}

/// Create span for executing a ready rollback on the source chain.
///
/// Parent: Application span
/// Children: Signer calls, adapter RPC calls
#[inline]
pub fn execute_rollback(id: TransferId, chain: ChainId, sn: &U256) -> Span {
    tracing::info_span!(
        "xcall_relay.execute_rollback",
        transfer_id = %id,
        chain = %chain,
        sn = %sn,
        tx_hash = tracing::field::Empty,
        error.type = tracing::field::Empty,
        error.message = tracing::field::Empty,
        error.source = tracing::field::Empty,
        error.context = tracing::field::Empty,
        otel.status_code = "OK",
    )
}

/// Record error attributes on the current span.
///
/// Follows OpenTelemetry semantic conventions for error tracking:
/// - error.type: The error type/variant
/// - error.message: Human-readable error message
/// - error.source: The underlying cause, when there is one
///
/// # Example
///
/// ```rust,no_run
/// use xcall_relay::spans;
/// use xcall_relay::XCallError;
///
/// # fn example() -> Result<(), XCallError> {
/// let span = tracing::info_span!("xcall_relay.operation");
/// let _guard = span.enter();
///
/// let result = some_operation();
/// if let Err(ref e) = result {
///     spans::record_error(e);
/// }
/// result
/// # }
/// # fn some_operation() -> Result<(), XCallError> { Ok(()) }
/// ```
pub fn record_error<E: std::error::Error>(error: &E) {
    let current_span = tracing::Span::current();
    current_span.record(
        "error.type",
        error.to_string().split(':').next().unwrap_or("Unknown"),
    );
    current_span.record("error.message", error.to_string());
    current_span.record("otel.status_code", "ERROR");

    if let Some(source) = error.source() {
        current_span.record("error.source", source.to_string());
    }
}

/// Record error attributes with custom context on the current span.
///
/// # Example
///
/// ```rust,no_run
/// use xcall_relay::spans;
///
/// # fn example() {
/// let span = tracing::info_span!("xcall_relay.operation");
/// let _guard = span.enter();
///
/// if let Err(e) = some_operation() {
///     spans::record_error_with_context(
///         "SubmissionFailed",
///         &format!("Failed to submit transfer: {}", e),
///         Some("The wallet rejected the signature request"),
///     );
/// }
/// # }
/// # fn some_operation() -> Result<(), String> { Ok(()) }
/// ```
pub fn record_error_with_context(
    error_type: &str,
    error_message: &str,
    additional_context: Option<&str>,
) {
    let current_span = tracing::Span::current();
    current_span.record("error.type", error_type);
    current_span.record("error.message", error_message);
    current_span.record("otel.status_code", "ERROR");

    if let Some(context) = additional_context {
        current_span.record("error.context", context);
    }
}
