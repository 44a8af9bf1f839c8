//! Injected collaborators for the relay.
//!
//! Time and transaction signing are kept behind traits so that the scanner
//! can be driven through multi-minute cross-chain waits instantly in tests,
//! and so that wallet integrations stay outside this crate.
//!
//! # Example: Implementing a Test Fake
//!
//! ```rust,ignore
//! use xcall_relay::{ContractCall, Result, TransactionSigner, XCallError};
//!
//! struct AlwaysRejects;
//!
//! #[async_trait::async_trait]
//! impl TransactionSigner for AlwaysRejects {
//!     async fn sign_and_send(&self, call: ContractCall) -> Result<Option<String>> {
//!         Err(XCallError::SubmissionFailed {
//!             chain: call.chain,
//!             reason: "user rejected".to_string(),
//!         })
//!     }
//! }
//! ```

use async_trait::async_trait;
use std::time::{Duration, Instant};

use crate::adapter::ContractCall;
use crate::error::Result;

/// Trait for time-based operations.
///
/// Polling loops and RPC retries sleep through this seam, so a fake clock can
/// fast-forward them without waiting.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Asynchronously sleeps for the given duration.
    async fn sleep(&self, duration: Duration);

    /// Returns the current instant in time.
    fn now(&self) -> Instant;
}

/// Signs and broadcasts a contract call on behalf of a user account.
///
/// This is the wallet boundary: the relay supplies the contract, method
/// arguments and attached value, the signer owns keys and broadcasting.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Returns the chain-native transaction hash, or `None` when the wallet
    /// accepted the call without reporting one.
    ///
    /// # Errors
    ///
    /// Returns [`crate::XCallError::SubmissionFailed`] when signing is
    /// rejected or the call fails simulation before broadcast.
    async fn sign_and_send(&self, call: ContractCall) -> Result<Option<String>>;
}
