//! Protocol fee quotes
//!
//! xCall charges the fee on the source chain. A call that may be rolled back
//! costs more because the source chain must reserve a response leg.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::adapter::AdapterRegistry;
use crate::chain::ChainId;
use crate::error::Result;

/// Both fee variants for one route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub no_rollback: U256,
    pub rollback: U256,
}

impl FeeQuote {
    pub fn for_rollback(&self, rollback: bool) -> U256 {
        if rollback {
            self.rollback
        } else {
            self.no_rollback
        }
    }
}

/// Reads fees from the source chain's xCall contract
#[derive(Debug, Clone)]
pub struct FeeOracle {
    adapters: AdapterRegistry,
}

impl FeeOracle {
    pub fn new(adapters: AdapterRegistry) -> Self {
        Self { adapters }
    }

    /// Fee for a call from `source` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::XCallError::ChainNotSupported`] when either chain has
    /// no adapter, or the adapter's error when the read fails.
    #[instrument(skip(self), fields(source = %source, destination = %destination))]
    pub async fn quote(
        &self,
        source: ChainId,
        destination: ChainId,
        with_rollback: bool,
    ) -> Result<U256> {
        self.adapters.get(destination)?;
        let fee = self
            .adapters
            .get(source)?
            .fetch_xcall_fee(destination, with_rollback)
            .await?;
        debug!(
            fee = %fee,
            with_rollback,
            event = "xcall_fee_quoted"
        );
        Ok(fee)
    }

    /// Both variants, read concurrently
    pub async fn quote_both(&self, source: ChainId, destination: ChainId) -> Result<FeeQuote> {
        let (no_rollback, rollback) = tokio::try_join!(
            self.quote(source, destination, false),
            self.quote(source, destination, true),
        )?;
        Ok(FeeQuote {
            no_rollback,
            rollback,
        })
    }
}
