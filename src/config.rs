// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0
//! Relay configuration: polling cadence, RPC retry budget and per-chain
//! endpoints and contract addresses.

use std::time::Duration;

use bon::Builder;
use url::Url;

use crate::chain::{ChainFamily, ChainId};
use crate::error::{Result, XCallError};

/// Environment variable prefix used by [`ChainConfig::from_env`]
pub const ENV_PREFIX: &str = "XCALL";

/// Fixed-budget retry applied by adapters to single read RPCs.
///
/// When the budget is exhausted the read reports "undetermined" instead of
/// failing, so callers simply try again on their next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay between two attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    /// 10 attempts, 1 second apart.
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A single attempt with no delay, handy for tests and one-shot tools.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Configuration for the event scanner's polling behavior.
///
/// There is no overall deadline for destination discovery. Only single RPC
/// reads are bounded, by [`RetryPolicy`].
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use xcall_relay::PollingConfig;
///
/// let config = PollingConfig::default()
///     .with_tx_poll_interval(Duration::from_secs(5))
///     .with_block_poll_interval(Duration::from_secs(3));
/// assert_eq!(config.retry.max_attempts, 10);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    /// Interval between source transaction result polls.
    pub tx_poll_interval: Duration,
    /// Interval between destination chain height polls.
    pub block_poll_interval: Duration,
    /// Retry budget for single RPC reads.
    pub retry: RetryPolicy,
}

impl Default for PollingConfig {
    /// - `tx_poll_interval`: 2 seconds
    /// - `block_poll_interval`: 2 seconds
    /// - `retry`: [`RetryPolicy::default`]
    fn default() -> Self {
        Self {
            tx_poll_interval: Duration::from_secs(2),
            block_poll_interval: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

impl PollingConfig {
    pub fn with_tx_poll_interval(mut self, interval: Duration) -> Self {
        self.tx_poll_interval = interval;
        self
    }

    pub fn with_block_poll_interval(mut self, interval: Duration) -> Self {
        self.block_poll_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Endpoints and contract addresses for one chain.
///
/// # Example
///
/// ```rust
/// use xcall_relay::{ChainConfig, ChainId};
///
/// let config = ChainConfig::builder()
///     .chain(ChainId::IconMainnet)
///     .rpc_url("https://ctz.solidwallet.io/api/v3".parse().unwrap())
///     .xcall("cxa07f426062a1384bdd762afa6a87d123fbc81c75".to_string())
///     .asset_manager("cxabea09a8c5f3efa54d0a0370b14715e6f2270591".to_string())
///     .bnusd("cx88fd7df7ddff82f7cc735c871dc519838cb235bb".to_string())
///     .build();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct ChainConfig {
    pub chain: ChainId,
    /// JSON-RPC endpoint (ICON, EVM) or CometBFT RPC endpoint (Cosmos)
    pub rpc_url: Url,
    /// REST/LCD endpoint used for CosmWasm smart queries
    pub lcd_url: Option<Url>,
    /// xCall contract address
    pub xcall: String,
    /// Asset manager contract address
    pub asset_manager: String,
    /// bnUSD token contract address
    pub bnusd: String,
    /// Native denomination used to pay protocol fees (Cosmos family)
    pub fee_denom: Option<String>,
}

impl ChainConfig {
    /// Loads a chain's configuration from `XCALL_<CHAIN>_*` environment
    /// variables, reading a `.env` file first when one exists.
    ///
    /// | Variable | Required |
    /// |---|---|
    /// | `XCALL_<CHAIN>_RPC_URL` | yes |
    /// | `XCALL_<CHAIN>_LCD_URL` | Cosmos only |
    /// | `XCALL_<CHAIN>_XCALL` | yes |
    /// | `XCALL_<CHAIN>_ASSET_MANAGER` | yes |
    /// | `XCALL_<CHAIN>_BNUSD` | yes |
    /// | `XCALL_<CHAIN>_DENOM` | Cosmos only |
    pub fn from_env(chain: ChainId) -> Result<Self> {
        // A missing .env file is normal in deployed environments.
        let _ = dotenvy::dotenv();
        Self::from_lookup(chain, |key| dotenvy::var(key).ok())
    }

    pub(crate) fn from_lookup(
        chain: ChainId,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let key = |suffix: &str| format!("{ENV_PREFIX}_{}_{suffix}", chain.env_key());
        let required = |suffix: &str| {
            let name = key(suffix);
            lookup(&name)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| XCallError::InvalidConfig(format!("{name} is not set")))
        };
        let parse_url = |value: String| {
            Url::parse(&value).map_err(|e| XCallError::InvalidUrl {
                reason: format!("{value}: {e}"),
            })
        };

        let config = Self {
            chain,
            rpc_url: parse_url(required("RPC_URL")?)?,
            lcd_url: lookup(&key("LCD_URL")).map(parse_url).transpose()?,
            xcall: required("XCALL")?,
            asset_manager: required("ASSET_MANAGER")?,
            bnusd: required("BNUSD")?,
            fee_denom: lookup(&key("DENOM")),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the family-specific requirements
    pub fn validate(&self) -> Result<()> {
        if self.chain.family() == ChainFamily::Cosmos {
            if self.lcd_url.is_none() {
                return Err(XCallError::InvalidConfig(format!(
                    "{} needs an LCD url for contract queries",
                    self.chain
                )));
            }
            if self.fee_denom.is_none() {
                return Err(XCallError::InvalidConfig(format!(
                    "{} needs a native fee denomination",
                    self.chain
                )));
            }
        }
        Ok(())
    }

    /// Returns the LCD endpoint, or an error for chains configured without one
    pub fn require_lcd_url(&self) -> Result<&Url> {
        self.lcd_url.as_ref().ok_or_else(|| {
            XCallError::InvalidConfig(format!("{} has no LCD url configured", self.chain))
        })
    }
}
