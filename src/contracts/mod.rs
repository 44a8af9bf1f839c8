//! EVM contract bindings
//!
//! Alloy-generated bindings for the xCall-side contracts an EVM adapter talks
//! to: the call service itself, the bnUSD token, the asset manager and plain
//! ERC20 tokens.
//!
//! Read methods go through a provider; write methods only produce calldata,
//! which the adapter hands to the injected signer.

mod erc20;
mod xcall;

pub use erc20::{approve_calldata, Erc20Contract};
pub use xcall::{execute_rollback_calldata, AssetManagerCalls, BnUsdCalls, XCallContract};
