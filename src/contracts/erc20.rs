// SPDX-FileCopyrightText: 2025 Semiotic AI, Inc.
//
// SPDX-License-Identifier: Apache-2.0
//! ERC20 contract bindings for allowance checks and approvals
//!
//! The asset manager pulls deposited tokens with `transferFrom`, so a token
//! deposit needs a sufficient allowance first.

use alloy_network::Ethereum;
use alloy_primitives::{Address, Bytes, U256};
use alloy_provider::Provider;
use alloy_sol_types::{sol, SolCall};
use tracing::{debug, info};

use Erc20::{approveCall, Erc20Instance};

/// ERC20 contract wrapper
///
/// # Example
///
/// ```rust,no_run
/// use xcall_relay::contracts::{approve_calldata, Erc20Contract};
/// use alloy_primitives::{address, U256};
/// use alloy_provider::ProviderBuilder;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = ProviderBuilder::new().connect("https://api.avax.network/ext/bc/C/rpc").await?;
/// let token = address!("B97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E");
///
/// let erc20 = Erc20Contract::new(token, provider);
/// let owner = address!("1234567890123456789012345678901234567890");
/// let spender = address!("0987654321098765432109876543210987654321");
///
/// if erc20.allowance(owner, spender).await? < U256::from(1_000_000u64) {
///     let calldata = approve_calldata(spender, U256::from(1_000_000u64));
///     // Hand the calldata to a signer...
/// }
/// # Ok(())
/// # }
/// ```
pub struct Erc20Contract<P: Provider<Ethereum>> {
    instance: Erc20Instance<P>,
}

impl<P: Provider<Ethereum>> Erc20Contract<P> {
    pub fn new(address: Address, provider: P) -> Self {
        debug!(
            contract_address = %address,
            event = "erc20_contract_initialized"
        );
        Self {
            instance: Erc20Instance::new(address, provider),
        }
    }

    /// Amount of tokens `spender` may move on behalf of `owner`
    pub async fn allowance(
        &self,
        owner: Address,
        spender: Address,
    ) -> Result<U256, alloy_contract::Error> {
        debug!(
            owner = %owner,
            spender = %spender,
            contract_address = %self.instance.address(),
            event = "checking_allowance"
        );

        let result = self.instance.allowance(owner, spender).call().await?;

        info!(
            owner = %owner,
            spender = %spender,
            allowance = %result,
            contract_address = %self.instance.address(),
            event = "allowance_retrieved"
        );

        Ok(result)
    }

    pub fn address(&self) -> Address {
        *self.instance.address()
    }
}

/// Calldata for `approve(spender, amount)`
pub fn approve_calldata(spender: Address, amount: U256) -> Bytes {
    info!(
        spender = %spender,
        amount = %amount,
        event = "approve_calldata_created"
    );
    approveCall { spender, amount }.abi_encode().into()
}

// Minimal ERC20 interface for approval operations
sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract Erc20 {
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
);
