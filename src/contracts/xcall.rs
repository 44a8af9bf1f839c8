//! xCall call service, bnUSD and asset manager bindings

use alloy_network::Ethereum;
use alloy_primitives::{Address, Bytes, U256};
use alloy_provider::Provider;
use alloy_sol_types::{sol, SolCall};
use tracing::{debug, info};

use AssetManager::{depositCall, depositNativeCall};
use BalancedDollar::crossTransferCall;
use CallService::{executeRollbackCall, CallServiceInstance};

/// The xCall call service on an EVM chain
pub struct XCallContract<P: Provider<Ethereum>> {
    instance: CallServiceInstance<P>,
}

impl<P: Provider<Ethereum>> XCallContract<P> {
    pub fn new(address: Address, provider: P) -> Self {
        debug!(
            contract_address = %address,
            event = "xcall_contract_initialized"
        );
        Self {
            instance: CallServiceInstance::new(address, provider),
        }
    }

    /// Protocol fee for a message to `network_id`, with or without a
    /// rollback reservation
    pub async fn fee(&self, network_id: &str, rollback: bool) -> Result<U256, alloy_contract::Error> {
        let fee = self
            .instance
            .getFee(network_id.to_string(), rollback)
            .call()
            .await?;

        debug!(
            network_id,
            rollback,
            fee = %fee,
            contract_address = %self.instance.address(),
            event = "xcall_fee_retrieved"
        );
        Ok(fee)
    }

    pub fn address(&self) -> Address {
        *self.instance.address()
    }
}

/// Calldata for `executeRollback(_sn)` on the call service
pub fn execute_rollback_calldata(sn: U256) -> Bytes {
    info!(sn = %sn, event = "execute_rollback_calldata_created");
    executeRollbackCall { _sn: sn }.abi_encode().into()
}

/// Calldata builders for the bnUSD token
pub struct BnUsdCalls;

impl BnUsdCalls {
    /// `crossTransfer(to, value, data)`, where `to` is a network address
    pub fn cross_transfer(to: &str, value: U256) -> Bytes {
        info!(to, value = %value, event = "cross_transfer_calldata_created");
        crossTransferCall {
            to: to.to_string(),
            value,
            data: Bytes::new(),
        }
        .abi_encode()
        .into()
    }
}

/// Calldata builders for the asset manager
pub struct AssetManagerCalls;

impl AssetManagerCalls {
    pub fn deposit(token: Address, amount: U256, to: &str) -> Bytes {
        info!(
            token = %token,
            amount = %amount,
            to,
            event = "deposit_calldata_created"
        );
        depositCall {
            token,
            amount,
            to: to.to_string(),
        }
        .abi_encode()
        .into()
    }

    /// The deposited amount travels as call value alongside the fee
    pub fn deposit_native(amount: U256, to: &str) -> Bytes {
        info!(
            amount = %amount,
            to,
            event = "deposit_native_calldata_created"
        );
        depositNativeCall {
            amount,
            to: to.to_string(),
            data: Bytes::new(),
        }
        .abi_encode()
        .into()
    }
}

sol!(
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract CallService {
        function getFee(string _net, bool _rollback) external view returns (uint256);
        function executeRollback(uint256 _sn) external;
    }
);

sol!(
    #[allow(missing_docs)]
    interface BalancedDollar {
        function crossTransfer(string to, uint256 value, bytes data) external payable;
    }
);

sol!(
    #[allow(missing_docs)]
    interface AssetManager {
        function deposit(address token, uint256 amount, string to) external payable;
        function depositNative(uint256 amount, string to, bytes data) external payable;
    }
);
