//! xCall chain identifiers
//!
//! The xCall protocol identifies chains by a network id string such as
//! `0x1.icon` or `archway-1`. This module provides a closed enum over the
//! supported networks so that invalid ids are rejected at the boundary.

use std::fmt;
use std::str::FromStr;

use alloy_chains::NamedChain;
use serde::{Deserialize, Serialize};

use crate::error::{Result, XCallError};

/// Chain families sharing one RPC, log and event representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    /// ICON-style VM: event logs with `indexed` and `data` string arrays
    Icon,
    /// Cosmos-style VM: typed ABCI events with key/value attributes
    Cosmos,
    /// EVM chains: topic-indexed logs
    Evm,
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainFamily::Icon => write!(f, "icon"),
            ChainFamily::Cosmos => write!(f, "cosmos"),
            ChainFamily::Evm => write!(f, "evm"),
        }
    }
}

/// xCall network identifier
///
/// # Example
///
/// ```rust
/// use xcall_relay::{ChainFamily, ChainId};
///
/// let icon: ChainId = "0x1.icon".parse().unwrap();
/// assert_eq!(icon, ChainId::IconMainnet);
/// assert_eq!(icon.family(), ChainFamily::Icon);
/// assert_eq!(ChainId::Archway.network_id(), "archway-1");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ChainId {
    /// ICON mainnet (`0x1.icon`)
    #[serde(rename = "0x1.icon")]
    IconMainnet,
    /// ICON Lisbon testnet (`0x2.icon`)
    #[serde(rename = "0x2.icon")]
    IconLisbon,
    /// Archway mainnet (`archway-1`)
    #[serde(rename = "archway-1")]
    Archway,
    /// Archway testnet (`archway`)
    #[serde(rename = "archway")]
    ArchwayTestnet,
    /// Avalanche C-Chain (`0xa86a.avax`)
    #[serde(rename = "0xa86a.avax")]
    Avalanche,
    /// Avalanche Fuji testnet (`0xa869.fuji`)
    #[serde(rename = "0xa869.fuji")]
    AvalancheFuji,
}

impl ChainId {
    /// All supported chains
    pub const ALL: [ChainId; 6] = [
        ChainId::IconMainnet,
        ChainId::IconLisbon,
        ChainId::Archway,
        ChainId::ArchwayTestnet,
        ChainId::Avalanche,
        ChainId::AvalancheFuji,
    ];

    /// Returns the xCall network id string
    pub const fn network_id(self) -> &'static str {
        match self {
            ChainId::IconMainnet => "0x1.icon",
            ChainId::IconLisbon => "0x2.icon",
            ChainId::Archway => "archway-1",
            ChainId::ArchwayTestnet => "archway",
            ChainId::Avalanche => "0xa86a.avax",
            ChainId::AvalancheFuji => "0xa869.fuji",
        }
    }

    /// Returns the chain family this network belongs to
    pub const fn family(self) -> ChainFamily {
        match self {
            ChainId::IconMainnet | ChainId::IconLisbon => ChainFamily::Icon,
            ChainId::Archway | ChainId::ArchwayTestnet => ChainFamily::Cosmos,
            ChainId::Avalanche | ChainId::AvalancheFuji => ChainFamily::Evm,
        }
    }

    /// Returns true for test networks
    pub const fn is_testnet(self) -> bool {
        matches!(
            self,
            ChainId::IconLisbon | ChainId::ArchwayTestnet | ChainId::AvalancheFuji
        )
    }

    /// Returns the alloy named chain for EVM networks
    pub const fn named_chain(self) -> Option<NamedChain> {
        match self {
            ChainId::Avalanche => Some(NamedChain::Avalanche),
            ChainId::AvalancheFuji => Some(NamedChain::AvalancheFuji),
            _ => None,
        }
    }

    /// Uppercase token used in environment variable names
    pub(crate) const fn env_key(self) -> &'static str {
        match self {
            ChainId::IconMainnet => "ICON",
            ChainId::IconLisbon => "ICON_LISBON",
            ChainId::Archway => "ARCHWAY",
            ChainId::ArchwayTestnet => "ARCHWAY_TESTNET",
            ChainId::Avalanche => "AVALANCHE",
            ChainId::AvalancheFuji => "AVALANCHE_FUJI",
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.network_id())
    }
}

impl FromStr for ChainId {
    type Err = XCallError;

    fn from_str(s: &str) -> Result<Self> {
        ChainId::ALL
            .into_iter()
            .find(|chain| chain.network_id() == s)
            .ok_or_else(|| XCallError::ChainNotSupported {
                chain: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ChainId::IconMainnet, "0x1.icon", ChainFamily::Icon)]
    #[case(ChainId::IconLisbon, "0x2.icon", ChainFamily::Icon)]
    #[case(ChainId::Archway, "archway-1", ChainFamily::Cosmos)]
    #[case(ChainId::ArchwayTestnet, "archway", ChainFamily::Cosmos)]
    #[case(ChainId::Avalanche, "0xa86a.avax", ChainFamily::Evm)]
    #[case(ChainId::AvalancheFuji, "0xa869.fuji", ChainFamily::Evm)]
    fn test_network_id_and_family(
        #[case] chain: ChainId,
        #[case] network_id: &str,
        #[case] family: ChainFamily,
    ) {
        assert_eq!(chain.network_id(), network_id);
        assert_eq!(chain.family(), family);
        assert_eq!(network_id.parse::<ChainId>().unwrap(), chain);
    }

    #[test]
    fn test_unknown_network_id_rejected() {
        let result = "0x38.bsc".parse::<ChainId>();
        assert!(matches!(
            result,
            Err(XCallError::ChainNotSupported { chain }) if chain == "0x38.bsc"
        ));
    }

    #[test]
    fn test_serde_uses_network_id() {
        let json = serde_json::to_string(&ChainId::Avalanche).unwrap();
        assert_eq!(json, "\"0xa86a.avax\"");
        let parsed: ChainId = serde_json::from_str("\"archway-1\"").unwrap();
        assert_eq!(parsed, ChainId::Archway);
    }

    #[test]
    fn test_named_chain_only_for_evm() {
        for chain in ChainId::ALL {
            assert_eq!(
                chain.named_chain().is_some(),
                chain.family() == ChainFamily::Evm
            );
        }
    }
}
