use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ChainId;
use crate::error::{Result, XCallError};

/// Placeholder token address used for a chain's native asset
pub const NATIVE_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Renders an xCall network address, `"<networkId>/<address>"`
pub fn network_address(chain: ChainId, address: &str) -> String {
    format!("{}/{}", chain.network_id(), address)
}

/// A parsed `"<networkId>/<address>"` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub chain: ChainId,
    pub address: String,
}

impl NetworkAddress {
    pub fn new(chain: ChainId, address: impl Into<String>) -> Self {
        Self {
            chain,
            address: address.into(),
        }
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chain, self.address)
    }
}

impl FromStr for NetworkAddress {
    type Err = XCallError;

    // Addresses never contain '/', network ids never do either, so the
    // first separator splits them.
    fn from_str(s: &str) -> Result<Self> {
        let (network, address) = s.split_once('/').ok_or_else(|| {
            XCallError::InvalidConfig(format!("network address without separator: {s}"))
        })?;
        if address.is_empty() {
            return Err(XCallError::InvalidConfig(format!(
                "network address without account: {s}"
            )));
        }
        Ok(Self::new(network.parse()?, address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_address_format() {
        let rendered = network_address(ChainId::Archway, "archway1qqqq");
        insta::assert_snapshot!(rendered, @"archway-1/archway1qqqq");
    }

    #[test]
    fn test_network_address_parse() {
        let parsed: NetworkAddress = "0x1.icon/hx0000000000000000000000000000000000000001"
            .parse()
            .unwrap();
        assert_eq!(parsed.chain, ChainId::IconMainnet);
        assert_eq!(parsed.address, "hx0000000000000000000000000000000000000001");
        assert_eq!(
            parsed.to_string(),
            "0x1.icon/hx0000000000000000000000000000000000000001"
        );
    }

    #[test]
    fn test_network_address_rejects_malformed() {
        assert!("0x1.icon".parse::<NetworkAddress>().is_err());
        assert!("0x1.icon/".parse::<NetworkAddress>().is_err());
        assert!("0x99.nope/abc".parse::<NetworkAddress>().is_err());
    }

    #[test]
    fn test_native_address_is_twenty_zero_bytes() {
        let bytes = alloy_primitives::hex::decode(NATIVE_ADDRESS).unwrap();
        assert_eq!(bytes, vec![0u8; 20]);
    }
}
