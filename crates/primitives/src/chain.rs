//! Chains a mech can be reached on.

use crate::error::AddressError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chain identifier used to select chain-specific contract constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChainId {
    /// Gnosis chain.
    #[default]
    Gnosis,
    /// Base.
    Base,
    /// Ethereum mainnet.
    Ethereum,
    /// Polygon PoS.
    Polygon,
    /// Optimism.
    Optimism,
    /// Arbitrum One.
    Arbitrum,
}

impl ChainId {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gnosis => "gnosis",
            Self::Base => "base",
            Self::Ethereum => "ethereum",
            Self::Polygon => "polygon",
            Self::Optimism => "optimism",
            Self::Arbitrum => "arbitrum",
        }
    }

    /// Returns the EVM chain id.
    #[must_use]
    pub const fn evm_chain_id(self) -> u64 {
        match self {
            Self::Gnosis => 100,
            Self::Base => 8453,
            Self::Ethereum => 1,
            Self::Polygon => 137,
            Self::Optimism => 10,
            Self::Arbitrum => 42161,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainId {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gnosis" | "xdai" => Ok(Self::Gnosis),
            "base" => Ok(Self::Base),
            "ethereum" | "mainnet" => Ok(Self::Ethereum),
            "polygon" => Ok(Self::Polygon),
            "optimism" => Ok(Self::Optimism),
            "arbitrum" => Ok(Self::Arbitrum),
            _ => Err(AddressError::UnknownChain(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_aliases() {
        assert_eq!("xdai".parse::<ChainId>().unwrap(), ChainId::Gnosis);
        assert_eq!("BASE".parse::<ChainId>().unwrap(), ChainId::Base);
        assert!("solana".parse::<ChainId>().is_err());
    }

    #[test]
    fn serde_lowercase() {
        let json = serde_json::to_string(&ChainId::Base).unwrap();
        assert_eq!(json, "\"base\"");
        assert_eq!(ChainId::Gnosis.evm_chain_id(), 100);
    }
}
