//! Per-chain Nevermined subscription constants.

use crate::{ConfigError, ConfigResult};
use mech_primitives::{Address, ChainId, HEX_PREFIX};

/// Prefix of plan DIDs; replaced by `0x` to obtain the on-chain DID.
pub const PLAN_DID_PREFIX: &str = "did:nv:";

/// Subscription plan constants for one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvmConfig {
    /// Fee kept by the subscription network.
    pub plan_fee_nvm: u128,
    /// Price paid to the mech.
    pub plan_price_mech: u128,
    /// Credits granted by one purchase.
    pub subscription_credits: u128,
    /// ERC1155 subscription NFT.
    pub subscription_nft_address: Address,
    /// NFT sales template.
    pub nft_sales_address: Address,
    /// Payment token; zero for native payment.
    pub subscription_token_address: Address,
    /// Provider fulfilling the subscription.
    pub subscription_provider_address: Address,
    /// Plan DID, `did:nv:` prefixed.
    pub plan_did: &'static str,
}

impl NvmConfig {
    /// Returns the on-chain DID (`did:nv:` replaced by `0x`).
    #[must_use]
    pub fn did(&self) -> String {
        self.plan_did.replacen(PLAN_DID_PREFIX, HEX_PREFIX, 1)
    }

    /// Amounts paid to the receivers: mech price first, network fee second.
    #[must_use]
    pub fn amounts(&self) -> [u128; 2] {
        [self.plan_price_mech, self.plan_fee_nvm]
    }

    /// Total price of one subscription.
    #[must_use]
    pub fn total_price(&self) -> u128 {
        self.plan_price_mech + self.plan_fee_nvm
    }

    /// Whether the plan is paid in the native token.
    #[must_use]
    pub fn is_native_payment(&self) -> bool {
        self.subscription_token_address.is_zero()
    }

    /// Returns the constants for `chain`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnsupportedChain` when no plan is deployed on the chain.
    pub fn for_chain(chain: ChainId) -> ConfigResult<Self> {
        match chain {
            ChainId::Gnosis => Ok(Self {
                plan_fee_nvm: 10_000_000_000_000_000,
                plan_price_mech: 990_000_000_000_000_000,
                subscription_credits: 1_000_000,
                subscription_nft_address: Address::new([
                    0x1b, 0x5d, 0xea, 0xd7, 0x30, 0x9b, 0x56, 0xca, 0x76, 0x63, 0xb3, 0x30, 0x1a,
                    0x50, 0x3e, 0x07, 0x7b, 0xe1, 0x8c, 0xba,
                ]),
                nft_sales_address: Address::new([
                    0x72, 0x20, 0x19, 0x48, 0x08, 0x7a, 0xe8, 0x3f, 0x8e, 0xac, 0x22, 0xcf, 0x7a,
                    0x9f, 0x21, 0x39, 0xe4, 0xcf, 0xa8, 0x29,
                ]),
                subscription_token_address: Address::ZERO,
                subscription_provider_address: Address::new([
                    0x4a, 0x2f, 0x40, 0xe1, 0x43, 0x09, 0xc2, 0x0c, 0x0c, 0x38, 0x03, 0xc3, 0xcc,
                    0xcd, 0x5e, 0x9b, 0x5f, 0x2d, 0x4e, 0xca,
                ]),
                plan_did: "did:nv:b0b28402e5a7229804579d4ac55b98a1dd94660d7a7eb4add78e5ca856f2aab7",
            }),
            ChainId::Base => Ok(Self {
                plan_fee_nvm: 10_000,
                plan_price_mech: 990_000,
                subscription_credits: 1_000_000,
                subscription_nft_address: Address::new([
                    0xd5, 0x31, 0x8d, 0x1a, 0x17, 0x81, 0x9f, 0x65, 0x77, 0x1b, 0x6c, 0x92, 0x77,
                    0x53, 0x4c, 0x08, 0xdd, 0x76, 0x54, 0x98,
                ]),
                nft_sales_address: Address::new([
                    0x46, 0x8d, 0xc6, 0xd7, 0x58, 0x12, 0x9c, 0x45, 0x63, 0x00, 0x5b, 0x49, 0xac,
                    0x58, 0xdf, 0xf2, 0xe6, 0xf7, 0xf0, 0x8e,
                ]),
                subscription_token_address: Address::new([
                    0x83, 0x35, 0x89, 0xfc, 0xd6, 0xed, 0xb6, 0xe0, 0x8f, 0x4c, 0x7c, 0x32, 0xd4,
                    0xf7, 0x1b, 0x54, 0xbd, 0xa0, 0x29, 0x13,
                ]),
                subscription_provider_address: Address::new([
                    0x50, 0x50, 0xc5, 0x77, 0x58, 0x3d, 0x25, 0xff, 0x9c, 0x94, 0x92, 0xa3, 0x9e,
                    0x8d, 0x1b, 0x94, 0x02, 0x8f, 0xfa, 0x55,
                ]),
                plan_did: "did:nv:6f74c18fae7e5c3589b99d7cd0ba317593f00dee53c81a2ba4ac2244232f99da",
            }),
            other => Err(ConfigError::UnsupportedChain(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gnosis_plan_is_native() {
        let config = NvmConfig::for_chain(ChainId::Gnosis).unwrap();
        assert!(config.is_native_payment());
        assert_eq!(
            config.did(),
            "0xb0b28402e5a7229804579d4ac55b98a1dd94660d7a7eb4add78e5ca856f2aab7"
        );
        assert_eq!(
            config.subscription_nft_address,
            Address::parse("0x1b5DeaD7309b56ca7663b3301A503e077Be18cba").unwrap()
        );
        assert_eq!(config.total_price(), 1_000_000_000_000_000_000);
    }

    #[test]
    fn base_plan_uses_token() {
        let config = NvmConfig::for_chain(ChainId::Base).unwrap();
        assert!(!config.is_native_payment());
        assert_eq!(
            config.subscription_token_address,
            Address::parse("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913").unwrap()
        );
        assert_eq!(config.amounts(), [990_000, 10_000]);
    }

    #[test]
    fn unsupported_chain() {
        assert!(matches!(
            NvmConfig::for_chain(ChainId::Polygon),
            Err(ConfigError::UnsupportedChain(_))
        ));
    }
}
