//! # Mech Primitives
//!
//! Fundamental types shared by every crate of the mech interaction workspace.
//!
//! - [`Address`]: 20-byte EVM address, checksum-insensitive, totally ordered
//! - [`ChainId`]: chain a mech is deployed on
//!
//! ## Example
//!
//! ```rust
//! use mech_primitives::{Address, ChainId};
//!
//! let mech = Address::parse("0x77af31De935740567Cf4fF1986D04B2c964A786a").unwrap();
//! assert_eq!(mech.to_string(), "0x77af31de935740567cf4ff1986d04b2c964a786a");
//!
//! let chain: ChainId = "gnosis".parse().unwrap();
//! assert_eq!(chain.evm_chain_id(), 100);
//! ```

pub mod address;
pub mod chain;
pub mod error;

// Re-exports
pub use address::{decode_hex, encode_hex, strip_hex_prefix, Address, ADDRESS_SIZE, HEX_PREFIX};
pub use chain::ChainId;
pub use error::{AddressError, AddressResult};
