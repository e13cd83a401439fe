//! Implementation of `Address`, a 20-byte EVM account or contract address.

use crate::error::{AddressError, AddressResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The length of `Address` values in bytes.
pub const ADDRESS_SIZE: usize = 20;

/// Hex prefix used by every on-chain value this workspace handles.
pub const HEX_PREFIX: &str = "0x";

/// A 20-byte address.
///
/// Addresses compare byte-wise, which is the same as comparing their lowercase
/// hex form. Checksum casing is accepted on input and dropped on output, so two
/// participants that configured the same mech with different casing still agree.
#[derive(Clone, Copy, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    /// The zero address.
    pub const ZERO: Address = Address([0u8; ADDRESS_SIZE]);

    /// Creates an address from raw bytes.
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns `true` for the zero address.
    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_SIZE]
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// Creates an address from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns `AddressError::InvalidLength` if the slice is not exactly 20 bytes.
    pub fn from_slice(value: &[u8]) -> AddressResult<Self> {
        if value.len() != ADDRESS_SIZE {
            return Err(AddressError::InvalidLength {
                expected: ADDRESS_SIZE,
                got: value.len(),
            });
        }
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(value);
        Ok(Self(bytes))
    }

    /// Parses an address from a hex string, with or without the `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not 40 hex characters once the prefix is stripped.
    pub fn parse(s: &str) -> AddressResult<Self> {
        let trimmed = s.trim();
        let digits = strip_hex_prefix(trimmed);
        if digits.len() != ADDRESS_SIZE * 2 {
            return Err(AddressError::InvalidLength {
                expected: ADDRESS_SIZE,
                got: digits.len() / 2,
            });
        }
        let bytes = hex::decode(digits).map_err(|e| AddressError::InvalidHex {
            value: trimmed.to_string(),
            message: e.to_string(),
        })?;
        Self::from_slice(&bytes)
    }

    /// Returns the lowercase `0x`-prefixed hex form.
    #[must_use]
    pub fn to_hex_string(&self) -> String {
        format!("{HEX_PREFIX}{}", hex::encode(self.0))
    }
}

/// Strips a leading `0x`/`0X` if present.
#[inline]
#[must_use]
pub fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix(HEX_PREFIX)
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Decodes a hex string (prefix optional) into bytes.
///
/// # Errors
///
/// Returns `AddressError::InvalidHex` when the digits are not valid hex.
pub fn decode_hex(value: &str) -> AddressResult<Vec<u8>> {
    hex::decode(strip_hex_prefix(value)).map_err(|e| AddressError::InvalidHex {
        value: value.to_string(),
        message: e.to_string(),
    })
}

/// Encodes bytes as a `0x`-prefixed lowercase hex string.
#[inline]
#[must_use]
pub fn encode_hex(bytes: &[u8]) -> String {
    format!("{HEX_PREFIX}{}", hex::encode(bytes))
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex_string())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Address::parse(&raw).map_err(serde::de::Error::custom)
    }
}
