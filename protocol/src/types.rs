//! # Primitive Types
//!
//! Fixed-width identifiers shared by every Vaultkeeper component. Addresses
//! and hashes are plain byte arrays wrapped in newtypes so the compiler
//! keeps a vault key from being passed where a member address is expected.
//!
//! Both render as `0x`-prefixed lowercase hex and serialize through serde as
//! that same string, which keeps JSON payloads readable and lets the types
//! key a JSON object.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Identifier of a chain (relay chain or a foreign chain).
pub type ChainId = u64;

/// Committee epoch number.
pub type Epoch = u64;

/// Relay-chain block height.
pub type BlockNumber = u64;

/// Unsigned token amount in the token's smallest unit.
pub type Amount = u128;

/// Tokens are identified by their relay-chain contract address.
pub type TokenId = Address;

/// Errors produced when parsing hex identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseHexError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("wrong length: expected {expected} bytes, got {got}")]
    WrongLength { expected: usize, got: usize },
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], ParseHexError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(stripped).map_err(|e| ParseHexError::InvalidHex(e.to_string()))?;
    if bytes.len() != N {
        return Err(ParseHexError::WrongLength {
            expected: N,
            got: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

macro_rules! fixed_bytes {
    ($name:ident, $len:expr) => {
        impl $name {
            /// Byte length of this identifier.
            pub const LEN: usize = $len;

            /// The all-zero value.
            pub const fn zero() -> Self {
                Self([0u8; $len])
            }

            /// Wraps raw bytes.
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// A value with every byte set to `byte`. Handy in tests.
            pub const fn repeat_byte(byte: u8) -> Self {
                Self([byte; $len])
            }

            /// Builds from a slice, failing on length mismatch.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseHexError> {
                if bytes.len() != $len {
                    return Err(ParseHexError::WrongLength {
                        expected: $len,
                        got: bytes.len(),
                    });
                }
                let mut out = [0u8; $len];
                out.copy_from_slice(bytes);
                Ok(Self(out))
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            /// `0x`-prefixed lowercase hex.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = ParseHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_fixed::<$len>(s).map(Self)
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

/// A 20-byte account address (committee member, token contract, vault).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

/// A 256-bit keccak digest used for vault keys and proposal ids.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256([u8; 32]);

fixed_bytes!(Address, 20);
fixed_bytes!(Hash256, 32);

/// Serde adapter for variable-length byte strings (public keys, foreign
/// addresses, signatures) as `0x`-prefixed hex.
///
/// ```ignore
/// #[serde(with = "vaultkeeper_protocol::types::hex_bytes")]
/// pub pubkey: Vec<u8>,
/// ```
pub mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let stripped = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(stripped).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_roundtrip() {
        let addr = Address::repeat_byte(0xab);
        let text = addr.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 42);
        assert_eq!(text.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn parse_accepts_missing_prefix() {
        let hash: Hash256 = "11".repeat(32).parse().unwrap();
        assert_eq!(hash, Hash256::repeat_byte(0x11));
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let err = "0x1234".parse::<Address>().unwrap_err();
        assert_eq!(
            err,
            ParseHexError::WrongLength {
                expected: 20,
                got: 2
            }
        );
    }

    #[test]
    fn serde_uses_hex_strings() {
        let addr = Address::repeat_byte(1);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr.to_hex()));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn hex_bytes_field() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Wrapper {
            #[serde(with = "hex_bytes")]
            key: Vec<u8>,
        }
        let w = Wrapper {
            key: vec![0xde, 0xad],
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"key":"0xdead"}"#);
        assert_eq!(serde_json::from_str::<Wrapper>(&json).unwrap(), w);
    }

    #[test]
    fn ordering_is_bytewise() {
        assert!(Address::repeat_byte(1) < Address::repeat_byte(2));
        assert!(Hash256::zero().is_zero());
    }
}
