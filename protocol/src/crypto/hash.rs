//! # Content Hashing
//!
//! Every key that identifies shared state in Vaultkeeper is a keccak-256
//! digest: vault keys (hash of the aggregate public key), proposal ids (hash
//! of the payload being voted on) and migration order ids. Keccak is what
//! the foreign chains the committee signs for already use, so digests can be
//! checked on either side without translation.
//!
//! Encodings fed to the hasher are explicit: integers big-endian and fixed
//! width, variable-length byte strings prefixed with their `u32` length.
//! Two different payloads must never produce the same byte stream.

use sha3::{Digest, Keccak256};

use crate::types::Hash256;

/// keccak-256 of `data`.
///
/// # Example
///
/// ```
/// use vaultkeeper_protocol::crypto::keccak256;
///
/// let digest = keccak256(b"");
/// assert_eq!(
///     digest.to_hex(),
///     "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
/// );
/// ```
pub fn keccak256(data: &[u8]) -> Hash256 {
    let digest: [u8; 32] = Keccak256::digest(data).into();
    Hash256::new(digest)
}

/// keccak-256 over several slices fed in order, without concatenating.
pub fn keccak256_concat(parts: &[&[u8]]) -> Hash256 {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest: [u8; 32] = hasher.finalize().into();
    Hash256::new(digest)
}

/// Incremental builder for content hashes with an unambiguous encoding.
///
/// Start with a domain tag so different payload kinds cannot collide even
/// when their fields happen to line up.
pub struct ContentHasher {
    inner: Keccak256,
}

impl ContentHasher {
    /// Starts a hash under the given domain tag.
    pub fn new(domain: &str) -> Self {
        let mut hasher = Self {
            inner: Keccak256::new(),
        };
        hasher.bytes(domain.as_bytes());
        hasher
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.inner.update([value]);
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.inner.update(value.to_be_bytes());
        self
    }

    pub fn u128(&mut self, value: u128) -> &mut Self {
        self.inner.update(value.to_be_bytes());
        self
    }

    /// Appends a fixed-width value (address, hash) without a length prefix.
    pub fn fixed(&mut self, value: &[u8]) -> &mut Self {
        self.inner.update(value);
        self
    }

    /// Appends a variable-length byte string, length-prefixed.
    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.inner.update((value.len() as u32).to_be_bytes());
        self.inner.update(value);
        self
    }

    pub fn finish(&mut self) -> Hash256 {
        let digest: [u8; 32] = self.inner.finalize_reset().into();
        Hash256::new(digest)
    }
}
