//! # Cryptographic Primitives
//!
//! Two things live here and nothing else:
//!
//! - **keccak-256 content hashing** for every deterministic identifier
//!   (vault keys, proposal ids, migration order ids).
//! - **secp256k1 recoverable signatures**: verifying that a key-generation
//!   outcome was signed by the key it announces, and authenticating the
//!   commands committee members submit.
//!
//! The threshold signing protocol is not implemented here; it runs off-chain
//! and only its outcome reaches the engine.

pub mod hash;
pub mod keys;

pub use hash::{keccak256, keccak256_concat, ContentHasher};
pub use keys::{
    address_from_pubkey, recover_signer, validate_public_key, vault_key, CommitteeKeypair,
    CryptoError, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH,
};
