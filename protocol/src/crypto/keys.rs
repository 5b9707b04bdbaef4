//! # Committee Keys & Signature Recovery
//!
//! The threshold ceremony itself runs off-chain; all the engine ever sees is
//! its outcome: a 64-byte uncompressed aggregate public key and a recoverable
//! ECDSA signature over that key's hash. Acceptance hinges on recovering the
//! signer from the signature and comparing it with the address derived from
//! the key, exactly as the foreign chains will when the vault starts signing.
//!
//! Individual committee members use the same scheme to authenticate the
//! commands they submit to the node.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use thiserror::Error;

use super::hash::keccak256;
use crate::types::{Address, Hash256};

/// Length of an uncompressed public key without the `0x04` tag.
pub const PUBLIC_KEY_LENGTH: usize = 64;

/// Length of a recoverable signature: `r || s || v`.
pub const SIGNATURE_LENGTH: usize = 65;

/// Errors from key parsing and signature recovery.
///
/// Deliberately coarse: none of them carry key material.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("public key must be {PUBLIC_KEY_LENGTH} bytes, got {0}")]
    PublicKeyLength(usize),

    #[error("public key is not a valid secp256k1 point")]
    InvalidPublicKey,

    #[error("signature must be {SIGNATURE_LENGTH} bytes, got {0}")]
    SignatureLength(usize),

    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),

    #[error("signature does not recover to a public key")]
    RecoveryFailed,

    #[error("invalid secret key")]
    InvalidSecretKey,
}

/// Checks that `pubkey` is a 64-byte uncompressed secp256k1 point.
pub fn validate_public_key(pubkey: &[u8]) -> Result<(), CryptoError> {
    if pubkey.len() != PUBLIC_KEY_LENGTH {
        return Err(CryptoError::PublicKeyLength(pubkey.len()));
    }
    let mut tagged = [0u8; PUBLIC_KEY_LENGTH + 1];
    tagged[0] = 0x04;
    tagged[1..].copy_from_slice(pubkey);
    PublicKey::from_slice(&tagged).map_err(|_| CryptoError::InvalidPublicKey)?;
    Ok(())
}

/// Address controlled by a 64-byte public key: the low 20 bytes of its
/// keccak-256 digest.
pub fn address_from_pubkey(pubkey: &[u8]) -> Result<Address, CryptoError> {
    if pubkey.len() != PUBLIC_KEY_LENGTH {
        return Err(CryptoError::PublicKeyLength(pubkey.len()));
    }
    let digest = keccak256(pubkey);
    Address::from_slice(&digest.as_bytes()[12..]).map_err(|_| CryptoError::InvalidPublicKey)
}

/// Vault key for an aggregate public key.
pub fn vault_key(pubkey: &[u8]) -> Hash256 {
    keccak256(pubkey)
}

/// Recovers the address that produced `signature` over `digest`.
///
/// Accepts `v` as either `{0, 1}` or the legacy `{27, 28}` encoding.
pub fn recover_signer(digest: &Hash256, signature: &[u8]) -> Result<Address, CryptoError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(CryptoError::SignatureLength(signature.len()));
    }
    let v = signature[64];
    let normalized = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::from_i32(i32::from(normalized))
        .map_err(|_| CryptoError::InvalidRecoveryId(v))?;
    let recoverable = RecoverableSignature::from_compact(&signature[..64], recovery_id)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    let message = Message::from_digest(*digest.as_bytes());
    let public = SECP256K1
        .recover_ecdsa(&message, &recoverable)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    address_from_pubkey(&public.serialize_uncompressed()[1..])
}

/// A secp256k1 keypair for a committee member (or, in tests, a whole
/// committee's aggregate key).
///
/// Not `Serialize`: writing a secret key anywhere should be an explicit call
/// to [`CommitteeKeypair::secret_bytes`].
pub struct CommitteeKeypair {
    secret: SecretKey,
    public: PublicKey,
}

impl CommitteeKeypair {
    /// Generates a keypair from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let secret = SecretKey::new(&mut rand::thread_rng());
        Self::from_secret(secret)
    }

    /// Deterministic keypair from a 32-byte seed. Fails only for the
    /// (astronomically unlikely) seeds outside the curve order.
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_slice(seed).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self::from_secret(secret))
    }

    /// Deterministic keypair derived from an arbitrary label. Test helper:
    /// the label is hashed into a seed.
    pub fn from_label(label: &str) -> Result<Self, CryptoError> {
        Self::from_seed(keccak256(label.as_bytes()).as_bytes())
    }

    /// Parses a hex-encoded (optionally `0x`-prefixed) secret key.
    pub fn from_hex(secret_hex: &str) -> Result<Self, CryptoError> {
        let stripped = secret_hex.trim().strip_prefix("0x").unwrap_or(secret_hex.trim());
        let bytes = hex::decode(stripped).map_err(|_| CryptoError::InvalidSecretKey)?;
        let secret = SecretKey::from_slice(&bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        Ok(Self::from_secret(secret))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let public = PublicKey::from_secret_key(SECP256K1, &secret);
        Self { secret, public }
    }

    /// 64-byte uncompressed public key, without the `0x04` tag.
    pub fn public_key(&self) -> Vec<u8> {
        self.public.serialize_uncompressed()[1..].to_vec()
    }

    pub fn address(&self) -> Address {
        let uncompressed = self.public.serialize_uncompressed();
        let digest = keccak256(&uncompressed[1..]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.as_bytes()[12..]);
        Address::new(out)
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.secret_bytes()
    }

    /// Signs a 32-byte digest, returning `r || s || v` with `v` in `{0, 1}`.
    pub fn sign_digest(&self, digest: &Hash256) -> Vec<u8> {
        let message = Message::from_digest(*digest.as_bytes());
        let signature = SECP256K1.sign_ecdsa_recoverable(&message, &self.secret);
        let (recovery_id, compact) = signature.serialize_compact();
        let mut out = Vec::with_capacity(SIGNATURE_LENGTH);
        out.extend_from_slice(&compact);
        out.push(recovery_id.to_i32() as u8);
        out
    }
}

impl std::fmt::Debug for CommitteeKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitteeKeypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
