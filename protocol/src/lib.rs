//! # Vaultkeeper Protocol Primitives
//!
//! The shared foundation of the Vaultkeeper coordinator: a rotating
//! committee of threshold-signature participants custodying cross-chain
//! assets, and the handoff of that custody between committees.
//!
//! This crate carries no engine logic. It provides what the engine and the
//! node both need:
//!
//! - **types**: addresses, 256-bit hashes, chain/token/epoch identifiers.
//! - **crypto**: keccak-256 content hashing and secp256k1 signature recovery.
//! - **config**: protocol constants and the deployment [`config::EngineConfig`].
//! - **storage**: sled-backed command journal and state snapshots.

pub mod config;
pub mod crypto;
pub mod storage;
pub mod types;

pub use types::{Address, Amount, BlockNumber, ChainId, Epoch, Hash256, TokenId};
