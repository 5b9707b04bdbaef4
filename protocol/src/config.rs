//! # Engine Configuration & Constants
//!
//! Every tunable of the consensus and migration engine lives here. Constants
//! are protocol-level and changing them changes behaviour for every
//! committee; [`EngineConfig`] holds the per-deployment knobs and is loaded
//! from JSON by the node.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Address, BlockNumber, ChainId, Hash256};

// ---------------------------------------------------------------------------
// Protocol Constants
// ---------------------------------------------------------------------------

/// Parts-per-million denominator for fee and incentive rates.
pub const PPM: u128 = 1_000_000;

/// Upper bound on migration tranches per (chain, token) pair. Three keeps gas
/// cost bounded without forcing one oversized, high-slippage transfer.
pub const MAX_MIGRATION_TRANCHES: u8 = 3;

/// Points charged for every vote on a not-yet-finalized proposal, refunded
/// once the proposal finalizes.
pub const VOTE_SLASH_POINTS: u64 = 1;

/// Default penalty for a member blamed by a failed key generation.
pub const DEFAULT_BLAME_SLASH_POINTS: u64 = 100;

/// Default number of blocks after an election during which key-generation
/// votes are accepted.
pub const DEFAULT_KEYGEN_WINDOW_BLOCKS: BlockNumber = 200;

/// Default age after which proposals are pruned.
pub const DEFAULT_PROPOSAL_TTL_BLOCKS: BlockNumber = 50_000;

/// Epoch-to-key mapping value meaning "election in progress, no key yet".
pub const ELECTION_PENDING_KEY: Hash256 = Hash256::repeat_byte(0xff);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Fee Configuration
// ---------------------------------------------------------------------------

/// Parameters of the rebalance fee curve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Rate charged when a transfer moves balances as far from target as
    /// possible. Positive rates are clamped to this.
    pub max_fee_rate_ppm: u64,
    /// Largest incentive paid for a transfer that moves balances toward
    /// target. Negative rates are clamped to `-max_incentive_rate_ppm`.
    pub max_incentive_rate_ppm: u64,
    /// Transfers smaller than this fraction of the token's total balance
    /// skip the weighted computation.
    pub small_transfer_ppm: u64,
    /// Flat rate applied to small transfers.
    pub small_transfer_rate_ppm: i64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            max_fee_rate_ppm: 5_000,
            max_incentive_rate_ppm: 3_000,
            small_transfer_ppm: 1_000,
            small_transfer_rate_ppm: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine Configuration
// ---------------------------------------------------------------------------

/// Deployment configuration for the engine.
///
/// Loaded once at start-up. Fields missing from the JSON document fall back
/// to their defaults, so a minimal file only needs the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// The only sender allowed to submit orchestration commands (elections,
    /// rotations, heartbeats, registry updates).
    pub orchestrator: Address,
    /// Chain id of the relay chain itself.
    pub relay_chain: ChainId,
    /// Blocks after election during which key-generation votes count.
    pub keygen_window_blocks: BlockNumber,
    /// Proposals older than this are pruned.
    pub proposal_ttl_blocks: BlockNumber,
    /// Temporary penalty per vote on an open proposal.
    pub vote_slash_points: u64,
    /// Penalty for each member blamed by a failed key generation.
    pub blame_slash_points: u64,
    /// Rebalance fee curve.
    pub fees: FeeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            orchestrator: Address::zero(),
            relay_chain: 22_776,
            keygen_window_blocks: DEFAULT_KEYGEN_WINDOW_BLOCKS,
            proposal_ttl_blocks: DEFAULT_PROPOSAL_TTL_BLOCKS,
            vote_slash_points: VOTE_SLASH_POINTS,
            blame_slash_points: DEFAULT_BLAME_SLASH_POINTS,
            fees: FeeConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        let config: EngineConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.is_zero() {
            return Err(ConfigError::Invalid("orchestrator address is unset".into()));
        }
        if self.keygen_window_blocks == 0 {
            return Err(ConfigError::Invalid(
                "keygen_window_blocks must be positive".into(),
            ));
        }
        if self.proposal_ttl_blocks < self.keygen_window_blocks {
            return Err(ConfigError::Invalid(
                "proposal_ttl_blocks must cover the keygen window".into(),
            ));
        }
        if self.blame_slash_points < self.vote_slash_points {
            return Err(ConfigError::Invalid(
                "blame penalty must not be smaller than the vote penalty".into(),
            ));
        }
        let fees = &self.fees;
        if u128::from(fees.max_fee_rate_ppm) >= PPM || u128::from(fees.max_incentive_rate_ppm) >= PPM
        {
            return Err(ConfigError::Invalid("fee rates must be below 100%".into()));
        }
        if fees.small_transfer_rate_ppm > fees.max_fee_rate_ppm as i64
            || fees.small_transfer_rate_ppm < -(fees.max_incentive_rate_ppm as i64)
        {
            return Err(ConfigError::Invalid(
                "small_transfer_rate_ppm lies outside the fee band".into(),
            ));
        }
        Ok(())
    }
}
