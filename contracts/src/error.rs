//! Engine-level error type and its coarse classification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use vaultkeeper_protocol::{Address, BlockNumber};

use crate::ledger::LedgerError;
use crate::proposal::ProposalError;
use crate::tss::ConsensusError;
use crate::vault::VaultError;

/// Broad category of a rejected command, used for metrics and HTTP status
/// mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Caller may not perform this action.
    Access,
    /// Action conflicts with current state (duplicate vote, rotation during
    /// migration).
    Conflict,
    /// Malformed or inconsistent input.
    Validation,
    /// Internal accounting check failed.
    Invariant,
    /// A time window has closed.
    Expiry,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Access => "access",
            ErrorClass::Conflict => "conflict",
            ErrorClass::Validation => "validation",
            ErrorClass::Invariant => "invariant",
            ErrorClass::Expiry => "expiry",
        }
    }
}

/// Any reason a command was rejected. A rejected command leaves no trace in
/// engine state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("sender {0} is not authorized for this command")]
    Unauthorized(Address),

    #[error("block {got} is older than current block {current}")]
    StaleBlock { current: BlockNumber, got: BlockNumber },

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Proposal(#[from] ProposalError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Unauthorized(_) => ErrorClass::Access,
            EngineError::StaleBlock { .. } => ErrorClass::Validation,
            EngineError::Consensus(e) => match e {
                ConsensusError::UnknownVoter { .. } => ErrorClass::Access,
                ConsensusError::ElectionClosed { .. } | ConsensusError::DuplicateOrder(_) => {
                    ErrorClass::Conflict
                }
                ConsensusError::ProposalExpired { .. } => ErrorClass::Expiry,
                _ => ErrorClass::Validation,
            },
            EngineError::Proposal(e) => match e {
                ProposalError::AlreadyVoted { .. } | ProposalError::AlreadyFinalized(_) => {
                    ErrorClass::Conflict
                }
                ProposalError::UnknownProposal(_) => ErrorClass::Validation,
            },
            EngineError::Vault(e) => match e {
                VaultError::UnknownChain(_)
                | VaultError::EmptyCommittee(_)
                | VaultError::DuplicateMember(_)
                | VaultError::UnknownVault(_)
                | VaultError::VaultMismatch { .. }
                | VaultError::InvalidPublicKey(_) => ErrorClass::Validation,
                _ => ErrorClass::Conflict,
            },
            EngineError::Ledger(e) => match e {
                LedgerError::UnknownToken(_)
                | LedgerError::UnknownChainToken { .. }
                | LedgerError::AmountTooLarge(_) => ErrorClass::Validation,
                _ => ErrorClass::Invariant,
            },
        }
    }
}
