//! # Commands
//!
//! The engine is driven by a single ordered stream of commands. Each one is
//! wrapped in an [`Envelope`] carrying the relay-chain block it executes at
//! and the authenticated sender, and produces a [`Receipt`] or an error.
//!
//! Orchestration commands (registry updates, elections, rotations,
//! heartbeats) are accepted only from the configured orchestrator. Votes
//! are accepted from anyone and checked against committee membership.

use serde::{Deserialize, Serialize};

use vaultkeeper_protocol::types::hex_bytes;
use vaultkeeper_protocol::{Address, Amount, BlockNumber, ChainId, Epoch, Hash256, TokenId};

use crate::events::Event;
use crate::migration::MigrationReport;
use crate::tss::{FeeObservation, KeygenVote, RelayTransfer, TransferOutcome, TxIn, TxOut, VoteOutcome};
use crate::vault::ChainKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    RegisterChain {
        chain: ChainId,
        kind: ChainKind,
    },
    ConfigureToken {
        token: TokenId,
        chain: ChainId,
        weight: u64,
        min_amount: Amount,
    },
    /// Start key generation for `epoch` with the committee the maintainer
    /// registry reports.
    Elect {
        epoch: Epoch,
    },
    VoteKeygen(KeygenVote),
    /// Promote `active` and retire `retiring` (absent on bootstrap).
    Rotate {
        #[serde(with = "option_hex", default)]
        retiring: Option<Vec<u8>>,
        #[serde(with = "hex_bytes")]
        active: Vec<u8>,
    },
    VoteTxIn(TxIn),
    VoteTxOut(TxOut),
    VoteNetworkFee(FeeObservation),
    TransferOut(RelayTransfer),
    ConfirmContractMigration {
        chain: ChainId,
    },
    MigrationHeartbeat,
    PruneProposals,
}

impl Command {
    /// Whether only the orchestrator may submit this command.
    pub fn requires_orchestrator(&self) -> bool {
        !matches!(
            self,
            Command::VoteKeygen(_)
                | Command::VoteTxIn(_)
                | Command::VoteTxOut(_)
                | Command::VoteNetworkFee(_)
        )
    }

    /// Short label for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::RegisterChain { .. } => "register_chain",
            Command::ConfigureToken { .. } => "configure_token",
            Command::Elect { .. } => "elect",
            Command::VoteKeygen(_) => "vote_keygen",
            Command::Rotate { .. } => "rotate",
            Command::VoteTxIn(_) => "vote_tx_in",
            Command::VoteTxOut(_) => "vote_tx_out",
            Command::VoteNetworkFee(_) => "vote_network_fee",
            Command::TransferOut(_) => "transfer_out",
            Command::ConfirmContractMigration { .. } => "confirm_contract_migration",
            Command::MigrationHeartbeat => "migration_heartbeat",
            Command::PruneProposals => "prune_proposals",
        }
    }
}

mod option_hex {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Wrapped(#[serde(with = "vaultkeeper_protocol::types::hex_bytes")] Vec<u8>);

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        value.as_ref().map(|v| Wrapped(v.clone())).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|w| w.0))
    }
}

/// A command with its execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub block: BlockNumber,
    pub sender: Address,
    pub command: Command,
}

/// Command-specific result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Configured,
    Elected { epoch: Epoch, members: usize },
    Vote(VoteOutcome),
    Rotated {
        active: Hash256,
        retiring: Option<Hash256>,
    },
    Transfer(TransferOutcome),
    ContractMigrated { chain: ChainId },
    Migration(MigrationReport),
    Pruned { expired: usize, compacted: usize },
}

/// Result of an applied command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Position of the command in the applied stream, starting at 0.
    pub sequence: u64,
    pub block: BlockNumber,
    pub outcome: Outcome,
    pub events: Vec<Event>,
}
