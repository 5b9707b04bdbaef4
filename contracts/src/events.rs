//! # Engine Events
//!
//! Everything a command changes is reported as an [`Event`]. Events are
//! collected while the command runs and only leave the engine after its
//! state change has been committed: a rejected command emits nothing.
//!
//! A subset of events is also forwarded to external collaborators (slash
//! adjustments to the maintainer registry, deliveries and outbound orders to
//! the relay sink); see [`crate::interfaces`].

use serde::{Deserialize, Serialize};

use vaultkeeper_protocol::types::hex_bytes;
use vaultkeeper_protocol::{Address, Amount, BlockNumber, ChainId, Epoch, Hash256, TokenId};

use crate::proposal::ProposalKind;

/// Why funds are leaving a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// A user transfer to its destination chain.
    Transfer,
    /// A user transfer returned to its source because the destination was
    /// short of funds.
    Refund,
    /// A migration tranche from the retiring vault to the active one.
    Migration,
}

/// An instruction for a committee to sign and broadcast a transfer on a
/// foreign chain. Funds are reserved in the ledger until the transfer is
/// confirmed by a finalized tx-out vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundOrder {
    pub order_id: Hash256,
    pub kind: OrderKind,
    pub chain: ChainId,
    pub token: TokenId,
    pub amount: Amount,
    /// Recipient on the destination chain.
    #[serde(with = "hex_bytes")]
    pub to: Vec<u8>,
    /// Vault whose committee signs the transfer.
    pub vault: Hash256,
    pub issued_at: BlockNumber,
}

/// Funds released on the relay chain itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDelivery {
    pub order_id: Hash256,
    pub token: TokenId,
    pub amount: Amount,
    #[serde(with = "hex_bytes")]
    pub to: Vec<u8>,
    /// The transfer could not be completed and this returns the funds.
    pub refund: bool,
}

/// Latest agreed network fee of a foreign chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkFee {
    /// Foreign-chain height the observation was taken at.
    pub height: u64,
    pub fee_per_gas: Amount,
    pub updated_at: BlockNumber,
}

/// State changes reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    ChainRegistered {
        chain: ChainId,
    },
    TokenConfigured {
        token: TokenId,
        chain: ChainId,
        weight: u64,
    },
    ElectionStarted {
        epoch: Epoch,
        members: Vec<Address>,
    },
    VoteRecorded {
        proposal: Hash256,
        voter: Address,
        count: u32,
    },
    ProposalFinalized {
        proposal: Hash256,
        kind: ProposalKind,
    },
    /// Signed change to a member's slash points.
    SlashPoints {
        member: Address,
        delta: i64,
    },
    KeygenCompleted {
        epoch: Epoch,
        vault: Hash256,
    },
    KeygenFailed {
        epoch: Epoch,
        blamed: Vec<Address>,
    },
    VaultRotated {
        active: Hash256,
        retiring: Option<Hash256>,
    },
    RebalanceFee {
        order_id: Hash256,
        token: TokenId,
        rate_ppm: i64,
        fee: Amount,
        incentive: Amount,
    },
    RelayDelivery(RelayDelivery),
    OutboundIssued(OutboundOrder),
    OutboundConfirmed {
        order_id: Hash256,
        kind: OrderKind,
    },
    NetworkFeeUpdated {
        chain: ChainId,
        fee: NetworkFee,
    },
    ContractMigrationRequested {
        chain: ChainId,
        from: Hash256,
        to: Hash256,
    },
    ChainMigrated {
        chain: ChainId,
    },
    VaultRetired {
        vault: Hash256,
    },
    ProposalsPruned {
        expired: usize,
        compacted: usize,
    },
}

/// Events collected during one command.
#[derive(Debug, Default)]
pub struct Effects {
    events: Vec<Event>,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn slash(&mut self, member: Address, delta: i64) {
        if delta != 0 {
            self.events.push(Event::SlashPoints { member, delta });
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}
