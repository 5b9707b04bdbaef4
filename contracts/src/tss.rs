//! # Threshold Consensus
//!
//! Committee votes on key generation, inbound and outbound transfers and
//! network fees. Each vote names a payload; identical payloads share one
//! [`Proposal`](crate::proposal::Proposal) and finalize together.
//!
//! | Decision         | Voters                     | Finalizes when          |
//! |------------------|----------------------------|-------------------------|
//! | key generation   | the elected committee      | every member agrees     |
//! | keygen blame     | the elected committee      | `> floor(2n/3)` agree   |
//! | tx-in / tx-out   | committee of the custodian | `> floor(2n/3)` agree   |
//! | network fee      | committee of the custodian | `> floor(2n/3)` agree   |
//!
//! The custodian of a chain is the retiring vault until the chain has been
//! migrated and the active vault otherwise.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use vaultkeeper_protocol::config::EngineConfig;
use vaultkeeper_protocol::crypto::{
    address_from_pubkey, recover_signer, validate_public_key, vault_key, ContentHasher,
    CryptoError,
};
use vaultkeeper_protocol::types::hex_bytes;
use vaultkeeper_protocol::{Address, Amount, BlockNumber, ChainId, Epoch, Hash256, TokenId};

use crate::engine::EngineState;
use crate::error::EngineError;
use crate::events::{Effects, Event, NetworkFee, OrderKind, OutboundOrder, RelayDelivery};
use crate::ledger::LedgerError;
use crate::proposal::{supermajority, supermajority_threshold, ProposalError, ProposalKind};
use crate::rebalance::{self, Movement};
use crate::vault::{VaultError, VaultRecord, VaultStatus};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("{voter} is not a member of the voting committee")]
    UnknownVoter { voter: Address },

    #[error("election for epoch {epoch} is {status}")]
    ElectionClosed { epoch: Epoch, status: VaultStatus },

    #[error("keygen window for epoch {epoch} closed at block {deadline}")]
    ProposalExpired { epoch: Epoch, deadline: BlockNumber },

    #[error("voted member set differs from the elected committee")]
    MembersMismatch,

    #[error("key signature does not match the public key")]
    InvalidKeySignature,

    #[error("invalid public key: {0}")]
    InvalidPublicKey(#[from] CryptoError),

    #[error("blamed address {0} is not a committee member")]
    InvalidBlame(Address),

    #[error("amount must be positive")]
    ZeroAmount,

    #[error("invalid route from chain {from} to chain {to}")]
    InvalidRoute { from: ChainId, to: ChainId },

    #[error("order {0} was already processed")]
    DuplicateOrder(Hash256),

    #[error("no outbound order {0}")]
    UnknownOrder(Hash256),

    #[error("confirmation does not match outbound order {0}")]
    OrderMismatch(Hash256),
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A member's report on key generation for `epoch`.
///
/// Empty `blames` reports success with `pubkey`, signed by the new key over
/// its own hash. Non-empty `blames` reports failure and names the members
/// held responsible; `pubkey` and `signature` are then ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeygenVote {
    pub epoch: Epoch,
    pub members: Vec<Address>,
    #[serde(default)]
    pub blames: Vec<Address>,
    #[serde(with = "hex_bytes", default)]
    pub pubkey: Vec<u8>,
    #[serde(with = "hex_bytes", default)]
    pub signature: Vec<u8>,
}

/// An observed deposit into a vault on `from_chain`, destined for `to_chain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub order_id: Hash256,
    pub from_chain: ChainId,
    pub to_chain: ChainId,
    pub token: TokenId,
    pub amount: Amount,
    #[serde(with = "hex_bytes")]
    pub from: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub to: Vec<u8>,
    #[serde(with = "hex_bytes", default)]
    pub payload: Vec<u8>,
    /// Source-chain height of the deposit.
    pub height: u64,
}

impl TxIn {
    pub fn proposal_id(&self) -> Hash256 {
        ContentHasher::new("vaultkeeper/tx-in")
            .fixed(self.order_id.as_bytes())
            .u64(self.from_chain)
            .u64(self.to_chain)
            .fixed(self.token.as_bytes())
            .u128(self.amount)
            .bytes(&self.from)
            .bytes(&self.to)
            .bytes(&self.payload)
            .u64(self.height)
            .finish()
    }
}

/// An observed outbound transfer that executes an [`OutboundOrder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub order_id: Hash256,
    pub chain: ChainId,
    pub token: TokenId,
    pub amount: Amount,
    #[serde(with = "hex_bytes")]
    pub tx_hash: Vec<u8>,
}

impl TxOut {
    pub fn proposal_id(&self) -> Hash256 {
        ContentHasher::new("vaultkeeper/tx-out")
            .fixed(self.order_id.as_bytes())
            .u64(self.chain)
            .fixed(self.token.as_bytes())
            .u128(self.amount)
            .bytes(&self.tx_hash)
            .finish()
    }
}

/// A network fee reading for a foreign chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeObservation {
    pub chain: ChainId,
    pub height: u64,
    pub fee_per_gas: Amount,
}

impl FeeObservation {
    pub fn proposal_id(&self) -> Hash256 {
        ContentHasher::new("vaultkeeper/network-fee")
            .u64(self.chain)
            .u64(self.height)
            .u128(self.fee_per_gas)
            .finish()
    }
}

/// A relay-chain user asking for funds on a foreign chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayTransfer {
    pub order_id: Hash256,
    pub to_chain: ChainId,
    pub token: TokenId,
    pub amount: Amount,
    #[serde(with = "hex_bytes")]
    pub from: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub to: Vec<u8>,
}

/// Proposal id for a successful key generation.
pub fn keygen_proposal_id(
    epoch: Epoch,
    elected_at: BlockNumber,
    pubkey: &[u8],
    members: &[Address],
) -> Hash256 {
    let mut hasher = ContentHasher::new("vaultkeeper/keygen");
    hasher.u64(epoch).u64(elected_at).bytes(pubkey);
    hasher.u64(members.len() as u64);
    for member in members {
        hasher.fixed(member.as_bytes());
    }
    hasher.finish()
}

/// Proposal id for a failed key generation blaming `blamed`.
pub fn blame_proposal_id(epoch: Epoch, elected_at: BlockNumber, blamed: &[Address]) -> Hash256 {
    let mut hasher = ContentHasher::new("vaultkeeper/keygen-blame");
    hasher.u64(epoch).u64(elected_at).u64(blamed.len() as u64);
    for member in blamed {
        hasher.fixed(member.as_bytes());
    }
    hasher.finish()
}

fn refund_order_id(order_id: &Hash256) -> Hash256 {
    ContentHasher::new("vaultkeeper/refund")
        .fixed(order_id.as_bytes())
        .finish()
}

fn sorted_unique(addresses: &[Address]) -> Vec<Address> {
    let mut out = addresses.to_vec();
    out.sort();
    out.dedup();
    out
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What a vote achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    /// Recorded; the proposal still needs `needed` votes in total.
    Pending {
        proposal: Hash256,
        count: u32,
        needed: u32,
    },
    /// This vote finalized the proposal.
    Finalized { proposal: Hash256 },
    /// The proposal had already finalized; the vote changed nothing.
    Late { proposal: Hash256 },
}

/// Result of a relay-originated transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    Issued { order_id: Hash256, net_amount: Amount },
    Refunded { order_id: Hash256 },
}

// ---------------------------------------------------------------------------
// Voting
// ---------------------------------------------------------------------------

impl EngineState {
    fn custodian(&self, chain: ChainId) -> Result<&VaultRecord, EngineError> {
        Ok(self.vaults.vault_for_chain(chain)?)
    }

    fn check_voter(record: &VaultRecord, voter: &Address) -> Result<(), EngineError> {
        if !record.is_member(voter) {
            return Err(ConsensusError::UnknownVoter { voter: *voter }.into());
        }
        Ok(())
    }

    /// Records a vote on a proposal that has already finalized. The voter
    /// must still sit on the committee that decided it; the vote is free.
    fn late_vote(
        &mut self,
        id: Hash256,
        kind: ProposalKind,
        voter: Address,
        fx: &mut Effects,
    ) -> Result<VoteOutcome, EngineError> {
        let key = self
            .proposals
            .committee(&id)
            .ok_or(ProposalError::UnknownProposal(id))?;
        let committee = self.vaults.vault(&key).ok_or(VaultError::UnknownVault(key))?;
        Self::check_voter(committee, &voter)?;
        let tally = self.proposals.vote(id, kind, key, voter, self.block, 0, fx)?;
        debug_assert!(tally.late);
        Ok(VoteOutcome::Late { proposal: id })
    }

    /// Records a key-generation vote.
    pub(crate) fn vote_keygen(
        &mut self,
        config: &EngineConfig,
        voter: Address,
        vote: &KeygenVote,
        fx: &mut Effects,
    ) -> Result<VoteOutcome, EngineError> {
        let block = self.block;
        let election = self
            .vaults
            .election(vote.epoch)
            .ok_or(VaultError::NoPendingElection(vote.epoch))?;
        if election.status != VaultStatus::KeygenPending {
            return Err(ConsensusError::ElectionClosed {
                epoch: vote.epoch,
                status: election.status,
            }
            .into());
        }
        let deadline = election.elected_at.saturating_add(config.keygen_window_blocks);
        if block > deadline {
            return Err(ConsensusError::ProposalExpired {
                epoch: vote.epoch,
                deadline,
            }
            .into());
        }
        Self::check_voter(election, &voter)?;
        let election_key = election.key;
        let committee = election.members.clone();
        let elected_at = election.elected_at;
        let n = committee.len();

        let blamed = sorted_unique(&vote.blames);
        let success = blamed.is_empty();
        let (id, kind) = if success {
            if sorted_unique(&vote.members) != committee || vote.members.len() != n {
                return Err(ConsensusError::MembersMismatch.into());
            }
            validate_public_key(&vote.pubkey).map_err(ConsensusError::from)?;
            let signer = recover_signer(&vault_key(&vote.pubkey), &vote.signature)
                .map_err(|_| ConsensusError::InvalidKeySignature)?;
            let expected = address_from_pubkey(&vote.pubkey).map_err(ConsensusError::from)?;
            if signer != expected {
                return Err(ConsensusError::InvalidKeySignature.into());
            }
            (
                keygen_proposal_id(vote.epoch, elected_at, &vote.pubkey, &committee),
                ProposalKind::Keygen,
            )
        } else {
            if let Some(outsider) = blamed.iter().find(|b| committee.binary_search(b).is_err()) {
                return Err(ConsensusError::InvalidBlame(*outsider).into());
            }
            (
                blame_proposal_id(vote.epoch, elected_at, &blamed),
                ProposalKind::Blame,
            )
        };

        let tally = self
            .proposals
            .vote(id, kind, election_key, voter, block, config.vote_slash_points, fx)?;
        if tally.late {
            return Ok(VoteOutcome::Late { proposal: id });
        }
        let (reached, needed) = if success {
            (tally.count as usize == n, n as u32)
        } else {
            (supermajority(tally.count, n), supermajority_threshold(n))
        };
        if !reached {
            return Ok(VoteOutcome::Pending {
                proposal: id,
                count: tally.count,
                needed,
            });
        }

        // Blamed members who voted keep their vote penalty on top of the
        // blame penalty.
        self.proposals
            .finalize_excluding(&id, block, config.vote_slash_points, &blamed, fx)?;
        if success {
            let key = self.vaults.complete_keygen(vote.epoch, &vote.pubkey, block)?;
            fx.push(Event::KeygenCompleted {
                epoch: vote.epoch,
                vault: key,
            });
        } else {
            self.vaults.fail_keygen(vote.epoch, block)?;
            for member in &blamed {
                fx.slash(*member, config.blame_slash_points as i64);
            }
            warn!(epoch = vote.epoch, blamed = blamed.len(), "keygen failed with blame");
            fx.push(Event::KeygenFailed {
                epoch: vote.epoch,
                blamed,
            });
        }
        Ok(VoteOutcome::Finalized { proposal: id })
    }

    /// Records a vote on an observed deposit.
    pub(crate) fn vote_tx_in(
        &mut self,
        config: &EngineConfig,
        voter: Address,
        tx: &TxIn,
        fx: &mut Effects,
    ) -> Result<VoteOutcome, EngineError> {
        if tx.amount == 0 {
            return Err(ConsensusError::ZeroAmount.into());
        }
        let id = tx.proposal_id();
        if self.proposals.is_finalized(&id) {
            return self.late_vote(id, ProposalKind::TxIn, voter, fx);
        }
        if tx.from_chain == tx.to_chain || tx.from_chain == config.relay_chain {
            return Err(ConsensusError::InvalidRoute {
                from: tx.from_chain,
                to: tx.to_chain,
            }
            .into());
        }
        if self.processed.contains(&tx.order_id) {
            return Err(ConsensusError::DuplicateOrder(tx.order_id).into());
        }
        if !self.ledger.is_configured(&tx.token, tx.from_chain) {
            return Err(LedgerError::UnknownChainToken {
                token: tx.token,
                chain: tx.from_chain,
            }
            .into());
        }
        if tx.to_chain != config.relay_chain {
            self.custodian(tx.to_chain)?;
            if !self.ledger.is_configured(&tx.token, tx.to_chain) {
                return Err(LedgerError::UnknownChainToken {
                    token: tx.token,
                    chain: tx.to_chain,
                }
                .into());
            }
        }
        let committee = self.custodian(tx.from_chain)?;
        Self::check_voter(committee, &voter)?;
        let n = committee.members.len();
        let key = committee.key;

        let tally = self
            .proposals
            .vote(id, ProposalKind::TxIn, key, voter, self.block, config.vote_slash_points, fx)?;
        if !supermajority(tally.count, n) {
            return Ok(VoteOutcome::Pending {
                proposal: id,
                count: tally.count,
                needed: supermajority_threshold(n),
            });
        }
        self.proposals
            .finalize(&id, self.block, config.vote_slash_points, fx)?;
        self.execute_tx_in(config, tx, fx)?;
        Ok(VoteOutcome::Finalized { proposal: id })
    }

    fn execute_tx_in(&mut self, config: &EngineConfig, tx: &TxIn, fx: &mut Effects) -> Result<(), EngineError> {
        self.processed.insert(tx.order_id);
        let to_relay = tx.to_chain == config.relay_chain;
        let movement = Movement {
            inflow: Some(tx.from_chain),
            outflow: (!to_relay).then_some(tx.to_chain),
            amount: tx.amount,
        };
        let token_state = self
            .ledger
            .token(&tx.token)
            .ok_or(LedgerError::UnknownToken(tx.token))?;
        let quote = rebalance::quote(&config.fees, token_state, &movement);
        self.ledger.credit(&tx.token, tx.from_chain, tx.amount)?;

        if to_relay {
            let net = self.apply_quote(tx.order_id, tx.token, tx.amount, &quote, fx)?;
            let delivery = RelayDelivery {
                order_id: tx.order_id,
                token: tx.token,
                amount: net,
                to: tx.to.clone(),
                refund: false,
            };
            info!(order = %tx.order_id, amount = net, "deposit delivered on relay chain");
            fx.push(Event::RelayDelivery(delivery));
            return Ok(());
        }

        let wanted_net = quote.net_amount(tx.amount, self.affordable_incentive(&tx.token, &quote));
        match self.ledger.reserve(&tx.token, tx.to_chain, wanted_net) {
            Ok(()) => {
                let net = self.apply_quote(tx.order_id, tx.token, tx.amount, &quote, fx)?;
                debug_assert_eq!(net, wanted_net);
                let vault = self.custodian(tx.to_chain)?.key;
                self.issue_order(
                    OutboundOrder {
                        order_id: tx.order_id,
                        kind: OrderKind::Transfer,
                        chain: tx.to_chain,
                        token: tx.token,
                        amount: net,
                        to: tx.to.clone(),
                        vault,
                        issued_at: self.block,
                    },
                    fx,
                );
            }
            Err(LedgerError::InsufficientAvailable { available, .. }) => {
                warn!(
                    order = %tx.order_id,
                    chain = tx.to_chain,
                    available,
                    requested = wanted_net,
                    "destination short of funds, refunding"
                );
                self.ledger.reserve(&tx.token, tx.from_chain, tx.amount)?;
                let vault = self.custodian(tx.from_chain)?.key;
                self.issue_order(
                    OutboundOrder {
                        order_id: refund_order_id(&tx.order_id),
                        kind: OrderKind::Refund,
                        chain: tx.from_chain,
                        token: tx.token,
                        amount: tx.amount,
                        to: tx.from.clone(),
                        vault,
                        issued_at: self.block,
                    },
                    fx,
                );
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn affordable_incentive(&self, token: &TokenId, quote: &rebalance::RebalanceQuote) -> Amount {
        let pool = self.ledger.token(token).map(|t| t.accrued_fees).unwrap_or(0);
        quote.incentive.min(pool)
    }

    /// Books the fee or pays the incentive, returning the net amount.
    fn apply_quote(
        &mut self,
        order_id: Hash256,
        token: TokenId,
        amount: Amount,
        quote: &rebalance::RebalanceQuote,
        fx: &mut Effects,
    ) -> Result<Amount, EngineError> {
        let paid = if quote.fee > 0 {
            self.ledger.accrue_fee(&token, quote.fee)?;
            0
        } else {
            self.ledger.pay_incentive(&token, quote.incentive)?
        };
        if quote.fee > 0 || paid > 0 {
            fx.push(Event::RebalanceFee {
                order_id,
                token,
                rate_ppm: quote.rate_ppm,
                fee: quote.fee,
                incentive: paid,
            });
        }
        Ok(quote.net_amount(amount, paid))
    }

    pub(crate) fn issue_order(&mut self, order: OutboundOrder, fx: &mut Effects) {
        info!(
            order = %order.order_id,
            kind = ?order.kind,
            chain = order.chain,
            amount = order.amount,
            "outbound order issued"
        );
        self.outbound.insert(order.order_id, order.clone());
        fx.push(Event::OutboundIssued(order));
    }

    /// Records a vote confirming an outbound transfer.
    pub(crate) fn vote_tx_out(
        &mut self,
        config: &EngineConfig,
        voter: Address,
        tx: &TxOut,
        fx: &mut Effects,
    ) -> Result<VoteOutcome, EngineError> {
        let id = tx.proposal_id();
        if self.proposals.is_finalized(&id) {
            // The order is gone once confirmed; a straggler only gets recorded.
            return self.late_vote(id, ProposalKind::TxOut, voter, fx);
        }
        let order = self
            .outbound
            .get(&tx.order_id)
            .ok_or(ConsensusError::UnknownOrder(tx.order_id))?;
        if order.chain != tx.chain || order.token != tx.token || order.amount != tx.amount {
            return Err(ConsensusError::OrderMismatch(tx.order_id).into());
        }
        let committee = self
            .vaults
            .vault(&order.vault)
            .ok_or(VaultError::UnknownVault(order.vault))?;
        Self::check_voter(committee, &voter)?;
        let n = committee.members.len();
        let key = committee.key;

        let tally = self
            .proposals
            .vote(id, ProposalKind::TxOut, key, voter, self.block, config.vote_slash_points, fx)?;
        if !supermajority(tally.count, n) {
            return Ok(VoteOutcome::Pending {
                proposal: id,
                count: tally.count,
                needed: supermajority_threshold(n),
            });
        }
        self.proposals
            .finalize(&id, self.block, config.vote_slash_points, fx)?;

        let order = self
            .outbound
            .remove(&tx.order_id)
            .ok_or(ConsensusError::UnknownOrder(tx.order_id))?;
        match order.kind {
            OrderKind::Migration => self.ledger.settle_migration(&order.token, order.chain, order.amount)?,
            OrderKind::Transfer | OrderKind::Refund => {
                self.ledger.settle(&order.token, order.chain, order.amount)?
            }
        }
        info!(order = %order.order_id, kind = ?order.kind, "outbound transfer confirmed");
        fx.push(Event::OutboundConfirmed {
            order_id: order.order_id,
            kind: order.kind,
        });
        Ok(VoteOutcome::Finalized { proposal: id })
    }

    /// Records a vote on a network fee reading.
    pub(crate) fn vote_network_fee(
        &mut self,
        config: &EngineConfig,
        voter: Address,
        observation: &FeeObservation,
        fx: &mut Effects,
    ) -> Result<VoteOutcome, EngineError> {
        let id = observation.proposal_id();
        if self.proposals.is_finalized(&id) {
            return self.late_vote(id, ProposalKind::NetworkFee, voter, fx);
        }
        let committee = self.custodian(observation.chain)?;
        Self::check_voter(committee, &voter)?;
        let n = committee.members.len();
        let key = committee.key;

        let tally = self.proposals.vote(
            id,
            ProposalKind::NetworkFee,
            key,
            voter,
            self.block,
            config.vote_slash_points,
            fx,
        )?;
        if !supermajority(tally.count, n) {
            return Ok(VoteOutcome::Pending {
                proposal: id,
                count: tally.count,
                needed: supermajority_threshold(n),
            });
        }
        self.proposals
            .finalize(&id, self.block, config.vote_slash_points, fx)?;

        let stale = self
            .network_fees
            .get(&observation.chain)
            .is_some_and(|current| current.height >= observation.height);
        if stale {
            info!(chain = observation.chain, height = observation.height, "stale fee observation ignored");
        } else {
            let fee = NetworkFee {
                height: observation.height,
                fee_per_gas: observation.fee_per_gas,
                updated_at: self.block,
            };
            self.network_fees.insert(observation.chain, fee);
            fx.push(Event::NetworkFeeUpdated {
                chain: observation.chain,
                fee,
            });
        }
        Ok(VoteOutcome::Finalized { proposal: id })
    }

    /// Pays out on a foreign chain for a relay-chain user.
    ///
    /// Funds the destination cannot cover are returned on the relay chain.
    pub(crate) fn transfer_out(
        &mut self,
        config: &EngineConfig,
        transfer: &RelayTransfer,
        fx: &mut Effects,
    ) -> Result<TransferOutcome, EngineError> {
        if transfer.amount == 0 {
            return Err(ConsensusError::ZeroAmount.into());
        }
        if transfer.to_chain == config.relay_chain {
            return Err(ConsensusError::InvalidRoute {
                from: config.relay_chain,
                to: transfer.to_chain,
            }
            .into());
        }
        if self.processed.contains(&transfer.order_id) || self.outbound.contains_key(&transfer.order_id) {
            return Err(ConsensusError::DuplicateOrder(transfer.order_id).into());
        }
        let vault = self.custodian(transfer.to_chain)?.key;
        let token_state = self
            .ledger
            .token(&transfer.token)
            .ok_or(LedgerError::UnknownToken(transfer.token))?;
        if !token_state.chains.contains_key(&transfer.to_chain) {
            return Err(LedgerError::UnknownChainToken {
                token: transfer.token,
                chain: transfer.to_chain,
            }
            .into());
        }
        let movement = Movement {
            inflow: None,
            outflow: Some(transfer.to_chain),
            amount: transfer.amount,
        };
        let quote = rebalance::quote(&config.fees, token_state, &movement);
        let wanted_net = quote.net_amount(
            transfer.amount,
            self.affordable_incentive(&transfer.token, &quote),
        );
        self.processed.insert(transfer.order_id);

        match self.ledger.reserve(&transfer.token, transfer.to_chain, wanted_net) {
            Ok(()) => {
                let net = self.apply_quote(transfer.order_id, transfer.token, transfer.amount, &quote, fx)?;
                self.issue_order(
                    OutboundOrder {
                        order_id: transfer.order_id,
                        kind: OrderKind::Transfer,
                        chain: transfer.to_chain,
                        token: transfer.token,
                        amount: net,
                        to: transfer.to.clone(),
                        vault,
                        issued_at: self.block,
                    },
                    fx,
                );
                Ok(TransferOutcome::Issued {
                    order_id: transfer.order_id,
                    net_amount: net,
                })
            }
            Err(LedgerError::InsufficientAvailable { available, .. }) => {
                warn!(
                    order = %transfer.order_id,
                    chain = transfer.to_chain,
                    available,
                    "destination short of funds, refunding on relay chain"
                );
                fx.push(Event::RelayDelivery(RelayDelivery {
                    order_id: transfer.order_id,
                    token: transfer.token,
                    amount: transfer.amount,
                    to: transfer.from.clone(),
                    refund: true,
                }));
                Ok(TransferOutcome::Refunded {
                    order_id: transfer.order_id,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keygen_id_depends_on_every_field() {
        let members = vec![Address::repeat_byte(1), Address::repeat_byte(2)];
        let base = keygen_proposal_id(1, 10, &[7; 64], &members);
        assert_ne!(base, keygen_proposal_id(2, 10, &[7; 64], &members));
        assert_ne!(base, keygen_proposal_id(1, 11, &[7; 64], &members));
        assert_ne!(base, keygen_proposal_id(1, 10, &[8; 64], &members));
        assert_ne!(base, keygen_proposal_id(1, 10, &[7; 64], &members[..1]));
    }

    #[test]
    fn blame_and_keygen_ids_are_disjoint() {
        let members = vec![Address::repeat_byte(1)];
        assert_ne!(
            keygen_proposal_id(1, 10, &[], &members),
            blame_proposal_id(1, 10, &members)
        );
    }

    #[test]
    fn tx_in_id_covers_amount() {
        let tx = TxIn {
            order_id: Hash256::repeat_byte(1),
            from_chain: 1,
            to_chain: 2,
            token: TokenId::repeat_byte(3),
            amount: 100,
            from: vec![1],
            to: vec![2],
            payload: vec![],
            height: 5,
        };
        let mut other = tx.clone();
        other.amount = 101;
        assert_ne!(tx.proposal_id(), other.proposal_id());
        assert_eq!(tx.proposal_id(), tx.clone().proposal_id());
    }

    #[test]
    fn refund_id_differs_from_order() {
        let id = Hash256::repeat_byte(4);
        assert_ne!(refund_order_id(&id), id);
    }

    #[test]
    fn keygen_vote_json_uses_hex() {
        let vote = KeygenVote {
            epoch: 3,
            members: vec![Address::repeat_byte(1)],
            blames: vec![],
            pubkey: vec![0xab; 2],
            signature: vec![],
        };
        let json = serde_json::to_value(&vote).unwrap();
        assert_eq!(json["pubkey"], "0xabab");
        let back: KeygenVote = serde_json::from_value(json).unwrap();
        assert_eq!(back, vote);
    }
}
