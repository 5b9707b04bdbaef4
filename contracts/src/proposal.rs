//! # Proposal Book
//!
//! The voting primitive shared by every kind of committee decision. A
//! proposal is identified by the hash of the payload being voted on, so
//! members voting for the same outcome land on the same proposal and members
//! voting for different outcomes split across several.
//!
//! ## Slashing discipline
//!
//! Every vote on a proposal that has not finalized yet costs the voter a
//! small temporary penalty. When the proposal finalizes, every voter that
//! paid is refunded. Members who stay silent, or who vote for an outcome
//! that never finalizes, keep the penalty. Votes arriving after
//! finalization are recorded but cost nothing and change nothing. Members
//! blamed for a failed key generation are never refunded.
//!
//! Each proposal remembers the vault whose committee votes on it, so late
//! votes can still be checked against that committee.
//!
//! Finalization thresholds are decided by the caller; the book only counts.

use std::collections::BTreeSet;

use im::OrdMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use vaultkeeper_protocol::{Address, BlockNumber, Hash256};

use crate::events::{Effects, Event};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProposalError {
    #[error("{voter} already voted on proposal {proposal}")]
    AlreadyVoted { proposal: Hash256, voter: Address },

    #[error("proposal {0} is already finalized")]
    AlreadyFinalized(Hash256),

    #[error("proposal {0} does not exist")]
    UnknownProposal(Hash256),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    Keygen,
    Blame,
    TxIn,
    TxOut,
    NetworkFee,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Hash256,
    pub kind: ProposalKind,
    /// Key of the vault whose committee votes on this proposal. Key
    /// generation proposals carry the election sentinel.
    pub committee: Hash256,
    pub count: u32,
    pub voters: BTreeSet<Address>,
    /// Voters charged the temporary penalty and owed a refund.
    charged: BTreeSet<Address>,
    pub finalized: bool,
    pub created_at: BlockNumber,
    pub finalized_at: Option<BlockNumber>,
}

impl Proposal {
    fn new(id: Hash256, kind: ProposalKind, committee: Hash256, block: BlockNumber) -> Self {
        Self {
            id,
            kind,
            committee,
            count: 0,
            voters: BTreeSet::new(),
            charged: BTreeSet::new(),
            finalized: false,
            created_at: block,
            finalized_at: None,
        }
    }
}

/// Result of recording one vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub count: u32,
    /// The proposal had already finalized before this vote.
    pub late: bool,
}

/// Supermajority test: strictly more than `floor(2n / 3)` votes.
pub fn supermajority(count: u32, committee: usize) -> bool {
    count as usize > committee * 2 / 3
}

/// Smallest vote count that passes [`supermajority`].
pub fn supermajority_threshold(committee: usize) -> u32 {
    (committee * 2 / 3 + 1) as u32
}

/// All proposals, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalBook {
    proposals: OrdMap<Hash256, Proposal>,
    /// Finalized proposals whose vote records were pruned, mapped to their
    /// committee. Further votes on them are treated as late.
    compacted: OrdMap<Hash256, Hash256>,
}

impl ProposalBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Hash256) -> Option<&Proposal> {
        self.proposals.get(id)
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    pub fn is_finalized(&self, id: &Hash256) -> bool {
        self.compacted.contains_key(id) || self.proposals.get(id).is_some_and(|p| p.finalized)
    }

    /// The vault whose committee votes on `id`, pruned proposals included.
    pub fn committee(&self, id: &Hash256) -> Option<Hash256> {
        self.proposals
            .get(id)
            .map(|p| p.committee)
            .or_else(|| self.compacted.get(id).copied())
    }

    /// Records `voter`'s vote, creating the proposal on first use.
    ///
    /// Voting on an open proposal charges `penalty` slash points. The caller
    /// has already checked that `voter` sits on `committee`.
    #[allow(clippy::too_many_arguments)]
    pub fn vote(
        &mut self,
        id: Hash256,
        kind: ProposalKind,
        committee: Hash256,
        voter: Address,
        block: BlockNumber,
        penalty: u64,
        fx: &mut Effects,
    ) -> Result<Tally, ProposalError> {
        if self.compacted.contains_key(&id) {
            debug!(proposal = %id, %voter, "vote on compacted proposal ignored");
            return Ok(Tally { count: 0, late: true });
        }
        if let Some(existing) = self.proposals.get(&id) {
            if existing.voters.contains(&voter) {
                return Err(ProposalError::AlreadyVoted {
                    proposal: id,
                    voter,
                });
            }
        }

        if !self.proposals.contains_key(&id) {
            self.proposals
                .insert(id, Proposal::new(id, kind, committee, block));
        }
        let proposal = self
            .proposals
            .get_mut(&id)
            .ok_or(ProposalError::UnknownProposal(id))?;
        proposal.voters.insert(voter);
        proposal.count += 1;
        let late = proposal.finalized;
        if !late {
            proposal.charged.insert(voter);
            fx.slash(voter, penalty as i64);
        }
        fx.push(Event::VoteRecorded {
            proposal: id,
            voter,
            count: proposal.count,
        });
        debug!(proposal = %id, %voter, count = proposal.count, late, "vote recorded");
        Ok(Tally {
            count: proposal.count,
            late,
        })
    }

    /// Marks a proposal finalized and refunds every charged voter.
    pub fn finalize(
        &mut self,
        id: &Hash256,
        block: BlockNumber,
        penalty: u64,
        fx: &mut Effects,
    ) -> Result<(), ProposalError> {
        self.finalize_excluding(id, block, penalty, &[], fx)
    }

    /// Like [`finalize`](Self::finalize), but voters in `unrefunded` keep
    /// their penalty.
    pub fn finalize_excluding(
        &mut self,
        id: &Hash256,
        block: BlockNumber,
        penalty: u64,
        unrefunded: &[Address],
        fx: &mut Effects,
    ) -> Result<(), ProposalError> {
        let proposal = self
            .proposals
            .get_mut(id)
            .ok_or(ProposalError::UnknownProposal(*id))?;
        if proposal.finalized {
            return Err(ProposalError::AlreadyFinalized(*id));
        }
        proposal.finalized = true;
        proposal.finalized_at = Some(block);
        for voter in std::mem::take(&mut proposal.charged) {
            if !unrefunded.contains(&voter) {
                fx.slash(voter, -(penalty as i64));
            }
        }
        fx.push(Event::ProposalFinalized {
            proposal: *id,
            kind: proposal.kind,
        });
        info!(proposal = %id, kind = ?proposal.kind, votes = proposal.count, "proposal finalized");
        Ok(())
    }

    /// Drops open proposals older than `ttl` and compacts finalized ones
    /// that finalized more than `ttl` blocks ago. Returns
    /// `(expired, compacted)`.
    pub fn prune(&mut self, block: BlockNumber, ttl: BlockNumber) -> (usize, usize) {
        let stale: Vec<(Hash256, bool, Hash256)> = self
            .proposals
            .iter()
            .filter(|(_, p)| {
                let since = p.finalized_at.unwrap_or(p.created_at);
                since.saturating_add(ttl) < block
            })
            .map(|(id, p)| (*id, p.finalized, p.committee))
            .collect();

        let mut expired = 0;
        let mut compacted = 0;
        for (id, finalized, committee) in stale {
            self.proposals.remove(&id);
            if finalized {
                self.compacted.insert(id, committee);
                compacted += 1;
            } else {
                expired += 1;
            }
        }
        if expired + compacted > 0 {
            info!(expired, compacted, block, "proposals pruned");
        }
        (expired, compacted)
    }
}
