//! # Engine Core
//!
//! [`Core`] owns the whole engine state and applies commands one at a
//! time. Application is transactional: the command runs against a copy of
//! the state and the copy replaces the original only if every step
//! succeeded. Collections that grow with history are `im` persistent maps,
//! so the copy shares structure with the original and costs no more than
//! the bounded configuration it carries. Events collected along the way are dispatched to the
//! maintainer registry and the relay sink after the commit, so external
//! collaborators never observe a change that was rolled back.

use std::collections::BTreeMap;

use im::{OrdMap, OrdSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vaultkeeper_protocol::config::EngineConfig;
use vaultkeeper_protocol::{Address, BlockNumber, ChainId, Epoch, Hash256};

use crate::command::{Command, Envelope, Outcome, Receipt};
use crate::error::EngineError;
use crate::events::{Effects, Event, NetworkFee, OutboundOrder};
use crate::interfaces::{MaintainerRegistry, RelaySink};
use crate::ledger::BalanceLedger;
use crate::proposal::ProposalBook;
use crate::vault::{ChainInfo, VaultError, VaultRegistry};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Everything the engine owns. Serializable so the node can snapshot it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    /// Block of the last applied command.
    pub(crate) block: BlockNumber,
    /// Number of commands applied so far.
    pub(crate) sequence: u64,
    pub(crate) ledger: BalanceLedger,
    pub(crate) vaults: VaultRegistry,
    pub(crate) proposals: ProposalBook,
    /// Outbound orders awaiting confirmation.
    pub(crate) outbound: OrdMap<Hash256, OutboundOrder>,
    /// Deposit and relay-transfer order ids already executed.
    pub(crate) processed: OrdSet<Hash256>,
    pub(crate) network_fees: BTreeMap<ChainId, NetworkFee>,
}

impl EngineState {
    pub fn block(&self) -> BlockNumber {
        self.block
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    pub fn vaults(&self) -> &VaultRegistry {
        &self.vaults
    }

    pub fn proposals(&self) -> &ProposalBook {
        &self.proposals
    }

    pub fn outbound(&self) -> impl Iterator<Item = &OutboundOrder> {
        self.outbound.values()
    }

    pub fn outbound_order(&self, order_id: &Hash256) -> Option<&OutboundOrder> {
        self.outbound.get(order_id)
    }

    pub fn is_processed(&self, order_id: &Hash256) -> bool {
        self.processed.contains(order_id)
    }

    pub fn network_fee(&self, chain: ChainId) -> Option<&NetworkFee> {
        self.network_fees.get(&chain)
    }

    fn elect(
        &mut self,
        config: &EngineConfig,
        maintainers: &dyn MaintainerRegistry,
        epoch: Epoch,
        fx: &mut Effects,
    ) -> Result<Outcome, EngineError> {
        let members = maintainers
            .committee(epoch)
            .ok_or(VaultError::EmptyCommittee(epoch))?;
        let record = self
            .vaults
            .begin_election(epoch, members, self.block, config.keygen_window_blocks)?;
        let members = record.members.clone();
        let count = members.len();
        fx.push(Event::ElectionStarted { epoch, members });
        Ok(Outcome::Elected {
            epoch,
            members: count,
        })
    }

    fn execute(
        &mut self,
        config: &EngineConfig,
        maintainers: &dyn MaintainerRegistry,
        sender: Address,
        command: &Command,
        fx: &mut Effects,
    ) -> Result<Outcome, EngineError> {
        match command {
            Command::RegisterChain { chain, kind } => {
                self.vaults.register_chain(ChainInfo {
                    chain: *chain,
                    kind: kind.clone(),
                })?;
                fx.push(Event::ChainRegistered { chain: *chain });
                Ok(Outcome::Configured)
            }
            Command::ConfigureToken {
                token,
                chain,
                weight,
                min_amount,
            } => {
                self.vaults.chain(*chain)?;
                self.ledger.configure(*token, *chain, *weight, *min_amount)?;
                fx.push(Event::TokenConfigured {
                    token: *token,
                    chain: *chain,
                    weight: *weight,
                });
                Ok(Outcome::Configured)
            }
            Command::Elect { epoch } => self.elect(config, maintainers, *epoch, fx),
            Command::VoteKeygen(vote) => self
                .vote_keygen(config, sender, vote, fx)
                .map(Outcome::Vote),
            Command::Rotate { retiring, active } => {
                let key = self.vaults.rotate(retiring.as_deref(), active, self.block)?;
                let retiring = self.vaults.retiring().map(|r| r.key);
                fx.push(Event::VaultRotated {
                    active: key,
                    retiring,
                });
                Ok(Outcome::Rotated {
                    active: key,
                    retiring,
                })
            }
            Command::VoteTxIn(tx) => self.vote_tx_in(config, sender, tx, fx).map(Outcome::Vote),
            Command::VoteTxOut(tx) => self.vote_tx_out(config, sender, tx, fx).map(Outcome::Vote),
            Command::VoteNetworkFee(observation) => self
                .vote_network_fee(config, sender, observation, fx)
                .map(Outcome::Vote),
            Command::TransferOut(transfer) => self
                .transfer_out(config, transfer, fx)
                .map(Outcome::Transfer),
            Command::ConfirmContractMigration { chain } => {
                self.confirm_contract_migration(*chain, fx)?;
                Ok(Outcome::ContractMigrated { chain: *chain })
            }
            Command::MigrationHeartbeat => {
                let (expired, compacted) =
                    self.proposals.prune(self.block, config.proposal_ttl_blocks);
                if expired + compacted > 0 {
                    fx.push(Event::ProposalsPruned { expired, compacted });
                }
                self.migration_step(fx).map(Outcome::Migration)
            }
            Command::PruneProposals => {
                let (expired, compacted) =
                    self.proposals.prune(self.block, config.proposal_ttl_blocks);
                fx.push(Event::ProposalsPruned { expired, compacted });
                Ok(Outcome::Pruned { expired, compacted })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

/// Single-writer command processor.
pub struct Core {
    config: EngineConfig,
    state: EngineState,
    maintainers: Box<dyn MaintainerRegistry>,
    relay: Box<dyn RelaySink>,
}

impl Core {
    pub fn new(
        config: EngineConfig,
        maintainers: Box<dyn MaintainerRegistry>,
        relay: Box<dyn RelaySink>,
    ) -> Self {
        Self::restore(config, EngineState::default(), maintainers, relay)
    }

    /// Resumes from a previously saved state.
    pub fn restore(
        config: EngineConfig,
        state: EngineState,
        maintainers: Box<dyn MaintainerRegistry>,
        relay: Box<dyn RelaySink>,
    ) -> Self {
        Self {
            config,
            state,
            maintainers,
            relay,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn slash_points(&self, member: &Address) -> u64 {
        self.maintainers.slash_points(member)
    }

    /// Applies one command.
    ///
    /// On error the state is untouched and nothing is dispatched.
    pub fn apply(&mut self, envelope: &Envelope) -> Result<Receipt, EngineError> {
        if envelope.block < self.state.block {
            return Err(EngineError::StaleBlock {
                current: self.state.block,
                got: envelope.block,
            });
        }
        if envelope.command.requires_orchestrator() && envelope.sender != self.config.orchestrator {
            warn!(
                sender = %envelope.sender,
                command = envelope.command.name(),
                "orchestrator command from unauthorized sender"
            );
            return Err(EngineError::Unauthorized(envelope.sender));
        }

        let mut draft = self.state.clone();
        draft.block = envelope.block;
        let mut fx = Effects::new();
        let outcome = draft.execute(
            &self.config,
            &*self.maintainers,
            envelope.sender,
            &envelope.command,
            &mut fx,
        )?;
        let sequence = draft.sequence;
        draft.sequence += 1;
        self.state = draft;

        let events = fx.into_events();
        self.dispatch(&events);
        debug!(
            sequence,
            block = envelope.block,
            command = envelope.command.name(),
            events = events.len(),
            "command applied"
        );
        Ok(Receipt {
            sequence,
            block: envelope.block,
            outcome,
            events,
        })
    }

    fn dispatch(&mut self, events: &[Event]) {
        for event in events {
            match event {
                Event::SlashPoints { member, delta } => {
                    self.maintainers.adjust_slash_points(*member, *delta)
                }
                Event::RelayDelivery(delivery) => self.relay.on_delivery(delivery),
                Event::OutboundIssued(order) => self.relay.on_outbound(order),
                Event::NetworkFeeUpdated { chain, fee } => self.relay.on_network_fee(*chain, fee),
                Event::KeygenCompleted { epoch, .. } => self.relay.on_keygen(*epoch, true),
                Event::KeygenFailed { epoch, .. } => self.relay.on_keygen(*epoch, false),
                Event::VaultRotated { active, retiring } => {
                    info!(%active, retiring = ?retiring, "rotation committed")
                }
                _ => {}
            }
        }
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("block", &self.state.block)
            .field("sequence", &self.state.sequence)
            .finish_non_exhaustive()
    }
}
