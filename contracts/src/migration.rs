//! # Migration Scheduler
//!
//! After a rotation the retiring vault still custodies every chain it held.
//! The scheduler moves that custody to the active vault one step per
//! heartbeat, so each step fits in a single bounded command:
//!
//! - **Contract chains** hold funds in a vault contract. Migrating them is a
//!   signer flip; the scheduler requests it and waits for the orchestrator
//!   to confirm it happened.
//! - **Custodial chains** hold funds under the vault key itself. Each token
//!   moves in at most [`MAX_MIGRATION_TRANCHES`] transfers, non-gas tokens
//!   first and the gas token last, keeping a reserve of gas for the
//!   transfers themselves. Once nothing movable is left and every transfer
//!   is confirmed, the chain is handed over.
//!
//! When the last chain is handed over the retiring vault is retired.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vaultkeeper_protocol::config::MAX_MIGRATION_TRANCHES;
use vaultkeeper_protocol::crypto::ContentHasher;
use vaultkeeper_protocol::{Amount, ChainId, Hash256, TokenId};

use crate::engine::EngineState;
use crate::error::EngineError;
use crate::events::{Effects, Event, OrderKind, OutboundOrder};
use crate::ledger::LedgerError;
use crate::vault::{ChainKind, ChainMigration, VaultError};

/// What one heartbeat did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    /// Nothing is retiring.
    Idle,
    ContractFlip { chain: ChainId },
    Tranche {
        chain: ChainId,
        token: TokenId,
        amount: Amount,
        index: u8,
        order_id: Hash256,
    },
    ChainMigrated { chain: ChainId },
    /// Work remains but is blocked on confirmations.
    Waiting,
    Retired { vault: Hash256 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub step: MigrationStep,
    /// Whether further heartbeats have work to do.
    pub remaining: bool,
}

/// Size of the next tranche out of `movable`, given `index` tranches
/// already issued.
///
/// Splits what is left evenly over the remaining tranches, but drains
/// everything at once when a tranche or the remainder after it would fall
/// below `threshold`, and always on the last tranche.
pub fn tranche_amount(movable: Amount, threshold: Amount, index: u8) -> Amount {
    let parts = MAX_MIGRATION_TRANCHES.saturating_sub(index).max(1);
    let amount = movable / Amount::from(parts);
    if parts == 1 || amount < threshold || movable - amount < threshold {
        movable
    } else {
        amount
    }
}

/// Order id of a migration tranche.
pub fn migration_order_id(vault: &Hash256, chain: ChainId, token: &TokenId, index: u8) -> Hash256 {
    ContentHasher::new("vaultkeeper/migration")
        .fixed(vault.as_bytes())
        .u64(chain)
        .fixed(token.as_bytes())
        .u8(index)
        .finish()
}

/// A custodial tranche to issue.
struct PlannedTranche {
    token: TokenId,
    amount: Amount,
    index: u8,
}

impl EngineState {
    /// Advances the active migration by at most one chain-level action.
    pub(crate) fn migration_step(&mut self, fx: &mut Effects) -> Result<MigrationReport, EngineError> {
        let Some(retiring) = self.vaults.retiring() else {
            return Ok(MigrationReport {
                step: MigrationStep::Idle,
                remaining: false,
            });
        };
        let retiring_key = retiring.key;
        let retiring_address = retiring.address().map_err(VaultError::from)?;
        let pending_chains: Vec<(ChainId, ChainMigration)> = retiring.unmigrated_chains().collect();
        let active = self.vaults.active().ok_or(VaultError::NoActiveVault)?;
        let active_key = active.key;
        let active_address = active.address().map_err(VaultError::from)?;

        for (chain, state) in pending_chains {
            let kind = self.vaults.chain(chain)?.kind.clone();
            match kind {
                ChainKind::Contract => {
                    if state == ChainMigration::Assigned {
                        self.vaults.set_chain_migrating(chain)?;
                        self.vaults.mark_migrating();
                        info!(chain, from = %retiring_key, to = %active_key, "contract migration requested");
                        fx.push(Event::ContractMigrationRequested {
                            chain,
                            from: retiring_key,
                            to: active_key,
                        });
                        return Ok(MigrationReport {
                            step: MigrationStep::ContractFlip { chain },
                            remaining: true,
                        });
                    }
                    debug!(chain, "awaiting contract migration confirmation");
                }
                ChainKind::Custodial {
                    gas_token,
                    gas_reserve,
                } => {
                    if let Some(plan) = self.plan_tranche(chain, &gas_token, gas_reserve)? {
                        let order_id = migration_order_id(&retiring_key, chain, &plan.token, plan.index);
                        self.ledger.reserve(&plan.token, chain, plan.amount)?;
                        self.ledger.advance_migration_index(&plan.token, chain)?;
                        if state == ChainMigration::Assigned {
                            self.vaults.set_chain_migrating(chain)?;
                        }
                        self.vaults.mark_migrating();
                        self.issue_order(
                            OutboundOrder {
                                order_id,
                                kind: OrderKind::Migration,
                                chain,
                                token: plan.token,
                                amount: plan.amount,
                                to: active_address.as_bytes().to_vec(),
                                vault: retiring_key,
                                issued_at: self.block,
                            },
                            fx,
                        );
                        debug!(from = %retiring_address, chain, index = plan.index, "migration tranche issued");
                        return Ok(MigrationReport {
                            step: MigrationStep::Tranche {
                                chain,
                                token: plan.token,
                                amount: plan.amount,
                                index: plan.index,
                                order_id,
                            },
                            remaining: true,
                        });
                    }
                    if self.ledger.has_pending_on_chain(chain) {
                        debug!(chain, "awaiting migration confirmations");
                        continue;
                    }
                    self.hand_over(chain, fx)?;
                    return Ok(MigrationReport {
                        step: MigrationStep::ChainMigrated { chain },
                        remaining: true,
                    });
                }
            }
        }

        if self.vaults.check_migration() {
            let vault = self.vaults.finish_retirement(self.block)?;
            fx.push(Event::VaultRetired { vault });
            return Ok(MigrationReport {
                step: MigrationStep::Retired { vault },
                remaining: false,
            });
        }
        Ok(MigrationReport {
            step: MigrationStep::Waiting,
            remaining: true,
        })
    }

    /// Next tranche on a custodial chain, if any token still has movable
    /// funds.
    fn plan_tranche(
        &self,
        chain: ChainId,
        gas_token: &TokenId,
        gas_reserve: Amount,
    ) -> Result<Option<PlannedTranche>, EngineError> {
        let mut tokens = self.ledger.tokens_on_chain(chain);
        // Gas pays for the other transfers, so it moves last.
        tokens.sort_by_key(|t| t == gas_token);

        for token in tokens {
            let pair = self
                .ledger
                .chain_token(&token, chain)
                .ok_or(LedgerError::UnknownChainToken { token, chain })?;
            if pair.migration_index >= MAX_MIGRATION_TRANCHES {
                continue;
            }
            let reserve = if token == *gas_token { gas_reserve } else { 0 };
            let available = u128::try_from(pair.available()).unwrap_or(0);
            let movable = available.saturating_sub(reserve);
            if movable <= pair.min_amount {
                continue;
            }
            let threshold = pair.min_amount.max(1);
            let amount = tranche_amount(movable, threshold, pair.migration_index);
            return Ok(Some(PlannedTranche {
                token,
                amount,
                index: pair.migration_index,
            }));
        }
        Ok(None)
    }

    /// Completes a chain's migration, by contract-flip confirmation or
    /// after the last custodial tranche settled.
    pub(crate) fn hand_over(&mut self, chain: ChainId, fx: &mut Effects) -> Result<(), EngineError> {
        self.ledger.fold_migrated(chain)?;
        self.vaults.complete_chain_migration(chain)?;
        fx.push(Event::ChainMigrated { chain });
        Ok(())
    }

    /// Orchestrator confirmation that a contract chain's vault now answers
    /// to the active key.
    pub(crate) fn confirm_contract_migration(
        &mut self,
        chain: ChainId,
        fx: &mut Effects,
    ) -> Result<(), EngineError> {
        let kind = &self.vaults.chain(chain)?.kind;
        let migrating = self
            .vaults
            .retiring()
            .and_then(|r| r.chains.get(&chain).copied())
            == Some(ChainMigration::Migrating);
        if *kind != ChainKind::Contract || !migrating {
            return Err(VaultError::ChainNotMigrating(chain).into());
        }
        self.hand_over(chain, fx)
    }
}
