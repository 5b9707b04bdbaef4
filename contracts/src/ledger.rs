//! # Balance Ledger
//!
//! Per-token accounting of what the committees custody on every foreign
//! chain. Each (token, chain) pair tracks:
//!
//! - **balance**: funds held by the vault responsible for the chain,
//! - **pending_out**: funds already committed to an outbound transfer that
//!   has not been confirmed yet,
//! - the pair's **weight** in the rebalance target distribution,
//! - its **migration tranche index** and the amount already **migrated**
//!   to the incoming vault during a rotation.
//!
//! Token-level totals are the sums over chains. Values are signed so the
//! arithmetic reads naturally, but the ledger never lets a pair's
//! `balance - pending_out` drop below zero: an outbound reservation that
//! would do so fails with [`LedgerError::InsufficientAvailable`], which the
//! engine turns into a refund rather than a fault.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use vaultkeeper_protocol::{Amount, ChainId, TokenId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by ledger operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("token {0} is not configured")]
    UnknownToken(TokenId),

    #[error("token {token} is not configured on chain {chain}")]
    UnknownChainToken { token: TokenId, chain: ChainId },

    /// The pair does not hold enough uncommitted funds.
    #[error("insufficient balance for {token} on chain {chain}: available {available}, requested {requested}")]
    InsufficientAvailable {
        token: TokenId,
        chain: ChainId,
        available: i128,
        requested: Amount,
    },

    /// A confirmation settled more than was reserved.
    #[error("settling {settled} of {token} on chain {chain} exceeds pending {pending}")]
    PendingUnderflow {
        token: TokenId,
        chain: ChainId,
        pending: i128,
        settled: Amount,
    },

    #[error("amount {0} exceeds the ledger range")]
    AmountTooLarge(Amount),

    #[error("arithmetic overflow in ledger")]
    Overflow,

    #[error("ledger invariant violated for {token} on chain {chain}: {detail}")]
    Corrupted {
        token: TokenId,
        chain: ChainId,
        detail: String,
    },
}

fn signed(amount: Amount) -> Result<i128, LedgerError> {
    i128::try_from(amount).map_err(|_| LedgerError::AmountTooLarge(amount))
}

fn add(a: i128, b: i128) -> Result<i128, LedgerError> {
    a.checked_add(b).ok_or(LedgerError::Overflow)
}

fn sub(a: i128, b: i128) -> Result<i128, LedgerError> {
    a.checked_sub(b).ok_or(LedgerError::Overflow)
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Accounting for one token on one chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTokenState {
    /// Weight in the target distribution across chains.
    pub weight: u64,
    pub balance: i128,
    pub pending_out: i128,
    /// Amounts at or below this are dust and are not migrated.
    pub min_amount: Amount,
    /// Migration tranches issued for the current rotation.
    pub migration_index: u8,
    /// Confirmed migration outflows, still counted in the token total until
    /// the chain is handed over.
    pub migrated: i128,
}

impl ChainTokenState {
    /// Funds not committed to any outbound transfer.
    pub fn available(&self) -> i128 {
        self.balance.saturating_sub(self.pending_out)
    }
}

/// Accounting for one token across all chains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    pub balance: i128,
    pub pending_out: i128,
    pub total_weight: u64,
    /// Rebalance fees collected and not yet paid out as incentives.
    pub accrued_fees: Amount,
    pub chains: BTreeMap<ChainId, ChainTokenState>,
}

impl TokenState {
    /// Total funds not committed to outbound transfers.
    pub fn available(&self) -> i128 {
        self.balance.saturating_sub(self.pending_out)
    }

    /// Smallest non-zero weight among configured chains.
    pub fn min_weight(&self) -> Option<u64> {
        self.chains.values().map(|c| c.weight).filter(|w| *w > 0).min()
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// All token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceLedger {
    tokens: BTreeMap<TokenId, TokenState>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token to a chain or updates its weight and dust threshold.
    pub fn configure(
        &mut self,
        token: TokenId,
        chain: ChainId,
        weight: u64,
        min_amount: Amount,
    ) -> Result<(), LedgerError> {
        let state = self.tokens.entry(token).or_default();
        let entry = state.chains.entry(chain).or_default();
        let total = state
            .total_weight
            .checked_sub(entry.weight)
            .and_then(|w| w.checked_add(weight))
            .ok_or(LedgerError::Overflow)?;
        entry.weight = weight;
        entry.min_amount = min_amount;
        state.total_weight = total;
        debug!(%token, chain, weight, total_weight = total, "token configured");
        Ok(())
    }

    pub fn token(&self, token: &TokenId) -> Option<&TokenState> {
        self.tokens.get(token)
    }

    pub fn chain_token(&self, token: &TokenId, chain: ChainId) -> Option<&ChainTokenState> {
        self.tokens.get(token).and_then(|t| t.chains.get(&chain))
    }

    pub fn tokens(&self) -> impl Iterator<Item = (&TokenId, &TokenState)> {
        self.tokens.iter()
    }

    /// Tokens configured on `chain`, in id order.
    pub fn tokens_on_chain(&self, chain: ChainId) -> Vec<TokenId> {
        self.tokens
            .iter()
            .filter(|(_, state)| state.chains.contains_key(&chain))
            .map(|(token, _)| *token)
            .collect()
    }

    /// Whether any token on `chain` has unconfirmed outbound transfers.
    pub fn has_pending_on_chain(&self, chain: ChainId) -> bool {
        self.tokens
            .values()
            .filter_map(|t| t.chains.get(&chain))
            .any(|c| c.pending_out > 0)
    }

    pub fn is_configured(&self, token: &TokenId, chain: ChainId) -> bool {
        self.chain_token(token, chain).is_some()
    }

    fn pair_mut(
        &mut self,
        token: &TokenId,
        chain: ChainId,
    ) -> Result<(&mut i128, &mut i128, &mut ChainTokenState), LedgerError> {
        let state = self
            .tokens
            .get_mut(token)
            .ok_or(LedgerError::UnknownToken(*token))?;
        let pair = state
            .chains
            .get_mut(&chain)
            .ok_or(LedgerError::UnknownChainToken {
                token: *token,
                chain,
            })?;
        Ok((&mut state.balance, &mut state.pending_out, pair))
    }

    /// Records funds arriving at the vault on `chain`.
    pub fn credit(&mut self, token: &TokenId, chain: ChainId, amount: Amount) -> Result<(), LedgerError> {
        let delta = signed(amount)?;
        let (total, _, pair) = self.pair_mut(token, chain)?;
        let new_pair = add(pair.balance, delta)?;
        let new_total = add(*total, delta)?;
        pair.balance = new_pair;
        *total = new_total;
        Ok(())
    }

    /// Commits `amount` to an outbound transfer from `chain`.
    ///
    /// Fails without side effects when the pair's available balance is
    /// short.
    pub fn reserve(&mut self, token: &TokenId, chain: ChainId, amount: Amount) -> Result<(), LedgerError> {
        let delta = signed(amount)?;
        let (_, total_pending, pair) = self.pair_mut(token, chain)?;
        let available = pair.available();
        if available < delta {
            return Err(LedgerError::InsufficientAvailable {
                token: *token,
                chain,
                available,
                requested: amount,
            });
        }
        let new_pair = add(pair.pending_out, delta)?;
        let new_total = add(*total_pending, delta)?;
        pair.pending_out = new_pair;
        *total_pending = new_total;
        Ok(())
    }

    /// Confirms an outbound transfer: the funds have left the vault.
    pub fn settle(&mut self, token: &TokenId, chain: ChainId, amount: Amount) -> Result<(), LedgerError> {
        let delta = signed(amount)?;
        let (total, total_pending, pair) = self.pair_mut(token, chain)?;
        if pair.pending_out < delta {
            return Err(LedgerError::PendingUnderflow {
                token: *token,
                chain,
                pending: pair.pending_out,
                settled: amount,
            });
        }
        let new_total = sub(*total, delta)?;
        let new_total_pending = sub(*total_pending, delta)?;
        pair.pending_out -= delta;
        pair.balance -= delta;
        *total = new_total;
        *total_pending = new_total_pending;
        Ok(())
    }

    /// Confirms a migration transfer. The funds leave the outgoing vault's
    /// pair balance but stay in the token total, parked in `migrated` until
    /// the chain is handed over.
    pub fn settle_migration(
        &mut self,
        token: &TokenId,
        chain: ChainId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let delta = signed(amount)?;
        let (_, total_pending, pair) = self.pair_mut(token, chain)?;
        if pair.pending_out < delta {
            return Err(LedgerError::PendingUnderflow {
                token: *token,
                chain,
                pending: pair.pending_out,
                settled: amount,
            });
        }
        let migrated = add(pair.migrated, delta)?;
        let new_total_pending = sub(*total_pending, delta)?;
        pair.pending_out -= delta;
        pair.balance -= delta;
        pair.migrated = migrated;
        *total_pending = new_total_pending;
        Ok(())
    }

    pub fn advance_migration_index(&mut self, token: &TokenId, chain: ChainId) -> Result<u8, LedgerError> {
        let (_, _, pair) = self.pair_mut(token, chain)?;
        pair.migration_index = pair.migration_index.saturating_add(1);
        Ok(pair.migration_index)
    }

    /// Hands `chain` over to the incoming vault: migrated funds become its
    /// balance again and tranche counters reset for the next rotation.
    pub fn fold_migrated(&mut self, chain: ChainId) -> Result<(), LedgerError> {
        for (token, state) in self.tokens.iter_mut() {
            if let Some(pair) = state.chains.get_mut(&chain) {
                pair.balance = add(pair.balance, pair.migrated)?;
                pair.migrated = 0;
                pair.migration_index = 0;
                debug!(%token, chain, balance = pair.balance, "chain balance handed over");
            }
        }
        Ok(())
    }

    /// Adds a collected rebalance fee to the token's incentive pool.
    pub fn accrue_fee(&mut self, token: &TokenId, fee: Amount) -> Result<(), LedgerError> {
        let state = self
            .tokens
            .get_mut(token)
            .ok_or(LedgerError::UnknownToken(*token))?;
        state.accrued_fees = state
            .accrued_fees
            .checked_add(fee)
            .ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    /// Pays up to `wanted` out of the incentive pool, returning what was
    /// actually paid.
    pub fn pay_incentive(&mut self, token: &TokenId, wanted: Amount) -> Result<Amount, LedgerError> {
        let state = self
            .tokens
            .get_mut(token)
            .ok_or(LedgerError::UnknownToken(*token))?;
        let paid = wanted.min(state.accrued_fees);
        state.accrued_fees -= paid;
        Ok(paid)
    }

    /// Verifies per-pair non-negativity and that token totals equal the
    /// sums over chains.
    pub fn check_invariants(&self) -> Result<(), LedgerError> {
        for (token, state) in &self.tokens {
            let mut balance = 0i128;
            let mut pending = 0i128;
            let mut weight = 0u64;
            for (chain, pair) in &state.chains {
                let corrupted = |detail: String| LedgerError::Corrupted {
                    token: *token,
                    chain: *chain,
                    detail,
                };
                if pair.pending_out < 0 {
                    return Err(corrupted(format!("negative pending {}", pair.pending_out)));
                }
                if pair.balance < pair.pending_out {
                    return Err(corrupted(format!(
                        "balance {} below pending {}",
                        pair.balance, pair.pending_out
                    )));
                }
                balance = add(balance, add(pair.balance, pair.migrated)?)?;
                pending = add(pending, pair.pending_out)?;
                weight = weight.checked_add(pair.weight).ok_or(LedgerError::Overflow)?;
            }
            let first_chain = state.chains.keys().next().copied().unwrap_or_default();
            if balance != state.balance || pending != state.pending_out || weight != state.total_weight {
                return Err(LedgerError::Corrupted {
                    token: *token,
                    chain: first_chain,
                    detail: "token totals disagree with chain sums".into(),
                });
            }
        }
        Ok(())
    }
}
