//! # Rebalance Fee
//!
//! Cross-chain transfers shift a token's custody from one chain to another.
//! Each chain has a target share of the token (its weight over the total
//! weight); the fee curve charges transfers that push the distribution away
//! from target and pays an incentive, funded by previously collected fees,
//! to transfers that pull it back.
//!
//! ## Deviation score
//!
//! With `v_i` the available balance on chain `i`, `V` their sum, `w_i` the
//! chain weight and `W` the total weight:
//!
//! ```text
//! share_i  = v_i * PPM / V
//! target_i = w_i * PPM / W
//! S        = Σ (share_i - target_i)² / target_i      (chains with w_i > 0)
//! ```
//!
//! The rate is proportional to `ΔS = S_after - S_before`, normalised by the
//! worst-case score `PPM * (W - w_min) / w_min` (everything parked on the
//! lightest chain), then clamped to `[-max_incentive, max_fee]`. It has the
//! sign of `ΔS` and is zero when the transfer leaves the score unchanged.

use serde::{Deserialize, Serialize};

use vaultkeeper_protocol::config::{FeeConfig, PPM};
use vaultkeeper_protocol::{Amount, ChainId};

use crate::ledger::TokenState;

/// Fee decision for one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceQuote {
    /// Signed rate in parts per million. Positive is a fee, negative an
    /// incentive.
    pub rate_ppm: i64,
    pub fee: Amount,
    /// Incentive owed at this rate. The ledger may pay less if the pool of
    /// accrued fees is smaller.
    pub incentive: Amount,
}

impl RebalanceQuote {
    /// Amount delivered to the recipient after the fee and `paid` incentive.
    pub fn net_amount(&self, amount: Amount, paid_incentive: Amount) -> Amount {
        amount.saturating_sub(self.fee).saturating_add(paid_incentive)
    }
}

/// A balance movement: funds arrive on `inflow` and leave from `outflow`.
/// `None` is the relay chain, which the ledger does not track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Movement {
    pub inflow: Option<ChainId>,
    pub outflow: Option<ChainId>,
    pub amount: Amount,
}

fn deviation(token: &TokenState, movement: &Movement) -> Option<i128> {
    let amount = i128::try_from(movement.amount).ok()?;
    let total_weight = i128::from(token.total_weight);
    let ppm = PPM as i128;

    let mut balances = Vec::with_capacity(token.chains.len());
    let mut total = 0i128;
    for (chain, pair) in &token.chains {
        let mut v = pair.available().max(0);
        if movement.inflow == Some(*chain) {
            v = v.checked_add(amount)?;
        }
        if movement.outflow == Some(*chain) {
            v = (v - amount).max(0);
        }
        total = total.checked_add(v)?;
        balances.push((i128::from(pair.weight), v));
    }
    if total <= 0 {
        return Some(0);
    }

    let mut score = 0i128;
    for (weight, v) in balances {
        if weight == 0 {
            continue;
        }
        let share = v.checked_mul(ppm)? / total;
        let target = (weight * ppm / total_weight).max(1);
        let diff = share - target;
        score = score.checked_add(diff.checked_mul(diff)? / target)?;
    }
    Some(score)
}

/// Worst-case deviation score for the token's weights.
fn max_deviation(token: &TokenState) -> Option<i128> {
    let w_min = i128::from(token.min_weight()?);
    let total_weight = i128::from(token.total_weight);
    if total_weight <= w_min {
        return None;
    }
    Some((PPM as i128) * (total_weight - w_min) / w_min)
}

/// Computes the signed rebalance rate for a movement against the token's
/// current distribution.
pub fn rebalance_rate(config: &FeeConfig, token: &TokenState, movement: &Movement) -> i64 {
    if movement.amount == 0 || token.total_weight == 0 {
        return 0;
    }
    let volume = token.available().max(0) as u128;
    if volume == 0 {
        return 0;
    }
    let small = movement
        .amount
        .saturating_mul(PPM)
        < volume.saturating_mul(u128::from(config.small_transfer_ppm));
    if small {
        return config.small_transfer_rate_ppm;
    }

    let Some(max_score) = max_deviation(token) else {
        return 0;
    };
    let (Some(before), Some(after)) = (
        deviation(token, &Movement {
            inflow: None,
            outflow: None,
            amount: 0,
        }),
        deviation(token, movement),
    ) else {
        return 0;
    };

    let delta = after - before;
    let max_fee = i128::from(config.max_fee_rate_ppm);
    let max_incentive = i128::from(config.max_incentive_rate_ppm);
    let scale = if delta >= 0 { max_fee } else { max_incentive };
    let rate = delta.saturating_mul(scale) / max_score;
    rate.clamp(-max_incentive, max_fee) as i64
}

/// Quotes the fee or incentive for a movement.
pub fn quote(config: &FeeConfig, token: &TokenState, movement: &Movement) -> RebalanceQuote {
    let rate_ppm = rebalance_rate(config, token, movement);
    let magnitude = movement.amount.saturating_mul(u128::from(rate_ppm.unsigned_abs())) / PPM;
    if rate_ppm >= 0 {
        RebalanceQuote {
            rate_ppm,
            fee: magnitude,
            incentive: 0,
        }
    } else {
        RebalanceQuote {
            rate_ppm,
            fee: 0,
            incentive: magnitude,
        }
    }
}
