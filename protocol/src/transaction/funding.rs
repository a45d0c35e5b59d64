//! Transaction funding: close the gap between what a draft spends and what
//! it pays, then decide whether the leftover becomes change.
//!
//! The walk is greedy and single-pass, in the caller's order:
//!
//! 1. Estimate the fee of the draft as it stands.
//! 2. For each candidate: if `inputs - outputs - fee` is already
//!    non-negative, stop; otherwise attach the candidate and re-estimate.
//! 3. `change = inputs - outputs - fee`. Negative means
//!    [`FundingError::InsufficientFunds`].
//! 4. If `change - overhead` clears the dust threshold, append a change
//!    output for that amount; otherwise the remainder goes to the miner.
//!
//! The overhead reserve pays for the change output's own bytes, so adding
//! it does not require another estimation round. This is deliberately not
//! optimal coin selection: callers order candidates the way they want them
//! spent.

use thiserror::Error;
use tracing::debug;

use super::builder::{DraftTransaction, UnlockingTemplate};
use super::encoding::EncodingError;
use super::fee::estimate_fee;
use super::types::{Outpoint, Utxo};
use crate::config::FeeConfig;
use crate::crypto::SigningKey;
use crate::script::Destination;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by [`fund_transaction`].
#[derive(Debug, Error)]
pub enum FundingError {
    /// All candidates attached and the draft still cannot pay its outputs
    /// and fee.
    #[error("insufficient funds: need {required} satoshis, have {available}")]
    InsufficientFunds {
        /// Outputs plus the last fee estimate.
        required: u64,
        /// Total value of the attached inputs.
        available: u64,
    },

    /// A candidate carries token data. Spending it as plain value would
    /// burn the token.
    #[error("funding candidate {outpoint} carries a token")]
    TokenCandidate { outpoint: Outpoint },

    /// Fee estimation failed.
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A spendable coin: the immutable UTXO record plus how to unlock it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingUtxo {
    pub utxo: Utxo,
    pub unlocking: UnlockingTemplate,
}

impl FundingUtxo {
    pub fn new(utxo: Utxo, unlocking: UnlockingTemplate) -> Self {
        Self { utxo, unlocking }
    }

    /// A wallet coin spent with a P2PKH signature by `key`.
    pub fn p2pkh(utxo: Utxo, key: &SigningKey) -> Self {
        Self::new(utxo, UnlockingTemplate::P2pkh { key: key.clone() })
    }

    /// Wraps several wallet coins held by the same key.
    pub fn p2pkh_all(utxos: impl IntoIterator<Item = Utxo>, key: &SigningKey) -> Vec<Self> {
        utxos.into_iter().map(|u| Self::p2pkh(u, key)).collect()
    }
}

/// Outcome of a successful funding pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingSummary {
    /// Value of every input on the draft, pre-attached ones included.
    pub total_input: u64,
    /// Value of every output, change included.
    pub total_output: u64,
    /// What the miner receives: `total_input - total_output`.
    pub fee: u64,
    /// The last fee estimate taken before the change decision.
    pub estimated_fee: u64,
    /// Value of the appended change output, if one was added.
    pub change: Option<u64>,
}

// ---------------------------------------------------------------------------
// Funding
// ---------------------------------------------------------------------------

/// `inputs - outputs - fee`, signed.
fn surplus(total_input: u64, total_output: u64, fee: u64) -> i128 {
    i128::from(total_input) - i128::from(total_output) - i128::from(fee)
}

/// The change output a surplus of `change` satoshis produces, if any:
/// `change - overhead` when that exceeds the dust threshold.
///
/// ```
/// use escrow_protocol::config::FeeConfig;
/// use escrow_protocol::transaction::funding::change_output_value;
///
/// let config = FeeConfig::default();
/// assert_eq!(change_output_value(1_000, &config), Some(960));
/// assert_eq!(change_output_value(500, &config), None);
/// ```
pub fn change_output_value(change: u64, config: &FeeConfig) -> Option<u64> {
    change
        .checked_sub(config.change_output_overhead)
        .filter(|value| *value > config.dust_threshold)
}

/// Attaches candidates to `draft` until it pays for itself, then appends a
/// change output to `change_destination` when the surplus is worth keeping.
///
/// Inputs already on the draft count toward the total. On error the draft
/// may hold some attached candidates and must be discarded.
pub fn fund_transaction(
    draft: &mut DraftTransaction,
    candidates: &[FundingUtxo],
    change_destination: &Destination,
    config: &FeeConfig,
) -> Result<FundingSummary, FundingError> {
    let total_output = draft.total_output_value()?;
    let mut total_input = draft.total_input_value()?;
    let mut fee = estimate_fee(draft, config.fee_rate)?;

    for candidate in candidates {
        if surplus(total_input, total_output, fee) >= 0 {
            break;
        }
        if candidate.utxo.has_token() {
            return Err(FundingError::TokenCandidate {
                outpoint: candidate.utxo.outpoint,
            });
        }

        draft.add_input(candidate.utxo.clone(), candidate.unlocking.clone());
        total_input = total_input
            .checked_add(candidate.utxo.value_satoshis)
            .ok_or(EncodingError::ValueOverflow { side: "input" })?;
        fee = estimate_fee(draft, config.fee_rate)?;

        debug!(
            outpoint = %candidate.utxo.outpoint,
            value = candidate.utxo.value_satoshis,
            total_input,
            fee,
            "attached funding input"
        );
    }

    let change = surplus(total_input, total_output, fee);
    if change < 0 {
        return Err(FundingError::InsufficientFunds {
            required: total_output.saturating_add(fee),
            available: total_input,
        });
    }
    // Non-negative and bounded by total_input, so it fits.
    let change = change as u64;

    let mut change_value = change_output_value(change, config);
    match change_value {
        Some(value) => {
            draft.pay(change_destination, value);
            debug!(change, value, "appended change output");
            change_value = settle_change(draft, total_input, total_output, value, config)?;
        }
        None => debug!(change, "change below dust, left to the miner"),
    }

    let total_output = draft.total_output_value()?;
    Ok(FundingSummary {
        total_input,
        total_output,
        fee: total_input - total_output,
        estimated_fee: fee,
        change: change_value,
    })
}

/// Re-measures the draft with its change output signed in and lowers the
/// change by any shortfall against the rate. Drops the output if that
/// leaves it at dust; the draft without change is the one last priced.
fn settle_change(
    draft: &mut DraftTransaction,
    total_input: u64,
    total_output: u64,
    mut value: u64,
    config: &FeeConfig,
) -> Result<Option<u64>, FundingError> {
    loop {
        let needed = estimate_fee(draft, config.fee_rate)?;
        let paid = total_input - total_output - value;
        let Some(shortfall) = needed.checked_sub(paid).filter(|s| *s > 0) else {
            return Ok(Some(value));
        };
        match value
            .checked_sub(shortfall)
            .filter(|v| *v > config.dust_threshold)
        {
            Some(lowered) => {
                debug!(shortfall, value = lowered, "lowered change to cover final size");
                value = lowered;
                if let Some(output) = draft.outputs.last_mut() {
                    output.value_satoshis = value;
                }
            }
            None => {
                draft.outputs.pop();
                debug!(shortfall, "change no longer above dust, left to the miner");
                return Ok(None);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
