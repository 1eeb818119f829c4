//! Strike and expiry selection for the butterfly builder.
//!
//! Pure functions over an options chain snapshot: pick the tradeable
//! expiry, locate the ATM contracts, infer the strike grid spacing and
//! choose the protective wings.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use ironfly_core::models::{OptionContract, OptionKind};

/// Why strike selection failed. `AtmMismatch` is retried once by the
/// builder with a fresh chain; everything else fails the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrikeSelectionError {
    #[error("no option contracts available")]
    EmptyChain,

    #[error("no listed expiry on or after today")]
    NoExpiry,

    #[error("ATM call strike {call_strike} does not match ATM put strike {put_strike}")]
    AtmMismatch { call_strike: String, put_strike: String },

    #[error("cannot infer strike grid spacing from the chain")]
    NoGridStep,

    #[error("no suitable OTM {kind} wing in the chain")]
    NoWing { kind: &'static str },
}

/// The four contracts of a butterfly plus the derived figures.
#[derive(Debug, Clone)]
pub struct StrikeSelection {
    pub atm_call: OptionContract,
    pub atm_put: OptionContract,
    pub otm_call: OptionContract,
    pub otm_put: OptionContract,
    pub atm_strike: Decimal,
    pub grid_step: Decimal,
}

/// Picks the tradeable expiry: today's if listed, otherwise the
/// earliest later one.
///
/// # Errors
/// `NoExpiry` when nothing on or after `today` is listed.
pub fn pick_expiry(expiries: &[NaiveDate], today: NaiveDate) -> Result<NaiveDate, StrikeSelectionError> {
    expiries
        .iter()
        .copied()
        .filter(|e| *e >= today)
        .min()
        .ok_or(StrikeSelectionError::NoExpiry)
}

/// The contract of `kind` whose strike is closest to `reference`.
/// Ties break toward the smaller strike.
#[must_use]
pub fn find_atm(
    chain: &[OptionContract],
    kind: OptionKind,
    reference: Decimal,
) -> Option<&OptionContract> {
    chain
        .iter()
        .filter(|c| c.kind == kind)
        .min_by(|a, b| {
            let da = (a.strike - reference).abs();
            let db = (b.strike - reference).abs();
            da.cmp(&db).then(a.strike.cmp(&b.strike))
        })
}

/// Infers the strike grid spacing as the modal gap between adjacent
/// distinct strikes of `kind`. Ties break toward the smaller gap.
#[must_use]
pub fn infer_grid_step(chain: &[OptionContract], kind: OptionKind) -> Option<Decimal> {
    let mut strikes: Vec<Decimal> = chain.iter().filter(|c| c.kind == kind).map(|c| c.strike).collect();
    strikes.sort_unstable();
    strikes.dedup();
    if strikes.len() < 2 {
        return None;
    }

    let mut counts: Vec<(Decimal, u32)> = Vec::new();
    for gap in strikes.windows(2).map(|w| w[1] - w[0]) {
        match counts.iter_mut().find(|(g, _)| *g == gap) {
            Some((_, n)) => *n += 1,
            None => counts.push((gap, 1)),
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(gap, _)| gap)
}

/// Nearest contract of `kind` at least `min_distance` beyond the ATM
/// strike: above it for calls, below it for puts.
#[must_use]
pub fn find_wing(
    chain: &[OptionContract],
    kind: OptionKind,
    atm_strike: Decimal,
    min_distance: Decimal,
) -> Option<&OptionContract> {
    chain
        .iter()
        .filter(|c| c.kind == kind)
        .filter(|c| match kind {
            OptionKind::Call => c.strike > atm_strike && c.strike - atm_strike >= min_distance,
            OptionKind::Put => c.strike < atm_strike && atm_strike - c.strike >= min_distance,
        })
        .min_by_key(|c| (c.strike - atm_strike).abs())
}

/// Selects all four butterfly contracts from a chain snapshot.
///
/// # Errors
/// See [`StrikeSelectionError`]; `AtmMismatch` means the call and put
/// grids disagree near the reference and a fresh chain may resolve it.
pub fn select_strikes(
    chain: &[OptionContract],
    reference: Decimal,
    strike_distance: u32,
) -> Result<StrikeSelection, StrikeSelectionError> {
    if chain.is_empty() {
        return Err(StrikeSelectionError::EmptyChain);
    }

    let atm_call = find_atm(chain, OptionKind::Call, reference).ok_or(StrikeSelectionError::EmptyChain)?;
    let atm_put = find_atm(chain, OptionKind::Put, reference).ok_or(StrikeSelectionError::EmptyChain)?;

    if atm_call.strike != atm_put.strike {
        return Err(StrikeSelectionError::AtmMismatch {
            call_strike: atm_call.strike.to_string(),
            put_strike: atm_put.strike.to_string(),
        });
    }
    let atm_strike = atm_call.strike;

    let grid_step = infer_grid_step(chain, OptionKind::Call)
        .or_else(|| infer_grid_step(chain, OptionKind::Put))
        .ok_or(StrikeSelectionError::NoGridStep)?;
    let min_distance = grid_step * Decimal::from(strike_distance);

    let otm_call = find_wing(chain, OptionKind::Call, atm_strike, min_distance)
        .ok_or(StrikeSelectionError::NoWing { kind: "call" })?;
    let otm_put = find_wing(chain, OptionKind::Put, atm_strike, min_distance)
        .ok_or(StrikeSelectionError::NoWing { kind: "put" })?;

    Ok(StrikeSelection {
        atm_call: atm_call.clone(),
        atm_put: atm_put.clone(),
        otm_call: otm_call.clone(),
        otm_put: otm_put.clone(),
        atm_strike,
        grid_step,
    })
}
