//! Liquidation price.
//!
//! A subaccount is liquidated when its equity falls to its total maintenance
//! risk. Holding every other position fixed, the oracle price of one position
//! at which that happens has a closed form: the position's value and its own
//! maintenance risk both move linearly with price, so the crossing point is
//! a single division.

use crate::types::{Quote, SignedSize};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Everything the liquidation price depends on, taken from a position and its subaccount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationInputs {
    pub signed_size: SignedSize,
    pub value: Quote,
    pub adjusted_mmf: Decimal,
    pub maintenance_risk: Quote,
    pub maintenance_risk_total: Quote,
    pub equity: Quote,
}

/// Oracle price at which the subaccount hits maintenance margin.
///
/// `(otherRisk + value - equity) / denominator` where the denominator is
/// `size * (1 - mmf)` for longs and `size * (1 + mmf)` for shorts. Undefined
/// for a zero denominator, a negative result and inputs too large to combine.
pub fn calculate_liquidation_price(inputs: &LiquidationInputs) -> Option<Decimal> {
    let size = inputs.signed_size.value();
    let other_positions_risk = inputs.maintenance_risk_total.checked_sub(inputs.maintenance_risk)?;

    let size_times_mmf = size.checked_mul(inputs.adjusted_mmf)?;
    let denominator = if size > Decimal::ZERO {
        size.checked_sub(size_times_mmf)?
    } else {
        size.checked_add(size_times_mmf)?
    };
    if denominator.is_zero() {
        return None;
    }

    let numerator = other_positions_risk
        .checked_add(inputs.value)?
        .checked_sub(inputs.equity)?;
    let liquidation_price = numerator.value().checked_div(denominator)?;

    if liquidation_price < Decimal::ZERO {
        None
    } else {
        Some(liquidation_price)
    }
}
