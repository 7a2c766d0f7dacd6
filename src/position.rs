// 4.0: position derivations. value = signed size * oracle, risk = notional * margin fraction.
// 4.1 has the pnl and base-equity helpers at the bottom.

use crate::market::effective_initial_margin_fraction;
use crate::raw::{opt_decimal, PositionStatus, RawMarket, RawPerpetualPosition};
use crate::types::{MarginMode, MarketId, Quote, Side, SignedSize, SubaccountNumber, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Position fields that depend only on the position and its market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionCore {
    pub unique_id: String,
    pub market: MarketId,
    pub asset_id: String,
    pub subaccount_number: SubaccountNumber,
    pub margin_mode: MarginMode,
    pub status: PositionStatus,
    pub side: Side,
    pub unsigned_size: Decimal,
    pub signed_size: SignedSize,
    pub max_size: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub value: Quote,
    pub notional: Quote,
    pub initial_risk: Quote,
    pub maintenance_risk: Quote,
    pub adjusted_imf: Decimal,
    pub adjusted_mmf: Decimal,
    /// `1 / imf`. Undefined when the effective IMF is zero.
    pub max_leverage: Option<Decimal>,
    pub net_funding: Quote,
    pub realized_pnl: Quote,
    /// As reported by the feed, before repricing at the oracle.
    pub unrealized_pnl: Quote,
    pub sum_open: Decimal,
    pub sum_close: Decimal,
    pub created_at: Option<Timestamp>,
    pub created_at_height: Decimal,
}

pub fn position_unique_id(market: &MarketId, subaccount_number: SubaccountNumber) -> String {
    format!("{market}-{subaccount_number}")
}

// notional, value, initial and maintenance risk at the oracle
#[derive(Debug, Clone, Copy)]
struct Priced {
    notional: Quote,
    value: Quote,
    initial_risk: Quote,
    maintenance_risk: Quote,
}

impl Priced {
    fn zero() -> Self {
        Self {
            notional: Quote::zero(),
            value: Quote::zero(),
            initial_risk: Quote::zero(),
            maintenance_risk: Quote::zero(),
        }
    }
}

fn price_position(unsigned_size: Decimal, side: Side, oracle: Decimal, imf: Decimal, mmf: Decimal) -> Option<Priced> {
    let notional = Quote::new(unsigned_size.checked_mul(oracle)?);
    Some(Priced {
        notional,
        value: notional.checked_mul(side.sign())?,
        initial_risk: notional.checked_mul(imf)?,
        maintenance_risk: notional.checked_mul(mmf)?,
    })
}

/// Derives a position's core numbers. A missing market prices everything at zero,
/// so the position adds nothing to the subaccount's totals. So does a size and
/// oracle whose product does not fit in a `Decimal`.
pub fn calculate_position_core(
    position: &RawPerpetualPosition,
    market: Option<&RawMarket>,
    num_parent_subaccounts: u32,
) -> PositionCore {
    // negative fractions from a bad feed count as zero, so risk is never negative
    let effective_imf = market
        .and_then(effective_initial_margin_fraction)
        .unwrap_or(Decimal::ZERO)
        .max(Decimal::ZERO);
    let effective_mmf = market
        .and_then(|m| opt_decimal(&m.maintenance_margin_fraction))
        .unwrap_or(Decimal::ZERO)
        .max(Decimal::ZERO);
    let oracle = market
        .and_then(|m| opt_decimal(&m.oracle_price))
        .unwrap_or(Decimal::ZERO);

    // the feed's size sign isn't trusted. side decides.
    let unsigned_size = position.size.to_decimal_or_zero().abs();
    let signed_size = SignedSize::from_side(position.side, unsigned_size);

    let priced = price_position(unsigned_size, position.side, oracle, effective_imf, effective_mmf)
        .unwrap_or_else(|| {
            warn!(
                market = %position.market,
                subaccount = %position.subaccount_number,
                size = %unsigned_size,
                oracle = %oracle,
                "position value overflows, pricing it at zero"
            );
            Priced::zero()
        });

    PositionCore {
        unique_id: position_unique_id(&position.market, position.subaccount_number),
        market: position.market.clone(),
        asset_id: position.market.asset_id().to_string(),
        subaccount_number: position.subaccount_number,
        margin_mode: position.subaccount_number.margin_mode(num_parent_subaccounts),
        status: position.status,
        side: position.side,
        unsigned_size,
        signed_size,
        max_size: position.max_size.to_decimal_or_zero(),
        entry_price: position.entry_price.to_decimal_or_zero(),
        exit_price: opt_decimal(&position.exit_price),
        value: priced.value,
        notional: priced.notional,
        initial_risk: priced.initial_risk,
        maintenance_risk: priced.maintenance_risk,
        adjusted_imf: effective_imf,
        adjusted_mmf: effective_mmf,
        max_leverage: Decimal::ONE.checked_div(effective_imf),
        net_funding: Quote::new(position.net_funding.to_decimal_or_zero()),
        realized_pnl: Quote::new(position.realized_pnl.to_decimal_or_zero()),
        unrealized_pnl: Quote::new(position.unrealized_pnl.to_decimal_or_zero()),
        sum_open: position.sum_open.to_decimal_or_zero(),
        sum_close: position.sum_close.to_decimal_or_zero(),
        created_at: Timestamp::parse_iso(&position.created_at),
        created_at_height: position.created_at_height.to_decimal_or_zero(),
    }
}

// 4.1: pnl at the oracle. value - size * entry. undefined when it doesn't fit.
pub fn calculate_unrealized_pnl(signed_size: SignedSize, entry_price: Decimal, value: Quote) -> Option<Quote> {
    let entry_value = signed_size.value().checked_mul(entry_price)?;
    value.checked_sub(Quote::new(entry_value))
}

/// Margin the position was opened with, approximated as entry value over leverage.
/// Leverage below 1 (or unknown) counts as 1. Zero when the entry value overflows.
pub fn position_base_equity(signed_size: SignedSize, entry_price: Decimal, leverage: Option<Decimal>) -> Decimal {
    let Some(entry_value) = signed_size.value().checked_mul(entry_price) else {
        return Decimal::ZERO;
    };
    let scaled_leverage = leverage
        .map(|l| l.abs().max(Decimal::ONE))
        .unwrap_or(Decimal::ONE);
    entry_value.abs() / scaled_leverage
}

pub fn unrealized_pnl_percent(pnl: Quote, base_equity: Decimal) -> Option<Decimal> {
    pnl.value().checked_div(base_equity)
}
