//! Market derivations.
//!
//! A raw market carries its margin fractions and open-interest caps as strings.
//! This module parses them once and derives the values the risk calculators
//! read: the open-interest-scaled initial margin fraction, open interest in
//! USDC, the 24h percent change and display decimals.

use crate::numbers::decimal_places;
use crate::raw::{opt_decimal, MarketsData, RawMarket};
use crate::types::{MarketId, Price};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Step size decimals when the market doesn't say.
pub const TOKEN_DECIMALS: u32 = 4;
/// Tick size decimals when the market doesn't say.
pub const USD_DECIMALS: u32 = 2;

/// Parsed market with derived fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketInfo {
    pub id: MarketId,
    pub asset_id: String,
    pub oracle_price: Option<Price>,
    pub tick_size: Option<Decimal>,
    pub step_size: Option<Decimal>,
    pub initial_margin_fraction: Option<Decimal>,
    pub maintenance_margin_fraction: Option<Decimal>,
    /// Base IMF scaled up by open interest. `None` only when the base IMF is missing.
    pub effective_initial_margin_fraction: Option<Decimal>,
    pub open_interest: Option<Decimal>,
    pub open_interest_usdc: Decimal,
    pub next_funding_rate: Option<Decimal>,
    pub price_change_24h: Option<Decimal>,
    /// Fraction, not percent. 0.05 = +5%.
    pub percent_change_24h: Option<Decimal>,
    pub step_size_decimals: u32,
    pub tick_size_decimals: u32,
}

impl MarketInfo {
    /// Max leverage allowed by the effective IMF. Undefined when the IMF is zero or missing.
    pub fn max_leverage(&self) -> Option<Decimal> {
        self.effective_initial_margin_fraction
            .and_then(|imf| Decimal::ONE.checked_div(imf))
    }
}

/// Effective IMF: `min(imf + max((oi*oracle - lower)/(upper - lower) * (1 - imf), 0), 1)`.
///
/// Falls back to the base IMF when any scaling input is missing or the caps
/// coincide. Returns `None` when the base IMF itself is missing.
pub fn effective_initial_margin_fraction(market: &RawMarket) -> Option<Decimal> {
    let imf = opt_decimal(&market.initial_margin_fraction)?;

    let inputs = (
        opt_decimal(&market.oracle_price),
        opt_decimal(&market.open_interest),
        opt_decimal(&market.open_interest_lower_cap),
        opt_decimal(&market.open_interest_upper_cap),
    );
    let (Some(oracle), Some(oi), Some(lower), Some(upper)) = inputs else {
        return Some(imf);
    };
    if upper == lower {
        return Some(imf);
    }

    match scaled_imf(imf, oracle, oi, lower, upper) {
        Some(scaled) => Some(scaled),
        None => {
            warn!(market = %market.ticker, "open interest scaling overflows, using base imf");
            Some(imf)
        }
    }
}

fn scaled_imf(imf: Decimal, oracle: Decimal, oi: Decimal, lower: Decimal, upper: Decimal) -> Option<Decimal> {
    let open_notional = oi.checked_mul(oracle)?;
    let scaling = open_notional
        .checked_sub(lower)?
        .checked_div(upper.checked_sub(lower)?)?;
    let increase = scaling
        .checked_mul(Decimal::ONE.checked_sub(imf)?)?
        .max(Decimal::ZERO);
    Some(imf.checked_add(increase)?.min(Decimal::ONE))
}

// change / (oracle - change), only when the price 24h ago was positive
fn percent_change_24h(change: Option<Decimal>, oracle: Option<Decimal>) -> Option<Decimal> {
    let (change, oracle) = (change?, oracle?);
    let price_24h_ago = oracle.checked_sub(change)?;
    if price_24h_ago <= Decimal::ZERO {
        return None;
    }
    change.checked_div(price_24h_ago)
}

// zero when unknown or too large to represent
fn open_interest_usdc(market: &RawMarket, open_interest: Option<Decimal>, oracle: Option<Decimal>) -> Decimal {
    let (Some(oi), Some(oracle)) = (open_interest, oracle) else {
        return Decimal::ZERO;
    };
    oi.checked_mul(oracle).unwrap_or_else(|| {
        warn!(market = %market.ticker, "open interest in usdc overflows");
        Decimal::ZERO
    })
}

pub fn calculate_market(market: &RawMarket) -> MarketInfo {
    let oracle = opt_decimal(&market.oracle_price);
    let open_interest = opt_decimal(&market.open_interest);
    let price_change_24h = opt_decimal(&market.price_change_24h);
    let tick_size = opt_decimal(&market.tick_size);
    let step_size = opt_decimal(&market.step_size);

    MarketInfo {
        id: market.ticker.clone(),
        asset_id: market.ticker.asset_id().to_string(),
        oracle_price: oracle.and_then(Price::new),
        tick_size,
        step_size,
        initial_margin_fraction: opt_decimal(&market.initial_margin_fraction),
        maintenance_margin_fraction: opt_decimal(&market.maintenance_margin_fraction),
        effective_initial_margin_fraction: effective_initial_margin_fraction(market),
        open_interest,
        open_interest_usdc: open_interest_usdc(market, open_interest, oracle),
        next_funding_rate: opt_decimal(&market.next_funding_rate),
        price_change_24h,
        percent_change_24h: percent_change_24h(price_change_24h, oracle),
        step_size_decimals: step_size.map(decimal_places).unwrap_or(TOKEN_DECIMALS),
        tick_size_decimals: tick_size.map(decimal_places).unwrap_or(USD_DECIMALS),
    }
}

pub fn calculate_all_markets(markets: &MarketsData) -> BTreeMap<MarketId, MarketInfo> {
    markets
        .iter()
        .map(|(id, market)| (id.clone(), calculate_market(market)))
        .collect()
}

/// Leverage to show in a trade form: the user's pick, else `1 / imf`, else 1.
pub fn effective_selected_leverage(user_selected: Option<Decimal>, imf: Option<Decimal>) -> Decimal {
    if let Some(selected) = user_selected {
        return selected;
    }
    imf.and_then(|imf| Decimal::ONE.checked_div(imf))
        .unwrap_or(Decimal::ONE)
}
