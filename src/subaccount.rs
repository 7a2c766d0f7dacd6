// 3.0: subaccount summary. equity = max(sum(value) + quote balance, 0).
// 3.1 per-position extras (leverage, margin value, liquidation price, pnl %) need the summary first.

use crate::liquidation::{calculate_liquidation_price, LiquidationInputs};
use crate::position::{
    calculate_position_core, calculate_unrealized_pnl, position_base_equity,
    unrealized_pnl_percent, PositionCore,
};
use crate::raw::{MarketsData, PositionStatus, RawChildSubaccount, RawMarket, RawPerpetualPosition};
use crate::types::{MarginMode, Quote, Side, SubaccountNumber};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubaccountSummary {
    pub subaccount_number: SubaccountNumber,
    pub quote_balance: Quote,
    pub value_total: Quote,
    pub notional_total: Quote,
    pub initial_risk_total: Quote,
    pub maintenance_risk_total: Quote,
    /// Never negative.
    pub equity: Quote,
    /// Equity minus initial risk. May be negative.
    pub raw_free_collateral: Quote,
    pub free_collateral: Quote,
    /// Undefined when equity is zero.
    pub leverage: Option<Decimal>,
    /// Undefined when equity is zero.
    pub margin_usage: Option<Decimal>,
}

// signed USDC balance. short USDC = borrowed quote.
pub fn quote_balance(subaccount: &RawChildSubaccount) -> Quote {
    subaccount
        .usdc()
        .map(|usdc| {
            let size = usdc.size.to_decimal_or_zero();
            match usdc.side {
                Side::Long => Quote::new(size),
                Side::Short => Quote::new(-size),
            }
        })
        .unwrap_or_else(Quote::zero)
}

#[derive(Debug, Clone, Copy)]
struct Totals {
    value: Quote,
    notional: Quote,
    initial_risk: Quote,
    maintenance_risk: Quote,
    // quote balance plus value, before the floor
    net: Quote,
}

impl Totals {
    fn with(&self, core: &PositionCore) -> Option<Self> {
        Some(Self {
            value: self.value.checked_add(core.value)?,
            notional: self.notional.checked_add(core.notional)?,
            initial_risk: self.initial_risk.checked_add(core.initial_risk)?,
            maintenance_risk: self.maintenance_risk.checked_add(core.maintenance_risk)?,
            net: self.net.checked_add(core.value)?,
        })
    }
}

pub fn calculate_subaccount_summary(
    subaccount: &RawChildSubaccount,
    markets: &MarketsData,
    num_parent_subaccounts: u32,
) -> SubaccountSummary {
    let quote_balance = quote_balance(subaccount);
    let mut totals = Totals {
        value: Quote::zero(),
        notional: Quote::zero(),
        initial_risk: Quote::zero(),
        maintenance_risk: Quote::zero(),
        net: quote_balance,
    };

    for position in subaccount.open_perpetual_positions.values() {
        // unknown market => zero contribution
        let Some(market) = markets.get(&position.market) else {
            continue;
        };
        let core = calculate_position_core(position, Some(market), num_parent_subaccounts);
        match totals.with(&core) {
            Some(next) => totals = next,
            None => warn!(
                market = %position.market,
                subaccount = %subaccount.subaccount_number,
                "subaccount totals overflow, skipping position"
            ),
        }
    }

    let equity = totals.net.floor_zero();
    // both sides are non-negative, so this can't overflow
    let raw_free_collateral = equity.sub(totals.initial_risk);
    let free_collateral = raw_free_collateral.floor_zero();

    SubaccountSummary {
        subaccount_number: subaccount.subaccount_number,
        quote_balance,
        value_total: totals.value,
        notional_total: totals.notional,
        initial_risk_total: totals.initial_risk,
        maintenance_risk_total: totals.maintenance_risk,
        equity,
        raw_free_collateral,
        free_collateral,
        leverage: totals.notional.value().checked_div(equity.value()),
        margin_usage: free_collateral
            .value()
            .checked_div(equity.value())
            .map(|free_ratio| Decimal::ONE - free_ratio),
    }
}

/// A position with everything the subaccount context adds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubaccountPosition {
    pub core: PositionCore,
    pub leverage: Option<Decimal>,
    pub margin_value_maintenance: Quote,
    pub margin_value_initial: Quote,
    pub liquidation_price: Option<Decimal>,
    /// Zero when the entry value doesn't fit in a `Decimal`; the percent is then undefined.
    pub updated_unrealized_pnl: Quote,
    pub updated_unrealized_pnl_percent: Option<Decimal>,
}

pub fn calculate_subaccount_position(
    summary: &SubaccountSummary,
    position: &RawPerpetualPosition,
    market: Option<&RawMarket>,
    num_parent_subaccounts: u32,
) -> SubaccountPosition {
    let core = calculate_position_core(position, market, num_parent_subaccounts);
    let equity = summary.equity;

    let leverage = core.notional.value().checked_div(equity.value());

    // isolated positions are backed by the whole child subaccount
    let (margin_value_maintenance, margin_value_initial) = match core.margin_mode {
        MarginMode::Isolated => (equity, equity),
        MarginMode::Cross => (core.maintenance_risk, core.initial_risk),
    };

    let liquidation_price = calculate_liquidation_price(&LiquidationInputs {
        signed_size: core.signed_size,
        value: core.value,
        adjusted_mmf: core.adjusted_mmf,
        maintenance_risk: core.maintenance_risk,
        maintenance_risk_total: summary.maintenance_risk_total,
        equity,
    });

    let updated_unrealized_pnl = calculate_unrealized_pnl(core.signed_size, core.entry_price, core.value);
    if updated_unrealized_pnl.is_none() {
        warn!(market = %core.market, entry = %core.entry_price, "unrealized pnl overflows");
    }
    let base_equity = position_base_equity(core.signed_size, core.entry_price, leverage);

    SubaccountPosition {
        leverage,
        margin_value_maintenance,
        margin_value_initial,
        liquidation_price,
        updated_unrealized_pnl: updated_unrealized_pnl.unwrap_or_else(Quote::zero),
        updated_unrealized_pnl_percent: updated_unrealized_pnl
            .and_then(|pnl| unrealized_pnl_percent(pnl, base_equity)),
        core,
    }
}

/// Open positions of one child, newest first.
pub fn calculate_subaccount_positions(
    subaccount: &RawChildSubaccount,
    markets: &MarketsData,
    num_parent_subaccounts: u32,
) -> Vec<SubaccountPosition> {
    let summary = calculate_subaccount_summary(subaccount, markets, num_parent_subaccounts);
    let mut positions: Vec<SubaccountPosition> = subaccount
        .open_perpetual_positions
        .values()
        .filter(|p| p.status == PositionStatus::Open)
        .map(|p| calculate_subaccount_position(&summary, p, markets.get(&p.market), num_parent_subaccounts))
        .collect();
    positions.sort_by(|a, b| b.core.created_at.cmp(&a.core.created_at));
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{RawAssetPosition, RawDecimal, USDC_SYMBOL};
    use crate::types::MarketId;
    use rust_decimal_macros::dec;

    fn market(ticker: &str, oracle: &str) -> RawMarket {
        RawMarket {
            ticker: MarketId::from(ticker),
            oracle_price: Some(RawDecimal::from(oracle)),
            initial_margin_fraction: Some(RawDecimal::from("0.05")),
            maintenance_margin_fraction: Some(RawDecimal::from("0.03")),
            ..RawMarket::default()
        }
    }

    fn position(ticker: &str, side: Side, size: &str, entry: &str, created_at: &str) -> RawPerpetualPosition {
        RawPerpetualPosition {
            market: MarketId::from(ticker),
            status: PositionStatus::Open,
            side,
            size: RawDecimal::from(size),
            max_size: RawDecimal::from(size),
            entry_price: RawDecimal::from(entry),
            exit_price: None,
            realized_pnl: RawDecimal::default(),
            unrealized_pnl: RawDecimal::default(),
            net_funding: RawDecimal::default(),
            created_at: created_at.to_string(),
            created_at_height: RawDecimal::from("1"),
            closed_at: None,
            sum_open: RawDecimal::from(size),
            sum_close: RawDecimal::default(),
            subaccount_number: SubaccountNumber(0),
        }
    }

    fn child(usdc: (Side, &str), positions: Vec<RawPerpetualPosition>) -> RawChildSubaccount {
        let mut sub = RawChildSubaccount::empty("dydx1test", SubaccountNumber(0));
        sub.asset_positions.insert(
            USDC_SYMBOL.to_string(),
            RawAssetPosition {
                symbol: USDC_SYMBOL.to_string(),
                side: usdc.0,
                size: RawDecimal::from(usdc.1),
                subaccount_number: SubaccountNumber(0),
            },
        );
        for p in positions {
            sub.open_perpetual_positions.insert(p.market.clone(), p);
        }
        sub
    }

    fn markets() -> MarketsData {
        [
            (MarketId::from("BTC-USD"), market("BTC-USD", "50000")),
            (MarketId::from("ETH-USD"), market("ETH-USD", "2000")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn cash_only_summary() {
        let sub = child((Side::Long, "1000"), vec![]);
        let summary = calculate_subaccount_summary(&sub, &markets(), 128);
        assert_eq!(summary.equity.value(), dec!(1000));
        assert_eq!(summary.free_collateral.value(), dec!(1000));
        assert_eq!(summary.leverage, Some(Decimal::ZERO));
        assert_eq!(summary.margin_usage, Some(Decimal::ZERO));
    }

    #[test]
    fn levered_long_summary() {
        let sub = child(
            (Side::Short, "45000"),
            vec![position("BTC-USD", Side::Long, "1", "50000", "2024-01-01T00:00:00Z")],
        );
        let summary = calculate_subaccount_summary(&sub, &markets(), 128);

        assert_eq!(summary.quote_balance.value(), dec!(-45000));
        assert_eq!(summary.equity.value(), dec!(5000));
        assert_eq!(summary.initial_risk_total.value(), dec!(2500));
        assert_eq!(summary.free_collateral.value(), dec!(2500));
        assert_eq!(summary.leverage, Some(dec!(10)));
        assert_eq!(summary.margin_usage, Some(dec!(0.5)));
    }

    #[test]
    fn underwater_equity_floors_at_zero() {
        let sub = child(
            (Side::Short, "60000"),
            vec![position("BTC-USD", Side::Long, "1", "50000", "2024-01-01T00:00:00Z")],
        );
        let summary = calculate_subaccount_summary(&sub, &markets(), 128);
        assert!(summary.equity.is_zero());
        assert_eq!(summary.raw_free_collateral.value(), dec!(-2500));
        assert!(summary.free_collateral.is_zero());
        assert_eq!(summary.leverage, None);
        assert_eq!(summary.margin_usage, None);
    }

    #[test]
    fn unknown_market_is_ignored() {
        let sub = child(
            (Side::Long, "100"),
            vec![position("PEPE-USD", Side::Long, "1000000", "0.00001", "2024-01-01T00:00:00Z")],
        );
        let summary = calculate_subaccount_summary(&sub, &markets(), 128);
        assert_eq!(summary.equity.value(), dec!(100));
        assert!(summary.notional_total.is_zero());
    }

    #[test]
    fn position_extras() {
        let sub = child(
            (Side::Short, "45000"),
            vec![position("BTC-USD", Side::Long, "1", "48000", "2024-01-01T00:00:00Z")],
        );
        let positions = calculate_subaccount_positions(&sub, &markets(), 128);
        assert_eq!(positions.len(), 1);

        let p = &positions[0];
        assert_eq!(p.leverage, Some(dec!(10)));
        assert_eq!(p.margin_value_maintenance.value(), dec!(1500));
        assert_eq!(p.margin_value_initial.value(), dec!(2500));
        assert_eq!(p.updated_unrealized_pnl.value(), dec!(2000));
        // base equity 48000 / 10 = 4800
        assert_eq!(p.updated_unrealized_pnl_percent, Some(dec!(2000) / dec!(4800)));
        assert_eq!(p.liquidation_price, Some(dec!(45000) / dec!(0.97)));
    }

    #[test]
    fn isolated_margin_value_is_equity() {
        let mut sub = child(
            (Side::Short, "45000"),
            vec![position("BTC-USD", Side::Long, "1", "50000", "2024-01-01T00:00:00Z")],
        );
        sub.subaccount_number = SubaccountNumber(128);
        for p in sub.open_perpetual_positions.values_mut() {
            p.subaccount_number = SubaccountNumber(128);
        }
        let positions = calculate_subaccount_positions(&sub, &markets(), 128);
        assert_eq!(positions[0].core.margin_mode, MarginMode::Isolated);
        assert_eq!(positions[0].margin_value_maintenance.value(), dec!(5000));
        assert_eq!(positions[0].margin_value_initial.value(), dec!(5000));
    }

    #[test]
    fn positions_sorted_newest_first_and_closed_dropped() {
        let mut closed = position("ETH-USD", Side::Short, "0", "2000", "2024-03-01T00:00:00Z");
        closed.status = PositionStatus::Closed;
        let mut sub = child(
            (Side::Long, "10000"),
            vec![position("BTC-USD", Side::Long, "0.1", "50000", "2024-01-01T00:00:00Z")],
        );
        let eth = position("ETH-USD", Side::Short, "1", "2000", "2024-02-01T00:00:00Z");
        sub.open_perpetual_positions.insert(MarketId::from("ETH-USD"), eth);
        sub.open_perpetual_positions.insert(MarketId::from("SOL-USD"), {
            let mut c = closed;
            c.market = MarketId::from("SOL-USD");
            c
        });

        let positions = calculate_subaccount_positions(&sub, &markets(), 128);
        let order: Vec<_> = positions.iter().map(|p| p.core.market.as_str().to_string()).collect();
        assert_eq!(order, vec!["ETH-USD", "BTC-USD"]);
    }

    #[test]
    fn overflowing_position_adds_nothing() {
        let mut markets = markets();
        markets.insert(MarketId::from("HUGE-USD"), market("HUGE-USD", "10000000000"));
        let sub = child(
            (Side::Long, "1000"),
            vec![
                position("HUGE-USD", Side::Long, "1e20", "1", "2024-01-01T00:00:00Z"),
                position("BTC-USD", Side::Long, "0.1", "50000", "2024-01-02T00:00:00Z"),
            ],
        );
        let summary = calculate_subaccount_summary(&sub, &markets, 128);
        assert_eq!(summary.notional_total.value(), dec!(5000));
        assert_eq!(summary.equity.value(), dec!(6000));
        assert_eq!(summary.leverage, Some(dec!(5000) / dec!(6000)));

        let positions = calculate_subaccount_positions(&sub, &markets, 128);
        let huge = positions.iter().find(|p| p.core.market.as_str() == "HUGE-USD").unwrap();
        assert!(huge.core.value.is_zero());
        assert_eq!(huge.liquidation_price, None);
    }

    #[test]
    fn totals_that_overflow_skip_the_position() {
        let mut markets = markets();
        markets.insert(MarketId::from("BIG-USD"), market("BIG-USD", "1"));
        let sub = child(
            (Side::Long, "70000000000000000000000000000"),
            vec![position("BIG-USD", Side::Long, "70000000000000000000000000000", "1", "2024-01-01T00:00:00Z")],
        );
        let summary = calculate_subaccount_summary(&sub, &markets, 128);
        assert!(summary.value_total.is_zero());
        assert_eq!(summary.equity.value(), dec!(70000000000000000000000000000));
        assert_eq!(summary.leverage, Some(Decimal::ZERO));
    }

    #[test]
    fn overflowing_entry_leaves_pnl_percent_undefined() {
        let sub = child(
            (Side::Long, "1000"),
            vec![position("BTC-USD", Side::Long, "1000000", "100000000000000000000000", "2024-01-01T00:00:00Z")],
        );
        let positions = calculate_subaccount_positions(&sub, &markets(), 128);
        assert!(positions[0].updated_unrealized_pnl.is_zero());
        assert_eq!(positions[0].updated_unrealized_pnl_percent, None);
    }
}
