// 8.0: parent subaccount aggregates. a parent (cross) child plus isolated children, one wallet.
// margin numbers come from the parent child alone, equity sums across every child.

use crate::config::DeriveConfig;
use crate::orders::SubaccountOrder;
use crate::raw::{MarketsData, RawParentSubaccount};
use crate::subaccount::{calculate_subaccount_positions, calculate_subaccount_summary, SubaccountPosition, SubaccountSummary};
use crate::types::{MarginMode, MarketId, Quote, SubaccountNumber};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("parent subaccount {0} not found among child subaccounts")]
    ParentSubaccountNotFound(SubaccountNumber),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedSubaccountSummary {
    pub margin_usage: Option<Decimal>,
    pub leverage: Option<Decimal>,
    pub free_collateral: Quote,
    pub raw_free_collateral: Quote,
    pub parent_subaccount_equity: Quote,
    /// Sum over all children, parent included.
    pub equity: Quote,
}

pub fn calculate_child_subaccount_summaries(
    parent: &RawParentSubaccount,
    markets: &MarketsData,
    config: &DeriveConfig,
) -> BTreeMap<SubaccountNumber, SubaccountSummary> {
    parent
        .child_subaccounts
        .iter()
        .map(|(number, child)| {
            (
                *number,
                calculate_subaccount_summary(child, markets, config.margin.num_parent_subaccounts),
            )
        })
        .collect()
}

// children whose equity would overflow the running total are left out of it
fn total_equity(summaries: &BTreeMap<SubaccountNumber, SubaccountSummary>) -> Quote {
    summaries.iter().fold(Quote::zero(), |total, (number, summary)| {
        total.checked_add(summary.equity).unwrap_or_else(|| {
            warn!(subaccount = %number, "child equity overflows the wallet total, left out");
            total
        })
    })
}

pub fn calculate_parent_subaccount_summary(
    parent: &RawParentSubaccount,
    markets: &MarketsData,
    config: &DeriveConfig,
) -> Result<GroupedSubaccountSummary, AggregateError> {
    let summaries = calculate_child_subaccount_summaries(parent, markets, config);
    let parent_summary = summaries
        .get(&parent.parent_subaccount)
        .ok_or(AggregateError::ParentSubaccountNotFound(parent.parent_subaccount))?;

    Ok(GroupedSubaccountSummary {
        margin_usage: parent_summary.margin_usage,
        leverage: parent_summary.leverage,
        free_collateral: parent_summary.free_collateral,
        raw_free_collateral: parent_summary.raw_free_collateral,
        parent_subaccount_equity: parent_summary.equity,
        equity: total_equity(&summaries),
    })
}

/// Open positions across all children, each child's block newest first.
pub fn calculate_parent_subaccount_positions(
    parent: &RawParentSubaccount,
    markets: &MarketsData,
    config: &DeriveConfig,
) -> Vec<SubaccountPosition> {
    parent
        .child_subaccounts
        .values()
        .flat_map(|child| calculate_subaccount_positions(child, markets, config.margin.num_parent_subaccounts))
        .collect()
}

pub fn calculate_markets_needed_for_subaccount(parent: &RawParentSubaccount) -> BTreeSet<MarketId> {
    parent
        .child_subaccounts
        .values()
        .flat_map(|child| child.open_perpetual_positions.values().map(|p| p.market.clone()))
        .collect()
}

/// Isolated orders resting in a market where the wallet holds no position yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingIsolatedPosition {
    pub market_id: MarketId,
    pub asset_id: String,
    pub subaccount_number: SubaccountNumber,
    /// Equity of the child holding the orders. Zero when that child is unknown.
    pub equity: Quote,
    pub orders: Vec<SubaccountOrder>,
}

pub fn calculate_unopened_isolated_positions(
    child_summaries: &BTreeMap<SubaccountNumber, SubaccountSummary>,
    orders: &[SubaccountOrder],
    positions: &[SubaccountPosition],
) -> Vec<PendingIsolatedPosition> {
    let open_markets: BTreeSet<&MarketId> = positions.iter().map(|p| &p.core.market).collect();

    let mut by_market: BTreeMap<&MarketId, Vec<SubaccountOrder>> = BTreeMap::new();
    for order in orders
        .iter()
        .filter(|o| o.margin_mode == MarginMode::Isolated && !open_markets.contains(&o.market_id))
    {
        by_market.entry(&order.market_id).or_default().push(order.clone());
    }

    by_market
        .into_iter()
        .filter_map(|(market_id, orders)| {
            // the first order decides which child backs the position
            let subaccount_number = orders.first()?.subaccount_number;
            Some(PendingIsolatedPosition {
                market_id: market_id.clone(),
                asset_id: market_id.asset_id().to_string(),
                subaccount_number,
                equity: child_summaries
                    .get(&subaccount_number)
                    .map(|s| s.equity)
                    .unwrap_or_else(Quote::zero),
                orders,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::calculate_subaccount_order;
    use crate::raw::{
        OrderType, PositionStatus, ProtocolHeight, RawAssetPosition, RawChildSubaccount, RawDecimal,
        RawMarket, RawOrder, RawOrderStatus, RawPerpetualPosition, USDC_SYMBOL,
    };
    use crate::types::{OrderSide, Side};
    use rust_decimal_macros::dec;

    fn markets() -> MarketsData {
        let btc = RawMarket {
            ticker: MarketId::from("BTC-USD"),
            oracle_price: Some(RawDecimal::from("50000")),
            initial_margin_fraction: Some(RawDecimal::from("0.05")),
            maintenance_margin_fraction: Some(RawDecimal::from("0.03")),
            ..RawMarket::default()
        };
        [(btc.ticker.clone(), btc)].into_iter().collect()
    }

    fn child(number: u32, usdc: &str, btc_size: Option<&str>) -> RawChildSubaccount {
        let n = SubaccountNumber(number);
        let mut sub = RawChildSubaccount::empty("dydx1wallet", n);
        sub.asset_positions.insert(
            USDC_SYMBOL.to_string(),
            RawAssetPosition {
                symbol: USDC_SYMBOL.to_string(),
                side: Side::Long,
                size: RawDecimal::from(usdc),
                subaccount_number: n,
            },
        );
        if let Some(size) = btc_size {
            sub.open_perpetual_positions.insert(
                MarketId::from("BTC-USD"),
                RawPerpetualPosition {
                    market: MarketId::from("BTC-USD"),
                    status: PositionStatus::Open,
                    side: Side::Long,
                    size: RawDecimal::from(size),
                    max_size: RawDecimal::from(size),
                    entry_price: RawDecimal::from("50000"),
                    exit_price: None,
                    realized_pnl: RawDecimal::default(),
                    unrealized_pnl: RawDecimal::default(),
                    net_funding: RawDecimal::default(),
                    created_at: "2024-01-01T00:00:00Z".to_string(),
                    created_at_height: RawDecimal::from("1"),
                    closed_at: None,
                    sum_open: RawDecimal::from(size),
                    sum_close: RawDecimal::default(),
                    subaccount_number: n,
                },
            );
        }
        sub
    }

    fn wallet(children: Vec<RawChildSubaccount>) -> RawParentSubaccount {
        RawParentSubaccount {
            address: "dydx1wallet".to_string(),
            parent_subaccount: SubaccountNumber(0),
            child_subaccounts: children.into_iter().map(|c| (c.subaccount_number, c)).collect(),
        }
    }

    fn isolated_order(id: &str, ticker: &str, subaccount: u32) -> SubaccountOrder {
        let raw = RawOrder {
            id: id.to_string(),
            client_id: id.to_string(),
            ticker: MarketId::from(ticker),
            subaccount_number: SubaccountNumber(subaccount),
            clob_pair_id: None,
            side: OrderSide::Buy,
            size: RawDecimal::from("1"),
            total_filled: RawDecimal::from("0"),
            price: RawDecimal::from("10"),
            trigger_price: None,
            order_type: OrderType::Limit,
            status: Some(RawOrderStatus::Open),
            time_in_force: None,
            post_only: None,
            reduce_only: None,
            order_flags: "64".to_string(),
            good_til_block: None,
            good_til_block_time: None,
            created_at_height: Some(RawDecimal::from("1")),
            client_metadata: None,
            updated_at: None,
            updated_at_height: None,
            removal_reason: None,
        };
        calculate_subaccount_order(&raw, &ProtocolHeight::new(10, "2024-01-01T00:00:00Z"), &DeriveConfig::default())
    }

    #[test]
    fn parent_summary_sums_equity_over_children() {
        let parent = wallet(vec![child(0, "1000", None), child(128, "250", None)]);
        let grouped = calculate_parent_subaccount_summary(&parent, &markets(), &DeriveConfig::default()).unwrap();
        assert_eq!(grouped.parent_subaccount_equity.value(), dec!(1000));
        assert_eq!(grouped.equity.value(), dec!(1250));
        assert_eq!(grouped.free_collateral.value(), dec!(1000));
    }

    #[test]
    fn child_equity_that_overflows_is_left_out_of_total() {
        let parent = wallet(vec![
            child(0, "50000000000000000000000000000", None),
            child(128, "40000000000000000000000000000", None),
            child(256, "10", None),
        ]);
        let grouped = calculate_parent_subaccount_summary(&parent, &markets(), &DeriveConfig::default()).unwrap();
        assert_eq!(grouped.equity.value(), dec!(50000000000000000000000000010));
    }

    #[test]
    fn missing_parent_child_is_an_error() {
        let parent = wallet(vec![child(128, "250", None)]);
        let result = calculate_parent_subaccount_summary(&parent, &markets(), &DeriveConfig::default());
        assert_eq!(result, Err(AggregateError::ParentSubaccountNotFound(SubaccountNumber(0))));
    }

    #[test]
    fn positions_and_markets_across_children() {
        let parent = wallet(vec![child(0, "10000", Some("0.1")), child(128, "5000", Some("0.05"))]);
        let positions = calculate_parent_subaccount_positions(&parent, &markets(), &DeriveConfig::default());
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[1].core.margin_mode, MarginMode::Isolated);

        let needed = calculate_markets_needed_for_subaccount(&parent);
        assert_eq!(needed.into_iter().collect::<Vec<_>>(), vec![MarketId::from("BTC-USD")]);
    }

    #[test]
    fn pending_isolated_positions() {
        let parent = wallet(vec![child(0, "10000", Some("0.1")), child(128, "300", None)]);
        let config = DeriveConfig::default();
        let summaries = calculate_child_subaccount_summaries(&parent, &markets(), &config);
        let positions = calculate_parent_subaccount_positions(&parent, &markets(), &config);

        let orders = vec![
            isolated_order("a", "ETH-USD", 128),
            isolated_order("b", "ETH-USD", 128),
            // market already has a position
            isolated_order("c", "BTC-USD", 128),
            // cross order
            isolated_order("d", "SOL-USD", 0),
        ];
        let pending = calculate_unopened_isolated_positions(&summaries, &orders, &positions);

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].market_id, MarketId::from("ETH-USD"));
        assert_eq!(pending[0].asset_id, "ETH");
        assert_eq!(pending[0].orders.len(), 2);
        assert_eq!(pending[0].equity.value(), dec!(300));
    }
}
