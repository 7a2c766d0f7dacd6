//! Order lifecycle.
//!
//! The indexer reports a raw status per order; what a trader should see
//! depends on fills, the order's expiry block and the current chain height.
//! `calculate_base_order_status` maps raw to normalized status, then
//! `maybe_expire` cancels anything still in flight past its good-til-block.

use crate::config::{DeriveConfig, OrderLifecycleParams};
use crate::position::position_unique_id;
use crate::raw::{opt_decimal, opt_timestamp, OrderType, OrdersData, ProtocolHeight, RawOrder, RawOrderStatus};
use crate::reconcile::merge_orders;
use crate::types::{MarginMode, MarketId, OrderSide, SubaccountNumber, Timestamp};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Canceling,
    Canceled,
    PartiallyCanceled,
    Filled,
    Untriggered,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Canceled | OrderStatus::PartiallyCanceled | OrderStatus::Filled
        )
    }

    /// Three-way fold used by tables: Open, Canceled or Filled.
    pub fn simple(&self) -> OrderStatus {
        match self {
            OrderStatus::Open
            | OrderStatus::Pending
            | OrderStatus::PartiallyFilled
            | OrderStatus::Untriggered
            | OrderStatus::Canceling => OrderStatus::Open,
            OrderStatus::Canceled | OrderStatus::PartiallyCanceled => OrderStatus::Canceled,
            OrderStatus::Filled => OrderStatus::Filled,
        }
    }
}

pub fn simple_order_status(status: OrderStatus) -> OrderStatus {
    status.simple()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubaccountOrder {
    pub id: String,
    pub client_id: String,
    pub market_id: MarketId,
    pub subaccount_number: SubaccountNumber,
    pub margin_mode: MarginMode,
    pub position_unique_id: String,
    /// `None` when the feed sent no status at all.
    pub status: Option<OrderStatus>,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub time_in_force: Option<String>,
    pub clob_pair_id: Option<u32>,
    pub order_flags: String,
    pub price: Decimal,
    pub trigger_price: Option<Decimal>,
    pub size: Decimal,
    pub total_filled: Decimal,
    /// `None` when the reported fill cannot be taken off the size.
    pub remaining_size: Option<Decimal>,
    pub good_til_block: Option<u64>,
    pub good_til_block_time: Option<Timestamp>,
    pub created_at_height: Option<u64>,
    pub updated_at: Option<Timestamp>,
    pub updated_at_height: Option<u64>,
    pub post_only: bool,
    pub reduce_only: bool,
    pub removal_reason: Option<String>,
}

const USER_CANCELED_REASONS: [&str; 2] = ["USER_CANCELED", "ORDER_REMOVAL_REASON_USER_CANCELED"];

fn height_u64(raw: &Option<crate::raw::RawDecimal>) -> Option<u64> {
    opt_decimal(raw).and_then(|h| h.to_u64())
}

// raw -> normalized. partial fills first, then the best-effort-canceled grace window.
pub fn calculate_base_order_status(
    order: &RawOrder,
    height: &ProtocolHeight,
    params: &OrderLifecycleParams,
) -> Option<OrderStatus> {
    let status = order.status?;

    if status == RawOrderStatus::BestEffortOpened {
        return Some(OrderStatus::Pending);
    }

    let size = order.size.to_decimal_or_zero();
    let total_filled = order.total_filled.to_decimal_or_zero();
    let has_partial_fill = total_filled > Decimal::ZERO && total_filled < size;

    if has_partial_fill {
        match status {
            RawOrderStatus::Open => return Some(OrderStatus::PartiallyFilled),
            RawOrderStatus::Canceled => return Some(OrderStatus::PartiallyCanceled),
            _ => {}
        }
    }

    if status == RawOrderStatus::BestEffortCanceled {
        // no expiry block means the cancel can't still be in flight
        let Some(good_til_block) = opt_decimal(&order.good_til_block) else {
            return Some(OrderStatus::Canceled);
        };
        // an expiry too far out to add the grace to has not passed
        let grace_end = good_til_block.checked_add(Decimal::from(params.cancel_grace_blocks));
        if grace_end.is_some_and(|end| end < Decimal::from(height.height)) {
            return Some(OrderStatus::Canceled);
        }

        let is_short_term = order.order_flags == params.short_term_order_flags;
        let is_user_canceled = order
            .removal_reason
            .as_deref()
            .is_some_and(|r| USER_CANCELED_REASONS.contains(&r));
        if is_short_term && !is_user_canceled {
            return Some(OrderStatus::Pending);
        }
    }

    Some(match status {
        RawOrderStatus::Open => OrderStatus::Open,
        RawOrderStatus::Filled => OrderStatus::Filled,
        RawOrderStatus::Canceled => OrderStatus::Canceled,
        RawOrderStatus::BestEffortCanceled => OrderStatus::Canceling,
        RawOrderStatus::Untriggered => OrderStatus::Untriggered,
        RawOrderStatus::BestEffortOpened => OrderStatus::Pending,
    })
}

/// Limit-family orders placed as market orders carry client metadata "1".
pub fn display_order_type(order_type: OrderType, client_metadata: Option<&str>) -> OrderType {
    if client_metadata != Some("1") {
        return order_type;
    }
    match order_type {
        OrderType::Limit => OrderType::Market,
        OrderType::StopLimit => OrderType::StopMarket,
        OrderType::TakeProfit => OrderType::TakeProfitMarket,
        other => other,
    }
}

// in-flight orders past their expiry block are canceled, stamped with the observed height
pub fn maybe_expire(order: SubaccountOrder, height: &ProtocolHeight) -> SubaccountOrder {
    let Some(status) = order.status else {
        return order;
    };
    if !matches!(
        status,
        OrderStatus::Pending | OrderStatus::Canceling | OrderStatus::PartiallyFilled
    ) {
        return order;
    }
    let expired = order
        .good_til_block
        .is_some_and(|gtb| gtb != 0 && height.height >= gtb);
    if !expired {
        return order;
    }

    let partially_filled = order.total_filled > Decimal::ZERO && order.total_filled < order.size;
    let status = if partially_filled {
        OrderStatus::PartiallyCanceled
    } else {
        OrderStatus::Canceled
    };
    debug!(order_id = %order.id, height = height.height, ?status, "order expired");

    SubaccountOrder {
        status: Some(status),
        updated_at: height.timestamp(),
        updated_at_height: Some(height.height),
        ..order
    }
}

pub fn calculate_subaccount_order(
    order: &RawOrder,
    height: &ProtocolHeight,
    config: &DeriveConfig,
) -> SubaccountOrder {
    let size = order.size.to_decimal_or_zero();
    let total_filled = order.total_filled.to_decimal_or_zero();

    let normalized = SubaccountOrder {
        id: order.id.clone(),
        client_id: order.client_id.clone(),
        market_id: order.ticker.clone(),
        subaccount_number: order.subaccount_number,
        margin_mode: order
            .subaccount_number
            .margin_mode(config.margin.num_parent_subaccounts),
        position_unique_id: position_unique_id(&order.ticker, order.subaccount_number),
        status: calculate_base_order_status(order, height, &config.orders),
        order_type: display_order_type(order.order_type, order.client_metadata.as_deref()),
        side: order.side,
        time_in_force: order.time_in_force.clone(),
        clob_pair_id: opt_decimal(&order.clob_pair_id).and_then(|c| c.to_u32()),
        order_flags: order.order_flags.clone(),
        price: order.price.to_decimal_or_zero(),
        trigger_price: opt_decimal(&order.trigger_price),
        size,
        total_filled,
        remaining_size: size.checked_sub(total_filled),
        good_til_block: height_u64(&order.good_til_block),
        good_til_block_time: opt_timestamp(&order.good_til_block_time),
        created_at_height: height_u64(&order.created_at_height),
        updated_at: opt_timestamp(&order.updated_at),
        updated_at_height: height_u64(&order.updated_at_height),
        post_only: order.post_only.unwrap_or(false),
        reduce_only: order.reduce_only.unwrap_or(false),
        removal_reason: order.removal_reason.clone(),
    };
    maybe_expire(normalized, height)
}

/// Merges live and rest orders, normalizes each and sorts by update height, newest first.
pub fn calculate_all_orders(
    live: &OrdersData,
    rest: &OrdersData,
    height: &ProtocolHeight,
    config: &DeriveConfig,
) -> Vec<SubaccountOrder> {
    let merged = merge_orders(rest, live);
    let mut orders: Vec<SubaccountOrder> = merged
        .values()
        .map(|o| calculate_subaccount_order(o, height, config))
        .collect();
    orders.sort_by(|a, b| b.updated_at_height.cmp(&a.updated_at_height));
    orders
}

/// Orders still working, including those with no status yet.
pub fn calculate_open_orders(orders: &[SubaccountOrder]) -> Vec<SubaccountOrder> {
    orders
        .iter()
        .filter(|o| o.status.map_or(true, |s| s.simple() == OrderStatus::Open))
        .cloned()
        .collect()
}

pub fn calculate_order_history(orders: &[SubaccountOrder]) -> Vec<SubaccountOrder> {
    orders
        .iter()
        .filter(|o| o.status.is_some_and(|s| s.simple() != OrderStatus::Open))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::RawDecimal;

    fn raw(status: RawOrderStatus, size: &str, filled: &str) -> RawOrder {
        RawOrder {
            id: "order-1".to_string(),
            client_id: "42".to_string(),
            ticker: MarketId::from("BTC-USD"),
            subaccount_number: SubaccountNumber(0),
            clob_pair_id: Some(RawDecimal::from("0")),
            side: OrderSide::Buy,
            size: RawDecimal::from(size),
            total_filled: RawDecimal::from(filled),
            price: RawDecimal::from("50000"),
            trigger_price: None,
            order_type: OrderType::Limit,
            status: Some(status),
            time_in_force: Some("GTT".to_string()),
            post_only: Some(false),
            reduce_only: Some(false),
            order_flags: "64".to_string(),
            good_til_block: None,
            good_til_block_time: None,
            created_at_height: Some(RawDecimal::from("900")),
            client_metadata: None,
            updated_at: None,
            updated_at_height: None,
            removal_reason: None,
        }
    }

    fn at(height: u64) -> ProtocolHeight {
        ProtocolHeight::new(height, "2024-01-01T00:00:00Z")
    }

    fn status(order: &RawOrder, height: u64) -> Option<OrderStatus> {
        calculate_base_order_status(order, &at(height), &OrderLifecycleParams::default())
    }

    #[test]
    fn direct_mappings() {
        assert_eq!(status(&raw(RawOrderStatus::Open, "1", "0"), 1000), Some(OrderStatus::Open));
        assert_eq!(status(&raw(RawOrderStatus::Filled, "1", "1"), 1000), Some(OrderStatus::Filled));
        assert_eq!(status(&raw(RawOrderStatus::Canceled, "1", "0"), 1000), Some(OrderStatus::Canceled));
        assert_eq!(
            status(&raw(RawOrderStatus::Untriggered, "1", "0"), 1000),
            Some(OrderStatus::Untriggered)
        );
        assert_eq!(
            status(&raw(RawOrderStatus::BestEffortOpened, "1", "0"), 1000),
            Some(OrderStatus::Pending)
        );
    }

    #[test]
    fn missing_status_stays_missing() {
        let mut order = raw(RawOrderStatus::Open, "1", "0");
        order.status = None;
        assert_eq!(status(&order, 1000), None);
    }

    #[test]
    fn partial_fills() {
        assert_eq!(
            status(&raw(RawOrderStatus::Open, "2", "0.5"), 1000),
            Some(OrderStatus::PartiallyFilled)
        );
        assert_eq!(
            status(&raw(RawOrderStatus::Canceled, "2", "0.5"), 1000),
            Some(OrderStatus::PartiallyCanceled)
        );
        // only open and canceled have partial variants
        assert_eq!(
            status(&raw(RawOrderStatus::Untriggered, "2", "0.5"), 1000),
            Some(OrderStatus::Untriggered)
        );
    }

    #[test]
    fn best_effort_canceled_without_expiry_is_canceled() {
        let order = raw(RawOrderStatus::BestEffortCanceled, "1", "0");
        assert_eq!(status(&order, 1000), Some(OrderStatus::Canceled));
    }

    #[test]
    fn best_effort_canceled_grace_window() {
        let mut order = raw(RawOrderStatus::BestEffortCanceled, "1", "0");
        order.good_til_block = Some(RawDecimal::from("1000"));

        // 1000 + 25 < 1026
        assert_eq!(status(&order, 1026), Some(OrderStatus::Canceled));
        // still inside the window: stateful order => canceling
        assert_eq!(status(&order, 1025), Some(OrderStatus::Canceling));
    }

    #[test]
    fn short_term_best_effort_canceled_is_pending_unless_user_canceled() {
        let mut order = raw(RawOrderStatus::BestEffortCanceled, "1", "0");
        order.good_til_block = Some(RawDecimal::from("1000"));
        order.order_flags = "0".to_string();
        assert_eq!(status(&order, 990), Some(OrderStatus::Pending));

        order.removal_reason = Some("ORDER_REMOVAL_REASON_USER_CANCELED".to_string());
        assert_eq!(status(&order, 990), Some(OrderStatus::Canceling));
    }

    #[test]
    fn expiry_overrides_in_flight_statuses() {
        let config = DeriveConfig::default();
        let mut order = raw(RawOrderStatus::BestEffortCanceled, "1", "0");
        order.good_til_block = Some(RawDecimal::from("1000"));
        order.order_flags = "0".to_string();

        let expired = calculate_subaccount_order(&order, &at(1010), &config);
        assert_eq!(expired.status, Some(OrderStatus::Canceled));
        assert_eq!(expired.updated_at_height, Some(1010));
        assert_eq!(expired.updated_at, Timestamp::parse_iso("2024-01-01T00:00:00Z"));

        let live = calculate_subaccount_order(&order, &at(999), &config);
        assert_eq!(live.status, Some(OrderStatus::Pending));
        assert_eq!(live.updated_at_height, None);
    }

    #[test]
    fn expiry_on_partially_filled_is_partially_canceled() {
        let mut order = raw(RawOrderStatus::Open, "2", "1");
        order.good_til_block = Some(RawDecimal::from("1000"));
        let normalized = calculate_subaccount_order(&order, &at(1000), &DeriveConfig::default());
        assert_eq!(normalized.status, Some(OrderStatus::PartiallyCanceled));
        assert_eq!(normalized.remaining_size, Some(Decimal::ONE));
    }

    #[test]
    fn huge_feed_numbers_do_not_break_lifecycle() {
        let order = raw(RawOrderStatus::Open, "79228162514264337593543950335", "-1");
        let normalized = calculate_subaccount_order(&order, &at(1000), &DeriveConfig::default());
        assert_eq!(normalized.status, Some(OrderStatus::Open));
        assert_eq!(normalized.remaining_size, None);

        // no room for the grace blocks, so the cancel is still in flight
        let mut canceling = raw(RawOrderStatus::BestEffortCanceled, "1", "0");
        canceling.good_til_block = Some(RawDecimal::from("79228162514264337593543950335"));
        assert_eq!(status(&canceling, 1000), Some(OrderStatus::Canceling));
    }

    #[test]
    fn expiry_leaves_plain_open_alone() {
        let mut order = raw(RawOrderStatus::Open, "1", "0");
        order.good_til_block = Some(RawDecimal::from("1000"));
        let normalized = calculate_subaccount_order(&order, &at(2000), &DeriveConfig::default());
        assert_eq!(normalized.status, Some(OrderStatus::Open));
    }

    #[test]
    fn client_metadata_remaps_type() {
        assert_eq!(display_order_type(OrderType::Limit, Some("1")), OrderType::Market);
        assert_eq!(display_order_type(OrderType::StopLimit, Some("1")), OrderType::StopMarket);
        assert_eq!(
            display_order_type(OrderType::TakeProfit, Some("1")),
            OrderType::TakeProfitMarket
        );
        assert_eq!(display_order_type(OrderType::TrailingStop, Some("1")), OrderType::TrailingStop);
        assert_eq!(display_order_type(OrderType::Limit, Some("0")), OrderType::Limit);
        assert_eq!(display_order_type(OrderType::Limit, None), OrderType::Limit);
    }

    #[test]
    fn simple_status_fold() {
        assert_eq!(simple_order_status(OrderStatus::Canceling), OrderStatus::Open);
        assert_eq!(simple_order_status(OrderStatus::PartiallyCanceled), OrderStatus::Canceled);
        assert_eq!(simple_order_status(OrderStatus::Filled), OrderStatus::Filled);
        assert!(OrderStatus::PartiallyCanceled.is_terminal());
        assert!(!OrderStatus::Canceling.is_terminal());
    }

    #[test]
    fn all_orders_merge_sort_and_split() {
        let config = DeriveConfig::default();
        let mut a = raw(RawOrderStatus::Open, "1", "0");
        a.id = "a".to_string();
        a.updated_at_height = Some(RawDecimal::from("950"));
        let mut b = raw(RawOrderStatus::Filled, "1", "1");
        b.id = "b".to_string();
        b.updated_at_height = Some(RawDecimal::from("990"));
        let mut a_live = a.clone();
        a_live.status = Some(RawOrderStatus::Canceled);
        a_live.updated_at_height = Some(RawDecimal::from("999"));

        let rest: OrdersData = [("a".to_string(), a), ("b".to_string(), b)].into_iter().collect();
        let live: OrdersData = [("a".to_string(), a_live)].into_iter().collect();

        let all = calculate_all_orders(&live, &rest, &at(1000), &config);
        let ids: Vec<_> = all.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(all[0].status, Some(OrderStatus::Canceled));

        assert!(calculate_open_orders(&all).is_empty());
        assert_eq!(calculate_order_history(&all).len(), 2);
    }

    #[test]
    fn isolated_margin_mode_from_subaccount() {
        let mut order = raw(RawOrderStatus::Open, "1", "0");
        order.subaccount_number = SubaccountNumber(129);
        let normalized = calculate_subaccount_order(&order, &at(1), &DeriveConfig::default());
        assert_eq!(normalized.margin_mode, MarginMode::Isolated);
        assert_eq!(normalized.position_unique_id, "BTC-USD-129");
    }
}
