// 2.0: reconciler. snapshot (rest) and delta (websocket) maps keyed by stable id merge into one.
// 2.1 picks the more recent record per key. ties resolve on the record itself, so argument order never matters.

use crate::raw::{
    FillsData, OrdersData, RawFill, RawOrder, RawReward, RawTrade, RawTransfer, RewardsData,
    TradesData, TransfersData,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Union of both key sets. Keys present on one side keep their lone value,
/// shared keys resolve through `tiebreak(a, b)`.
pub fn merge_by_key<K, V, F>(a: &BTreeMap<K, V>, b: &BTreeMap<K, V>, tiebreak: F) -> BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
    F: Fn(&V, &V) -> V,
{
    let mut merged = a.clone();
    for (key, b_value) in b {
        let value = match a.get(key) {
            Some(a_value) => tiebreak(a_value, b_value),
            None => b_value.clone(),
        };
        merged.insert(key.clone(), value);
    }
    merged
}

// 2.1: recency keys. heights parse as decimals; an unparseable height sorts as oldest.
pub trait Recency {
    type Key: Ord;

    fn recency_key(&self) -> Self::Key;
}

fn height_of(raw: Option<&crate::raw::RawDecimal>) -> Option<Decimal> {
    raw.and_then(|h| h.to_decimal())
}

impl Recency for RawOrder {
    type Key = Option<Decimal>;

    fn recency_key(&self) -> Self::Key {
        height_of(self.updated_at_height.as_ref()).or_else(|| height_of(self.created_at_height.as_ref()))
    }
}

// history records: height first, then the ISO timestamp (lexical order == time order for rfc3339 utc)
macro_rules! created_recency {
    ($($ty:ty),*) => {
        $(
            impl Recency for $ty {
                type Key = (Option<Decimal>, String);

                fn recency_key(&self) -> Self::Key {
                    (self.created_at_height.to_decimal(), self.created_at.clone())
                }
            }
        )*
    };
}

created_recency!(RawFill, RawTrade, RawTransfer, RawReward);

/// The more recent of two records. Equal keys fall back to the record's own ordering,
/// which makes `newest(a, b) == newest(b, a)`.
pub fn newest<V: Recency + Ord + Clone>(a: &V, b: &V) -> V {
    let by_key = a.recency_key().cmp(&b.recency_key());
    match by_key.then_with(|| a.cmp(b)) {
        std::cmp::Ordering::Less => b.clone(),
        _ => a.clone(),
    }
}

pub fn merge_orders(rest: &OrdersData, live: &OrdersData) -> OrdersData {
    merge_by_key(rest, live, newest)
}

pub fn merge_fills(rest: &FillsData, live: &FillsData) -> FillsData {
    merge_by_key(rest, live, newest)
}

pub fn merge_trades(rest: &TradesData, live: &TradesData) -> TradesData {
    merge_by_key(rest, live, newest)
}

pub fn merge_transfers(rest: &TransfersData, live: &TransfersData) -> TransfersData {
    merge_by_key(rest, live, newest)
}

pub fn merge_rewards(rest: &RewardsData, live: &RewardsData) -> RewardsData {
    merge_by_key(rest, live, newest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{OrderType, RawDecimal, RawOrderStatus};
    use crate::types::{MarketId, OrderSide, SubaccountNumber};

    fn order(id: &str, status: RawOrderStatus, created: &str, updated: Option<&str>) -> RawOrder {
        RawOrder {
            id: id.to_string(),
            client_id: "1".to_string(),
            ticker: MarketId::from("ETH-USD"),
            subaccount_number: SubaccountNumber(0),
            clob_pair_id: None,
            side: OrderSide::Buy,
            size: RawDecimal::from("1"),
            total_filled: RawDecimal::from("0"),
            price: RawDecimal::from("2000"),
            trigger_price: None,
            order_type: OrderType::Limit,
            status: Some(status),
            time_in_force: None,
            post_only: None,
            reduce_only: None,
            order_flags: "64".to_string(),
            good_til_block: None,
            good_til_block_time: None,
            created_at_height: Some(RawDecimal::from(created)),
            client_metadata: None,
            updated_at: None,
            updated_at_height: updated.map(RawDecimal::from),
            removal_reason: None,
        }
    }

    #[test]
    fn lone_keys_survive() {
        let mut a = BTreeMap::new();
        a.insert("x".to_string(), 1);
        let mut b = BTreeMap::new();
        b.insert("y".to_string(), 2);

        let merged = merge_by_key(&a, &b, |l, _| *l);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }

    #[test]
    fn shared_keys_use_tiebreak() {
        let a: BTreeMap<_, _> = [("k", 1)].into_iter().collect();
        let b: BTreeMap<_, _> = [("k", 5)].into_iter().collect();
        let merged = merge_by_key(&a, &b, |l, r| l + r);
        assert_eq!(merged["k"], 6);
    }

    #[test]
    fn newer_update_height_wins() {
        let stale = order("o1", RawOrderStatus::Open, "100", None);
        let fresh = order("o1", RawOrderStatus::Filled, "100", Some("105"));

        let rest: OrdersData = [("o1".to_string(), stale.clone())].into_iter().collect();
        let live: OrdersData = [("o1".to_string(), fresh.clone())].into_iter().collect();

        assert_eq!(merge_orders(&rest, &live)["o1"].status, Some(RawOrderStatus::Filled));
        assert_eq!(merge_orders(&live, &rest)["o1"].status, Some(RawOrderStatus::Filled));
    }

    #[test]
    fn equal_heights_resolve_the_same_either_way() {
        let a = order("o1", RawOrderStatus::Open, "100", Some("110"));
        let b = order("o1", RawOrderStatus::BestEffortCanceled, "100", Some("110"));
        assert_eq!(newest(&a, &b), newest(&b, &a));
    }

    #[test]
    fn missing_update_height_falls_back_to_created() {
        let a = order("o1", RawOrderStatus::Open, "120", None);
        let b = order("o1", RawOrderStatus::Canceled, "100", Some("110"));
        assert_eq!(newest(&a, &b).status, Some(RawOrderStatus::Open));
    }
}
