// 5.0: orderbook builder. raw price -> {size, offset} maps in, sorted uncrossed sides out.
// 5.1 uncrossing, 5.2 depth, 5.3 grouping for display.

use crate::config::OrderbookParams;
use crate::numbers::{decimal_places, maybe_decimal, round_to_factor, Rounding};
use crate::raw::{RawOrderbook, RawOrderbookLevel};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Tick decimals used for map keys when the tick size has none to offer.
pub const SMALL_USD_DECIMALS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderbookLine {
    pub price: Decimal,
    pub size: Decimal,
    pub size_cost: Decimal,
    pub offset: u64,
    /// Cumulative size from the touch through this level.
    pub depth: Decimal,
    pub depth_cost: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orderbook {
    /// Ascending by price.
    pub asks: Vec<OrderbookLine>,
    /// Descending by price.
    pub bids: Vec<OrderbookLine>,
    pub mid_price: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub spread_percent: Option<Decimal>,
}

impl Orderbook {
    pub fn best_ask(&self) -> Option<&OrderbookLine> {
        self.asks.first()
    }

    pub fn best_bid(&self) -> Option<&OrderbookLine> {
        self.bids.first()
    }

    pub fn is_crossed(&self) -> bool {
        match (self.best_ask(), self.best_bid()) {
            (Some(ask), Some(bid)) => ask.price <= bid.price,
            _ => false,
        }
    }
}

// a level before depth is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Level {
    price: Decimal,
    size: Decimal,
    size_cost: Decimal,
    offset: u64,
}

// unparseable or non-positive prices, non-positive sizes and levels whose
// price * size overflows are dropped. two keys that parse to the same price keep the newer offset.
fn parse_side(raw: &BTreeMap<String, RawOrderbookLevel>) -> BTreeMap<Decimal, Level> {
    let mut levels: BTreeMap<Decimal, Level> = BTreeMap::new();
    for (price_key, level) in raw {
        let Some(price) = maybe_decimal(price_key).filter(|p| *p > Decimal::ZERO) else {
            debug!(price = %price_key, "dropping level with bad price");
            continue;
        };
        let size = level.size.to_decimal_or_zero();
        if size <= Decimal::ZERO {
            continue;
        }
        let Some(size_cost) = price.checked_mul(size) else {
            debug!(price = %price_key, size = %size, "dropping level whose cost overflows");
            continue;
        };
        let candidate = Level {
            price,
            size,
            size_cost,
            offset: level.offset,
        };
        levels
            .entry(price)
            .and_modify(|existing| {
                if candidate.offset > existing.offset {
                    *existing = candidate;
                }
            })
            .or_insert(candidate);
    }
    levels
}

// 5.1: drop levels from the touch until best ask > best bid.
// the older offset loses. equal offsets keep the larger size, the ask on a tie.
fn uncross(asks: &mut VecDeque<Level>, bids: &mut VecDeque<Level>) {
    while let (Some(ask), Some(bid)) = (asks.front().copied(), bids.front().copied()) {
        if ask.price > bid.price {
            break;
        }
        let drop_ask = if ask.offset == bid.offset {
            debug!(price = %ask.price, offset = ask.offset, "crossed levels share an offset");
            ask.size < bid.size
        } else {
            ask.offset < bid.offset
        };
        if drop_ask {
            debug!(price = %ask.price, offset = ask.offset, "uncrossing: dropped ask");
            asks.pop_front();
        } else {
            debug!(price = %bid.price, offset = bid.offset, "uncrossing: dropped bid");
            bids.pop_front();
        }
    }
}

// 5.2: running totals from the touch outward. a level that would overflow them is dropped.
fn with_depth(levels: VecDeque<Level>) -> Vec<OrderbookLine> {
    let mut depth = Decimal::ZERO;
    let mut depth_cost = Decimal::ZERO;
    let mut lines = Vec::with_capacity(levels.len());
    for level in levels {
        let (Some(next_depth), Some(next_cost)) =
            (depth.checked_add(level.size), depth_cost.checked_add(level.size_cost))
        else {
            debug!(price = %level.price, "dropping level, cumulative depth overflows");
            continue;
        };
        depth = next_depth;
        depth_cost = next_cost;
        lines.push(OrderbookLine {
            price: level.price,
            size: level.size,
            size_cost: level.size_cost,
            offset: level.offset,
            depth,
            depth_cost,
        });
    }
    lines
}

fn midpoint(a: Decimal, b: Decimal) -> Option<Decimal> {
    a.checked_add(b)?.checked_div(dec!(2))
}

pub fn calculate_orderbook(raw: &RawOrderbook) -> Orderbook {
    let mut asks: VecDeque<Level> = parse_side(&raw.asks).into_values().collect();
    let mut bids: VecDeque<Level> = parse_side(&raw.bids).into_values().rev().collect();

    uncross(&mut asks, &mut bids);

    let asks = with_depth(asks);
    let bids = with_depth(bids);

    let (mid_price, spread, spread_percent) = match (asks.first(), bids.first()) {
        (Some(ask), Some(bid)) => {
            // both prices are positive, the difference always fits
            let spread = ask.price - bid.price;
            let mid = midpoint(ask.price, bid.price);
            let spread_percent = mid
                .and_then(|mid| spread.checked_div(mid))
                .and_then(|ratio| ratio.checked_mul(dec!(100)));
            (mid, Some(spread), spread_percent)
        }
        _ => (None, None, None),
    };

    Orderbook {
        asks,
        bids,
        mid_price,
        spread,
        spread_percent,
    }
}

// 5.3: display grouping

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupingMultiplier {
    One,
    Ten,
    Hundred,
    Thousand,
}

impl GroupingMultiplier {
    pub fn value(&self) -> Decimal {
        match self {
            GroupingMultiplier::One => dec!(1),
            GroupingMultiplier::Ten => dec!(10),
            GroupingMultiplier::Hundred => dec!(100),
            GroupingMultiplier::Thousand => dec!(1000),
        }
    }
}

/// Display-ready book: both sides descending by price, plus price-keyed maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedOrderbook {
    pub asks: Vec<OrderbookLine>,
    pub bids: Vec<OrderbookLine>,
    pub asks_map: BTreeMap<String, OrderbookLine>,
    pub bids_map: BTreeMap<String, OrderbookLine>,
    pub mid_price: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub spread_percent: Option<Decimal>,
}

// asks round up, bids down, so the two sides never share a bucket
fn group(lines: &[OrderbookLine], tick: Decimal, rounding: Rounding) -> BTreeMap<Decimal, OrderbookLine> {
    let mut grouped: BTreeMap<Decimal, OrderbookLine> = BTreeMap::new();
    for line in lines {
        let price = round_to_factor(line.price, tick, rounding);
        grouped
            .entry(price)
            .and_modify(|bucket| {
                bucket.size += line.size;
                bucket.size_cost += line.size_cost;
                bucket.depth = line.depth;
                bucket.depth_cost = line.depth_cost;
            })
            .or_insert_with(|| OrderbookLine {
                price,
                ..line.clone()
            });
    }
    grouped
}

fn round_mid_price(
    lowest_ask: Option<Decimal>,
    highest_bid: Option<Decimal>,
    tick: Decimal,
    params: &OrderbookParams,
) -> Option<Decimal> {
    let raw_mid = midpoint(lowest_ask?, highest_bid?)?;
    let rounded = round_to_factor(raw_mid, tick, Rounding::HalfUp);
    if Some(rounded) == lowest_ask || Some(rounded) == highest_bid {
        let fine_tick = tick.checked_div(params.mid_fallback_divisor)?;
        Some(round_to_factor(raw_mid, fine_tick, Rounding::HalfUp))
    } else {
        Some(rounded)
    }
}

pub fn format_orderbook(
    book: &Orderbook,
    multiplier: GroupingMultiplier,
    tick_size: Decimal,
    params: &OrderbookParams,
) -> FormattedOrderbook {
    if multiplier == GroupingMultiplier::One {
        let dp = if tick_size > Decimal::ZERO {
            decimal_places(tick_size)
        } else {
            SMALL_USD_DECIMALS
        };
        let key = |line: &OrderbookLine| format!("{:.*}", dp as usize, line.price);
        return FormattedOrderbook {
            asks: book.asks.iter().rev().cloned().collect(),
            bids: book.bids.clone(),
            asks_map: book.asks.iter().map(|l| (key(l), l.clone())).collect(),
            bids_map: book.bids.iter().map(|l| (key(l), l.clone())).collect(),
            mid_price: book.mid_price,
            spread: book.spread,
            spread_percent: book.spread_percent,
        };
    }

    // a tick too large to scale groups nothing
    let tick = tick_size.checked_mul(multiplier.value()).unwrap_or(Decimal::ZERO);
    let grouped_asks = group(&book.asks, tick, Rounding::Up);
    let grouped_bids = group(&book.bids, tick, Rounding::Down);

    let lowest_ask = grouped_asks.keys().next().copied();
    let highest_bid = grouped_bids.keys().next_back().copied();

    FormattedOrderbook {
        asks: grouped_asks.values().rev().cloned().collect(),
        bids: grouped_bids.values().rev().cloned().collect(),
        asks_map: grouped_asks
            .iter()
            .map(|(p, l)| (p.normalize().to_string(), l.clone()))
            .collect(),
        bids_map: grouped_bids
            .iter()
            .map(|(p, l)| (p.normalize().to_string(), l.clone()))
            .collect(),
        mid_price: round_mid_price(lowest_ask, highest_bid, tick, params),
        spread: book.spread,
        spread_percent: book.spread_percent,
    }
}
