//! Raw collaborator data shapes.
//!
//! These mirror the indexer's camelCase JSON: snapshot (REST) and delta
//! (websocket) feeds deliver the same records, keyed by a stable id. Numeric
//! fields stay as strings until a calculator parses them, so a malformed
//! number degrades to "unavailable" instead of failing the whole payload.
//!
//! Enum fields are the one strict spot. A status or type outside the known
//! taxonomy fails deserialization rather than reaching a calculator.

use crate::numbers::maybe_decimal;
use crate::types::{MarketId, OrderSide, Side, SubaccountNumber, Timestamp};
use rust_decimal::Decimal;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A number exactly as the feed sent it. Accepts JSON strings and numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawDecimal(pub String);

impl RawDecimal {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn to_decimal(&self) -> Option<Decimal> {
        maybe_decimal(&self.0)
    }

    pub fn to_decimal_or_zero(&self) -> Decimal {
        self.to_decimal().unwrap_or(Decimal::ZERO)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Decimal> for RawDecimal {
    fn from(value: Decimal) -> Self {
        Self(value.normalize().to_string())
    }
}

impl From<&str> for RawDecimal {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RawDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for RawDecimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

struct RawDecimalVisitor;

impl<'de> Visitor<'de> for RawDecimalVisitor {
    type Value = RawDecimal;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number or a numeric string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<RawDecimal, E> {
        Ok(RawDecimal(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<RawDecimal, E> {
        Ok(RawDecimal(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<RawDecimal, E> {
        Ok(RawDecimal(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<RawDecimal, E> {
        Ok(RawDecimal(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<RawDecimal, E> {
        Ok(RawDecimal(v.to_string()))
    }
}

impl<'de> Deserialize<'de> for RawDecimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RawDecimalVisitor)
    }
}

/// Parses an optional raw number. Absent and malformed both map to `None`.
pub fn opt_decimal(raw: &Option<RawDecimal>) -> Option<Decimal> {
    raw.as_ref().and_then(RawDecimal::to_decimal)
}

/// Parses an optional ISO timestamp.
pub fn opt_timestamp(raw: &Option<String>) -> Option<Timestamp> {
    raw.as_deref().and_then(Timestamp::parse_iso)
}

// markets

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMarket {
    pub ticker: MarketId,
    pub clob_pair_id: Option<RawDecimal>,
    pub oracle_price: Option<RawDecimal>,
    #[serde(rename = "priceChange24H")]
    pub price_change_24h: Option<RawDecimal>,
    #[serde(rename = "volume24H")]
    pub volume_24h: Option<RawDecimal>,
    pub next_funding_rate: Option<RawDecimal>,
    pub initial_margin_fraction: Option<RawDecimal>,
    pub maintenance_margin_fraction: Option<RawDecimal>,
    pub open_interest: Option<RawDecimal>,
    pub open_interest_lower_cap: Option<RawDecimal>,
    pub open_interest_upper_cap: Option<RawDecimal>,
    pub tick_size: Option<RawDecimal>,
    pub step_size: Option<RawDecimal>,
}

pub type MarketsData = BTreeMap<MarketId, RawMarket>;

// positions and subaccounts

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
    Liquidated,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPerpetualPosition {
    pub market: MarketId,
    pub status: PositionStatus,
    pub side: Side,
    pub size: RawDecimal,
    #[serde(default)]
    pub max_size: RawDecimal,
    pub entry_price: RawDecimal,
    #[serde(default)]
    pub exit_price: Option<RawDecimal>,
    #[serde(default)]
    pub realized_pnl: RawDecimal,
    #[serde(default)]
    pub unrealized_pnl: RawDecimal,
    #[serde(default)]
    pub net_funding: RawDecimal,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub created_at_height: RawDecimal,
    #[serde(default)]
    pub closed_at: Option<String>,
    #[serde(default)]
    pub sum_open: RawDecimal,
    #[serde(default)]
    pub sum_close: RawDecimal,
    pub subaccount_number: SubaccountNumber,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAssetPosition {
    pub symbol: String,
    pub side: Side,
    pub size: RawDecimal,
    pub subaccount_number: SubaccountNumber,
}

pub const USDC_SYMBOL: &str = "USDC";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChildSubaccount {
    #[serde(default)]
    pub address: String,
    pub subaccount_number: SubaccountNumber,
    #[serde(default)]
    pub asset_positions: BTreeMap<String, RawAssetPosition>,
    #[serde(default)]
    pub open_perpetual_positions: BTreeMap<MarketId, RawPerpetualPosition>,
}

impl RawChildSubaccount {
    pub fn empty(address: impl Into<String>, subaccount_number: SubaccountNumber) -> Self {
        Self {
            address: address.into(),
            subaccount_number,
            asset_positions: BTreeMap::new(),
            open_perpetual_positions: BTreeMap::new(),
        }
    }

    pub fn usdc(&self) -> Option<&RawAssetPosition> {
        self.asset_positions.get(USDC_SYMBOL)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawParentSubaccount {
    #[serde(default)]
    pub address: String,
    pub parent_subaccount: SubaccountNumber,
    #[serde(default)]
    pub child_subaccounts: BTreeMap<SubaccountNumber, RawChildSubaccount>,
}

// orders. status and type are closed sets.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RawOrderStatus {
    Open,
    Filled,
    Canceled,
    BestEffortCanceled,
    Untriggered,
    BestEffortOpened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    StopLimit,
    StopMarket,
    TrailingStop,
    TakeProfit,
    TakeProfitMarket,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrder {
    pub id: String,
    #[serde(default)]
    pub client_id: String,
    pub ticker: MarketId,
    pub subaccount_number: SubaccountNumber,
    #[serde(default)]
    pub clob_pair_id: Option<RawDecimal>,
    pub side: OrderSide,
    pub size: RawDecimal,
    #[serde(default)]
    pub total_filled: RawDecimal,
    #[serde(default)]
    pub price: RawDecimal,
    #[serde(default)]
    pub trigger_price: Option<RawDecimal>,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(default)]
    pub status: Option<RawOrderStatus>,
    #[serde(default)]
    pub time_in_force: Option<String>,
    #[serde(default)]
    pub post_only: Option<bool>,
    #[serde(default)]
    pub reduce_only: Option<bool>,
    #[serde(default)]
    pub order_flags: String,
    #[serde(default)]
    pub good_til_block: Option<RawDecimal>,
    #[serde(default)]
    pub good_til_block_time: Option<String>,
    #[serde(default)]
    pub created_at_height: Option<RawDecimal>,
    #[serde(default)]
    pub client_metadata: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub updated_at_height: Option<RawDecimal>,
    #[serde(default)]
    pub removal_reason: Option<String>,
}

// history entities. each carries a creation height and an ISO timestamp.

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFill {
    pub id: String,
    pub side: OrderSide,
    #[serde(default)]
    pub liquidity: String,
    #[serde(rename = "type", default)]
    pub fill_type: String,
    pub market: MarketId,
    pub price: RawDecimal,
    pub size: RawDecimal,
    #[serde(default)]
    pub fee: RawDecimal,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub created_at_height: RawDecimal,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub client_metadata: Option<String>,
    #[serde(default)]
    pub subaccount_number: Option<SubaccountNumber>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrade {
    pub id: String,
    pub side: OrderSide,
    pub size: RawDecimal,
    pub price: RawDecimal,
    #[serde(rename = "type", default)]
    pub trade_type: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub created_at_height: RawDecimal,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransferParty {
    pub address: String,
    #[serde(default)]
    pub subaccount_number: Option<SubaccountNumber>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransfer {
    pub id: String,
    pub sender: RawTransferParty,
    pub recipient: RawTransferParty,
    pub size: RawDecimal,
    #[serde(default)]
    pub symbol: String,
    #[serde(rename = "type", default)]
    pub transfer_type: String,
    #[serde(default)]
    pub transaction_hash: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub created_at_height: RawDecimal,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawReward {
    pub trading_reward: RawDecimal,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub created_at_height: RawDecimal,
}

pub type OrdersData = BTreeMap<String, RawOrder>;
pub type FillsData = BTreeMap<String, RawFill>;
pub type TradesData = BTreeMap<String, RawTrade>;
pub type TransfersData = BTreeMap<String, RawTransfer>;
pub type RewardsData = BTreeMap<String, RawReward>;

// orderbook. keyed by price string.

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawOrderbookLevel {
    pub size: RawDecimal,
    #[serde(default)]
    pub offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawOrderbook {
    #[serde(default)]
    pub asks: BTreeMap<String, RawOrderbookLevel>,
    #[serde(default)]
    pub bids: BTreeMap<String, RawOrderbookLevel>,
}

// chain height

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolHeight {
    pub height: u64,
    pub time: String,
}

impl ProtocolHeight {
    pub fn new(height: u64, time: impl Into<String>) -> Self {
        Self {
            height,
            time: time.into(),
        }
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        Timestamp::parse_iso(&self.time)
    }
}

// vaults

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVaultPnlEntry {
    #[serde(default)]
    pub equity: RawDecimal,
    #[serde(default)]
    pub total_pnl: RawDecimal,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVaultHistoricalPnl {
    pub ticker: MarketId,
    #[serde(default)]
    pub historical_pnl: Vec<RawVaultPnlEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVaultPosition {
    pub ticker: MarketId,
    #[serde(default)]
    pub asset_position: Option<RawAssetPosition>,
    #[serde(default)]
    pub perpetual_position: Option<RawPerpetualPosition>,
    #[serde(default)]
    pub equity: RawDecimal,
}
