//! Vault calculators.
//!
//! A vault is a set of per-market subaccounts plus idle USDC. The summary
//! works off the vault-wide PnL history; each position row reuses the
//! parent-subaccount calculator on a one-child wallet.

use crate::aggregate::calculate_parent_subaccount_summary;
use crate::config::DeriveConfig;
use crate::raw::{opt_decimal, MarketsData, RawChildSubaccount, RawParentSubaccount, RawVaultHistoricalPnl, RawVaultPnlEntry, RawVaultPosition};
use crate::types::{MarketId, Side, SubaccountNumber, Timestamp, MILLIS_PER_DAY};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

pub const UNALLOCATED_USDC_MARKET: &str = "UNALLOCATEDUSDC-USD";
const THIRTY_DAYS_MS: i64 = 30 * MILLIS_PER_DAY;
const YEAR_MS: i64 = 365 * MILLIS_PER_DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultHistoryEntry {
    pub date: Timestamp,
    pub equity: Decimal,
    pub total_pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultDetails {
    pub total_value: Decimal,
    /// Annualized from the observed window, as a fraction. `None` when the history overflows it.
    pub thirty_day_return_percent: Option<Decimal>,
    /// Newest first.
    pub history: Vec<VaultHistoryEntry>,
}

// newest first. entries without a readable timestamp are skipped.
fn sorted_history<'a>(entries: impl Iterator<Item = &'a RawVaultPnlEntry>) -> Vec<VaultHistoryEntry> {
    let mut history: Vec<VaultHistoryEntry> = entries
        .filter_map(|entry| {
            let Some(date) = Timestamp::parse_iso(&entry.created_at) else {
                warn!(created_at = %entry.created_at, "vault pnl entry with unreadable timestamp dropped");
                return None;
            };
            Some(VaultHistoryEntry {
                date,
                equity: entry.equity.to_decimal_or_zero(),
                total_pnl: entry.total_pnl.to_decimal_or_zero(),
            })
        })
        .collect();
    history.sort_by(|a, b| b.date.cmp(&a.date));
    history
}

// first entry at least 30 days older than the newest, else the oldest
fn thirty_days_ago(history: &[VaultHistoryEntry]) -> Option<&VaultHistoryEntry> {
    let latest = history.first()?;
    let cutoff = latest.date.as_millis() - THIRTY_DAYS_MS;
    history
        .iter()
        .find(|e| e.date.as_millis() <= cutoff)
        .or_else(|| history.last())
}

pub fn calculate_vault_summary(historicals: &[Vec<RawVaultPnlEntry>], data_cutoff: Timestamp) -> Option<VaultDetails> {
    let history: Vec<VaultHistoryEntry> = sorted_history(historicals.iter().flatten())
        .into_iter()
        .filter(|e| e.date >= data_cutoff)
        .collect();

    let latest = *history.first()?;
    let then = *thirty_days_ago(&history)?;

    let window_ms = latest.date.as_millis() - then.date.as_millis();
    let period_return = if latest.equity.is_zero() {
        Some(Decimal::ZERO)
    } else {
        latest
            .total_pnl
            .checked_sub(then.total_pnl)
            .and_then(|difference| difference.checked_div(latest.equity))
    };
    let annualized = if window_ms > 0 {
        period_return
            .and_then(|r| r.checked_mul(Decimal::from(YEAR_MS)))
            .and_then(|r| r.checked_div(Decimal::from(window_ms)))
    } else {
        period_return.map(|_| Decimal::ZERO)
    };

    Some(VaultDetails {
        total_value: latest.equity,
        thirty_day_return_percent: annualized,
        history,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThirtyDayPnl {
    pub percent: Option<Decimal>,
    pub absolute: Option<Decimal>,
    /// One point per day, oldest first, each the day's latest total pnl.
    pub sparkline_points: Vec<Decimal>,
}

pub fn calculate_thirty_day_pnl(history: Option<&RawVaultHistoricalPnl>) -> Option<ThirtyDayPnl> {
    let sorted = sorted_history(history?.historical_pnl.iter());
    let latest = sorted.first()?;
    let then = thirty_days_ago(&sorted)?;

    let absolute = latest.total_pnl.checked_sub(then.total_pnl);
    let percent = if then.equity.is_zero() {
        absolute.map(|_| Decimal::ZERO)
    } else {
        absolute.and_then(|a| a.checked_div(then.equity))
    };

    let cutoff = latest.date.as_millis() - THIRTY_DAYS_MS;
    let mut by_day: BTreeMap<i64, Decimal> = BTreeMap::new();
    for entry in sorted.iter().filter(|e| e.date.as_millis() >= cutoff) {
        // sorted newest first, so the first seen per day wins
        by_day.entry(entry.date.day_index()).or_insert(entry.total_pnl);
    }

    Some(ThirtyDayPnl {
        percent,
        absolute,
        sparkline_points: by_day.into_values().collect(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentPosition {
    pub asset: Option<Decimal>,
    pub usdc: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultPosition {
    pub market_id: MarketId,
    pub margin_usdc: Option<Decimal>,
    pub equity_usdc: Option<Decimal>,
    /// Negative for shorts.
    pub current_leverage_multiple: Option<Decimal>,
    pub current_position: CurrentPosition,
    pub thirty_day_pnl: Option<ThirtyDayPnl>,
}

fn calculate_vault_position(
    position: &RawVaultPosition,
    history: Option<&RawVaultHistoricalPnl>,
    markets: &MarketsData,
    config: &DeriveConfig,
) -> VaultPosition {
    let mut child = RawChildSubaccount::empty("", SubaccountNumber(0));
    if let Some(asset) = &position.asset_position {
        child.asset_positions.insert(asset.symbol.clone(), asset.clone());
    }
    if let Some(perp) = &position.perpetual_position {
        child.open_perpetual_positions.insert(perp.market.clone(), perp.clone());
    }
    let wallet = RawParentSubaccount {
        address: String::new(),
        parent_subaccount: SubaccountNumber(0),
        child_subaccounts: [(SubaccountNumber(0), child)].into_iter().collect(),
    };
    let market_only: MarketsData = markets
        .get(&position.ticker)
        .map(|m| (position.ticker.clone(), m.clone()))
        .into_iter()
        .collect();
    let summary = calculate_parent_subaccount_summary(&wallet, &market_only, config).ok();

    let oracle = markets
        .get(&position.ticker)
        .and_then(|m| opt_decimal(&m.oracle_price))
        .unwrap_or(Decimal::ZERO);
    let perp = position.perpetual_position.as_ref();
    let size = perp.and_then(|p| p.size.to_decimal());

    let current_leverage_multiple = match (&position.asset_position, perp) {
        (Some(_), Some(perp)) => {
            let leverage = summary.as_ref().and_then(|s| s.leverage).unwrap_or(Decimal::ZERO);
            Some(match perp.side {
                Side::Short => -leverage,
                Side::Long => leverage,
            })
        }
        _ => None,
    };

    VaultPosition {
        market_id: position.ticker.clone(),
        margin_usdc: position
            .asset_position
            .as_ref()
            .and(summary.as_ref())
            .map(|s| s.equity.value()),
        equity_usdc: None,
        current_leverage_multiple,
        current_position: CurrentPosition {
            asset: size,
            usdc: size.and_then(|s| s.checked_mul(oracle)).map(|usdc| usdc.abs()),
        },
        thirty_day_pnl: calculate_thirty_day_pnl(history),
    }
}

fn unallocated_usdc_row(positions: &[VaultPosition], vault_tvl: Decimal) -> VaultPosition {
    let usdc_total = positions
        .iter()
        .filter_map(|p| p.margin_usdc)
        .try_fold(Decimal::ZERO, |total, margin| total.checked_add(margin))
        .and_then(|allocated| vault_tvl.checked_sub(allocated));
    if usdc_total.is_none() {
        warn!(%vault_tvl, "allocated vault margin overflows, idle usdc unknown");
    }
    VaultPosition {
        market_id: MarketId::from(UNALLOCATED_USDC_MARKET),
        margin_usdc: usdc_total,
        equity_usdc: usdc_total,
        current_leverage_multiple: Some(Decimal::ONE),
        current_position: CurrentPosition {
            asset: usdc_total,
            usdc: usdc_total,
        },
        thirty_day_pnl: Some(ThirtyDayPnl {
            percent: Some(Decimal::ZERO),
            absolute: Some(Decimal::ZERO),
            sparkline_points: Vec::new(),
        }),
    }
}

/// One row per vault market, plus idle USDC when the vault's TVL is known.
pub fn calculate_vault_positions(
    positions: &[RawVaultPosition],
    histories: &[RawVaultHistoricalPnl],
    markets: &MarketsData,
    vault_tvl: Option<Decimal>,
    config: &DeriveConfig,
) -> Vec<VaultPosition> {
    let histories_by_ticker: BTreeMap<&MarketId, &RawVaultHistoricalPnl> =
        histories.iter().map(|h| (&h.ticker, h)).collect();

    let mut rows: Vec<VaultPosition> = positions
        .iter()
        .map(|p| calculate_vault_position(p, histories_by_ticker.get(&p.ticker).copied(), markets, config))
        .collect();

    if let Some(tvl) = vault_tvl {
        let usdc_row = unallocated_usdc_row(&rows, tvl);
        rows.push(usdc_row);
    }
    rows
}
