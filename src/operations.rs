// 9.0: optimistic operations. applied to a raw parent subaccount before the feeds confirm them.
// always returns a new wallet; a refused operation returns the input unchanged.
// 9.1 has the trade path: open, increase, reduce to close, flip with the remainder.

use crate::raw::{PositionStatus, RawAssetPosition, RawChildSubaccount, RawDecimal, RawParentSubaccount, RawPerpetualPosition, USDC_SYMBOL};
use crate::subaccount::quote_balance;
use crate::types::{MarketId, OrderSide, Side, SignedSize, SubaccountNumber, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOperation {
    pub subaccount_number: SubaccountNumber,
    pub market_id: MarketId,
    pub side: OrderSide,
    /// Unsigned base amount.
    pub size: Decimal,
    pub average_price: Decimal,
    pub fee: Decimal,
    pub reduce_only: bool,
    pub market_oracle_price: Decimal,
    pub executed_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SubaccountOperation {
    DepositUsdc {
        subaccount_number: SubaccountNumber,
        amount: Decimal,
    },
    WithdrawUsdc {
        subaccount_number: SubaccountNumber,
        amount: Decimal,
    },
    SubaccountTransfer {
        sender_subaccount_number: SubaccountNumber,
        recipient_subaccount_number: SubaccountNumber,
        amount: Decimal,
    },
    /// Moves the sender's whole USDC balance.
    SubaccountTransferFull {
        sender_subaccount_number: SubaccountNumber,
        recipient_subaccount_number: SubaccountNumber,
    },
    ApplyTrade(TradeOperation),
}

fn raw(value: Decimal) -> RawDecimal {
    RawDecimal::from(value.normalize())
}

fn child_mut(parent: &mut RawParentSubaccount, number: SubaccountNumber) -> &mut RawChildSubaccount {
    let address = parent.address.clone();
    parent
        .child_subaccounts
        .entry(number)
        .or_insert_with(|| RawChildSubaccount::empty(address, number))
}

// 9.0: signed move on the USDC asset position. side flips when the balance crosses zero.
fn adjust_usdc(parent: &mut RawParentSubaccount, number: SubaccountNumber, delta: Decimal) -> Option<()> {
    let child = child_mut(parent, number);
    let balance = quote_balance(child).value().checked_add(delta)?;
    let side = if balance < Decimal::ZERO { Side::Short } else { Side::Long };
    child.asset_positions.insert(
        USDC_SYMBOL.to_string(),
        RawAssetPosition {
            symbol: USDC_SYMBOL.to_string(),
            side,
            size: raw(balance.abs()),
            subaccount_number: number,
        },
    );
    Some(())
}

fn open_position(trade: &TradeOperation, size: Decimal) -> RawPerpetualPosition {
    let signed = SignedSize::from_side(trade.side.position_side(), size);
    RawPerpetualPosition {
        market: trade.market_id.clone(),
        status: PositionStatus::Open,
        side: trade.side.position_side(),
        size: raw(signed.value()),
        max_size: raw(signed.value()),
        entry_price: raw(trade.average_price),
        exit_price: None,
        realized_pnl: raw(Decimal::ZERO),
        unrealized_pnl: raw(Decimal::ZERO),
        net_funding: raw(Decimal::ZERO),
        created_at: trade.executed_at.to_iso().unwrap_or_default(),
        // not known until the chain confirms
        created_at_height: raw(Decimal::ZERO),
        closed_at: None,
        sum_open: raw(size),
        sum_close: raw(Decimal::ZERO),
        subaccount_number: trade.subaccount_number,
    }
}

fn signed_size(position: &RawPerpetualPosition) -> SignedSize {
    SignedSize::from_side(position.side, position.size.to_decimal_or_zero())
}

// 9.1: same direction. entry averages, slippage against the oracle lands in unrealized pnl.
fn increase_position(position: &RawPerpetualPosition, trade: &TradeOperation) -> Option<RawPerpetualPosition> {
    let old = signed_size(position);
    let new_size = old.value().checked_add(trade.size * trade.side.sign())?;
    let old_max = SignedSize::from_side(position.side, position.max_size.to_decimal_or_zero()).value();
    let max_size = match position.side {
        Side::Long => old_max.max(new_size),
        Side::Short => old_max.min(new_size),
    };

    let total = old.abs().checked_add(trade.size)?;
    let entry = position.entry_price.to_decimal_or_zero();
    let entry_price = if total.is_zero() {
        entry
    } else {
        let old_cost = old.abs().checked_mul(entry)?;
        let fill_cost = trade.size.checked_mul(trade.average_price)?;
        old_cost.checked_add(fill_cost)?.checked_div(total)?
    };

    // a buy above the oracle is an immediate paper loss, a sell above it a gain
    let slippage = trade
        .size
        .checked_mul(trade.average_price.checked_sub(trade.market_oracle_price)?)?
        * -trade.side.sign();

    Some(RawPerpetualPosition {
        size: raw(new_size),
        max_size: raw(max_size),
        entry_price: raw(entry_price),
        sum_open: raw(position.sum_open.to_decimal_or_zero().checked_add(trade.size)?),
        unrealized_pnl: raw(position.unrealized_pnl.to_decimal_or_zero().checked_add(slippage)?),
        ..position.clone()
    })
}

struct Reduction {
    position: Option<RawPerpetualPosition>,
    remaining: Decimal,
    // close proceeds before fees
    quote_adjustment: Decimal,
}

// 9.1: opposite direction, capped at closing the position. entry price is unchanged.
fn reduce_position(position: &RawPerpetualPosition, trade: &TradeOperation) -> Option<Reduction> {
    let old = signed_size(position);
    let applied = trade.size.min(old.abs());
    let new_size = old.value().checked_add(applied * trade.side.sign())?;
    let entry = position.entry_price.to_decimal_or_zero();

    // closing a long is a sell, so pnl = applied * (price - entry) * side of the position
    let realized = applied.checked_mul(trade.average_price.checked_sub(entry)?)? * position.side.sign();
    let quote_adjustment = applied.checked_mul(trade.average_price)? * -trade.side.sign();

    let remaining_position = if new_size.is_zero() {
        None
    } else {
        Some(RawPerpetualPosition {
            size: raw(new_size),
            realized_pnl: raw(position.realized_pnl.to_decimal_or_zero().checked_add(realized)?),
            sum_close: raw(position.sum_close.to_decimal_or_zero().checked_add(applied)?),
            unrealized_pnl: raw(new_size.checked_mul(trade.market_oracle_price.checked_sub(entry)?)?),
            ..position.clone()
        })
    };

    Some(Reduction {
        position: remaining_position,
        remaining: trade.size - applied,
        quote_adjustment,
    })
}

fn open_quote_adjustment(trade: &TradeOperation) -> Option<Decimal> {
    (trade.size.checked_mul(trade.average_price)? * -trade.side.sign()).checked_sub(trade.fee)
}

fn apply_trade(parent: &RawParentSubaccount, trade: &TradeOperation) -> Option<RawParentSubaccount> {
    let mut parent = parent.clone();
    let child = child_mut(&mut parent, trade.subaccount_number);
    let existing = child
        .open_perpetual_positions
        .get(&trade.market_id)
        .filter(|p| p.status == PositionStatus::Open)
        .cloned();

    let quote_delta = match existing {
        None if trade.reduce_only => {
            debug!(market = %trade.market_id, "reduce-only trade with no position, skipped");
            Decimal::ZERO
        }
        None => {
            let delta = open_quote_adjustment(trade)?;
            child
                .open_perpetual_positions
                .insert(trade.market_id.clone(), open_position(trade, trade.size));
            delta
        }
        Some(position) if position.side == trade.side.position_side() => {
            if trade.reduce_only {
                debug!(market = %trade.market_id, "reduce-only trade would increase position, skipped");
                Decimal::ZERO
            } else {
                let increased = increase_position(&position, trade)?;
                let delta = open_quote_adjustment(trade)?;
                child.open_perpetual_positions.insert(trade.market_id.clone(), increased);
                delta
            }
        }
        Some(position) => {
            let reduction = reduce_position(&position, trade)?;
            match reduction.position {
                Some(reduced) => {
                    child.open_perpetual_positions.insert(trade.market_id.clone(), reduced);
                }
                None => {
                    child.open_perpetual_positions.remove(&trade.market_id);
                }
            }

            if reduction.remaining > Decimal::ZERO && !trade.reduce_only {
                child
                    .open_perpetual_positions
                    .insert(trade.market_id.clone(), open_position(trade, reduction.remaining));
                // the whole fill crosses the book at one price, close and reopen alike
                open_quote_adjustment(trade)?
            } else {
                reduction.quote_adjustment.checked_sub(trade.fee)?
            }
        }
    };

    adjust_usdc(&mut parent, trade.subaccount_number, quote_delta)?;
    Some(parent)
}

fn transfer_full(
    parent: &RawParentSubaccount,
    sender: SubaccountNumber,
    recipient: SubaccountNumber,
) -> Option<RawParentSubaccount> {
    let Some(source) = parent.child_subaccounts.get(&sender) else {
        warn!(%sender, "cannot empty subaccount: it does not exist");
        return Some(parent.clone());
    };
    if source
        .open_perpetual_positions
        .values()
        .any(|p| !p.size.to_decimal_or_zero().is_zero())
    {
        warn!(%sender, "cannot empty subaccount: it has open perpetual positions");
        return Some(parent.clone());
    }
    let amount = match source.usdc() {
        Some(usdc) if usdc.side == Side::Long => usdc.size.to_decimal(),
        _ => None,
    };
    let Some(amount) = amount.filter(|a| *a >= Decimal::ZERO) else {
        warn!(%sender, "cannot empty subaccount: quote balance is negative or missing");
        return Some(parent.clone());
    };

    transfer(parent, sender, recipient, amount)
}

fn transfer(
    parent: &RawParentSubaccount,
    sender: SubaccountNumber,
    recipient: SubaccountNumber,
    amount: Decimal,
) -> Option<RawParentSubaccount> {
    let mut parent = parent.clone();
    adjust_usdc(&mut parent, sender, -amount)?;
    adjust_usdc(&mut parent, recipient, amount)?;
    Some(parent)
}

fn try_apply(parent: &RawParentSubaccount, operation: &SubaccountOperation) -> Option<RawParentSubaccount> {
    match operation {
        SubaccountOperation::DepositUsdc { subaccount_number, amount } => {
            let mut parent = parent.clone();
            adjust_usdc(&mut parent, *subaccount_number, *amount)?;
            Some(parent)
        }
        SubaccountOperation::WithdrawUsdc { subaccount_number, amount } => {
            let mut parent = parent.clone();
            adjust_usdc(&mut parent, *subaccount_number, -*amount)?;
            Some(parent)
        }
        SubaccountOperation::SubaccountTransfer {
            sender_subaccount_number,
            recipient_subaccount_number,
            amount,
        } => transfer(parent, *sender_subaccount_number, *recipient_subaccount_number, *amount),
        SubaccountOperation::SubaccountTransferFull {
            sender_subaccount_number,
            recipient_subaccount_number,
        } => transfer_full(parent, *sender_subaccount_number, *recipient_subaccount_number),
        SubaccountOperation::ApplyTrade(trade) => apply_trade(parent, trade),
    }
}

/// Applies one operation. An operation whose amounts overflow is refused and the wallet comes back unchanged.
pub fn apply_operation(parent: RawParentSubaccount, operation: &SubaccountOperation) -> RawParentSubaccount {
    match try_apply(&parent, operation) {
        Some(next) => next,
        None => {
            warn!(address = %parent.address, "operation overflows the wallet's balances, refused");
            parent
        }
    }
}

/// Applies operations in order, each against the result of the previous one.
pub fn apply_operations(parent: &RawParentSubaccount, operations: &[SubaccountOperation]) -> RawParentSubaccount {
    operations.iter().fold(parent.clone(), apply_operation)
}
