//! Derived account state demo.
//!
//! Walks a wallet through deposits, trades and a price move, printing the
//! numbers a trading UI would render at each step.

use perps_state::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,perps_state=debug"));

    let is_production = std::env::var("RUST_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    if is_production {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(true))
            .init();
    }
}

fn main() {
    init_logging();

    println!("Derived Perpetuals Account State");
    println!("One wallet, cross and isolated subaccounts\n");

    let config = DeriveConfig::default();
    if let Err(err) = config.validate() {
        eprintln!("invalid config: {err}");
        return;
    }

    scenario_1_cross_account(&config);
    scenario_2_isolated_child(&config);
    scenario_3_orderbook(&config);
    scenario_4_api_status(&config);

    println!("\nAll scenarios completed.");
}

fn btc_market(oracle: &str) -> RawMarket {
    RawMarket {
        ticker: MarketId::from("BTC-USD"),
        oracle_price: Some(RawDecimal::from(oracle)),
        tick_size: Some(RawDecimal::from("1")),
        step_size: Some(RawDecimal::from("0.0001")),
        initial_margin_fraction: Some(RawDecimal::from("0.05")),
        maintenance_margin_fraction: Some(RawDecimal::from("0.03")),
        next_funding_rate: Some(RawDecimal::from("0.0001")),
        open_interest: Some(RawDecimal::from("100")),
        open_interest_lower_cap: Some(RawDecimal::from("500000")),
        open_interest_upper_cap: Some(RawDecimal::from("1000000")),
        ..RawMarket::default()
    }
}

fn markets_at(oracle: &str) -> MarketsData {
    let btc = btc_market(oracle);
    [(btc.ticker.clone(), btc)].into_iter().collect()
}

fn empty_wallet() -> RawParentSubaccount {
    RawParentSubaccount {
        address: "dydx1demo".to_string(),
        parent_subaccount: SubaccountNumber(0),
        child_subaccounts: BTreeMap::new(),
    }
}

fn buy_btc(subaccount: u32, size: Decimal, price: Decimal) -> SubaccountOperation {
    SubaccountOperation::ApplyTrade(TradeOperation {
        subaccount_number: SubaccountNumber(subaccount),
        market_id: MarketId::from("BTC-USD"),
        side: OrderSide::Buy,
        size,
        average_price: price,
        fee: dec!(2.5),
        reduce_only: false,
        market_oracle_price: price,
        executed_at: Timestamp::now(),
    })
}

fn print_positions(positions: &[SubaccountPosition]) {
    for p in positions {
        let liq = p
            .liquidation_price
            .map(|l| l.round_dp(2).to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {} #{} {:?} {} @ {} | pnl {} | liq {}",
            p.core.market,
            p.core.subaccount_number,
            p.core.side,
            p.core.unsigned_size,
            p.core.entry_price,
            p.updated_unrealized_pnl.value().round_dp(2),
            liq
        );
    }
}

/// Deposit, open a cross long, then watch the oracle move.
fn scenario_1_cross_account(config: &DeriveConfig) {
    println!("Scenario 1: Cross Margin Account\n");

    let wallet = apply_operations(
        &empty_wallet(),
        &[
            SubaccountOperation::DepositUsdc {
                subaccount_number: SubaccountNumber(0),
                amount: dec!(10000),
            },
            buy_btc(0, dec!(1), dec!(50000)),
        ],
    );

    let mut cache = DeriveCache::default();
    for oracle in ["50000", "48000", "45000"] {
        let markets = markets_at(oracle);
        match cache.parent_summary(&wallet, &markets, config) {
            Ok(summary) => println!(
                "  oracle {oracle}: equity {} free collateral {} leverage {}",
                summary.equity.value().round_dp(2),
                summary.free_collateral.value().round_dp(2),
                summary.leverage.map(|l| l.round_dp(2).to_string()).unwrap_or_default()
            ),
            Err(err) => println!("  oracle {oracle}: {err}"),
        }
        print_positions(&calculate_parent_subaccount_positions(&wallet, &markets, config));
        cache.advance_generation();
    }

    let markets = markets_at("50000");
    let infos = cache.markets(&markets).clone();
    if let Some(position) = calculate_parent_subaccount_positions(&wallet, &markets, config).first() {
        let analysis = calculate_complete_funding_analysis(position, infos.get(&position.core.market), &config.funding);
        let shown = |v: Option<Decimal>| v.map(|v| v.round_dp(2).to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "\n  funding: {:?} {} per day, break-even after 1d {}",
            analysis.costs.direction,
            shown(analysis.costs.daily_cost),
            shown(analysis.break_even.break_even_1d)
        );
        for warning in &analysis.warnings {
            println!("  warning: {warning}");
        }
    }
    println!();
}

/// Move collateral into an isolated child and open there.
fn scenario_2_isolated_child(config: &DeriveConfig) {
    println!("Scenario 2: Isolated Child Subaccount\n");

    let wallet = apply_operations(
        &empty_wallet(),
        &[
            SubaccountOperation::DepositUsdc {
                subaccount_number: SubaccountNumber(0),
                amount: dec!(5000),
            },
            SubaccountOperation::SubaccountTransfer {
                sender_subaccount_number: SubaccountNumber(0),
                recipient_subaccount_number: SubaccountNumber(128),
                amount: dec!(1000),
            },
            buy_btc(128, dec!(0.1), dec!(50000)),
            // refused: child 128 still holds a position
            SubaccountOperation::SubaccountTransferFull {
                sender_subaccount_number: SubaccountNumber(128),
                recipient_subaccount_number: SubaccountNumber(0),
            },
        ],
    );

    let markets = markets_at("50000");
    for (number, summary) in calculate_child_subaccount_summaries(&wallet, &markets, config) {
        println!(
            "  child {number}: equity {} margin usage {}",
            summary.equity.value().round_dp(2),
            summary.margin_usage.map(|m| m.round_dp(4).to_string()).unwrap_or_default()
        );
    }
    print_positions(&calculate_parent_subaccount_positions(&wallet, &markets, config));
    println!();
}

fn level(size: &str, offset: u64) -> RawOrderbookLevel {
    RawOrderbookLevel {
        size: RawDecimal::from(size),
        offset,
    }
}

/// A crossed book from out-of-order deltas, uncrossed and grouped.
fn scenario_3_orderbook(config: &DeriveConfig) {
    println!("Scenario 3: Orderbook\n");

    let raw = RawOrderbook {
        asks: [
            ("50010".to_string(), level("1.5", 10)),
            ("50020".to_string(), level("2", 11)),
            ("49990".to_string(), level("0.5", 3)),
        ]
        .into_iter()
        .collect(),
        bids: [
            ("50000".to_string(), level("1", 12)),
            ("49980".to_string(), level("3", 9)),
        ]
        .into_iter()
        .collect(),
    };

    let book = calculate_orderbook(&raw);
    println!(
        "  {} asks, {} bids, mid {:?}, spread {:?}",
        book.asks.len(),
        book.bids.len(),
        book.mid_price,
        book.spread
    );

    let grouped = format_orderbook(&book, GroupingMultiplier::Hundred, dec!(1), &config.orderbook);
    for line in &grouped.asks {
        println!("  ask {:>8} {:>6}", line.price, line.size);
    }
    for line in &grouped.bids {
        println!("  bid {:>8} {:>6}", line.price, line.size);
    }
    println!();
}

/// Indexer falls behind, then catches up.
fn scenario_4_api_status(config: &DeriveConfig) {
    println!("Scenario 4: API Status\n");

    let now = Timestamp::now();
    let validator: Vec<HeightSample> = (0..6).map(|i| HeightSample::success(1_000 - i, now)).collect();
    let lagging: Vec<HeightSample> = (0..6).map(|i| HeightSample::success(900 - i, now)).collect();

    let mut previous = PreviousStatus::default();
    for indexer in [&lagging, &lagging, &validator] {
        let update = compute_api_state(indexer, &validator, now, &config.api_state, previous);
        previous = update.previous;
        if let Some(state) = update.state {
            println!("  status {:?}, trailing {:?}", state.status, state.trailing_blocks);
        }
    }
}
