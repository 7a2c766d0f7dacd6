// 6.0: funding. hourly rate applied to notional. positive rate = longs pay shorts.
// 6.0 has direction and thresholds. 6.1 cost math, 6.2 projections and break-even, 6.3 warnings, 6.4 history.

use crate::config::FundingParams;
use crate::market::MarketInfo;
use crate::numbers::round_dp_half_up;
use crate::subaccount::SubaccountPosition;
use crate::types::{Side, Timestamp};
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const HOURS_PER_DAY: u32 = 24;
pub const HOURS_PER_8H_PERIOD: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FundingDirection {
    Pay,
    Receive,
    Neutral,
}

pub fn funding_direction(rate: Decimal, side: Side) -> FundingDirection {
    if rate.is_zero() {
        return FundingDirection::Neutral;
    }
    match (rate > Decimal::ZERO, side) {
        (true, Side::Long) | (false, Side::Short) => FundingDirection::Pay,
        _ => FundingDirection::Receive,
    }
}

pub fn is_extreme_funding_rate(rate_per_hour: Decimal, params: &FundingParams) -> bool {
    rate_per_hour.abs() >= params.extreme_rate_threshold
}

pub fn is_high_funding_rate(rate_per_hour: Decimal, params: &FundingParams) -> bool {
    rate_per_hour.abs() >= params.high_rate_threshold && !is_extreme_funding_rate(rate_per_hour, params)
}

// missing market or rate => zero
fn next_rate(market: Option<&MarketInfo>) -> Decimal {
    market
        .and_then(|m| m.next_funding_rate)
        .unwrap_or(Decimal::ZERO)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRateInfo {
    pub rate: Decimal,
    pub direction: FundingDirection,
    pub is_extreme: bool,
}

pub fn funding_rate_info(market: Option<&MarketInfo>, side: Side, params: &FundingParams) -> FundingRateInfo {
    let rate = next_rate(market);
    FundingRateInfo {
        rate,
        direction: funding_direction(rate, side),
        is_extreme: is_extreme_funding_rate(rate, params),
    }
}

// 6.1: notional * rate * hours, rounded half-up. None when the product doesn't fit.
pub fn calculate_funding_cost(
    notional: Decimal,
    rate_per_hour: Decimal,
    hours: Decimal,
    params: &FundingParams,
) -> Option<Decimal> {
    if notional.is_zero() || rate_per_hour.is_zero() {
        return Some(Decimal::ZERO);
    }
    let cost = notional.checked_mul(rate_per_hour)?.checked_mul(hours)?;
    Some(round_dp_half_up(cost, params.cost_precision))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeFundingCost {
    pub cost: Decimal,
    pub overflow: bool,
}

/// Funding cost with an overflow flag. A product that doesn't fit, or a cost
/// whose magnitude exceeds `max_cost`, reports `max_cost` (or the notional
/// when there is no cap).
pub fn calculate_funding_cost_safe(
    notional: Decimal,
    rate_per_hour: Decimal,
    hours: Decimal,
    max_cost: Option<Decimal>,
    params: &FundingParams,
) -> SafeFundingCost {
    if notional.is_zero() || rate_per_hour.is_zero() {
        return SafeFundingCost {
            cost: Decimal::ZERO,
            overflow: false,
        };
    }
    let overflowed = SafeFundingCost {
        cost: max_cost.unwrap_or(notional),
        overflow: true,
    };
    let Some(cost) = calculate_funding_cost(notional, rate_per_hour, hours, params) else {
        return overflowed;
    };
    if max_cost.is_some_and(|cap| cost.abs() > cap) {
        return overflowed;
    }
    SafeFundingCost { cost, overflow: false }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingCostCalculation {
    pub hourly_rate: Decimal,
    pub per_8h_rate: Option<Decimal>,
    pub daily_rate: Option<Decimal>,
    pub direction: FundingDirection,
    /// Costs are undefined when notional times rate doesn't fit in a `Decimal`.
    pub hourly_cost: Option<Decimal>,
    pub per_8h_cost: Option<Decimal>,
    pub daily_cost: Option<Decimal>,
}

pub fn calculate_funding_costs(
    position: &SubaccountPosition,
    market: Option<&MarketInfo>,
    params: &FundingParams,
) -> FundingCostCalculation {
    let rate = next_rate(market);
    let notional = position.core.notional.value();
    let cost_over = |hours: u32| calculate_funding_cost(notional, rate, Decimal::from(hours), params);

    FundingCostCalculation {
        hourly_rate: rate,
        per_8h_rate: rate.checked_mul(Decimal::from(HOURS_PER_8H_PERIOD)),
        daily_rate: rate.checked_mul(Decimal::from(HOURS_PER_DAY)),
        direction: funding_direction(rate, position.core.side),
        hourly_cost: cost_over(1),
        per_8h_cost: cost_over(HOURS_PER_8H_PERIOD),
        daily_cost: cost_over(HOURS_PER_DAY),
    }
}

// 6.2: projections over fixed horizons

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FundingPeriod {
    OneDay,
    SevenDays,
    ThirtyDays,
}

impl FundingPeriod {
    pub fn hours(&self) -> u32 {
        match self {
            FundingPeriod::OneDay => HOURS_PER_DAY,
            FundingPeriod::SevenDays => HOURS_PER_DAY * 7,
            FundingPeriod::ThirtyDays => HOURS_PER_DAY * 30,
        }
    }
}

impl fmt::Display for FundingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FundingPeriod::OneDay => write!(f, "1d"),
            FundingPeriod::SevenDays => write!(f, "7d"),
            FundingPeriod::ThirtyDays => write!(f, "30d"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingProjection {
    pub period: FundingPeriod,
    pub period_hours: u32,
    pub estimated_cost: Option<Decimal>,
    pub cost_per_day: Option<Decimal>,
    pub direction: FundingDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingProjections {
    pub one_day: FundingProjection,
    pub seven_days: FundingProjection,
    pub thirty_days: FundingProjection,
}

pub fn calculate_funding_projections(
    position: &SubaccountPosition,
    market: Option<&MarketInfo>,
    params: &FundingParams,
) -> FundingProjections {
    let rate = next_rate(market);
    let notional = position.core.notional.value();
    let direction = funding_direction(rate, position.core.side);
    let cost_per_day = calculate_funding_cost(notional, rate, Decimal::from(HOURS_PER_DAY), params);

    let project = |period: FundingPeriod| FundingProjection {
        period,
        period_hours: period.hours(),
        estimated_cost: calculate_funding_cost(notional, rate, Decimal::from(period.hours()), params),
        cost_per_day,
        direction,
    };

    FundingProjections {
        one_day: project(FundingPeriod::OneDay),
        seven_days: project(FundingPeriod::SevenDays),
        thirty_days: project(FundingPeriod::ThirtyDays),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakEvenWithFunding {
    pub base_break_even: Decimal,
    pub break_even_1d: Option<Decimal>,
    pub break_even_7d: Option<Decimal>,
    pub break_even_30d: Option<Decimal>,
    pub funding_impact_1d: Option<Decimal>,
    pub funding_impact_7d: Option<Decimal>,
    pub funding_impact_30d: Option<Decimal>,
}

/// Exit price that covers funding paid over each horizon, with the per-unit impact.
/// Cost carries the rate's sign: longs add it, shorts subtract it.
/// `None` when the impact or the shifted price doesn't fit.
pub fn break_even_price(
    entry_price: Decimal,
    unsigned_size: Decimal,
    side: Side,
    cost: Decimal,
) -> Option<(Decimal, Decimal)> {
    let impact = if unsigned_size.is_zero() {
        Decimal::ZERO
    } else {
        cost.checked_div(unsigned_size)?
    };
    let price = match side {
        Side::Long => entry_price.checked_add(impact)?,
        Side::Short => entry_price.checked_sub(impact)?,
    };
    Some((price, impact))
}

pub fn calculate_break_even_with_funding(
    position: &SubaccountPosition,
    market: Option<&MarketInfo>,
    params: &FundingParams,
) -> BreakEvenWithFunding {
    let rate = next_rate(market);
    let core = &position.core;
    let at = |period: FundingPeriod| {
        calculate_funding_cost(core.notional.value(), rate, Decimal::from(period.hours()), params)
            .and_then(|cost| break_even_price(core.entry_price, core.unsigned_size, core.side, cost))
            .unzip()
    };
    let (break_even_1d, funding_impact_1d) = at(FundingPeriod::OneDay);
    let (break_even_7d, funding_impact_7d) = at(FundingPeriod::SevenDays);
    let (break_even_30d, funding_impact_30d) = at(FundingPeriod::ThirtyDays);

    BreakEvenWithFunding {
        base_break_even: core.entry_price,
        break_even_1d,
        break_even_7d,
        break_even_30d,
        funding_impact_1d,
        funding_impact_7d,
        funding_impact_30d,
    }
}

// 6.3: warnings. percentages are already x100.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundingWarning {
    ExtremeRate { rate_percent: Decimal },
    HighRate { rate_percent: Decimal },
    HighDailyCost { percent_of_notional: Decimal },
    Paying { daily_cost: Decimal },
}

impl fmt::Display for FundingWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FundingWarning::ExtremeRate { rate_percent } => write!(
                f,
                "EXTREME FUNDING RATE: {:.2}% per hour. This position will incur very high funding costs.",
                rate_percent
            ),
            FundingWarning::HighRate { rate_percent } => write!(
                f,
                "High funding rate: {:.2}% per hour. Consider the funding costs in your trading decision.",
                rate_percent
            ),
            FundingWarning::HighDailyCost { percent_of_notional } => write!(
                f,
                "High daily funding cost: {:.2}% of position size per day.",
                percent_of_notional
            ),
            FundingWarning::Paying { daily_cost } => write!(
                f,
                "You will PAY funding: approximately ${:.2} per day for this position.",
                daily_cost
            ),
        }
    }
}

pub fn generate_funding_warnings(
    rate_info: &FundingRateInfo,
    costs: &FundingCostCalculation,
    position: &SubaccountPosition,
    params: &FundingParams,
) -> Vec<FundingWarning> {
    let mut warnings = Vec::new();
    let rate_percent = rate_info.rate.abs().checked_mul(dec!(100));

    if let Some(rate_percent) = rate_percent {
        if is_extreme_funding_rate(rate_info.rate, params) {
            warnings.push(FundingWarning::ExtremeRate { rate_percent });
        } else if is_high_funding_rate(rate_info.rate, params) {
            warnings.push(FundingWarning::HighRate { rate_percent });
        }
    }

    // an undefined daily cost can't be sized, so it raises no cost warnings
    let Some(daily_cost) = costs.daily_cost.map(|c| c.abs()) else {
        return warnings;
    };

    let notional = position.core.notional.value();
    let daily_cost_ratio = daily_cost.checked_div(notional).unwrap_or(Decimal::ZERO);
    if daily_cost_ratio >= params.daily_cost_warning_ratio {
        if let Some(percent_of_notional) = daily_cost_ratio.checked_mul(dec!(100)) {
            warnings.push(FundingWarning::HighDailyCost { percent_of_notional });
        }
    }

    if rate_info.direction == FundingDirection::Pay {
        warnings.push(FundingWarning::Paying { daily_cost });
    }

    warnings
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteFundingAnalysis {
    pub rate_info: FundingRateInfo,
    pub costs: FundingCostCalculation,
    pub projections: FundingProjections,
    pub break_even: BreakEvenWithFunding,
    pub warnings: Vec<FundingWarning>,
}

pub fn calculate_complete_funding_analysis(
    position: &SubaccountPosition,
    market: Option<&MarketInfo>,
    params: &FundingParams,
) -> CompleteFundingAnalysis {
    let rate_info = funding_rate_info(market, position.core.side, params);
    let costs = calculate_funding_costs(position, market, params);
    let warnings = generate_funding_warnings(&rate_info, &costs, position, params);
    CompleteFundingAnalysis {
        projections: calculate_funding_projections(position, market, params),
        break_even: calculate_break_even_with_funding(position, market, params),
        rate_info,
        costs,
        warnings,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFundingCost {
    /// Undefined when size, price and rate multiply past `Decimal::MAX`.
    pub cost: Option<Decimal>,
    pub direction: FundingDirection,
    /// |cost| / notional * 100
    pub cost_percentage: Option<Decimal>,
}

/// Funding a prospective trade would pay or receive over `hours`.
pub fn calculate_trade_funding_cost(
    size: Decimal,
    price: Decimal,
    side: Side,
    market: Option<&MarketInfo>,
    hours: Decimal,
    params: &FundingParams,
) -> TradeFundingCost {
    let rate = next_rate(market);
    let notional = size.checked_mul(price);
    let cost = notional.and_then(|notional| calculate_funding_cost(notional, rate, hours, params));
    let cost_percentage = match (cost, notional) {
        (Some(_), Some(n)) if n.is_zero() => Some(Decimal::ZERO),
        (Some(cost), Some(n)) => cost.abs().checked_div(n).and_then(|r| r.checked_mul(dec!(100))),
        _ => None,
    };
    TradeFundingCost {
        cost,
        direction: funding_direction(rate, side),
        cost_percentage,
    }
}

// 6.4: historical rates

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRateSample {
    pub rate: Decimal,
    pub timestamp: Timestamp,
}

/// Mean rate over the samples. Zero for no history, `None` when the sum overflows.
pub fn calculate_average_funding_rate(history: &[FundingRateSample]) -> Option<Decimal> {
    if history.is_empty() {
        return Some(Decimal::ZERO);
    }
    let sum = history
        .iter()
        .try_fold(Decimal::ZERO, |acc, s| acc.checked_add(s.rate))?;
    sum.checked_div(Decimal::from(history.len()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingCostRange {
    pub current: Option<Decimal>,
    pub optimistic: Option<Decimal>,
    pub pessimistic: Option<Decimal>,
    pub average: Option<Decimal>,
}

/// Daily cost at the current rate and at mean -/+ one population standard deviation of history.
pub fn calculate_funding_cost_range(
    position: &SubaccountPosition,
    market: Option<&MarketInfo>,
    history: &[FundingRateSample],
    params: &FundingParams,
) -> FundingCostRange {
    let notional = position.core.notional.value();
    let day = Decimal::from(HOURS_PER_DAY);
    let current = calculate_funding_cost(notional, next_rate(market), day, params);

    if history.is_empty() {
        return FundingCostRange {
            current,
            optimistic: current,
            pessimistic: current,
            average: current,
        };
    }

    let Some((mean, std_dev)) = rate_mean_and_std_dev(history) else {
        return FundingCostRange {
            current,
            optimistic: None,
            pessimistic: None,
            average: None,
        };
    };
    let cost_at = |rate: Option<Decimal>| rate.and_then(|rate| calculate_funding_cost(notional, rate, day, params));

    FundingCostRange {
        current,
        optimistic: cost_at(mean.checked_sub(std_dev)),
        pessimistic: cost_at(mean.checked_add(std_dev)),
        average: cost_at(Some(mean)),
    }
}

// population standard deviation
fn rate_mean_and_std_dev(history: &[FundingRateSample]) -> Option<(Decimal, Decimal)> {
    let mean = calculate_average_funding_rate(history)?;
    let squares = history.iter().try_fold(Decimal::ZERO, |acc, s| {
        let deviation = s.rate.checked_sub(mean)?;
        acc.checked_add(deviation.checked_mul(deviation)?)
    })?;
    let variance = squares.checked_div(Decimal::from(history.len()))?;
    Some((mean, variance.sqrt().unwrap_or(Decimal::ZERO)))
}
