// 7.0 config.rs: every tunable the calculators read, in one place.
// 7.1 defaults match the protocol's current constants. callers override per deployment.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// 7.2: margin mode split. subaccounts below this count are parents (cross), the rest isolated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginParams {
    pub num_parent_subaccounts: u32,
}

impl Default for MarginParams {
    fn default() -> Self {
        Self {
            num_parent_subaccounts: 128,
        }
    }
}

// 7.3: how long a best-effort-canceled order may stay "in flight" past its expiry block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLifecycleParams {
    pub cancel_grace_blocks: u64,
    // orderFlags value of short-term orders
    pub short_term_order_flags: String,
}

impl Default for OrderLifecycleParams {
    fn default() -> Self {
        Self {
            cancel_grace_blocks: 25,
            short_term_order_flags: "0".to_string(),
        }
    }
}

// 7.4: funding thresholds are hourly rates. 0.01 = 1%/h.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingParams {
    pub extreme_rate_threshold: Decimal,
    pub high_rate_threshold: Decimal,
    // daily cost as a fraction of notional that triggers a warning
    pub daily_cost_warning_ratio: Decimal,
    pub cost_precision: u32,
}

impl Default for FundingParams {
    fn default() -> Self {
        Self {
            extreme_rate_threshold: dec!(0.01),
            high_rate_threshold: dec!(0.005),
            daily_cost_warning_ratio: dec!(0.05),
            cost_precision: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderbookParams {
    // grouped mid falls back to tick / this when it lands on the touch
    pub mid_fallback_divisor: Decimal,
}

impl Default for OrderbookParams {
    fn default() -> Self {
        Self {
            mid_fallback_divisor: dec!(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiStateParams {
    // validator ahead of indexer by more than this => indexer trailing
    pub max_block_delay: u64,
    pub error_streak: usize,
    pub halted_sample_size: usize,
    pub staleness_ms: i64,
}

impl Default for ApiStateParams {
    fn default() -> Self {
        Self {
            max_block_delay: 50,
            error_streak: 3,
            halted_sample_size: 6,
            staleness_ms: 45_000,
        }
    }
}

// 7.5: the full set, passed by reference into every calculator that needs it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeriveConfig {
    #[serde(default)]
    pub margin: MarginParams,
    #[serde(default)]
    pub orders: OrderLifecycleParams,
    #[serde(default)]
    pub funding: FundingParams,
    #[serde(default)]
    pub orderbook: OrderbookParams,
    #[serde(default)]
    pub api_state: ApiStateParams,
}

impl DeriveConfig {
    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.margin.num_parent_subaccounts == 0 {
            return Err(ConfigError::InvalidMargin {
                reason: "need at least one parent subaccount".to_string(),
            });
        }

        let funding = &self.funding;
        if funding.high_rate_threshold <= Decimal::ZERO
            || funding.extreme_rate_threshold <= funding.high_rate_threshold
        {
            return Err(ConfigError::InvalidFunding {
                reason: "thresholds must satisfy 0 < high < extreme".to_string(),
            });
        }
        if funding.daily_cost_warning_ratio <= Decimal::ZERO {
            return Err(ConfigError::InvalidFunding {
                reason: "daily cost warning ratio must be positive".to_string(),
            });
        }
        if funding.cost_precision > 18 {
            return Err(ConfigError::InvalidFunding {
                reason: "cost precision above 18 dp".to_string(),
            });
        }

        if self.orderbook.mid_fallback_divisor <= Decimal::ONE {
            return Err(ConfigError::InvalidOrderbook {
                reason: "mid fallback divisor must exceed 1".to_string(),
            });
        }

        let api = &self.api_state;
        if api.error_streak == 0 || api.halted_sample_size < 2 {
            return Err(ConfigError::InvalidApiState {
                reason: "error streak >= 1 and halted sample >= 2 required".to_string(),
            });
        }
        if api.staleness_ms <= 0 {
            return Err(ConfigError::InvalidApiState {
                reason: "staleness window must be positive".to_string(),
            });
        }

        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid margin config: {reason}")]
    InvalidMargin { reason: String },
    #[error("invalid funding config: {reason}")]
    InvalidFunding { reason: String },
    #[error("invalid orderbook config: {reason}")]
    InvalidOrderbook { reason: String },
    #[error("invalid api state config: {reason}")]
    InvalidApiState { reason: String },
}
