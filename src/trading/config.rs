//! Trading configuration.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Thresholds for the goal pacer's urgency levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// Days remaining at or below which a behind-goal week is HIGH urgency
    pub high_urgency_days: f64,

    /// Days remaining at or below which the week is at least MEDIUM urgency
    pub medium_urgency_days: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            high_urgency_days: 2.0,
            medium_urgency_days: 4.0,
        }
    }
}

/// Market score bucket boundaries for the decision table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Scores below this are bearish
    pub bearish_below: f64,

    /// Scores above this are bullish
    pub bullish_above: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            bearish_below: 0.40,
            bullish_above: 0.60,
        }
    }
}

/// Configuration consumed by the accounting and decision core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Weekly return target as a fraction (0.05 = 5%)
    pub weekly_target_return: f64,

    /// Starting portfolio value in quote currency
    pub starting_value: Decimal,

    /// Maximum fraction of the relevant balance a single decision may trade
    pub max_position_fraction: Decimal,

    /// Fraction of total value kept in quote currency and never spent on buys
    pub min_cash_reserve_fraction: Decimal,

    /// Trades below this notional (quote currency) are suppressed
    pub minimum_trade_notional: Decimal,

    /// Fee charged per fill as a fraction of notional
    pub fee_rate: Decimal,

    /// Decision cycle interval (milliseconds)
    pub decision_interval_ms: u64,

    /// Annualized risk-free rate used for the Sharpe ratio
    pub risk_free_rate: f64,

    /// How long a fetched market signal stays fresh (milliseconds)
    pub cache_ttl_ms: u64,

    /// Timeout for each market-intelligence source (milliseconds)
    pub fetch_timeout_ms: u64,

    pub pacing: PacingConfig,

    pub decision: DecisionConfig,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            weekly_target_return: 0.05,            // 5% a week
            starting_value: dec!(10000),           // $10k
            max_position_fraction: dec!(0.25),     // Max 25% per decision
            min_cash_reserve_fraction: dec!(0.10), // Keep 10% in cash
            minimum_trade_notional: dec!(10),      // Min $10
            fee_rate: dec!(0.001),                 // 0.1% fee
            decision_interval_ms: 60_000,          // 1 minute
            risk_free_rate: 0.04,                  // 4% a year
            cache_ttl_ms: 30_000,                  // 30 seconds
            fetch_timeout_ms: 5_000,               // 5 seconds
            pacing: PacingConfig::default(),
            decision: DecisionConfig::default(),
        }
    }
}

impl TradingConfig {
    /// Load from `PACER_*` environment variables, defaulting anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<f64>("PACER_WEEKLY_TARGET_RETURN")? {
            config.weekly_target_return = v;
        }
        if let Some(v) = env_parse::<Decimal>("PACER_STARTING_VALUE")? {
            config.starting_value = v;
        }
        if let Some(v) = env_parse::<Decimal>("PACER_MAX_POSITION_FRACTION")? {
            config.max_position_fraction = v;
        }
        if let Some(v) = env_parse::<Decimal>("PACER_MIN_CASH_RESERVE_FRACTION")? {
            config.min_cash_reserve_fraction = v;
        }
        if let Some(v) = env_parse::<Decimal>("PACER_MINIMUM_TRADE_NOTIONAL")? {
            config.minimum_trade_notional = v;
        }
        if let Some(v) = env_parse::<Decimal>("PACER_FEE_RATE")? {
            config.fee_rate = v;
        }
        if let Some(v) = env_parse::<u64>("PACER_DECISION_INTERVAL_MS")? {
            config.decision_interval_ms = v;
        }
        if let Some(v) = env_parse::<f64>("PACER_RISK_FREE_RATE")? {
            config.risk_free_rate = v;
        }
        if let Some(v) = env_parse::<u64>("PACER_CACHE_TTL_MS")? {
            config.cache_ttl_ms = v;
        }
        if let Some(v) = env_parse::<u64>("PACER_FETCH_TIMEOUT_MS")? {
            config.fetch_timeout_ms = v;
        }
        if let Some(v) = env_parse::<f64>("PACER_HIGH_URGENCY_DAYS")? {
            config.pacing.high_urgency_days = v;
        }
        if let Some(v) = env_parse::<f64>("PACER_MEDIUM_URGENCY_DAYS")? {
            config.pacing.medium_urgency_days = v;
        }
        if let Some(v) = env_parse::<f64>("PACER_BEARISH_BELOW")? {
            config.decision.bearish_below = v;
        }
        if let Some(v) = env_parse::<f64>("PACER_BULLISH_ABOVE")? {
            config.decision.bullish_above = v;
        }

        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if !self.weekly_target_return.is_finite() || self.weekly_target_return <= -1.0 {
            return Err(EngineError::validation(format!(
                "weekly_target_return must be a finite fraction above -1, got {}",
                self.weekly_target_return
            )));
        }
        if self.starting_value <= Decimal::ZERO {
            return Err(EngineError::validation("starting_value must be positive"));
        }
        for (name, value) in [
            ("max_position_fraction", self.max_position_fraction),
            ("min_cash_reserve_fraction", self.min_cash_reserve_fraction),
            ("fee_rate", self.fee_rate),
        ] {
            if value < Decimal::ZERO || value > Decimal::ONE {
                return Err(EngineError::validation(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.minimum_trade_notional < Decimal::ZERO {
            return Err(EngineError::validation("minimum_trade_notional must not be negative"));
        }
        if self.decision_interval_ms == 0 {
            return Err(EngineError::validation("decision_interval_ms must be positive"));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(EngineError::validation("risk_free_rate must be finite"));
        }
        if self.pacing.high_urgency_days > self.pacing.medium_urgency_days {
            return Err(EngineError::validation(format!(
                "high_urgency_days ({}) must not exceed medium_urgency_days ({})",
                self.pacing.high_urgency_days, self.pacing.medium_urgency_days
            )));
        }
        let d = &self.decision;
        if !(0.0..=1.0).contains(&d.bearish_below)
            || !(0.0..=1.0).contains(&d.bullish_above)
            || d.bearish_below > d.bullish_above
        {
            return Err(EngineError::validation(format!(
                "score buckets must satisfy 0 <= bearish_below ({}) <= bullish_above ({}) <= 1",
                d.bearish_below, d.bullish_above
            )));
        }
        Ok(())
    }

    pub fn decision_interval(&self) -> Duration {
        Duration::from_millis(self.decision_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("Invalid {key}: {raw}")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(TradingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_fractions() {
        let config = TradingConfig {
            max_position_fraction: dec!(1.5),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TradingConfig {
            pacing: PacingConfig {
                high_urgency_days: 5.0,
                medium_urgency_days: 4.0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TradingConfig {
            decision: DecisionConfig {
                bearish_below: 0.7,
                bullish_above: 0.6,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations() {
        let config = TradingConfig::default();
        assert_eq!(config.decision_interval(), Duration::from_secs(60));
        assert_eq!(config.cache_ttl(), Duration::from_secs(30));
    }
}
