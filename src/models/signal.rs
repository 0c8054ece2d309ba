//! Normalized market-intelligence signal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// The four factors the decision engine consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalFactor {
    Sentiment,
    Impact,
    PriceStrength,
    Momentum,
}

impl SignalFactor {
    pub const ALL: [SignalFactor; 4] = [
        SignalFactor::Sentiment,
        SignalFactor::Impact,
        SignalFactor::PriceStrength,
        SignalFactor::Momentum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalFactor::Sentiment => "sentiment",
            SignalFactor::Impact => "impact",
            SignalFactor::PriceStrength => "price_strength",
            SignalFactor::Momentum => "momentum",
        }
    }

    /// Inclusive raw range accepted for this factor.
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            SignalFactor::Sentiment => (-1.0, 1.0),
            SignalFactor::Impact => (0.0, 100.0),
            SignalFactor::PriceStrength | SignalFactor::Momentum => (0.0, 1.0),
        }
    }

    /// Raw value that normalizes to 0.5.
    pub fn neutral(&self) -> f64 {
        match self {
            SignalFactor::Sentiment => 0.0,
            SignalFactor::Impact => 50.0,
            SignalFactor::PriceStrength | SignalFactor::Momentum => 0.5,
        }
    }

    pub fn validate(&self, value: f64) -> EngineResult<f64> {
        let (lo, hi) = self.bounds();
        if !value.is_finite() || value < lo || value > hi {
            return Err(EngineError::validation(format!(
                "{} out of range [{lo}, {hi}]: {value}",
                self.as_str()
            )));
        }
        Ok(value)
    }

    /// Map a raw value onto [0, 1].
    pub fn normalize(&self, value: f64) -> f64 {
        let (lo, hi) = self.bounds();
        ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
    }
}

/// Latest market intelligence, already normalized by the upstream aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketSignal {
    /// News/social sentiment in [-1, 1]
    pub sentiment: f64,

    /// Event impact score in [0, 100]
    pub impact_score: f64,

    /// Price strength in [0, 1]
    pub price_strength: f64,

    /// Momentum in [0, 1]
    pub momentum: f64,

    pub observed_at: DateTime<Utc>,
}

impl MarketSignal {
    /// Build a signal, rejecting out-of-range factors.
    pub fn new(
        sentiment: f64,
        impact_score: f64,
        price_strength: f64,
        momentum: f64,
        observed_at: DateTime<Utc>,
    ) -> EngineResult<Self> {
        Ok(Self {
            sentiment: SignalFactor::Sentiment.validate(sentiment)?,
            impact_score: SignalFactor::Impact.validate(impact_score)?,
            price_strength: SignalFactor::PriceStrength.validate(price_strength)?,
            momentum: SignalFactor::Momentum.validate(momentum)?,
            observed_at,
        })
    }

    /// Signal whose every normalized factor is 0.5.
    pub fn neutral(observed_at: DateTime<Utc>) -> Self {
        Self {
            sentiment: SignalFactor::Sentiment.neutral(),
            impact_score: SignalFactor::Impact.neutral(),
            price_strength: SignalFactor::PriceStrength.neutral(),
            momentum: SignalFactor::Momentum.neutral(),
            observed_at,
        }
    }

    pub fn factor(&self, factor: SignalFactor) -> f64 {
        match factor {
            SignalFactor::Sentiment => self.sentiment,
            SignalFactor::Impact => self.impact_score,
            SignalFactor::PriceStrength => self.price_strength,
            SignalFactor::Momentum => self.momentum,
        }
    }

    /// Composite market score: mean of the four normalized factors, in [0, 1].
    pub fn market_score(&self) -> f64 {
        let total: f64 = SignalFactor::ALL
            .iter()
            .map(|f| f.normalize(self.factor(*f)))
            .sum();
        total / SignalFactor::ALL.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_score() {
        let signal = MarketSignal::neutral(Utc::now());
        assert!((signal.market_score() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_market_score() {
        // (0.8 + 0.7 + 0.9 + 0.6) / 4 = 0.75
        let signal = MarketSignal::new(0.6, 70.0, 0.9, 0.6, Utc::now()).unwrap();
        assert!((signal.market_score() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(MarketSignal::new(1.5, 50.0, 0.5, 0.5, Utc::now()).is_err());
        assert!(MarketSignal::new(0.0, 101.0, 0.5, 0.5, Utc::now()).is_err());
        assert!(MarketSignal::new(0.0, 50.0, f64::NAN, 0.5, Utc::now()).is_err());
    }
}
