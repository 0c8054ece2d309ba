//! Decision emitted once per cycle, and its audit record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// What to do this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(Action::Buy),
            "SELL" => Ok(Action::Sell),
            "HOLD" => Ok(Action::Hold),
            other => Err(EngineError::validation(format!("unknown action: {other}"))),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// How far behind the weekly goal pacing is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "LOW",
            Urgency::Medium => "MEDIUM",
            Urgency::High => "HIGH",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s.to_uppercase().as_str() {
            "LOW" => Ok(Urgency::Low),
            "MEDIUM" => Ok(Urgency::Medium),
            "HIGH" => Ok(Urgency::High),
            other => Err(EngineError::validation(format!("unknown urgency: {other}"))),
        }
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A trading decision. Never mutated after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,

    /// Base-asset units to trade (0 for HOLD)
    pub quantity: Decimal,

    /// Price the decision was made at
    pub price: Decimal,

    /// Confidence in [0, 100]
    pub confidence: f64,

    /// Which factors and thresholds drove the choice
    pub reasoning: String,

    pub urgency: Urgency,

    /// Composite market score in [0, 1] the decision was based on
    pub market_score: f64,

    /// False when the decision was downgraded or never applied
    pub executed: bool,
}

impl Decision {
    pub fn hold(price: Decimal, confidence: f64, urgency: Urgency, market_score: f64, reasoning: String) -> Self {
        Self {
            action: Action::Hold,
            quantity: Decimal::ZERO,
            price,
            confidence,
            reasoning,
            urgency,
            market_score,
            executed: false,
        }
    }

    pub fn is_trade(&self) -> bool {
        self.action != Action::Hold
    }

    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }

    /// Copy of this decision marked as applied to the ledger.
    pub fn into_executed(self) -> Self {
        Self {
            executed: true,
            ..self
        }
    }

    /// Replacement HOLD for a decision the ledger refused, keeping the
    /// original intent in the reasoning for the audit trail.
    pub fn into_unexecuted_hold(self, reason: &str) -> Self {
        let reasoning = format!(
            "{} {:.8} rejected: {}; original: {}",
            self.action, self.quantity, reason, self.reasoning
        );
        Self {
            action: Action::Hold,
            quantity: Decimal::ZERO,
            reasoning,
            executed: false,
            ..self
        }
    }
}

/// Audit record handed to the decision log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub quantity: Decimal,
    pub price: Decimal,
    pub confidence: f64,
    pub reasoning: String,
    pub urgency: Urgency,
    pub market_basis: f64,
    pub executed: bool,
}

impl DecisionRecord {
    pub fn from_decision(timestamp: DateTime<Utc>, decision: &Decision) -> Self {
        Self {
            timestamp,
            action: decision.action,
            quantity: decision.quantity,
            price: decision.price,
            confidence: decision.confidence,
            reasoning: decision.reasoning.clone(),
            urgency: decision.urgency,
            market_basis: decision.market_score,
            executed: decision.executed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_downgrade_keeps_intent() {
        let decision = Decision {
            action: Action::Buy,
            quantity: dec!(2),
            price: dec!(100),
            confidence: 80.0,
            reasoning: "behind goal".to_string(),
            urgency: Urgency::High,
            market_score: 0.7,
            executed: false,
        };

        let held = decision.into_unexecuted_hold("insufficient funds");
        assert_eq!(held.action, Action::Hold);
        assert_eq!(held.quantity, Decimal::ZERO);
        assert!(!held.executed);
        assert!(held.reasoning.contains("BUY"));
        assert!(held.reasoning.contains("insufficient funds"));
        assert!(held.reasoning.contains("behind goal"));
        assert_eq!(held.urgency, Urgency::High);
    }
}
