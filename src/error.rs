//! Engine error taxonomy.
//!
//! Domain rejections are typed so the bot can decide locally how to recover:
//! inventory and fund violations are surfaced and logged, missing market data
//! is neutralized, overlapping cycles are skipped until the next tick.

use rust_decimal::Decimal;

/// Errors produced by the accounting and decision core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Malformed execution, signal or configuration input.
    #[error("validation error: {0}")]
    Validation(String),

    /// A sell's quantity exceeds what is left in the open lots.
    #[error("insufficient inventory: sell of {requested} exceeds open lot quantity {available}")]
    InsufficientInventory { requested: Decimal, available: Decimal },

    /// A buy costs more quote currency than is available.
    #[error("insufficient funds: need {required} quote, have {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    /// A sell asks for more base units than are held.
    #[error("insufficient holdings: need {requested} base, hold {available}")]
    InsufficientHoldings { requested: Decimal, available: Decimal },

    /// A market-signal factor could not be refreshed.
    #[error("data unavailable from {factor}: {reason}")]
    DataUnavailable { factor: String, reason: String },

    /// Another cycle holds the ledger, or a versioned update lost a race.
    #[error("concurrency violation: {0}")]
    ConcurrencyViolation(String),
}

impl EngineError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Whether the failure means a decision could not be applied to the
    /// current balances (as opposed to bad input or infrastructure trouble).
    pub fn is_balance_rejection(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds { .. }
                | Self::InsufficientHoldings { .. }
                | Self::InsufficientInventory { .. }
        )
    }
}

/// Shorthand result for core operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_rejections() {
        let funds = EngineError::InsufficientFunds {
            required: dec!(100),
            available: dec!(50),
        };
        assert!(funds.is_balance_rejection());
        assert!(funds.to_string().contains("need 100 quote"));

        assert!(!EngineError::validation("bad price").is_balance_rejection());
        assert!(!EngineError::ConcurrencyViolation("busy".into()).is_balance_rejection());
    }
}
