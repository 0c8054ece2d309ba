//! Trade execution model: one idealized fill on the base/quote pair.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(TradeSide::Buy),
            "SELL" => Ok(TradeSide::Sell),
            other => Err(EngineError::validation(format!("unknown trade side: {other}"))),
        }
    }
}

/// A recorded fill. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeExecution {
    /// Unique execution identifier (UUID v4)
    id: String,

    /// When the fill happened
    timestamp: DateTime<Utc>,

    /// Trade direction
    side: TradeSide,

    /// Base-asset units filled
    quantity: Decimal,

    /// Quote currency per base unit
    price: Decimal,

    /// Fee paid in quote currency
    fee: Decimal,
}

impl TradeExecution {
    /// Create a validated execution with a fresh id.
    pub fn new(
        timestamp: DateTime<Utc>,
        side: TradeSide,
        quantity: Decimal,
        price: Decimal,
        fee: Decimal,
    ) -> EngineResult<Self> {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            timestamp,
            side,
            quantity,
            price,
            fee,
        )
    }

    /// Create a validated execution with a known id (e.g. loaded from storage).
    pub fn with_id(
        id: String,
        timestamp: DateTime<Utc>,
        side: TradeSide,
        quantity: Decimal,
        price: Decimal,
        fee: Decimal,
    ) -> EngineResult<Self> {
        if id.trim().is_empty() {
            return Err(EngineError::validation("execution id must not be empty"));
        }
        if quantity <= Decimal::ZERO {
            return Err(EngineError::validation(format!(
                "quantity must be positive, got {quantity}"
            )));
        }
        if price <= Decimal::ZERO {
            return Err(EngineError::validation(format!(
                "price must be positive, got {price}"
            )));
        }
        if fee < Decimal::ZERO {
            return Err(EngineError::validation(format!(
                "fee must not be negative, got {fee}"
            )));
        }

        Ok(Self {
            id,
            timestamp,
            side,
            quantity,
            price,
            fee,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn side(&self) -> TradeSide {
        self.side
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn fee(&self) -> Decimal {
        self.fee
    }

    /// Gross quote value of the fill, before fees.
    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }

    /// Portion of this execution's fee attributable to `quantity` units.
    pub fn fee_share(&self, quantity: Decimal) -> Decimal {
        self.fee * quantity / self.quantity
    }

    /// Net change in quote balance caused by this fill.
    pub fn quote_delta(&self) -> Decimal {
        match self.side {
            TradeSide::Buy => -(self.notional() + self.fee),
            TradeSide::Sell => self.notional() - self.fee,
        }
    }

    /// Net change in base balance caused by this fill.
    pub fn base_delta(&self) -> Decimal {
        match self.side {
            TradeSide::Buy => self.quantity,
            TradeSide::Sell => -self.quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rejects_invalid_executions() {
        let now = Utc::now();
        assert!(TradeExecution::new(now, TradeSide::Buy, dec!(0), dec!(100), dec!(0)).is_err());
        assert!(TradeExecution::new(now, TradeSide::Buy, dec!(1), dec!(-1), dec!(0)).is_err());
        assert!(TradeExecution::new(now, TradeSide::Buy, dec!(1), dec!(100), dec!(-0.1)).is_err());

        let ok = TradeExecution::new(now, TradeSide::Buy, dec!(1), dec!(100), dec!(0)).unwrap();
        assert!(!ok.id().is_empty());
    }

    #[test]
    fn test_balance_deltas() {
        let now = Utc::now();
        let buy = TradeExecution::new(now, TradeSide::Buy, dec!(2), dec!(100), dec!(1)).unwrap();
        assert_eq!(buy.quote_delta(), dec!(-201));
        assert_eq!(buy.base_delta(), dec!(2));

        let sell = TradeExecution::new(now, TradeSide::Sell, dec!(1.5), dec!(150), dec!(2)).unwrap();
        assert_eq!(sell.quote_delta(), dec!(223));
        assert_eq!(sell.base_delta(), dec!(-1.5));
        assert_eq!(sell.fee_share(dec!(0.75)), dec!(1));
    }

    #[test]
    fn test_side_parse() {
        assert_eq!(TradeSide::parse("buy").unwrap(), TradeSide::Buy);
        assert_eq!(TradeSide::parse("SELL").unwrap(), TradeSide::Sell);
        assert!(TradeSide::parse("hold").is_err());
    }
}
