//! Portfolio snapshot: balances valued at a single price.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Balances at a point in time. `total_value` is always derived, never set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    timestamp: DateTime<Utc>,
    base_balance: Decimal,
    quote_balance: Decimal,
    price: Decimal,
    total_value: Decimal,
}

impl PortfolioSnapshot {
    pub fn new(
        timestamp: DateTime<Utc>,
        base_balance: Decimal,
        quote_balance: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            timestamp,
            base_balance,
            quote_balance,
            price,
            total_value: quote_balance + base_balance * price,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn base_balance(&self) -> Decimal {
        self.base_balance
    }

    pub fn quote_balance(&self) -> Decimal {
        self.quote_balance
    }

    /// Price the base balance was marked at.
    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn total_value(&self) -> Decimal {
        self.total_value
    }

    /// Share of total value held in the base asset (0 when empty).
    pub fn exposure(&self) -> Decimal {
        if self.total_value <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.base_balance * self.price / self.total_value
    }
}
