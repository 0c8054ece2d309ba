//! Open lots created by buys, and the realized pairs produced by matching sells.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::TradeExecution;

/// Unconsumed quantity from one buy execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    /// Id of the buy execution that opened this lot
    pub origin_execution_id: String,

    /// When the buy happened (queue order key)
    pub origin_timestamp: DateTime<Utc>,

    /// Buy price per unit
    pub origin_price: Decimal,

    /// Quantity the buy originally filled
    pub original_quantity: Decimal,

    /// Quantity not yet matched against sells
    pub remaining_quantity: Decimal,

    /// Full fee paid on the buy
    pub origin_fee: Decimal,
}

impl Lot {
    /// Open a lot from a buy execution.
    pub fn from_buy(execution: &TradeExecution) -> Self {
        Self {
            origin_execution_id: execution.id().to_string(),
            origin_timestamp: execution.timestamp(),
            origin_price: execution.price(),
            original_quantity: execution.quantity(),
            remaining_quantity: execution.quantity(),
            origin_fee: execution.fee(),
        }
    }

    /// Portion of the buy fee attributable to `quantity` units of this lot.
    pub fn fee_share(&self, quantity: Decimal) -> Decimal {
        if self.original_quantity.is_zero() {
            return Decimal::ZERO;
        }
        self.origin_fee * quantity / self.original_quantity
    }

    /// Buy fee still carried by the unmatched remainder.
    pub fn unspent_fee(&self) -> Decimal {
        self.fee_share(self.remaining_quantity)
    }

    /// Mark-to-market gain on the remainder, net of its unspent fee.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.remaining_quantity * (price - self.origin_price) - self.unspent_fee()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_quantity <= Decimal::ZERO
    }
}

/// One slice of a sell matched against one lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePair {
    pub sell_execution_id: String,
    pub buy_execution_id: String,
    pub matched_quantity: Decimal,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub apportioned_buy_fee: Decimal,
    pub apportioned_sell_fee: Decimal,
    pub net_profit: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl TradePair {
    pub fn is_win(&self) -> bool {
        self.net_profit > Decimal::ZERO
    }

    /// Return on the matched cost, including the buy fee.
    pub fn return_pct(&self) -> Decimal {
        let cost = self.matched_quantity * self.buy_price + self.apportioned_buy_fee;
        if cost.is_zero() {
            return Decimal::ZERO;
        }
        self.net_profit / cost
    }
}
