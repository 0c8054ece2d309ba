//! FIFO lot matching: pairs each sell against the oldest open buy lots.

use std::collections::VecDeque;

use rust_decimal::Decimal;

use crate::error::{EngineError, EngineResult};
use crate::models::{Lot, TradeExecution, TradePair, TradeSide};

/// Total unmatched quantity across a lot queue.
pub fn open_quantity(lots: &VecDeque<Lot>) -> Decimal {
    lots.iter().map(|l| l.remaining_quantity).sum()
}

/// Match a sell against the open lots, oldest first.
///
/// The input queue is left untouched; on success the caller receives the
/// realized pairs and the queue as it stands after the sell. If the queue runs
/// out before the sell is covered the whole match is rejected.
pub fn match_sell(
    sell: &TradeExecution,
    open_lots: &VecDeque<Lot>,
) -> EngineResult<(Vec<TradePair>, VecDeque<Lot>)> {
    if sell.side() != TradeSide::Sell {
        return Err(EngineError::validation(format!(
            "cannot match {} execution {} against lots",
            sell.side().as_str(),
            sell.id()
        )));
    }

    let available = open_quantity(open_lots);
    if available < sell.quantity() {
        return Err(EngineError::InsufficientInventory {
            requested: sell.quantity(),
            available,
        });
    }

    let mut queue = open_lots.clone();
    let mut pairs = Vec::new();
    let mut remaining = sell.quantity();

    while remaining > Decimal::ZERO {
        let Some(lot) = queue.front_mut() else {
            // Unreachable after the availability check, kept as a hard stop.
            return Err(EngineError::InsufficientInventory {
                requested: sell.quantity(),
                available,
            });
        };

        let matched = remaining.min(lot.remaining_quantity);
        let sell_fee = sell.fee_share(matched);
        let buy_fee = lot.fee_share(matched);
        let net_profit = matched * (sell.price() - lot.origin_price) - sell_fee - buy_fee;

        pairs.push(TradePair {
            sell_execution_id: sell.id().to_string(),
            buy_execution_id: lot.origin_execution_id.clone(),
            matched_quantity: matched,
            buy_price: lot.origin_price,
            sell_price: sell.price(),
            apportioned_buy_fee: buy_fee,
            apportioned_sell_fee: sell_fee,
            net_profit,
            opened_at: lot.origin_timestamp,
            closed_at: sell.timestamp(),
        });

        remaining -= matched;
        lot.remaining_quantity -= matched;
        if lot.is_exhausted() {
            queue.pop_front();
        }
    }

    Ok((pairs, queue))
}

/// Open-lot queue plus the realized pairs it has produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FifoBook {
    lots: VecDeque<Lot>,
    pairs: Vec<TradePair>,
}

impl FifoBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a book by replaying executions in timestamp order.
    pub fn replay<'a, I>(executions: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = &'a TradeExecution>,
    {
        let mut ordered: Vec<&TradeExecution> = executions.into_iter().collect();
        ordered.sort_by_key(|e| e.timestamp());

        let mut book = Self::new();
        for execution in ordered {
            book.record(execution)?;
        }
        Ok(book)
    }

    /// Apply one execution. Buys open a lot; sells are matched FIFO.
    /// Returns the pairs realized by this execution.
    pub fn record(&mut self, execution: &TradeExecution) -> EngineResult<Vec<TradePair>> {
        match execution.side() {
            TradeSide::Buy => {
                self.open(Lot::from_buy(execution));
                Ok(Vec::new())
            }
            TradeSide::Sell => {
                let (pairs, lots) = match_sell(execution, &self.lots)?;
                self.lots = lots;
                self.pairs.extend(pairs.iter().cloned());
                Ok(pairs)
            }
        }
    }

    /// Insert a lot keeping the queue ordered by origin timestamp.
    fn open(&mut self, lot: Lot) {
        let pos = self
            .lots
            .iter()
            .rposition(|l| l.origin_timestamp <= lot.origin_timestamp)
            .map_or(0, |i| i + 1);
        self.lots.insert(pos, lot);
    }

    pub fn lots(&self) -> &VecDeque<Lot> {
        &self.lots
    }

    pub fn pairs(&self) -> &[TradePair] {
        &self.pairs
    }

    /// Replace the lot queue and append pairs produced by a staged match.
    pub(crate) fn apply_match(&mut self, lots: VecDeque<Lot>, pairs: &[TradePair]) {
        self.lots = lots;
        self.pairs.extend(pairs.iter().cloned());
    }

    pub(crate) fn apply_buy(&mut self, execution: &TradeExecution) {
        self.open(Lot::from_buy(execution));
    }
}
