//! Position ledger: the append-only execution log, current balances, the
//! FIFO lot book and the snapshot history.
//!
//! Mutation is two-phase. `stage` validates a decision against the current
//! balances and computes every effect without touching the ledger; `commit`
//! applies a staged result in one step. A rejected stage leaves the ledger
//! exactly as it was.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::metrics::{match_sell, FifoBook, PerformanceReport};
use crate::models::{
    Action, Decision, Lot, PortfolioSnapshot, TradeExecution, TradePair, TradeSide,
};

/// Fully computed effects of one cycle, not yet applied.
#[derive(Debug, Clone)]
pub struct StagedCommit {
    /// The fill, if the decision traded
    pub execution: Option<TradeExecution>,

    /// Pairs realized by a sell
    pub pairs: Vec<TradePair>,

    /// Snapshot after the cycle
    pub snapshot: PortfolioSnapshot,

    lots_after_sell: Option<VecDeque<Lot>>,
    staged_at_len: usize,
}

/// Owned copy of committed ledger data for reporting.
#[derive(Debug, Clone)]
pub struct LedgerView {
    pub execution_count: usize,
    pub base_balance: Decimal,
    pub quote_balance: Decimal,
    pub lots: VecDeque<Lot>,
    pub pairs: Vec<TradePair>,
    pub snapshots: Vec<PortfolioSnapshot>,
}

impl LedgerView {
    pub fn latest_snapshot(&self) -> Option<&PortfolioSnapshot> {
        self.snapshots.last()
    }

    pub fn report(&self, price: Decimal, period_risk_free: f64) -> PerformanceReport {
        PerformanceReport::compute(
            self.execution_count,
            &self.lots,
            &self.pairs,
            &self.snapshots,
            price,
            period_risk_free,
        )
    }
}

/// Single-writer ledger for one base/quote pair.
#[derive(Debug, Clone)]
pub struct PositionLedger {
    executions: Vec<TradeExecution>,
    base_balance: Decimal,
    quote_balance: Decimal,
    book: FifoBook,
    snapshots: Vec<PortfolioSnapshot>,
}

impl PositionLedger {
    /// Empty ledger funded with quote currency only.
    pub fn new(starting_quote: Decimal) -> Self {
        Self {
            executions: Vec::new(),
            base_balance: Decimal::ZERO,
            quote_balance: starting_quote,
            book: FifoBook::new(),
            snapshots: Vec::new(),
        }
    }

    /// Rebuild from persisted executions. Balances are derived from the log
    /// so they always agree with it.
    pub fn restore(
        starting_quote: Decimal,
        executions: Vec<TradeExecution>,
        snapshots: Vec<PortfolioSnapshot>,
    ) -> EngineResult<Self> {
        let mut executions = executions;
        executions.sort_by_key(|e| e.timestamp());

        let book = FifoBook::replay(&executions)?;
        let base_balance: Decimal = executions.iter().map(|e| e.base_delta()).sum();
        let quote_balance = starting_quote + executions.iter().map(|e| e.quote_delta()).sum::<Decimal>();

        if quote_balance < Decimal::ZERO {
            return Err(EngineError::validation(format!(
                "execution log implies negative quote balance {quote_balance}"
            )));
        }

        if let Some(last) = snapshots.last() {
            if last.base_balance() != base_balance || last.quote_balance() != quote_balance {
                warn!(
                    snapshot_base = %last.base_balance(),
                    snapshot_quote = %last.quote_balance(),
                    log_base = %base_balance,
                    log_quote = %quote_balance,
                    "Latest snapshot disagrees with execution log, using log balances"
                );
            }
        }

        Ok(Self {
            executions,
            base_balance,
            quote_balance,
            book,
            snapshots,
        })
    }

    pub fn base_balance(&self) -> Decimal {
        self.base_balance
    }

    pub fn quote_balance(&self) -> Decimal {
        self.quote_balance
    }

    pub fn executions(&self) -> &[TradeExecution] {
        &self.executions
    }

    pub fn pairs(&self) -> &[TradePair] {
        self.book.pairs()
    }

    pub fn snapshots(&self) -> &[PortfolioSnapshot] {
        &self.snapshots
    }

    pub fn latest_snapshot(&self) -> Option<&PortfolioSnapshot> {
        self.snapshots.last()
    }

    /// Value of the current balances at `price`.
    pub fn value_at(&self, price: Decimal) -> Decimal {
        self.quote_balance + self.base_balance * price
    }

    /// Validate a decision and compute its effects without mutating.
    pub fn stage(
        &self,
        decision: &Decision,
        now: DateTime<Utc>,
        fee_rate: Decimal,
    ) -> EngineResult<StagedCommit> {
        if decision.price <= Decimal::ZERO {
            return Err(EngineError::validation(format!(
                "cannot value portfolio at price {}",
                decision.price
            )));
        }
        if let Some(last) = self.snapshots.last() {
            if now < last.timestamp() {
                return Err(EngineError::validation(format!(
                    "snapshot at {now} would precede latest snapshot at {}",
                    last.timestamp()
                )));
            }
        }

        let (side, quantity) = match decision.action {
            Action::Hold => {
                return Ok(StagedCommit {
                    execution: None,
                    pairs: Vec::new(),
                    snapshot: PortfolioSnapshot::new(now, self.base_balance, self.quote_balance, decision.price),
                    lots_after_sell: None,
                    staged_at_len: self.executions.len(),
                });
            }
            Action::Buy => (TradeSide::Buy, decision.quantity),
            Action::Sell => (TradeSide::Sell, decision.quantity),
        };

        let fee = quantity * decision.price * fee_rate;
        let execution = TradeExecution::new(now, side, quantity, decision.price, fee)?;

        let mut pairs = Vec::new();
        let mut lots_after_sell = None;
        match side {
            TradeSide::Buy => {
                let required = execution.notional() + execution.fee();
                if required > self.quote_balance {
                    return Err(EngineError::InsufficientFunds {
                        required,
                        available: self.quote_balance,
                    });
                }
            }
            TradeSide::Sell => {
                if quantity > self.base_balance {
                    return Err(EngineError::InsufficientHoldings {
                        requested: quantity,
                        available: self.base_balance,
                    });
                }
                let (matched, lots) = match_sell(&execution, self.book.lots())?;
                pairs = matched;
                lots_after_sell = Some(lots);
            }
        }

        let snapshot = PortfolioSnapshot::new(
            now,
            self.base_balance + execution.base_delta(),
            self.quote_balance + execution.quote_delta(),
            decision.price,
        );

        Ok(StagedCommit {
            execution: Some(execution),
            pairs,
            snapshot,
            lots_after_sell,
            staged_at_len: self.executions.len(),
        })
    }

    /// Apply a staged result. Fails if the ledger changed since staging.
    pub fn commit(&mut self, staged: StagedCommit) -> EngineResult<&PortfolioSnapshot> {
        if staged.staged_at_len != self.executions.len() {
            return Err(EngineError::ConcurrencyViolation(format!(
                "commit staged against {} executions but ledger has {}",
                staged.staged_at_len,
                self.executions.len()
            )));
        }

        if let Some(execution) = staged.execution {
            match execution.side() {
                TradeSide::Buy => self.book.apply_buy(&execution),
                TradeSide::Sell => {
                    let lots = staged.lots_after_sell.unwrap_or_else(|| self.book.lots().clone());
                    self.book.apply_match(lots, &staged.pairs);
                }
            }
            debug!(
                id = %execution.id(),
                side = execution.side().as_str(),
                quantity = %execution.quantity(),
                price = %execution.price(),
                pairs = staged.pairs.len(),
                "Execution committed"
            );
            self.executions.push(execution);
        }

        self.base_balance = staged.snapshot.base_balance();
        self.quote_balance = staged.snapshot.quote_balance();
        self.snapshots.push(staged.snapshot);

        // Safe: just pushed.
        Ok(&self.snapshots[self.snapshots.len() - 1])
    }

    /// Owned copy of committed data for concurrent reporting.
    pub fn report_view(&self) -> LedgerView {
        LedgerView {
            execution_count: self.executions.len(),
            base_balance: self.base_balance,
            quote_balance: self.quote_balance,
            lots: self.book.lots().clone(),
            pairs: self.book.pairs().to_vec(),
            snapshots: self.snapshots.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    use crate::models::Urgency;

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn decision(action: Action, quantity: Decimal, price: Decimal) -> Decision {
        Decision {
            action,
            quantity,
            price,
            confidence: 60.0,
            reasoning: "test".to_string(),
            urgency: Urgency::Low,
            market_score: 0.5,
            executed: false,
        }
    }

    fn mark(ledger: &mut PositionLedger, minute: i64, price: Decimal) -> PortfolioSnapshot {
        let hold = Decision::hold(price, 0.0, Urgency::Low, 0.5, String::new());
        let staged = ledger.stage(&hold, t(minute), Decimal::ZERO).unwrap();
        ledger.commit(staged).unwrap().clone()
    }

    fn commit(ledger: &mut PositionLedger, d: Decision, minute: i64, fee_rate: Decimal) {
        let staged = ledger.stage(&d, t(minute), fee_rate).unwrap();
        ledger.commit(staged).unwrap();
    }

    #[test]
    fn test_buy_then_sell_updates_balances() {
        let mut ledger = PositionLedger::new(dec!(1000));
        commit(&mut ledger, decision(Action::Buy, dec!(2), dec!(100)), 0, dec!(0.01));
        assert_eq!(ledger.base_balance(), dec!(2));
        assert_eq!(ledger.quote_balance(), dec!(798));
        assert_eq!(ledger.report_view().lots.len(), 1);

        commit(&mut ledger, decision(Action::Sell, dec!(1), dec!(150)), 1, dec!(0.01));
        assert_eq!(ledger.base_balance(), dec!(1));
        assert_eq!(ledger.quote_balance(), dec!(946.5));
        assert_eq!(ledger.pairs().len(), 1);
        // 1 * 50 - 1.5 sell fee - 1 buy fee share
        assert_eq!(ledger.pairs()[0].net_profit, dec!(47.5));

        let snap = ledger.latest_snapshot().unwrap();
        assert_eq!(snap.total_value(), snap.quote_balance() + snap.base_balance() * dec!(150));
        assert_eq!(ledger.executions().len(), 2);
    }

    #[test]
    fn test_insufficient_funds_leaves_ledger_unchanged() {
        let ledger = PositionLedger::new(dec!(100));
        let err = ledger
            .stage(&decision(Action::Buy, dec!(1), dec!(100)), t(0), dec!(0.001))
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        assert_eq!(ledger.quote_balance(), dec!(100));
        assert!(ledger.snapshots().is_empty());
    }

    #[test]
    fn test_insufficient_holdings() {
        let mut ledger = PositionLedger::new(dec!(1000));
        commit(&mut ledger, decision(Action::Buy, dec!(1), dec!(100)), 0, Decimal::ZERO);
        let err = ledger
            .stage(&decision(Action::Sell, dec!(2), dec!(100)), t(1), Decimal::ZERO)
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::InsufficientHoldings {
                requested: dec!(2),
                available: dec!(1),
            }
        );
        assert_eq!(ledger.base_balance(), dec!(1));
    }

    #[test]
    fn test_hold_records_snapshot_only() {
        let mut ledger = PositionLedger::new(dec!(500));
        let hold = Decision::hold(dec!(42), 50.0, Urgency::Medium, 0.5, "wait".to_string());
        let staged = ledger.stage(&hold, t(0), dec!(0.001)).unwrap();
        assert!(staged.execution.is_none());
        ledger.commit(staged).unwrap();
        let snap = mark(&mut ledger, 1, dec!(43));
        assert_eq!(snap.total_value(), dec!(500));
        assert_eq!(ledger.snapshots().len(), 2);
        assert!(ledger.executions().is_empty());
    }

    #[test]
    fn test_stale_stage_rejected() {
        let mut ledger = PositionLedger::new(dec!(1000));
        let first = ledger.stage(&decision(Action::Buy, dec!(1), dec!(100)), t(0), Decimal::ZERO).unwrap();
        let second = ledger.stage(&decision(Action::Buy, dec!(1), dec!(100)), t(0), Decimal::ZERO).unwrap();
        ledger.commit(first).unwrap();
        assert!(matches!(
            ledger.commit(second),
            Err(EngineError::ConcurrencyViolation(_))
        ));
        assert_eq!(ledger.executions().len(), 1);
    }

    #[test]
    fn test_snapshots_must_not_go_backwards() {
        let mut ledger = PositionLedger::new(dec!(1000));
        mark(&mut ledger, 5, dec!(100));
        let hold = Decision::hold(dec!(100), 0.0, Urgency::Low, 0.5, String::new());
        assert!(ledger.stage(&hold, t(4), Decimal::ZERO).is_err());
    }

    #[test]
    fn test_restore_from_log() {
        let mut ledger = PositionLedger::new(dec!(1000));
        commit(&mut ledger, decision(Action::Buy, dec!(2), dec!(100)), 0, dec!(0.01));
        commit(&mut ledger, decision(Action::Sell, dec!(0.5), dec!(120)), 1, dec!(0.01));

        let restored = PositionLedger::restore(
            dec!(1000),
            ledger.executions().to_vec(),
            ledger.snapshots().to_vec(),
        )
        .unwrap();

        assert_eq!(restored.base_balance(), ledger.base_balance());
        assert_eq!(restored.quote_balance(), ledger.quote_balance());
        assert_eq!(restored.report_view().lots, ledger.report_view().lots);
        assert_eq!(restored.pairs(), ledger.pairs());
    }

    #[test]
    fn test_report_view_is_detached() {
        let mut ledger = PositionLedger::new(dec!(1000));
        commit(&mut ledger, decision(Action::Buy, dec!(1), dec!(100)), 0, Decimal::ZERO);
        let view = ledger.report_view();
        commit(&mut ledger, decision(Action::Sell, dec!(1), dec!(110)), 1, Decimal::ZERO);

        assert_eq!(view.execution_count, 1);
        assert_eq!(view.lots.len(), 1);
        let report = view.report(dec!(110), 0.0);
        assert_eq!(report.unrealized_pnl, dec!(10));
        assert_eq!(report.closed_pairs, 0);
    }
}
