//! Risk and performance metrics: cost basis, win rate, Sharpe ratio, drawdown.
//!
//! Every function here is pure over its inputs and never returns NaN or
//! infinity; degenerate inputs produce 0.

use std::collections::VecDeque;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use statrs::statistics::Statistics;

use crate::models::{Lot, PortfolioSnapshot, TradePair};

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 60.0 * 60.0;

/// Average cost per open unit, including the buy fees still attached to the
/// open remainder. Returns 0 with no open quantity.
pub fn cost_basis(lots: &VecDeque<Lot>) -> Decimal {
    let quantity: Decimal = lots.iter().map(|l| l.remaining_quantity).sum();
    if quantity <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let cost: Decimal = lots
        .iter()
        .map(|l| l.origin_price * l.remaining_quantity + l.unspent_fee())
        .sum();
    cost / quantity
}

/// Fraction of pairs that made money. 0 when there are no pairs.
pub fn win_rate(pairs: &[TradePair]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    let wins = pairs.iter().filter(|p| p.is_win()).count();
    wins as f64 / pairs.len() as f64
}

/// (mean − rf) / sample standard deviation of the given per-period returns.
///
/// Returns 0 with fewer than two observations or zero dispersion.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    if returns.len() < 2 || returns.iter().any(|r| !r.is_finite()) {
        return 0.0;
    }

    let mean = returns.mean();
    let std_dev = returns.std_dev();
    if !std_dev.is_finite() || std_dev <= f64::EPSILON {
        return 0.0;
    }

    let sharpe = (mean - risk_free_rate) / std_dev;
    if sharpe.is_finite() {
        sharpe
    } else {
        0.0
    }
}

/// Largest peak-to-trough decline as a percentage of the running peak.
pub fn max_drawdown(snapshots: &[PortfolioSnapshot]) -> f64 {
    let Some(first) = snapshots.first() else {
        return 0.0;
    };

    let mut peak = first.total_value();
    let mut max_dd = 0.0_f64;

    for snap in snapshots {
        let value = snap.total_value();
        if value > peak {
            peak = value;
            continue;
        }
        if peak > Decimal::ZERO {
            let dd = ((peak - value) / peak).to_f64().unwrap_or(0.0);
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    max_dd * 100.0
}

/// Sum of net profit over realized pairs.
pub fn realized_pnl(pairs: &[TradePair]) -> Decimal {
    pairs.iter().map(|p| p.net_profit).sum()
}

/// Mark-to-market P&L of the open lots at `price`.
pub fn unrealized_pnl(lots: &VecDeque<Lot>, price: Decimal) -> Decimal {
    lots.iter().map(|l| l.unrealized_pnl(price)).sum()
}

/// Simple returns between consecutive snapshots. Steps whose previous value is
/// not positive are skipped.
pub fn period_returns(snapshots: &[PortfolioSnapshot]) -> Vec<f64> {
    snapshots
        .windows(2)
        .filter_map(|w| {
            let prev = w[0].total_value();
            let curr = w[1].total_value();
            if prev <= Decimal::ZERO {
                return None;
            }
            ((curr - prev) / prev).to_f64()
        })
        .collect()
}

/// De-annualize a risk-free rate to one decision interval (compounded).
pub fn per_period_risk_free(annual_rate: f64, interval: Duration) -> f64 {
    let secs = interval.as_secs_f64();
    if secs <= 0.0 || !annual_rate.is_finite() || annual_rate <= -1.0 {
        return 0.0;
    }
    (1.0 + annual_rate).powf(secs / SECONDS_PER_YEAR) - 1.0
}

/// Point-in-time performance summary for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub total_trades: usize,
    pub closed_pairs: usize,
    pub winning_pairs: usize,
    pub losing_pairs: usize,
    pub win_rate: f64,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub cost_basis: Decimal,
    pub open_quantity: Decimal,
    pub sharpe_ratio: f64,
    /// Percentage (6.5 = 6.5%)
    pub max_drawdown: f64,
    /// Fraction relative to the first snapshot
    pub total_return: f64,
    pub current_value: Decimal,
}

impl PerformanceReport {
    /// Compute the report from already-committed data.
    pub fn compute(
        execution_count: usize,
        lots: &VecDeque<Lot>,
        pairs: &[TradePair],
        snapshots: &[PortfolioSnapshot],
        price: Decimal,
        period_risk_free: f64,
    ) -> Self {
        let winning_pairs = pairs.iter().filter(|p| p.is_win()).count();
        let losing_pairs = pairs.iter().filter(|p| p.net_profit < Decimal::ZERO).count();

        let returns = period_returns(snapshots);

        let current_value = snapshots
            .last()
            .map(|s| s.total_value())
            .unwrap_or(Decimal::ZERO);
        let total_return = match snapshots.first() {
            Some(first) if first.total_value() > Decimal::ZERO => {
                ((current_value - first.total_value()) / first.total_value())
                    .to_f64()
                    .unwrap_or(0.0)
            }
            _ => 0.0,
        };

        Self {
            total_trades: execution_count,
            closed_pairs: pairs.len(),
            winning_pairs,
            losing_pairs,
            win_rate: win_rate(pairs),
            realized_pnl: realized_pnl(pairs),
            unrealized_pnl: unrealized_pnl(lots, price),
            cost_basis: cost_basis(lots),
            open_quantity: lots.iter().map(|l| l.remaining_quantity).sum(),
            sharpe_ratio: sharpe_ratio(&returns, period_risk_free),
            max_drawdown: max_drawdown(snapshots),
            total_return,
            current_value,
        }
    }
}

impl std::fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Performance ===")?;
        writeln!(f, "Portfolio Value: ${:.2}", self.current_value)?;
        writeln!(f, "Total Return:    {:.2}%", self.total_return * 100.0)?;
        writeln!(f, "Executions:      {}", self.total_trades)?;
        writeln!(f, "Closed Pairs:    {} (Won: {}, Lost: {})",
            self.closed_pairs, self.winning_pairs, self.losing_pairs)?;
        writeln!(f, "Win Rate:        {:.1}%", self.win_rate * 100.0)?;
        writeln!(f, "Realized P&L:    ${:.2}", self.realized_pnl)?;
        writeln!(f, "Unrealized P&L:  ${:.2}", self.unrealized_pnl)?;
        writeln!(f, "Open Quantity:   {:.8}", self.open_quantity)?;
        writeln!(f, "Cost Basis:      ${:.4}", self.cost_basis)?;
        writeln!(f, "Sharpe Ratio:    {:.3}", self.sharpe_ratio)?;
        writeln!(f, "Max Drawdown:    {:.2}%", self.max_drawdown)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    use crate::metrics::FifoBook;
    use crate::models::{TradeExecution, TradeSide};

    fn snapshots(values: &[Decimal]) -> Vec<PortfolioSnapshot> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                PortfolioSnapshot::new(start + ChronoDuration::hours(i as i64), Decimal::ZERO, *v, dec!(1))
            })
            .collect()
    }

    fn pair(net_profit: Decimal) -> TradePair {
        let ts = Utc::now();
        TradePair {
            sell_execution_id: "s".to_string(),
            buy_execution_id: "b".to_string(),
            matched_quantity: dec!(1),
            buy_price: dec!(100),
            sell_price: dec!(100) + net_profit,
            apportioned_buy_fee: Decimal::ZERO,
            apportioned_sell_fee: Decimal::ZERO,
            net_profit,
            opened_at: ts,
            closed_at: ts,
        }
    }

    #[test]
    fn test_empty_inputs_are_zero() {
        assert_eq!(cost_basis(&VecDeque::new()), Decimal::ZERO);
        assert_eq!(win_rate(&[]), 0.0);
        assert_eq!(sharpe_ratio(&[], 0.0), 0.0);
        assert_eq!(sharpe_ratio(&[0.01], 0.0), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);

        let report = PerformanceReport::compute(0, &VecDeque::new(), &[], &[], dec!(100), 0.0);
        assert_eq!(report.win_rate, 0.0);
        assert_eq!(report.sharpe_ratio, 0.0);
        assert_eq!(report.max_drawdown, 0.0);
        assert_eq!(report.total_return, 0.0);
        assert_eq!(report.cost_basis, Decimal::ZERO);
    }

    #[test]
    fn test_max_drawdown_scenario() {
        let series = snapshots(&[dec!(10000), dec!(10500), dec!(9800), dec!(10200)]);
        let dd = max_drawdown(&series);
        assert!((dd - 700.0 / 10500.0 * 100.0).abs() < 1e-9);
        assert!((dd - 6.67).abs() < 0.01);
    }

    #[test]
    fn test_max_drawdown_non_decreasing() {
        let series = snapshots(&[dec!(100), dec!(100), dec!(101), dec!(150)]);
        assert_eq!(max_drawdown(&series), 0.0);
    }

    #[test]
    fn test_win_rate() {
        let pairs = vec![pair(dec!(5)), pair(dec!(-3)), pair(dec!(0)), pair(dec!(1))];
        assert!((win_rate(&pairs) - 0.5).abs() < 1e-12);
        assert_eq!(realized_pnl(&pairs), dec!(3));
    }

    #[test]
    fn test_sharpe_ratio() {
        let returns = [0.01, 0.02, 0.03];
        // mean 0.02, sample std dev 0.01
        assert!((sharpe_ratio(&returns, 0.0) - 2.0).abs() < 1e-9);
        assert!((sharpe_ratio(&returns, 0.01) - 1.0).abs() < 1e-9);

        // No dispersion
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01], 0.0), 0.0);
    }

    #[test]
    fn test_cost_basis_includes_unspent_fees() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let buy1 = TradeExecution::new(t0, TradeSide::Buy, dec!(1), dec!(100), dec!(1)).unwrap();
        let buy2 = TradeExecution::new(t0 + ChronoDuration::minutes(1), TradeSide::Buy, dec!(1), dec!(120), dec!(1)).unwrap();
        let sell = TradeExecution::new(t0 + ChronoDuration::minutes(2), TradeSide::Sell, dec!(1.5), dec!(150), dec!(2)).unwrap();

        let book = FifoBook::replay([&buy1, &buy2, &sell]).unwrap();
        // Remaining 0.5 @ 120 carrying half of its 1.0 fee: (60 + 0.5) / 0.5
        assert_eq!(cost_basis(book.lots()), dec!(121));
        // 0.5 * (130 - 120) - 0.5
        assert_eq!(unrealized_pnl(book.lots(), dec!(130)), dec!(4.5));
    }

    #[test]
    fn test_metrics_are_repeatable() {
        let series = snapshots(&[dec!(100), dec!(90), dec!(120), dec!(80), dec!(130)]);
        let returns = period_returns(&series);
        let first = (max_drawdown(&series), sharpe_ratio(&returns, 0.0));
        let second = (max_drawdown(&series), sharpe_ratio(&returns, 0.0));
        assert_eq!(first, second);
        assert_eq!(returns.len(), 4);
    }

    #[test]
    fn test_per_period_risk_free() {
        assert_eq!(per_period_risk_free(0.05, Duration::ZERO), 0.0);
        let yearly = per_period_risk_free(0.05, Duration::from_secs(SECONDS_PER_YEAR as u64));
        assert!((yearly - 0.05).abs() < 1e-9);
        let hourly = per_period_risk_free(0.05, Duration::from_secs(3600));
        assert!(hourly > 0.0 && hourly < 0.0001);
    }
}
