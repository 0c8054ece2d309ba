//! Trade accounting: FIFO lot matching and risk metrics.

mod calculator;
mod matcher;

pub use calculator::{per_period_risk_free, win_rate, PerformanceReport};
pub use matcher::{match_sell, FifoBook};
