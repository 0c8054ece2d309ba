//! Data models for executions, lots, snapshots, goals, signals and decisions.

mod decision;
mod goal;
mod lot;
mod signal;
mod snapshot;
mod trade;

pub use decision::{Action, Decision, DecisionRecord, Urgency};
pub use goal::{goal_period, GoalState};
pub use lot::{Lot, TradePair};
pub use signal::{MarketSignal, SignalFactor};
pub use snapshot::PortfolioSnapshot;
pub use trade::{TradeExecution, TradeSide};
