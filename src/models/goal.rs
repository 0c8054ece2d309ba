//! Weekly performance goal.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Length of one goal period.
pub fn goal_period() -> Duration {
    Duration::days(7)
}

/// Rolling weekly return target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalState {
    /// Portfolio value when the current week started
    pub starting_value: Decimal,

    /// Target return for the week as a fraction (0.05 = 5%)
    pub weekly_target_return: f64,

    /// When the current week started
    pub week_start: DateTime<Utc>,
}

impl GoalState {
    pub fn new(starting_value: Decimal, weekly_target_return: f64, week_start: DateTime<Utc>) -> Self {
        Self {
            starting_value,
            weekly_target_return,
            week_start,
        }
    }

    pub fn week_end(&self) -> DateTime<Utc> {
        self.week_start + goal_period()
    }

    /// Start a new week from the given value.
    pub fn roll_over(&mut self, now: DateTime<Utc>, current_value: Decimal) {
        self.week_start = now;
        self.starting_value = current_value;
    }
}
