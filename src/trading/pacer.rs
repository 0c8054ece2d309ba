//! Goal pacing: how far along the weekly target the portfolio should be by now.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::info;

use crate::models::{goal_period, GoalState, Urgency};

use super::PacingConfig;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Pacing evaluation for one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct PacingStatus {
    /// Fraction of the week elapsed, clamped to [0, 1]
    pub elapsed_fraction: f64,

    pub days_remaining: f64,

    /// Return the portfolio should have made by now
    pub expected_return: f64,

    /// Return actually made since the week started
    pub actual_return: f64,

    /// Portfolio value matching `expected_return`
    pub expected_value: Decimal,

    /// Portfolio value at the end of the week if the target is hit
    pub target_value: Decimal,

    pub current_value: Decimal,

    pub is_on_track: bool,

    pub urgency: Urgency,

    /// True when this evaluation started a new week
    pub rolled_over: bool,
}

impl PacingStatus {
    /// One-line summary used in decision reasoning.
    pub fn summary(&self) -> String {
        format!(
            "{} goal: actual {:+.2}% vs expected {:+.2}% ({:.1} days left, urgency {})",
            if self.is_on_track { "on track for" } else { "behind" },
            self.actual_return * 100.0,
            self.expected_return * 100.0,
            self.days_remaining,
            self.urgency
        )
    }
}

/// Tracks progress against a rolling weekly return target.
#[derive(Debug, Clone, Default)]
pub struct GoalPacer {
    config: PacingConfig,
}

impl GoalPacer {
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }

    /// Evaluate pacing at `now`, rolling the week over first when 7 days
    /// have passed since it started.
    pub fn evaluate(
        &self,
        state: &mut GoalState,
        now: DateTime<Utc>,
        current_value: Decimal,
    ) -> PacingStatus {
        let mut rolled_over = false;
        if now - state.week_start >= goal_period() {
            info!(
                previous_start = %state.week_start,
                starting_value = %current_value,
                "Goal week rolled over"
            );
            state.roll_over(now, current_value);
            rolled_over = true;
        }

        let mut status = self.status(state, now, current_value);
        status.rolled_over = rolled_over;
        status
    }

    /// Pure evaluation against a state that is not rolled over.
    pub fn status(&self, state: &GoalState, now: DateTime<Utc>, current_value: Decimal) -> PacingStatus {
        let period_secs = goal_period().num_seconds() as f64;
        let elapsed_secs = (now - state.week_start).num_milliseconds() as f64 / 1000.0;

        let days_remaining = ((period_secs - elapsed_secs) / SECONDS_PER_DAY).max(0.0);
        let elapsed_fraction = if days_remaining <= 0.0 {
            1.0
        } else {
            (elapsed_secs / period_secs).clamp(0.0, 1.0)
        };

        let expected_return = state.weekly_target_return * elapsed_fraction;
        let actual_return = if state.starting_value > Decimal::ZERO {
            ((current_value - state.starting_value) / state.starting_value)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };
        let is_on_track = actual_return >= expected_return;

        let urgency = if days_remaining <= self.config.high_urgency_days && !is_on_track {
            Urgency::High
        } else if days_remaining <= self.config.medium_urgency_days {
            Urgency::Medium
        } else {
            Urgency::Low
        };

        let scale = |r: f64| Decimal::try_from(1.0 + r).unwrap_or(Decimal::ONE);

        PacingStatus {
            elapsed_fraction,
            days_remaining,
            expected_return,
            actual_return,
            expected_value: state.starting_value * scale(expected_return),
            target_value: state.starting_value * scale(state.weekly_target_return),
            current_value,
            is_on_track,
            urgency,
            rolled_over: false,
        }
    }
}
