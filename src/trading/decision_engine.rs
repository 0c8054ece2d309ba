//! Decision engine: combines goal pacing and market score into one action.
//!
//! Selection is a fixed table keyed by (on track, urgency, market bucket).
//! Each row names the action, a confidence and the fraction of the relevant
//! balance to trade. Sizing is then capped, reserve-adjusted and filtered
//! against the minimum trade notional.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use tracing::debug;

use crate::models::{Action, Decision, MarketSignal, Urgency};

use super::{AgentState, PacingStatus, TradingConfig};

/// Base-unit precision for sized quantities.
const QUANTITY_DP: u32 = 8;

// Sizing fractions of the relevant balance.
const SIZE_NONE: Decimal = dec!(0);
const SIZE_SMALL: Decimal = dec!(0.10);
const SIZE_NUDGE: Decimal = dec!(0.15);
const SIZE_MODERATE: Decimal = dec!(0.20);
const SIZE_LARGE: Decimal = dec!(0.30);
const SIZE_MAX: Decimal = dec!(0.50);

// Confidence levels.
const CONF_LOW: f64 = 50.0;
const CONF_FAIR: f64 = 55.0;
const CONF_MODERATE: f64 = 60.0;
const CONF_GOOD: f64 = 65.0;
const CONF_HIGH: f64 = 70.0;
const CONF_STRONG: f64 = 75.0;
const CONF_VERY_STRONG: f64 = 85.0;

/// Which side of neutral the market score falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScoreBucket {
    Bearish,
    Neutral,
    Bullish,
}

impl ScoreBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreBucket::Bearish => "bearish",
            ScoreBucket::Neutral => "neutral",
            ScoreBucket::Bullish => "bullish",
        }
    }
}

/// One row of the decision table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rule {
    pub label: &'static str,
    pub action: Action,
    pub confidence: f64,
    pub sizing_fraction: Decimal,
}

impl Rule {
    const fn new(label: &'static str, action: Action, confidence: f64, sizing_fraction: Decimal) -> Self {
        Self {
            label,
            action,
            confidence,
            sizing_fraction,
        }
    }
}

/// Everything the engine looks at for one decision.
#[derive(Debug, Clone)]
pub struct DecisionInput<'a> {
    pub pacing: &'a PacingStatus,
    pub signal: &'a MarketSignal,
    pub price: Decimal,
    pub base_balance: Decimal,
    pub quote_balance: Decimal,
}

/// Stateless multi-factor decision function.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    config: TradingConfig,
}

impl DecisionEngine {
    pub fn new(config: TradingConfig) -> Self {
        Self { config }
    }

    /// Bucket a composite score using the configured boundaries.
    pub fn bucket(&self, market_score: f64) -> ScoreBucket {
        if market_score < self.config.decision.bearish_below {
            ScoreBucket::Bearish
        } else if market_score > self.config.decision.bullish_above {
            ScoreBucket::Bullish
        } else {
            ScoreBucket::Neutral
        }
    }

    /// The decision table.
    pub fn rule_for(on_track: bool, urgency: Urgency, bucket: ScoreBucket) -> Rule {
        use Action::{Buy, Hold, Sell};
        use ScoreBucket::{Bearish, Bullish, Neutral};

        match (on_track, urgency, bucket) {
            // Ahead of pace: protect the lead whatever the urgency.
            (true, _, Bullish) => Rule::new("press-lead", Buy, CONF_MODERATE, SIZE_SMALL),
            (true, _, Neutral) => Rule::new("protect-lead", Hold, CONF_MODERATE, SIZE_NONE),
            (true, _, Bearish) => Rule::new("lock-in-gains", Sell, CONF_HIGH, SIZE_MAX),

            (false, Urgency::High, Bullish) => Rule::new("catch-up-strong", Buy, CONF_VERY_STRONG, SIZE_MAX),
            (false, Urgency::High, Neutral) => Rule::new("catch-up", Buy, CONF_GOOD, SIZE_LARGE),
            (false, Urgency::High, Bearish) => Rule::new("wait-out-weakness", Hold, CONF_FAIR, SIZE_NONE),

            (false, Urgency::Medium, Bullish) => Rule::new("accelerate", Buy, CONF_STRONG, SIZE_LARGE),
            (false, Urgency::Medium, Neutral) => Rule::new("nudge", Buy, CONF_FAIR, SIZE_NUDGE),
            (false, Urgency::Medium, Bearish) => Rule::new("stand-aside", Hold, CONF_LOW, SIZE_NONE),

            (false, Urgency::Low, Bullish) => Rule::new("early-entry", Buy, CONF_GOOD, SIZE_MODERATE),
            (false, Urgency::Low, Neutral) => Rule::new("wait", Hold, CONF_LOW, SIZE_NONE),
            (false, Urgency::Low, Bearish) => Rule::new("trim-weakness", Sell, CONF_FAIR, SIZE_MODERATE),
        }
    }

    /// Produce exactly one decision. Never fails: unusable inputs yield HOLD.
    pub fn decide(&self, input: &DecisionInput<'_>, agent: &AgentState) -> Decision {
        let pacing = input.pacing;
        let market_score = input.signal.market_score();
        let bucket = self.bucket(market_score);
        let rule = Self::rule_for(pacing.is_on_track, pacing.urgency, bucket);

        let mut reasoning = format!(
            "{}; market score {:.3} ({}); rule {}",
            pacing.summary(),
            market_score,
            bucket.as_str(),
            rule.label
        );

        if input.price <= Decimal::ZERO {
            reasoning.push_str(&format!("; no valid price ({})", input.price));
            return Decision::hold(input.price, rule.confidence, pacing.urgency, market_score, reasoning);
        }

        if rule.action == Action::Hold {
            return Decision::hold(input.price, rule.confidence, pacing.urgency, market_score, reasoning);
        }

        let autonomy = Decimal::try_from(agent.autonomy).unwrap_or(Decimal::ONE);
        let fraction = (rule.sizing_fraction * autonomy).min(self.config.max_position_fraction);
        let quantity = self.size(rule.action, fraction, input);

        reasoning.push_str(&format!(
            ": {} {:.0}% of {} (autonomy {:.2})",
            rule.action,
            fraction * dec!(100),
            if rule.action == Action::Buy { "spendable quote" } else { "base holdings" },
            agent.autonomy
        ));

        let notional = quantity * input.price;
        if quantity <= Decimal::ZERO || notional < self.config.minimum_trade_notional {
            reasoning.push_str(&format!(
                "; minimum notional filter: {:.2} < {}",
                notional, self.config.minimum_trade_notional
            ));
            debug!(
                rule = rule.label,
                notional = %notional,
                minimum = %self.config.minimum_trade_notional,
                "Decision suppressed below minimum notional"
            );
            return Decision::hold(input.price, rule.confidence, pacing.urgency, market_score, reasoning);
        }

        Decision {
            action: rule.action,
            quantity,
            price: input.price,
            confidence: rule.confidence,
            reasoning,
            urgency: pacing.urgency,
            market_score,
            executed: false,
        }
    }

    /// Base units to trade for `fraction` of the relevant balance.
    fn size(&self, action: Action, fraction: Decimal, input: &DecisionInput<'_>) -> Decimal {
        let raw = match action {
            Action::Buy => {
                let total_value = input.quote_balance + input.base_balance * input.price;
                let reserve = total_value * self.config.min_cash_reserve_fraction;
                let spendable = (input.quote_balance - reserve).max(Decimal::ZERO);
                let budget = spendable * fraction;
                budget / (input.price * (Decimal::ONE + self.config.fee_rate))
            }
            Action::Sell => input.base_balance.max(Decimal::ZERO) * fraction,
            Action::Hold => Decimal::ZERO,
        };
        raw.round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::ToZero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pacing(on_track: bool, urgency: Urgency) -> PacingStatus {
        PacingStatus {
            elapsed_fraction: 0.5,
            days_remaining: 3.5,
            expected_return: 0.025,
            actual_return: if on_track { 0.03 } else { 0.01 },
            expected_value: dec!(10250),
            target_value: dec!(10500),
            current_value: dec!(10100),
            is_on_track: on_track,
            urgency,
            rolled_over: false,
        }
    }

    fn signal(score_hint: f64) -> MarketSignal {
        // Every normalized factor equal to `score_hint`.
        MarketSignal::new(score_hint * 2.0 - 1.0, score_hint * 100.0, score_hint, score_hint, Utc::now()).unwrap()
    }

    fn full_autonomy() -> AgentState {
        AgentState::from_reputation(0, 100.0)
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(TradingConfig::default())
    }

    #[test]
    fn test_buckets() {
        let engine = engine();
        assert_eq!(engine.bucket(0.2), ScoreBucket::Bearish);
        assert_eq!(engine.bucket(0.4), ScoreBucket::Neutral);
        assert_eq!(engine.bucket(0.6), ScoreBucket::Neutral);
        assert_eq!(engine.bucket(0.61), ScoreBucket::Bullish);
    }

    #[test]
    fn test_behind_and_bullish_buys_capped() {
        let engine = engine();
        let pacing = pacing(false, Urgency::High);
        let signal = signal(0.8);
        let input = DecisionInput {
            pacing: &pacing,
            signal: &signal,
            price: dec!(100),
            base_balance: Decimal::ZERO,
            quote_balance: dec!(10000),
        };

        let decision = engine.decide(&input, &full_autonomy());
        assert_eq!(decision.action, Action::Buy);
        assert_eq!(decision.confidence, CONF_VERY_STRONG);
        assert_eq!(decision.urgency, Urgency::High);
        // 50% row capped to 25% of (10000 - 1000 reserve) = 2250, over price incl. fee
        let expected = (dec!(2250) / (dec!(100) * dec!(1.001)))
            .round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::ToZero);
        assert_eq!(decision.quantity, expected);
        assert!(decision.reasoning.contains("behind goal"));
        assert!(decision.reasoning.contains("bullish"));
        assert!(decision.reasoning.contains("catch-up-strong"));
        assert!(!decision.executed);
    }

    #[test]
    fn test_on_track_bearish_sells() {
        let engine = engine();
        let pacing = pacing(true, Urgency::Low);
        let signal = signal(0.2);
        let input = DecisionInput {
            pacing: &pacing,
            signal: &signal,
            price: dec!(100),
            base_balance: dec!(4),
            quote_balance: dec!(6000),
        };

        let decision = engine.decide(&input, &full_autonomy());
        assert_eq!(decision.action, Action::Sell);
        assert_eq!(decision.quantity, dec!(1));
        assert!(decision.reasoning.contains("on track"));
        assert!(decision.reasoning.contains("lock-in-gains"));
    }

    #[test]
    fn test_autonomy_scales_size() {
        let engine = engine();
        let pacing = pacing(false, Urgency::Low);
        let signal = signal(0.2);
        let input = DecisionInput {
            pacing: &pacing,
            signal: &signal,
            price: dec!(100),
            base_balance: dec!(10),
            quote_balance: dec!(0),
        };

        let low = AgentState::from_reputation(0, 0.0);
        let decision = engine.decide(&input, &low);
        assert_eq!(decision.action, Action::Sell);
        // 20% * 0.25 autonomy = 5% of 10
        assert_eq!(decision.quantity, dec!(0.5));
    }

    #[test]
    fn test_minimum_notional_forces_hold() {
        let engine = engine();
        let pacing = pacing(false, Urgency::High);
        let signal = signal(0.8);
        let input = DecisionInput {
            pacing: &pacing,
            signal: &signal,
            price: dec!(100),
            base_balance: Decimal::ZERO,
            quote_balance: dec!(30),
        };

        let decision = engine.decide(&input, &full_autonomy());
        assert_eq!(decision.action, Action::Hold);
        assert_eq!(decision.quantity, Decimal::ZERO);
        assert!(decision.reasoning.contains("minimum notional filter"));
    }

    #[test]
    fn test_neutral_signal_hold() {
        let engine = engine();
        let pacing = pacing(false, Urgency::Low);
        let signal = MarketSignal::neutral(Utc::now());
        let input = DecisionInput {
            pacing: &pacing,
            signal: &signal,
            price: dec!(100),
            base_balance: dec!(1),
            quote_balance: dec!(1000),
        };
        let decision = engine.decide(&input, &full_autonomy());
        assert_eq!(decision.action, Action::Hold);
        assert!(decision.reasoning.contains("rule wait"));
        assert!((decision.market_score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_price_holds() {
        let engine = engine();
        let pacing = pacing(false, Urgency::High);
        let signal = signal(0.9);
        let input = DecisionInput {
            pacing: &pacing,
            signal: &signal,
            price: Decimal::ZERO,
            base_balance: Decimal::ZERO,
            quote_balance: dec!(1000),
        };
        let decision = engine.decide(&input, &full_autonomy());
        assert_eq!(decision.action, Action::Hold);
        assert!(decision.reasoning.contains("no valid price"));
    }

    #[test]
    fn test_never_trades_below_minimum_notional() {
        let engine = engine();
        let minimum = TradingConfig::default().minimum_trade_notional;
        let balances = [dec!(0), dec!(1), dec!(15), dec!(45), dec!(120), dec!(10000)];
        let prices = [dec!(0.5), dec!(3), dec!(100), dec!(25000)];
        let scores = [0.1, 0.5, 0.9];
        let agents = [AgentState::from_reputation(0, 0.0), full_autonomy()];

        for on_track in [true, false] {
            for urgency in [Urgency::Low, Urgency::Medium, Urgency::High] {
                let pacing = pacing(on_track, urgency);
                for score in scores {
                    let signal = signal(score);
                    for price in prices {
                        for base in balances {
                            for quote in balances {
                                for agent in &agents {
                                    let input = DecisionInput {
                                        pacing: &pacing,
                                        signal: &signal,
                                        price,
                                        base_balance: base / price,
                                        quote_balance: quote,
                                    };
                                    let d = engine.decide(&input, agent);
                                    if d.is_trade() {
                                        assert!(
                                            d.notional() >= minimum,
                                            "{:?} notional {} below {}",
                                            d.action,
                                            d.notional(),
                                            minimum
                                        );
                                        assert!(d.quantity > Decimal::ZERO);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_table_is_deterministic() {
        for on_track in [true, false] {
            for urgency in [Urgency::Low, Urgency::Medium, Urgency::High] {
                for bucket in [ScoreBucket::Bearish, ScoreBucket::Neutral, ScoreBucket::Bullish] {
                    let a = DecisionEngine::rule_for(on_track, urgency, bucket);
                    let b = DecisionEngine::rule_for(on_track, urgency, bucket);
                    assert_eq!(a, b);
                    assert!((0.0..=100.0).contains(&a.confidence));
                    assert_eq!(a.action == Action::Hold, a.sizing_fraction.is_zero());
                }
            }
        }
    }
}
