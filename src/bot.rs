//! Bot runner: the periodic decision cycle.
//!
//! Handles:
//! - Reading the price and the cached market signal
//! - Goal pacing and the agent's current standing
//! - Turning the decision into a staged ledger change
//! - Persisting the change before applying it in memory
//! - Auditing every decision, executed or not
//!
//! A cycle either commits completely or leaves no trace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::db::{AuditSink, LedgerStore};
use crate::error::EngineError;
use crate::intel::{MarketIntelCache, PriceFeed, SignalSource};
use crate::ledger::{LedgerView, PositionLedger};
use crate::metrics::{per_period_risk_free, win_rate, PerformanceReport};
use crate::models::{Decision, DecisionRecord, GoalState, MarketSignal, PortfolioSnapshot, TradeExecution};
use crate::trading::{
    AgentState, AgentStateHandle, DecisionEngine, DecisionInput, GoalPacer, PacingStatus,
    TradingConfig,
};

/// Bot configuration.
#[derive(Debug, Clone, Default)]
pub struct BotConfig {
    /// Trading configuration
    pub trading: TradingConfig,

    /// Static inputs and an in-memory store instead of live ones
    pub dry_run: bool,
}

/// External collaborators the bot is wired to.
pub struct BotIo {
    pub store: Arc<dyn LedgerStore>,
    pub audit: Arc<dyn AuditSink>,
    pub price_feed: Arc<dyn PriceFeed>,
    pub sources: Vec<Arc<dyn SignalSource>>,
}

/// State owned by whichever cycle holds the lock.
struct CycleState {
    ledger: PositionLedger,
    goal: GoalState,
    goal_dirty: bool,
}

/// Committed state as of the last cycle, readable without the cycle lock.
struct Published {
    view: LedgerView,
    goal: GoalState,
}

impl Published {
    fn of(state: &CycleState) -> Arc<Self> {
        Arc::new(Self {
            view: state.ledger.report_view(),
            goal: state.goal.clone(),
        })
    }
}

/// What one completed cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub decision: Decision,
    pub pacing: PacingStatus,
    pub signal: MarketSignal,
    pub snapshot: PortfolioSnapshot,
    pub execution: Option<TradeExecution>,
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let d = &self.decision;
        writeln!(f, "=== Decision @ {} ===", self.snapshot.timestamp())?;
        writeln!(f, "Action:       {} {:.8} @ {}", d.action, d.quantity, d.price)?;
        writeln!(f, "Executed:     {}", d.executed)?;
        writeln!(f, "Confidence:   {:.0}", d.confidence)?;
        writeln!(f, "Urgency:      {}", d.urgency)?;
        writeln!(f, "Market Score: {:.3}", d.market_score)?;
        writeln!(f, "Signal:       sentiment {:.2}, impact {:.1}, strength {:.2}, momentum {:.2}",
            self.signal.sentiment, self.signal.impact_score, self.signal.price_strength, self.signal.momentum)?;
        writeln!(f, "Pacing:       {}", self.pacing.summary())?;
        writeln!(f, "Reasoning:    {}", d.reasoning)?;
        if let Some(e) = &self.execution {
            writeln!(f, "Fill:         {} {} {:.8} @ {} (fee {})", e.id(), e.side().as_str(), e.quantity(), e.price(), e.fee())?;
        }
        writeln!(f, "Portfolio:    ${:.2}", self.snapshot.total_value())?;
        Ok(())
    }
}

/// Ledger effects of one applied decision.
struct Settled {
    decision: Decision,
    snapshot: PortfolioSnapshot,
    execution: Option<TradeExecution>,
    realized: usize,
}

/// Result of asking for a cycle.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(Box<CycleReport>),
    /// Nothing was done; the next tick will try again.
    Skipped(String),
}

/// Main bot runner.
pub struct Bot {
    config: BotConfig,
    store: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditSink>,
    price_feed: Arc<dyn PriceFeed>,
    intel: MarketIntelCache,
    pacer: GoalPacer,
    engine: DecisionEngine,
    agent: AgentStateHandle,
    state: Mutex<CycleState>,
    published: RwLock<Arc<Published>>,
    shutdown: Arc<AtomicBool>,
}

impl Bot {
    /// Build a bot, restoring the ledger and goal week from the store.
    pub async fn restore(config: BotConfig, io: BotIo, now: DateTime<Utc>) -> Result<Self> {
        config.trading.validate()?;
        let trading = &config.trading;

        let executions = io.store.load_executions().await.context("Failed to load executions")?;
        let snapshots = io.store.load_snapshots().await.context("Failed to load snapshots")?;
        let ledger = PositionLedger::restore(trading.starting_value, executions, snapshots)?;

        let (goal, goal_dirty) = match io.store.load_goal_state().await? {
            Some(mut goal) if goal.weekly_target_return != trading.weekly_target_return => {
                warn!(
                    stored = goal.weekly_target_return,
                    configured = trading.weekly_target_return,
                    "Weekly target changed, applying configured target to the current week"
                );
                goal.weekly_target_return = trading.weekly_target_return;
                (goal, true)
            }
            Some(goal) => (goal, false),
            None => {
                let value = ledger
                    .latest_snapshot()
                    .map(|s| s.total_value())
                    .unwrap_or(trading.starting_value);
                (GoalState::new(value, trading.weekly_target_return, now), true)
            }
        };

        let mut agent = AgentState::default();
        if !ledger.pairs().is_empty() {
            agent = agent.observe_win_rate(win_rate(ledger.pairs()), ledger.pairs().len());
        }

        info!(
            executions = ledger.executions().len(),
            snapshots = ledger.snapshots().len(),
            base = %ledger.base_balance(),
            quote = %ledger.quote_balance(),
            week_start = %goal.week_start,
            autonomy = agent.autonomy,
            "Bot state restored"
        );

        let state = CycleState {
            ledger,
            goal,
            goal_dirty,
        };
        let mut bot = Self {
            intel: MarketIntelCache::new(io.sources, trading.cache_ttl(), trading.fetch_timeout()),
            pacer: GoalPacer::new(trading.pacing.clone()),
            engine: DecisionEngine::new(trading.clone()),
            agent: AgentStateHandle::new(agent),
            store: io.store,
            audit: io.audit,
            price_feed: io.price_feed,
            published: RwLock::new(Published::of(&state)),
            state: Mutex::new(state),
            shutdown: Arc::new(AtomicBool::new(false)),
            config,
        };
        bot.flush_goal().await;
        Ok(bot)
    }

    /// Main run loop.
    pub async fn run(&self) -> Result<()> {
        info!(
            dry_run = self.config.dry_run,
            interval_ms = self.config.trading.decision_interval_ms,
            "Starting decision loop"
        );

        let mut ticker = interval(self.config.trading.decision_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            ticker.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match self.run_cycle(Utc::now()).await {
                Ok(CycleOutcome::Completed(report)) => debug!(
                    action = %report.decision.action,
                    value = %report.snapshot.total_value(),
                    "Cycle completed"
                ),
                Ok(CycleOutcome::Skipped(reason)) => info!(reason = %reason, "Cycle skipped"),
                Err(e) => error!(error = %format!("{e:#}"), "Cycle aborted"),
            }
        }

        info!("Decision loop stopped");
        println!("\n{}", self.get_stats(Utc::now()).await);
        Ok(())
    }

    /// Run one decision cycle at `now`.
    ///
    /// Returns `Skipped` when another cycle holds the ledger or no price is
    /// known. Returns an error, with nothing committed, when staging fails for
    /// a reason other than balances or when persistence fails.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let mut state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let err = EngineError::ConcurrencyViolation("decision cycle already in progress".to_string());
                warn!(error = %err, "Skipping overlapping cycle");
                return Ok(CycleOutcome::Skipped(err.to_string()));
            }
        };

        // 1. Price, falling back to the last mark
        let price = match self.price_feed.fetch_price().await {
            Ok(p) if p > Decimal::ZERO => p,
            outcome => {
                let reason = match outcome {
                    Ok(p) => format!("non-positive price {p}"),
                    Err(e) => format!("{e:#}"),
                };
                match state.ledger.latest_snapshot() {
                    Some(last) => {
                        warn!(reason = %reason, fallback = %last.price(), "Price unavailable, using last mark");
                        last.price()
                    }
                    None => {
                        warn!(reason = %reason, "Price unavailable and no previous mark");
                        return Ok(CycleOutcome::Skipped(format!("no price available: {reason}")));
                    }
                }
            }
        };

        // 2. Market signal
        let signal = self.intel.get(now).await;

        // 3. Goal pacing
        let current_value = state.ledger.value_at(price);
        let mut goal = state.goal.clone();
        let pacing = self.pacer.evaluate(&mut goal, now, current_value);

        // 4. Agent standing
        let agent = self.agent.read().await;

        // 5. Decide
        let decision = self.engine.decide(
            &DecisionInput {
                pacing: &pacing,
                signal: &signal,
                price,
                base_balance: state.ledger.base_balance(),
                quote_balance: state.ledger.quote_balance(),
            },
            &agent,
        );

        // 6-9. Stage, persist, commit and audit
        let settled = self.settle(&mut state, decision, now).await?;

        if pacing.rolled_over {
            state.goal_dirty = true;
        }
        state.goal = goal;
        *self.published.write().await = Published::of(&state);

        // 10. Goal week
        if state.goal_dirty {
            match self.store.save_goal_state(&state.goal).await {
                Ok(()) => state.goal_dirty = false,
                Err(e) => warn!(error = %format!("{e:#}"), "Failed to persist goal state, will retry"),
            }
        }

        // 11. Agent standing from realized results
        if settled.realized > 0 {
            let pairs = state.ledger.pairs();
            let (rate, closed) = (win_rate(pairs), pairs.len());
            match self.agent.update(agent.version, |s| s.observe_win_rate(rate, closed)).await {
                Ok(next) => debug!(reputation = next.reputation, autonomy = next.autonomy, "Agent state updated"),
                Err(e) => warn!(error = %e, "Agent state update lost a race"),
            }
        }

        Ok(CycleOutcome::Completed(Box::new(CycleReport {
            decision: settled.decision,
            pacing,
            signal,
            snapshot: settled.snapshot,
            execution: settled.execution,
        })))
    }

    /// Apply a decision to the ledger: stage, persist, commit in memory, audit.
    ///
    /// A decision the balances cannot cover is replaced by an unexecuted HOLD
    /// that still marks the portfolio and is audited. Persistence failures
    /// abort before anything is committed.
    async fn settle(&self, state: &mut CycleState, decision: Decision, now: DateTime<Utc>) -> Result<Settled> {
        let fee_rate = self.config.trading.fee_rate;
        let (decision, staged) = match state.ledger.stage(&decision, now, fee_rate) {
            Ok(staged) => (decision, staged),
            Err(e) if e.is_balance_rejection() => {
                warn!(
                    action = %decision.action,
                    quantity = %decision.quantity,
                    error = %e,
                    "Decision rejected by ledger, holding"
                );
                let hold = decision.into_unexecuted_hold(&e.to_string());
                let staged = state.ledger.stage(&hold, now, fee_rate)?;
                (hold, staged)
            }
            Err(e) => return Err(e).context("Failed to stage decision"),
        };

        self.store
            .commit(staged.execution.as_ref(), &staged.snapshot)
            .await
            .context("Failed to persist cycle")?;

        let decision = if decision.is_trade() {
            decision.into_executed()
        } else {
            decision
        };
        let execution = staged.execution.clone();
        let realized = staged.pairs.len();
        let snapshot = state.ledger.commit(staged)?.clone();

        info!(
            action = %decision.action,
            quantity = %decision.quantity,
            price = %decision.price,
            notional = %decision.notional(),
            executed = decision.executed,
            urgency = %decision.urgency,
            market_score = decision.market_score,
            value = %snapshot.total_value(),
            "Decision applied"
        );

        // The cycle is already durable
        let record = DecisionRecord::from_decision(now, &decision);
        if let Err(e) = self.audit.record(&record).await {
            warn!(error = %format!("{e:#}"), "Failed to write decision audit record");
        }

        Ok(Settled {
            decision,
            snapshot,
            execution,
            realized,
        })
    }

    async fn flush_goal(&mut self) {
        let state = self.state.get_mut();
        if !state.goal_dirty {
            return;
        }
        match self.store.save_goal_state(&state.goal).await {
            Ok(()) => state.goal_dirty = false,
            Err(e) => warn!(error = %format!("{e:#}"), "Failed to persist goal state, will retry"),
        }
    }

    /// Get bot statistics at `now`.
    pub async fn get_stats(&self, now: DateTime<Utc>) -> BotStats {
        // Never waits on an in-flight cycle.
        let published = self.published.read().await.clone();
        let (view, goal) = (&published.view, &published.goal);

        let price = match self.price_feed.fetch_price().await {
            Ok(p) if p > Decimal::ZERO => p,
            _ => view.latest_snapshot().map(|s| s.price()).unwrap_or(Decimal::ZERO),
        };

        let period_rf = per_period_risk_free(
            self.config.trading.risk_free_rate,
            self.config.trading.decision_interval(),
        );
        let value = view.quote_balance + view.base_balance * price;

        BotStats {
            base_balance: view.base_balance,
            quote_balance: view.quote_balance,
            price,
            portfolio_value: value,
            pacing: self.pacer.status(goal, now, value),
            report: view.report(price, period_rf),
            agent: self.agent.read().await,
            is_running: !self.shutdown.load(Ordering::SeqCst),
            dry_run: self.config.dry_run,
        }
    }
}

/// Bot statistics.
#[derive(Debug, Clone)]
pub struct BotStats {
    pub base_balance: Decimal,
    pub quote_balance: Decimal,
    pub price: Decimal,
    pub portfolio_value: Decimal,
    pub pacing: PacingStatus,
    pub report: PerformanceReport,
    pub agent: AgentState,
    pub is_running: bool,
    pub dry_run: bool,
}

impl std::fmt::Display for BotStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Bot Statistics ===")?;
        writeln!(f, "Portfolio Value: ${:.2}", self.portfolio_value)?;
        writeln!(f, "Quote Balance:   ${:.2}", self.quote_balance)?;
        writeln!(f, "Base Balance:    {:.8} @ {}", self.base_balance, self.price)?;
        writeln!(f, "Goal Target:     ${:.2} ({:.0}% of week elapsed, {:.1} days left)",
            self.pacing.target_value, self.pacing.elapsed_fraction * 100.0, self.pacing.days_remaining)?;
        writeln!(f, "Goal Pacing:     {}", self.pacing.summary())?;
        writeln!(f, "Autonomy:        {:.2} (reputation {:.1})", self.agent.autonomy, self.agent.reputation)?;
        write!(f, "{}", self.report)?;
        writeln!(f, "Status:          {} {}",
            if self.is_running { "Running" } else { "Stopped" },
            if self.dry_run { "(Dry Run)" } else { "" })?;
        Ok(())
    }
}
