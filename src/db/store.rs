//! Persistence seams used by the bot.

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::{DecisionRecord, GoalState, PortfolioSnapshot, TradeExecution};

/// Durable home of the execution log, snapshots and goal week.
pub trait LedgerStore: Send + Sync {
    /// Persist one cycle atomically: either both rows land or neither does.
    fn commit<'a>(
        &'a self,
        execution: Option<&'a TradeExecution>,
        snapshot: &'a PortfolioSnapshot,
    ) -> BoxFuture<'a, Result<()>>;

    fn load_executions(&self) -> BoxFuture<'_, Result<Vec<TradeExecution>>>;

    fn latest_snapshot(&self) -> BoxFuture<'_, Result<Option<PortfolioSnapshot>>>;

    fn load_snapshots(&self) -> BoxFuture<'_, Result<Vec<PortfolioSnapshot>>>;

    fn load_goal_state(&self) -> BoxFuture<'_, Result<Option<GoalState>>>;

    fn save_goal_state<'a>(&'a self, state: &'a GoalState) -> BoxFuture<'a, Result<()>>;
}

/// Receiver of per-cycle decision records.
pub trait AuditSink: Send + Sync {
    fn record<'a>(&'a self, record: &'a DecisionRecord) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    executions: Vec<TradeExecution>,
    snapshots: Vec<PortfolioSnapshot>,
    goal: Option<GoalState>,
    decisions: Vec<DecisionRecord>,
}

/// Non-durable store for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn decisions(&self) -> Vec<DecisionRecord> {
        self.inner.lock().await.decisions.clone()
    }
}

impl LedgerStore for MemoryStore {
    fn commit<'a>(
        &'a self,
        execution: Option<&'a TradeExecution>,
        snapshot: &'a PortfolioSnapshot,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut inner = self.inner.lock().await;
            if let Some(e) = execution {
                if inner.executions.iter().any(|x| x.id() == e.id()) {
                    anyhow::bail!("Duplicate execution id {}", e.id());
                }
                inner.executions.push(e.clone());
            }
            inner.snapshots.push(snapshot.clone());
            Ok(())
        }
        .boxed()
    }

    fn load_executions(&self) -> BoxFuture<'_, Result<Vec<TradeExecution>>> {
        async move { Ok(self.inner.lock().await.executions.clone()) }.boxed()
    }

    fn latest_snapshot(&self) -> BoxFuture<'_, Result<Option<PortfolioSnapshot>>> {
        async move { Ok(self.inner.lock().await.snapshots.last().cloned()) }.boxed()
    }

    fn load_snapshots(&self) -> BoxFuture<'_, Result<Vec<PortfolioSnapshot>>> {
        async move { Ok(self.inner.lock().await.snapshots.clone()) }.boxed()
    }

    fn load_goal_state(&self) -> BoxFuture<'_, Result<Option<GoalState>>> {
        async move { Ok(self.inner.lock().await.goal.clone()) }.boxed()
    }

    fn save_goal_state<'a>(&'a self, state: &'a GoalState) -> BoxFuture<'a, Result<()>> {
        async move {
            self.inner.lock().await.goal = Some(state.clone());
            Ok(())
        }
        .boxed()
    }
}

impl AuditSink for MemoryStore {
    fn record<'a>(&'a self, record: &'a DecisionRecord) -> BoxFuture<'a, Result<()>> {
        async move {
            self.inner.lock().await.decisions.push(record.clone());
            Ok(())
        }
        .boxed()
    }
}

/// Emits each decision as a structured log event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record<'a>(&'a self, record: &'a DecisionRecord) -> BoxFuture<'a, Result<()>> {
        info!(
            timestamp = %record.timestamp,
            action = %record.action,
            quantity = %record.quantity,
            price = %record.price,
            confidence = record.confidence,
            urgency = %record.urgency,
            market_basis = record.market_basis,
            executed = record.executed,
            reasoning = %record.reasoning,
            "Decision"
        );
        futures::future::ready(Ok(())).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    use crate::models::TradeSide;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let buy = TradeExecution::new(ts, TradeSide::Buy, dec!(1), dec!(10), dec!(0)).unwrap();
        let snap = PortfolioSnapshot::new(ts, dec!(1), dec!(90), dec!(10));

        store.commit(Some(&buy), &snap).await.unwrap();
        assert!(store.commit(Some(&buy), &snap).await.is_err());

        assert_eq!(store.load_executions().await.unwrap(), vec![buy]);
        assert_eq!(store.latest_snapshot().await.unwrap(), Some(snap));
        assert_eq!(store.load_snapshots().await.unwrap().len(), 1);

        let goal = GoalState::new(dec!(100), 0.05, ts);
        store.save_goal_state(&goal).await.unwrap();
        assert_eq!(store.load_goal_state().await.unwrap(), Some(goal));
    }
}
