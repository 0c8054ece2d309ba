//! Database persistence for the ledger.
//!
//! Stores everything needed to resume after restart:
//! - The append-only execution log
//! - Portfolio snapshots (equity curve)
//! - The current goal week
//! - The decision audit trail
//!
//! Money and quantities are stored as decimal strings so they round-trip exactly.

mod store;

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{
    Action, DecisionRecord, GoalState, PortfolioSnapshot, TradeExecution, TradeSide, Urgency,
};

pub use store::{AuditSink, LedgerStore, MemoryStore, TracingAuditSink};

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored execution record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredExecution {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub side: String,
    pub quantity: String,
    pub price: String,
    pub fee: String,
}

/// Stored snapshot (equity curve point).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredSnapshot {
    pub timestamp: DateTime<Utc>,
    pub base_balance: String,
    pub quote_balance: String,
    pub price: String,
}

/// Stored goal week.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredGoalState {
    pub starting_value: String,
    pub weekly_target_return: f64,
    pub week_start: DateTime<Utc>,
}

/// Stored decision audit record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredDecision {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub quantity: String,
    pub price: String,
    pub confidence: f64,
    pub reasoning: String,
    pub urgency: String,
    pub market_basis: f64,
    pub executed: bool,
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value).with_context(|| format!("Invalid decimal in {}: {:?}", field, value))
}

impl StoredExecution {
    pub fn into_execution(self) -> Result<TradeExecution> {
        let execution = TradeExecution::with_id(
            self.id,
            self.timestamp,
            TradeSide::parse(&self.side)?,
            parse_decimal("quantity", &self.quantity)?,
            parse_decimal("price", &self.price)?,
            parse_decimal("fee", &self.fee)?,
        )?;
        Ok(execution)
    }
}

impl StoredSnapshot {
    pub fn into_snapshot(self) -> Result<PortfolioSnapshot> {
        Ok(PortfolioSnapshot::new(
            self.timestamp,
            parse_decimal("base_balance", &self.base_balance)?,
            parse_decimal("quote_balance", &self.quote_balance)?,
            parse_decimal("price", &self.price)?,
        ))
    }
}

impl StoredGoalState {
    pub fn into_goal_state(self) -> Result<GoalState> {
        Ok(GoalState::new(
            parse_decimal("starting_value", &self.starting_value)?,
            self.weekly_target_return,
            self.week_start,
        ))
    }
}

impl StoredDecision {
    pub fn into_record(self) -> Result<DecisionRecord> {
        Ok(DecisionRecord {
            timestamp: self.timestamp,
            action: Action::parse(&self.action)?,
            quantity: parse_decimal("quantity", &self.quantity)?,
            price: parse_decimal("price", &self.price)?,
            confidence: self.confidence,
            reasoning: self.reasoning,
            urgency: Urgency::parse(&self.urgency)?,
            market_basis: self.market_basis,
            executed: self.executed,
        })
    }
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every in-memory connection is its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        // Execution log
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                side TEXT NOT NULL CHECK (side IN ('BUY', 'SELL')),
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                fee TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Equity curve
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                base_balance TEXT NOT NULL,
                quote_balance TEXT NOT NULL,
                price TEXT NOT NULL,
                total_value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Goal week (single row)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS goal_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                starting_value TEXT NOT NULL,
                weekly_target_return REAL NOT NULL,
                week_start TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Decision audit trail
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                action TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                confidence REAL NOT NULL,
                reasoning TEXT NOT NULL,
                urgency TEXT NOT NULL,
                market_basis REAL NOT NULL,
                executed INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_time ON executions(timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshots_time ON snapshots(timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_decisions_time ON decisions(timestamp)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Ledger ====================

    /// Write an optional execution and its snapshot in one transaction.
    pub async fn commit_cycle(
        &self,
        execution: Option<&TradeExecution>,
        snapshot: &PortfolioSnapshot,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        if let Some(e) = execution {
            sqlx::query(
                r#"
                INSERT INTO executions (id, timestamp, side, quantity, price, fee)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(e.id())
            .bind(e.timestamp())
            .bind(e.side().as_str())
            .bind(e.quantity().to_string())
            .bind(e.price().to_string())
            .bind(e.fee().to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to insert execution")?;
        }

        sqlx::query(
            r#"
            INSERT INTO snapshots (timestamp, base_balance, quote_balance, price, total_value)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.timestamp())
        .bind(snapshot.base_balance().to_string())
        .bind(snapshot.quote_balance().to_string())
        .bind(snapshot.price().to_string())
        .bind(snapshot.total_value().to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to insert snapshot")?;

        tx.commit().await.context("Failed to commit cycle")?;
        Ok(())
    }

    /// All executions in timestamp order.
    pub async fn get_executions(&self) -> Result<Vec<TradeExecution>> {
        let rows = sqlx::query_as::<_, StoredExecution>(
            "SELECT id, timestamp, side, quantity, price, fee FROM executions ORDER BY timestamp ASC, created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredExecution::into_execution).collect()
    }

    /// All snapshots in insertion order.
    pub async fn get_snapshots(&self) -> Result<Vec<PortfolioSnapshot>> {
        let rows = sqlx::query_as::<_, StoredSnapshot>(
            "SELECT timestamp, base_balance, quote_balance, price FROM snapshots ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredSnapshot::into_snapshot).collect()
    }

    pub async fn get_latest_snapshot(&self) -> Result<Option<PortfolioSnapshot>> {
        let row = sqlx::query_as::<_, StoredSnapshot>(
            "SELECT timestamp, base_balance, quote_balance, price FROM snapshots ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredSnapshot::into_snapshot).transpose()
    }

    // ==================== Goal ====================

    pub async fn get_goal_state(&self) -> Result<Option<GoalState>> {
        let row = sqlx::query_as::<_, StoredGoalState>(
            "SELECT starting_value, weekly_target_return, week_start FROM goal_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoredGoalState::into_goal_state).transpose()
    }

    pub async fn save_goal(&self, state: &GoalState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO goal_state (id, starting_value, weekly_target_return, week_start, updated_at)
            VALUES (1, ?, ?, ?, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                starting_value = excluded.starting_value,
                weekly_target_return = excluded.weekly_target_return,
                week_start = excluded.week_start,
                updated_at = datetime('now')
            "#,
        )
        .bind(state.starting_value.to_string())
        .bind(state.weekly_target_return)
        .bind(state.week_start)
        .execute(&self.pool)
        .await
        .context("Failed to save goal state")?;

        Ok(())
    }

    // ==================== Decisions ====================

    pub async fn save_decision(&self, record: &DecisionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO decisions (
                timestamp, action, quantity, price, confidence,
                reasoning, urgency, market_basis, executed
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.timestamp)
        .bind(record.action.as_str())
        .bind(record.quantity.to_string())
        .bind(record.price.to_string())
        .bind(record.confidence)
        .bind(&record.reasoning)
        .bind(record.urgency.as_str())
        .bind(record.market_basis)
        .bind(record.executed)
        .execute(&self.pool)
        .await
        .context("Failed to save decision")?;

        Ok(())
    }

    /// Most recent decisions, newest first.
    pub async fn get_recent_decisions(&self, limit: i64) -> Result<Vec<DecisionRecord>> {
        let rows = sqlx::query_as::<_, StoredDecision>(
            "SELECT timestamp, action, quantity, price, confidence, reasoning, urgency, market_basis, executed \
             FROM decisions ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredDecision::into_record).collect()
    }
}

impl LedgerStore for Database {
    fn commit<'a>(
        &'a self,
        execution: Option<&'a TradeExecution>,
        snapshot: &'a PortfolioSnapshot,
    ) -> BoxFuture<'a, Result<()>> {
        self.commit_cycle(execution, snapshot).boxed()
    }

    fn load_executions(&self) -> BoxFuture<'_, Result<Vec<TradeExecution>>> {
        self.get_executions().boxed()
    }

    fn latest_snapshot(&self) -> BoxFuture<'_, Result<Option<PortfolioSnapshot>>> {
        self.get_latest_snapshot().boxed()
    }

    fn load_snapshots(&self) -> BoxFuture<'_, Result<Vec<PortfolioSnapshot>>> {
        self.get_snapshots().boxed()
    }

    fn load_goal_state(&self) -> BoxFuture<'_, Result<Option<GoalState>>> {
        self.get_goal_state().boxed()
    }

    fn save_goal_state<'a>(&'a self, state: &'a GoalState) -> BoxFuture<'a, Result<()>> {
        self.save_goal(state).boxed()
    }
}

impl AuditSink for Database {
    fn record<'a>(&'a self, record: &'a DecisionRecord) -> BoxFuture<'a, Result<()>> {
        self.save_decision(record).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use crate::models::{Decision, Urgency};

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minute)
    }

    async fn db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_commit_and_reload() {
        let db = db().await;
        let buy = TradeExecution::new(t(0), TradeSide::Buy, dec!(1.5), dec!(100.25), dec!(0.150375)).unwrap();
        let snap = PortfolioSnapshot::new(t(0), dec!(1.5), dec!(849.474625), dec!(100.25));

        db.commit_cycle(Some(&buy), &snap).await.unwrap();
        db.commit_cycle(None, &PortfolioSnapshot::new(t(1), dec!(1.5), dec!(849.474625), dec!(101))).await.unwrap();

        let executions = db.get_executions().await.unwrap();
        assert_eq!(executions, vec![buy]);

        let snapshots = db.get_snapshots().await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0], snap);

        let latest = db.get_latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.price(), dec!(101));
    }

    #[tokio::test]
    async fn test_failed_commit_writes_nothing() {
        let db = db().await;
        let buy = TradeExecution::new(t(0), TradeSide::Buy, dec!(1), dec!(100), dec!(0)).unwrap();
        let snap = PortfolioSnapshot::new(t(0), dec!(1), dec!(900), dec!(100));
        db.commit_cycle(Some(&buy), &snap).await.unwrap();

        // Same id violates the primary key; the snapshot must roll back too.
        let err = db.commit_cycle(Some(&buy), &snap).await;
        assert!(err.is_err());
        assert_eq!(db.get_snapshots().await.unwrap().len(), 1);
        assert_eq!(db.get_executions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_goal_state_upsert() {
        let db = db().await;
        assert!(db.get_goal_state().await.unwrap().is_none());

        let mut goal = GoalState::new(dec!(10000), 0.05, t(0));
        db.save_goal(&goal).await.unwrap();
        goal.roll_over(t(10_080), dec!(10400));
        db.save_goal(&goal).await.unwrap();

        assert_eq!(db.get_goal_state().await.unwrap(), Some(goal));
    }

    #[tokio::test]
    async fn test_decision_audit() {
        let db = db().await;
        let decision = Decision::hold(dec!(100), 55.0, Urgency::Medium, 0.5, "neutral market".to_string());
        let record = DecisionRecord::from_decision(t(0), &decision);
        db.save_decision(&record).await.unwrap();

        let recent = db.get_recent_decisions(10).await.unwrap();
        assert_eq!(recent, vec![record]);
    }
}
