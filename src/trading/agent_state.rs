//! Versioned agent state: reputation and the autonomy it earns.
//!
//! The decision engine receives an `AgentState` value; it never reaches into
//! shared maps. Updates go through `AgentStateHandle::update`, which only
//! succeeds against the version the caller read.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};

/// Lowest sizing multiplier an agent can fall to.
pub const MIN_AUTONOMY: f64 = 0.25;

/// Highest sizing multiplier.
pub const MAX_AUTONOMY: f64 = 1.0;

/// Reputation assigned before any trade has closed.
pub const INITIAL_REPUTATION: f64 = 50.0;

/// Snapshot of the agent's standing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Incremented on every successful update
    pub version: u64,

    /// Multiplier on decision sizing, within [MIN_AUTONOMY, MAX_AUTONOMY]
    pub autonomy: f64,

    /// Track record score within [0, 100]
    pub reputation: f64,
}

impl Default for AgentState {
    fn default() -> Self {
        Self::from_reputation(0, INITIAL_REPUTATION)
    }
}

impl AgentState {
    /// Derive autonomy linearly from reputation.
    pub fn from_reputation(version: u64, reputation: f64) -> Self {
        let reputation = if reputation.is_finite() {
            reputation.clamp(0.0, 100.0)
        } else {
            INITIAL_REPUTATION
        };
        let autonomy = MIN_AUTONOMY + (MAX_AUTONOMY - MIN_AUTONOMY) * reputation / 100.0;
        Self {
            version,
            autonomy,
            reputation,
        }
    }

    /// Next state after observing a realized win rate (0..1) over `closed` pairs.
    ///
    /// Reputation moves toward the win rate, weighted by how many pairs back it.
    pub fn observe_win_rate(&self, win_rate: f64, closed: usize) -> Self {
        if closed == 0 {
            return Self { version: self.version + 1, ..*self };
        }
        let weight = (closed as f64 / 20.0).min(1.0);
        let target = win_rate.clamp(0.0, 1.0) * 100.0;
        let reputation = self.reputation + (target - self.reputation) * weight;
        Self::from_reputation(self.version + 1, reputation)
    }
}

/// Shared, versioned holder for the agent state.
#[derive(Debug, Clone, Default)]
pub struct AgentStateHandle {
    inner: Arc<RwLock<AgentState>>,
}

impl AgentStateHandle {
    pub fn new(state: AgentState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn read(&self) -> AgentState {
        *self.inner.read().await
    }

    /// Apply `f` if the stored version still equals `expected_version`.
    pub async fn update<F>(&self, expected_version: u64, f: F) -> EngineResult<AgentState>
    where
        F: FnOnce(&AgentState) -> AgentState,
    {
        let mut guard = self.inner.write().await;
        if guard.version != expected_version {
            return Err(EngineError::ConcurrencyViolation(format!(
                "agent state version {} does not match expected {}",
                guard.version, expected_version
            )));
        }

        let mut next = f(&guard);
        next.version = expected_version + 1;
        *guard = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_autonomy_bounds() {
        assert_eq!(AgentState::from_reputation(0, 0.0).autonomy, MIN_AUTONOMY);
        assert_eq!(AgentState::from_reputation(0, 100.0).autonomy, MAX_AUTONOMY);
        assert_eq!(AgentState::from_reputation(0, 250.0).reputation, 100.0);
        assert_eq!(AgentState::from_reputation(0, f64::NAN).reputation, INITIAL_REPUTATION);
    }

    #[test]
    fn test_observe_win_rate() {
        let state = AgentState::default();
        let next = state.observe_win_rate(1.0, 20);
        assert_eq!(next.reputation, 100.0);
        assert_eq!(next.version, 1);

        let partial = state.observe_win_rate(1.0, 10);
        assert!((partial.reputation - 75.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_versioned_update() {
        let handle = AgentStateHandle::default();
        let current = handle.read().await;

        let updated = handle
            .update(current.version, |s| s.observe_win_rate(0.0, 20))
            .await
            .unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(updated.autonomy, MIN_AUTONOMY);

        // Stale writer loses.
        let stale = handle.update(current.version, |s| *s).await;
        assert!(matches!(stale, Err(EngineError::ConcurrencyViolation(_))));
        assert_eq!(handle.read().await, updated);
    }
}
