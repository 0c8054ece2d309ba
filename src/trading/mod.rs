//! Trading logic: goal pacing, agent state, decision engine.

mod agent_state;
mod config;
mod decision_engine;
mod pacer;

pub use agent_state::{AgentState, AgentStateHandle};
pub use config::{PacingConfig, TradingConfig};
pub use decision_engine::{DecisionEngine, DecisionInput};
pub use pacer::{GoalPacer, PacingStatus};
