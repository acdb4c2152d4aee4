//! Port traits for everything outside the gateway process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use botgate_domain::{AgentId, BotToken, PlayerId, WorldId};

// =============================================================================
// Simulation Server
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("simulation request failed: {0}")]
    Request(String),
    #[error("unexpected simulation response: {0}")]
    InvalidResponse(String),
}

/// Identity bound to a bot token by the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBinding {
    pub agent_id: AgentId,
    pub player_id: PlayerId,
    pub world_id: WorldId,
    pub player_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenVerdict {
    Valid(TokenBinding),
    /// `code` is the simulation's error code, e.g. `TOKEN_EXPIRED`.
    Invalid { code: String, message: String },
}

/// A command translated into the simulation's vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationCommand {
    pub agent_id: AgentId,
    pub command_type: String,
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandVerdict {
    /// Queued by the simulation under `input_id`.
    Accepted { input_id: String },
    Rejected { code: String, message: String },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SimulationPort: Send + Sync {
    async fn validate_token(&self, token: &BotToken) -> Result<TokenVerdict, SimulationError>;

    async fn post_command(
        &self,
        token: &BotToken,
        idempotency_key: &str,
        command: &SimulationCommand,
    ) -> Result<CommandVerdict, SimulationError>;
}

// =============================================================================
// Time
// =============================================================================

pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
