//! Error types for the filing-retrieval orchestrator

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {

    // =============================
    // Retrieval Pipeline Errors
    // =============================

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Duplicate tool registration: {0}")]
    DuplicateTool(String),

    #[error("Planning failed: {0}")]
    PlanningFailure(String),

    #[error("Completion failed: {0}")]
    CompletionFailure(String),

    #[error("Filing store unavailable: {0}")]
    AdapterUnavailable(String),

    // =============================
    // Session Errors
    // =============================

    #[error("No active session for ({user_id}, {agent_id})")]
    NoActiveSession { user_id: Uuid, agent_id: Uuid },

    #[error("A session is already active for ({user_id}, {agent_id})")]
    DuplicateSession { user_id: Uuid, agent_id: Uuid },

    #[error("Chat turn limit exhausted")]
    TurnLimitExhausted,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport closed: {0}")]
    TransportClosed(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AgentError {
    /// True for failures that degrade a single chat turn while the session
    /// itself stays alive. Everything else closes the session.
    pub fn is_turn_level(&self) -> bool {
        matches!(
            self,
            AgentError::PlanningFailure(_)
                | AgentError::CompletionFailure(_)
                | AgentError::SerializationError(_)
                | AgentError::HttpError(_)
        )
    }
}
