//! Out-of-band chat channel messages
//!
//! Structured notifications ride alongside plain text on the chat channel:
//! the server announces missing filings and readiness, the client answers
//! the fill-or-skip question. Framing (WebSocket, etc.) lives outside this
//! crate; the transport is abstracted behind [`ChatTransport`].

use crate::error::AgentError;
use crate::models::MissingFiling;
use crate::Result;
use serde::Deserialize;
use serde_json::json;

/// Server-originated structured notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Filings the agent's lookback window expects but the store lacks.
    MissingData(Vec<MissingFiling>),
    /// The agent is ready to accept chat turns.
    AgentReady,
    /// A turn-level failure the user should see. The session stays alive.
    TurnFailed(String),
}

impl ServerMessage {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ServerMessage::MissingData(gaps) => json!({
                "MESSAGE_TYPE": "SERVER_MESSAGE",
                "MESSAGE_SUBTYPE": "MISSING_DATA",
                "PAYLOAD": gaps,
            }),
            ServerMessage::AgentReady => json!({
                "MESSAGE_TYPE": "AGENT_STATUS",
                "MESSAGE_SUBTYPE": "READY",
                "PAYLOAD": serde_json::Value::Null,
            }),
            ServerMessage::TurnFailed(reason) => json!({
                "MESSAGE_TYPE": "SERVER_MESSAGE",
                "MESSAGE_SUBTYPE": "TURN_FAILED",
                "PAYLOAD": reason,
            }),
        }
    }
}

/// Client-originated decision on the missing-data question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEvent {
    FillData,
    SkipFillData,
}

#[derive(Deserialize)]
struct RawUserEvent {
    #[serde(rename = "MESSAGE_TYPE")]
    message_type: String,
    #[serde(rename = "MESSAGE_SUBTYPE")]
    message_subtype: String,
}

impl UserEvent {
    /// Parse a raw inbound frame into a user event.
    ///
    /// Anything that is not a well-formed USER_EVENT is a protocol error;
    /// the caller decides the fallback policy (the orchestrator treats it
    /// as SKIP_FILL_DATA).
    pub fn parse(raw: &str) -> Result<Self> {
        let event: RawUserEvent = serde_json::from_str(raw)
            .map_err(|e| AgentError::Protocol(format!("malformed user event: {}", e)))?;

        if event.message_type != "USER_EVENT" {
            return Err(AgentError::Protocol(format!(
                "unexpected message type: {}",
                event.message_type
            )));
        }

        match event.message_subtype.as_str() {
            "FILL_DATA" => Ok(UserEvent::FillData),
            "SKIP_FILL_DATA" => Ok(UserEvent::SkipFillData),
            other => Err(AgentError::Protocol(format!(
                "unrecognized user event subtype: {}",
                other
            ))),
        }
    }
}

/// The per-session transport handle.
///
/// One implementation per wire (WebSocket, test recorder, stdout demo); the
/// orchestrator only ever sees this trait. A send failure means the peer is
/// gone and the in-flight turn should stop relaying.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Relay one chunk of assistant output (a streaming delta or a full
    /// non-streamed reply).
    async fn send_text(&self, text: &str) -> Result<()>;

    /// Deliver a structured out-of-band notification.
    async fn send_message(&self, message: &ServerMessage) -> Result<()>;
}
