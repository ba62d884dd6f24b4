//! Response stage
//!
//! The final model pass of a chat turn. Builds the ephemeral message view
//! (durable history plus, when retrieval ran, a system turn carrying the
//! context blob) and returns the completion as a token stream. The blob
//! itself never enters durable history; the orchestrator appends the fixed
//! redaction placeholder instead.

use crate::llm::{ChatMessage, CompletionModel, TokenStream};
use crate::models::{ConversationTurn, RetrievedContext, Role};
use crate::Result;
use std::sync::Arc;
use tracing::debug;

/// Placeholder recorded in durable history wherever context was injected.
pub const OPAQUE_CONTEXT_PLACEHOLDER: &str =
    "<Context Made Opaque For This Step Due To Length>";

/// Wording of the ephemeral context-bearing system turn.
fn context_turn(context: &RetrievedContext) -> ChatMessage {
    ChatMessage::new(
        Role::System,
        format!(
            "The data retrieval mechanism for the assistant has retrieved the following \
             context which the assistant shall use to answer the user's question. The \
             assistant should be advised that the user cannot see this context:\n{}",
            context.text
        ),
    )
}

pub struct ResponseStage {
    model: Arc<dyn CompletionModel>,
}

impl ResponseStage {
    pub fn new(model: Arc<dyn CompletionModel>) -> Self {
        Self { model }
    }

    /// Stream the assistant's reply for this turn.
    ///
    /// `context` is appended as a trailing system turn for this one call
    /// only; the caller owns recording the placeholder in durable history.
    pub async fn respond(
        &self,
        preamble: &str,
        history: &[ConversationTurn],
        context: Option<&RetrievedContext>,
    ) -> Result<TokenStream> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::new(Role::System, preamble));
        for turn in history {
            messages.push(ChatMessage::new(turn.role, turn.content.clone()));
        }
        if let Some(context) = context {
            debug!(fingerprint = %&context.fingerprint[..12], "Injecting ephemeral context");
            messages.push(context_turn(context));
        }

        self.model.stream(&messages).await
    }
}
