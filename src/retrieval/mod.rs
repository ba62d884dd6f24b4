//! Retrieval stage
//!
//! The second model pass of a chat turn: translate the planner's ordered
//! needs into schema-validated tool invocations, dispatch them against the
//! filing store, and assemble one attributed context blob. The blob is
//! ephemeral; durable history only ever sees its redaction placeholder.

use crate::error::AgentError;
use crate::llm::{ChatMessage, CompletionModel};
use crate::models::{Entity, RetrievedContext, Role, ToolInvocation};
use crate::store::FilingStore;
use crate::tools::ToolRegistry;
use crate::Result;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const RETRIEVAL_SYSTEM_PROMPT: &str = "You are a data assistant. You are to take in an ordered \
     list of pieces of information to retrieve. You are to return a list of tool calls that \
     correspond to each of the pieces of information requested. Respond with ONLY a JSON object \
     of the form {\"tool_calls\": [{\"name\": \"...\", \"arguments\": {...}}]}.";

/// Marker emitted in place of content when a tool call produced nothing.
const NO_DATA_MARKER: &str = "[no data available]";

/// One retry after a short pause covers transient adapter outages.
const ADAPTER_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Deserialize)]
struct ToolCallResponse {
    tool_calls: Vec<ToolInvocation>,
}

/// Need-to-invocation translation plus ordered dispatch.
pub struct RetrievalStage {
    model: Arc<dyn CompletionModel>,
    registry: Arc<ToolRegistry>,
    store: Arc<dyn FilingStore>,
}

impl RetrievalStage {
    pub fn new(
        model: Arc<dyn CompletionModel>,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn FilingStore>,
    ) -> Self {
        Self {
            model,
            registry,
            store,
        }
    }

    /// Ask the retrieval model which tool calls satisfy the needs list.
    pub async fn request_invocations(&self, needs: &[String]) -> Result<Vec<ToolInvocation>> {
        let mut request = String::from("##Information Needed\n");
        for (idx, need) in needs.iter().enumerate() {
            request.push_str(&format!("{}. {}\n", idx + 1, need));
        }
        request.push_str("\n##Available Tools\n");
        request.push_str(&serde_json::to_string_pretty(&self.registry.catalog())?);

        let messages = [
            ChatMessage::new(Role::System, RETRIEVAL_SYSTEM_PROMPT),
            ChatMessage::new(Role::User, request),
        ];

        let raw = self.model.complete(&messages).await?;
        let cleaned = raw
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        let parsed: ToolCallResponse = serde_json::from_str(cleaned).map_err(|e| {
            let excerpt: String = raw.chars().take(200).collect();
            AgentError::PlanningFailure(format!(
                "unparseable tool call response: {} | raw={}",
                e, excerpt
            ))
        })?;

        debug!(invocations = parsed.tool_calls.len(), "Retrieval model replied");
        Ok(parsed.tool_calls)
    }

    /// Dispatch invocations in order and assemble the attributed context.
    ///
    /// Invalid or unknown invocations are dropped with a warning; the rest of
    /// the batch still runs. A transiently unavailable store gets one retry;
    /// that and any other store failure degrade the block to the no-data
    /// marker. Identical invocation batches over unchanged data produce
    /// byte-identical context.
    pub async fn execute(
        &self,
        entity: &Entity,
        invocations: &[ToolInvocation],
    ) -> Result<RetrievedContext> {
        let mut blocks = Vec::with_capacity(invocations.len());

        for invocation in invocations {
            let tool = match self.registry.get(&invocation.name) {
                Ok(tool) => tool,
                Err(e) => {
                    warn!(tool = %invocation.name, "Dropping unknown tool invocation: {}", e);
                    continue;
                }
            };

            let result = match tool.invoke(self.store.as_ref(), entity, &invocation.arguments).await
            {
                Ok(text) => text,
                Err(AgentError::InvalidArguments(reason)) => {
                    warn!(tool = %invocation.name, "Dropping invalid invocation: {}", reason);
                    continue;
                }
                Err(AgentError::AdapterUnavailable(reason)) => {
                    warn!(tool = %invocation.name, "Store unavailable, retrying once: {}", reason);
                    tokio::time::sleep(ADAPTER_RETRY_DELAY).await;
                    match tool
                        .invoke(self.store.as_ref(), entity, &invocation.arguments)
                        .await
                    {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(tool = %invocation.name, "Retry failed, degrading block: {}", e);
                            String::new()
                        }
                    }
                }
                // Any other store failure is still tool-level: degrade this
                // block, never the turn.
                Err(e) => {
                    warn!(tool = %invocation.name, "Tool dispatch failed, degrading block: {}", e);
                    String::new()
                }
            };

            let content = if result.trim().is_empty() {
                NO_DATA_MARKER.to_string()
            } else {
                result
            };

            // Canonical serde_json rendering keeps attribution lines stable
            // for identical arguments.
            blocks.push(format!(
                "# FROM: {}({})\n{}",
                invocation.name,
                serde_json::to_string(&invocation.arguments)?,
                content
            ));
        }

        let text = blocks.join("\n");
        let fingerprint = hex::encode(Sha256::digest(text.as_bytes()));
        info!(
            blocks = blocks.len(),
            fingerprint = %&fingerprint[..12],
            "Assembled retrieval context"
        );

        Ok(RetrievedContext { text, fingerprint })
    }
}
