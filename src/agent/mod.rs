//! Chat orchestrator
//!
//! Owns one agent's durable conversation and drives the three-stage turn
//! pipeline: plan what information is needed, retrieve and assemble context,
//! then stream the grounded answer. Also runs the pre-flight missing-data
//! check and the fill-or-skip handshake before the first turn.

use crate::error::AgentError;
use crate::llm::CompletionModel;
use crate::models::{AgentConfig, ConversationTurn, MissingFiling, RetrievedContext};
use crate::planner::Planner;
use crate::protocol::{ChatTransport, UserEvent};
use crate::response::{ResponseStage, OPAQUE_CONTEXT_PLACEHOLDER};
use crate::retrieval::RetrievalStage;
use crate::store::FilingStore;
use crate::tools::ToolRegistry;
use crate::Result;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle of an agent between registration and its first chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    /// Gaps were announced; waiting on the client's fill-or-skip decision.
    AwaitingFillDecision,
    /// Filling announced gaps; chat turns are still refused.
    Filling,
    /// Accepting chat turns.
    Ready,
}

pub struct Orchestrator {
    config: Arc<AgentConfig>,
    store: Arc<dyn FilingStore>,
    planner: Planner,
    retrieval: RetrievalStage,
    response: ResponseStage,
    history: Vec<ConversationTurn>,
    phase: AgentPhase,
}

impl Orchestrator {
    /// Build an orchestrator for one agent configuration.
    ///
    /// Reads filing availability once to fix the planner preamble; the
    /// pre-flight gap check still has to run before the agent is ready.
    pub async fn new(
        config: Arc<AgentConfig>,
        store: Arc<dyn FilingStore>,
        registry: Arc<ToolRegistry>,
        model: Arc<dyn CompletionModel>,
        today: NaiveDate,
    ) -> Result<Self> {
        let planner = Planner::for_config(model.clone(), store.as_ref(), &config, today).await?;
        let retrieval = RetrievalStage::new(model.clone(), registry, store.clone());
        let response = ResponseStage::new(model);

        Ok(Self {
            config,
            store,
            planner,
            retrieval,
            response,
            history: Vec::new(),
            phase: AgentPhase::AwaitingFillDecision,
        })
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    /// Durable history view, for tests and debugging surfaces.
    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// Compare published filings against cached summaries for every
    /// configured source. Empty result means the agent is ready; otherwise
    /// it waits on the fill-or-skip decision.
    pub async fn check_missing_data(&mut self) -> Result<Vec<MissingFiling>> {
        let mut gaps = Vec::new();

        for source in &self.config.sources {
            let cached: BTreeSet<NaiveDate> = self
                .store
                .availability(&self.config.entity, *source)
                .await?
                .into_iter()
                .collect();
            for date in self
                .store
                .published(&self.config.entity, *source, self.config.start_date)
                .await?
            {
                if !cached.contains(&date) {
                    gaps.push(MissingFiling {
                        source: *source,
                        filing_date: date,
                    });
                }
            }
        }

        self.phase = if gaps.is_empty() {
            AgentPhase::Ready
        } else {
            AgentPhase::AwaitingFillDecision
        };

        info!(
            entity = %self.config.entity.display_name,
            gaps = gaps.len(),
            "Pre-flight gap check complete"
        );
        Ok(gaps)
    }

    /// Apply the client's answer to the missing-data announcement.
    ///
    /// A malformed decision is logged and treated as SKIP_FILL_DATA; the
    /// session proceeds with the data it has.
    pub async fn handle_fill_decision(&mut self, raw: &str) -> Result<()> {
        let decision = match UserEvent::parse(raw) {
            Ok(decision) => decision,
            Err(e) => {
                warn!("Malformed fill decision, proceeding without filling: {}", e);
                UserEvent::SkipFillData
            }
        };

        if decision == UserEvent::FillData {
            self.phase = AgentPhase::Filling;
            if let Err(e) = self.fill_gaps().await {
                // Leave the decision open so a retry frame is still routed
                // as a fill-or-skip answer, not a chat turn.
                self.phase = AgentPhase::AwaitingFillDecision;
                return Err(e);
            }
        }

        self.phase = AgentPhase::Ready;
        Ok(())
    }

    async fn fill_gaps(&mut self) -> Result<()> {
        let gaps = self.check_missing_data().await?;
        self.phase = AgentPhase::Filling;
        for gap in &gaps {
            self.store
                .fill(&self.config.entity, gap.source, gap.filing_date)
                .await?;
        }
        info!(filled = gaps.len(), "Filled missing filings");
        Ok(())
    }

    /// Run one chat turn end to end and relay the answer over `transport`.
    ///
    /// Streaming mode relays each delta as it arrives; non-streaming sends
    /// the collected answer in one piece. Either way durable history records
    /// the user turn, the redaction placeholder when context was injected,
    /// and the full assistant reply.
    pub async fn chat_turn(
        &mut self,
        message: &str,
        transport: &dyn ChatTransport,
        streaming: bool,
    ) -> Result<String> {
        if self.phase != AgentPhase::Ready {
            return Err(AgentError::Protocol(
                "agent is not ready for chat turns".to_string(),
            ));
        }

        self.history.push(ConversationTurn::user(message));
        match self.run_pipeline(transport, streaming).await {
            Ok((answer, context_injected)) => {
                if context_injected {
                    self.history
                        .push(ConversationTurn::opaque_system(OPAQUE_CONTEXT_PLACEHOLDER));
                }
                self.history.push(ConversationTurn::assistant(answer.clone()));
                Ok(answer)
            }
            Err(e) => {
                // No assistant reply was recorded; drop the unanswered user
                // turn so a client retry does not duplicate it.
                self.history.pop();
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &mut self,
        transport: &dyn ChatTransport,
        streaming: bool,
    ) -> Result<(String, bool)> {
        let needs = self.planner.plan(&self.history).await?;
        let context: Option<RetrievedContext> = if needs.is_empty() {
            info!("No information needed, answering from conversation");
            None
        } else {
            let invocations = self.retrieval.request_invocations(&needs).await?;
            Some(
                self.retrieval
                    .execute(&self.config.entity, &invocations)
                    .await?,
            )
        };

        let mut stream = self
            .response
            .respond(self.planner.preamble(), &self.history, context.as_ref())
            .await?;

        let mut answer = String::new();
        if streaming {
            while let Some(delta) = stream.next().await {
                if let Err(e) = transport.send_text(&delta).await {
                    // Peer gone; dropping the stream stops the producer.
                    drop(stream);
                    return Err(AgentError::TransportClosed(e.to_string()));
                }
                answer.push_str(&delta);
            }
        } else {
            answer = stream.collect().await;
            if let Err(e) = transport.send_text(&answer).await {
                return Err(AgentError::TransportClosed(e.to_string()));
            }
        }

        Ok((answer, context.is_some()))
    }
}
