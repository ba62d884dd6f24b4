//! Session registry
//!
//! Maps (user, agent) pairs to live chat sessions and routes inbound frames
//! to the owning orchestrator. The registry lock is held only for map
//! operations; each orchestrator sits behind its own mutex so a long model
//! call never blocks unrelated sessions.

use crate::agent::{AgentPhase, Orchestrator};
use crate::error::AgentError;
use crate::protocol::{ChatTransport, ServerMessage};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Hard cap on chat turns per session.
pub const MAX_CHAT_TURNS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    /// Transport registered, orchestrator not yet attached.
    Registered,
    /// Fully operational.
    Bound,
    /// Turn budget exhausted; refuses further turns until deregistered.
    Closed,
}

struct Session {
    transport: Arc<dyn ChatTransport>,
    orchestrator: Option<Arc<Mutex<Orchestrator>>>,
    state: SessionState,
    turns_taken: u32,
    streaming: bool,
}

/// Concurrent session registry.
pub struct SessionManager {
    sessions: RwLock<HashMap<(Uuid, Uuid), Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a transport for a (user, agent) pair. An existing live
    /// session is never evicted; the caller must deregister it first.
    pub async fn register(
        &self,
        user_id: Uuid,
        agent_id: Uuid,
        transport: Arc<dyn ChatTransport>,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&(user_id, agent_id)) {
            return Err(AgentError::DuplicateSession { user_id, agent_id });
        }
        sessions.insert(
            (user_id, agent_id),
            Session {
                transport,
                orchestrator: None,
                state: SessionState::Registered,
                turns_taken: 0,
                streaming: true,
            },
        );
        info!(%user_id, %agent_id, "Session registered");
        Ok(())
    }

    /// Attach an orchestrator to a registered session.
    pub async fn bind(
        &self,
        user_id: Uuid,
        agent_id: Uuid,
        orchestrator: Orchestrator,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&(user_id, agent_id))
            .ok_or(AgentError::NoActiveSession { user_id, agent_id })?;
        session.orchestrator = Some(Arc::new(Mutex::new(orchestrator)));
        session.state = SessionState::Bound;
        info!(%user_id, %agent_id, "Session bound");
        Ok(())
    }

    /// Switch a session between streamed and whole-message replies.
    pub async fn set_streaming(&self, user_id: Uuid, agent_id: Uuid, streaming: bool) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&(user_id, agent_id))
            .ok_or(AgentError::NoActiveSession { user_id, agent_id })?;
        session.streaming = streaming;
        Ok(())
    }

    /// Remove a session. Idempotent; a missing key is logged, not an error.
    pub async fn deregister(&self, user_id: Uuid, agent_id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(&(user_id, agent_id)).is_none() {
            warn!(%user_id, %agent_id, "Attempting to delete a session that no longer exists");
        } else {
            info!(%user_id, %agent_id, "Session deregistered");
        }
    }

    async fn lookup(
        &self,
        user_id: Uuid,
        agent_id: Uuid,
    ) -> Result<(Arc<dyn ChatTransport>, Arc<Mutex<Orchestrator>>, bool)> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(&(user_id, agent_id))
            .ok_or(AgentError::NoActiveSession { user_id, agent_id })?;
        if session.state == SessionState::Closed {
            return Err(AgentError::TurnLimitExhausted);
        }
        let orchestrator = session
            .orchestrator
            .clone()
            .ok_or_else(|| AgentError::Protocol("session has no orchestrator bound".to_string()))?;
        Ok((session.transport.clone(), orchestrator, session.streaming))
    }

    /// Charge one turn against the session's budget. Exhausting the budget
    /// closes the session.
    pub async fn begin_turn(&self, user_id: Uuid, agent_id: Uuid) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&(user_id, agent_id))
            .ok_or(AgentError::NoActiveSession { user_id, agent_id })?;
        if session.state == SessionState::Closed || session.turns_taken >= MAX_CHAT_TURNS {
            session.state = SessionState::Closed;
            return Err(AgentError::TurnLimitExhausted);
        }
        session.turns_taken += 1;
        Ok(())
    }

    /// Apply the turn/session failure split to one failed operation.
    ///
    /// Turn-level failures are reported on the transport and the session
    /// survives; anything else deregisters the session and propagates.
    async fn absorb_failure(
        &self,
        user_id: Uuid,
        agent_id: Uuid,
        transport: &dyn ChatTransport,
        error: AgentError,
    ) -> Result<()> {
        if error.is_turn_level() {
            warn!(%user_id, %agent_id, "Turn failed, session kept: {}", error);
            transport
                .send_message(&ServerMessage::TurnFailed(error.to_string()))
                .await
        } else {
            warn!(%user_id, %agent_id, "Session failure, deregistering: {}", error);
            self.deregister(user_id, agent_id).await;
            Err(error)
        }
    }

    /// Run the pre-flight gap check and announce the outcome.
    pub async fn start(&self, user_id: Uuid, agent_id: Uuid) -> Result<()> {
        let (transport, orchestrator, _) = self.lookup(user_id, agent_id).await?;

        let outcome = {
            let mut agent = orchestrator.lock().await;
            agent.check_missing_data().await
        };
        let gaps = match outcome {
            Ok(gaps) => gaps,
            Err(e) => {
                return self
                    .absorb_failure(user_id, agent_id, transport.as_ref(), e)
                    .await
            }
        };

        let announcement = if gaps.is_empty() {
            ServerMessage::AgentReady
        } else {
            ServerMessage::MissingData(gaps)
        };
        if let Err(e) = transport.send_message(&announcement).await {
            // Peer is already gone.
            self.deregister(user_id, agent_id).await;
            return Err(e);
        }
        Ok(())
    }

    /// Route one inbound frame to its session.
    ///
    /// Before readiness the frame is the fill-or-skip decision. After, it is
    /// a chat message: turn-level failures are reported on the transport and
    /// the session survives; anything else tears the session down.
    pub async fn handle_incoming(&self, user_id: Uuid, agent_id: Uuid, raw: &str) -> Result<()> {
        let (transport, orchestrator, streaming) = self.lookup(user_id, agent_id).await?;

        let phase = orchestrator.lock().await.phase();
        match phase {
            AgentPhase::AwaitingFillDecision | AgentPhase::Filling => {
                let outcome = {
                    let mut agent = orchestrator.lock().await;
                    agent.handle_fill_decision(raw).await
                };
                if let Err(e) = outcome {
                    return self
                        .absorb_failure(user_id, agent_id, transport.as_ref(), e)
                        .await;
                }
                transport.send_message(&ServerMessage::AgentReady).await
            }
            AgentPhase::Ready => {
                self.begin_turn(user_id, agent_id).await?;
                let outcome = {
                    let mut agent = orchestrator.lock().await;
                    agent.chat_turn(raw, transport.as_ref(), streaming).await
                };
                match outcome {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        self.absorb_failure(user_id, agent_id, transport.as_ref(), e)
                            .await
                    }
                }
            }
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockCompletionModel;
    use crate::models::{AgentConfig, Entity, FilingType, RetrievalWindow, StatementType};
    use crate::store::{FilingRecord, FilingStore, InMemoryFilingStore};
    use crate::tools::default_registry;
    use chrono::NaiveDate;
    use std::sync::Mutex as StdMutex;

    /// Store whose summarizer is offline: reads work, fills fail.
    struct UnfillableStore(InMemoryFilingStore);

    #[async_trait::async_trait]
    impl FilingStore for UnfillableStore {
        async fn get_documents(
            &self,
            entity: &Entity,
            filing_type: FilingType,
            window: &RetrievalWindow,
        ) -> Result<String> {
            self.0.get_documents(entity, filing_type, window).await
        }

        async fn get_sections(
            &self,
            entity: &Entity,
            filing_type: FilingType,
            sections: &[String],
            window: &RetrievalWindow,
        ) -> Result<String> {
            self.0.get_sections(entity, filing_type, sections, window).await
        }

        async fn get_financial_statement(
            &self,
            entity: &Entity,
            filing_type: FilingType,
            statement_type: StatementType,
            window: &RetrievalWindow,
        ) -> Result<String> {
            self.0
                .get_financial_statement(entity, filing_type, statement_type, window)
                .await
        }

        async fn availability(
            &self,
            entity: &Entity,
            filing_type: FilingType,
        ) -> Result<Vec<NaiveDate>> {
            self.0.availability(entity, filing_type).await
        }

        async fn published(
            &self,
            entity: &Entity,
            filing_type: FilingType,
            since: NaiveDate,
        ) -> Result<Vec<NaiveDate>> {
            self.0.published(entity, filing_type, since).await
        }

        async fn fill(
            &self,
            _entity: &Entity,
            _filing_type: FilingType,
            _date: NaiveDate,
        ) -> Result<()> {
            Err(AgentError::AdapterUnavailable("summarizer offline".to_string()))
        }
    }

    struct RecordingTransport {
        texts: StdMutex<Vec<String>>,
        messages: StdMutex<Vec<serde_json::Value>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                texts: StdMutex::new(Vec::new()),
                messages: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl ChatTransport for RecordingTransport {
        async fn send_text(&self, text: &str) -> Result<()> {
            self.texts.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn send_message(&self, message: &ServerMessage) -> Result<()> {
            self.messages.lock().unwrap().push(message.to_json());
            Ok(())
        }
    }

    fn entity() -> Entity {
        Entity {
            cik: "0001652044".to_string(),
            display_name: "Alphabet Inc.".to_string(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config() -> Arc<AgentConfig> {
        Arc::new(AgentConfig {
            entity: entity(),
            start_date: date(2024, 1, 1),
            sources: vec![FilingType::EightK],
        })
    }

    async fn orchestrator(scripts: &[&str]) -> Orchestrator {
        let store = Arc::new(InMemoryFilingStore::new());
        store
            .insert_filing(
                &entity(),
                FilingType::EightK,
                date(2024, 4, 25),
                FilingRecord {
                    summary: "earnings release".to_string(),
                    ..FilingRecord::default()
                },
            )
            .await;
        Orchestrator::new(
            config(),
            store,
            Arc::new(default_registry().unwrap()),
            Arc::new(MockCompletionModel::scripted(scripts)),
            date(2024, 9, 1),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let manager = SessionManager::new();
        let user = Uuid::new_v4();
        let agent = Uuid::new_v4();

        manager
            .register(user, agent, RecordingTransport::new())
            .await
            .unwrap();
        let result = manager.register(user, agent, RecordingTransport::new()).await;
        assert!(matches!(result, Err(AgentError::DuplicateSession { .. })));
    }

    #[tokio::test]
    async fn deregister_is_idempotent() {
        let manager = SessionManager::new();
        let user = Uuid::new_v4();
        let agent = Uuid::new_v4();

        manager
            .register(user, agent, RecordingTransport::new())
            .await
            .unwrap();
        manager.deregister(user, agent).await;
        // Second delete logs a warning but does not fail.
        manager.deregister(user, agent).await;

        // The key is free again.
        manager
            .register(user, agent, RecordingTransport::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bind_requires_registration() {
        let manager = SessionManager::new();
        let result = manager
            .bind(Uuid::new_v4(), Uuid::new_v4(), orchestrator(&[]).await)
            .await;
        assert!(matches!(result, Err(AgentError::NoActiveSession { .. })));
    }

    #[tokio::test]
    async fn turn_budget_closes_the_session() {
        let manager = SessionManager::new();
        let user = Uuid::new_v4();
        let agent = Uuid::new_v4();
        manager
            .register(user, agent, RecordingTransport::new())
            .await
            .unwrap();

        for _ in 0..MAX_CHAT_TURNS {
            manager.begin_turn(user, agent).await.unwrap();
        }
        assert!(matches!(
            manager.begin_turn(user, agent).await,
            Err(AgentError::TurnLimitExhausted)
        ));
        // Closed sessions refuse routing until deregistered.
        assert!(matches!(
            manager.handle_incoming(user, agent, "hello").await,
            Err(AgentError::TurnLimitExhausted)
        ));
    }

    #[tokio::test]
    async fn start_announces_readiness_when_no_gaps() {
        let manager = SessionManager::new();
        let user = Uuid::new_v4();
        let agent = Uuid::new_v4();
        let transport = RecordingTransport::new();

        manager.register(user, agent, transport.clone()).await.unwrap();
        manager.bind(user, agent, orchestrator(&[]).await).await.unwrap();
        manager.start(user, agent).await.unwrap();

        let messages = transport.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["MESSAGE_TYPE"], "AGENT_STATUS");
        assert_eq!(messages[0]["MESSAGE_SUBTYPE"], "READY");
    }

    #[tokio::test]
    async fn chat_frames_flow_through_the_pipeline() {
        let manager = SessionManager::new();
        let user = Uuid::new_v4();
        let agent = Uuid::new_v4();
        let transport = RecordingTransport::new();

        manager.register(user, agent, transport.clone()).await.unwrap();
        manager
            .bind(
                user,
                agent,
                orchestrator(&[
                    r#"{"information_needed": []}"#,
                    "Hello! Ask me about their filings.",
                ])
                .await,
            )
            .await
            .unwrap();
        manager.start(user, agent).await.unwrap();

        manager.handle_incoming(user, agent, "hi there").await.unwrap();
        assert_eq!(
            transport.texts.lock().unwrap().concat(),
            "Hello! Ask me about their filings."
        );
    }

    #[tokio::test]
    async fn fill_failure_tears_down_the_session() {
        let manager = SessionManager::new();
        let user = Uuid::new_v4();
        let agent_id = Uuid::new_v4();
        let transport = RecordingTransport::new();

        let inner = InMemoryFilingStore::new();
        inner
            .publish_only(&entity(), FilingType::EightK, date(2024, 5, 2))
            .await;
        let orch = Orchestrator::new(
            config(),
            Arc::new(UnfillableStore(inner)),
            Arc::new(default_registry().unwrap()),
            Arc::new(MockCompletionModel::scripted(&[])),
            date(2024, 9, 1),
        )
        .await
        .unwrap();

        manager.register(user, agent_id, transport.clone()).await.unwrap();
        manager.bind(user, agent_id, orch).await.unwrap();
        manager.start(user, agent_id).await.unwrap();

        {
            let messages = transport.messages.lock().unwrap();
            assert_eq!(messages[0]["MESSAGE_SUBTYPE"], "MISSING_DATA");
        }

        let result = manager
            .handle_incoming(
                user,
                agent_id,
                r#"{"MESSAGE_TYPE":"USER_EVENT","MESSAGE_SUBTYPE":"FILL_DATA"}"#,
            )
            .await;
        assert!(matches!(result, Err(AgentError::AdapterUnavailable(_))));

        // The failed session was removed; the key is free for a reconnect.
        manager
            .register(user, agent_id, RecordingTransport::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn turn_failures_keep_the_session_alive() {
        let manager = SessionManager::new();
        let user = Uuid::new_v4();
        let agent = Uuid::new_v4();
        let transport = RecordingTransport::new();

        manager.register(user, agent, transport.clone()).await.unwrap();
        // Script exhausted on the first plan call: a turn-level failure.
        manager.bind(user, agent, orchestrator(&[]).await).await.unwrap();
        manager.start(user, agent).await.unwrap();

        manager.handle_incoming(user, agent, "hi").await.unwrap();

        let messages = transport.messages.lock().unwrap();
        let failed = messages
            .iter()
            .find(|m| m["MESSAGE_SUBTYPE"] == "TURN_FAILED")
            .unwrap();
        assert_eq!(failed["MESSAGE_TYPE"], "SERVER_MESSAGE");
        drop(messages);

        // Still registered and routable.
        assert!(manager.begin_turn(user, agent).await.is_ok());
    }

    #[tokio::test]
    async fn sessions_with_different_keys_are_independent() {
        let manager = Arc::new(SessionManager::new());
        let agent = Uuid::new_v4();
        let users: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();

        let mut handles = Vec::new();
        for user in &users {
            let manager = manager.clone();
            let user = *user;
            handles.push(tokio::spawn(async move {
                manager
                    .register(user, agent, RecordingTransport::new())
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for user in &users {
            manager.begin_turn(*user, agent).await.unwrap();
        }
    }
}
