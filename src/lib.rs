//! Competitive Intelligence Orchestrator
//!
//! A conversational agent over summarized SEC filings that:
//! - Plans which filing information each user turn needs
//! - Translates needs into schema-validated retrieval tool calls
//! - Assembles attributed context and streams grounded answers
//! - Keeps bulky retrieved context out of durable conversation history
//! - Manages concurrent (user, agent) chat sessions with a turn budget
//!
//! TURN PIPELINE:
//! MESSAGE → PLAN → RETRIEVE → ASSEMBLE CONTEXT → RESPOND → REDACT

pub mod agent;
pub mod error;
pub mod llm;
pub mod models;
pub mod planner;
pub mod protocol;
pub mod response;
pub mod retrieval;
pub mod session;
pub mod store;
pub mod tools;

pub use error::{AgentError, Result};

// Re-export common types
pub use models::*;
