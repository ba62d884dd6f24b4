//! Planning stage
//!
//! The first model pass of a chat turn: given the durable conversation, decide
//! which pieces of filing information the answer needs. The output is an
//! ordered list of natural-language needs; an empty list means the turn can be
//! answered from conversation alone and the retrieval stage is skipped.

use crate::error::AgentError;
use crate::llm::{ChatMessage, CompletionModel};
use crate::models::{AgentConfig, ConversationTurn, FilingType, Role};
use crate::store::FilingStore;
use crate::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Human-readable availability phrase for the capability preamble.
///
/// Empty, single-date, and multi-date availability each read differently so
/// the model does not invent filings outside the known range.
fn readable_date_range(dates: &[NaiveDate]) -> String {
    match dates {
        [] => "NO AVAILABLE DATES".to_string(),
        [only] => format!("for the {}", only),
        [first, .., last] => format!("from the dates {} to {}", first, last),
    }
}

fn build_preamble(
    config: &AgentConfig,
    today: NaiveDate,
    tenk_range: &str,
    tenq_range: &str,
) -> String {
    format!(
        "You are an agent that produces competitive intelligence on {}.\n\
         The current date is {}.\n\
         \n\
         Your job is to answer the user to the best of your ability. \
         If you are unable to answer a question, you must say so. \
         If you need more clarification on the user's request, you must ask.\n\
         \n\
         You have the ability to do the following:\n\
         - Retrieve entire 8-K document summaries by date range or latest entries.\n\
         - Retrieve specific financial statements from 10-K filings (balance sheet, income statement, cash flow statement).\n\
         - Retrieve specific item summaries of 10-K documents by date range or latest entries (these are standard items like 1. Business, 1A. Risk Factors, etc.).\n\
         -- Note: for financial information, do not retrieve Item 8. That is what the previous function is for.\n\
         -- For 10-Ks, you have filing(s) available {}.\n\
         - Retrieve specific financial statements from 10-Q filings (balance sheet, income statement, cash flow statement).\n\
         - Retrieve specific item summaries of 10-Q documents by date range or latest entries (these are standard items like 1A. Risk Factors, 2. Management Discussion, etc.).\n\
         -- Note: for financial information, do not retrieve Item 1. That is what the previous function is for.\n\
         -- For 10-Qs, you have filing(s) available {}.\n\
         \n\
         If a user query pertains to more than one of these items, put multiple entries in the information_needed field, as you will synthesize the data together.\n\
         \n\
         After receiving context from the data retrieval mechanism, you will be penalized for not citing your sources in the format: 'Source: <source name>, <section name (if available)>, <date (if available)>'.",
        config.entity.display_name, today, tenk_range, tenq_range,
    )
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    information_needed: Vec<String>,
}

/// Turn planner bound to one agent configuration.
///
/// The capability preamble is computed once at construction, including the
/// availability ranges, so per-turn planning never touches the store.
pub struct Planner {
    model: Arc<dyn CompletionModel>,
    preamble: String,
}

impl Planner {
    /// Build a planner for `config`, reading filing availability once.
    pub async fn for_config(
        model: Arc<dyn CompletionModel>,
        store: &dyn FilingStore,
        config: &AgentConfig,
        today: NaiveDate,
    ) -> Result<Self> {
        let tenk = store.availability(&config.entity, FilingType::TenK).await?;
        let tenq = store.availability(&config.entity, FilingType::TenQ).await?;

        let preamble = build_preamble(
            config,
            today,
            &readable_date_range(&tenk),
            &readable_date_range(&tenq),
        );

        info!(
            entity = %config.entity.display_name,
            tenk_filings = tenk.len(),
            tenq_filings = tenq.len(),
            "Planner initialized"
        );

        Ok(Self { model, preamble })
    }

    /// The capability preamble, shared with the response stage so both model
    /// passes see the same persona.
    pub fn preamble(&self) -> &str {
        &self.preamble
    }

    /// Decide what information this turn needs. Returns the ordered needs
    /// list; empty means answer from conversation alone.
    pub async fn plan(&self, history: &[ConversationTurn]) -> Result<Vec<String>> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::new(Role::System, self.preamble.clone()));
        for turn in history {
            messages.push(ChatMessage::new(turn.role, turn.content.clone()));
        }
        messages.push(ChatMessage::new(
            Role::System,
            "Respond with ONLY a JSON object of the form \
             {\"information_needed\": [\"...\"]}. List each piece of filing \
             information required to answer the latest user message, in the \
             order it should be retrieved. Use an empty list if the \
             conversation alone suffices.",
        ));

        let raw = self.model.complete(&messages).await?;
        let plan = parse_plan(&raw)?;
        debug!(needs = plan.len(), "Planned turn");
        Ok(plan)
    }
}

/// Parse the planner's JSON reply, tolerating markdown code fences.
fn parse_plan(raw: &str) -> Result<Vec<String>> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let parsed: PlanResponse = serde_json::from_str(cleaned).map_err(|e| {
        let excerpt: String = raw.chars().take(200).collect();
        AgentError::PlanningFailure(format!(
            "unparseable plan response: {} | raw={}",
            e, excerpt
        ))
    })?;

    Ok(parsed.information_needed)
}
