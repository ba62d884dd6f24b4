//! Core data models for the filing-retrieval orchestrator

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Regulatory filing types the orchestrator can source from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FilingType {
    #[serde(rename = "8-K")]
    EightK,
    #[serde(rename = "10-K")]
    TenK,
    #[serde(rename = "10-Q")]
    TenQ,
}

impl FilingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilingType::EightK => "8-K",
            FilingType::TenK => "10-K",
            FilingType::TenQ => "10-Q",
        }
    }
}

impl fmt::Display for FilingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StatementType {
    #[serde(rename = "balance sheet")]
    BalanceSheet,
    #[serde(rename = "income statement")]
    IncomeStatement,
    #[serde(rename = "cash flow statement")]
    CashFlowStatement,
}

impl StatementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::BalanceSheet => "balance sheet",
            StatementType::IncomeStatement => "income statement",
            StatementType::CashFlowStatement => "cash flow statement",
        }
    }

    /// Title-cased label used in formatted statement headers.
    pub fn title(&self) -> &'static str {
        match self {
            StatementType::BalanceSheet => "Balance Sheet",
            StatementType::IncomeStatement => "Income Statement",
            StatementType::CashFlowStatement => "Cash Flow Statement",
        }
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//
// ================= Conversation =================
//

/// One turn of durable conversation history.
///
/// The sequence is append-only; the only mutation is replacing an injected
/// context payload with a fixed placeholder, which sets `opaque`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub opaque: bool,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            opaque: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            opaque: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            opaque: false,
        }
    }

    /// A redacted placeholder turn standing in for injected context.
    pub fn opaque_system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            opaque: true,
        }
    }
}

//
// ================= Retrieval =================
//

/// How a tool selects filings: an inclusive date range or the latest N.
///
/// Construction goes through [`RetrievalWindow::date_range`] /
/// [`RetrievalWindow::latest`] so the mode invariants hold everywhere
/// downstream of argument validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalWindow {
    DateRange { start: NaiveDate, end: NaiveDate },
    Latest { count: usize },
}

impl RetrievalWindow {
    pub fn date_range(start: NaiveDate, end: NaiveDate) -> crate::Result<Self> {
        if start > end {
            return Err(crate::error::AgentError::InvalidArguments(format!(
                "start_date {} is after end_date {}",
                start, end
            )));
        }
        Ok(RetrievalWindow::DateRange { start, end })
    }

    pub fn latest(count: i64) -> crate::Result<Self> {
        if count < 1 {
            return Err(crate::error::AgentError::InvalidArguments(format!(
                "latest_count must be positive, got {}",
                count
            )));
        }
        Ok(RetrievalWindow::Latest {
            count: count as usize,
        })
    }
}

/// One tool call emitted by the retrieval model. Arguments are raw JSON until
/// the owning tool validates them against its schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The single-use context blob assembled for one completion call.
///
/// Never persisted to durable history; the fingerprint is logged so identical
/// retrievals are recognizable across turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedContext {
    pub text: String,
    pub fingerprint: String,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

//
// ================= Agent Configuration =================
//

/// A public company the agent is scoped to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entity {
    pub cik: String,
    pub display_name: String,
}

/// Immutable per-agent configuration. Every session built from it holds a
/// shared reference; nothing here changes for the session's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub entity: Entity,
    /// Start of the filing lookback window.
    pub start_date: NaiveDate,
    /// Which filing types this agent is allowed to source.
    pub sources: Vec<FilingType>,
}

/// A filing the lookback window expects but the store has not cached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissingFiling {
    pub source: FilingType,
    pub filing_date: NaiveDate,
}
