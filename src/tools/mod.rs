//! Tool trait and registry
//!
//! A fixed catalog of schema-validated retrieval operations, each bound to a
//! filing store call. Registration happens once at startup; a duplicate name
//! there is a configuration error. Dispatch against an unknown name is the
//! retrieval stage's problem to recover from, not a crash.

use crate::error::AgentError;
use crate::models::{Entity, FilingType, RetrievalWindow, StatementType};
use crate::store::FilingStore;
use crate::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// 10-K sections the catalog exposes. Closed set; anything else is an
/// argument validation error.
pub const TENK_SECTIONS: &[&str] = &[
    "Item 1 Business",
    "Item 1A Risk Factors",
    "Item 2 Properties",
    "Item 3 Legal Proceedings",
    "Item 7 Management Discussion and Analysis",
    "Item 7A Disclosures About Market Risk",
];

/// 10-Q sections the catalog exposes.
pub const TENQ_SECTIONS: &[&str] = &[
    "Item 1A Risk Factors",
    "Item 2 Management Discussion & Analysis of Financial Condition and Results of Operations",
    "Item 3 Disclosures About Market Risk",
];

const STATEMENT_TYPES: &[&str] = &["balance sheet", "income statement", "cash flow statement"];

/// One retrieval operation: a parameter schema plus a store-backed execution.
#[async_trait::async_trait]
pub trait FilingTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> String;
    /// JSON-schema parameter object shipped to the retrieval model.
    fn schema(&self) -> Value;
    /// Validate `arguments` and execute against the store.
    async fn invoke(
        &self,
        store: &dyn FilingStore,
        entity: &Entity,
        arguments: &Value,
    ) -> Result<String>;
}

//
// ================= Argument validation =================
//

#[derive(Debug, Deserialize)]
struct DateRangeArgs {
    start_date: String,
    end_date: String,
}

#[derive(Debug, Deserialize)]
struct WindowArgs {
    retrieval_mode: String,
    date_range: Option<DateRangeArgs>,
    latest_count: Option<i64>,
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| AgentError::InvalidArguments(format!("bad date '{}': {}", value, e)))
}

/// Validate the shared retrieval-mode parameters into a typed window.
///
/// `date_range` mode requires both bounds in order; `latest` mode requires a
/// positive count. Violations are validation errors, raised before any store
/// call is made.
pub fn parse_window(arguments: &Value) -> Result<RetrievalWindow> {
    let args: WindowArgs = serde_json::from_value(arguments.clone())
        .map_err(|e| AgentError::InvalidArguments(format!("bad tool arguments: {}", e)))?;

    match args.retrieval_mode.as_str() {
        "date_range" => {
            let range = args.date_range.ok_or_else(|| {
                AgentError::InvalidArguments(
                    "retrieval_mode 'date_range' requires a date_range object".to_string(),
                )
            })?;
            RetrievalWindow::date_range(parse_date(&range.start_date)?, parse_date(&range.end_date)?)
        }
        "latest" => {
            let count = args.latest_count.ok_or_else(|| {
                AgentError::InvalidArguments(
                    "retrieval_mode 'latest' requires latest_count".to_string(),
                )
            })?;
            RetrievalWindow::latest(count)
        }
        other => Err(AgentError::InvalidArguments(format!(
            "unknown retrieval_mode '{}'",
            other
        ))),
    }
}

/// The retrieval-mode parameter properties shared by every tool schema.
fn window_schema_properties() -> Value {
    json!({
        "retrieval_mode": {
            "type": "string",
            "enum": ["date_range", "latest"],
            "description": "Mode of retrieval: by date range or latest entries."
        },
        "date_range": {
            "type": "object",
            "properties": {
                "start_date": {
                    "type": "string",
                    "format": "date",
                    "description": "Start date for the range (YYYY-MM-DD)."
                },
                "end_date": {
                    "type": "string",
                    "format": "date",
                    "description": "End date for the range (YYYY-MM-DD)."
                }
            },
            "required": ["start_date", "end_date"],
            "description": "Date range filter. Required if retrieval_mode is 'date_range'."
        },
        "latest_count": {
            "type": "integer",
            "description": "Number of latest entries to retrieve. Required if retrieval_mode is 'latest'."
        }
    })
}

fn merge_properties(extra: Value) -> Value {
    let mut properties = window_schema_properties();
    if let (Some(base), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    properties
}

//
// ================= Tools =================
//

/// Whole-document summaries (8-K).
pub struct DocumentsTool {
    filing_type: FilingType,
    tool_name: &'static str,
}

#[async_trait::async_trait]
impl FilingTool for DocumentsTool {
    fn name(&self) -> &'static str {
        self.tool_name
    }

    fn description(&self) -> String {
        format!(
            "Retrieve {} document summaries by date range or latest entries.",
            self.filing_type
        )
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": window_schema_properties(),
            "required": ["retrieval_mode"],
            "additionalProperties": false
        })
    }

    async fn invoke(
        &self,
        store: &dyn FilingStore,
        entity: &Entity,
        arguments: &Value,
    ) -> Result<String> {
        let window = parse_window(arguments)?;
        store.get_documents(entity, self.filing_type, &window).await
    }
}

/// Named section summaries (10-K / 10-Q).
pub struct SectionsTool {
    filing_type: FilingType,
    tool_name: &'static str,
    allowed_sections: &'static [&'static str],
}

#[derive(Debug, Deserialize)]
struct SectionsArgs {
    sections: Vec<String>,
}

#[async_trait::async_trait]
impl FilingTool for SectionsTool {
    fn name(&self) -> &'static str {
        self.tool_name
    }

    fn description(&self) -> String {
        format!(
            "Retrieve specific sections of {} summaries by date range or latest entries.",
            self.filing_type
        )
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": merge_properties(json!({
                "sections": {
                    "type": "array",
                    "items": {
                        "type": "string",
                        "enum": self.allowed_sections,
                        "description": format!("Section of the {} to retrieve.", self.filing_type)
                    },
                    "description": format!("List of {} sections to retrieve.", self.filing_type)
                }
            })),
            "required": ["sections", "retrieval_mode"],
            "additionalProperties": false
        })
    }

    async fn invoke(
        &self,
        store: &dyn FilingStore,
        entity: &Entity,
        arguments: &Value,
    ) -> Result<String> {
        let args: SectionsArgs = serde_json::from_value(arguments.clone())
            .map_err(|e| AgentError::InvalidArguments(format!("bad tool arguments: {}", e)))?;

        if args.sections.is_empty() {
            return Err(AgentError::InvalidArguments(
                "sections must not be empty".to_string(),
            ));
        }
        if let Some(unknown) = args
            .sections
            .iter()
            .find(|section| !self.allowed_sections.contains(&section.as_str()))
        {
            return Err(AgentError::InvalidArguments(format!(
                "unknown {} section '{}'",
                self.filing_type, unknown
            )));
        }

        let window = parse_window(arguments)?;
        store
            .get_sections(entity, self.filing_type, &args.sections, &window)
            .await
    }
}

/// One financial statement type from 10-K / 10-Q filings.
pub struct FinancialStatementTool {
    filing_type: FilingType,
    tool_name: &'static str,
}

#[derive(Debug, Deserialize)]
struct StatementArgs {
    statement_type: StatementType,
}

#[async_trait::async_trait]
impl FilingTool for FinancialStatementTool {
    fn name(&self) -> &'static str {
        self.tool_name
    }

    fn description(&self) -> String {
        format!(
            "Retrieve specific financial statements (balance sheet, income statement, \
             or cash flow statement) from {} filings.",
            self.filing_type
        )
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": merge_properties(json!({
                "statement_type": {
                    "type": "string",
                    "enum": STATEMENT_TYPES,
                    "description": "The type of financial statement to retrieve."
                }
            })),
            "required": ["statement_type", "retrieval_mode"],
            "additionalProperties": false
        })
    }

    async fn invoke(
        &self,
        store: &dyn FilingStore,
        entity: &Entity,
        arguments: &Value,
    ) -> Result<String> {
        let args: StatementArgs = serde_json::from_value(arguments.clone())
            .map_err(|e| AgentError::InvalidArguments(format!("bad tool arguments: {}", e)))?;
        let window = parse_window(arguments)?;
        store
            .get_financial_statement(entity, self.filing_type, args.statement_type, &window)
            .await
    }
}

//
// ================= Registry =================
//

/// Closed-set tool lookup with startup-time duplicate detection.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn FilingTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn FilingTool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn FilingTool>> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// The catalog shipped to the retrieval model, sorted by name so the
    /// prompt is deterministic.
    pub fn catalog(&self) -> Value {
        let mut entries: Vec<(&str, &Arc<dyn FilingTool>)> = self
            .tools
            .iter()
            .map(|(name, tool)| (name.as_str(), tool))
            .collect();
        entries.sort_unstable_by_key(|(name, _)| *name);

        Value::Array(
            entries
                .into_iter()
                .map(|(_, tool)| {
                    json!({
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.schema(),
                    })
                })
                .collect(),
        )
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The fixed filing-retrieval catalog.
pub fn default_registry() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(DocumentsTool {
        filing_type: FilingType::EightK,
        tool_name: "retrieve_8K_documents",
    }))?;
    registry.register(Arc::new(SectionsTool {
        filing_type: FilingType::TenK,
        tool_name: "retrieve_10K_sections",
        allowed_sections: TENK_SECTIONS,
    }))?;
    registry.register(Arc::new(FinancialStatementTool {
        filing_type: FilingType::TenK,
        tool_name: "retrieve_10K_financial_statement",
    }))?;
    registry.register(Arc::new(SectionsTool {
        filing_type: FilingType::TenQ,
        tool_name: "retrieve_10Q_sections",
        allowed_sections: TENQ_SECTIONS,
    }))?;
    registry.register(Arc::new(FinancialStatementTool {
        filing_type: FilingType::TenQ,
        tool_name: "retrieve_10Q_financial_statement",
    }))?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FilingRecord, InMemoryFilingStore};

    fn entity() -> Entity {
        Entity {
            cik: "0001018724".to_string(),
            display_name: "Amazon.com, Inc.".to_string(),
        }
    }

    #[test]
    fn default_registry_has_the_full_catalog() {
        let registry = default_registry().unwrap();
        assert_eq!(
            registry.list(),
            vec![
                "retrieve_10K_financial_statement",
                "retrieve_10K_sections",
                "retrieve_10Q_financial_statement",
                "retrieve_10Q_sections",
                "retrieve_8K_documents",
            ]
        );
    }

    #[test]
    fn duplicate_registration_is_a_configuration_error() {
        let mut registry = default_registry().unwrap();
        let result = registry.register(Arc::new(DocumentsTool {
            filing_type: FilingType::EightK,
            tool_name: "retrieve_8K_documents",
        }));
        assert!(matches!(result, Err(AgentError::DuplicateTool(_))));
    }

    #[test]
    fn unknown_lookup_is_typed() {
        let registry = default_registry().unwrap();
        assert!(matches!(
            registry.get("retrieve_S1_documents"),
            Err(AgentError::UnknownTool(_))
        ));
    }

    #[test]
    fn window_validation_catches_mode_violations() {
        // date_range without bounds
        assert!(matches!(
            parse_window(&json!({"retrieval_mode": "date_range"})),
            Err(AgentError::InvalidArguments(_))
        ));
        // inverted bounds
        assert!(matches!(
            parse_window(&json!({
                "retrieval_mode": "date_range",
                "date_range": {"start_date": "2024-06-01", "end_date": "2024-01-01"}
            })),
            Err(AgentError::InvalidArguments(_))
        ));
        // latest without count
        assert!(matches!(
            parse_window(&json!({"retrieval_mode": "latest"})),
            Err(AgentError::InvalidArguments(_))
        ));
        // nonpositive count
        assert!(matches!(
            parse_window(&json!({"retrieval_mode": "latest", "latest_count": 0})),
            Err(AgentError::InvalidArguments(_))
        ));
        // well-formed
        assert!(parse_window(&json!({"retrieval_mode": "latest", "latest_count": 3})).is_ok());
    }

    #[test]
    fn malformed_date_is_a_validation_error() {
        let result = parse_window(&json!({
            "retrieval_mode": "date_range",
            "date_range": {"start_date": "June 1, 2024", "end_date": "2024-06-30"}
        }));
        assert!(matches!(result, Err(AgentError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn sections_tool_rejects_unknown_sections() {
        let registry = default_registry().unwrap();
        let tool = registry.get("retrieve_10K_sections").unwrap();
        let store = InMemoryFilingStore::new();

        let result = tool
            .invoke(
                &store,
                &entity(),
                &json!({
                    "sections": ["Item 99 Moonshots"],
                    "retrieval_mode": "latest",
                    "latest_count": 1
                }),
            )
            .await;
        assert!(matches!(result, Err(AgentError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn sections_tool_fetches_from_the_store() {
        let registry = default_registry().unwrap();
        let tool = registry.get("retrieve_10K_sections").unwrap();
        let store = InMemoryFilingStore::new();

        let mut sections = HashMap::new();
        sections.insert("Item 1 Business".to_string(), "retail and cloud".to_string());
        store
            .insert_filing(
                &entity(),
                FilingType::TenK,
                chrono::NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
                FilingRecord {
                    sections,
                    ..FilingRecord::default()
                },
            )
            .await;

        let text = tool
            .invoke(
                &store,
                &entity(),
                &json!({
                    "sections": ["Item 1 Business"],
                    "retrieval_mode": "latest",
                    "latest_count": 1
                }),
            )
            .await
            .unwrap();
        assert!(text.contains("retail and cloud"));
    }

    #[tokio::test]
    async fn statement_tool_validates_statement_type() {
        let registry = default_registry().unwrap();
        let tool = registry.get("retrieve_10Q_financial_statement").unwrap();
        let store = InMemoryFilingStore::new();

        let result = tool
            .invoke(
                &store,
                &entity(),
                &json!({
                    "statement_type": "profit ledger",
                    "retrieval_mode": "latest",
                    "latest_count": 1
                }),
            )
            .await;
        assert!(matches!(result, Err(AgentError::InvalidArguments(_))));
    }

    #[test]
    fn catalog_is_sorted_and_schema_bearing() {
        let registry = default_registry().unwrap();
        let catalog = registry.catalog();
        let names: Vec<&str> = catalog
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["name"].as_str().unwrap())
            .collect();

        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);

        for entry in catalog.as_array().unwrap() {
            assert_eq!(entry["parameters"]["type"], "object");
            assert!(entry["parameters"]["properties"]["retrieval_mode"].is_object());
        }
    }
}
