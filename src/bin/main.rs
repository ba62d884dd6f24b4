use chrono::{NaiveDate, Utc};
use ci_orchestrator::{
    agent::Orchestrator,
    llm::{CompletionModel, MockCompletionModel, OpenAiClient},
    models::{AgentConfig, Entity, FilingType},
    protocol::{ChatTransport, ServerMessage},
    session::SessionManager,
    store::{FilingRecord, InMemoryFilingStore},
    tools::default_registry,
    Result,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Demo transport that prints assistant output and protocol frames.
struct StdoutTransport;

#[async_trait::async_trait]
impl ChatTransport for StdoutTransport {
    async fn send_text(&self, text: &str) -> Result<()> {
        print!("{}", text);
        use std::io::Write;
        std::io::stdout().flush()?;
        Ok(())
    }

    async fn send_message(&self, message: &ServerMessage) -> Result<()> {
        println!("\n[server] {}", message.to_json());
        Ok(())
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

async fn seed_store(entity: &Entity) -> Arc<InMemoryFilingStore> {
    let store = Arc::new(InMemoryFilingStore::new());

    let mut sections = HashMap::new();
    sections.insert(
        "Item 1A Risk Factors".to_string(),
        "Heavy dependence on a small number of cloud infrastructure suppliers; \
         regulatory exposure in the EU and UK."
            .to_string(),
    );
    sections.insert(
        "Item 1 Business".to_string(),
        "Consumer retail, advertising, and cloud infrastructure segments.".to_string(),
    );
    store
        .insert_filing(
            entity,
            FilingType::TenK,
            date(2024, 2, 2),
            FilingRecord {
                sections,
                ..FilingRecord::default()
            },
        )
        .await;
    store
        .insert_filing(
            entity,
            FilingType::EightK,
            date(2024, 4, 30),
            FilingRecord {
                summary: "Announced Q1 results: revenue up 13% year over year.".to_string(),
                ..FilingRecord::default()
            },
        )
        .await;
    // Published but not yet summarized, so the pre-flight check reports it.
    store
        .publish_only(entity, FilingType::TenQ, date(2024, 5, 1))
        .await;

    store
}

/// A live client when credentials are configured, otherwise a scripted model
/// so the demo runs offline.
fn build_model() -> Result<Arc<dyn CompletionModel>> {
    if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model =
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        info!(%model, "Using live completion API");
        return Ok(Arc::new(OpenAiClient::new(api_key, base_url, model)?));
    }

    info!("OPENAI_API_KEY not set, using scripted model");
    Ok(Arc::new(MockCompletionModel::scripted(&[
        r#"{"information_needed": ["latest 10-K risk factors"]}"#,
        r#"{"tool_calls": [{"name": "retrieve_10K_sections", "arguments": {"sections": ["Item 1A Risk Factors"], "retrieval_mode": "latest", "latest_count": 1}}]}"#,
        "Their dominant risks are supplier concentration in cloud infrastructure and \
         European regulatory exposure. Source: 10-K, Item 1A Risk Factors, 2024-02-02",
        r#"{"information_needed": []}"#,
        "You're welcome. Ask me anything else about their filings.",
    ])))
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Competitive Intelligence Orchestrator starting");

    let entity = Entity {
        cik: "0001018724".to_string(),
        display_name: "Amazon.com, Inc.".to_string(),
    };
    let config = Arc::new(AgentConfig {
        entity: entity.clone(),
        start_date: date(2024, 1, 1),
        sources: vec![FilingType::EightK, FilingType::TenK, FilingType::TenQ],
    });

    let store = seed_store(&entity).await;
    let registry = Arc::new(default_registry()?);
    let model = build_model()?;

    let orchestrator = Orchestrator::new(
        config,
        store,
        registry,
        model,
        Utc::now().date_naive(),
    )
    .await?;

    let manager = SessionManager::new();
    let user_id = Uuid::new_v4();
    let agent_id = Uuid::new_v4();

    manager
        .register(user_id, agent_id, Arc::new(StdoutTransport))
        .await?;
    manager.bind(user_id, agent_id, orchestrator).await?;

    // Pre-flight: announces the unsummarized 10-Q as missing data.
    manager.start(user_id, agent_id).await?;

    // Client decides to skip filling and starts chatting.
    manager
        .handle_incoming(
            user_id,
            agent_id,
            r#"{"MESSAGE_TYPE":"USER_EVENT","MESSAGE_SUBTYPE":"SKIP_FILL_DATA"}"#,
        )
        .await?;

    println!("\nUser: what are their biggest risks?");
    manager
        .handle_incoming(user_id, agent_id, "what are their biggest risks?")
        .await?;
    println!();

    // Second turn in whole-message mode.
    manager.set_streaming(user_id, agent_id, false).await?;
    println!("\nUser: thanks, that helps");
    manager
        .handle_incoming(user_id, agent_id, "thanks, that helps")
        .await?;
    println!();

    manager.deregister(user_id, agent_id).await;
    info!("Demo session complete");
    Ok(())
}
