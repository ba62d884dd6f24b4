//! Language-model capability
//!
//! The orchestrator treats the model as a capability: given a message
//! sequence, produce a completion, optionally as a token stream. The default
//! client speaks the OpenAI-compatible chat completions API over a long-lived
//! pooled `reqwest::Client`.

use crate::error::AgentError;
use crate::models::Role;
use crate::Result;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// One message in a completion request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A finite, single-consumption sequence of text deltas.
///
/// Backpressure is consumer pull over a bounded channel. Dropping the stream
/// closes the channel; the producer notices its next send fail and stops
/// relaying (drain-and-discard when the upstream call cannot be cancelled).
/// Once consumed it cannot be restarted; regenerating requires a new model
/// call.
pub struct TokenStream {
    rx: mpsc::Receiver<String>,
}

/// Bounded so a slow consumer throttles the producer.
const TOKEN_CHANNEL_CAPACITY: usize = 64;

impl TokenStream {
    pub fn channel() -> (mpsc::Sender<String>, TokenStream) {
        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        (tx, TokenStream { rx })
    }

    /// Next delta, or `None` once the producer is done.
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Drain the stream into one string. Non-streaming mode is exactly this:
    /// the same producer, collected.
    pub async fn collect(mut self) -> String {
        let mut out = String::new();
        while let Some(delta) = self.next().await {
            out.push_str(&delta);
        }
        out
    }
}

/// Capability trait for completions.
///
/// `complete` is defined in terms of `stream` so both modes share one
/// producer; implementations may override it when the backing API has a
/// cheaper non-streamed path.
#[async_trait::async_trait]
pub trait CompletionModel: Send + Sync {
    /// Produce a completion as a token stream.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream>;

    /// Produce a whole completion.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let stream = self.stream(messages).await?;
        Ok(stream.collect().await)
    }
}

/// OpenAI-compatible chat completions client (connection-pooled).
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0,
            "stream": stream,
        })
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("Completion request failed: {}", e);
                AgentError::CompletionFailure(format!("completion request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Completion API error response: {} {}", status, error_text);
            return Err(AgentError::CompletionFailure(format!(
                "completion API returned {}: {}",
                status, error_text
            )));
        }

        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Extract delta text from one SSE `data:` payload. `None` for the terminal
/// `[DONE]` sentinel and for chunks without content (role preludes etc.).
fn delta_from_sse_data(data: &str) -> Option<String> {
    if data.trim() == "[DONE]" {
        return None;
    }
    let chunk: StreamChunk = serde_json::from_str(data).ok()?;
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
}

#[async_trait::async_trait]
impl CompletionModel for OpenAiClient {
    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let body = self.request_body(messages, true);
        let response = self.send(&body).await?;

        let (tx, stream) = TokenStream::channel();

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            'relay: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("Completion stream interrupted: {}", e);
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE events are newline-delimited; hold partial lines back.
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    if data.trim() == "[DONE]" {
                        break 'relay;
                    }
                    if let Some(delta) = delta_from_sse_data(data) {
                        if tx.send(delta).await.is_err() {
                            // Consumer dropped the stream: stop relaying.
                            debug!("Token stream consumer gone, discarding remainder");
                            break 'relay;
                        }
                    }
                }
            }
        });

        Ok(stream)
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = self.request_body(messages, false);
        let response = self.send(&body).await?;

        let parsed: CompletionResponse = response.json().await.map_err(|e| {
            error!("Failed to parse completion response: {}", e);
            AgentError::CompletionFailure(format!("completion parse error: {}", e))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AgentError::CompletionFailure("empty completion response".to_string()))
    }
}

/// Scripted model for development and testing.
///
/// Pops one canned response per call and records every request so tests can
/// assert exactly which message views reached the model.
pub struct MockCompletionModel {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockCompletionModel {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn scripted(responses: &[&str]) -> Self {
        Self::new(responses.iter().map(|s| s.to_string()).collect())
    }

    /// Every message list this model has been called with, in order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }

    fn pop(&self, messages: &[ChatMessage]) -> Result<String> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::CompletionFailure("mock script exhausted".to_string()))
    }
}

#[async_trait::async_trait]
impl CompletionModel for MockCompletionModel {
    async fn stream(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let response = self.pop(messages)?;
        let (tx, stream) = TokenStream::channel();

        tokio::spawn(async move {
            // Word-boundary chunks that concatenate back to the exact script.
            for delta in response.split_inclusive(' ') {
                if tx.send(delta.to_string()).await.is_err() {
                    break;
                }
            }
        });

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collected_stream_matches_script() {
        let model = MockCompletionModel::scripted(&["hello streaming world"]);
        let stream = model
            .stream(&[ChatMessage::new(Role::User, "hi")])
            .await
            .unwrap();
        assert_eq!(stream.collect().await, "hello streaming world");
    }

    #[tokio::test]
    async fn default_complete_uses_the_stream_producer() {
        let model = MockCompletionModel::scripted(&["one answer"]);
        let answer = model
            .complete(&[ChatMessage::new(Role::User, "hi")])
            .await
            .unwrap();
        assert_eq!(answer, "one answer");
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_the_producer() {
        let model = MockCompletionModel::scripted(&["a b c d e f g h"]);
        let mut stream = model
            .stream(&[ChatMessage::new(Role::User, "hi")])
            .await
            .unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first, "a ");
        drop(stream);
        // Producer task exits on the failed send; nothing to assert beyond
        // not hanging.
    }

    #[tokio::test]
    async fn exhausted_script_is_a_completion_failure() {
        let model = MockCompletionModel::scripted(&[]);
        let result = model.stream(&[ChatMessage::new(Role::User, "hi")]).await;
        assert!(matches!(result, Err(AgentError::CompletionFailure(_))));
    }

    #[test]
    fn sse_delta_extraction() {
        let data = r#"{"choices":[{"delta":{"content":"Hi"}}]}"#;
        assert_eq!(delta_from_sse_data(data).as_deref(), Some("Hi"));
        assert_eq!(delta_from_sse_data(" [DONE]"), None);
        assert_eq!(delta_from_sse_data(r#"{"choices":[{"delta":{}}]}"#), None);
    }
}
