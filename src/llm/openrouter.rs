//! OpenRouter chat-completions client
//!
//! Streams `POST /chat/completions` with `stream: true` and turns the SSE
//! chunks into `ModelEvent`s. Tool-call arguments arrive as string
//! fragments keyed by index and are only emitted once complete.
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{
    ChatModel, CompletionRequest, FinishReason, ModelEvent, ModelEventStream, Usage,
};
use crate::config::ModelConfig;
use crate::error::AssistantError;
use crate::models::ToolCall;
use crate::Result;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Reusable OpenRouter client (connection-pooled)
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    idle_timeout: Duration,
}

impl OpenRouterClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        })
    }

    /// Give up on a stream that stays silent this long.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        body
    }
}

#[async_trait]
impl ChatModel for OpenRouterClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ModelEventStream> {
        if self.api_key.is_empty() {
            return Err(AssistantError::LlmError(
                "OPENROUTER_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}/chat/completions", self.base_url);
        info!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Calling model provider"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "Construction Finance Assistant")
            .json(&self.request_body(&request))
            .send()
            .await
            .map_err(|e| {
                error!("Model provider request failed: {}", e);
                AssistantError::LlmError(format!("Model provider request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Model provider error response: {}", error_text);
            let message = extract_api_error_message(&error_text)
                .unwrap_or_else(|| format!("Model provider returned {}", status));
            return Err(AssistantError::LlmError(message));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(handle_sse_stream(response, tx, self.idle_timeout));

        Ok(rx)
    }
}

fn extract_api_error_message(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    extract_event_error(&value)
}

fn extract_event_error(event: &Value) -> Option<String> {
    let error = event.get("error")?;
    if let Some(message) = error.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    Some("An error occurred during streaming".to_string())
}

//
// ================= SSE chunk shapes =================
//

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Option<Vec<ChunkChoice>>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Collects streamed tool-call fragments by index.
#[derive(Debug, Default)]
pub(crate) struct ToolCallAccumulator {
    calls: BTreeMap<usize, PartialToolCall>,
}

impl ToolCallAccumulator {
    fn push(&mut self, delta: ToolCallDelta) {
        let entry = self.calls.entry(delta.index).or_default();

        if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
            entry.id = id;
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                entry.name = name;
            }
            if let Some(arguments) = function.arguments {
                entry.arguments.push_str(&arguments);
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Completed calls in index order.
    ///
    /// Empty arguments become `{}`. Arguments that are not valid JSON are
    /// passed through as a string so validation can reject them.
    pub(crate) fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .map(|(index, partial)| {
                let arguments = if partial.arguments.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&partial.arguments)
                        .unwrap_or_else(|_| Value::String(partial.arguments.clone()))
                };

                ToolCall {
                    id: if partial.id.is_empty() {
                        format!("call_{}", index)
                    } else {
                        partial.id
                    },
                    name: partial.name,
                    arguments,
                }
            })
            .collect()
    }
}

/// Per-invocation parse state.
#[derive(Default)]
struct StreamState {
    tool_calls: ToolCallAccumulator,
    finish_reason: Option<FinishReason>,
    usage: Usage,
}

impl StreamState {
    /// Apply one chunk, returning the text deltas it carried.
    fn apply(&mut self, chunk: CompletionChunk) -> Vec<String> {
        if let Some(usage) = chunk.usage {
            self.usage = Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            };
        }

        let mut texts = Vec::new();
        for choice in chunk.choices.unwrap_or_default() {
            if let Some(delta) = choice.delta {
                if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                    texts.push(text);
                }
                for call in delta.tool_calls.unwrap_or_default() {
                    self.tool_calls.push(call);
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(FinishReason::from_provider(&reason));
            }
        }

        texts
    }

    /// Final events: the completed tool calls, then `Finish`.
    fn finish(self) -> Vec<ModelEvent> {
        let reason = match self.finish_reason {
            Some(reason) => reason,
            None if !self.tool_calls.is_empty() => FinishReason::ToolCalls,
            None => FinishReason::Stop,
        };

        let mut events: Vec<ModelEvent> = self
            .tool_calls
            .finish()
            .into_iter()
            .map(ModelEvent::ToolCall)
            .collect();
        events.push(ModelEvent::Finish {
            reason,
            usage: self.usage,
        });
        events
    }
}

/// Drive one SSE response to completion, forwarding events on `tx`.
///
/// Stops early when the receiver goes away.
async fn handle_sse_stream(
    response: Response,
    tx: mpsc::UnboundedSender<Result<ModelEvent>>,
    idle_timeout: Duration,
) {
    let mut stream = response.bytes_stream().eventsource();
    let mut state = StreamState::default();

    loop {
        let sse = match timeout(idle_timeout, stream.next()).await {
            Ok(Some(Ok(sse))) => sse,
            Ok(None) => {
                if state.finish_reason.is_some() {
                    // Some providers close without a [DONE] sentinel
                    break;
                }
                let error_msg = "SSE stream closed before response completed";
                error!("{}", error_msg);
                let _ = tx.send(Err(AssistantError::StreamError(error_msg.to_string())));
                return;
            }
            Ok(Some(Err(e))) => {
                let error_msg = format!("SSE stream error: {}", e);
                error!("{}", error_msg);
                let _ = tx.send(Err(AssistantError::StreamError(error_msg)));
                return;
            }
            Err(_) => {
                let error_msg = format!("SSE stream timeout after {}s", idle_timeout.as_secs());
                error!("{}", error_msg);
                let _ = tx.send(Err(AssistantError::StreamError(error_msg)));
                return;
            }
        };

        let raw = sse.data;
        trace!("OpenRouter SSE: {:?}", raw);
        if raw.trim().is_empty() {
            continue;
        }
        if raw == "[DONE]" {
            break;
        }

        let event: Value = match serde_json::from_str(&raw) {
            Ok(json) => json,
            Err(e) => {
                let error_msg = format!("SSE parsing error: {}, data: {}", e, raw);
                error!("{}", error_msg);
                let _ = tx.send(Err(AssistantError::StreamError(error_msg)));
                return;
            }
        };

        if let Some(message) = extract_event_error(&event) {
            error!("Model provider stream error: {}", message);
            let _ = tx.send(Err(AssistantError::LlmError(message)));
            return;
        }

        let chunk: CompletionChunk = match serde_json::from_value(event) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Skipping unrecognised SSE chunk: {}", e);
                continue;
            }
        };

        for text in state.apply(chunk) {
            if tx.send(Ok(ModelEvent::TextDelta(text))).is_err() {
                debug!("Model event receiver dropped; abandoning stream");
                return;
            }
        }
    }

    for event in state.finish() {
        if tx.send(Ok(event)).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderMessage;
    use crate::tools::create_default_registry;
    use httpmock::prelude::*;

    fn config(base_url: String, api_key: &str) -> ModelConfig {
        ModelConfig {
            api_key: api_key.to_string(),
            base_url,
            model: "anthropic/claude-sonnet-4".to_string(),
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![
                ProviderMessage::system("You are a finance assistant."),
                ProviderMessage::user("Which packages are overspent?"),
            ],
            tools: create_default_registry().definitions(),
        }
    }

    fn sse(events: &[&str]) -> String {
        events
            .iter()
            .map(|e| format!("data: {}\n\n", e))
            .collect::<String>()
    }

    async fn drain(mut rx: ModelEventStream) -> Vec<Result<ModelEvent>> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_accumulator_joins_fragments_by_index() {
        let mut acc = ToolCallAccumulator::default();
        let deltas: Vec<ToolCallDelta> = serde_json::from_value(json!([
            { "index": 0, "id": "call_a", "function": { "name": "get_packages_by_trade", "arguments": "" } },
            { "index": 1, "id": "call_b", "function": { "name": "get_financial_summary", "arguments": "" } },
            { "index": 0, "function": { "arguments": "{\"trade_" } },
            { "index": 0, "function": { "arguments": "name\":\"Masonry\"}" } }
        ]))
        .unwrap();
        for delta in deltas {
            acc.push(delta);
        }

        let calls = acc.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].arguments, json!({ "trade_name": "Masonry" }));
        assert_eq!(calls[1].name, "get_financial_summary");
        assert_eq!(calls[1].arguments, json!({}));
    }

    #[test]
    fn test_accumulator_keeps_malformed_arguments_as_string() {
        let mut acc = ToolCallAccumulator::default();
        let delta: ToolCallDelta = serde_json::from_value(json!({
            "index": 0,
            "function": { "name": "get_budget_by_trade", "arguments": "{\"project" }
        }))
        .unwrap();
        acc.push(delta);

        let calls = acc.finish();
        assert_eq!(calls[0].id, "call_0");
        assert_eq!(calls[0].arguments, json!("{\"project"));
    }

    #[test]
    fn test_error_extraction_shapes() {
        assert_eq!(
            extract_api_error_message(r#"{"error":{"message":"No auth credentials found","code":401}}"#)
                .as_deref(),
            Some("No auth credentials found")
        );
        assert_eq!(
            extract_event_error(&json!({ "error": "overloaded" })).as_deref(),
            Some("overloaded")
        );
        assert!(extract_event_error(&json!({ "choices": [] })).is_none());
    }

    #[test]
    fn test_request_body_declares_tools() {
        let client = OpenRouterClient::new(&config("http://localhost".into(), "key")).unwrap();
        let body = client.request_body(&request());

        assert_eq!(body["stream"], true);
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"].as_array().unwrap().len(), 5);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_before_request() {
        let client = OpenRouterClient::new(&config("http://localhost:9".into(), "")).unwrap();
        let err = client.stream(request()).await.unwrap_err();
        assert!(err.to_string().contains("OPENROUTER_API_KEY"));
    }

    #[tokio::test]
    async fn test_streams_text_then_finish() {
        let server = MockServer::start_async().await;
        let body = sse(&[
            r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":"All packages "}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"content":"are within budget."}}]}"#,
            r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":812,"completion_tokens":9}}"#,
            "[DONE]",
        ]);
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer test-key")
                    .body_contains("\"stream\":true");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(body);
            })
            .await;

        let client = OpenRouterClient::new(&config(server.base_url(), "test-key")).unwrap();
        let events = drain(client.stream(request()).await.unwrap()).await;
        mock.assert_async().await;

        let events: Vec<ModelEvent> = events.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(
            events,
            vec![
                ModelEvent::TextDelta("All packages ".into()),
                ModelEvent::TextDelta("are within budget.".into()),
                ModelEvent::Finish {
                    reason: FinishReason::Stop,
                    usage: Usage {
                        prompt_tokens: 812,
                        completion_tokens: 9
                    },
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_streams_accumulated_tool_call() {
        let server = MockServer::start_async().await;
        let body = sse(&[
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"get_overspent_packages","arguments":""}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"project_name\":"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Downtown Office Tower\"}"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ]);
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(body);
            })
            .await;

        let client = OpenRouterClient::new(&config(server.base_url(), "test-key")).unwrap();
        let events = drain(client.stream(request()).await.unwrap()).await;
        let events: Vec<ModelEvent> = events.into_iter().map(|e| e.unwrap()).collect();

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ModelEvent::ToolCall(ToolCall {
                id: "call_1".into(),
                name: "get_overspent_packages".into(),
                arguments: json!({ "project_name": "Downtown Office Tower" }),
            })
        );
        assert!(matches!(
            events[1],
            ModelEvent::Finish { reason: FinishReason::ToolCalls, .. }
        ));
    }

    #[tokio::test]
    async fn test_http_error_status_is_returned_up_front() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(401)
                    .json_body(json!({ "error": { "message": "No auth credentials found", "code": 401 } }));
            })
            .await;

        let client = OpenRouterClient::new(&config(server.base_url(), "bad-key")).unwrap();
        let err = client.stream(request()).await.unwrap_err();
        assert_eq!(err.to_string(), "LLM error: No auth credentials found");
    }

    #[tokio::test]
    async fn test_in_stream_error_event_ends_invocation() {
        let server = MockServer::start_async().await;
        let body = sse(&[
            r#"{"choices":[{"index":0,"delta":{"content":"Let me"}}]}"#,
            r#"{"error":{"message":"Provider returned error","code":502}}"#,
        ]);
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(body);
            })
            .await;

        let client = OpenRouterClient::new(&config(server.base_url(), "test-key")).unwrap();
        let events = drain(client.stream(request()).await.unwrap()).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Ok(ModelEvent::TextDelta(t)) if t == "Let me"));
        assert!(events[1].is_err());
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let server = MockServer::start_async().await;
        let body = sse(&[r#"{"choices":[{"index":0,"delta":{"content":"Partial"}}]}"#]);
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(body);
            })
            .await;

        let client = OpenRouterClient::new(&config(server.base_url(), "test-key")).unwrap();
        let events = drain(client.stream(request()).await.unwrap()).await;

        assert!(matches!(events.last(), Some(Err(AssistantError::StreamError(_)))));
    }
}
