//! Conversation orchestrator - the bounded tool loop
//!
//! MODEL → TOOL CALLS → TOOL RESULTS → MODEL → ... → FINISH → LOG
//!
//! Each conversation runs on its own task and writes chunks into a channel
//! in the order the browser must see them. The conversation log is written
//! after the channel is closed, so it never delays the response.

use crate::config::{AppConfig, DEFAULT_MAX_STEPS, DEFAULT_TENANT_ID};
use crate::error::AssistantError;
use crate::gateway::FinancialGateway;
use crate::llm::{
    convert_history, ChatModel, CompletionRequest, FinishReason, ModelEvent, ModelEventStream,
    ProviderMessage, Usage,
};
use crate::models::{last_user_question, ChatMessage, ConversationLogEntry, ToolCall, ToolResult};
use crate::stream::StreamChunk;
use crate::tools::{ToolContext, ToolDefinition, ToolRegistry};
use crate::Result;
use chrono::Utc;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

mod prompt;

pub use prompt::SYSTEM_PROMPT;

/// Shown to the user whenever the model fails; details stay in the logs.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

const CHUNK_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Model round trips allowed per conversation turn.
    pub max_steps: u32,
    /// Tenant every query and log entry is scoped to.
    pub org_id: Uuid,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            org_id: DEFAULT_TENANT_ID,
        }
    }
}

impl From<&AppConfig> for OrchestratorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            org_id: config.tenant_id,
        }
    }
}

/// Main orchestrator that coordinates model, tools and the data service
pub struct Orchestrator {
    model: Arc<dyn ChatModel>,
    registry: Arc<ToolRegistry>,
    gateway: Arc<dyn FinancialGateway>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn ChatModel>,
        registry: ToolRegistry,
        gateway: Arc<dyn FinancialGateway>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            model,
            registry: Arc::new(registry),
            gateway,
            settings,
        }
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Start answering the conversation.
    ///
    /// The first model invocation is awaited here: if it fails nothing has
    /// been streamed and the error is returned. Everything after that is
    /// reported in-band on the returned stream.
    pub async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<ChatStream> {
        let question = last_user_question(&messages).ok_or_else(|| {
            AssistantError::InvalidRequest("No user message found".to_string())
        })?;

        info!(
            org_id = %self.settings.org_id,
            history = messages.len(),
            question = %question,
            "Orchestrator: starting conversation"
        );

        let mut history = vec![ProviderMessage::system(SYSTEM_PROMPT)];
        history.extend(convert_history(&messages));
        let tools = self.registry.definitions();

        let first = self
            .model
            .stream(CompletionRequest {
                messages: history.clone(),
                tools: tools.clone(),
            })
            .await
            .map_err(|e| {
                error!(error = %e, "Initial model invocation failed");
                e
            })?;

        let mut conversation = Conversation {
            model: Arc::clone(&self.model),
            registry: Arc::clone(&self.registry),
            ctx: ToolContext {
                gateway: Arc::clone(&self.gateway),
                org_id: self.settings.org_id,
            },
            max_steps: self.settings.max_steps,
            history,
            tools,
            question,
            response: String::new(),
            tool_calls: Vec::new(),
        };

        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let task = tokio::spawn(async move {
            let outcome = conversation.run(first, &tx).await;
            drop(tx);

            match outcome {
                Ok(Outcome::Completed) => conversation.write_log().await,
                Ok(Outcome::Failed) => debug!("Conversation failed; not logged"),
                Err(ClientGone) => info!("Client disconnected; conversation abandoned"),
            }
        });

        Ok(ChatStream {
            inner: ReceiverStream::new(rx),
            task,
        })
    }

    /// Run a conversation to the end and collect what was streamed.
    ///
    /// Waits for the conversation log write as well.
    pub async fn run_to_completion(&self, messages: Vec<ChatMessage>) -> Result<ChatTranscript> {
        let mut stream = self.stream_chat(messages).await?;
        let mut transcript = ChatTranscript::default();

        while let Some(chunk) = stream.next().await {
            transcript.push(chunk);
        }

        stream.join().await;
        Ok(transcript)
    }
}

/// Ordered chunks of one conversation.
pub struct ChatStream {
    inner: ReceiverStream<StreamChunk>,
    task: JoinHandle<()>,
}

impl ChatStream {
    /// Wait for the background work, including the log write, to finish.
    /// Unread chunks are discarded.
    pub async fn join(self) {
        let ChatStream { inner, task } = self;
        drop(inner);

        if let Err(e) = task.await {
            warn!(error = %e, "Conversation task did not complete");
        }
    }
}

impl Stream for ChatStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Everything a conversation streamed, gathered in one place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatTranscript {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    /// Model round trips started.
    pub steps: u32,
    pub finish_reason: Option<FinishReason>,
    pub usage: Usage,
    pub error: Option<String>,
}

impl ChatTranscript {
    pub fn push(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::StepStart { .. } => self.steps += 1,
            StreamChunk::TextDelta(text) => self.text.push_str(&text),
            StreamChunk::ToolCall(call) => self.tool_calls.push(call),
            StreamChunk::ToolResult(result) => self.tool_results.push(result),
            StreamChunk::StepFinish { .. } => {}
            StreamChunk::Finish { reason, usage } => {
                self.finish_reason = Some(reason);
                self.usage = usage;
            }
            StreamChunk::Error(message) => self.error = Some(message),
        }
    }
}

//
// ================= Conversation task =================
//

/// The receiving side went away; stop doing work for it.
struct ClientGone;

enum Outcome {
    Completed,
    Failed,
}

/// What one model invocation produced.
struct StepOutput {
    text: String,
    calls: Vec<ToolCall>,
    reason: FinishReason,
    usage: Usage,
}

struct Conversation {
    model: Arc<dyn ChatModel>,
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
    max_steps: u32,
    history: Vec<ProviderMessage>,
    tools: Vec<ToolDefinition>,
    question: String,
    /// Text of the latest step; the final answer once the loop ends.
    response: String,
    /// Tool calls issued across all steps.
    tool_calls: Vec<ToolCall>,
}

async fn send(tx: &mpsc::Sender<StreamChunk>, chunk: StreamChunk) -> std::result::Result<(), ClientGone> {
    tx.send(chunk).await.map_err(|_| ClientGone)
}

fn new_message_id() -> String {
    format!("msg-{}", Uuid::new_v4().simple())
}

impl Conversation {
    async fn run(
        &mut self,
        first: ModelEventStream,
        tx: &mpsc::Sender<StreamChunk>,
    ) -> std::result::Result<Outcome, ClientGone> {
        let mut events = first;
        let mut total_usage = Usage::default();
        let mut step: u32 = 1;

        loop {
            send(tx, StreamChunk::StepStart { message_id: new_message_id() }).await?;

            let output = match read_step(&mut events, tx).await? {
                Ok(output) => output,
                Err(e) => return fail(tx, step, e).await,
            };
            total_usage.add(output.usage);
            self.response = output.text.clone();

            debug!(
                step,
                tool_calls = output.calls.len(),
                finish_reason = output.reason.as_str(),
                "Model step complete"
            );

            if output.calls.is_empty() {
                send(
                    tx,
                    StreamChunk::StepFinish {
                        reason: output.reason,
                        usage: output.usage,
                        is_continued: false,
                    },
                )
                .await?;
                send(
                    tx,
                    StreamChunk::Finish {
                        reason: output.reason,
                        usage: total_usage,
                    },
                )
                .await?;
                return Ok(Outcome::Completed);
            }

            let results = self.execute_tools(&output.calls, tx).await?;

            self.history
                .push(ProviderMessage::assistant_tool_turn(&output.text, &output.calls));
            self.history
                .extend(results.iter().map(ProviderMessage::tool_result));
            self.tool_calls.extend(output.calls);

            send(
                tx,
                StreamChunk::StepFinish {
                    reason: FinishReason::ToolCalls,
                    usage: output.usage,
                    is_continued: false,
                },
            )
            .await?;

            if step >= self.max_steps {
                info!(max_steps = self.max_steps, "Step limit reached; finishing");
                send(
                    tx,
                    StreamChunk::Finish {
                        reason: FinishReason::ToolCalls,
                        usage: total_usage,
                    },
                )
                .await?;
                return Ok(Outcome::Completed);
            }

            if tx.is_closed() {
                return Err(ClientGone);
            }

            step += 1;
            events = match self
                .model
                .stream(CompletionRequest {
                    messages: self.history.clone(),
                    tools: self.tools.clone(),
                })
                .await
            {
                Ok(events) => events,
                Err(e) => return fail(tx, step, e).await,
            };
        }
    }

    /// Announce every call of the step, then run them one at a time in
    /// model order.
    async fn execute_tools(
        &self,
        calls: &[ToolCall],
        tx: &mpsc::Sender<StreamChunk>,
    ) -> std::result::Result<Vec<ToolResult>, ClientGone> {
        for call in calls {
            send(tx, StreamChunk::ToolCall(call.clone())).await?;
        }

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let result = self.registry.dispatch(&self.ctx, call).await;
            info!(
                tool_name = %call.name,
                tool_call_id = %call.id,
                error = result.is_error(),
                "Tool call finished"
            );

            send(tx, StreamChunk::ToolResult(result.clone())).await?;
            results.push(result);
        }

        Ok(results)
    }

    /// Append the conversation to the chat log. Failures are only logged.
    async fn write_log(&self) {
        let entry = ConversationLogEntry {
            org_id: self.ctx.org_id,
            question: self.question.clone(),
            tool_calls: self.tool_calls.clone(),
            response: self.response.clone(),
            model: self.model.model_id().to_string(),
            created_at: Utc::now(),
        };

        match self.ctx.gateway.append_chat_log(&entry).await {
            Ok(()) => debug!(tool_calls = entry.tool_calls.len(), "Conversation logged"),
            Err(e) => warn!(error = %e, "Failed to write conversation log"),
        }
    }
}

/// Forward one invocation's text as it arrives; collect its tool calls.
async fn read_step(
    events: &mut ModelEventStream,
    tx: &mpsc::Sender<StreamChunk>,
) -> std::result::Result<Result<StepOutput>, ClientGone> {
    let mut output = StepOutput {
        text: String::new(),
        calls: Vec::new(),
        reason: FinishReason::Unknown,
        usage: Usage::default(),
    };

    while let Some(event) = events.recv().await {
        match event {
            Ok(ModelEvent::TextDelta(text)) => {
                output.text.push_str(&text);
                send(tx, StreamChunk::TextDelta(text)).await?;
            }
            Ok(ModelEvent::ToolCall(call)) => output.calls.push(call),
            Ok(ModelEvent::Finish { reason, usage }) => {
                output.reason = reason;
                output.usage = usage;
                return Ok(Ok(output));
            }
            Err(e) => return Ok(Err(e)),
        }
    }

    Ok(Err(AssistantError::StreamError(
        "Model stream ended without a finish event".to_string(),
    )))
}

async fn fail(
    tx: &mpsc::Sender<StreamChunk>,
    step: u32,
    e: AssistantError,
) -> std::result::Result<Outcome, ClientGone> {
    error!(step, error = %e, "Model failed mid-conversation");
    send(tx, StreamChunk::Error(GENERIC_ERROR_MESSAGE.to_string())).await?;
    Ok(Outcome::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryGateway;
    use crate::llm::ScriptedModel;
    use crate::tools::create_default_registry;
    use serde_json::json;
    use std::time::Duration;

    fn orchestrator(model: &Arc<ScriptedModel>, gateway: &Arc<InMemoryGateway>) -> Orchestrator {
        Orchestrator::new(
            model.clone(),
            create_default_registry(),
            gateway.clone(),
            OrchestratorSettings::default(),
        )
    }

    fn ask(question: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::user(question)]
    }

    async fn collect(stream: ChatStream) -> Vec<StreamChunk> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_text_only_answer() {
        let model = Arc::new(ScriptedModel::new().then_text("Hello there."));
        let gateway = Arc::new(InMemoryGateway::with_demo_data());

        let transcript = orchestrator(&model, &gateway)
            .run_to_completion(ask("hi"))
            .await
            .unwrap();

        assert_eq!(transcript.text, "Hello there.");
        assert_eq!(transcript.steps, 1);
        assert_eq!(transcript.finish_reason, Some(FinishReason::Stop));
        assert!(transcript.tool_calls.is_empty());

        let logs = gateway.chat_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].question, "hi");
        assert_eq!(logs[0].response, "Hello there.");
        assert_eq!(logs[0].model, "scripted");
        assert_eq!(logs[0].org_id, DEFAULT_TENANT_ID);
    }

    #[tokio::test]
    async fn test_request_carries_prompt_history_and_sorted_tools() {
        let model = Arc::new(ScriptedModel::new().then_text("ok"));
        let gateway = Arc::new(InMemoryGateway::with_demo_data());

        orchestrator(&model, &gateway)
            .run_to_completion(ask("Which packages are overspent?"))
            .await
            .unwrap();

        let requests = model.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0], ProviderMessage::system(SYSTEM_PROMPT));
        assert_eq!(
            requests[0].messages[1],
            ProviderMessage::user("Which packages are overspent?")
        );

        let names: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names.len(), 5);
        assert_eq!(names, sorted);
    }

    #[tokio::test]
    async fn test_tool_events_precede_next_step_text() {
        let model = Arc::new(
            ScriptedModel::new()
                .then_tool_call("get_overspent_packages", json!({}))
                .then_text("Two packages are overspent."),
        );
        let gateway = Arc::new(InMemoryGateway::with_demo_data());

        let stream = orchestrator(&model, &gateway)
            .stream_chat(ask("Which packages are overspent?"))
            .await
            .unwrap();
        let chunks = collect(stream).await;

        let kinds: Vec<&str> = chunks
            .iter()
            .map(|c| match c {
                StreamChunk::StepStart { .. } => "start",
                StreamChunk::TextDelta(_) => "text",
                StreamChunk::ToolCall(_) => "call",
                StreamChunk::ToolResult(_) => "result",
                StreamChunk::StepFinish { .. } => "step-finish",
                StreamChunk::Finish { .. } => "finish",
                StreamChunk::Error(_) => "error",
            })
            .collect();

        assert_eq!(
            kinds,
            vec![
                "start", "call", "result", "step-finish", "start", "text", "text", "text",
                "text", "step-finish", "finish",
            ]
        );

        let StreamChunk::ToolResult(result) = &chunks[2] else {
            panic!("expected tool result, got {:?}", chunks[2]);
        };
        assert_eq!(result.payload["count"], 2);
    }

    #[tokio::test]
    async fn test_tool_results_are_folded_into_next_request() {
        let model = Arc::new(
            ScriptedModel::new()
                .then_tool_call("get_budget_by_trade", json!({ "project_name": "Downtown Office Tower" }))
                .then_text("Here is the breakdown."),
        );
        let gateway = Arc::new(InMemoryGateway::with_demo_data());

        let transcript = orchestrator(&model, &gateway)
            .run_to_completion(ask("Budget by trade for the tower"))
            .await
            .unwrap();
        assert_eq!(transcript.steps, 2);

        let requests = model.requests().await;
        assert_eq!(requests.len(), 2);

        let second = &requests[1].messages;
        assert_eq!(second.len(), 4);
        let ProviderMessage::Assistant { tool_calls, .. } = &second[2] else {
            panic!("expected assistant tool turn, got {:?}", second[2]);
        };
        assert_eq!(tool_calls[0].function.name, "get_budget_by_trade");

        let ProviderMessage::Tool { tool_call_id, content } = &second[3] else {
            panic!("expected tool message, got {:?}", second[3]);
        };
        assert_eq!(tool_call_id, &tool_calls[0].id);
        assert!(content.contains("\"filter\":\"Downtown Office Tower\""));

        let logs = gateway.chat_logs().await;
        assert_eq!(logs[0].tool_calls.len(), 1);
        assert_eq!(logs[0].response, "Here is the breakdown.");
    }

    #[tokio::test]
    async fn test_log_keeps_only_final_answer_text() {
        let model = Arc::new(
            ScriptedModel::new()
                .then_events(vec![
                    ModelEvent::TextDelta("Let me check.".to_string()),
                    ModelEvent::ToolCall(ToolCall {
                        id: "call_a".to_string(),
                        name: "get_overspent_packages".to_string(),
                        arguments: json!({}),
                    }),
                    ModelEvent::Finish {
                        reason: FinishReason::ToolCalls,
                        usage: Usage::default(),
                    },
                ])
                .then_text("Two packages are overspent."),
        );
        let gateway = Arc::new(InMemoryGateway::with_demo_data());

        let transcript = orchestrator(&model, &gateway)
            .run_to_completion(ask("Which packages are overspent?"))
            .await
            .unwrap();
        assert_eq!(transcript.text, "Let me check.Two packages are overspent.");

        let ProviderMessage::Assistant { content, .. } = &model.requests().await[1].messages[2] else {
            panic!("expected assistant tool turn");
        };
        assert_eq!(content.as_deref(), Some("Let me check."));

        let logs = gateway.chat_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].response, "Two packages are overspent.");
        assert_eq!(logs[0].tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn test_all_calls_announced_before_results() {
        let model = Arc::new(
            ScriptedModel::new()
                .then_tool_calls(vec![
                    ("get_overspent_packages", json!({})),
                    ("get_financial_summary", json!({})),
                ])
                .then_text("Done."),
        );
        let gateway = Arc::new(InMemoryGateway::with_demo_data());

        let stream = orchestrator(&model, &gateway)
            .stream_chat(ask("Overspent packages and totals?"))
            .await
            .unwrap();
        let chunks = collect(stream).await;

        let tool_events: Vec<String> = chunks
            .iter()
            .filter_map(|c| match c {
                StreamChunk::ToolCall(call) => Some(format!("call:{}", call.name)),
                StreamChunk::ToolResult(result) => Some(format!("result:{}", result.tool_name)),
                _ => None,
            })
            .collect();

        assert_eq!(
            tool_events,
            vec![
                "call:get_overspent_packages",
                "call:get_financial_summary",
                "result:get_overspent_packages",
                "result:get_financial_summary",
            ]
        );
    }

    #[tokio::test]
    async fn test_step_cap_logs_last_step_text() {
        let mut script = ScriptedModel::new();
        for step in 0..5 {
            script = script.then_events(vec![
                ModelEvent::TextDelta(format!("Step {}.", step + 1)),
                ModelEvent::ToolCall(ToolCall {
                    id: format!("call_{}", step),
                    name: "get_financial_summary".to_string(),
                    arguments: json!({}),
                }),
                ModelEvent::Finish {
                    reason: FinishReason::ToolCalls,
                    usage: Usage::default(),
                },
            ]);
        }
        let model = Arc::new(script);
        let gateway = Arc::new(InMemoryGateway::with_demo_data());

        orchestrator(&model, &gateway)
            .run_to_completion(ask("Keep digging"))
            .await
            .unwrap();

        assert_eq!(gateway.chat_logs().await[0].response, "Step 5.");
    }

    #[tokio::test]
    async fn test_step_cap_stops_after_five_round_trips() {
        let mut script = ScriptedModel::new();
        for _ in 0..6 {
            script = script.then_tool_call("get_financial_summary", json!({}));
        }
        let model = Arc::new(script);
        let gateway = Arc::new(InMemoryGateway::with_demo_data());

        let transcript = orchestrator(&model, &gateway)
            .run_to_completion(ask("Keep digging"))
            .await
            .unwrap();

        assert_eq!(model.requests().await.len(), 5);
        assert_eq!(transcript.steps, 5);
        assert_eq!(transcript.tool_results.len(), 5);
        assert_eq!(transcript.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(transcript.error, None);
        assert_eq!(gateway.chat_logs().await[0].tool_calls.len(), 5);
    }

    #[tokio::test]
    async fn test_configured_step_cap() {
        let model = Arc::new(
            ScriptedModel::new()
                .then_tool_call("get_financial_summary", json!({}))
                .then_tool_call("get_financial_summary", json!({})),
        );
        let gateway = Arc::new(InMemoryGateway::with_demo_data());
        let orchestrator = Orchestrator::new(
            model.clone(),
            create_default_registry(),
            gateway.clone(),
            OrchestratorSettings {
                max_steps: 1,
                ..OrchestratorSettings::default()
            },
        );

        let transcript = orchestrator.run_to_completion(ask("Summary")).await.unwrap();
        assert_eq!(transcript.steps, 1);
        assert_eq!(model.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_gateway_error_does_not_abort() {
        let model = Arc::new(
            ScriptedModel::new()
                .then_tool_call("get_overspent_packages", json!({}))
                .then_text("The data service is unavailable right now."),
        );
        let gateway = Arc::new(InMemoryGateway::with_demo_data().with_query_failure("permission denied"));

        let transcript = orchestrator(&model, &gateway)
            .run_to_completion(ask("Which packages are overspent?"))
            .await
            .unwrap();

        assert_eq!(transcript.tool_results[0].payload, json!({ "error": "permission denied" }));
        assert_eq!(transcript.text, "The data service is unavailable right now.");
        assert_eq!(transcript.error, None);

        let requests = model.requests().await;
        assert!(matches!(
            &requests[1].messages[3],
            ProviderMessage::Tool { content, .. } if content.contains("permission denied")
        ));
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_reported_not_executed() {
        let model = Arc::new(
            ScriptedModel::new()
                .then_tool_calls(vec![
                    ("get_packages_by_trade", json!({ "trade": "Masonry" })),
                    ("get_cash_flow", json!({})),
                ])
                .then_text("Sorry."),
        );
        let gateway = Arc::new(InMemoryGateway::with_demo_data());

        let transcript = orchestrator(&model, &gateway)
            .run_to_completion(ask("Masonry packages"))
            .await
            .unwrap();

        assert_eq!(transcript.tool_results.len(), 2);
        assert!(transcript.tool_results.iter().all(ToolResult::is_error));
        assert_eq!(transcript.tool_results[1].tool_call_id, transcript.tool_calls[1].id);
    }

    #[tokio::test]
    async fn test_log_failure_is_swallowed() {
        let model = Arc::new(ScriptedModel::new().then_text("Fine."));
        let gateway = Arc::new(InMemoryGateway::with_demo_data().with_log_failure("insert denied"));

        let transcript = orchestrator(&model, &gateway)
            .run_to_completion(ask("hi"))
            .await
            .unwrap();

        assert_eq!(transcript.text, "Fine.");
        assert_eq!(transcript.finish_reason, Some(FinishReason::Stop));
        assert!(gateway.chat_logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_initial_model_failure_returns_error() {
        let model = Arc::new(ScriptedModel::new().then_reject("invalid api key"));
        let gateway = Arc::new(InMemoryGateway::with_demo_data());

        let result = orchestrator(&model, &gateway).stream_chat(ask("hi")).await;
        assert!(matches!(result, Err(AssistantError::LlmError(_))));
        assert!(gateway.chat_logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_later_model_failure_is_in_band() {
        let model = Arc::new(
            ScriptedModel::new()
                .then_tool_call("get_financial_summary", json!({}))
                .then_reject("upstream timeout"),
        );
        let gateway = Arc::new(InMemoryGateway::with_demo_data());

        let transcript = orchestrator(&model, &gateway)
            .run_to_completion(ask("Summary please"))
            .await
            .unwrap();

        assert_eq!(transcript.error.as_deref(), Some(GENERIC_ERROR_MESSAGE));
        assert_eq!(transcript.finish_reason, None);
        assert_eq!(transcript.tool_results.len(), 1);
        assert!(gateway.chat_logs().await.is_empty());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_earlier_text() {
        let model = Arc::new(ScriptedModel::new().then_stream_error("Looking", "connection reset"));
        let gateway = Arc::new(InMemoryGateway::with_demo_data());

        let transcript = orchestrator(&model, &gateway)
            .run_to_completion(ask("hi"))
            .await
            .unwrap();

        assert_eq!(transcript.text, "Looking");
        assert_eq!(transcript.error.as_deref(), Some(GENERIC_ERROR_MESSAGE));
    }

    #[tokio::test]
    async fn test_no_user_message_is_rejected() {
        let model = Arc::new(ScriptedModel::new().then_text("unused"));
        let gateway = Arc::new(InMemoryGateway::with_demo_data());

        let result = orchestrator(&model, &gateway)
            .stream_chat(vec![ChatMessage::assistant("Hi, how can I help?")])
            .await;

        assert!(matches!(result, Err(AssistantError::InvalidRequest(_))));
        assert!(model.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_stops_work_and_skips_log() {
        let model = Arc::new(
            ScriptedModel::new()
                .then_tool_call("get_financial_summary", json!({}))
                .then_text("never sent"),
        );
        let gateway = Arc::new(InMemoryGateway::with_demo_data());

        let stream = orchestrator(&model, &gateway)
            .stream_chat(ask("Summary"))
            .await
            .unwrap();
        drop(stream);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(model.requests().await.len(), 1);
        assert!(gateway.chat_logs().await.is_empty());
    }
}
