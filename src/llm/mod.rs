//! Model provider boundary
//!
//! The orchestrator talks to exactly one hosted model through `ChatModel`.
//! Requests use the OpenAI chat-completions message shape; responses come
//! back as a channel of `ModelEvent`s so text can be forwarded while the
//! provider is still generating.

use crate::models::{ChatMessage, Role, ToolCall, ToolResult};
use crate::tools::ToolDefinition;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

pub mod mock;
pub mod openrouter;

pub use mock::ScriptedModel;
pub use openrouter::OpenRouterClient;

/// Receiver side of one model invocation.
///
/// Yields text deltas and completed tool calls, then exactly one `Finish`.
/// An `Err` item ends the invocation early.
pub type ModelEventStream = mpsc::UnboundedReceiver<Result<ModelEvent>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Identifier recorded in the conversation log.
    fn model_id(&self) -> &str;

    /// Start one completion. `Err` means nothing was produced at all.
    async fn stream(&self, request: CompletionRequest) -> Result<ModelEventStream>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ProviderMessage>,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    TextDelta(String),
    ToolCall(ToolCall),
    Finish { reason: FinishReason, usage: Usage },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
    Unknown,
}

impl FinishReason {
    /// Map an OpenAI-style `finish_reason`.
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            "tool_calls" | "function_call" | "tool_use" => FinishReason::ToolCalls,
            "error" => FinishReason::Error,
            _ => FinishReason::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content-filter",
            FinishReason::ToolCalls => "tool-calls",
            FinishReason::Error => "error",
            FinishReason::Other => "other",
            FinishReason::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

//
// ================= Provider messages =================
//

/// One message in OpenAI chat-completions format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ProviderMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ProviderToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ProviderFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderFunctionCall {
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

impl ProviderMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ProviderMessage::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ProviderMessage::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ProviderMessage::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// The assistant turn that issued `calls`, with any text produced
    /// alongside them in the same step.
    pub fn assistant_tool_turn(text: &str, calls: &[ToolCall]) -> Self {
        ProviderMessage::Assistant {
            content: (!text.is_empty()).then(|| text.to_string()),
            tool_calls: calls
                .iter()
                .map(|call| ProviderToolCall {
                    id: call.id.clone(),
                    kind: "function".to_string(),
                    function: ProviderFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect(),
        }
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        ProviderMessage::Tool {
            tool_call_id: result.tool_call_id.clone(),
            content: result.payload.to_string(),
        }
    }
}

/// Convert browser history into provider messages.
///
/// Completed tool invocations on earlier assistant turns are replayed as a
/// tool-call turn followed by one tool message per result, then the
/// assistant's text. Client-sent `tool` messages carry no call id and are
/// dropped, as are messages with nothing in them.
pub fn convert_history(messages: &[ChatMessage]) -> Vec<ProviderMessage> {
    let mut out = Vec::with_capacity(messages.len());

    for message in messages {
        let text = message.text();

        match message.role {
            Role::System if !text.is_empty() => out.push(ProviderMessage::system(text)),
            Role::User if !text.is_empty() => out.push(ProviderMessage::user(text)),
            Role::Assistant => {
                let invocations: Vec<_> = message.completed_invocations().collect();

                if !invocations.is_empty() {
                    let calls: Vec<ToolCall> = invocations
                        .iter()
                        .map(|inv| ToolCall {
                            id: inv.tool_call_id.clone(),
                            name: inv.tool_name.clone(),
                            arguments: inv.args.clone(),
                        })
                        .collect();
                    out.push(ProviderMessage::assistant_tool_turn("", &calls));

                    for inv in &invocations {
                        out.push(ProviderMessage::Tool {
                            tool_call_id: inv.tool_call_id.clone(),
                            content: inv
                                .result
                                .as_ref()
                                .map(|r| r.to_string())
                                .unwrap_or_default(),
                        });
                    }
                }

                if !text.is_empty() {
                    out.push(ProviderMessage::assistant(text));
                }
            }
            Role::Tool => debug!("Dropping client-sent tool message"),
            _ => {}
        }
    }

    out
}
