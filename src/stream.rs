//! Output chunks and their wire encoding
//!
//! The browser consumes the AI SDK data-stream protocol: one line per
//! chunk, `<code>:<json>\n`.

use crate::llm::{FinishReason, Usage};
use crate::models::{ToolCall, ToolResult};
use serde_json::json;

/// Header announcing the data-stream protocol version.
pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";
pub const DATA_STREAM_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    StepStart { message_id: String },
    TextDelta(String),
    /// Emitted before execution, state "pending".
    ToolCall(ToolCall),
    /// Emitted after execution, state "result".
    ToolResult(ToolResult),
    StepFinish {
        reason: FinishReason,
        usage: Usage,
        is_continued: bool,
    },
    Finish { reason: FinishReason, usage: Usage },
    Error(String),
}

impl StreamChunk {
    /// Encode as one protocol line, newline included.
    pub fn to_data_stream_line(&self) -> String {
        let (code, value) = match self {
            StreamChunk::StepStart { message_id } => ('f', json!({ "messageId": message_id })),
            StreamChunk::TextDelta(text) => ('0', json!(text)),
            StreamChunk::ToolCall(call) => (
                '9',
                json!({
                    "toolCallId": call.id,
                    "toolName": call.name,
                    "args": call.arguments,
                }),
            ),
            StreamChunk::ToolResult(result) => (
                'a',
                json!({
                    "toolCallId": result.tool_call_id,
                    "result": result.payload,
                }),
            ),
            StreamChunk::StepFinish {
                reason,
                usage,
                is_continued,
            } => (
                'e',
                json!({
                    "finishReason": reason.as_str(),
                    "usage": usage,
                    "isContinued": is_continued,
                }),
            ),
            StreamChunk::Finish { reason, usage } => (
                'd',
                json!({ "finishReason": reason.as_str(), "usage": usage }),
            ),
            StreamChunk::Error(message) => ('3', json!(message)),
        };

        format!("{}:{}\n", code, value)
    }
}
