//! Scripted model for development and tests
//!
//! Replays pre-recorded turns in order, one per invocation, and records
//! every request it receives.

use super::{ChatModel, CompletionRequest, FinishReason, ModelEvent, ModelEventStream, Usage};
use crate::error::AssistantError;
use crate::models::ToolCall;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::{mpsc, Mutex};

enum Turn {
    /// Invocation fails before anything is produced.
    Reject(String),
    /// Events replayed in order; `Err` entries become stream errors.
    Events(Vec<std::result::Result<ModelEvent, String>>),
}

pub struct ScriptedModel {
    model_id: String,
    turns: Mutex<VecDeque<Turn>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            model_id: "scripted".to_string(),
            turns: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn push(mut self, turn: Turn) -> Self {
        self.turns.get_mut().push_back(turn);
        self
    }

    /// Reply with text, split on whitespace boundaries into several deltas.
    pub fn then_text(self, text: &str) -> Self {
        let mut events: Vec<_> = text
            .split_inclusive(' ')
            .map(|piece| Ok(ModelEvent::TextDelta(piece.to_string())))
            .collect();
        events.push(Ok(finish(FinishReason::Stop)));
        self.push(Turn::Events(events))
    }

    /// Request a single tool call.
    pub fn then_tool_call(self, name: &str, arguments: Value) -> Self {
        self.then_tool_calls(vec![(name, arguments)])
    }

    /// Request several tool calls in one step.
    pub fn then_tool_calls(mut self, calls: Vec<(&str, Value)>) -> Self {
        let offset = self.turns_len();
        let mut events: Vec<_> = calls
            .into_iter()
            .enumerate()
            .map(|(i, (name, arguments))| {
                Ok(ModelEvent::ToolCall(ToolCall {
                    id: format!("call_{}_{}", offset, i),
                    name: name.to_string(),
                    arguments,
                }))
            })
            .collect();
        events.push(Ok(finish(FinishReason::ToolCalls)));
        self.push(Turn::Events(events))
    }

    /// Replay arbitrary events.
    pub fn then_events(self, events: Vec<ModelEvent>) -> Self {
        self.push(Turn::Events(events.into_iter().map(Ok).collect()))
    }

    /// Fail the invocation outright.
    pub fn then_reject(self, message: &str) -> Self {
        self.push(Turn::Reject(message.to_string()))
    }

    /// Emit `text`, then fail mid-stream.
    pub fn then_stream_error(self, text: &str, message: &str) -> Self {
        self.push(Turn::Events(vec![
            Ok(ModelEvent::TextDelta(text.to_string())),
            Err(message.to_string()),
        ]))
    }

    /// Every request received so far.
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    fn turns_len(&mut self) -> usize {
        self.turns.get_mut().len()
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

fn finish(reason: FinishReason) -> ModelEvent {
    ModelEvent::Finish {
        reason,
        usage: Usage {
            prompt_tokens: 100,
            completion_tokens: 20,
        },
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ModelEventStream> {
        self.requests.lock().await.push(request);

        let turn = self.turns.lock().await.pop_front().ok_or_else(|| {
            AssistantError::LlmError("Scripted model has no turns left".to_string())
        })?;

        let events = match turn {
            Turn::Reject(message) => return Err(AssistantError::LlmError(message)),
            Turn::Events(events) => events,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        for event in events {
            let _ = tx.send(event.map_err(AssistantError::StreamError));
        }

        Ok(rx)
    }
}
