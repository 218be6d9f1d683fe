//! Core data models for the construction finance assistant
//!
//! Everything here is a transient request/response shape. Persistence lives
//! entirely in the data service behind the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

//
// ================= Chat =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A message as the browser sends it.
///
/// `content` may be empty when the text lives in `parts`. Assistant turns
/// from earlier exchanges can carry tool invocations either as parts or in
/// the legacy `toolInvocations` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, deserialize_with = "content_text")]
    pub content: String,
    #[serde(default)]
    pub parts: Vec<ContentPart>,
    #[serde(default, rename = "toolInvocations", skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            parts: Vec::new(),
            tool_invocations: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            ..Self::user(content)
        }
    }

    /// Plain text of the message: `content` if present, else the text parts.
    pub fn text(&self) -> String {
        if !self.content.is_empty() {
            return self.content.clone();
        }

        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Completed tool invocations attached to this message, parts first.
    pub fn completed_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolInvocation { tool_invocation } => Some(tool_invocation),
                _ => None,
            })
            .chain(self.tool_invocations.iter())
            .filter(|inv| inv.result.is_some())
    }
}

/// The last user-authored message text, logged as "the question".
pub fn last_user_question(messages: &[ChatMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(ChatMessage::text)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolInvocation {
        #[serde(rename = "toolInvocation")]
        tool_invocation: ToolInvocation,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Accepts `null`, a string, or an array of `{type: "text", text}` parts.
fn content_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;

    Ok(match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        Some(other) => other.to_string(),
    })
}

//
// ================= Tools =================
//

/// A tool call issued by the model during one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    #[serde(rename = "toolCallId")]
    pub id: String,
    #[serde(rename = "toolName")]
    pub name: String,
    #[serde(rename = "args")]
    pub arguments: Value,
}

/// Outcome of one tool call, folded back into the next model request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub payload: Value,
}

impl ToolResult {
    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            payload: serde_json::json!({ "error": message.into() }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.payload.get("error").is_some()
    }
}

//
// ================= Conversation Log =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationLogEntry {
    pub org_id: Uuid,
    pub question: String,
    pub tool_calls: Vec<ToolCall>,
    pub response: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

//
// ================= Financial Aggregates =================
//

/// A project known to the tenant, used for name resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct ProjectRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct TradeBudgetRow {
    pub trade_name: String,
    #[serde(default)]
    pub csi_code: String,
    #[serde(default, deserialize_with = "count")]
    pub package_count: i64,
    #[serde(deserialize_with = "amount")]
    pub original_budget: f64,
    #[serde(deserialize_with = "amount")]
    pub approved_changes: f64,
    #[serde(deserialize_with = "amount")]
    pub revised_budget: f64,
    #[serde(deserialize_with = "amount")]
    pub committed: f64,
    #[serde(deserialize_with = "amount")]
    pub invoiced: f64,
    #[serde(deserialize_with = "amount")]
    pub paid: f64,
    #[serde(deserialize_with = "amount")]
    pub remaining: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct ProjectBudgetRow {
    pub project_name: String,
    #[serde(default)]
    pub project_code: String,
    #[serde(default)]
    pub project_status: String,
    #[serde(deserialize_with = "amount")]
    pub original_budget: f64,
    #[serde(deserialize_with = "amount")]
    pub approved_changes: f64,
    #[serde(deserialize_with = "amount")]
    pub revised_budget: f64,
    #[serde(deserialize_with = "amount")]
    pub committed: f64,
    #[serde(deserialize_with = "amount")]
    pub invoiced: f64,
    #[serde(deserialize_with = "amount")]
    pub paid: f64,
    #[serde(deserialize_with = "amount")]
    pub remaining: f64,
    #[serde(deserialize_with = "amount")]
    pub pct_spent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct OverspentPackageRow {
    pub project_name: String,
    pub trade_name: String,
    pub package_name: String,
    #[serde(deserialize_with = "amount")]
    pub revised_budget: f64,
    #[serde(deserialize_with = "amount")]
    pub committed: f64,
    #[serde(deserialize_with = "amount")]
    pub overspent_amount: f64,
    #[serde(deserialize_with = "amount")]
    pub overspent_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct FinancialSummaryRow {
    #[serde(deserialize_with = "amount")]
    pub total_original_budget: f64,
    #[serde(deserialize_with = "amount")]
    pub total_approved_changes: f64,
    #[serde(deserialize_with = "amount")]
    pub total_revised_budget: f64,
    #[serde(deserialize_with = "amount")]
    pub total_committed: f64,
    #[serde(deserialize_with = "amount")]
    pub total_invoiced: f64,
    #[serde(deserialize_with = "amount")]
    pub total_paid: f64,
    #[serde(deserialize_with = "amount")]
    pub total_remaining: f64,
    #[serde(deserialize_with = "amount")]
    pub pct_committed: f64,
    #[serde(deserialize_with = "amount")]
    pub pct_invoiced: f64,
    #[serde(deserialize_with = "amount")]
    pub pct_paid: f64,
    #[serde(default, deserialize_with = "count")]
    pub open_packages: i64,
    #[serde(default, deserialize_with = "count")]
    pub overspent_packages: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct TradePackageRow {
    pub project_name: String,
    pub package_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(deserialize_with = "amount")]
    pub original_budget: f64,
    #[serde(deserialize_with = "amount")]
    pub approved_changes: f64,
    #[serde(deserialize_with = "amount")]
    pub revised_budget: f64,
    #[serde(deserialize_with = "amount")]
    pub committed: f64,
    #[serde(deserialize_with = "amount")]
    pub invoiced: f64,
    #[serde(deserialize_with = "amount")]
    pub paid: f64,
    #[serde(deserialize_with = "amount")]
    pub remaining: f64,
    #[serde(default)]
    pub status: String,
}

/// Postgres `numeric` columns arrive from PostgREST as numbers or strings.
fn amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("amount out of range")),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid amount '{}': {}", s, e))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected numeric amount, got {}",
            other
        ))),
    }
}

fn count<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    amount(deserializer).map(|n| n.round() as i64)
}
