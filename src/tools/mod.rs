//! Tool trait and registry
//!
//! Tools are thin typed wrappers over one gateway query each. The model
//! picks them by name; the registry maps the name to a handler and
//! validates arguments before anything runs.

use crate::error::AssistantError;
use crate::gateway::FinancialGateway;
use crate::models::{ToolCall, ToolResult};
use crate::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod finance;

pub use finance::{
    BudgetByProjectTool, BudgetByTradeTool, FinancialSummaryTool, OverspentPackagesTool,
    PackagesByTradeTool, KNOWN_TRADES,
};

/// Everything a tool needs to run one call.
#[derive(Clone)]
pub struct ToolContext {
    pub gateway: Arc<dyn FinancialGateway>,
    pub org_id: Uuid,
}

/// Schema-bearing description handed to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Trait for a single tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the argument object.
    fn parameters(&self) -> Value;
    /// Run with already-decoded JSON arguments.
    ///
    /// Validation failures are `Err`. Gateway failures are returned as an
    /// `{error}` payload so they never cross the tool boundary.
    async fn execute(&self, ctx: &ToolContext, arguments: Value) -> Result<Value>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Definitions sorted by name so every model request is identical.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.list()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Execute one model-issued call. Never fails: every problem becomes an
    /// `{error}` payload the model can read and react to.
    pub async fn dispatch(&self, ctx: &ToolContext, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool_name = %call.name, "Model requested an unregistered tool");
            return ToolResult::error(
                call,
                AssistantError::ToolNotFound(call.name.clone()).payload_message(),
            );
        };

        debug!(tool_name = %call.name, tool_call_id = %call.id, "Executing tool");

        match tool.execute(ctx, call.arguments.clone()).await {
            Ok(payload) => ToolResult {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                payload,
            },
            Err(e) => {
                warn!(tool_name = %call.name, error = %e, "Tool call rejected");
                ToolResult::error(call, e.payload_message())
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a tool's argument object into its typed form.
///
/// `null` counts as an empty object; anything else that is not an object
/// is rejected, as are wrong primitive types, unknown fields and missing
/// required fields.
pub fn parse_arguments<T: DeserializeOwned>(tool_name: &str, arguments: Value) -> Result<T> {
    let arguments = match arguments {
        Value::Null => json!({}),
        Value::Object(map) => Value::Object(map),
        other => {
            return Err(AssistantError::InvalidToolInput(format!(
                "{} expects a JSON object, got {}",
                tool_name, other
            )))
        }
    };

    serde_json::from_value(arguments).map_err(|e| {
        AssistantError::InvalidToolInput(format!("{}: {}", tool_name, e))
    })
}

/// Create the registry with the five finance tools.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(BudgetByTradeTool));
    registry.register(Arc::new(BudgetByProjectTool));
    registry.register(Arc::new(OverspentPackagesTool));
    registry.register(Arc::new(FinancialSummaryTool));
    registry.register(Arc::new(PackagesByTradeTool));

    registry
}
