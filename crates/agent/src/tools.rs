use std::collections::HashMap;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use rollwise_core::domain::agent::AgentId;
use rollwise_core::domain::conversation::{ConversationId, ToolCallStatus};

pub const HANGUP_TOOL: &str = "hangup_function";

/// Function schema advertised to the model.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Who a tool call runs for. Tools take the agent from here, never from
/// model-supplied arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolContext {
    pub agent_id: AgentId,
    pub conversation_id: Option<ConversationId>,
    pub caller_phone: Option<String>,
}

impl ToolContext {
    pub fn new(agent_id: AgentId) -> Self {
        Self { agent_id, conversation_id: None, caller_phone: None }
    }

    pub fn with_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn with_caller(mut self, caller_phone: Option<String>) -> Self {
        self.caller_phone = caller_phone;
        self
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<Value>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    pub result: Value,
    pub status: ToolCallStatus,
    pub execution_time_ms: i64,
}

impl ToolOutcome {
    pub fn not_found(name: &str) -> Self {
        Self {
            result: json!({ "error": format!("Tool '{name}' not found") }),
            status: ToolCallStatus::Failed,
            execution_time_ms: 0,
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Definitions sorted by name so prompts are stable between turns.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.tools.values().map(|tool| tool.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Runs `name`. Unknown tools and tool errors come back as `{"error": ...}`
    /// payloads so the model can recover.
    pub async fn execute(&self, name: &str, ctx: &ToolContext, input: Value) -> ToolOutcome {
        let started = Instant::now();
        let Some(tool) = self.tools.get(name) else {
            return ToolOutcome::not_found(name);
        };

        let (result, status) = match tool.execute(ctx, input).await {
            Ok(result) => (result, ToolCallStatus::Completed),
            Err(error) => (json!({ "error": error.to_string() }), ToolCallStatus::Failed),
        };
        ToolOutcome {
            result,
            status,
            execution_time_ms: i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX),
        }
    }
}

/// Lets the model end the call.
pub struct HangupTool;

#[async_trait]
impl Tool for HangupTool {
    fn name(&self) -> &'static str {
        HANGUP_TOOL
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: HANGUP_TOOL.to_string(),
            description: "Signal to end the conversation and close the connection".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "reason": {
                        "type": "string",
                        "description": "Brief reason for hanging up (e.g., 'conversation_complete', 'user_inactive', 'user_goodbye')",
                        "default": "conversation_complete"
                    }
                },
                "required": []
            }),
        }
    }

    async fn execute(&self, _ctx: &ToolContext, input: Value) -> Result<Value> {
        let reason = input
            .get("reason")
            .and_then(Value::as_str)
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or("conversation_complete");
        Ok(json!({
            "success": true,
            "action": "hangup",
            "reason": reason,
            "message": format!("Ending conversation: {reason}"),
        }))
    }
}

/// Reads a required string argument.
pub(crate) fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, String> {
    input
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| format!("{field} is required"))
}

pub(crate) fn optional_str(input: &Value, field: &str) -> Option<String> {
    input
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn failure(message: impl Into<String>) -> Value {
    json!({ "success": false, "error": message.into() })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use rollwise_core::domain::agent::AgentId;
    use rollwise_core::domain::conversation::ToolCallStatus;

    use super::{HangupTool, ToolContext, ToolRegistry, HANGUP_TOOL};

    #[tokio::test]
    async fn unknown_tool_reports_not_found() {
        let registry = ToolRegistry::default();
        let outcome = registry
            .execute("book_flight", &ToolContext::new(AgentId("a-1".into())), json!({}))
            .await;

        assert_eq!(outcome.result, json!({ "error": "Tool 'book_flight' not found" }));
        assert_eq!(outcome.status, ToolCallStatus::Failed);
    }

    #[tokio::test]
    async fn hangup_defaults_reason() {
        let mut registry = ToolRegistry::default();
        registry.register(HangupTool);
        assert!(registry.contains(HANGUP_TOOL));
        assert_eq!(registry.definitions().len(), 1);

        let outcome = registry
            .execute(HANGUP_TOOL, &ToolContext::new(AgentId("a-1".into())), json!({}))
            .await;

        assert_eq!(outcome.status, ToolCallStatus::Completed);
        assert_eq!(outcome.result["action"], "hangup");
        assert_eq!(outcome.result["reason"], "conversation_complete");
        assert_eq!(outcome.result["success"], true);
    }
}
