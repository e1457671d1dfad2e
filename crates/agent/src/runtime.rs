use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use rollwise_core::domain::agent::Agent;
use rollwise_core::domain::conversation::{ToolCallRecord, ToolCallStatus};
use rollwise_core::domain::new_id;
use rollwise_core::prompt::{PromptBuilder, PromptError};
use rollwise_db::repositories::ConversationRepository;

use crate::caller_context::CallerContextBuilder;
use crate::guardrails::{GuardrailIntent, GuardrailPolicy};
use crate::llm::{ChatMessage, LlmClient, LlmError};
use crate::tools::{ToolContext, ToolDefinition, ToolOutcome, ToolRegistry, HANGUP_TOOL};

const FALLBACK_REPLY: &str = "I'm sorry, I wasn't able to complete that. Could you say that again?";
const FAREWELL_REPLY: &str = "Thank you for calling. Goodbye!";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Receives every tool call made during a turn, allowed or not.
#[async_trait]
pub trait ToolCallSink: Send + Sync {
    async fn record(&self, record: ToolCallRecord);
}

/// Writes tool calls to the conversation's audit rows. Failures are logged.
pub struct ConversationToolCallSink {
    conversations: Arc<dyn ConversationRepository>,
}

impl ConversationToolCallSink {
    pub fn new(conversations: Arc<dyn ConversationRepository>) -> Self {
        Self { conversations }
    }
}

#[async_trait]
impl ToolCallSink for ConversationToolCallSink {
    async fn record(&self, record: ToolCallRecord) {
        if let Err(error) = self.conversations.record_tool_call(&record).await {
            warn!(
                event_name = "tool.audit_failed",
                conversation_id = %record.conversation_id.0,
                tool = %record.tool_name,
                error = %error,
                "tool call was not recorded"
            );
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExecutedToolCall {
    pub name: String,
    pub arguments: Value,
    pub result: Value,
    pub status: ToolCallStatus,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutcome {
    pub reply: String,
    pub hangup: bool,
    pub tool_calls: Vec<ExecutedToolCall>,
}

pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    guardrails: GuardrailPolicy,
    prompts: PromptBuilder,
    sink: Option<Arc<dyn ToolCallSink>>,
    caller_context: Option<Arc<CallerContextBuilder>>,
    max_tool_rounds: u32,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        guardrails: GuardrailPolicy,
        max_tool_rounds: u32,
    ) -> Result<Self, RuntimeError> {
        Ok(Self {
            llm,
            tools,
            guardrails,
            prompts: PromptBuilder::new()?,
            sink: None,
            caller_context: None,
            max_tool_rounds: max_tool_rounds.max(1),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn ToolCallSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_caller_context(mut self, builder: Arc<CallerContextBuilder>) -> Self {
        self.caller_context = Some(builder);
        self
    }

    /// History block for a known caller. Lookup failures only cost the block.
    async fn caller_context(&self, agent: &Agent, ctx: &ToolContext) -> Option<String> {
        let builder = self.caller_context.as_ref()?;
        let phone = ctx.caller_phone.as_deref().map(str::trim).filter(|phone| !phone.is_empty())?;
        match builder.build(agent, phone, ctx.conversation_id.as_ref(), Utc::now()).await {
            Ok(block) => block,
            Err(error) => {
                warn!(
                    event_name = "agent.caller_context_failed",
                    agent_id = %agent.id.0,
                    error = %error,
                    "caller history left out of the prompt"
                );
                None
            }
        }
    }

    /// Tools offered to this agent. An empty `agent.tools` list means all of
    /// them; the hangup tool is always offered.
    fn offered_tools(&self, agent: &Agent) -> Vec<ToolDefinition> {
        self.tools
            .definitions()
            .into_iter()
            .filter(|definition| {
                agent.tools.is_empty()
                    || definition.name == HANGUP_TOOL
                    || agent.tools.iter().any(|name| *name == definition.name)
            })
            .collect()
    }

    pub async fn run_turn(
        &self,
        agent: &Agent,
        history: Vec<ChatMessage>,
        user_text: &str,
        ctx: &ToolContext,
    ) -> Result<TurnOutcome, RuntimeError> {
        let today = Utc::now().with_timezone(&agent.tz()).date_naive();
        let caller_context = self.caller_context(agent, ctx).await;
        let system_prompt =
            self.prompts.system_prompt_for_caller(agent, today, caller_context.as_deref())?;
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend(history);
        messages.push(ChatMessage::user(user_text));

        let offered = self.offered_tools(agent);
        let mut executed = Vec::new();
        let mut hangup = false;

        for round in 0..self.max_tool_rounds {
            let completion = self.llm.chat(&messages, &offered).await?;
            if completion.tool_calls.is_empty() {
                return Ok(TurnOutcome {
                    reply: completion.content.unwrap_or_else(|| FALLBACK_REPLY.to_string()),
                    hangup,
                    tool_calls: executed,
                });
            }

            messages.push(ChatMessage::assistant_tool_calls(
                completion.content.clone().unwrap_or_default(),
                completion.tool_calls.clone(),
            ));
            for call in completion.tool_calls {
                let outcome = self.dispatch(agent, ctx, &offered, &call.name, call.arguments.clone()).await;
                if call.name == HANGUP_TOOL && outcome.status == ToolCallStatus::Completed {
                    hangup = true;
                }
                self.audit(ctx, &call.name, &call.arguments, &outcome).await;
                messages.push(ChatMessage::tool_result(call.id, &outcome.result));
                executed.push(ExecutedToolCall {
                    name: call.name,
                    arguments: call.arguments,
                    result: outcome.result,
                    status: outcome.status,
                });
            }

            info!(
                event_name = "agent.tool_round",
                agent_id = %agent.id.0,
                round,
                tool_calls = executed.len(),
                hangup
            );
            if hangup {
                break;
            }
        }

        // Tool rounds are spent or the call is ending: ask for plain text.
        let closing = self.llm.chat(&messages, &[]).await?;
        let fallback = if hangup { FAREWELL_REPLY } else { FALLBACK_REPLY };
        let reply = closing.content.unwrap_or_else(|| fallback.to_string());
        Ok(TurnOutcome { reply, hangup, tool_calls: executed })
    }

    async fn dispatch(
        &self,
        agent: &Agent,
        ctx: &ToolContext,
        offered: &[ToolDefinition],
        name: &str,
        arguments: Value,
    ) -> ToolOutcome {
        if !offered.iter().any(|definition| definition.name == name) {
            return ToolOutcome::not_found(name);
        }

        let intent = GuardrailIntent::from_tool(name);
        let decision = self.guardrails.evaluate(&intent, agent);
        if let Some(payload) = decision.tool_payload() {
            warn!(
                event_name = "agent.guardrail_blocked",
                agent_id = %agent.id.0,
                tool = name,
                action = intent.action_key(),
                reason_code = decision.reason_code().unwrap_or_default(),
                "tool call blocked"
            );
            return ToolOutcome { result: payload, status: ToolCallStatus::Failed, execution_time_ms: 0 };
        }
        self.tools.execute(name, ctx, arguments).await
    }

    async fn audit(&self, ctx: &ToolContext, name: &str, arguments: &Value, outcome: &ToolOutcome) {
        let (Some(sink), Some(conversation_id)) = (&self.sink, &ctx.conversation_id) else {
            return;
        };
        sink.record(ToolCallRecord {
            id: new_id(),
            conversation_id: conversation_id.clone(),
            tool_name: name.to_string(),
            parameters: arguments.clone(),
            result: outcome.result.clone(),
            status: outcome.status,
            execution_time_ms: outcome.execution_time_ms,
            created_at: Utc::now(),
        })
        .await;
    }
}
