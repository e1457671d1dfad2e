//! Agent runtime - LLM conversation turns with tool calling
//!
//! This crate is the part of rollwise that talks to vendors on behalf of an
//! agent:
//! - Chat completions against an OpenAI-compatible endpoint (`llm`)
//! - Calendar reads and writes against the calendar vendor (`calendar`)
//! - Tools the model may call: bookings, orders, hangup (`tools`)
//! - Guardrails keyed on the agent's booking/ordering/closed flags (`guardrails`)
//!
//! # Architecture
//!
//! A turn follows a bounded loop:
//! 1. **Prompt** - system prompt from the agent settings, the caller's
//!    earlier calls, orders and bookings, plus trimmed history
//! 2. **Completion** - the model answers or requests tool calls
//! 3. **Guardrails** - each requested call is checked against the agent flags
//! 4. **Execution** - allowed calls run through the `ToolRegistry`; results go
//!    back to the model until it answers or the round limit is reached
//!
//! # Key Types
//!
//! - `AgentRuntime` - turn orchestrator (see `runtime`)
//! - `LlmClient` - pluggable completion trait
//! - `CalendarClient` - pluggable calendar vendor trait
//! - `BookingService` - booking rules shared by tools and the HTTP API

pub mod calendar;
pub mod calendar_tools;
pub mod caller_context;
pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod order_tools;
pub mod runtime;
pub mod summary;
pub mod tools;

use std::sync::Arc;

use rollwise_db::repositories::{AgentRepository, OrderRepository};

pub use calendar::{
    CalendarClient, CalendarError, CalendarEvent, GoogleCalendarClient, InMemoryCalendar,
};
pub use calendar_tools::{BookingError, BookingService, CreateEventRequest, EventListing};
pub use caller_context::CallerContextBuilder;
pub use conversation::HistoryBuilder;
pub use guardrails::{GuardrailDecision, GuardrailIntent, GuardrailPolicy};
pub use llm::{
    ChatCompletion, ChatMessage, LlmClient, LlmError, OpenAiCompatibleClient, ScriptedLlmClient,
};
pub use runtime::{AgentRuntime, ConversationToolCallSink, RuntimeError, ToolCallSink, TurnOutcome};
pub use summary::ConversationSummarizer;
pub use tools::{Tool, ToolContext, ToolDefinition, ToolRegistry};

/// Registry with every built-in tool: hangup, the five calendar tools and
/// the ordering tools.
pub fn standard_tools(
    booking: Arc<BookingService>,
    agents: Arc<dyn AgentRepository>,
    orders: Arc<dyn OrderRepository>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    registry.register(tools::HangupTool);
    registry.register(calendar_tools::CreateCalendarEventTool::new(booking.clone()));
    registry.register(calendar_tools::CancelCalendarEventTool::new(booking.clone()));
    registry.register(calendar_tools::SearchCalendarEventsTool::new(booking.clone()));
    registry.register(calendar_tools::UpdateCalendarEventTool::new(booking.clone()));
    registry.register(calendar_tools::ListCalendarEventsTool::new(booking));
    registry.register(order_tools::CreateOrderTool::new(agents, orders.clone()));
    registry.register(order_tools::ListMenuItemsTool::new(orders.clone()));
    registry.register(order_tools::AddOrderItemTool::new(orders));
    registry
}
