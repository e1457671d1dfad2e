use rollwise_agent::{HistoryBuilder, RuntimeError, ToolContext, TurnOutcome};
use rollwise_core::domain::agent::Agent;
use rollwise_core::domain::conversation::{Conversation, MessageRole};
use rollwise_db::repositories::RepositoryError;
use thiserror::Error;
use tracing::info;

use crate::state::AppState;

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// One exchange on a stored conversation: the caller's text and the agent's
/// reply are both persisted, with history replayed from earlier messages.
pub async fn run_exchange(
    state: &AppState,
    agent: &Agent,
    conversation: &Conversation,
    user_text: &str,
    message_type: &str,
) -> Result<TurnOutcome, TurnError> {
    let stored = state.conversations.list_messages(&conversation.id).await?;
    let history = HistoryBuilder::default().build(&stored);

    state
        .conversations
        .append_message(&conversation.id, MessageRole::User, user_text, message_type)
        .await?;

    let ctx = ToolContext::new(agent.id.clone())
        .with_conversation(conversation.id.clone())
        .with_caller(conversation.caller_phone.clone());
    let outcome = state.runtime.run_turn(agent, history, user_text, &ctx).await?;

    state
        .conversations
        .append_message(&conversation.id, MessageRole::Assistant, &outcome.reply, message_type)
        .await?;

    info!(
        event_name = "conversation.turn_completed",
        agent_id = %agent.id.0,
        conversation_id = %conversation.id.0,
        tool_calls = outcome.tool_calls.len(),
        hangup = outcome.hangup,
        "conversation turn completed"
    );
    Ok(outcome)
}
