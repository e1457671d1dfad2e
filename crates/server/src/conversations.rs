//! Conversation history for dashboard users.
//!
//! Routes:
//! - `GET /api/v1/agents/{id}/conversations?limit&offset` - newest first
//! - `GET /api/v1/conversations/{id}`                     - one conversation
//! - `GET /api/v1/conversations/{id}/messages`            - transcript in sequence order

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use rollwise_core::domain::conversation::{Conversation, ConversationId, Message};
use rollwise_core::domain::user::User;
use serde::Deserialize;

use crate::access::agent_access;
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::state::AppState;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl PageQuery {
    fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/agents/{id}/conversations", get(list_conversations))
        .route("/api/v1/conversations/{id}", get(get_conversation))
        .route("/api/v1/conversations/{id}/messages", get(list_messages))
}

pub async fn list_conversations(
    Path(agent_id): Path<String>,
    Query(page): Query<PageQuery>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    let conversations = state
        .conversations
        .list_for_agent(&access.agent.id, page.limit(), page.offset.unwrap_or(0))
        .await?;
    Ok(Json(conversations))
}

/// The conversation, provided the caller is a member of its agent.
async fn visible_conversation(
    state: &AppState,
    conversation_id: String,
    user: &User,
) -> Result<Conversation, ApiError> {
    let conversation = state
        .conversations
        .find(&ConversationId(conversation_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Conversation not found"))?;
    agent_access(state, &conversation.agent_id.0, user).await.map_err(|error| {
        if error.status == StatusCode::NOT_FOUND {
            ApiError::not_found("Conversation not found")
        } else {
            error
        }
    })?;
    Ok(conversation)
}

pub async fn get_conversation(
    Path(conversation_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Conversation>, ApiError> {
    Ok(Json(visible_conversation(&state, conversation_id, &user).await?))
}

pub async fn list_messages(
    Path(conversation_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Message>>, ApiError> {
    let conversation = visible_conversation(&state, conversation_id, &user).await?;
    let mut messages = state.conversations.list_messages(&conversation.id).await?;
    messages.sort_by_key(|message| message.sequence_number);
    Ok(Json(messages))
}
