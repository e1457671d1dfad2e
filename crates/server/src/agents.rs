//! Agent management for dashboard users.
//!
//! Routes (all under `/api/v1/agents`):
//! - `POST   /`                        - create an agent with default settings
//! - `GET    /`                        - agents the caller belongs to
//! - `GET    /{id}`                    - one agent
//! - `PUT    /{id}`                    - partial update (owner/editor)
//! - `DELETE /{id}`                    - soft delete (owner)
//! - `PUT    /{id}/phone-number`       - assign or clear the answering number
//! - `GET    /{id}/users`              - members and their roles
//! - `POST   /{id}/users/invite`       - add an existing user by email
//! - `POST   /{id}/users/assign_by_id` - add an existing user by id
//! - `POST   /{id}/users/unassign`     - remove a member
//! - `POST   /{id}/chat`               - text chat with the agent from the dashboard

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rollwise_core::domain::agent::{
    Agent, AgentId, AgentPatch, AgentRole, BusinessHours, NewAgent,
};
use rollwise_core::domain::conversation::{
    ConversationId, ConversationType, NewConversation, ToolCallStatus,
};
use rollwise_core::domain::new_id;
use rollwise_core::domain::user::{normalize_email, User, UserId};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::access::agent_access;
use crate::auth::CurrentUser;
use crate::dialogue::{run_exchange, TurnError};
use crate::error::ApiError;
use crate::state::AppState;

const DASHBOARD_SESSION_NAME: &str = "Dashboard chat";

#[derive(Debug, Default, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub greeting: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub voice_model: Option<String>,
    #[serde(default)]
    pub voice_provider: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub business_hours: Option<BusinessHours>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub booking_enabled: Option<bool>,
    #[serde(default)]
    pub ordering_enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    pub agent_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PhoneNumberRequest {
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MemberResponse {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
    pub role: AgentRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub email: String,
    #[serde(default = "default_member_role")]
    pub role: AgentRole,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub user_id: String,
    #[serde(default = "default_member_role")]
    pub role: AgentRole,
}

#[derive(Debug, Deserialize)]
pub struct UnassignRequest {
    pub user_id: String,
}

fn default_member_role() -> AgentRole {
    AgentRole::Viewer
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ToolCallSummary {
    pub name: String,
    pub status: ToolCallStatus,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub conversation_id: ConversationId,
    pub reply: String,
    pub hangup: bool,
    pub tool_calls: Vec<ToolCallSummary>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/agents", post(create_agent).get(list_agents))
        .route("/api/v1/agents/{id}", get(get_agent).put(update_agent).delete(delete_agent))
        .route("/api/v1/agents/{id}/phone-number", put(set_phone_number))
        .route("/api/v1/agents/{id}/users", get(list_users))
        .route("/api/v1/agents/{id}/users/invite", post(invite_user))
        .route("/api/v1/agents/{id}/users/assign_by_id", post(assign_user))
        .route("/api/v1/agents/{id}/users/unassign", post(unassign_user))
        .route("/api/v1/agents/{id}/chat", post(chat))
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

pub async fn create_agent(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateAgentRequest>,
) -> Result<Json<Agent>, ApiError> {
    let mut draft = NewAgent::with_defaults(
        body.name,
        body.greeting.as_deref(),
        body.system_prompt.as_deref(),
        &user.email,
    );
    draft.business_name = non_blank(body.business_name);
    draft.phone_number = non_blank(body.phone_number);
    if let Some(voice_model) = non_blank(body.voice_model) {
        draft.voice_model = voice_model;
    }
    draft.voice_provider = non_blank(body.voice_provider);
    if let Some(language) = non_blank(body.language) {
        draft.language = language;
    }
    if let Some(timezone) = non_blank(body.timezone) {
        draft.timezone = timezone;
    }
    if let Some(business_hours) = body.business_hours {
        draft.business_hours = business_hours;
    }
    if let Some(tools) = body.tools {
        draft.tools = tools;
    }
    if let Some(enabled) = body.booking_enabled {
        draft.booking_enabled = enabled;
    }
    if let Some(enabled) = body.ordering_enabled {
        draft.ordering_enabled = enabled;
    }
    draft.validate()?;

    let mut agent = draft.into_agent(AgentId(new_id()), Utc::now());
    state.agents.create(&agent, &user.id).await?;
    info!(
        event_name = "agent.created",
        agent_id = %agent.id.0,
        user_id = %user.id.0,
        "agent created"
    );

    // The agent is usable without a calendar; booking tools report it as unconfigured.
    match state.booking.provision_calendar(&agent, &user.email).await {
        Ok(calendar_id) => agent.calendar_id = Some(calendar_id),
        Err(error) => warn!(
            event_name = "agent.calendar_provision_failed",
            agent_id = %agent.id.0,
            error = %error,
            "agent created without a calendar"
        ),
    }

    Ok(Json(agent))
}

pub async fn list_agents(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Agent>>, ApiError> {
    Ok(Json(state.agents.list_for_user(&user.id).await?))
}

pub async fn get_agent(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Agent>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    Ok(Json(access.agent))
}

pub async fn update_agent(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(patch): Json<AgentPatch>,
) -> Result<Json<Agent>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    access.require_editor()?;
    patch.validate()?;

    let mut agent = access.agent;
    patch.apply_to(&mut agent, Utc::now());
    state.agents.update(&agent).await?;
    info!(event_name = "agent.updated", agent_id = %agent.id.0, user_id = %user.id.0, "agent updated");
    Ok(Json(agent))
}

pub async fn delete_agent(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<MessageResponse>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    access.require_owner()?;

    state.agents.soft_delete(&access.agent.id).await?;
    info!(event_name = "agent.deleted", agent_id = %agent_id, user_id = %user.id.0, "agent deleted");
    Ok(Json(MessageResponse { message: "Agent deleted successfully".to_string(), agent_id }))
}

pub async fn set_phone_number(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<PhoneNumberRequest>,
) -> Result<Json<Agent>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    access.require_editor()?;

    let phone_number = non_blank(body.phone_number);
    state.agents.set_phone_number(&access.agent.id, phone_number.as_deref()).await?;

    let mut agent = access.agent;
    agent.phone_number = phone_number;
    Ok(Json(agent))
}

// ---------------------------------------------------------------------------
// Members
// ---------------------------------------------------------------------------

pub async fn list_users(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<MemberResponse>>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    let members = state.agents.list_members(&access.agent.id).await?;
    Ok(Json(
        members
            .into_iter()
            .map(|member| MemberResponse {
                user_id: member.user.id,
                name: member.user.name,
                email: member.user.email,
                role: member.role,
                joined_at: member.joined_at,
            })
            .collect(),
    ))
}

pub async fn invite_user(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<InviteRequest>,
) -> Result<Json<MemberResponse>, ApiError> {
    let email = normalize_email(&body.email)?;
    let invitee = state
        .users
        .find_by_email(&email)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    add_member(&state, &agent_id, &user, invitee, body.role).await.map(Json)
}

pub async fn assign_user(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<AssignRequest>,
) -> Result<Json<MemberResponse>, ApiError> {
    let assignee = state
        .users
        .find_by_id(&UserId(body.user_id))
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    add_member(&state, &agent_id, &user, assignee, body.role).await.map(Json)
}

async fn add_member(
    state: &AppState,
    agent_id: &str,
    actor: &User,
    member: User,
    role: AgentRole,
) -> Result<MemberResponse, ApiError> {
    let access = agent_access(state, agent_id, actor).await?;
    access.require_editor()?;
    if role == AgentRole::Owner {
        access.require_owner()?;
    }
    if state.agents.role_of(&access.agent.id, &member.id).await?.is_some() {
        return Err(ApiError::conflict("User is already a member of this agent"));
    }

    state.agents.add_member(&access.agent.id, &member.id, role).await?;
    info!(
        event_name = "agent.member_added",
        agent_id = %access.agent.id.0,
        user_id = %member.id.0,
        role = role.as_str(),
        "member added"
    );
    Ok(MemberResponse {
        user_id: member.id,
        name: member.name,
        email: member.email,
        role,
        joined_at: Utc::now(),
    })
}

pub async fn unassign_user(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<UnassignRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    let target = UserId(body.user_id);
    if target != user.id {
        access.require_editor()?;
    }

    let role = state
        .agents
        .role_of(&access.agent.id, &target)
        .await?
        .ok_or_else(|| ApiError::not_found("User is not a member of this agent"))?;
    if role == AgentRole::Owner {
        access.require_owner()?;
        if state.agents.owner_count(&access.agent.id).await? <= 1 {
            return Err(ApiError::bad_request("Cannot remove the last owner of an agent"));
        }
    }

    state.agents.remove_member(&access.agent.id, &target).await?;
    info!(
        event_name = "agent.member_removed",
        agent_id = %access.agent.id.0,
        user_id = %target.0,
        "member removed"
    );
    Ok(Json(MessageResponse { message: "User removed from agent".to_string(), agent_id }))
}

// ---------------------------------------------------------------------------
// Dashboard chat
// ---------------------------------------------------------------------------

pub async fn chat(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    let query = body.query.trim();
    if query.is_empty() {
        return Err(ApiError::bad_request("query must not be empty"));
    }

    let conversation = match body.conversation_id {
        Some(id) => state
            .conversations
            .find(&ConversationId(id))
            .await?
            .filter(|conversation| conversation.agent_id == access.agent.id)
            .ok_or_else(|| ApiError::not_found("Conversation not found"))?,
        None => {
            state
                .conversations
                .create(NewConversation {
                    agent_id: access.agent.id.clone(),
                    session_name: DASHBOARD_SESSION_NAME.to_string(),
                    conversation_type: ConversationType::Sms,
                    caller_phone: None,
                    twilio_sid: None,
                })
                .await?
        }
    };

    let outcome = run_exchange(&state, &access.agent, &conversation, query, "text")
        .await
        .map_err(|error| match error {
            TurnError::Repository(error) => ApiError::from(error),
            TurnError::Runtime(error) => {
                error!(
                    event_name = "agent.chat_failed",
                    agent_id = %access.agent.id.0,
                    error = %error,
                    "dashboard chat turn failed"
                );
                ApiError::new(StatusCode::BAD_GATEWAY, "The assistant is unavailable")
            }
        })?;

    Ok(Json(ChatResponse {
        conversation_id: conversation.id,
        reply: outcome.reply,
        hangup: outcome.hangup,
        tool_calls: outcome
            .tool_calls
            .into_iter()
            .map(|call| ToolCallSummary { name: call.name, status: call.status })
            .collect(),
    }))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}
