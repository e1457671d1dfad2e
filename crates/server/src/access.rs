use rollwise_core::domain::agent::{Agent, AgentId, AgentRole};
use rollwise_core::domain::user::{GlobalRole, User};

use crate::error::ApiError;
use crate::state::AppState;

/// An active agent and the caller's role on it.
#[derive(Clone, Debug)]
pub struct AgentAccess {
    pub agent: Agent,
    pub role: AgentRole,
}

impl AgentAccess {
    pub fn require_editor(&self) -> Result<(), ApiError> {
        if self.role.can_edit() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Owner or editor role required"))
        }
    }

    pub fn require_owner(&self) -> Result<(), ApiError> {
        if self.role == AgentRole::Owner {
            Ok(())
        } else {
            Err(ApiError::forbidden("Owner role required"))
        }
    }
}

/// Resolves the caller's access to an active agent. Non-members get the same
/// 404 as a missing agent. Platform admins act as owners everywhere.
pub async fn agent_access(
    state: &AppState,
    agent_id: &str,
    user: &User,
) -> Result<AgentAccess, ApiError> {
    let agent_id = AgentId(agent_id.to_string());
    let agent = state
        .agents
        .find_active(&agent_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;

    let role = if user.global_role == GlobalRole::PlatformAdmin {
        AgentRole::Owner
    } else {
        state
            .agents
            .role_of(&agent_id, &user.id)
            .await?
            .ok_or_else(|| ApiError::not_found("Agent not found"))?
    };
    Ok(AgentAccess { agent, role })
}
