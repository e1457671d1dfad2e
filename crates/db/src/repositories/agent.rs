use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use rollwise_core::domain::agent::{Agent, AgentId, AgentRole};
use rollwise_core::domain::user::{User, UserId};

use super::user::row_to_user;
use super::{
    column, decode_json, decode_timestamp, encode_json, encode_timestamp, map_unique_violation,
    parse_column, AgentMember, AgentRepository, RepositoryError,
};
use crate::DbPool;

const AGENT_COLUMNS: &str = "a.id, a.name, a.business_name, a.phone_number, a.greeting,
    a.voice_model, a.voice_provider, a.system_prompt, a.language, a.tools_json, a.calendar_id,
    a.timezone, a.business_hours_json, a.after_hours_behavior, a.after_hours_message,
    a.default_slot_duration, a.max_slot_appointments, a.buffer_time, a.blocked_dates_json,
    a.invitees_json, a.booking_enabled, a.ordering_enabled, a.closed, a.closed_message,
    a.active, a.created_at, a.updated_at";

const PHONE_TAKEN: &str = "phone number is already assigned to another agent";

pub struct SqlAgentRepository {
    pool: DbPool,
}

impl SqlAgentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_agent(row: &SqliteRow) -> Result<Agent, RepositoryError> {
    let tools_json: String = column(row, "tools_json")?;
    let hours_json: String = column(row, "business_hours_json")?;
    let blocked_json: String = column(row, "blocked_dates_json")?;
    let invitees_json: String = column(row, "invitees_json")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;
    let slot: i64 = column(row, "default_slot_duration")?;
    let max_per_slot: i64 = column(row, "max_slot_appointments")?;
    let buffer: i64 = column(row, "buffer_time")?;

    Ok(Agent {
        id: AgentId(column(row, "id")?),
        name: column(row, "name")?,
        business_name: column(row, "business_name")?,
        phone_number: column(row, "phone_number")?,
        greeting: column(row, "greeting")?,
        voice_model: column(row, "voice_model")?,
        voice_provider: column(row, "voice_provider")?,
        system_prompt: column(row, "system_prompt")?,
        language: column(row, "language")?,
        tools: decode_json(&tools_json, "tools_json")?,
        calendar_id: column(row, "calendar_id")?,
        timezone: column(row, "timezone")?,
        business_hours: decode_json(&hours_json, "business_hours_json")?,
        after_hours_behavior: column(row, "after_hours_behavior")?,
        after_hours_message: column(row, "after_hours_message")?,
        default_slot_duration: to_u32(slot, "default_slot_duration")?,
        max_slot_appointments: to_u32(max_per_slot, "max_slot_appointments")?,
        buffer_time: to_u32(buffer, "buffer_time")?,
        blocked_dates: decode_json(&blocked_json, "blocked_dates_json")?,
        invitees: decode_json(&invitees_json, "invitees_json")?,
        booking_enabled: column(row, "booking_enabled")?,
        ordering_enabled: column(row, "ordering_enabled")?,
        closed: column(row, "closed")?,
        closed_message: column(row, "closed_message")?,
        active: column(row, "active")?,
        created_at: decode_timestamp(&created_at)?,
        updated_at: decode_timestamp(&updated_at)?,
    })
}

fn to_u32(value: i64, name: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Decode(format!("{name} out of range: {value}")))
}

#[async_trait::async_trait]
impl AgentRepository for SqlAgentRepository {
    async fn create(&self, agent: &Agent, owner: &UserId) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO agents (id, name, business_name, phone_number, greeting, voice_model,
                                 voice_provider, system_prompt, language, tools_json, calendar_id,
                                 timezone, business_hours_json, after_hours_behavior,
                                 after_hours_message, default_slot_duration, max_slot_appointments,
                                 buffer_time, blocked_dates_json, invitees_json, booking_enabled,
                                 ordering_enabled, closed, closed_message, active, created_at,
                                 updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&agent.id.0)
        .bind(&agent.name)
        .bind(&agent.business_name)
        .bind(&agent.phone_number)
        .bind(&agent.greeting)
        .bind(&agent.voice_model)
        .bind(&agent.voice_provider)
        .bind(&agent.system_prompt)
        .bind(&agent.language)
        .bind(encode_json(&agent.tools)?)
        .bind(&agent.calendar_id)
        .bind(&agent.timezone)
        .bind(encode_json(&agent.business_hours)?)
        .bind(&agent.after_hours_behavior)
        .bind(&agent.after_hours_message)
        .bind(i64::from(agent.default_slot_duration))
        .bind(i64::from(agent.max_slot_appointments))
        .bind(i64::from(agent.buffer_time))
        .bind(encode_json(&agent.blocked_dates)?)
        .bind(encode_json(&agent.invitees)?)
        .bind(agent.booking_enabled)
        .bind(agent.ordering_enabled)
        .bind(agent.closed)
        .bind(&agent.closed_message)
        .bind(agent.active)
        .bind(encode_timestamp(&agent.created_at))
        .bind(encode_timestamp(&agent.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|error| map_unique_violation(error, PHONE_TAKEN))?;

        sqlx::query(
            "INSERT INTO agent_users (agent_id, user_id, role, created_at) VALUES (?, ?, 'owner', ?)",
        )
        .bind(&agent.id.0)
        .bind(&owner.0)
        .bind(encode_timestamp(&agent.created_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents a WHERE a.id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_agent).transpose()
    }

    async fn find_active(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents a WHERE a.id = ? AND a.active = 1"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_agent).transpose()
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS}
             FROM agents a
             JOIN agent_users au ON au.agent_id = a.id
             WHERE au.user_id = ? AND a.active = 1
             ORDER BY a.created_at ASC"
        ))
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_agent).collect()
    }

    async fn update(&self, agent: &Agent) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE agents SET
                 name = ?, business_name = ?, greeting = ?, voice_model = ?, voice_provider = ?,
                 system_prompt = ?, language = ?, tools_json = ?, timezone = ?,
                 business_hours_json = ?, after_hours_behavior = ?, after_hours_message = ?,
                 default_slot_duration = ?, max_slot_appointments = ?, buffer_time = ?,
                 blocked_dates_json = ?, invitees_json = ?, booking_enabled = ?,
                 ordering_enabled = ?, closed = ?, closed_message = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&agent.name)
        .bind(&agent.business_name)
        .bind(&agent.greeting)
        .bind(&agent.voice_model)
        .bind(&agent.voice_provider)
        .bind(&agent.system_prompt)
        .bind(&agent.language)
        .bind(encode_json(&agent.tools)?)
        .bind(&agent.timezone)
        .bind(encode_json(&agent.business_hours)?)
        .bind(&agent.after_hours_behavior)
        .bind(&agent.after_hours_message)
        .bind(i64::from(agent.default_slot_duration))
        .bind(i64::from(agent.max_slot_appointments))
        .bind(i64::from(agent.buffer_time))
        .bind(encode_json(&agent.blocked_dates)?)
        .bind(encode_json(&agent.invitees)?)
        .bind(agent.booking_enabled)
        .bind(agent.ordering_enabled)
        .bind(agent.closed)
        .bind(&agent.closed_message)
        .bind(encode_timestamp(&agent.updated_at))
        .bind(&agent.id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn soft_delete(&self, id: &AgentId) -> Result<bool, RepositoryError> {
        // The number is released so another agent can take it.
        let result = sqlx::query(
            "UPDATE agents SET active = 0, phone_number = NULL, updated_at = ?
             WHERE id = ? AND active = 1",
        )
        .bind(encode_timestamp(&Utc::now()))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_calendar_id(
        &self,
        id: &AgentId,
        calendar_id: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE agents SET calendar_id = ?, updated_at = ? WHERE id = ?")
            .bind(calendar_id)
            .bind(encode_timestamp(&Utc::now()))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_phone_number(
        &self,
        id: &AgentId,
        phone_number: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE agents SET phone_number = ?, updated_at = ? WHERE id = ?")
            .bind(phone_number)
            .bind(encode_timestamp(&Utc::now()))
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(|error| map_unique_violation(error, PHONE_TAKEN))?;
        Ok(())
    }

    async fn role_of(
        &self,
        agent_id: &AgentId,
        user_id: &UserId,
    ) -> Result<Option<AgentRole>, RepositoryError> {
        let row = sqlx::query("SELECT role FROM agent_users WHERE agent_id = ? AND user_id = ?")
            .bind(&agent_id.0)
            .bind(&user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(|row| parse_column::<AgentRole>(row, "role")).transpose()
    }

    async fn list_members(&self, agent_id: &AgentId) -> Result<Vec<AgentMember>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT u.id, u.name, u.email, u.auth_subject, u.email_verified, u.phone_number,
                    u.global_role, u.active, u.created_at, u.updated_at,
                    au.role, au.created_at AS joined_at
             FROM agent_users au
             JOIN users u ON u.id = au.user_id
             WHERE au.agent_id = ?
             ORDER BY au.created_at ASC, u.email ASC",
        )
        .bind(&agent_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let user: User = row_to_user(row)?;
                let joined_at: String = column(row, "joined_at")?;
                Ok(AgentMember {
                    user,
                    role: parse_column(row, "role")?,
                    joined_at: decode_timestamp(&joined_at)?,
                })
            })
            .collect()
    }

    async fn add_member(
        &self,
        agent_id: &AgentId,
        user_id: &UserId,
        role: AgentRole,
    ) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO agent_users (agent_id, user_id, role, created_at) VALUES (?, ?, ?, ?)")
            .bind(&agent_id.0)
            .bind(&user_id.0)
            .bind(role.as_str())
            .bind(encode_timestamp(&Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(|error| map_unique_violation(error, "user is already a member"))?;
        Ok(())
    }

    async fn remove_member(
        &self,
        agent_id: &AgentId,
        user_id: &UserId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM agent_users WHERE agent_id = ? AND user_id = ?")
            .bind(&agent_id.0)
            .bind(&user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn owner_count(&self, agent_id: &AgentId) -> Result<i64, RepositoryError> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(1) FROM agent_users WHERE agent_id = ? AND role = 'owner'",
        )
        .bind(&agent_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
