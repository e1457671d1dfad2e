use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use rollwise_core::domain::agent::AgentId;
use rollwise_core::domain::conversation::{
    Conversation, ConversationId, ConversationStatus, ConversationType, Message, MessageRole,
    NewConversation, ToolCallRecord,
};
use rollwise_core::domain::new_id;

use super::{
    column, decode_json, decode_optional_timestamp, decode_timestamp, encode_json,
    encode_timestamp, parse_column, ConversationRepository, RepositoryError,
};
use crate::DbPool;

const CONVERSATION_COLUMNS: &str = "id, agent_id, session_name, conversation_type, caller_phone,
    twilio_sid, status, started_at, ended_at, duration_seconds, summary, active, created_at";

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_conversation(row: &SqliteRow) -> Result<Conversation, RepositoryError> {
    let started_at: String = column(row, "started_at")?;
    let created_at: String = column(row, "created_at")?;
    Ok(Conversation {
        id: ConversationId(column(row, "id")?),
        agent_id: AgentId(column(row, "agent_id")?),
        session_name: column(row, "session_name")?,
        conversation_type: parse_column(row, "conversation_type")?,
        caller_phone: column(row, "caller_phone")?,
        twilio_sid: column(row, "twilio_sid")?,
        status: parse_column(row, "status")?,
        started_at: decode_timestamp(&started_at)?,
        ended_at: decode_optional_timestamp(column(row, "ended_at")?)?,
        duration_seconds: column(row, "duration_seconds")?,
        summary: column(row, "summary")?,
        active: column(row, "active")?,
        created_at: decode_timestamp(&created_at)?,
    })
}

fn row_to_message(row: &SqliteRow) -> Result<Message, RepositoryError> {
    let created_at: String = column(row, "created_at")?;
    Ok(Message {
        id: column(row, "id")?,
        conversation_id: ConversationId(column(row, "conversation_id")?),
        role: parse_column(row, "role")?,
        content: column(row, "content")?,
        sequence_number: column(row, "sequence_number")?,
        message_type: column(row, "message_type")?,
        created_at: decode_timestamp(&created_at)?,
    })
}

fn row_to_tool_call(row: &SqliteRow) -> Result<ToolCallRecord, RepositoryError> {
    let parameters: String = column(row, "parameters_json")?;
    let result: String = column(row, "result_json")?;
    let created_at: String = column(row, "created_at")?;
    Ok(ToolCallRecord {
        id: column(row, "id")?,
        conversation_id: ConversationId(column(row, "conversation_id")?),
        tool_name: column(row, "tool_name")?,
        parameters: decode_json(&parameters, "parameters_json")?,
        result: decode_json(&result, "result_json")?,
        status: parse_column(row, "status")?,
        execution_time_ms: column(row, "execution_time_ms")?,
        created_at: decode_timestamp(&created_at)?,
    })
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn create(&self, conversation: NewConversation) -> Result<Conversation, RepositoryError> {
        let id = ConversationId(new_id());
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO conversations (id, agent_id, session_name, conversation_type, caller_phone,
                                        twilio_sid, status, started_at, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 'active', ?, 1, ?)",
        )
        .bind(&id.0)
        .bind(&conversation.agent_id.0)
        .bind(&conversation.session_name)
        .bind(conversation.conversation_type.as_str())
        .bind(&conversation.caller_phone)
        .bind(&conversation.twilio_sid)
        .bind(encode_timestamp(&now))
        .bind(encode_timestamp(&now))
        .execute(&self.pool)
        .await?;

        self.find(&id)
            .await?
            .ok_or_else(|| RepositoryError::Decode(format!("conversation `{}` missing after insert", id.0)))
    }

    async fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn list_for_agent(
        &self,
        agent_id: &AgentId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE agent_id = ? AND active = 1
             ORDER BY created_at DESC
             LIMIT ? OFFSET ?"
        ))
        .bind(&agent_id.0)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_conversation).collect()
    }

    async fn set_summary(&self, id: &ConversationId, summary: &str) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE conversations SET summary = ? WHERE id = ?")
            .bind(summary)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_summaries_for_caller(
        &self,
        agent_id: &AgentId,
        caller_phone: &str,
        since: DateTime<Utc>,
        exclude: Option<&ConversationId>,
        limit: u32,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let exclude = exclude.map(|id| id.0.as_str());
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE agent_id = ? AND caller_phone = ? AND active = 1
               AND started_at >= ?
               AND summary IS NOT NULL AND TRIM(summary) <> ''
               AND (? IS NULL OR id <> ?)
             ORDER BY started_at DESC
             LIMIT ?"
        ))
        .bind(&agent_id.0)
        .bind(caller_phone)
        .bind(encode_timestamp(&since))
        .bind(exclude)
        .bind(exclude)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_conversation).collect()
    }

    async fn find_by_twilio_sid(
        &self,
        agent_id: &AgentId,
        twilio_sid: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE agent_id = ? AND twilio_sid = ?
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(&agent_id.0)
        .bind(twilio_sid)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn find_active_for_caller(
        &self,
        agent_id: &AgentId,
        kind: ConversationType,
        caller_phone: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE agent_id = ? AND conversation_type = ? AND caller_phone = ?
               AND status = 'active' AND active = 1
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(&agent_id.0)
        .bind(kind.as_str())
        .bind(caller_phone)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_conversation).transpose()
    }

    async fn complete(
        &self,
        id: &ConversationId,
        status: ConversationStatus,
        ended_at: DateTime<Utc>,
        duration_seconds: Option<i64>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE conversations
             SET status = ?, ended_at = ?, duration_seconds = COALESCE(?, duration_seconds)
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(encode_timestamp(&ended_at))
        .bind(duration_seconds)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        role: MessageRole,
        content: &str,
        message_type: &str,
    ) -> Result<Message, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let sequence_number: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM messages WHERE conversation_id = ?",
        )
        .bind(&conversation_id.0)
        .fetch_one(&mut *tx)
        .await?;

        let message = Message {
            id: new_id(),
            conversation_id: conversation_id.clone(),
            role,
            content: content.to_string(),
            sequence_number,
            message_type: message_type.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, sequence_number, message_type,
                                   created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id.0)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.sequence_number)
        .bind(&message.message_type)
        .bind(encode_timestamp(&message.created_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, sequence_number, message_type, created_at
             FROM messages WHERE conversation_id = ? ORDER BY sequence_number ASC",
        )
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_message).collect()
    }

    async fn record_tool_call(&self, record: &ToolCallRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO tool_calls (id, conversation_id, tool_name, parameters_json, result_json,
                                     status, execution_time_ms, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.conversation_id.0)
        .bind(&record.tool_name)
        .bind(encode_json(&record.parameters)?)
        .bind(encode_json(&record.result)?)
        .bind(record.status.as_str())
        .bind(record.execution_time_ms)
        .bind(encode_timestamp(&record.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_tool_calls(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<ToolCallRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, tool_name, parameters_json, result_json, status,
                    execution_time_ms, created_at
             FROM tool_calls WHERE conversation_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(&conversation_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_tool_call).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use rollwise_core::domain::agent::{AgentId, NewAgent};
    use rollwise_core::domain::conversation::{
        ConversationStatus, ConversationType, MessageRole, NewConversation, ToolCallRecord,
        ToolCallStatus,
    };

    use super::SqlConversationRepository;
    use crate::repositories::{
        AgentRepository, ConversationRepository, SqlAgentRepository, SqlUserRepository,
        UserRepository,
    };
    use crate::{connect_with_settings, migrations};

    async fn setup() -> (SqlConversationRepository, AgentId) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let owner = SqlUserRepository::new(pool.clone())
            .upsert_by_email("owner@example.com", "Owner", None)
            .await
            .expect("owner");
        let agent = NewAgent::with_defaults("Desk", None, None, "owner@example.com")
            .into_agent(AgentId("agent-1".into()), Utc::now());
        SqlAgentRepository::new(pool.clone()).create(&agent, &owner.id).await.expect("agent");
        (SqlConversationRepository::new(pool), agent.id)
    }

    fn sms(agent_id: &AgentId, caller: &str) -> NewConversation {
        NewConversation {
            agent_id: agent_id.clone(),
            session_name: format!("sms-{caller}"),
            conversation_type: ConversationType::Sms,
            caller_phone: Some(caller.to_string()),
            twilio_sid: None,
        }
    }

    #[tokio::test]
    async fn messages_get_consecutive_sequence_numbers() {
        let (repo, agent_id) = setup().await;
        let conversation = repo.create(sms(&agent_id, "+15550001")).await.expect("create");

        let first = repo
            .append_message(&conversation.id, MessageRole::User, "hi", "text")
            .await
            .expect("first");
        let second = repo
            .append_message(&conversation.id, MessageRole::Assistant, "hello", "text")
            .await
            .expect("second");

        assert_eq!((first.sequence_number, second.sequence_number), (1, 2));
        let stored = repo.list_messages(&conversation.id).await.expect("list");
        assert_eq!(stored.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), vec!["hi", "hello"]);
    }

    #[tokio::test]
    async fn active_caller_lookup_ignores_completed_conversations() {
        let (repo, agent_id) = setup().await;
        let conversation = repo.create(sms(&agent_id, "+15550001")).await.expect("create");

        let found = repo
            .find_active_for_caller(&agent_id, ConversationType::Sms, "+15550001")
            .await
            .expect("lookup");
        assert_eq!(found.map(|c| c.id), Some(conversation.id.clone()));

        let ended = conversation.started_at + Duration::seconds(42);
        repo.complete(&conversation.id, ConversationStatus::Completed, ended, Some(42))
            .await
            .expect("complete");

        let after = repo
            .find_active_for_caller(&agent_id, ConversationType::Sms, "+15550001")
            .await
            .expect("lookup");
        assert!(after.is_none());

        let stored = repo.find(&conversation.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, ConversationStatus::Completed);
        assert_eq!(stored.duration_seconds, Some(42));
    }

    #[tokio::test]
    async fn caller_summaries_skip_unsummarised_and_excluded_conversations() {
        let (repo, agent_id) = setup().await;
        let first = repo.create(sms(&agent_id, "+15550004")).await.expect("first");
        let second = repo.create(sms(&agent_id, "+15550004")).await.expect("second");
        let current = repo.create(sms(&agent_id, "+15550004")).await.expect("current");
        let other = repo.create(sms(&agent_id, "+15550005")).await.expect("other caller");

        repo.set_summary(&first.id, "Asked about opening hours.").await.expect("summary");
        repo.set_summary(&current.id, "In progress.").await.expect("summary");
        repo.set_summary(&other.id, "Someone else.").await.expect("summary");
        let since = Utc::now() - Duration::days(90);

        let found = repo
            .recent_summaries_for_caller(&agent_id, "+15550004", since, Some(&current.id), 3)
            .await
            .expect("lookup");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, first.id);
        assert_eq!(found[0].summary.as_deref(), Some("Asked about opening hours."));
        assert!(found.iter().all(|conversation| conversation.id != second.id));

        let later = repo
            .recent_summaries_for_caller(&agent_id, "+15550004", Utc::now() + Duration::days(1), None, 3)
            .await
            .expect("lookup");
        assert!(later.is_empty());
    }

    #[tokio::test]
    async fn voice_conversation_is_found_by_call_sid() {
        let (repo, agent_id) = setup().await;
        let created = repo
            .create(NewConversation {
                agent_id: agent_id.clone(),
                session_name: "call-CA1".into(),
                conversation_type: ConversationType::Voice,
                caller_phone: Some("+15550002".into()),
                twilio_sid: Some("CA1".into()),
            })
            .await
            .expect("create");

        let found = repo.find_by_twilio_sid(&agent_id, "CA1").await.expect("lookup");
        assert_eq!(found.map(|c| c.id), Some(created.id));
        assert!(repo.find_by_twilio_sid(&agent_id, "CA2").await.expect("lookup").is_none());
        assert_eq!(repo.list_for_agent(&agent_id, 10, 0).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn tool_calls_round_trip_json_payloads() {
        let (repo, agent_id) = setup().await;
        let conversation = repo.create(sms(&agent_id, "+15550003")).await.expect("create");
        let record = ToolCallRecord {
            id: "call-1".into(),
            conversation_id: conversation.id.clone(),
            tool_name: "check_availability".into(),
            parameters: json!({"start_date": "2025-06-02"}),
            result: json!({"available": true}),
            status: ToolCallStatus::Completed,
            execution_time_ms: 12,
            created_at: Utc::now(),
        };

        repo.record_tool_call(&record).await.expect("record");

        let stored = repo.list_tool_calls(&conversation.id).await.expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].parameters, record.parameters);
        assert_eq!(stored[0].status, ToolCallStatus::Completed);
    }
}
