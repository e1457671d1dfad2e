use chrono::{DateTime, Utc};

use rollwise_core::domain::agent::AgentId;
use rollwise_core::statistics::PeriodStats;

use super::{column, encode_timestamp, RepositoryError, StatisticsRepository};
use crate::DbPool;

pub struct SqlStatisticsRepository {
    pool: DbPool,
}

impl SqlStatisticsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl StatisticsRepository for SqlStatisticsRepository {
    async fn period_stats(
        &self,
        agent_id: &AgentId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PeriodStats, RepositoryError> {
        let start = encode_timestamp(&start);
        let end = encode_timestamp(&end);

        let totals = sqlx::query(
            "SELECT COUNT(1) AS total,
                    COALESCE(SUM(CASE WHEN conversation_type = 'voice' THEN 1 ELSE 0 END), 0) AS voice,
                    COALESCE(SUM(CASE WHEN conversation_type IN ('sms', 'message') THEN 1 ELSE 0 END), 0)
                        AS messages,
                    COALESCE(SUM(CASE WHEN conversation_type = 'voice'
                                      THEN COALESCE(duration_seconds, 0) ELSE 0 END), 0)
                        AS voice_seconds
             FROM conversations
             WHERE agent_id = ? AND active = 1 AND created_at >= ? AND created_at <= ?",
        )
        .bind(&agent_id.0)
        .bind(&start)
        .bind(&end)
        .fetch_one(&self.pool)
        .await?;

        let callers = sqlx::query(
            "SELECT COUNT(DISTINCT conv.caller_phone) AS unique_callers,
                    COUNT(DISTINCT CASE WHEN EXISTS (
                        SELECT 1 FROM conversations prior
                        WHERE prior.agent_id = conv.agent_id
                          AND prior.caller_phone = conv.caller_phone
                          AND prior.active = 1
                          AND prior.created_at < ?
                    ) THEN conv.caller_phone END) AS returning_callers
             FROM conversations conv
             WHERE conv.agent_id = ? AND conv.active = 1
               AND conv.caller_phone IS NOT NULL AND conv.caller_phone <> ''
               AND conv.created_at >= ? AND conv.created_at <= ?",
        )
        .bind(&start)
        .bind(&agent_id.0)
        .bind(&start)
        .bind(&end)
        .fetch_one(&self.pool)
        .await?;

        let unique_callers: i64 = column(&callers, "unique_callers")?;
        let returning_callers: i64 = column(&callers, "returning_callers")?;

        Ok(PeriodStats {
            total_conversations: column(&totals, "total")?,
            voice_conversations: column(&totals, "voice")?,
            message_conversations: column(&totals, "messages")?,
            voice_seconds: column(&totals, "voice_seconds")?,
            unique_callers,
            returning_callers,
            new_callers: unique_callers - returning_callers,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use rollwise_core::domain::agent::{AgentId, NewAgent};

    use super::SqlStatisticsRepository;
    use crate::repositories::{
        encode_timestamp, AgentRepository, SqlAgentRepository, SqlUserRepository,
        StatisticsRepository, UserRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> (DbPool, AgentId) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let owner = SqlUserRepository::new(pool.clone())
            .upsert_by_email("owner@example.com", "Owner", None)
            .await
            .expect("owner");
        let agent = NewAgent::with_defaults("Desk", None, None, "owner@example.com")
            .into_agent(AgentId("agent-1".into()), Utc::now());
        SqlAgentRepository::new(pool.clone()).create(&agent, &owner.id).await.expect("agent");
        (pool, agent.id)
    }

    async fn insert(
        pool: &DbPool,
        id: &str,
        kind: &str,
        caller: &str,
        at: DateTime<Utc>,
        duration: Option<i64>,
    ) {
        sqlx::query(
            "INSERT INTO conversations (id, agent_id, session_name, conversation_type, caller_phone,
                                        status, started_at, duration_seconds, active, created_at)
             VALUES (?, 'agent-1', ?, ?, ?, 'completed', ?, ?, 1, ?)",
        )
        .bind(id)
        .bind(format!("session-{id}"))
        .bind(kind)
        .bind(caller)
        .bind(encode_timestamp(&at))
        .bind(duration)
        .bind(encode_timestamp(&at))
        .execute(pool)
        .await
        .expect("insert conversation");
    }

    #[tokio::test]
    async fn counts_types_minutes_and_returning_callers() {
        let (pool, agent_id) = setup().await;
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().expect("start");
        let end = start + Duration::days(7) - Duration::seconds(1);

        insert(&pool, "old", "voice", "+1001", start - Duration::days(3), Some(60)).await;
        insert(&pool, "c1", "voice", "+1001", start + Duration::hours(2), Some(90)).await;
        insert(&pool, "c2", "voice", "+1002", start + Duration::days(1), Some(30)).await;
        insert(&pool, "c3", "sms", "+1002", start + Duration::days(2), None).await;
        insert(&pool, "c4", "message", "+1003", start + Duration::days(3), None).await;
        insert(&pool, "late", "voice", "+1004", end + Duration::seconds(5), Some(600)).await;

        let stats = SqlStatisticsRepository::new(pool)
            .period_stats(&agent_id, start, end)
            .await
            .expect("stats");

        assert_eq!(stats.total_conversations, 4);
        assert_eq!(stats.voice_conversations, 2);
        assert_eq!(stats.message_conversations, 2);
        assert_eq!(stats.voice_seconds, 120);
        assert_eq!(stats.unique_callers, 3);
        assert_eq!(stats.returning_callers, 1);
        assert_eq!(stats.new_callers, 2);
    }

    #[tokio::test]
    async fn empty_period_is_all_zero() {
        let (pool, agent_id) = setup().await;
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().expect("start");

        let stats = SqlStatisticsRepository::new(pool)
            .period_stats(&agent_id, start, start + Duration::days(1))
            .await
            .expect("stats");

        assert_eq!(stats.total_conversations, 0);
        assert_eq!(stats.voice_seconds, 0);
        assert_eq!(stats.unique_callers, 0);
    }
}
