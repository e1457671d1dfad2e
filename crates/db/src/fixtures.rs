use crate::connection::DbPool;
use crate::repositories::RepositoryError;
use sqlx::Executor;

const DEMO_USER_ID: &str = "user-demo-owner";
const DEMO_AGENT_ID: &str = "agent-demo-pizzeria";
const DEMO_PHONE_NUMBER: &str = "+15550001000";
const DEMO_MENU_ITEM_IDS: &[&str] =
    &["menu-demo-margherita", "menu-demo-pepperoni", "menu-demo-soda"];
const DEMO_CONVERSATION_ID: &str = "conv-demo-001";
const DEMO_MESSAGE_COUNT: i64 = 3;

/// Demo tenant used by local development and the CLI `seed` command.
///
/// Provides one owner, one pizzeria agent reachable on a phone number, a
/// three item menu and one completed voice call.
pub struct DemoDataset;

impl DemoDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed.sql");

    /// Loads the dataset. Rows that already exist are left untouched.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            user_id: DEMO_USER_ID,
            agent_id: DEMO_AGENT_ID,
            phone_number: DEMO_PHONE_NUMBER,
            menu_items: DEMO_MENU_ITEM_IDS.len(),
            conversations: 1,
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let owner: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM agent_users
                           WHERE agent_id = ?1 AND user_id = ?2 AND role = 'owner')",
        )
        .bind(DEMO_AGENT_ID)
        .bind(DEMO_USER_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("demo-owner-membership", owner == 1));

        let routed: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM agents WHERE id = ?1 AND phone_number = ?2 AND active = 1)",
        )
        .bind(DEMO_AGENT_ID)
        .bind(DEMO_PHONE_NUMBER)
        .fetch_one(pool)
        .await?;
        checks.push(("demo-agent-phone-number", routed == 1));

        let booking: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM agents
                           WHERE id = ?1 AND booking_enabled = 1 AND max_slot_appointments = 2)",
        )
        .bind(DEMO_AGENT_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("demo-agent-booking-settings", booking == 1));

        let quoted_menu = sql_array_from_ids(DEMO_MENU_ITEM_IDS);
        let menu_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM menu_items WHERE id IN {quoted_menu} AND agent_id = ?1 AND active = 1"
        ))
        .bind(DEMO_AGENT_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("demo-menu-items", menu_count == DEMO_MENU_ITEM_IDS.len() as i64));

        let message_count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM messages WHERE conversation_id = ?1")
                .bind(DEMO_CONVERSATION_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("demo-conversation-messages", message_count == DEMO_MESSAGE_COUNT));

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the dataset. Cascades take the memberships, menu and history with the agent.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM agents WHERE id = ?1").bind(DEMO_AGENT_ID).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM users WHERE id = ?1").bind(DEMO_USER_ID).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub user_id: &'static str,
    pub agent_id: &'static str,
    pub phone_number: &'static str,
    pub menu_items: usize,
    pub conversations: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{AgentRepository, SqlAgentRepository};
    use crate::{connect_with_settings, migrations};
    use rollwise_core::domain::agent::AgentId;

    #[test]
    fn sql_fixture_is_valid() {
        assert!(!DemoDataset::SQL.is_empty());
        assert!(DemoDataset::SQL.contains(DEMO_AGENT_ID));
    }

    #[tokio::test]
    async fn load_is_idempotent_and_verifiable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");

        let first = DemoDataset::load(&pool).await.expect("load demo data");
        let first_verification = DemoDataset::verify(&pool).await.expect("verify demo data");
        assert!(first_verification.all_present, "{:?}", first_verification.checks);
        assert_eq!(first.menu_items, 3);

        DemoDataset::load(&pool).await.expect("reload demo data");
        let second_verification = DemoDataset::verify(&pool).await.expect("re-verify demo data");
        assert_eq!(first_verification.checks, second_verification.checks);
    }

    #[tokio::test]
    async fn seeded_agent_decodes_through_repository() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");
        DemoDataset::load(&pool).await.expect("load demo data");

        let agent = SqlAgentRepository::new(pool.clone())
            .find_active(&AgentId(DEMO_AGENT_ID.into()))
            .await
            .expect("lookup")
            .expect("demo agent exists");
        assert_eq!(agent.business_name.as_deref(), Some("Luigi's Pizzeria"));
        assert!(!agent.business_hours.sunday.enabled);
        assert_eq!(agent.invitees.len(), 1);

        DemoDataset::clean(&pool).await.expect("clean demo data");
        assert!(!DemoDataset::verify(&pool).await.expect("verify").all_present);
    }
}
