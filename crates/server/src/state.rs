use std::sync::Arc;

use rollwise_agent::{
    standard_tools, AgentRuntime, BookingService, CalendarClient, CallerContextBuilder,
    ConversationSummarizer, ConversationToolCallSink, GuardrailPolicy, LlmClient, RuntimeError,
};
use rollwise_core::auth::TokenIssuer;
use rollwise_core::config::{AppConfig, TelephonyConfig};
use rollwise_db::repositories::{
    AgentRepository, BookingRepository, ConversationRepository, OrderRepository, SqlAgentRepository,
    SqlBookingRepository, SqlConversationRepository, SqlOrderRepository, SqlStatisticsRepository,
    SqlUserRepository, StatisticsRepository, UserRepository,
};
use rollwise_db::DbPool;

/// Everything the HTTP handlers share.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
    pub agents: Arc<dyn AgentRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub statistics: Arc<dyn StatisticsRepository>,
    pub booking: Arc<BookingService>,
    pub runtime: Arc<AgentRuntime>,
    pub summarizer: Arc<ConversationSummarizer>,
    pub tokens: TokenIssuer,
    pub telephony: Arc<TelephonyConfig>,
}

impl AppState {
    /// Wires the SQL repositories, booking rules and chat runtime around the
    /// given vendor clients.
    pub fn assemble(
        db_pool: DbPool,
        llm: Arc<dyn LlmClient>,
        calendar: Arc<dyn CalendarClient>,
        config: &AppConfig,
    ) -> Result<Self, RuntimeError> {
        let users: Arc<dyn UserRepository> = Arc::new(SqlUserRepository::new(db_pool.clone()));
        let agents: Arc<dyn AgentRepository> = Arc::new(SqlAgentRepository::new(db_pool.clone()));
        let conversations: Arc<dyn ConversationRepository> =
            Arc::new(SqlConversationRepository::new(db_pool.clone()));
        let orders: Arc<dyn OrderRepository> = Arc::new(SqlOrderRepository::new(db_pool.clone()));
        let statistics: Arc<dyn StatisticsRepository> =
            Arc::new(SqlStatisticsRepository::new(db_pool.clone()));

        let bookings: Arc<dyn BookingRepository> = Arc::new(SqlBookingRepository::new(db_pool));

        let booking = Arc::new(BookingService::new(agents.clone(), bookings.clone(), calendar));
        let tools = Arc::new(standard_tools(booking.clone(), agents.clone(), orders.clone()));
        let caller_context =
            CallerContextBuilder::new(conversations.clone(), orders.clone(), bookings);
        let runtime = AgentRuntime::new(
            llm.clone(),
            tools,
            GuardrailPolicy::default(),
            config.llm.max_tool_rounds,
        )?
        .with_sink(Arc::new(ConversationToolCallSink::new(conversations.clone())))
        .with_caller_context(Arc::new(caller_context));

        Ok(Self {
            users,
            agents,
            conversations,
            orders,
            statistics,
            booking,
            runtime: Arc::new(runtime),
            summarizer: Arc::new(ConversationSummarizer::new(llm)),
            tokens: TokenIssuer::from_config(&config.auth),
            telephony: Arc::new(config.telephony.clone()),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use chrono::Utc;
    use rollwise_agent::{ChatCompletion, InMemoryCalendar, ScriptedLlmClient};
    use rollwise_core::config::AppConfig;
    use rollwise_core::domain::agent::{Agent, AgentId, NewAgent};
    use rollwise_core::domain::new_id;
    use rollwise_core::domain::user::User;
    use rollwise_db::{connect_with_settings, migrations, DbPool};

    use super::AppState;
    use crate::auth::CurrentUser;

    pub const TEST_SECRET: &str = "test-secret-0123456789";

    pub struct Harness {
        pub pool: DbPool,
        pub state: AppState,
        pub llm: Arc<ScriptedLlmClient>,
        pub calendar: Arc<InMemoryCalendar>,
    }

    pub fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = TEST_SECRET.to_string().into();
        config
    }

    pub async fn harness(replies: Vec<ChatCompletion>) -> Harness {
        harness_with(config(), replies).await
    }

    pub async fn harness_with(config: AppConfig, replies: Vec<ChatCompletion>) -> Harness {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let llm = Arc::new(ScriptedLlmClient::new(replies));
        let calendar = Arc::new(InMemoryCalendar::new());
        let state = AppState::assemble(pool.clone(), llm.clone(), calendar.clone(), &config)
            .expect("state");
        Harness { pool, state, llm, calendar }
    }

    impl Harness {
        pub async fn user(&self, email: &str) -> CurrentUser {
            let name = email.split('@').next().unwrap_or_default();
            CurrentUser(self.state.users.upsert_by_email(email, name, None).await.expect("user"))
        }

        /// Active agent owned by `owner`, answering `+15550100`, with a calendar.
        pub async fn agent(&self, owner: &User) -> Agent {
            let mut new_agent = NewAgent::with_defaults("Front Desk", None, None, &owner.email);
            new_agent.timezone = "UTC".into();
            new_agent.phone_number = Some("+15550100".into());
            let mut agent = new_agent.into_agent(AgentId(new_id()), Utc::now());
            agent.calendar_id = Some("front-desk@calendar.local".into());
            self.state.agents.create(&agent, &owner.id).await.expect("create agent");
            agent
        }
    }
}
