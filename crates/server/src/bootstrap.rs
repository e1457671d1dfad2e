use std::sync::Arc;

use rollwise_agent::{
    CalendarClient, CalendarError, GoogleCalendarClient, InMemoryCalendar, LlmClient, LlmError,
    OpenAiCompatibleClient, RuntimeError,
};
use rollwise_core::config::{AppConfig, CalendarProvider, ConfigError, LoadOptions};
use rollwise_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::{info, warn};

use crate::state::AppState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client setup failed: {0}")]
    Llm(#[source] LlmError),
    #[error("calendar client setup failed: {0}")]
    Calendar(#[source] CalendarError),
    #[error("agent runtime setup failed: {0}")]
    Runtime(#[source] RuntimeError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let llm: Arc<dyn LlmClient> =
        Arc::new(OpenAiCompatibleClient::from_config(&config.llm).map_err(BootstrapError::Llm)?);
    let calendar: Arc<dyn CalendarClient> = match config.calendar.provider {
        CalendarProvider::Google => Arc::new(
            GoogleCalendarClient::from_config(&config.calendar).map_err(BootstrapError::Calendar)?,
        ),
        CalendarProvider::Disabled => {
            warn!(
                event_name = "system.bootstrap.calendar_disabled",
                correlation_id = "bootstrap",
                "calendar provider disabled, bookings stay in process memory"
            );
            Arc::new(InMemoryCalendar::new())
        }
    };

    let state = AppState::assemble(db_pool.clone(), llm, calendar, &config)
        .map_err(BootstrapError::Runtime)?;

    Ok(Application { config, db_pool, state })
}
