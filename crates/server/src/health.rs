//! Readiness probe. `/health` is ready once the database answers and every
//! migration bundled with this build has been applied.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use rollwise_db::{migrations, DbPool};
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Probe {
    pub status: Readiness,
    pub detail: String,
}

impl Probe {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: Readiness::Ready, detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: Readiness::Degraded, detail: detail.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: Readiness,
    pub version: &'static str,
    pub database: Probe,
    pub schema: Probe,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

/// Serves `/health` alone on the probe port, next to the API listener.
pub async fn spawn(bind_address: &str, port: u16, db_pool: DbPool) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(
        event_name = "system.health.listening",
        correlation_id = "bootstrap",
        bind_address = %address,
        "readiness probe listening"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool)).await {
            error!(
                event_name = "system.health.stopped",
                correlation_id = "bootstrap",
                error = %error,
                "readiness probe stopped"
            );
        }
    });
    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let database = probe_database(&state.db_pool).await;
    let schema = match database.status {
        Readiness::Ready => probe_schema(&state.db_pool).await,
        Readiness::Degraded => Probe::degraded("skipped, database unreachable"),
    };

    let status = if schema.status == Readiness::Ready { Readiness::Ready } else { Readiness::Degraded };
    let code = match status {
        Readiness::Ready => StatusCode::OK,
        Readiness::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    let report = HealthReport {
        status,
        version: env!("CARGO_PKG_VERSION"),
        database,
        schema,
        checked_at: Utc::now().to_rfc3339(),
    };
    (code, Json(report))
}

async fn probe_database(pool: &DbPool) -> Probe {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => Probe::ready("select 1 answered"),
        Err(error) => Probe::degraded(format!("query failed: {error}")),
    }
}

async fn probe_schema(pool: &DbPool) -> Probe {
    match migrations::pending_count(pool).await {
        Ok(0) => Probe::ready("all migrations applied"),
        Ok(pending) => Probe::degraded(format!("{pending} migration(s) pending")),
        Err(error) => Probe::degraded(format!("migration state unreadable: {error}")),
    }
}
