//! Period-over-period statistics for an agent.
//!
//! Routes:
//! - `GET /api/v1/agents/{id}/statistics?start_date&end_date` - dates are `YYYY-MM-DD`, UTC days

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use rollwise_core::statistics::{AgentStatistics, StatsWindow};
use serde::Deserialize;

use crate::access::agent_access;
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StatisticsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

fn parse_day(field: &str, raw: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(None),
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("{field} must be a date in YYYY-MM-DD format"))),
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/agents/{id}/statistics", get(agent_statistics))
}

pub async fn agent_statistics(
    Path(agent_id): Path<String>,
    Query(query): Query<StatisticsQuery>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<AgentStatistics>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    let start = parse_day("start_date", query.start_date.as_deref())?;
    let end = parse_day("end_date", query.end_date.as_deref())?;
    let window = StatsWindow::resolve(start, end, Utc::now().date_naive())?;

    let current = state
        .statistics
        .period_stats(&access.agent.id, window.current_start, window.current_end)
        .await?;
    let previous = state
        .statistics
        .period_stats(&access.agent.id, window.previous_start, window.previous_end)
        .await?;

    Ok(Json(AgentStatistics::build(access.agent.id.0.clone(), window, current, previous)))
}

#[cfg(test)]
mod tests {
    use axum::{
        extract::{Path, Query, State},
        http::StatusCode,
        Json,
    };
    use chrono::Utc;
    use rollwise_core::domain::conversation::{ConversationStatus, ConversationType, NewConversation};

    use super::{agent_statistics, StatisticsQuery};
    use crate::state::testing::harness;

    #[tokio::test]
    async fn todays_calls_are_counted_against_yesterday() {
        let harness = harness(Vec::new()).await;
        let owner = harness.user("owner@example.com").await;
        let agent = harness.agent(&owner.0).await;

        for (kind, sid) in [(ConversationType::Voice, Some("CA1")), (ConversationType::Sms, None)] {
            let conversation = harness
                .state
                .conversations
                .create(NewConversation {
                    agent_id: agent.id.clone(),
                    session_name: "Caller".into(),
                    conversation_type: kind,
                    caller_phone: Some("+15550123".into()),
                    twilio_sid: sid.map(str::to_string),
                })
                .await
                .expect("conversation");
            if kind == ConversationType::Voice {
                harness
                    .state
                    .conversations
                    .complete(&conversation.id, ConversationStatus::Completed, Utc::now(), Some(90))
                    .await
                    .expect("complete");
            }
        }

        let Json(stats) = agent_statistics(
            Path(agent.id.0.clone()),
            Query(StatisticsQuery::default()),
            State(harness.state.clone()),
            owner,
        )
        .await
        .expect("statistics");

        assert_eq!(stats.date_range.period_days, 1);
        assert_eq!(stats.conversations.all.current, 2);
        assert_eq!(stats.conversations.voice.current, 1);
        assert_eq!(stats.conversations.messages.current, 1);
        assert_eq!(stats.conversations.all.change_percent, None);
        assert_eq!(stats.duration_minutes.voice.current, 1.5);
        assert_eq!(stats.callers.unique_callers.current, 1);
    }

    #[tokio::test]
    async fn malformed_and_inverted_ranges_are_rejected() {
        let harness = harness(Vec::new()).await;
        let owner = harness.user("owner@example.com").await;
        let agent = harness.agent(&owner.0).await;

        let error = agent_statistics(
            Path(agent.id.0.clone()),
            Query(StatisticsQuery { start_date: Some("03/10/2025".into()), end_date: None }),
            State(harness.state.clone()),
            owner.clone(),
        )
        .await
        .expect_err("bad date");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);

        let error = agent_statistics(
            Path(agent.id.0.clone()),
            Query(StatisticsQuery {
                start_date: Some("2025-03-12".into()),
                end_date: Some("2025-03-10".into()),
            }),
            State(harness.state.clone()),
            owner,
        )
        .await
        .expect_err("inverted");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
    }
}
