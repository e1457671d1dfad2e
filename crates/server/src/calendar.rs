//! Calendar endpoints for dashboard users. Writes go through the same
//! `BookingService` path as the voice agent's tools.
//!
//! Routes (under `/api/v1/agents/{id}/calendar`):
//! - `GET    /slots?start_date&end_date&duration` - open slots
//! - `GET    /events?start_date&end_date&query`   - booked events
//! - `POST   /events`                             - book an event (owner/editor)
//! - `DELETE /events/{event_id}`                  - cancel an event (owner/editor)

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use rollwise_agent::calendar_tools::parse_date;
use rollwise_agent::{CalendarEvent, CreateEventRequest};
use rollwise_core::calendar::slots::Slot;
use serde::{Deserialize, Serialize};

use crate::access::agent_access;
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub duration: Option<u32>,
    pub query: Option<String>,
}

impl RangeQuery {
    /// Start defaults to `today`, end to the start date.
    fn dates(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), ApiError> {
        let start = match self.start_date.as_deref() {
            Some(raw) => parse_date("start_date", raw)?,
            None => today,
        };
        let end = match self.end_date.as_deref() {
            Some(raw) => parse_date("end_date", raw)?,
            None => start,
        };
        if start > end {
            return Err(ApiError::bad_request("start_date must not be after end_date"));
        }
        Ok((start, end))
    }
}

#[derive(Debug, Serialize)]
pub struct SlotsResponse {
    pub agent_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub slots: Vec<Slot>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEventBody {
    pub summary: String,
    pub start: String,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub client_phone: Option<String>,
    #[serde(default)]
    pub attendees: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelledResponse {
    pub message: String,
    pub event_id: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/agents/{id}/calendar/slots", get(list_slots))
        .route("/api/v1/agents/{id}/calendar/events", get(list_events).post(create_event))
        .route("/api/v1/agents/{id}/calendar/events/{event_id}", delete(cancel_event))
}

pub async fn list_slots(
    Path(agent_id): Path<String>,
    Query(range): Query<RangeQuery>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<SlotsResponse>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    let now = Utc::now();
    let (start_date, end_date) = range.dates(now.with_timezone(&access.agent.tz()).date_naive())?;

    let slots = state
        .booking
        .available_slots(&access.agent.id, start_date, end_date, range.duration, now)
        .await?;
    Ok(Json(SlotsResponse { agent_id, start_date, end_date, slots }))
}

pub async fn list_events(
    Path(agent_id): Path<String>,
    Query(range): Query<RangeQuery>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<CalendarEvent>>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    let today = Utc::now().with_timezone(&access.agent.tz()).date_naive();
    let (start_date, end_date) = range.dates(today)?;

    let query = range.query.filter(|query| !query.trim().is_empty());
    let events = state.booking.search_events(&access.agent.id, start_date, end_date, query).await?;
    Ok(Json(events))
}

pub async fn create_event(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateEventBody>,
) -> Result<Json<CalendarEvent>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    access.require_editor()?;

    let request = CreateEventRequest {
        summary: body.summary,
        start: body.start,
        duration_minutes: body.duration_minutes,
        client_name: body.client_name,
        client_phone: body.client_phone,
        attendees: body.attendees,
        description: body.description,
        location: body.location,
    };
    let event = state.booking.create_event(&access.agent.id, request, Utc::now()).await?;
    Ok(Json(event))
}

pub async fn cancel_event(
    Path((agent_id, event_id)): Path<(String, String)>,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<CancelledResponse>, ApiError> {
    let access = agent_access(&state, &agent_id, &user).await?;
    access.require_editor()?;

    state.booking.cancel_event(&access.agent.id, &event_id).await?;
    Ok(Json(CancelledResponse { message: "Event cancelled successfully".to_string(), event_id }))
}

#[cfg(test)]
mod tests {
    use axum::{
        extract::{Path, Query, State},
        http::StatusCode,
        Json,
    };
    use rollwise_core::domain::agent::{AgentPatch, AgentRole};

    use super::*;
    use crate::state::testing::harness;

    fn booking(start: &str, attendees: &[&str]) -> CreateEventBody {
        CreateEventBody {
            summary: "Haircut".into(),
            start: start.into(),
            duration_minutes: None,
            client_name: Some("Sam".into()),
            client_phone: Some("+15550123".into()),
            attendees: attendees.iter().map(|email| email.to_string()).collect(),
            description: None,
            location: None,
        }
    }

    fn range(start: &str, end: &str) -> RangeQuery {
        RangeQuery {
            start_date: Some(start.into()),
            end_date: Some(end.into()),
            ..RangeQuery::default()
        }
    }

    #[tokio::test]
    async fn booking_merges_invitees_and_fills_the_slot() {
        let harness = harness(Vec::new()).await;
        let owner = harness.user("owner@example.com").await;
        let agent = harness.agent(&owner.0).await;

        let Json(event) = create_event(
            Path(agent.id.0.clone()),
            State(harness.state.clone()),
            owner.clone(),
            Json(booking("2030-01-07T09:00:00Z", &["client@example.com", "owner@example.com"])),
        )
        .await
        .expect("book");
        assert_eq!(event.attendees, vec!["owner@example.com", "client@example.com"]);

        let error = create_event(
            Path(agent.id.0.clone()),
            State(harness.state.clone()),
            owner.clone(),
            Json(booking("2030-01-07T09:00:00Z", &[])),
        )
        .await
        .expect_err("slot is full");
        assert_eq!(error.status, StatusCode::CONFLICT);
        let alternatives = error.body.details.expect("details")["suggested_alternatives"].clone();
        assert!(!alternatives.as_array().expect("array").is_empty());

        let Json(slots) = list_slots(
            Path(agent.id.0.clone()),
            Query(range("2030-01-07", "2030-01-07")),
            State(harness.state.clone()),
            owner.clone(),
        )
        .await
        .expect("slots");
        assert!(slots.slots.iter().all(|slot| slot.start.to_rfc3339() != "2030-01-07T09:00:00+00:00"));
        assert!(!slots.slots.is_empty());

        let Json(events) = list_events(
            Path(agent.id.0.clone()),
            Query(range("2030-01-07", "2030-01-07")),
            State(harness.state.clone()),
            owner,
        )
        .await
        .expect("events");
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn booking_gate_blocks_create_and_cancel() {
        let harness = harness(Vec::new()).await;
        let owner = harness.user("owner@example.com").await;
        let agent = harness.agent(&owner.0).await;

        let Json(event) = create_event(
            Path(agent.id.0.clone()),
            State(harness.state.clone()),
            owner.clone(),
            Json(booking("2030-01-07T09:00:00Z", &[])),
        )
        .await
        .expect("book");

        let mut disabled = agent.clone();
        AgentPatch { booking_enabled: Some(false), ..AgentPatch::default() }
            .apply_to(&mut disabled, Utc::now());
        harness.state.agents.update(&disabled).await.expect("disable booking");

        let error = create_event(
            Path(agent.id.0.clone()),
            State(harness.state.clone()),
            owner.clone(),
            Json(booking("2030-01-08T09:00:00Z", &[])),
        )
        .await
        .expect_err("gated create");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.message(), "Calendar booking is disabled for this agent");

        let error = cancel_event(
            Path((agent.id.0.clone(), event.id.clone())),
            State(harness.state.clone()),
            owner,
        )
        .await
        .expect_err("gated cancel");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(harness.calendar.events("front-desk@calendar.local").await.len(), 1);
    }

    #[tokio::test]
    async fn viewers_read_but_do_not_book() {
        let harness = harness(Vec::new()).await;
        let owner = harness.user("owner@example.com").await;
        let viewer = harness.user("viewer@example.com").await;
        let agent = harness.agent(&owner.0).await;
        harness
            .state
            .agents
            .add_member(&agent.id, &viewer.0.id, AgentRole::Viewer)
            .await
            .expect("viewer");

        let error = create_event(
            Path(agent.id.0.clone()),
            State(harness.state.clone()),
            viewer.clone(),
            Json(booking("2030-01-07T09:00:00Z", &[])),
        )
        .await
        .expect_err("viewer write");
        assert_eq!(error.status, StatusCode::FORBIDDEN);

        let error = list_slots(
            Path(agent.id.0.clone()),
            Query(range("2030-01-08", "2030-01-07")),
            State(harness.state.clone()),
            viewer,
        )
        .await
        .expect_err("inverted range");
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
    }
}
