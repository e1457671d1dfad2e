//! Booking operations on an agent's calendar and the tools exposing them to
//! the model.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use rollwise_core::calendar::{
    available_slots, duration_between, ensure_booking_enabled, ensure_calendar_configured,
    is_slot_available, local_day_bounds, merge_invitees, parse_event_time, Slot, SlotRules,
    ALTERNATIVE_SEARCH_DAYS, MAX_ALTERNATIVE_SLOTS, MAX_LISTED_SLOTS,
};
use rollwise_core::domain::agent::{Agent, AgentId};
use rollwise_core::domain::booking::{BookedInterval, BookingRecord, BookingStatus};
use rollwise_core::domain::new_id;
use rollwise_core::errors::DomainError;
use rollwise_db::repositories::{AgentRepository, BookingRepository, RepositoryError};

use crate::calendar::{CalendarClient, CalendarError, CalendarEvent, EventPatch, EventQuery, NewCalendarEvent};
use crate::tools::{failure, optional_str, required_str, Tool, ToolContext, ToolDefinition};

#[derive(Debug, Error)]
pub enum BookingError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("Requested time slot is not available")]
    SlotUnavailable { alternatives: Vec<Slot> },
    #[error(transparent)]
    Calendar(#[from] CalendarError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateEventRequest {
    pub summary: String,
    /// RFC 3339, or a naive local time in the agent timezone.
    pub start: String,
    pub duration_minutes: Option<u32>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub attendees: Vec<String>,
    pub description: Option<String>,
    pub location: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateEventRequest {
    pub summary: Option<String>,
    pub start: Option<String>,
    pub duration_minutes: Option<u32>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub attendees: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventListing {
    pub events: Vec<CalendarEvent>,
    pub available_slots: Vec<Slot>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Booking rules applied against the calendar vendor and the local bookings
/// mirror. Slot capacity is counted from the mirror.
pub struct BookingService {
    agents: Arc<dyn AgentRepository>,
    bookings: Arc<dyn BookingRepository>,
    calendar: Arc<dyn CalendarClient>,
}

impl BookingService {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        bookings: Arc<dyn BookingRepository>,
        calendar: Arc<dyn CalendarClient>,
    ) -> Self {
        Self { agents, bookings, calendar }
    }

    async fn agent(&self, agent_id: &AgentId) -> Result<Agent, BookingError> {
        self.agents.find_active(agent_id).await?.ok_or(BookingError::Domain(DomainError::AgentNotFound))
    }

    async fn booked(
        &self,
        agent_id: &AgentId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BookedInterval>, BookingError> {
        Ok(self.bookings.booked_intervals(agent_id, start, end).await?)
    }

    /// Creates the agent's calendar and shares it with `owner_email`.
    pub async fn provision_calendar(
        &self,
        agent: &Agent,
        owner_email: &str,
    ) -> Result<String, BookingError> {
        let calendar_id = self.calendar.create_calendar(&agent.name, &agent.timezone).await?;
        self.calendar.add_owner(&calendar_id, owner_email).await?;
        self.agents.set_calendar_id(&agent.id, &calendar_id).await?;
        info!(
            event_name = "calendar.provisioned",
            agent_id = %agent.id.0,
            calendar_id = %calendar_id,
            "agent calendar created"
        );
        Ok(calendar_id)
    }

    pub async fn available_slots(
        &self,
        agent_id: &AgentId,
        start_date: NaiveDate,
        end_date: NaiveDate,
        duration_minutes: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, BookingError> {
        let agent = self.agent(agent_id).await?;
        let (start, end) = local_day_bounds(agent.tz(), start_date, end_date)?;
        let booked = self.booked(agent_id, start, end).await?;
        Ok(available_slots(&SlotRules::from_agent(&agent), start, end, duration_minutes, &booked, now))
    }

    /// Up to five open slots from the requested local day through the
    /// following week.
    async fn alternatives(
        &self,
        agent: &Agent,
        start: DateTime<Utc>,
        duration_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, BookingError> {
        let day = start.with_timezone(&agent.tz()).date_naive();
        let (window_start, _) = local_day_bounds(agent.tz(), day, day)?;
        let window_end = start + Duration::days(ALTERNATIVE_SEARCH_DAYS);
        let booked = self.booked(&agent.id, window_start, window_end).await?;
        let mut slots = available_slots(
            &SlotRules::from_agent(agent),
            window_start,
            window_end,
            Some(duration_minutes),
            &booked,
            now,
        );
        slots.truncate(MAX_ALTERNATIVE_SLOTS);
        Ok(slots)
    }

    async fn ensure_slot_open(
        &self,
        agent: &Agent,
        start: DateTime<Utc>,
        duration_minutes: u32,
        ignore: Option<BookedInterval>,
        now: DateTime<Utc>,
    ) -> Result<(), BookingError> {
        let length = Duration::minutes(i64::from(duration_minutes));
        let window_start = start - length;
        let window_end = start + length;
        let mut booked = self.booked(&agent.id, window_start, window_end).await?;
        if let Some(own) = ignore {
            if let Some(position) = booked.iter().position(|interval| *interval == own) {
                booked.remove(position);
            }
        }

        let slots = available_slots(
            &SlotRules::from_agent(agent),
            window_start,
            window_end,
            Some(duration_minutes),
            &booked,
            now,
        );
        if is_slot_available(&slots, start) {
            Ok(())
        } else {
            let alternatives = self.alternatives(agent, start, duration_minutes, now).await?;
            Err(BookingError::SlotUnavailable { alternatives })
        }
    }

    async fn mirror(&self, record: BookingRecord) {
        if let Err(error) = self.bookings.record(&record).await {
            error!(
                event_name = "calendar.booking_mirror_failed",
                agent_id = %record.agent_id.0,
                event_id = %record.external_event_id,
                error = %error,
                "booking was not mirrored locally"
            );
        }
    }

    pub async fn create_event(
        &self,
        agent_id: &AgentId,
        request: CreateEventRequest,
        now: DateTime<Utc>,
    ) -> Result<CalendarEvent, BookingError> {
        let agent = self.agent(agent_id).await?;
        let calendar_id = ensure_calendar_configured(&agent)?.to_string();
        ensure_booking_enabled(&agent)?;

        let summary = request.summary.trim();
        if summary.is_empty() {
            return Err(DomainError::invalid("summary", "must not be blank").into());
        }
        let duration_minutes = request
            .duration_minutes
            .filter(|minutes| *minutes > 0)
            .unwrap_or(agent.default_slot_duration);
        let start = parse_event_time(&request.start, agent.tz())?;
        let end = start + Duration::minutes(i64::from(duration_minutes));

        self.ensure_slot_open(&agent, start, duration_minutes, None, now).await?;

        let event = NewCalendarEvent {
            summary: summary.to_string(),
            description: request.description,
            location: request.location,
            start,
            end,
            timezone: agent.tz(),
            attendees: merge_invitees(&agent.invitees, &request.attendees),
            client_name: request.client_name,
            client_phone: request.client_phone.clone(),
        };
        let created = self.calendar.insert_event(&calendar_id, &event).await?;

        self.mirror(BookingRecord {
            id: new_id(),
            agent_id: agent.id.clone(),
            external_event_id: created.id.clone(),
            summary: created.summary.clone(),
            start_time: start,
            end_time: end,
            phone_number: request.client_phone,
            status: BookingStatus::Confirmed,
        })
        .await;

        info!(
            event_name = "calendar.event_created",
            agent_id = %agent.id.0,
            event_id = %created.id,
            attendees = created.attendees.len(),
            "calendar event created"
        );
        Ok(created)
    }

    pub async fn cancel_event(&self, agent_id: &AgentId, event_id: &str) -> Result<(), BookingError> {
        let agent = self.agent(agent_id).await?;
        let calendar_id = ensure_calendar_configured(&agent)?;
        ensure_booking_enabled(&agent)?;

        self.calendar.cancel_event(calendar_id, event_id).await?;
        if let Err(error) = self.bookings.mark_cancelled(event_id).await {
            warn!(
                event_name = "calendar.booking_mirror_failed",
                agent_id = %agent.id.0,
                event_id,
                error = %error,
                "local booking was not marked cancelled"
            );
        }
        info!(event_name = "calendar.event_cancelled", agent_id = %agent.id.0, event_id);
        Ok(())
    }

    pub async fn search_events(
        &self,
        agent_id: &AgentId,
        start_date: NaiveDate,
        end_date: NaiveDate,
        query: Option<String>,
    ) -> Result<Vec<CalendarEvent>, BookingError> {
        let agent = self.agent(agent_id).await?;
        let calendar_id = ensure_calendar_configured(&agent)?;
        let (time_min, time_max) = local_day_bounds(agent.tz(), start_date, end_date)?;

        let events = self
            .calendar
            .list_events(calendar_id, &EventQuery { time_min, time_max, query, include_cancelled: false })
            .await?;
        Ok(events.into_iter().filter(|event| !event.is_cancelled()).collect())
    }

    pub async fn update_event(
        &self,
        agent_id: &AgentId,
        event_id: &str,
        request: UpdateEventRequest,
        now: DateTime<Utc>,
    ) -> Result<CalendarEvent, BookingError> {
        let agent = self.agent(agent_id).await?;
        let calendar_id = ensure_calendar_configured(&agent)?.to_string();
        ensure_booking_enabled(&agent)?;

        let mirrored = self.bookings.find_by_external_id(event_id).await?;
        let mut current = None;
        match &mirrored {
            Some(booking) if booking.status == BookingStatus::Cancelled => {
                return Err(DomainError::EventCancelled.into());
            }
            Some(_) => {}
            None => {
                let event = self.calendar.get_event(&calendar_id, event_id).await?;
                if event.is_cancelled() {
                    return Err(DomainError::EventCancelled.into());
                }
                current = Some(event);
            }
        }

        let mut patch = EventPatch {
            summary: request.summary,
            description: request.description,
            location: request.location,
            timezone: Some(agent.tz()),
            attendees: request
                .attendees
                .as_deref()
                .map(|attendees| merge_invitees(&agent.invitees, attendees)),
            ..EventPatch::default()
        };

        let mut times = None;
        if let Some(raw_start) = request.start.as_deref() {
            let start = parse_event_time(raw_start, agent.tz())?;
            let length = match request.duration_minutes.filter(|minutes| *minutes > 0) {
                Some(minutes) => Duration::minutes(i64::from(minutes)),
                None => {
                    let current = match current.take() {
                        Some(event) => event,
                        None => self.calendar.get_event(&calendar_id, event_id).await?,
                    };
                    match (current.start_instant(), current.end_instant()) {
                        (Some(current_start), Some(current_end)) => {
                            duration_between(current_start, current_end)
                        }
                        _ => Duration::minutes(i64::from(agent.default_slot_duration)),
                    }
                }
            };
            let minutes = u32::try_from(length.num_minutes()).unwrap_or(u32::MAX);
            let own = mirrored
                .as_ref()
                .filter(|booking| booking.status == BookingStatus::Confirmed)
                .map(|booking| BookedInterval::new(booking.start_time, booking.end_time));
            self.ensure_slot_open(&agent, start, minutes, own, now).await?;

            patch.start = Some(start);
            patch.end = Some(start + length);
            times = Some((start, start + length));
        }

        let updated = self.calendar.patch_event(&calendar_id, event_id, &patch).await?;

        let (start_time, end_time) = match (times, &mirrored) {
            (Some(times), _) => times,
            (None, Some(existing)) => (existing.start_time, existing.end_time),
            (None, None) => match (updated.start_instant(), updated.end_instant()) {
                (Some(start), Some(end)) => (start, end),
                _ => return Ok(updated),
            },
        };
        self.mirror(BookingRecord {
            id: mirrored.as_ref().map(|booking| booking.id.clone()).unwrap_or_else(new_id),
            agent_id: agent.id.clone(),
            external_event_id: updated.id.clone(),
            summary: updated.summary.clone(),
            start_time,
            end_time,
            phone_number: mirrored.and_then(|booking| booking.phone_number),
            status: BookingStatus::Confirmed,
        })
        .await;

        info!(event_name = "calendar.event_updated", agent_id = %agent.id.0, event_id);
        Ok(updated)
    }

    pub async fn list_events(
        &self,
        agent_id: &AgentId,
        start_date: NaiveDate,
        end_date: NaiveDate,
        include_cancelled: bool,
        now: DateTime<Utc>,
    ) -> Result<EventListing, BookingError> {
        let agent = self.agent(agent_id).await?;
        let calendar_id = ensure_calendar_configured(&agent)?;
        let (time_min, time_max) = local_day_bounds(agent.tz(), start_date, end_date)?;

        let events = self
            .calendar
            .list_events(calendar_id, &EventQuery { time_min, time_max, query: None, include_cancelled })
            .await?;
        let booked = self.booked(&agent.id, time_min, time_max).await?;
        let mut slots =
            available_slots(&SlotRules::from_agent(&agent), time_min, time_max, None, &booked, now);
        slots.truncate(MAX_LISTED_SLOTS);

        Ok(EventListing { events, available_slots: slots, start_date, end_date })
    }
}

/// Accepts `YYYY-MM-DD`, or a timestamp whose date part is used.
pub fn parse_date(field: &'static str, raw: &str) -> Result<NaiveDate, DomainError> {
    let raw = raw.trim();
    raw.get(..10)
        .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
        .ok_or_else(|| DomainError::invalid(field, format!("`{raw}` is not a YYYY-MM-DD date")))
}

/// Turns a booking failure into the payload the model sees. Vendor and
/// storage failures are logged and reported with `fallback`.
fn booking_failure(error: BookingError, tool: &'static str, fallback: &str) -> Value {
    match error {
        BookingError::Domain(error) => failure(error.to_string()),
        BookingError::SlotUnavailable { alternatives } => json!({
            "success": false,
            "error": "Requested time slot is not available",
            "suggested_alternatives": alternatives,
        }),
        other => {
            error!(event_name = "tool.calendar_failed", tool, error = %other, "calendar tool failed");
            failure(fallback)
        }
    }
}

fn string_list(input: &Value, field: &str) -> Option<Vec<String>> {
    input.get(field).and_then(Value::as_array).map(|items| {
        items.iter().filter_map(Value::as_str).map(str::to_string).collect()
    })
}

fn minutes(input: &Value, field: &str) -> Option<u32> {
    input.get(field).and_then(Value::as_u64).and_then(|value| u32::try_from(value).ok())
}

fn date_range(input: &Value) -> Result<(NaiveDate, NaiveDate), String> {
    let start = parse_date("start_date", required_str(input, "start_date")?)
        .map_err(|error| error.to_string())?;
    let end = parse_date("end_date", required_str(input, "end_date")?)
        .map_err(|error| error.to_string())?;
    Ok((start, end))
}

fn date_properties() -> Value {
    json!({
        "start_date": {"type": "string", "description": "Start date in ISO format (e.g., '2024-01-15')"},
        "end_date": {"type": "string", "description": "End date in ISO format (e.g., '2024-01-20')"}
    })
}

fn merge_properties(mut base: Value, extra: Value) -> Value {
    if let (Some(base), Value::Object(extra)) = (base.as_object_mut(), extra) {
        base.extend(extra);
    }
    base
}

pub struct CreateCalendarEventTool {
    service: Arc<BookingService>,
}

impl CreateCalendarEventTool {
    pub fn new(service: Arc<BookingService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for CreateCalendarEventTool {
    fn name(&self) -> &'static str {
        "create_calendar_event"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Create a calendar event/booking for the agent. Always check available slots first before booking.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string", "description": "Event title/summary"},
                    "start_datetime": {"type": "string", "description": "Start time in ISO format (e.g., '2024-01-15T14:00:00')"},
                    "duration_minutes": {"type": "integer", "description": "Event duration in minutes"},
                    "client_name": {"type": "string", "description": "Client's name (optional)"},
                    "client_phone": {"type": "string", "description": "Client's phone number (include if provided)"},
                    "attendees": {"type": "array", "items": {"type": "string"}, "description": "List of attendee email addresses"},
                    "description": {"type": "string", "description": "Event description"},
                    "location": {"type": "string", "description": "Event location"}
                },
                "required": ["summary", "start_datetime"]
            }),
        }
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<Value> {
        let (summary, start) =
            match (required_str(&input, "summary"), required_str(&input, "start_datetime")) {
                (Ok(summary), Ok(start)) => (summary.to_string(), start.to_string()),
                (Err(message), _) | (_, Err(message)) => return Ok(failure(message)),
            };
        let request = CreateEventRequest {
            summary,
            start,
            duration_minutes: minutes(&input, "duration_minutes"),
            client_name: optional_str(&input, "client_name"),
            client_phone: optional_str(&input, "client_phone").or_else(|| ctx.caller_phone.clone()),
            attendees: string_list(&input, "attendees").unwrap_or_default(),
            description: optional_str(&input, "description"),
            location: optional_str(&input, "location"),
        };
        let client_info = json!({ "name": request.client_name, "phone": request.client_phone });

        Ok(match self.service.create_event(&ctx.agent_id, request, Utc::now()).await {
            Ok(event) => json!({
                "success": true,
                "event_id": event.id,
                "summary": event.summary,
                "start": event.start,
                "end": event.end,
                "location": event.location,
                "attendees": event.attendees,
                "client_info": client_info,
            }),
            Err(error) => booking_failure(error, "create_calendar_event", "Failed to create calendar event"),
        })
    }
}

pub struct CancelCalendarEventTool {
    service: Arc<BookingService>,
}

impl CancelCalendarEventTool {
    pub fn new(service: Arc<BookingService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for CancelCalendarEventTool {
    fn name(&self) -> &'static str {
        "cancel_calendar_event"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Cancel/remove a calendar event".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "event_id": {"type": "string", "description": "The calendar event ID"}
                },
                "required": ["event_id"]
            }),
        }
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<Value> {
        let event_id = match required_str(&input, "event_id") {
            Ok(event_id) => event_id,
            Err(message) => return Ok(failure(message)),
        };
        Ok(match self.service.cancel_event(&ctx.agent_id, event_id).await {
            Ok(()) => json!({ "success": true, "message": "Event cancelled successfully" }),
            Err(error) => booking_failure(error, "cancel_calendar_event", "Failed to cancel event"),
        })
    }
}

pub struct SearchCalendarEventsTool {
    service: Arc<BookingService>,
}

impl SearchCalendarEventsTool {
    pub fn new(service: Arc<BookingService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for SearchCalendarEventsTool {
    fn name(&self) -> &'static str {
        "search_calendar_events"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Search for events in the agent's calendar".to_string(),
            parameters: json!({
                "type": "object",
                "properties": merge_properties(date_properties(), json!({
                    "query": {"type": "string", "description": "Search query for event content (optional)"}
                })),
                "required": ["start_date", "end_date"]
            }),
        }
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<Value> {
        let (start_date, end_date) = match date_range(&input) {
            Ok(range) => range,
            Err(message) => return Ok(failure(message)),
        };
        let query = optional_str(&input, "query");
        Ok(match self.service.search_events(&ctx.agent_id, start_date, end_date, query).await {
            Ok(events) => json!({
                "success": true,
                "total_found": events.len(),
                "events": events.iter().map(CalendarEvent::summary_json).collect::<Vec<_>>(),
            }),
            Err(error) => booking_failure(error, "search_calendar_events", "Failed to search events"),
        })
    }
}

pub struct UpdateCalendarEventTool {
    service: Arc<BookingService>,
}

impl UpdateCalendarEventTool {
    pub fn new(service: Arc<BookingService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for UpdateCalendarEventTool {
    fn name(&self) -> &'static str {
        "update_calendar_event"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Update an existing calendar event".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "event_id": {"type": "string", "description": "The calendar event ID"},
                    "summary": {"type": "string", "description": "New event title/summary"},
                    "start_datetime": {"type": "string", "description": "New start time in ISO format"},
                    "duration_minutes": {"type": "integer", "description": "New duration in minutes"},
                    "description": {"type": "string", "description": "New description"},
                    "location": {"type": "string", "description": "New location"},
                    "attendees": {"type": "array", "items": {"type": "string"}, "description": "New list of attendee emails"}
                },
                "required": ["event_id"]
            }),
        }
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<Value> {
        let event_id = match required_str(&input, "event_id") {
            Ok(event_id) => event_id.to_string(),
            Err(message) => return Ok(failure(message)),
        };
        let request = UpdateEventRequest {
            summary: optional_str(&input, "summary"),
            start: optional_str(&input, "start_datetime"),
            duration_minutes: minutes(&input, "duration_minutes"),
            description: optional_str(&input, "description"),
            location: optional_str(&input, "location"),
            attendees: string_list(&input, "attendees"),
        };
        Ok(match self.service.update_event(&ctx.agent_id, &event_id, request, Utc::now()).await {
            Ok(event) => json!({
                "success": true,
                "event_id": event.id,
                "summary": event.summary,
                "start": event.start,
                "end": event.end,
                "location": event.location,
                "attendees": event.attendees,
            }),
            Err(error) => booking_failure(error, "update_calendar_event", "Failed to update event"),
        })
    }
}

pub struct ListCalendarEventsTool {
    service: Arc<BookingService>,
}

impl ListCalendarEventsTool {
    pub fn new(service: Arc<BookingService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for ListCalendarEventsTool {
    fn name(&self) -> &'static str {
        "list_calendar_events"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "List all events and available slots for a given date range".to_string(),
            parameters: json!({
                "type": "object",
                "properties": merge_properties(date_properties(), json!({
                    "include_cancelled": {"type": "boolean", "description": "Whether to include cancelled events", "default": false}
                })),
                "required": ["start_date", "end_date"]
            }),
        }
    }

    async fn execute(&self, ctx: &ToolContext, input: Value) -> Result<Value> {
        let (start_date, end_date) = match date_range(&input) {
            Ok(range) => range,
            Err(message) => return Ok(failure(message)),
        };
        let include_cancelled =
            input.get("include_cancelled").and_then(Value::as_bool).unwrap_or(false);

        Ok(
            match self
                .service
                .list_events(&ctx.agent_id, start_date, end_date, include_cancelled, Utc::now())
                .await
            {
                Ok(listing) => json!({
                    "success": true,
                    "events": listing.events.iter().map(CalendarEvent::summary_json).collect::<Vec<_>>(),
                    "total_events": listing.events.len(),
                    "available_slots": listing.available_slots,
                    "date_range": { "start": listing.start_date, "end": listing.end_date },
                }),
                Err(error) => booking_failure(error, "list_calendar_events", "Failed to list events"),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use serde_json::json;

    use rollwise_core::domain::agent::{AgentId, Invitee, NewAgent};
    use rollwise_core::domain::booking::BookingStatus;
    use rollwise_core::domain::user::{GlobalRole, User, UserId};
    use rollwise_core::errors::DomainError;
    use rollwise_db::repositories::{
        AgentRepository, BookingRepository, InMemoryAgentRepository, InMemoryBookingRepository,
    };

    use super::{
        parse_date, BookingError, BookingService, CancelCalendarEventTool, CreateCalendarEventTool,
        CreateEventRequest, ListCalendarEventsTool, SearchCalendarEventsTool,
        UpdateCalendarEventTool, UpdateEventRequest,
    };
    use crate::calendar::{CalendarClient, InMemoryCalendar, NewCalendarEvent};
    use crate::tools::{Tool, ToolContext};

    const CALENDAR_ID: &str = "front-desk@calendar.local";

    struct Fixture {
        agents: Arc<InMemoryAgentRepository>,
        bookings: Arc<InMemoryBookingRepository>,
        calendar: Arc<InMemoryCalendar>,
        service: Arc<BookingService>,
        agent_id: AgentId,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).single().expect("time")
    }

    async fn fixture(configure: impl FnOnce(&mut rollwise_core::domain::agent::Agent)) -> Fixture {
        let agents = Arc::new(InMemoryAgentRepository::default());
        let bookings = Arc::new(InMemoryBookingRepository::default());
        let calendar = Arc::new(InMemoryCalendar::new());
        let owner = User {
            id: UserId("user-1".into()),
            name: "Owner".into(),
            email: "owner@example.com".into(),
            auth_subject: None,
            email_verified: true,
            phone_number: None,
            global_role: GlobalRole::User,
            active: true,
            created_at: now(),
            updated_at: now(),
        };
        agents.register_user(owner.clone()).await;

        let mut agent = NewAgent::with_defaults("Front Desk", None, None, "owner@example.com")
            .into_agent(AgentId("agent-1".into()), now());
        agent.timezone = "UTC".into();
        agent.calendar_id = Some(CALENDAR_ID.into());
        configure(&mut agent);
        agents.create(&agent, &owner.id).await.expect("create agent");
        // `create` does not persist the calendar id.
        if let Some(calendar_id) = agent.calendar_id.as_deref() {
            agents.set_calendar_id(&agent.id, calendar_id).await.expect("calendar id");
        }

        let service = Arc::new(BookingService::new(agents.clone(), bookings.clone(), calendar.clone()));
        Fixture { agents, bookings, calendar, service, agent_id: agent.id }
    }

    fn request(start: &str) -> CreateEventRequest {
        CreateEventRequest {
            summary: "Consultation".into(),
            start: start.into(),
            duration_minutes: Some(30),
            attendees: vec!["client@example.com".into(), "owner@example.com".into()],
            ..CreateEventRequest::default()
        }
    }

    #[tokio::test]
    async fn create_merges_default_invitees_and_mirrors_booking() {
        let fx = fixture(|agent| {
            agent.invitees =
                vec![Invitee::always("owner@example.com"), Invitee::always("ops@example.com")];
        })
        .await;

        // 2025-06-02 is a Monday.
        let event = fx
            .service
            .create_event(&fx.agent_id, request("2025-06-02T09:00:00"), now())
            .await
            .expect("create");

        assert_eq!(event.attendees, vec!["owner@example.com", "ops@example.com", "client@example.com"]);
        let mirrored = fx.bookings.find_by_external_id(&event.id).await.expect("lookup");
        assert!(mirrored.is_some());
        assert_eq!(fx.calendar.events(CALENDAR_ID).await.len(), 1);
    }

    #[tokio::test]
    async fn disabled_booking_blocks_create_cancel_and_update() {
        let fx = fixture(|agent| agent.booking_enabled = false).await;

        let created = fx.service.create_event(&fx.agent_id, request("2025-06-02T09:00:00"), now()).await;
        assert!(matches!(created, Err(BookingError::Domain(DomainError::BookingDisabled))));

        let cancelled = fx.service.cancel_event(&fx.agent_id, "evt-1").await;
        assert!(matches!(cancelled, Err(BookingError::Domain(DomainError::BookingDisabled))));

        let updated = fx
            .service
            .update_event(&fx.agent_id, "evt-1", UpdateEventRequest::default(), now())
            .await;
        assert!(matches!(updated, Err(BookingError::Domain(DomainError::BookingDisabled))));
        assert!(fx.calendar.events(CALENDAR_ID).await.is_empty());
    }

    #[tokio::test]
    async fn missing_calendar_is_reported_before_the_booking_gate() {
        let fx = fixture(|agent| {
            agent.booking_enabled = false;
            agent.calendar_id = None;
        })
        .await;

        let created = fx.service.create_event(&fx.agent_id, request("2025-06-02T09:00:00"), now()).await;
        assert!(matches!(created, Err(BookingError::Domain(DomainError::CalendarNotConfigured))));

        let cancelled = fx.service.cancel_event(&fx.agent_id, "evt-1").await;
        assert!(matches!(cancelled, Err(BookingError::Domain(DomainError::CalendarNotConfigured))));

        let updated = fx
            .service
            .update_event(&fx.agent_id, "evt-1", UpdateEventRequest::default(), now())
            .await;
        assert!(matches!(updated, Err(BookingError::Domain(DomainError::CalendarNotConfigured))));
    }

    #[tokio::test]
    async fn slot_cap_allows_parallel_bookings_up_to_max() {
        let fx = fixture(|agent| agent.max_slot_appointments = 2).await;

        for _ in 0..2 {
            fx.service
                .create_event(&fx.agent_id, request("2025-06-02T09:00:00"), now())
                .await
                .expect("within capacity");
        }
        let third = fx.service.create_event(&fx.agent_id, request("2025-06-02T09:00:00"), now()).await;

        let Err(BookingError::SlotUnavailable { alternatives }) = third else {
            panic!("expected a full slot");
        };
        assert_eq!(alternatives.len(), 5);
        assert!(alternatives.iter().all(|slot| slot.start.to_rfc3339() != "2025-06-02T09:00:00+00:00"));
    }

    #[tokio::test]
    async fn cancelled_booking_frees_the_slot() {
        let fx = fixture(|_| {}).await;
        let event = fx
            .service
            .create_event(&fx.agent_id, request("2025-06-02T09:00:00"), now())
            .await
            .expect("create");
        assert!(fx.service.create_event(&fx.agent_id, request("2025-06-02T09:00:00"), now()).await.is_err());

        fx.service.cancel_event(&fx.agent_id, &event.id).await.expect("cancel");
        fx.service
            .create_event(&fx.agent_id, request("2025-06-02T09:00:00"), now())
            .await
            .expect("slot is free again");
    }

    #[tokio::test]
    async fn cancelled_event_cannot_be_updated_back_into_the_slot() {
        let fx = fixture(|_| {}).await;
        let event = fx
            .service
            .create_event(&fx.agent_id, request("2025-06-02T09:00:00"), now())
            .await
            .expect("create");
        fx.service.cancel_event(&fx.agent_id, &event.id).await.expect("cancel");

        let renamed = fx
            .service
            .update_event(
                &fx.agent_id,
                &event.id,
                UpdateEventRequest { summary: Some("Follow-up".into()), ..UpdateEventRequest::default() },
                now(),
            )
            .await;
        assert!(matches!(renamed, Err(BookingError::Domain(DomainError::EventCancelled))));

        let mirrored = fx.bookings.find_by_external_id(&event.id).await.expect("lookup").expect("row");
        assert_eq!(mirrored.status, BookingStatus::Cancelled);
        fx.service
            .create_event(&fx.agent_id, request("2025-06-02T09:00:00"), now())
            .await
            .expect("slot stays free");
    }

    #[tokio::test]
    async fn unmirrored_cancelled_event_is_rejected_by_vendor_status() {
        let fx = fixture(|_| {}).await;
        let start = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).single().expect("time");
        let event = fx
            .calendar
            .insert_event(
                CALENDAR_ID,
                &NewCalendarEvent {
                    summary: "Booked elsewhere".into(),
                    description: None,
                    location: None,
                    start,
                    end: start + chrono::Duration::minutes(30),
                    timezone: chrono_tz::UTC,
                    attendees: Vec::new(),
                    client_name: None,
                    client_phone: None,
                },
            )
            .await
            .expect("vendor insert");
        fx.calendar.cancel_event(CALENDAR_ID, &event.id).await.expect("vendor cancel");
        assert!(fx.bookings.find_by_external_id(&event.id).await.expect("lookup").is_none());

        let renamed = fx
            .service
            .update_event(
                &fx.agent_id,
                &event.id,
                UpdateEventRequest { summary: Some("Follow-up".into()), ..UpdateEventRequest::default() },
                now(),
            )
            .await;
        assert!(matches!(renamed, Err(BookingError::Domain(DomainError::EventCancelled))));
        assert!(fx.bookings.find_by_external_id(&event.id).await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn update_keeps_duration_when_only_start_moves() {
        let fx = fixture(|_| {}).await;
        let mut create = request("2025-06-02T09:00:00");
        create.duration_minutes = Some(45);
        let event = fx.service.create_event(&fx.agent_id, create, now()).await.expect("create");

        let moved = fx
            .service
            .update_event(
                &fx.agent_id,
                &event.id,
                UpdateEventRequest { start: Some("2025-06-02T13:00:00".into()), ..UpdateEventRequest::default() },
                now(),
            )
            .await
            .expect("update");

        assert_eq!(moved.start, "2025-06-02T13:00:00+00:00");
        assert_eq!(moved.end, "2025-06-02T13:45:00+00:00");
        let mirrored = fx.bookings.find_by_external_id(&event.id).await.expect("lookup").expect("row");
        assert_eq!(mirrored.start_time, Utc.with_ymd_and_hms(2025, 6, 2, 13, 0, 0).single().expect("time"));
    }

    #[tokio::test]
    async fn update_merges_invitees_only_when_attendees_are_given() {
        let fx = fixture(|agent| agent.invitees = vec![Invitee::always("owner@example.com")]).await;
        let mut create = request("2025-06-02T09:00:00");
        create.attendees = vec!["client@example.com".into()];
        let event = fx.service.create_event(&fx.agent_id, create, now()).await.expect("create");

        let renamed = fx
            .service
            .update_event(
                &fx.agent_id,
                &event.id,
                UpdateEventRequest { summary: Some("Follow-up".into()), ..UpdateEventRequest::default() },
                now(),
            )
            .await
            .expect("rename");
        assert_eq!(renamed.attendees, vec!["owner@example.com", "client@example.com"]);

        let replaced = fx
            .service
            .update_event(
                &fx.agent_id,
                &event.id,
                UpdateEventRequest {
                    attendees: Some(vec!["other@example.com".into()]),
                    ..UpdateEventRequest::default()
                },
                now(),
            )
            .await
            .expect("attendees");
        assert_eq!(replaced.attendees, vec!["owner@example.com", "other@example.com"]);
    }

    #[tokio::test]
    async fn tools_report_failures_as_payloads() {
        let fx = fixture(|agent| agent.calendar_id = None).await;
        let ctx = ToolContext::new(fx.agent_id.clone());

        let create = CreateCalendarEventTool::new(fx.service.clone());
        let result = create
            .execute(&ctx, json!({"summary": "Visit", "start_datetime": "2025-06-02T09:00:00"}))
            .await
            .expect("tool result");
        assert_eq!(result, json!({"success": false, "error": "Agent does not have a calendar configured"}));

        let missing = create.execute(&ctx, json!({"summary": "Visit"})).await.expect("tool result");
        assert_eq!(missing["error"], "start_datetime is required");

        let unknown = SearchCalendarEventsTool::new(fx.service.clone())
            .execute(
                &ToolContext::new(AgentId("nobody".into())),
                json!({"start_date": "2025-06-02", "end_date": "2025-06-03"}),
            )
            .await
            .expect("tool result");
        assert_eq!(unknown["error"], "Agent not found");
        assert!(fx.agents.find_by_id(&fx.agent_id).await.expect("find").is_some());
    }

    #[tokio::test]
    async fn tool_flow_create_list_search_cancel() {
        let fx = fixture(|_| {}).await;
        let ctx = ToolContext::new(fx.agent_id.clone()).with_caller(Some("+15550100".into()));

        let created = CreateCalendarEventTool::new(fx.service.clone())
            .execute(
                &ctx,
                json!({"summary": "Haircut", "start_datetime": "2030-06-03T10:00:00", "client_name": "Ada"}),
            )
            .await
            .expect("create");
        assert_eq!(created["success"], true);
        assert_eq!(created["client_info"], json!({"name": "Ada", "phone": "+15550100"}));
        let event_id = created["event_id"].as_str().expect("event id").to_string();

        let listing = ListCalendarEventsTool::new(fx.service.clone())
            .execute(&ctx, json!({"start_date": "2030-06-03", "end_date": "2030-06-04"}))
            .await
            .expect("list");
        assert_eq!(listing["total_events"], 1);
        assert_eq!(listing["available_slots"].as_array().map(Vec::len), Some(20));
        assert_eq!(listing["date_range"], json!({"start": "2030-06-03", "end": "2030-06-04"}));

        let cancelled = CancelCalendarEventTool::new(fx.service.clone())
            .execute(&ctx, json!({"event_id": event_id}))
            .await
            .expect("cancel");
        assert_eq!(cancelled["message"], "Event cancelled successfully");

        let found = SearchCalendarEventsTool::new(fx.service.clone())
            .execute(&ctx, json!({"start_date": "2030-06-03", "end_date": "2030-06-03", "query": "hair"}))
            .await
            .expect("search");
        assert_eq!(found["total_found"], 0);

        let update = UpdateCalendarEventTool::new(fx.service.clone())
            .execute(&ctx, json!({}))
            .await
            .expect("update");
        assert_eq!(update["error"], "event_id is required");
    }

    #[test]
    fn dates_accept_timestamps() {
        let expected = NaiveDate::from_ymd_opt(2025, 6, 2);
        assert_eq!(parse_date("start_date", "2025-06-02").ok(), expected);
        assert_eq!(parse_date("start_date", "2025-06-02T10:00:00").ok(), expected);
        assert!(parse_date("start_date", "June 2nd").is_err());
    }
}
