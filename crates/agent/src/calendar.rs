//! Calendar vendor access.
//!
//! `CalendarClient` is the seam between booking rules and the vendor. The
//! Google implementation authenticates as a service account (optionally
//! impersonating `delegated_user`) and talks to the Calendar v3 REST API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use rollwise_core::config::CalendarConfig;

const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_TTL_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar is unavailable: {0}")]
    Unavailable(String),
    #[error("calendar authentication failed: {0}")]
    Auth(String),
    #[error("calendar transport error: {0}")]
    Transport(String),
    #[error("calendar vendor returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("calendar event `{0}` not found")]
    NotFound(String),
    #[error("calendar response could not be decoded: {0}")]
    Decode(String),
}

/// Event as held by the vendor. `start`/`end` keep the vendor's text form:
/// an RFC 3339 date-time, or a bare date for all-day events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: String,
    pub end: String,
    pub attendees: Vec<String>,
    pub status: String,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
}

impl CalendarEvent {
    pub fn start_instant(&self) -> Option<DateTime<Utc>> {
        parse_instant(&self.start)
    }

    pub fn end_instant(&self) -> Option<DateTime<Utc>> {
        parse_instant(&self.end)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == "cancelled"
    }

    /// Shape handed to the model and to API callers.
    pub fn summary_json(&self) -> Value {
        json!({
            "id": self.id,
            "summary": self.summary,
            "start": self.start,
            "end": self.end,
            "description": self.description.clone().unwrap_or_default(),
            "location": self.location.clone().unwrap_or_default(),
            "attendees": self.attendees,
            "client_name": self.client_name.clone().unwrap_or_default(),
            "client_phone": self.client_phone.clone().unwrap_or_default(),
            "status": self.status,
        })
    }
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|value| value.with_timezone(&Utc))
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewCalendarEvent {
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub timezone: Tz,
    pub attendees: Vec<String>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
}

/// Partial event update. `None` fields are left untouched by the vendor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventPatch {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub timezone: Option<Tz>,
    pub attendees: Option<Vec<String>>,
    pub status: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventQuery {
    pub time_min: DateTime<Utc>,
    pub time_max: DateTime<Utc>,
    pub query: Option<String>,
    pub include_cancelled: bool,
}

#[async_trait]
pub trait CalendarClient: Send + Sync {
    /// Creates a secondary calendar and returns its id.
    async fn create_calendar(&self, summary: &str, timezone: &str)
        -> Result<String, CalendarError>;
    async fn add_owner(&self, calendar_id: &str, email: &str) -> Result<(), CalendarError>;
    async fn insert_event(
        &self,
        calendar_id: &str,
        event: &NewCalendarEvent,
    ) -> Result<CalendarEvent, CalendarError>;
    async fn get_event(
        &self,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<CalendarEvent, CalendarError>;
    async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        patch: &EventPatch,
    ) -> Result<CalendarEvent, CalendarError>;
    /// Marks the event cancelled. The vendor keeps it for `include_cancelled` listings.
    async fn cancel_event(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError>;
    async fn list_events(
        &self,
        calendar_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<CalendarEvent>, CalendarError>;
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_ttl")]
    expires_in: i64,
}

fn default_token_ttl() -> i64 {
    ASSERTION_TTL_SECS
}

#[derive(Clone, Debug)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

pub struct GoogleCalendarClient {
    client: Client,
    service_account_email: String,
    private_key: SecretString,
    delegated_user: Option<String>,
    token_uri: String,
    api_base_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleCalendarClient {
    pub fn from_config(config: &CalendarConfig) -> Result<Self, CalendarError> {
        let service_account_email = config
            .service_account_email
            .clone()
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| {
                CalendarError::Unavailable("calendar.service_account_email is not set".to_string())
            })?;
        let private_key = config.private_key.as_ref().ok_or_else(|| {
            CalendarError::Unavailable("calendar.private_key is not set".to_string())
        })?;
        // Keys pasted into env vars usually carry literal `\n` sequences.
        let private_key = SecretString::from(private_key.expose_secret().replace("\\n", "\n"));
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| CalendarError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            service_account_email,
            private_key,
            delegated_user: config.delegated_user.clone().filter(|user| !user.trim().is_empty()),
            token_uri: config.token_uri.clone(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, CalendarError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.expires_at > now + chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) {
                return Ok(token.access_token.clone());
            }
        }

        let claims = AssertionClaims {
            iss: &self.service_account_email,
            scope: CALENDAR_SCOPE,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_TTL_SECS,
            sub: self.delegated_user.as_deref(),
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.expose_secret().as_bytes())
            .map_err(|error| CalendarError::Auth(format!("invalid private key: {error}")))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|error| CalendarError::Auth(error.to_string()))?;

        let response = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|error| CalendarError::Transport(error.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::Auth(format!("token endpoint returned {status}: {body}")));
        }
        let token: TokenResponse =
            response.json().await.map_err(|error| CalendarError::Decode(error.to_string()))?;

        debug!(event_name = "calendar.token_refreshed", expires_in = token.expires_in);
        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: now + chrono::Duration::seconds(token.expires_in),
        });
        Ok(access_token)
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!("{}/calendars/{}/events", self.api_base_url, urlencoding::encode(calendar_id))
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!("{}/{}", self.events_url(calendar_id), urlencoding::encode(event_id))
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value, CalendarError> {
        let token = self.access_token().await?;
        let mut request = self.client.request(method, url).bearer_auth(token).query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response =
            request.send().await.map_err(|error| CalendarError::Transport(error.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(CalendarError::NotFound(url.rsplit('/').next().unwrap_or(url).to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::Status { status: status.as_u16(), body });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response.json::<Value>().await.map_err(|error| CalendarError::Decode(error.to_string()))
    }
}

fn vendor_time(instant: DateTime<Utc>, timezone: Tz) -> Value {
    json!({
        "dateTime": instant.with_timezone(&timezone).to_rfc3339(),
        "timeZone": timezone.name(),
    })
}

fn describe_client(event: &NewCalendarEvent) -> Option<String> {
    let mut lines = Vec::new();
    if let Some(description) = &event.description {
        lines.push(description.clone());
    }
    if let Some(name) = &event.client_name {
        lines.push(format!("Client: {name}"));
    }
    if let Some(phone) = &event.client_phone {
        lines.push(format!("Phone: {phone}"));
    }
    (!lines.is_empty()).then(|| lines.join("\n"))
}

fn new_event_body(event: &NewCalendarEvent) -> Value {
    let mut private = serde_json::Map::new();
    if let Some(name) = &event.client_name {
        private.insert("client_name".to_string(), json!(name));
    }
    if let Some(phone) = &event.client_phone {
        private.insert("client_phone".to_string(), json!(phone));
    }
    json!({
        "summary": event.summary,
        "description": describe_client(event),
        "location": event.location,
        "start": vendor_time(event.start, event.timezone),
        "end": vendor_time(event.end, event.timezone),
        "attendees": event.attendees.iter().map(|email| json!({ "email": email })).collect::<Vec<_>>(),
        "extendedProperties": { "private": private },
    })
}

fn patch_body(patch: &EventPatch) -> Value {
    let timezone = patch.timezone.unwrap_or(chrono_tz::UTC);
    let mut body = serde_json::Map::new();
    if let Some(summary) = &patch.summary {
        body.insert("summary".to_string(), json!(summary));
    }
    if let Some(description) = &patch.description {
        body.insert("description".to_string(), json!(description));
    }
    if let Some(location) = &patch.location {
        body.insert("location".to_string(), json!(location));
    }
    if let Some(start) = patch.start {
        body.insert("start".to_string(), vendor_time(start, timezone));
    }
    if let Some(end) = patch.end {
        body.insert("end".to_string(), vendor_time(end, timezone));
    }
    if let Some(attendees) = &patch.attendees {
        body.insert(
            "attendees".to_string(),
            attendees.iter().map(|email| json!({ "email": email })).collect(),
        );
    }
    if let Some(status) = &patch.status {
        body.insert("status".to_string(), json!(status));
    }
    Value::Object(body)
}

/// Maps a Calendar v3 event resource.
pub fn parse_event(raw: &Value) -> Result<CalendarEvent, CalendarError> {
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| CalendarError::Decode("event without id".to_string()))?;
    let time = |field: &str| {
        raw.get(field)
            .and_then(|time| time.get("dateTime").or_else(|| time.get("date")))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let text = |field: &str| {
        raw.get(field)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    let private = raw.get("extendedProperties").and_then(|props| props.get("private"));
    let private_text = |field: &str| {
        private
            .and_then(|props| props.get(field))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    Ok(CalendarEvent {
        id: id.to_string(),
        summary: text("summary").unwrap_or_else(|| "No title".to_string()),
        description: text("description"),
        location: text("location"),
        start: time("start"),
        end: time("end"),
        attendees: raw
            .get("attendees")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|attendee| attendee.get("email").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
        status: text("status").unwrap_or_else(|| "confirmed".to_string()),
        client_name: private_text("client_name"),
        client_phone: private_text("client_phone"),
    })
}

#[async_trait]
impl CalendarClient for GoogleCalendarClient {
    async fn create_calendar(
        &self,
        summary: &str,
        timezone: &str,
    ) -> Result<String, CalendarError> {
        let url = format!("{}/calendars", self.api_base_url);
        let created = self
            .send(Method::POST, &url, &[], Some(json!({ "summary": summary, "timeZone": timezone })))
            .await?;
        created
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CalendarError::Decode("calendar without id".to_string()))
    }

    async fn add_owner(&self, calendar_id: &str, email: &str) -> Result<(), CalendarError> {
        let url = format!("{}/calendars/{}/acl", self.api_base_url, urlencoding::encode(calendar_id));
        let rule = json!({ "role": "owner", "scope": { "type": "user", "value": email } });
        self.send(Method::POST, &url, &[], Some(rule)).await?;
        Ok(())
    }

    async fn insert_event(
        &self,
        calendar_id: &str,
        event: &NewCalendarEvent,
    ) -> Result<CalendarEvent, CalendarError> {
        let created = self
            .send(Method::POST, &self.events_url(calendar_id), &[], Some(new_event_body(event)))
            .await?;
        parse_event(&created)
    }

    async fn get_event(
        &self,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<CalendarEvent, CalendarError> {
        let event = self.send(Method::GET, &self.event_url(calendar_id, event_id), &[], None).await?;
        parse_event(&event)
    }

    async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        patch: &EventPatch,
    ) -> Result<CalendarEvent, CalendarError> {
        let updated = self
            .send(
                Method::PATCH,
                &self.event_url(calendar_id, event_id),
                &[],
                Some(patch_body(patch)),
            )
            .await?;
        parse_event(&updated)
    }

    async fn cancel_event(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError> {
        let patch = EventPatch { status: Some("cancelled".to_string()), ..EventPatch::default() };
        self.patch_event(calendar_id, event_id, &patch).await.map(|_| ())
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let mut params = vec![
            ("timeMin", query.time_min.to_rfc3339()),
            ("timeMax", query.time_max.to_rfc3339()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
            ("showDeleted", query.include_cancelled.to_string()),
        ];
        if let Some(text) = query.query.as_deref().filter(|text| !text.trim().is_empty()) {
            params.push(("q", text.to_string()));
        }

        let listing =
            self.send(Method::GET, &self.events_url(calendar_id), &params, None).await?;
        listing
            .get("items")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .map(parse_event)
            .collect()
    }
}

/// Process-local calendar for tests and for running without vendor
/// credentials (`calendar.provider = "disabled"`).
#[derive(Default)]
pub struct InMemoryCalendar {
    events: RwLock<Vec<(String, CalendarEvent)>>,
    calendars: RwLock<Vec<(String, Vec<String>)>>,
    next_id: AtomicU64,
    unavailable: bool,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with `CalendarError::Unavailable`.
    pub fn unavailable() -> Self {
        Self { unavailable: true, ..Self::default() }
    }

    pub async fn events(&self, calendar_id: &str) -> Vec<CalendarEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|(calendar, _)| calendar == calendar_id)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub async fn owners(&self, calendar_id: &str) -> Vec<String> {
        self.calendars
            .read()
            .await
            .iter()
            .find(|(id, _)| id == calendar_id)
            .map(|(_, owners)| owners.clone())
            .unwrap_or_default()
    }

    fn check(&self) -> Result<(), CalendarError> {
        if self.unavailable {
            Err(CalendarError::Unavailable("calendar vendor is not reachable".to_string()))
        } else {
            Ok(())
        }
    }

    fn next(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

fn local_text(instant: DateTime<Utc>, timezone: Tz) -> String {
    instant.with_timezone(&timezone).to_rfc3339()
}

fn matches_text(event: &CalendarEvent, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    [Some(&event.summary), event.description.as_ref(), event.location.as_ref()]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&needle))
}

#[async_trait]
impl CalendarClient for InMemoryCalendar {
    async fn create_calendar(
        &self,
        summary: &str,
        _timezone: &str,
    ) -> Result<String, CalendarError> {
        self.check()?;
        let id = format!("{}@calendar.local", self.next(&summary.to_lowercase().replace(' ', "-")));
        self.calendars.write().await.push((id.clone(), Vec::new()));
        Ok(id)
    }

    async fn add_owner(&self, calendar_id: &str, email: &str) -> Result<(), CalendarError> {
        self.check()?;
        let mut calendars = self.calendars.write().await;
        match calendars.iter_mut().find(|(id, _)| id == calendar_id) {
            Some((_, owners)) => owners.push(email.to_string()),
            None => calendars.push((calendar_id.to_string(), vec![email.to_string()])),
        }
        Ok(())
    }

    async fn insert_event(
        &self,
        calendar_id: &str,
        event: &NewCalendarEvent,
    ) -> Result<CalendarEvent, CalendarError> {
        self.check()?;
        let created = CalendarEvent {
            id: self.next("evt"),
            summary: event.summary.clone(),
            description: describe_client(event),
            location: event.location.clone(),
            start: local_text(event.start, event.timezone),
            end: local_text(event.end, event.timezone),
            attendees: event.attendees.clone(),
            status: "confirmed".to_string(),
            client_name: event.client_name.clone(),
            client_phone: event.client_phone.clone(),
        };
        self.events.write().await.push((calendar_id.to_string(), created.clone()));
        Ok(created)
    }

    async fn get_event(
        &self,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<CalendarEvent, CalendarError> {
        self.check()?;
        self.events
            .read()
            .await
            .iter()
            .find(|(calendar, event)| calendar == calendar_id && event.id == event_id)
            .map(|(_, event)| event.clone())
            .ok_or_else(|| CalendarError::NotFound(event_id.to_string()))
    }

    async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        patch: &EventPatch,
    ) -> Result<CalendarEvent, CalendarError> {
        self.check()?;
        let mut events = self.events.write().await;
        let (_, event) = events
            .iter_mut()
            .find(|(calendar, event)| calendar == calendar_id && event.id == event_id)
            .ok_or_else(|| CalendarError::NotFound(event_id.to_string()))?;

        let timezone = patch.timezone.unwrap_or(chrono_tz::UTC);
        if let Some(summary) = &patch.summary {
            event.summary = summary.clone();
        }
        if let Some(description) = &patch.description {
            event.description = Some(description.clone());
        }
        if let Some(location) = &patch.location {
            event.location = Some(location.clone());
        }
        if let Some(start) = patch.start {
            event.start = local_text(start, timezone);
        }
        if let Some(end) = patch.end {
            event.end = local_text(end, timezone);
        }
        if let Some(attendees) = &patch.attendees {
            event.attendees = attendees.clone();
        }
        if let Some(status) = &patch.status {
            event.status = status.clone();
        }
        Ok(event.clone())
    }

    async fn cancel_event(&self, calendar_id: &str, event_id: &str) -> Result<(), CalendarError> {
        let patch = EventPatch { status: Some("cancelled".to_string()), ..EventPatch::default() };
        self.patch_event(calendar_id, event_id, &patch).await.map(|_| ())
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        self.check()?;
        let mut listed: Vec<CalendarEvent> = self
            .events
            .read()
            .await
            .iter()
            .filter(|(calendar, _)| calendar == calendar_id)
            .map(|(_, event)| event)
            .filter(|event| query.include_cancelled || !event.is_cancelled())
            .filter(|event| match (event.start_instant(), event.end_instant()) {
                (Some(start), Some(end)) => start < query.time_max && end > query.time_min,
                _ => false,
            })
            .filter(|event| query.query.as_deref().map_or(true, |text| matches_text(event, text)))
            .cloned()
            .collect();
        listed.sort_by_key(CalendarEvent::start_instant);
        Ok(listed)
    }
}
