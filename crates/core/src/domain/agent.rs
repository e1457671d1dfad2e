use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::domain::user::UserId;
use crate::errors::DomainError;

pub const DEFAULT_GREETING: &str = "Hello! How can I help you today?";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";
pub const DEFAULT_VOICE_MODEL: &str = "aura-2-thalia-en";
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_TIMEZONE: &str = "America/New_York";
pub const DEFAULT_AFTER_HOURS_BEHAVIOR: &str = "voicemail";
pub const DEFAULT_SLOT_DURATION_MINUTES: u32 = 30;
pub const DEFAULT_MAX_SLOT_APPOINTMENTS: u32 = 1;
pub const DEFAULT_BUFFER_MINUTES: u32 = 10;
pub const MIN_SLOT_DURATION_MINUTES: u32 = 5;
pub const DEFAULT_INVITEE_AVAILABILITY: &str = "always";

const TIME_FORMAT: &str = "%H:%M";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub enabled: bool,
    #[serde(default)]
    pub open: String,
    #[serde(default)]
    pub close: String,
}

impl DayHours {
    pub fn open(open: &str, close: &str) -> Self {
        Self { enabled: true, open: open.to_string(), close: close.to_string() }
    }

    pub fn closed() -> Self {
        Self { enabled: false, open: String::new(), close: String::new() }
    }

    /// Opening and closing time of an enabled day. `None` for closed days or
    /// values that do not parse.
    pub fn window(&self) -> Option<(NaiveTime, NaiveTime)> {
        if !self.enabled {
            return None;
        }
        let open = NaiveTime::parse_from_str(self.open.trim(), TIME_FORMAT).ok()?;
        let close = NaiveTime::parse_from_str(self.close.trim(), TIME_FORMAT).ok()?;
        (open < close).then_some((open, close))
    }
}

/// Weekly opening hours keyed by lowercase weekday name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub monday: DayHours,
    pub tuesday: DayHours,
    pub wednesday: DayHours,
    pub thursday: DayHours,
    pub friday: DayHours,
    pub saturday: DayHours,
    pub sunday: DayHours,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            monday: DayHours::open("09:00", "17:00"),
            tuesday: DayHours::open("09:00", "17:00"),
            wednesday: DayHours::open("09:00", "17:00"),
            thursday: DayHours::open("09:00", "17:00"),
            friday: DayHours::open("09:00", "17:00"),
            saturday: DayHours::closed(),
            sunday: DayHours::closed(),
        }
    }
}

impl BusinessHours {
    pub const WEEK: [Weekday; 7] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];

    pub fn day(&self, weekday: Weekday) -> &DayHours {
        match weekday {
            Weekday::Mon => &self.monday,
            Weekday::Tue => &self.tuesday,
            Weekday::Wed => &self.wednesday,
            Weekday::Thu => &self.thursday,
            Weekday::Fri => &self.friday,
            Weekday::Sat => &self.saturday,
            Weekday::Sun => &self.sunday,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        for weekday in Self::WEEK {
            let day = self.day(weekday);
            if day.enabled && day.window().is_none() {
                return Err(DomainError::invalid(
                    "business_hours",
                    format!(
                        "{} must have HH:MM open and close times with open before close",
                        weekday_name(weekday)
                    ),
                ));
            }
        }
        Ok(())
    }
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitee {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub email: String,
    #[serde(default = "default_availability")]
    pub availability: String,
}

fn default_availability() -> String {
    DEFAULT_INVITEE_AVAILABILITY.to_string()
}

impl Invitee {
    pub fn always(email: impl Into<String>) -> Self {
        Self { name: None, email: email.into(), availability: default_availability() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Owner,
    Editor,
    Viewer,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Editor => "editor",
            Self::Viewer => "viewer",
        }
    }

    pub fn can_edit(&self) -> bool {
        matches!(self, Self::Owner | Self::Editor)
    }
}

impl std::str::FromStr for AgentRole {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "editor" => Ok(Self::Editor),
            "viewer" => Ok(Self::Viewer),
            other => {
                Err(DomainError::UnknownVariant { kind: "agent role", value: other.to_string() })
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub business_name: Option<String>,
    pub phone_number: Option<String>,
    pub greeting: String,
    pub voice_model: String,
    pub voice_provider: Option<String>,
    pub system_prompt: String,
    pub language: String,
    pub tools: Vec<String>,
    pub calendar_id: Option<String>,
    pub timezone: String,
    pub business_hours: BusinessHours,
    pub after_hours_behavior: String,
    pub after_hours_message: Option<String>,
    pub default_slot_duration: u32,
    pub max_slot_appointments: u32,
    pub buffer_time: u32,
    pub blocked_dates: Vec<NaiveDate>,
    pub invitees: Vec<Invitee>,
    pub booking_enabled: bool,
    pub ordering_enabled: bool,
    pub closed: bool,
    pub closed_message: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Agent timezone, falling back to the platform default for unknown names.
    pub fn tz(&self) -> Tz {
        self.timezone.parse::<Tz>().unwrap_or(chrono_tz::America::New_York)
    }

    pub fn has_custom_prompt(&self) -> bool {
        let prompt = self.system_prompt.trim();
        !prompt.is_empty() && prompt != DEFAULT_SYSTEM_PROMPT
    }

    pub fn has_custom_greeting(&self) -> bool {
        let greeting = self.greeting.trim();
        !greeting.is_empty() && greeting != DEFAULT_GREETING
    }

    pub fn company_label(&self) -> &str {
        self.business_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("the business")
    }

    pub fn answers_number(&self, to_number: &str) -> bool {
        self.phone_number.as_deref().is_some_and(|number| number.trim() == to_number.trim())
    }
}

/// Input for creating an agent. `with_defaults` fills in every setting a new
/// agent starts with; callers then overlay whatever the request supplied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAgent {
    pub name: String,
    pub business_name: Option<String>,
    pub phone_number: Option<String>,
    pub greeting: String,
    pub voice_model: String,
    pub voice_provider: Option<String>,
    pub system_prompt: String,
    pub language: String,
    pub tools: Vec<String>,
    pub timezone: String,
    pub business_hours: BusinessHours,
    pub after_hours_behavior: String,
    pub after_hours_message: Option<String>,
    pub default_slot_duration: u32,
    pub max_slot_appointments: u32,
    pub buffer_time: u32,
    pub blocked_dates: Vec<NaiveDate>,
    pub invitees: Vec<Invitee>,
    pub booking_enabled: bool,
    pub ordering_enabled: bool,
}

impl NewAgent {
    pub fn with_defaults(
        name: impl Into<String>,
        greeting: Option<&str>,
        system_prompt: Option<&str>,
        creator_email: &str,
    ) -> Self {
        Self {
            name: name.into().trim().to_string(),
            business_name: None,
            phone_number: None,
            greeting: non_blank(greeting).unwrap_or(DEFAULT_GREETING).to_string(),
            voice_model: DEFAULT_VOICE_MODEL.to_string(),
            voice_provider: None,
            system_prompt: non_blank(system_prompt).unwrap_or(DEFAULT_SYSTEM_PROMPT).to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            tools: Vec::new(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            business_hours: BusinessHours::default(),
            after_hours_behavior: DEFAULT_AFTER_HOURS_BEHAVIOR.to_string(),
            after_hours_message: None,
            default_slot_duration: DEFAULT_SLOT_DURATION_MINUTES,
            max_slot_appointments: DEFAULT_MAX_SLOT_APPOINTMENTS,
            buffer_time: DEFAULT_BUFFER_MINUTES,
            blocked_dates: Vec::new(),
            invitees: vec![Invitee::always(creator_email)],
            booking_enabled: true,
            ordering_enabled: true,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.is_empty() {
            return Err(DomainError::invalid("name", "must not be empty"));
        }
        validate_timezone(&self.timezone)?;
        self.business_hours.validate()?;
        validate_invitees(&self.invitees)?;
        Ok(())
    }

    pub fn into_agent(self, id: AgentId, now: DateTime<Utc>) -> Agent {
        Agent {
            id,
            name: self.name,
            business_name: self.business_name,
            phone_number: self.phone_number,
            greeting: self.greeting,
            voice_model: self.voice_model,
            voice_provider: self.voice_provider,
            system_prompt: self.system_prompt,
            language: self.language,
            tools: self.tools,
            calendar_id: None,
            timezone: self.timezone,
            business_hours: self.business_hours,
            after_hours_behavior: self.after_hours_behavior,
            after_hours_message: self.after_hours_message,
            default_slot_duration: self.default_slot_duration,
            max_slot_appointments: self.max_slot_appointments,
            buffer_time: self.buffer_time,
            blocked_dates: self.blocked_dates,
            invitees: self.invitees,
            booking_enabled: self.booking_enabled,
            ordering_enabled: self.ordering_enabled,
            closed: false,
            closed_message: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update; only present fields are applied.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentPatch {
    pub name: Option<String>,
    pub business_name: Option<String>,
    pub greeting: Option<String>,
    pub voice_model: Option<String>,
    pub voice_provider: Option<String>,
    pub system_prompt: Option<String>,
    pub language: Option<String>,
    pub tools: Option<Vec<String>>,
    pub timezone: Option<String>,
    pub business_hours: Option<BusinessHours>,
    pub after_hours_behavior: Option<String>,
    pub after_hours_message: Option<String>,
    pub default_slot_duration: Option<u32>,
    pub max_slot_appointments: Option<u32>,
    pub buffer_time: Option<u32>,
    pub blocked_dates: Option<Vec<NaiveDate>>,
    pub invitees: Option<Vec<Invitee>>,
    pub booking_enabled: Option<bool>,
    pub ordering_enabled: Option<bool>,
    pub closed: Option<bool>,
    pub closed_message: Option<String>,
}

impl AgentPatch {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(DomainError::invalid("name", "must not be empty"));
            }
        }
        if let Some(duration) = self.default_slot_duration {
            if duration < MIN_SLOT_DURATION_MINUTES {
                return Err(DomainError::invalid(
                    "default_slot_duration",
                    format!("must be at least {MIN_SLOT_DURATION_MINUTES} minutes"),
                ));
            }
        }
        if self.max_slot_appointments == Some(0) {
            return Err(DomainError::invalid("max_slot_appointments", "must be at least 1"));
        }
        if let Some(timezone) = &self.timezone {
            validate_timezone(timezone)?;
        }
        if let Some(hours) = &self.business_hours {
            hours.validate()?;
        }
        if let Some(invitees) = &self.invitees {
            validate_invitees(invitees)?;
        }
        Ok(())
    }

    pub fn apply_to(self, agent: &mut Agent, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            agent.name = name.trim().to_string();
        }
        if let Some(business_name) = self.business_name {
            agent.business_name = Some(business_name);
        }
        if let Some(greeting) = self.greeting {
            agent.greeting = greeting;
        }
        if let Some(voice_model) = self.voice_model {
            agent.voice_model = voice_model;
        }
        if let Some(voice_provider) = self.voice_provider {
            agent.voice_provider = Some(voice_provider);
        }
        if let Some(system_prompt) = self.system_prompt {
            agent.system_prompt = system_prompt;
        }
        if let Some(language) = self.language {
            agent.language = language;
        }
        if let Some(tools) = self.tools {
            agent.tools = tools;
        }
        if let Some(timezone) = self.timezone {
            agent.timezone = timezone;
        }
        if let Some(business_hours) = self.business_hours {
            agent.business_hours = business_hours;
        }
        if let Some(behavior) = self.after_hours_behavior {
            agent.after_hours_behavior = behavior;
        }
        if let Some(message) = self.after_hours_message {
            agent.after_hours_message = Some(message);
        }
        if let Some(duration) = self.default_slot_duration {
            agent.default_slot_duration = duration;
        }
        if let Some(max) = self.max_slot_appointments {
            agent.max_slot_appointments = max;
        }
        if let Some(buffer) = self.buffer_time {
            agent.buffer_time = buffer;
        }
        if let Some(blocked_dates) = self.blocked_dates {
            agent.blocked_dates = blocked_dates;
        }
        if let Some(invitees) = self.invitees {
            agent.invitees = invitees;
        }
        if let Some(booking_enabled) = self.booking_enabled {
            agent.booking_enabled = booking_enabled;
        }
        if let Some(ordering_enabled) = self.ordering_enabled {
            agent.ordering_enabled = ordering_enabled;
        }
        if let Some(closed) = self.closed {
            agent.closed = closed;
        }
        if let Some(message) = self.closed_message {
            agent.closed_message = Some(message);
        }
        agent.updated_at = now;
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub fn validate_timezone(timezone: &str) -> Result<(), DomainError> {
    timezone
        .parse::<Tz>()
        .map(|_| ())
        .map_err(|_| DomainError::invalid("timezone", format!("`{timezone}` is not an IANA zone")))
}

fn validate_invitees(invitees: &[Invitee]) -> Result<(), DomainError> {
    for invitee in invitees {
        let email = invitee.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(DomainError::invalid(
                "invitees",
                format!("`{}` is not an email address", invitee.email),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveTime, TimeZone, Utc, Weekday};

    use super::{
        AgentId, AgentPatch, AgentRole, BusinessHours, DayHours, Invitee, NewAgent,
        DEFAULT_GREETING, DEFAULT_SYSTEM_PROMPT,
    };
    use crate::errors::DomainError;

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).single().expect("valid timestamp")
    }

    #[test]
    fn new_agent_starts_with_creation_defaults() {
        let draft = NewAgent::with_defaults("Front Desk", None, Some("   "), "owner@example.com");

        assert_eq!(draft.greeting, DEFAULT_GREETING);
        assert_eq!(draft.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert!(draft.tools.is_empty());
        assert_eq!(draft.default_slot_duration, 30);
        assert_eq!(draft.max_slot_appointments, 1);
        assert_eq!(draft.buffer_time, 10);
        assert!(draft.booking_enabled);
        assert_eq!(draft.invitees, vec![Invitee::always("owner@example.com")]);
        assert_eq!(draft.invitees[0].availability, "always");

        let hours = &draft.business_hours;
        for weekday in [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri] {
            assert_eq!(hours.day(weekday), &DayHours::open("09:00", "17:00"));
        }
        assert_eq!(hours.saturday, DayHours::closed());
        assert_eq!(hours.sunday.open, "");
    }

    #[test]
    fn into_agent_is_active_and_open() {
        let agent = NewAgent::with_defaults("Front Desk", Some("Hi there"), None, "a@b.co")
            .into_agent(AgentId("agent-1".to_string()), now());

        assert!(agent.active);
        assert!(!agent.closed);
        assert!(agent.calendar_id.is_none());
        assert_eq!(agent.greeting, "Hi there");
        assert!(agent.has_custom_greeting());
        assert!(!agent.has_custom_prompt());
        assert_eq!(agent.company_label(), "the business");
    }

    #[test]
    fn business_hours_window_parses_enabled_days_only() {
        let hours = BusinessHours::default();
        let (open, close) = hours.monday.window().expect("monday is open");
        assert_eq!(open, NaiveTime::from_hms_opt(9, 0, 0).expect("time"));
        assert_eq!(close, NaiveTime::from_hms_opt(17, 0, 0).expect("time"));
        assert!(hours.sunday.window().is_none());
    }

    #[test]
    fn business_hours_reject_inverted_window() {
        let mut hours = BusinessHours::default();
        hours.tuesday = DayHours::open("18:00", "08:00");

        let error = hours.validate().expect_err("inverted window should fail");
        assert!(matches!(error, DomainError::InvalidField { field: "business_hours", .. }));
    }

    #[test]
    fn business_hours_round_trip_as_weekday_keyed_json() {
        let json = serde_json::to_value(BusinessHours::default()).expect("serialize");
        assert_eq!(json["monday"]["open"], "09:00");
        assert_eq!(json["saturday"]["enabled"], false);
    }

    #[test]
    fn patch_validation_enforces_slot_settings() {
        let zero_cap = AgentPatch { max_slot_appointments: Some(0), ..AgentPatch::default() };
        assert!(zero_cap.validate().is_err());

        let tiny_slot = AgentPatch { default_slot_duration: Some(2), ..AgentPatch::default() };
        assert!(tiny_slot.validate().is_err());

        let bad_zone = AgentPatch { timezone: Some("Mars/Olympus".into()), ..AgentPatch::default() };
        assert!(bad_zone.validate().is_err());

        let bad_invitee = AgentPatch {
            invitees: Some(vec![Invitee::always("nobody")]),
            ..AgentPatch::default()
        };
        assert!(bad_invitee.validate().is_err());
    }

    #[test]
    fn patch_applies_only_present_fields() {
        let mut agent = NewAgent::with_defaults("Front Desk", None, None, "a@b.co")
            .into_agent(AgentId("agent-1".to_string()), now());
        let patch = AgentPatch {
            booking_enabled: Some(false),
            max_slot_appointments: Some(3),
            ..AgentPatch::default()
        };

        patch.validate().expect("valid patch");
        patch.apply_to(&mut agent, now());

        assert!(!agent.booking_enabled);
        assert_eq!(agent.max_slot_appointments, 3);
        assert_eq!(agent.buffer_time, 10);
        assert_eq!(agent.name, "Front Desk");
    }

    #[test]
    fn unknown_patch_fields_are_rejected() {
        let result = serde_json::from_str::<AgentPatch>(r#"{"max_daily_appointments": 5}"#);
        assert!(result.is_err());
    }

    #[test]
    fn roles_gate_editing() {
        assert!(AgentRole::Owner.can_edit());
        assert!(AgentRole::Editor.can_edit());
        assert!(!AgentRole::Viewer.can_edit());
        assert_eq!("Editor".parse::<AgentRole>().expect("role"), AgentRole::Editor);
        assert!("admin".parse::<AgentRole>().is_err());
    }
}
