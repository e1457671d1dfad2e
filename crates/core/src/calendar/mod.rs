//! Booking rules shared by the calendar tools and the calendar API.
//!
//! Everything here is pure: callers fetch the agent and the booked intervals,
//! then decide what to send to the calendar vendor.

pub mod slots;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::domain::agent::{Agent, Invitee};
use crate::errors::DomainError;

pub use slots::{available_slots, is_slot_available, Slot, SlotRules};

/// Alternatives offered when a requested start is taken.
pub const MAX_ALTERNATIVE_SLOTS: usize = 5;
/// Days searched for alternatives, starting at the requested day.
pub const ALTERNATIVE_SEARCH_DAYS: i64 = 7;
/// Slots returned alongside an event listing.
pub const MAX_LISTED_SLOTS: usize = 20;
/// Event length used when a create request gives no end time.
pub const DEFAULT_EVENT_MINUTES: i64 = 60;

/// Attendee emails for a new or updated event: the agent's default invitees in
/// stored order, then the explicit attendees. Blank entries are dropped and
/// only the first occurrence of an address is kept.
pub fn merge_invitees(defaults: &[Invitee], attendees: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(defaults.len() + attendees.len());
    let candidates = defaults
        .iter()
        .map(|invitee| invitee.email.as_str())
        .chain(attendees.iter().map(String::as_str));

    for email in candidates {
        let email = email.trim();
        if email.is_empty() || merged.iter().any(|existing| existing == email) {
            continue;
        }
        merged.push(email.to_string());
    }
    merged
}

pub fn ensure_booking_enabled(agent: &Agent) -> Result<(), DomainError> {
    if agent.booking_enabled {
        Ok(())
    } else {
        Err(DomainError::BookingDisabled)
    }
}

pub fn ensure_calendar_configured(agent: &Agent) -> Result<&str, DomainError> {
    agent
        .calendar_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(DomainError::CalendarNotConfigured)
}

/// Length of an existing event. Used to keep the duration when an update only
/// moves the start.
pub fn duration_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    let duration = end - start;
    if duration <= Duration::zero() {
        Duration::minutes(DEFAULT_EVENT_MINUTES)
    } else {
        duration
    }
}

/// UTC bounds covering whole local days, from `start_date` 00:00:00 through
/// `end_date` 23:59:59 in `tz`.
pub fn local_day_bounds(
    tz: Tz,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<(DateTime<Utc>, DateTime<Utc>), DomainError> {
    if start_date > end_date {
        return Err(DomainError::invalid("end_date", "must not be before start_date"));
    }
    let start = local_to_utc(tz, start_date, NaiveTime::default())
        .ok_or_else(|| DomainError::invalid("start_date", "does not exist in the agent timezone"))?;
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default();
    let end = local_to_utc(tz, end_date, end_of_day)
        .ok_or_else(|| DomainError::invalid("end_date", "does not exist in the agent timezone"))?;
    Ok((start, end))
}

/// Resolves a wall-clock time, taking the earlier instant when a DST fold makes
/// it ambiguous and `None` when a DST gap skips it.
pub fn local_to_utc(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&date.and_time(time)).earliest().map(|local| local.with_timezone(&Utc))
}

/// Parses an RFC 3339 timestamp, or a naive `YYYY-MM-DDTHH:MM[:SS]` read in the
/// agent's timezone.
pub fn parse_event_time(raw: &str, tz: Tz) -> Result<DateTime<Utc>, DomainError> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, format) {
            return local_to_utc(tz, naive.date(), naive.time()).ok_or_else(|| {
                DomainError::invalid("start_time", format!("`{raw}` does not exist in {tz}"))
            });
        }
    }
    Err(DomainError::invalid("start_time", format!("`{raw}` is not an ISO 8601 timestamp")))
}
