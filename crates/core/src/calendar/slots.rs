use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::calendar::local_to_utc;
use crate::domain::agent::{Agent, BusinessHours};
use crate::domain::booking::BookedInterval;

/// Booking settings of one agent, resolved for slot generation.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotRules {
    pub business_hours: BusinessHours,
    pub timezone: Tz,
    pub slot_minutes: u32,
    pub buffer_minutes: u32,
    pub max_per_slot: u32,
    pub blocked_dates: Vec<NaiveDate>,
}

impl SlotRules {
    pub fn from_agent(agent: &Agent) -> Self {
        Self {
            business_hours: agent.business_hours.clone(),
            timezone: agent.tz(),
            slot_minutes: agent.default_slot_duration.max(1),
            buffer_minutes: agent.buffer_time,
            max_per_slot: agent.max_slot_appointments.max(1),
            blocked_dates: agent.blocked_dates.clone(),
        }
    }

    fn is_blocked(&self, date: NaiveDate) -> bool {
        self.blocked_dates.contains(&date)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub duration_minutes: u32,
}

impl Slot {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let start = self.start.with_timezone(&Utc);
        let end = self.end.with_timezone(&Utc);
        start <= instant && instant < end
    }
}

/// Open slots of `duration_minutes` (the agent default when `None`) inside
/// `[window_start, window_end]`.
///
/// Candidates start at each enabled day's opening time and step by the slot
/// length plus the buffer, as long as they end by closing time. Candidates on
/// blocked dates, in the past, or already holding `max_per_slot` overlapping
/// bookings are left out.
pub fn available_slots(
    rules: &SlotRules,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    duration_minutes: Option<u32>,
    booked: &[BookedInterval],
    now: DateTime<Utc>,
) -> Vec<Slot> {
    let minutes = duration_minutes.filter(|minutes| *minutes > 0).unwrap_or(rules.slot_minutes);
    let length = Duration::minutes(i64::from(minutes));
    let step = length + Duration::minutes(i64::from(rules.buffer_minutes));
    let tz = rules.timezone;

    let mut slots = Vec::new();
    if window_end <= window_start {
        return slots;
    }

    let first_day = window_start.with_timezone(&tz).date_naive();
    let last_day = window_end.with_timezone(&tz).date_naive();

    for day in first_day.iter_days().take_while(|day| *day <= last_day) {
        if rules.is_blocked(day) {
            continue;
        }
        let Some((open, close)) = rules.business_hours.day(day.weekday()).window() else {
            continue;
        };
        let (Some(opens_at), Some(closes_at)) =
            (local_to_utc(tz, day, open), local_to_utc(tz, day, close))
        else {
            continue;
        };

        let mut start = opens_at;
        while start + length <= closes_at {
            let end = start + length;
            let in_window = start >= window_start && end <= window_end;
            if in_window && start >= now {
                let overlapping =
                    booked.iter().filter(|interval| interval.overlaps(start, end)).count();
                if overlapping < rules.max_per_slot as usize {
                    slots.push(Slot {
                        start: start.with_timezone(&tz).fixed_offset(),
                        end: end.with_timezone(&tz).fixed_offset(),
                        duration_minutes: minutes,
                    });
                }
            }
            start += step;
        }
    }
    slots
}

pub fn is_slot_available(slots: &[Slot], start: DateTime<Utc>) -> bool {
    slots.iter().any(|slot| slot.contains(start))
}
