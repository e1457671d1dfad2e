//! Period-over-period conversation statistics for an agent.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Current reporting period and the equally long period right before it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StatsWindow {
    pub current_start: DateTime<Utc>,
    pub current_end: DateTime<Utc>,
    pub previous_start: DateTime<Utc>,
    pub previous_end: DateTime<Utc>,
    pub period_days: i64,
}

impl StatsWindow {
    /// Whole UTC days from `start` through `end`, each defaulting to `today`.
    pub fn resolve(
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<Self, DomainError> {
        let end_date = end.unwrap_or(today);
        let start_date = start.unwrap_or(end_date);
        if start_date > end_date {
            return Err(DomainError::invalid("start_date", "must not be after end_date"));
        }

        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default();
        let current_start = start_date.and_time(NaiveTime::default()).and_utc();
        let current_end = end_date.and_time(end_of_day).and_utc();
        let length = current_end - current_start;
        let previous_end = current_start - Duration::seconds(1);
        let previous_start = previous_end - length;

        Ok(Self {
            current_start,
            current_end,
            previous_start,
            previous_end,
            period_days: (end_date - start_date).num_days() + 1,
        })
    }
}

/// Raw counts for one period.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeriodStats {
    pub total_conversations: i64,
    pub voice_conversations: i64,
    pub message_conversations: i64,
    pub voice_seconds: i64,
    pub unique_callers: i64,
    pub returning_callers: i64,
    pub new_callers: i64,
}

impl PeriodStats {
    pub fn voice_minutes(&self) -> f64 {
        self.voice_seconds as f64 / 60.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatisticValue {
    pub current: i64,
    pub previous: i64,
    pub change: i64,
    pub change_percent: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MinutesStatistic {
    pub current: f64,
    pub previous: f64,
    pub change: f64,
    pub change_percent: Option<f64>,
}

pub fn compare(current: i64, previous: i64) -> StatisticValue {
    let change = current - previous;
    StatisticValue { current, previous, change, change_percent: percent(change as f64, previous as f64) }
}

pub fn compare_minutes(current: f64, previous: f64) -> MinutesStatistic {
    let change = current - previous;
    MinutesStatistic {
        current: round2(current),
        previous: round2(previous),
        change: round2(change),
        change_percent: percent(change, previous),
    }
}

fn percent(change: f64, previous: f64) -> Option<f64> {
    (previous > 0.0).then(|| round2(change / previous * 100.0))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConversationStats {
    pub all: StatisticValue,
    pub voice: StatisticValue,
    pub messages: StatisticValue,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DurationStats {
    pub all: MinutesStatistic,
    pub voice: MinutesStatistic,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CallerStats {
    pub unique_callers: StatisticValue,
    pub returning_callers: StatisticValue,
    pub new_callers: StatisticValue,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentStatistics {
    pub agent_id: String,
    pub date_range: StatsWindow,
    pub conversations: ConversationStats,
    pub duration_minutes: DurationStats,
    pub callers: CallerStats,
}

impl AgentStatistics {
    pub fn build(
        agent_id: impl Into<String>,
        window: StatsWindow,
        current: PeriodStats,
        previous: PeriodStats,
    ) -> Self {
        // Only voice calls carry a duration today, so both minute series match.
        let minutes = compare_minutes(current.voice_minutes(), previous.voice_minutes());
        Self {
            agent_id: agent_id.into(),
            date_range: window,
            conversations: ConversationStats {
                all: compare(current.total_conversations, previous.total_conversations),
                voice: compare(current.voice_conversations, previous.voice_conversations),
                messages: compare(current.message_conversations, previous.message_conversations),
            },
            duration_minutes: DurationStats { all: minutes, voice: minutes },
            callers: CallerStats {
                unique_callers: compare(current.unique_callers, previous.unique_callers),
                returning_callers: compare(current.returning_callers, previous.returning_callers),
                new_callers: compare(current.new_callers, previous.new_callers),
            },
        }
    }
}
