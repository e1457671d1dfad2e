use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::UnknownVariant {
                kind: "booking status",
                value: other.to_string(),
            }),
        }
    }
}

/// Local mirror of an event held by the calendar vendor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: String,
    pub agent_id: AgentId,
    pub external_event_id: String,
    pub summary: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub phone_number: Option<String>,
    pub status: BookingStatus,
}

/// Half-open interval occupied by a confirmed booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BookedInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BookedInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && start < self.end
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::BookedInterval;

    #[test]
    fn touching_intervals_do_not_overlap() {
        let nine = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).single().expect("time");
        let booked = BookedInterval::new(nine, nine + Duration::minutes(30));

        assert!(booked.overlaps(nine + Duration::minutes(15), nine + Duration::minutes(45)));
        assert!(!booked.overlaps(nine + Duration::minutes(30), nine + Duration::minutes(60)));
        assert!(!booked.overlaps(nine - Duration::minutes(30), nine));
    }
}
