use thiserror::Error;

/// Rule violations raised by domain types and agent services. Messages are
/// written for callers and are safe to surface in API responses and tool
/// results.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("Agent not found")]
    AgentNotFound,
    #[error("Agent does not have a calendar configured")]
    CalendarNotConfigured,
    #[error("Calendar booking is disabled for this agent")]
    BookingDisabled,
    #[error("Ordering is disabled for this agent")]
    OrderingDisabled,
    #[error("Cancelled appointments cannot be updated")]
    EventCancelled,
    #[error("unknown {kind} `{value}`")]
    UnknownVariant { kind: &'static str, value: String },
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField { field, reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::DomainError;

    #[test]
    fn field_errors_name_the_field() {
        let error = DomainError::invalid("buffer_time", "must not be negative");
        assert_eq!(error.to_string(), "invalid buffer_time: must not be negative");
    }

    #[test]
    fn gate_messages_read_as_sentences() {
        assert_eq!(
            DomainError::BookingDisabled.to_string(),
            "Calendar booking is disabled for this agent"
        );
        assert_eq!(DomainError::OrderingDisabled.to_string(), "Ordering is disabled for this agent");
        assert_eq!(
            DomainError::EventCancelled.to_string(),
            "Cancelled appointments cannot be updated"
        );
    }
}
