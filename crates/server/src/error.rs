use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rollwise_agent::{BookingError, CalendarError};
use rollwise_core::errors::DomainError;
use rollwise_db::repositories::RepositoryError;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Error answer of every JSON endpoint: a status and `{"error": ...}`.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, body: ErrorBody { error: message.into(), details: None } }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.body.details = Some(details);
        self
    }

    pub fn message(&self) -> &str {
        &self.body.error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(message) => Self::conflict(message),
            other => {
                error!(event_name = "api.repository_error", error = %other, "repository call failed");
                Self::internal("database error")
            }
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::AgentNotFound => Self::not_found(value.to_string()),
            other => Self::bad_request(other.to_string()),
        }
    }
}

impl From<BookingError> for ApiError {
    fn from(value: BookingError) -> Self {
        match value {
            BookingError::Domain(error) => error.into(),
            BookingError::SlotUnavailable { alternatives } => {
                let suggested = serde_json::to_value(&alternatives).unwrap_or(Value::Null);
                Self::conflict("Requested time slot is not available")
                    .with_details(serde_json::json!({ "suggested_alternatives": suggested }))
            }
            BookingError::Calendar(CalendarError::NotFound(event_id)) => {
                Self::not_found(format!("Calendar event {event_id} not found"))
            }
            BookingError::Calendar(error) => {
                error!(event_name = "api.calendar_error", error = %error, "calendar vendor call failed");
                Self::new(StatusCode::BAD_GATEWAY, "calendar provider error")
            }
            BookingError::Repository(error) => error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use rollwise_agent::{BookingError, CalendarError};
    use rollwise_core::errors::DomainError;
    use rollwise_db::repositories::RepositoryError;

    use super::ApiError;

    #[test]
    fn domain_errors_map_to_client_statuses() {
        let missing = ApiError::from(DomainError::AgentNotFound);
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let gated = ApiError::from(BookingError::Domain(DomainError::BookingDisabled));
        assert_eq!(gated.status, StatusCode::BAD_REQUEST);
        assert_eq!(gated.message(), "Calendar booking is disabled for this agent");
    }

    #[test]
    fn vendor_and_storage_failures_hide_details() {
        let vendor = ApiError::from(BookingError::Calendar(CalendarError::Transport("reset".into())));
        assert_eq!(vendor.status, StatusCode::BAD_GATEWAY);
        assert_eq!(vendor.message(), "calendar provider error");

        let storage = ApiError::from(RepositoryError::Decode("bad row".into()));
        assert_eq!(storage.status, StatusCode::INTERNAL_SERVER_ERROR);

        let taken = ApiError::from(RepositoryError::Conflict("phone number already in use".into()));
        assert_eq!(taken.status, StatusCode::CONFLICT);
    }

    #[test]
    fn full_slot_carries_alternatives() {
        let error = ApiError::from(BookingError::SlotUnavailable { alternatives: Vec::new() });
        assert_eq!(error.status, StatusCode::CONFLICT);
        assert_eq!(
            error.body.details.map(|details| details["suggested_alternatives"].clone()),
            Some(serde_json::json!([]))
        );
    }
}
