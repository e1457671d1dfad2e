use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::agent::AgentId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Voice,
    Sms,
}

impl ConversationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Sms => "sms",
        }
    }
}

impl std::str::FromStr for ConversationType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "voice" => Ok(Self::Voice),
            // Older rows label text threads as `message`.
            "sms" | "message" => Ok(Self::Sms),
            other => Err(DomainError::UnknownVariant {
                kind: "conversation type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Completed,
    Failed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::UnknownVariant {
                kind: "conversation status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub agent_id: AgentId,
    pub session_name: String,
    pub conversation_type: ConversationType,
    pub caller_phone: Option<String>,
    pub twilio_sid: Option<String>,
    pub status: ConversationStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub summary: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewConversation {
    pub agent_id: AgentId,
    pub session_name: String,
    pub conversation_type: ConversationType,
    pub caller_phone: Option<String>,
    pub twilio_sid: Option<String>,
}

impl Conversation {
    /// Elapsed seconds from start to `ended_at`, never negative.
    pub fn elapsed_seconds(&self, ended_at: DateTime<Utc>) -> i64 {
        (ended_at - self.started_at).num_seconds().max(0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" | "agent" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            other => {
                Err(DomainError::UnknownVariant { kind: "message role", value: other.to_string() })
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: String,
    pub sequence_number: i64,
    pub message_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Started,
    Completed,
    Failed,
}

impl ToolCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ToolCallStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "started" => Ok(Self::Started),
            "completed" | "success" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::UnknownVariant {
                kind: "tool call status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub conversation_id: ConversationId,
    pub tool_name: String,
    pub parameters: Value,
    pub result: Value,
    pub status: ToolCallStatus,
    pub execution_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{
        Conversation, ConversationId, ConversationStatus, ConversationType, MessageRole,
    };
    use crate::domain::agent::AgentId;

    #[test]
    fn legacy_message_type_reads_as_sms() {
        assert_eq!("message".parse::<ConversationType>().expect("type"), ConversationType::Sms);
        assert_eq!("agent".parse::<MessageRole>().expect("role"), MessageRole::Assistant);
        assert!("fax".parse::<ConversationType>().is_err());
    }

    #[test]
    fn elapsed_seconds_clamps_clock_skew() {
        let started_at = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).single().expect("time");
        let conversation = Conversation {
            id: ConversationId("c-1".into()),
            agent_id: AgentId("a-1".into()),
            session_name: "Voice call from +15550001".into(),
            conversation_type: ConversationType::Voice,
            caller_phone: Some("+15550001".into()),
            twilio_sid: Some("CA123".into()),
            status: ConversationStatus::Active,
            started_at,
            ended_at: None,
            duration_seconds: None,
            summary: None,
            active: true,
            created_at: started_at,
        };

        assert_eq!(conversation.elapsed_seconds(started_at + Duration::seconds(95)), 95);
        assert_eq!(conversation.elapsed_seconds(started_at - Duration::seconds(5)), 0);
    }
}
