use serde_json::{json, Value};

use rollwise_core::domain::agent::Agent;

use crate::tools::HANGUP_TOOL;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailIntent {
    CalendarRead { tool: String },
    CalendarWrite { tool: String },
    OrderRead { tool: String },
    OrderWrite { tool: String },
    EndCall,
    Unclassified { tool: String },
}

impl GuardrailIntent {
    /// Classifies a tool call requested by the model.
    pub fn from_tool(name: &str) -> Self {
        let tool = name.to_string();
        match name {
            HANGUP_TOOL => Self::EndCall,
            "search_calendar_events" | "list_calendar_events" => Self::CalendarRead { tool },
            "create_calendar_event" | "cancel_calendar_event" | "update_calendar_event" => {
                Self::CalendarWrite { tool }
            }
            "list_menu_items" => Self::OrderRead { tool },
            "create_order" | "add_order_item" => Self::OrderWrite { tool },
            _ => Self::Unclassified { tool },
        }
    }

    pub fn tool_name(&self) -> &str {
        match self {
            Self::CalendarRead { tool }
            | Self::CalendarWrite { tool }
            | Self::OrderRead { tool }
            | Self::OrderWrite { tool }
            | Self::Unclassified { tool } => tool,
            Self::EndCall => HANGUP_TOOL,
        }
    }

    pub fn action_key(&self) -> &'static str {
        match self {
            Self::CalendarRead { .. } => "calendar.read",
            Self::CalendarWrite { .. } => "calendar.write",
            Self::OrderRead { .. } => "order.read",
            Self::OrderWrite { .. } => "order.write",
            Self::EndCall => "call.end",
            Self::Unclassified { .. } => "tool.unclassified",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String, fallback_path: &'static str },
    Degrade { reason_code: &'static str, user_message: String, fallback_path: &'static str },
}

impl GuardrailDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Result handed back to the model in place of running a blocked tool.
    pub fn tool_payload(&self) -> Option<Value> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, user_message, fallback_path }
            | Self::Degrade { reason_code, user_message, fallback_path } => Some(json!({
                "success": false,
                "error": user_message,
                "reason_code": reason_code,
                "fallback_path": fallback_path,
            })),
        }
    }

    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason_code, .. } | Self::Degrade { reason_code, .. } => Some(*reason_code),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub allow_unclassified_tools: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { allow_unclassified_tools: true }
    }
}

impl GuardrailPolicy {
    pub fn evaluate(&self, intent: &GuardrailIntent, agent: &Agent) -> GuardrailDecision {
        if agent.closed && *intent != GuardrailIntent::EndCall {
            return GuardrailDecision::Degrade {
                reason_code: "business_closed",
                user_message: agent
                    .closed_message
                    .as_deref()
                    .map(str::trim)
                    .filter(|message| !message.is_empty())
                    .unwrap_or("The business is currently closed. Offer to take a message instead.")
                    .to_string(),
                fallback_path: "take_message",
            };
        }

        match intent {
            GuardrailIntent::CalendarWrite { .. } if !agent.booking_enabled => {
                GuardrailDecision::Deny {
                    reason_code: "booking_disabled",
                    user_message: "Calendar booking is disabled for this agent".to_string(),
                    fallback_path: "inform_scheduling_unavailable",
                }
            }
            GuardrailIntent::OrderWrite { .. } if !agent.ordering_enabled => {
                GuardrailDecision::Deny {
                    reason_code: "ordering_disabled",
                    user_message: "Ordering is disabled for this agent".to_string(),
                    fallback_path: "inform_ordering_unavailable",
                }
            }
            GuardrailIntent::Unclassified { .. } if !self.allow_unclassified_tools => {
                GuardrailDecision::Deny {
                    reason_code: "tool_not_permitted",
                    user_message: "That action is not available on this line.".to_string(),
                    fallback_path: "answer_without_tools",
                }
            }
            _ => GuardrailDecision::Allow,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use rollwise_core::domain::agent::{Agent, AgentId, NewAgent};

    use super::{GuardrailDecision, GuardrailIntent, GuardrailPolicy};

    fn agent() -> Agent {
        NewAgent::with_defaults("Front Desk", None, None, "owner@example.com")
            .into_agent(AgentId("agent-1".into()), Utc::now())
    }

    #[test]
    fn open_agent_allows_everything() {
        let policy = GuardrailPolicy::default();
        for tool in ["create_calendar_event", "add_order_item", "hangup_function", "lookup_weather"] {
            assert_eq!(policy.evaluate(&GuardrailIntent::from_tool(tool), &agent()), GuardrailDecision::Allow);
        }
    }

    #[test]
    fn booking_disabled_denies_calendar_writes_only() {
        let mut agent = agent();
        agent.booking_enabled = false;
        let policy = GuardrailPolicy::default();

        let write = policy.evaluate(&GuardrailIntent::from_tool("cancel_calendar_event"), &agent);
        assert_eq!(write.reason_code(), Some("booking_disabled"));
        assert_eq!(
            write.tool_payload().map(|payload| payload["error"].clone()),
            Some("Calendar booking is disabled for this agent".into())
        );

        let read = policy.evaluate(&GuardrailIntent::from_tool("list_calendar_events"), &agent);
        assert!(read.is_allowed());
    }

    #[test]
    fn ordering_disabled_denies_order_writes() {
        let mut agent = agent();
        agent.ordering_enabled = false;

        let decision =
            GuardrailPolicy::default().evaluate(&GuardrailIntent::from_tool("create_order"), &agent);
        assert!(matches!(decision, GuardrailDecision::Deny { reason_code: "ordering_disabled", .. }));
    }

    #[test]
    fn closed_agent_degrades_all_but_hangup() {
        let mut agent = agent();
        agent.closed = true;
        agent.closed_message = Some("Closed for inventory today.".into());
        let policy = GuardrailPolicy::default();

        let (reason_code, user_message, fallback_path) =
            match policy.evaluate(&GuardrailIntent::from_tool("list_menu_items"), &agent) {
                GuardrailDecision::Degrade { reason_code, user_message, fallback_path } => {
                    (reason_code, user_message, fallback_path)
                }
                _ => ("", String::new(), ""),
            };
        assert_eq!(reason_code, "business_closed");
        assert_eq!(user_message, "Closed for inventory today.");
        assert_eq!(fallback_path, "take_message");

        assert!(policy.evaluate(&GuardrailIntent::EndCall, &agent).is_allowed());
    }

    #[test]
    fn unclassified_tools_can_be_locked_down() {
        let policy = GuardrailPolicy { allow_unclassified_tools: false };
        let intent = GuardrailIntent::from_tool("lookup_weather");
        assert_eq!(intent.action_key(), "tool.unclassified");
        assert_eq!(policy.evaluate(&intent, &agent()).reason_code(), Some("tool_not_permitted"));
    }
}
