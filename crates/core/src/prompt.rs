//! System prompt and greeting assembly for an agent.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tera::{Context, Tera};
use thiserror::Error;

use crate::domain::agent::{weekday_name, Agent, BusinessHours, DEFAULT_VOICE_MODEL};
use crate::domain::booking::BookingRecord;
use crate::domain::conversation::Conversation;
use crate::domain::order::{Order, OrderItem};

const SYSTEM_PROMPT_TEMPLATE: &str = "system_prompt.txt";
const ORDER_LINES_SHOWN: usize = 3;
const DEFAULT_CLOSED_MESSAGE: &str =
    "The business is currently closed. Let callers know, take a short message if they want, and do not make bookings or orders.";

pub const BOOKING_DISABLED_INFO: &str = "\n\nCALENDAR BOOKING:\nBooking and appointments are not allowed at the moment. Please inform customers that appointment scheduling is currently unavailable.";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt template error: {0}")]
    Template(#[from] tera::Error),
}

/// Renders agent system prompts from the bundled template.
pub struct PromptBuilder {
    tera: Tera,
}

impl PromptBuilder {
    pub fn new() -> Result<Self, PromptError> {
        let mut tera = Tera::default();
        tera.add_raw_template(
            SYSTEM_PROMPT_TEMPLATE,
            include_str!("../../../templates/prompt/system_prompt.txt"),
        )?;
        Ok(Self { tera })
    }

    pub fn system_prompt(&self, agent: &Agent, today: NaiveDate) -> Result<String, PromptError> {
        self.system_prompt_for_caller(agent, today, None)
    }

    /// System prompt with the returning caller's history appended.
    pub fn system_prompt_for_caller(
        &self,
        agent: &Agent,
        today: NaiveDate,
        caller_context: Option<&str>,
    ) -> Result<String, PromptError> {
        let company = agent.company_label();
        let mut context = Context::new();
        context.insert("identity", &build_identity(agent, company));
        context.insert("current_date", &today.format("%A, %B %d, %Y").to_string());
        context.insert("calendar_info", &build_calendar_info(agent));
        context.insert("ordering_enabled", &agent.ordering_enabled);
        context.insert("closed", &agent.closed);
        context.insert(
            "closed_message",
            agent
                .closed_message
                .as_deref()
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .unwrap_or(DEFAULT_CLOSED_MESSAGE),
        );
        let caller_context = caller_context.map(str::trim).filter(|text| !text.is_empty());
        context.insert("caller_context", &caller_context);

        let rendered = self.tera.render(SYSTEM_PROMPT_TEMPLATE, &context)?;
        Ok(rendered.trim_end().to_string())
    }
}

/// What is already known about a caller from earlier contact with the agent.
#[derive(Clone, Debug, Default)]
pub struct CallerHistory {
    /// Summarised earlier conversations, newest first.
    pub past_calls: Vec<Conversation>,
    /// Earlier orders with their lines, newest first.
    pub orders: Vec<(Order, Vec<OrderItem>)>,
    /// Confirmed bookings still ahead, soonest first.
    pub appointments: Vec<BookingRecord>,
}

impl CallerHistory {
    pub fn is_empty(&self) -> bool {
        self.past_calls.is_empty() && self.orders.is_empty() && self.appointments.is_empty()
    }
}

fn days_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    match (now - then).num_days() {
        days if days <= 0 => "today".to_string(),
        1 => "1 day ago".to_string(),
        days => format!("{days} days ago"),
    }
}

/// Prompt block describing a returning caller, or `None` for a first-time
/// caller. Appointment times are shown in the agent's timezone.
pub fn build_caller_context(history: &CallerHistory, tz: Tz, now: DateTime<Utc>) -> Option<String> {
    if history.is_empty() {
        return None;
    }

    let mut sections = Vec::new();
    if !history.past_calls.is_empty() {
        let mut text = format!(
            "HISTORICAL CONVERSATIONS, may include the caller's name (last {}):",
            history.past_calls.len()
        );
        for (index, call) in history.past_calls.iter().enumerate() {
            let summary = call.summary.as_deref().unwrap_or_default().trim();
            text.push_str(&format!("\n{}. {}: {summary}", index + 1, days_ago(call.started_at, now)));
            text.push_str(&format!("\n   Type: {}", call.conversation_type.as_str()));
        }
        sections.push(text);
    }

    if !history.orders.is_empty() {
        let mut text = format!("ORDER HISTORY (last {} orders):", history.orders.len());
        for (index, (order, items)) in history.orders.iter().enumerate() {
            text.push_str(&format!(
                "\n{}. {} - ${:.2} ({})",
                index + 1,
                days_ago(order.created_at, now),
                order.total_price,
                order.status.as_str()
            ));
            for item in items.iter().take(ORDER_LINES_SHOWN) {
                text.push_str(&format!("\n   • {}x {} @ ${:.2}", item.quantity, item.name, item.price));
            }
            if items.len() > ORDER_LINES_SHOWN {
                text.push_str(&format!("\n   ... and {} more items", items.len() - ORDER_LINES_SHOWN));
            }
        }
        sections.push(text);
    }

    if !history.appointments.is_empty() {
        let mut text = String::from("CUSTOMER'S UPCOMING APPOINTMENTS:");
        for booking in &history.appointments {
            let start = booking.start_time.with_timezone(&tz).format("%A, %B %d at %I:%M %p");
            text.push_str(&format!("\n- ID: {} | {start} | {}", booking.external_event_id, booking.summary));
        }
        text.push_str("\nCustomer can reference these by ID for cancellation or rescheduling.");
        sections.push(text);
    }

    Some(format!("CALLER HISTORY:\n{}", sections.join("\n\n")))
}

/// Display name taken from the third segment of a voice model id such as
/// `aura-2-thalia-en`.
pub fn voice_name(voice_model: &str) -> String {
    let model = if voice_model.trim().is_empty() { DEFAULT_VOICE_MODEL } else { voice_model };
    match model.split('-').nth(2).filter(|segment| !segment.is_empty()) {
        Some(segment) => capitalize(segment),
        None => "Assistant".to_string(),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

pub fn build_identity(agent: &Agent, company: &str) -> String {
    if agent.has_custom_prompt() {
        return agent.system_prompt.clone();
    }
    format!(
        "You are {}, a friendly and professional representative for {company}. Your role is to assist customers with their inquiries, provide information about services, and help with general business questions.",
        voice_name(&agent.voice_model)
    )
}

pub fn build_greeting(agent: &Agent, company: &str) -> String {
    if agent.has_custom_greeting() {
        return agent.greeting.clone();
    }
    format!("Hello! I'm {} from {company}. How can I help you today?", agent.name)
}

pub fn build_calendar_info(agent: &Agent) -> String {
    if !agent.booking_enabled {
        return BOOKING_DISABLED_INFO.to_string();
    }

    let mut info = String::from("\n\nCALENDAR BOOKING INFORMATION:");
    if let Some(hours) = describe_business_hours(&agent.business_hours, &agent.timezone) {
        info.push_str("\n- Business Hours: ");
        info.push_str(&hours);
    }
    if agent.default_slot_duration > 0 {
        info.push_str(&format!(
            "\n- Default appointment duration: {} minutes",
            agent.default_slot_duration
        ));
    }
    if agent.buffer_time > 0 {
        info.push_str(&format!(
            "\n- Buffer time between appointments: {} minutes",
            agent.buffer_time
        ));
    }
    if agent.max_slot_appointments <= 1 {
        info.push_str("\n- Overbooking policy: No overlapping appointments allowed (maximum 1 appointment per time slot)");
    } else {
        info.push_str(&format!(
            "\n- Overbooking policy: Maximum {} appointments per time slot",
            agent.max_slot_appointments
        ));
    }
    if !agent.blocked_dates.is_empty() {
        let dates = agent
            .blocked_dates
            .iter()
            .map(|date| date.format("%Y-%m-%d").to_string())
            .collect::<Vec<_>>()
            .join(", ");
        info.push_str(&format!("\n- Unavailable dates: {dates}"));
    }
    if let Some(calendar_id) = agent.calendar_id.as_deref().filter(|id| !id.trim().is_empty()) {
        info.push_str(&format!("\n- Calendar ID: {calendar_id}"));
    }
    info.push_str("\n\nWhen customers request appointments, use the calendar tools to check availability and create bookings within business hours only.");
    info
}

/// "Monday, Tuesday from 09:00 to 17:00 (tz)" when every open day shares the
/// same hours, otherwise one entry per open day.
fn describe_business_hours(hours: &BusinessHours, timezone: &str) -> Option<String> {
    let open_days: Vec<_> = BusinessHours::WEEK
        .iter()
        .map(|weekday| (*weekday, hours.day(*weekday)))
        .filter(|(_, day)| day.window().is_some())
        .collect();
    let (_, first) = open_days.first()?;

    let uniform = open_days.iter().all(|(_, day)| day.open == first.open && day.close == first.close);
    if uniform {
        let names =
            open_days.iter().map(|(weekday, _)| weekday_name(*weekday)).collect::<Vec<_>>();
        return Some(format!(
            "{} from {} to {} ({timezone})",
            names.join(", "),
            first.open,
            first.close
        ));
    }

    let entries = open_days
        .iter()
        .map(|(weekday, day)| format!("{} {}-{}", weekday_name(*weekday), day.open, day.close))
        .collect::<Vec<_>>();
    Some(format!("{} ({timezone})", entries.join(", ")))
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{
        build_calendar_info, build_caller_context, build_greeting, build_identity, voice_name,
        CallerHistory, PromptBuilder, BOOKING_DISABLED_INFO,
    };
    use crate::domain::agent::{Agent, AgentId, DayHours, NewAgent};
    use crate::domain::booking::{BookingRecord, BookingStatus};
    use crate::domain::conversation::{
        Conversation, ConversationId, ConversationStatus, ConversationType,
    };
    use crate::domain::order::{Order, OrderId, OrderItem, OrderStatus, PaymentStatus};

    fn agent() -> Agent {
        let now = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).single().expect("time");
        NewAgent::with_defaults("Riley", None, None, "owner@example.com")
            .into_agent(AgentId("agent-1".into()), now)
    }

    #[test]
    fn disabled_booking_renders_exact_notice() {
        let mut agent = agent();
        agent.booking_enabled = false;
        assert_eq!(
            build_calendar_info(&agent),
            "\n\nCALENDAR BOOKING:\nBooking and appointments are not allowed at the moment. Please inform customers that appointment scheduling is currently unavailable."
        );
        assert_eq!(build_calendar_info(&agent), BOOKING_DISABLED_INFO);
    }

    #[test]
    fn enabled_booking_lists_rules() {
        let mut agent = agent();
        agent.calendar_id = Some("cal-1".into());
        agent.blocked_dates = vec![NaiveDate::from_ymd_opt(2025, 12, 25).expect("date")];

        let info = build_calendar_info(&agent);

        assert!(info.starts_with("\n\nCALENDAR BOOKING INFORMATION:"));
        assert!(info.contains(
            "- Business Hours: Monday, Tuesday, Wednesday, Thursday, Friday from 09:00 to 17:00 (America/New_York)"
        ));
        assert!(info.contains("- Default appointment duration: 30 minutes"));
        assert!(info.contains("- Buffer time between appointments: 10 minutes"));
        assert!(info.contains("maximum 1 appointment per time slot"));
        assert!(info.contains("- Unavailable dates: 2025-12-25"));
        assert!(info.contains("- Calendar ID: cal-1"));
        assert!(info.ends_with("within business hours only."));
    }

    #[test]
    fn overbooking_line_reflects_slot_cap() {
        let mut agent = agent();
        agent.max_slot_appointments = 3;
        agent.buffer_time = 0;
        agent.business_hours.saturday = DayHours::open("10:00", "14:00");

        let info = build_calendar_info(&agent);

        assert!(info.contains("- Overbooking policy: Maximum 3 appointments per time slot"));
        assert!(!info.contains("Buffer time"));
        assert!(info.contains("Saturday 10:00-14:00"));
    }

    #[test]
    fn identity_and_greeting_fall_back_to_defaults() {
        let agent = agent();
        assert_eq!(voice_name(&agent.voice_model), "Thalia");
        assert_eq!(voice_name("custom"), "Assistant");

        let identity = build_identity(&agent, "Luigi's");
        assert!(identity.starts_with("You are Thalia, a friendly and professional representative for Luigi's."));
        assert_eq!(
            build_greeting(&agent, "Luigi's"),
            "Hello! I'm Riley from Luigi's. How can I help you today?"
        );
    }

    #[test]
    fn custom_prompt_and_greeting_are_kept() {
        let mut agent = agent();
        agent.system_prompt = "You book haircuts.".into();
        agent.greeting = "Thanks for calling Fade Shop!".into();

        assert_eq!(build_identity(&agent, "x"), "You book haircuts.");
        assert_eq!(build_greeting(&agent, "x"), "Thanks for calling Fade Shop!");
    }

    #[test]
    fn system_prompt_combines_sections() {
        let mut agent = agent();
        agent.business_name = Some("Luigi's".into());
        agent.closed = true;
        agent.booking_enabled = false;
        let builder = PromptBuilder::new().expect("template");
        let today = NaiveDate::from_ymd_opt(2025, 3, 3).expect("date");

        let prompt = builder.system_prompt(&agent, today).expect("render");

        assert!(prompt.starts_with("You are Thalia"));
        assert!(prompt.contains("Today is Monday, March 03, 2025"));
        assert!(prompt.contains(super::BOOKING_DISABLED_INFO));
        assert!(prompt.contains("ORDERING:"));
        assert!(prompt.contains("BUSINESS CLOSED:"));

        agent.ordering_enabled = false;
        agent.closed = false;
        let prompt = builder.system_prompt(&agent, today).expect("render");
        assert!(!prompt.contains("ORDERING:"));
        assert!(!prompt.contains("BUSINESS CLOSED:"));
    }

    fn past_call(summary: &str, started_at: DateTime<Utc>) -> Conversation {
        Conversation {
            id: ConversationId("conv-1".into()),
            agent_id: AgentId("agent-1".into()),
            session_name: "call-CA1".into(),
            conversation_type: ConversationType::Voice,
            caller_phone: Some("+15550100".into()),
            twilio_sid: Some("CA1".into()),
            status: ConversationStatus::Completed,
            started_at,
            ended_at: Some(started_at + Duration::minutes(3)),
            duration_seconds: Some(180),
            summary: Some(summary.into()),
            active: true,
            created_at: started_at,
        }
    }

    fn past_order(created_at: DateTime<Utc>, lines: &[(&str, u32, i64)]) -> (Order, Vec<OrderItem>) {
        let id = OrderId("order-1".into());
        let items: Vec<OrderItem> = lines
            .iter()
            .enumerate()
            .map(|(index, (name, quantity, cents))| OrderItem {
                id: format!("line-{index}"),
                order_id: id.clone(),
                name: name.to_string(),
                quantity: *quantity,
                price: Decimal::new(*cents, 2),
                note: None,
            })
            .collect();
        let order = Order {
            id,
            agent_id: AgentId("agent-1".into()),
            conversation_id: None,
            customer_phone: Some("+15550100".into()),
            customer_name: Some("Alex".into()),
            status: OrderStatus::Completed,
            total_price: items.iter().map(OrderItem::line_total).sum(),
            pickup_time: None,
            special_requests: None,
            payment_status: PaymentStatus::Paid,
            payment_method: None,
            created_at,
            updated_at: created_at,
        };
        (order, items)
    }

    #[test]
    fn first_time_callers_get_no_history_block() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).single().expect("now");
        assert!(build_caller_context(&CallerHistory::default(), chrono_tz::UTC, now).is_none());

        let builder = PromptBuilder::new().expect("template");
        let prompt = builder
            .system_prompt_for_caller(&agent(), now.date_naive(), Some("  "))
            .expect("render");
        assert!(!prompt.contains("CALLER HISTORY"));
    }

    #[test]
    fn returning_caller_history_is_rendered_into_the_prompt() {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).single().expect("now");
        let start = Utc.with_ymd_and_hms(2025, 6, 4, 13, 30, 0).single().expect("start");
        let history = CallerHistory {
            past_calls: vec![
                past_call("Alex asked about gluten-free crusts.", now - Duration::hours(2)),
                past_call("Alex ordered two pizzas.", now - Duration::days(5)),
            ],
            orders: vec![past_order(
                now - Duration::days(5),
                &[("Margherita", 2, 1250), ("Soda", 1, 199), ("Salad", 1, 899), ("Tiramisu", 1, 650)],
            )],
            appointments: vec![BookingRecord {
                id: "b-1".into(),
                agent_id: AgentId("agent-1".into()),
                external_event_id: "evt-7".into(),
                summary: "Tasting".into(),
                start_time: start,
                end_time: start + Duration::minutes(30),
                phone_number: Some("+15550100".into()),
                status: BookingStatus::Confirmed,
            }],
        };

        let block = build_caller_context(&history, chrono_tz::America::New_York, now).expect("block");

        assert!(block.starts_with("CALLER HISTORY:\n"));
        assert!(block.contains("1. today: Alex asked about gluten-free crusts.\n   Type: voice"));
        assert!(block.contains("2. 5 days ago: Alex ordered two pizzas."));
        assert!(block.contains("ORDER HISTORY (last 1 orders):\n1. 5 days ago - $42.48 (completed)"));
        assert!(block.contains("   • 2x Margherita @ $12.50"));
        assert!(!block.contains("Tiramisu"));
        assert!(block.contains("   ... and 1 more items"));
        assert!(block.contains("- ID: evt-7 | Wednesday, June 04 at 09:30 AM | Tasting"));

        let builder = PromptBuilder::new().expect("template");
        let prompt = builder
            .system_prompt_for_caller(&agent(), now.date_naive(), Some(&block))
            .expect("render");
        assert!(prompt.ends_with("Customer can reference these by ID for cancellation or rescheduling."));
        assert!(prompt.contains("\n\nCALLER HISTORY:\n"));
    }
}
