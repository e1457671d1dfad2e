use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;

use rollwise_core::domain::agent::{Agent, AgentId, AgentRole};
use rollwise_core::domain::booking::{BookedInterval, BookingRecord};
use rollwise_core::domain::conversation::{
    Conversation, ConversationId, ConversationStatus, ConversationType, Message, MessageRole,
    NewConversation, ToolCallRecord,
};
use rollwise_core::domain::order::{
    MenuItem, MenuItemId, MenuItemPatch, NewMenuItem, NewOrder, NewOrderLine, Order, OrderFilter,
    OrderId, OrderItem, OrderItemPatch, OrderPatch, OrderStatus,
};
use rollwise_core::domain::user::{User, UserId};
use rollwise_core::statistics::PeriodStats;

pub mod agent;
pub mod booking;
pub mod conversation;
pub mod memory;
pub mod order;
pub mod statistics;
pub mod user;

pub use agent::SqlAgentRepository;
pub use booking::SqlBookingRepository;
pub use conversation::SqlConversationRepository;
pub use memory::{InMemoryAgentRepository, InMemoryBookingRepository};
pub use order::SqlOrderRepository;
pub use statistics::SqlStatisticsRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

/// A user together with their role on one agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentMember {
    pub user: User,
    pub role: AgentRole,
    pub joined_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;
    /// Creates the user on first login, otherwise refreshes name and subject.
    async fn upsert_by_email(
        &self,
        email: &str,
        name: &str,
        auth_subject: Option<&str>,
    ) -> Result<User, RepositoryError>;
    async fn update_profile(
        &self,
        id: &UserId,
        name: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Option<User>, RepositoryError>;
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Inserts the agent and the owner membership in one transaction.
    async fn create(&self, agent: &Agent, owner: &UserId) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError>;
    async fn find_active(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError>;
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Agent>, RepositoryError>;
    async fn update(&self, agent: &Agent) -> Result<(), RepositoryError>;
    async fn soft_delete(&self, id: &AgentId) -> Result<bool, RepositoryError>;
    async fn set_calendar_id(&self, id: &AgentId, calendar_id: &str)
        -> Result<(), RepositoryError>;
    /// Fails with `Conflict` when another agent already answers the number.
    async fn set_phone_number(
        &self,
        id: &AgentId,
        phone_number: Option<&str>,
    ) -> Result<(), RepositoryError>;

    async fn role_of(
        &self,
        agent_id: &AgentId,
        user_id: &UserId,
    ) -> Result<Option<AgentRole>, RepositoryError>;
    async fn list_members(&self, agent_id: &AgentId) -> Result<Vec<AgentMember>, RepositoryError>;
    async fn add_member(
        &self,
        agent_id: &AgentId,
        user_id: &UserId,
        role: AgentRole,
    ) -> Result<(), RepositoryError>;
    async fn remove_member(
        &self,
        agent_id: &AgentId,
        user_id: &UserId,
    ) -> Result<bool, RepositoryError>;
    async fn owner_count(&self, agent_id: &AgentId) -> Result<i64, RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, conversation: NewConversation) -> Result<Conversation, RepositoryError>;
    async fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError>;
    async fn list_for_agent(
        &self,
        agent_id: &AgentId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Conversation>, RepositoryError>;
    async fn find_by_twilio_sid(
        &self,
        agent_id: &AgentId,
        twilio_sid: &str,
    ) -> Result<Option<Conversation>, RepositoryError>;
    /// Most recent still-active conversation of `kind` with `caller_phone`.
    async fn find_active_for_caller(
        &self,
        agent_id: &AgentId,
        kind: ConversationType,
        caller_phone: &str,
    ) -> Result<Option<Conversation>, RepositoryError>;
    async fn complete(
        &self,
        id: &ConversationId,
        status: ConversationStatus,
        ended_at: DateTime<Utc>,
        duration_seconds: Option<i64>,
    ) -> Result<(), RepositoryError>;
    async fn set_summary(&self, id: &ConversationId, summary: &str) -> Result<(), RepositoryError>;
    /// Summarised conversations of the caller with the agent started at or after
    /// `since`, newest first, optionally leaving one conversation out.
    async fn recent_summaries_for_caller(
        &self,
        agent_id: &AgentId,
        caller_phone: &str,
        since: DateTime<Utc>,
        exclude: Option<&ConversationId>,
        limit: u32,
    ) -> Result<Vec<Conversation>, RepositoryError>;
    /// Appends with the next sequence number of the conversation.
    async fn append_message(
        &self,
        conversation_id: &ConversationId,
        role: MessageRole,
        content: &str,
        message_type: &str,
    ) -> Result<Message, RepositoryError>;
    async fn list_messages(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, RepositoryError>;
    async fn record_tool_call(&self, record: &ToolCallRecord) -> Result<(), RepositoryError>;
    async fn list_tool_calls(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<ToolCallRecord>, RepositoryError>;
}

/// Order line written by `add_item` or `update_item` and the order total after it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddedItem {
    pub item: OrderItem,
    pub order_total: Decimal,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create_order(&self, order: NewOrder) -> Result<Order, RepositoryError>;
    /// Inserts the order with its lines and their summed total in one transaction.
    async fn create_order_with_items(
        &self,
        order: NewOrder,
        status: OrderStatus,
        lines: &[NewOrderLine],
    ) -> Result<Order, RepositoryError>;
    async fn find_order(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;
    async fn list_items(&self, order_id: &OrderId) -> Result<Vec<OrderItem>, RepositoryError>;
    /// The customer's orders with the agent created at or after `since`, newest first.
    async fn recent_orders_for_customer(
        &self,
        agent_id: &AgentId,
        customer_phone: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Order>, RepositoryError>;
    /// Newest first.
    async fn list_for_agent(
        &self,
        agent_id: &AgentId,
        filter: &OrderFilter,
    ) -> Result<Vec<Order>, RepositoryError>;
    async fn update_order(
        &self,
        id: &OrderId,
        patch: OrderPatch,
    ) -> Result<Option<Order>, RepositoryError>;
    async fn update_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
    ) -> Result<Option<Order>, RepositoryError>;
    /// Inserts the line and raises the order total in one transaction.
    async fn add_item(
        &self,
        order_id: &OrderId,
        menu_item: &MenuItem,
        quantity: u32,
        note: Option<&str>,
    ) -> Result<AddedItem, RepositoryError>;
    async fn find_item(&self, item_id: &str) -> Result<Option<OrderItem>, RepositoryError>;
    /// Rewrites the line and recomputes the order total in one transaction.
    async fn update_item(
        &self,
        item_id: &str,
        patch: OrderItemPatch,
    ) -> Result<Option<AddedItem>, RepositoryError>;
    /// Removes the line and returns the recomputed order total, `None` for an unknown line.
    async fn delete_item(&self, item_id: &str) -> Result<Option<Decimal>, RepositoryError>;

    async fn create_menu_item(
        &self,
        agent_id: &AgentId,
        item: NewMenuItem,
    ) -> Result<MenuItem, RepositoryError>;
    async fn list_menu(&self, agent_id: &AgentId) -> Result<Vec<MenuItem>, RepositoryError>;
    async fn find_menu_item(&self, id: &MenuItemId) -> Result<Option<MenuItem>, RepositoryError>;
    /// The item only when it is active and currently available.
    async fn find_available_menu_item(
        &self,
        id: &MenuItemId,
    ) -> Result<Option<MenuItem>, RepositoryError>;
    async fn update_menu_item(
        &self,
        id: &MenuItemId,
        patch: MenuItemPatch,
    ) -> Result<Option<MenuItem>, RepositoryError>;
    async fn delete_menu_item(&self, id: &MenuItemId) -> Result<bool, RepositoryError>;
    /// Flips `available` on an active item.
    async fn toggle_menu_item_availability(
        &self,
        id: &MenuItemId,
    ) -> Result<Option<MenuItem>, RepositoryError>;
    /// Applies the patch to every listed item of the agent in one transaction.
    /// `None` when any id is unknown, retired or owned by another agent; nothing is written then.
    async fn bulk_update_menu_items(
        &self,
        agent_id: &AgentId,
        ids: &[MenuItemId],
        patch: MenuItemPatch,
    ) -> Result<Option<Vec<MenuItem>>, RepositoryError>;
    /// Distinct non-empty categories of the active menu, sorted.
    async fn menu_categories(&self, agent_id: &AgentId) -> Result<Vec<String>, RepositoryError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Inserts or refreshes the mirror row keyed by the vendor event id.
    async fn record(&self, booking: &BookingRecord) -> Result<(), RepositoryError>;
    async fn find_by_external_id(
        &self,
        external_event_id: &str,
    ) -> Result<Option<BookingRecord>, RepositoryError>;
    async fn mark_cancelled(&self, external_event_id: &str) -> Result<bool, RepositoryError>;
    /// Confirmed bookings for the phone number starting after `after`, soonest first.
    async fn upcoming_for_phone(
        &self,
        agent_id: &AgentId,
        phone_number: &str,
        after: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<BookingRecord>, RepositoryError>;
    /// Confirmed bookings of the agent overlapping `[start, end)`.
    async fn booked_intervals(
        &self,
        agent_id: &AgentId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BookedInterval>, RepositoryError>;
}

#[async_trait]
pub trait StatisticsRepository: Send + Sync {
    async fn period_stats(
        &self,
        agent_id: &AgentId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PeriodStats, RepositoryError>;
}

/// Fixed-width UTC form so stored timestamps sort and compare as text.
pub fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("timestamp `{raw}`: {error}")))
}

pub(crate) fn decode_optional_timestamp(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.as_deref().map(decode_timestamp).transpose()
}

pub(crate) fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|error| RepositoryError::Decode(error.to_string()))
}

pub(crate) fn decode_json<T: DeserializeOwned>(
    raw: &str,
    column: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(raw).map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn decode_decimal(raw: &str, column: &str) -> Result<Decimal, RepositoryError> {
    raw.parse::<Decimal>().map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|error| RepositoryError::Decode(error.to_string()))
}

pub(crate) fn parse_column<T>(row: &SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = column(row, name)?;
    raw.parse::<T>().map_err(|error| RepositoryError::Decode(format!("{name}: {error}")))
}

pub(crate) fn map_unique_violation(error: sqlx::Error, message: &str) -> RepositoryError {
    match &error {
        sqlx::Error::Database(database_error) if database_error.is_unique_violation() => {
            RepositoryError::Conflict(message.to_string())
        }
        _ => RepositoryError::Database(error),
    }
}
