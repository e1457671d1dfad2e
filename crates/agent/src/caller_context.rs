//! Looks up a returning caller's earlier conversations, orders and upcoming
//! bookings for the system prompt.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use rollwise_core::domain::agent::Agent;
use rollwise_core::domain::conversation::ConversationId;
use rollwise_core::prompt::{build_caller_context, CallerHistory};
use rollwise_db::repositories::{
    BookingRepository, ConversationRepository, OrderRepository, RepositoryError,
};

pub const DEFAULT_LOOKBACK_DAYS: i64 = 90;
const PAST_CALLS: u32 = 3;
const PAST_ORDERS: u32 = 3;
const UPCOMING_APPOINTMENTS: u32 = 5;

pub struct CallerContextBuilder {
    conversations: Arc<dyn ConversationRepository>,
    orders: Arc<dyn OrderRepository>,
    bookings: Arc<dyn BookingRepository>,
    lookback: Duration,
}

impl CallerContextBuilder {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        orders: Arc<dyn OrderRepository>,
        bookings: Arc<dyn BookingRepository>,
    ) -> Self {
        Self { conversations, orders, bookings, lookback: Duration::days(DEFAULT_LOOKBACK_DAYS) }
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback = Duration::days(days.max(1));
        self
    }

    pub async fn history(
        &self,
        agent: &Agent,
        caller_phone: &str,
        current: Option<&ConversationId>,
        now: DateTime<Utc>,
    ) -> Result<CallerHistory, RepositoryError> {
        let since = now - self.lookback;
        let past_calls = self
            .conversations
            .recent_summaries_for_caller(&agent.id, caller_phone, since, current, PAST_CALLS)
            .await?;

        let mut orders = Vec::new();
        for order in self
            .orders
            .recent_orders_for_customer(&agent.id, caller_phone, since, PAST_ORDERS)
            .await?
        {
            // The order being taken on this call is not history yet.
            if current.is_some() && order.conversation_id.as_ref() == current {
                continue;
            }
            let items = self.orders.list_items(&order.id).await?;
            orders.push((order, items));
        }

        let appointments = self
            .bookings
            .upcoming_for_phone(&agent.id, caller_phone, now, UPCOMING_APPOINTMENTS)
            .await?;
        Ok(CallerHistory { past_calls, orders, appointments })
    }

    /// Rendered prompt block, `None` for a caller with no history.
    pub async fn build(
        &self,
        agent: &Agent,
        caller_phone: &str,
        current: Option<&ConversationId>,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, RepositoryError> {
        let history = self.history(agent, caller_phone, current, now).await?;
        Ok(build_caller_context(&history, agent.tz(), now))
    }
}
