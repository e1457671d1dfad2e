use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::conversation::ConversationId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MenuItemId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    InProgress,
    Ready,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Ready => "ready",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::New | Self::InProgress)
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "in_progress" => Ok(Self::InProgress),
            "ready" => Ok(Self::Ready),
            "completed" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => {
                Err(DomainError::UnknownVariant { kind: "order status", value: other.to_string() })
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Refunded => "refunded",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "unpaid" => Ok(Self::Unpaid),
            "paid" => Ok(Self::Paid),
            "refunded" => Ok(Self::Refunded),
            other => Err(DomainError::UnknownVariant {
                kind: "payment status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub agent_id: AgentId,
    pub conversation_id: Option<ConversationId>,
    pub customer_phone: Option<String>,
    pub customer_name: Option<String>,
    pub status: OrderStatus,
    pub total_price: Decimal,
    pub pickup_time: Option<String>,
    pub special_requests: Option<String>,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOrder {
    pub agent_id: AgentId,
    pub conversation_id: Option<ConversationId>,
    pub customer_phone: Option<String>,
    pub customer_name: Option<String>,
    pub pickup_time: Option<String>,
    pub special_requests: Option<String>,
}

/// Dashboard edit of an order's header. Totals are never written directly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderPatch {
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub pickup_time: Option<String>,
    pub special_requests: Option<String>,
    pub status: Option<OrderStatus>,
}

impl OrderPatch {
    pub fn apply_to(self, order: &mut Order) {
        if let Some(customer_name) = self.customer_name {
            order.customer_name = Some(customer_name);
        }
        if let Some(customer_phone) = self.customer_phone {
            order.customer_phone = Some(customer_phone);
        }
        if let Some(pickup_time) = self.pickup_time {
            order.pickup_time = Some(pickup_time);
        }
        if let Some(special_requests) = self.special_requests {
            order.special_requests = Some(special_requests);
        }
        if let Some(status) = self.status {
            order.status = status;
        }
    }
}

/// Listing filter; `created_from` is inclusive and `created_before` exclusive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

/// Free-form line entered from the dashboard, priced by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NewOrderLine {
    pub name: String,
    pub quantity: u32,
    pub price: Decimal,
    #[serde(default)]
    pub note: Option<String>,
}

impl NewOrderLine {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::invalid("name", "must not be empty"));
        }
        validate_quantity(self.quantity)?;
        validate_price(self.price)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct OrderItemPatch {
    pub name: Option<String>,
    pub quantity: Option<u32>,
    pub price: Option<Decimal>,
    pub note: Option<String>,
}

impl OrderItemPatch {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(DomainError::invalid("name", "must not be empty"));
        }
        if let Some(quantity) = self.quantity {
            validate_quantity(quantity)?;
        }
        match self.price {
            Some(price) => validate_price(price),
            None => Ok(()),
        }
    }

    pub fn apply_to(self, item: &mut OrderItem) {
        if let Some(name) = self.name {
            item.name = name.trim().to_string();
        }
        if let Some(quantity) = self.quantity {
            item.quantity = quantity;
        }
        if let Some(price) = self.price {
            item.price = price;
        }
        if let Some(note) = self.note {
            item.note = Some(note);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: OrderId,
    pub name: String,
    pub quantity: u32,
    pub price: Decimal,
    pub note: Option<String>,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: MenuItemId,
    pub agent_id: AgentId,
    pub number: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Decimal,
    pub allergens: Vec<String>,
    pub available: bool,
    pub is_popular: bool,
    pub active: bool,
}

impl MenuItem {
    pub fn orderable(&self) -> bool {
        self.active && self.available
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NewMenuItem {
    #[serde(default)]
    pub number: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub allergens: Vec<String>,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default)]
    pub is_popular: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct MenuItemPatch {
    pub number: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<Decimal>,
    pub allergens: Option<Vec<String>>,
    pub available: Option<bool>,
    pub is_popular: Option<bool>,
}

impl NewMenuItem {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::invalid("name", "must not be empty"));
        }
        validate_price(self.price)
    }
}

impl MenuItemPatch {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(DomainError::invalid("name", "must not be empty"));
        }
        match self.price {
            Some(price) => validate_price(price),
            None => Ok(()),
        }
    }

    pub fn apply_to(self, item: &mut MenuItem) {
        if let Some(number) = self.number {
            item.number = Some(number);
        }
        if let Some(name) = self.name {
            item.name = name.trim().to_string();
        }
        if let Some(description) = self.description {
            item.description = Some(description);
        }
        if let Some(category) = self.category {
            item.category = Some(category);
        }
        if let Some(price) = self.price {
            item.price = price;
        }
        if let Some(allergens) = self.allergens {
            item.allergens = allergens;
        }
        if let Some(available) = self.available {
            item.available = available;
        }
        if let Some(is_popular) = self.is_popular {
            item.is_popular = is_popular;
        }
    }
}

fn validate_quantity(quantity: u32) -> Result<(), DomainError> {
    if quantity == 0 {
        return Err(DomainError::invalid("quantity", "must be at least 1"));
    }
    Ok(())
}

fn validate_price(price: Decimal) -> Result<(), DomainError> {
    if price.is_sign_negative() {
        return Err(DomainError::invalid("price", "must not be negative"));
    }
    Ok(())
}
