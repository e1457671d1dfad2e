pub mod auth;
pub mod calendar;
pub mod config;
pub mod domain;
pub mod errors;
pub mod prompt;
pub mod statistics;
pub mod telephony;

pub use domain::agent::{Agent, AgentId, AgentPatch, AgentRole, NewAgent};
pub use domain::conversation::{Conversation, ConversationId, ConversationType, Message};
pub use domain::order::{MenuItem, MenuItemId, Order, OrderId, OrderItem};
pub use domain::user::{User, UserId};
pub use errors::DomainError;
