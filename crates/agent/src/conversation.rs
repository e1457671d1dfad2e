use rollwise_core::domain::conversation::{Message, MessageRole};

use crate::llm::ChatMessage;

pub const DEFAULT_HISTORY_LIMIT: usize = 40;

/// Replays stored conversation messages as chat history.
///
/// Only user and assistant turns are replayed: stored tool rows carry no call
/// ids, and the system prompt is rebuilt on every turn.
#[derive(Clone, Debug)]
pub struct HistoryBuilder {
    limit: usize,
}

impl Default for HistoryBuilder {
    fn default() -> Self {
        Self { limit: DEFAULT_HISTORY_LIMIT }
    }
}

impl HistoryBuilder {
    pub fn new(limit: usize) -> Self {
        Self { limit: limit.max(1) }
    }

    /// The most recent `limit` turns in sequence order.
    pub fn build(&self, messages: &[Message]) -> Vec<ChatMessage> {
        let mut ordered: Vec<&Message> = messages
            .iter()
            .filter(|message| !message.content.trim().is_empty())
            .filter(|message| matches!(message.role, MessageRole::User | MessageRole::Assistant))
            .collect();
        ordered.sort_by_key(|message| message.sequence_number);

        let skip = ordered.len().saturating_sub(self.limit);
        ordered
            .into_iter()
            .skip(skip)
            .map(|message| match message.role {
                MessageRole::Assistant => ChatMessage::assistant(message.content.clone()),
                _ => ChatMessage::user(message.content.clone()),
            })
            .collect()
    }
}
