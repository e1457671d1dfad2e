//! End-of-conversation summaries, later shown to the agent when the same
//! caller gets in touch again.

use std::sync::Arc;

use rollwise_core::domain::conversation::{Message, MessageRole};

use crate::llm::{ChatMessage, LlmClient, LlmError};

const SUMMARY_INSTRUCTIONS: &str = "You are an expert conversation summarizer for business phone calls.

Analyze the conversation and provide a summary in the following exact format:

**KEY POINTS:**
• Customer's name if given, and their primary need or request
• Main services or information discussed
• Bookings or orders made, changed or cancelled
• Actions taken or next steps
• Call outcome

**DETAILED SUMMARY:**
A short narrative of why the customer got in touch, how the agent responded and anything that needs follow-up.

Keep the summary professional and focused on what the business should know the next time this customer calls.";

pub struct ConversationSummarizer {
    llm: Arc<dyn LlmClient>,
}

impl ConversationSummarizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Summary of the caller and assistant messages, or `None` when there was
    /// nothing to summarise or the model answered with no text.
    pub async fn summarize(&self, messages: &[Message]) -> Result<Option<String>, LlmError> {
        let Some(transcript) = transcript(messages) else {
            return Ok(None);
        };
        let request = [
            ChatMessage::system(SUMMARY_INSTRUCTIONS),
            ChatMessage::user(format!("Conversation to summarize:\n\n{transcript}")),
        ];
        let completion = self.llm.chat(&request, &[]).await?;
        Ok(completion
            .content
            .map(|summary| summary.trim().to_string())
            .filter(|summary| !summary.is_empty()))
    }
}

/// One `[seq] ROLE: text` line per spoken message.
fn transcript(messages: &[Message]) -> Option<String> {
    let lines: Vec<String> = messages
        .iter()
        .filter(|message| matches!(message.role, MessageRole::User | MessageRole::Assistant))
        .filter(|message| !message.content.trim().is_empty())
        .map(|message| {
            format!(
                "[{:03}] {}: {}",
                message.sequence_number,
                message.role.as_str().to_uppercase(),
                message.content.trim()
            )
        })
        .collect();
    (!lines.is_empty()).then(|| lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use rollwise_core::domain::conversation::{ConversationId, Message, MessageRole};

    use super::ConversationSummarizer;
    use crate::llm::{ChatCompletion, ChatRole, ScriptedLlmClient};

    fn message(sequence_number: i64, role: MessageRole, content: &str) -> Message {
        Message {
            id: format!("m-{sequence_number}"),
            conversation_id: ConversationId("conv-1".into()),
            role,
            content: content.into(),
            sequence_number,
            message_type: "transcript".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn transcript_lists_spoken_turns_in_order() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![ChatCompletion::text(
            "  Alex booked a haircut for Friday.  ",
        )]));
        let summarizer = ConversationSummarizer::new(llm.clone());
        let messages = vec![
            message(1, MessageRole::Assistant, "Hello! How can I help?"),
            message(2, MessageRole::User, "I'm Alex, I need a haircut on Friday."),
            message(3, MessageRole::Tool, "{\"success\":true}"),
            message(4, MessageRole::Assistant, "Booked for Friday at ten."),
        ];

        let summary = summarizer.summarize(&messages).await.expect("summary");

        assert_eq!(summary.as_deref(), Some("Alex booked a haircut for Friday."));
        let requests = llm.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0][0].role, ChatRole::System);
        let transcript = &requests[0][1].content;
        assert!(transcript.contains(
            "[001] ASSISTANT: Hello! How can I help?\n[002] USER: I'm Alex, I need a haircut on Friday.\n[004] ASSISTANT: Booked for Friday at ten."
        ));
        assert!(!transcript.contains("success"));
    }

    #[tokio::test]
    async fn silent_conversations_are_not_sent_to_the_model() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::new()));
        let summarizer = ConversationSummarizer::new(llm.clone());

        let summary = summarizer
            .summarize(&[message(1, MessageRole::System, "prompt")])
            .await
            .expect("summary");

        assert_eq!(summary, None);
        assert!(llm.requests().await.is_empty());
    }

    #[tokio::test]
    async fn empty_model_answers_leave_no_summary() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![ChatCompletion::default()]));
        let summarizer = ConversationSummarizer::new(llm);

        let summary = summarizer
            .summarize(&[message(1, MessageRole::User, "Hi")])
            .await
            .expect("summary");

        assert_eq!(summary, None);
    }
}
