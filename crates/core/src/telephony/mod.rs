pub mod signature;
pub mod twiml;

use chrono::{DateTime, Utc};

pub use signature::{compute_signature, validate_signature, SignatureError};
pub use twiml::{MessagingResponse, VoiceResponse, VoiceVerb};

pub const VOICE_UNAVAILABLE_MESSAGE: &str =
    "We are sorry, the business you called is not available at the moment. Please try again later.";
pub const SMS_UNAVAILABLE_MESSAGE: &str =
    "We are sorry, the business you texted is not available at the moment. Please try again later.";
pub const INVALID_NUMBER_MESSAGE: &str = "Invalid request. Please check the number and try again.";
pub const REPROMPT_MESSAGE: &str = "Sorry, I didn't catch that. Could you say it again?";
pub const TECHNICAL_DIFFICULTY_MESSAGE: &str =
    "I'm sorry, I'm having trouble right now. Please try again in a moment.";

/// Call statuses after which Twilio sends no further updates for a call.
pub const TERMINAL_CALL_STATUSES: [&str; 5] = ["completed", "failed", "busy", "no-answer", "canceled"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Voice,
    Sms,
}

/// Why an inbound webhook was refused before reaching the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Unknown or inactive agent.
    Unavailable,
    /// The dialled number does not belong to the agent.
    WrongNumber,
}

impl Rejection {
    pub fn message(&self, channel: Channel) -> &'static str {
        match (self, channel) {
            (Self::Unavailable, Channel::Voice) => VOICE_UNAVAILABLE_MESSAGE,
            (Self::Unavailable, Channel::Sms) => SMS_UNAVAILABLE_MESSAGE,
            (Self::WrongNumber, _) => INVALID_NUMBER_MESSAGE,
        }
    }

    pub fn voice_twiml(&self, voice: &str) -> String {
        VoiceResponse::new().say(self.message(Channel::Voice), voice).hangup().to_xml()
    }

    pub fn sms_twiml(&self) -> String {
        MessagingResponse::new().message(self.message(Channel::Sms)).to_xml()
    }
}

pub fn voice_session_name(from: &str) -> String {
    format!("Voice call from {from}")
}

pub fn sms_session_name(from: &str) -> String {
    format!("SMS from {from}")
}

/// Message sid to store, synthesizing `sms_{unix}` when the webhook has none.
pub fn sms_sid(message_sid: Option<&str>, now: DateTime<Utc>) -> String {
    match message_sid.map(str::trim).filter(|sid| !sid.is_empty()) {
        Some(sid) => sid.to_string(),
        None => format!("sms_{}", now.timestamp()),
    }
}

pub fn is_terminal_call_status(status: &str) -> bool {
    TERMINAL_CALL_STATUSES.contains(&status.trim().to_ascii_lowercase().as_str())
}
