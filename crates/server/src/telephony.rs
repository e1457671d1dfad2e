//! Telephony vendor webhooks. These are unauthenticated form posts that
//! answer with TwiML, apart from the status callback which answers JSON.
//! When `telephony.validate_signatures` is on, every request must carry a
//! valid `X-Twilio-Signature`.
//!
//! Routes:
//! - `POST /agent/{id}/voice`         - incoming call: greet and start listening
//! - `POST /agent/{id}/voice/respond` - one caller utterance, one agent reply
//! - `POST /agent/{id}/messages`      - incoming SMS
//! - `POST /agent/{id}/callback`      - call status updates

use axum::{
    extract::{Form, Path, Query, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use rollwise_core::domain::agent::{Agent, AgentId};
use rollwise_core::domain::conversation::{
    Conversation, ConversationId, ConversationStatus, ConversationType, NewConversation,
};
use rollwise_core::prompt::build_greeting;
use rollwise_core::telephony::{
    is_terminal_call_status, sms_session_name, sms_sid, validate_signature, voice_session_name,
    MessagingResponse, Rejection, SignatureError, VoiceResponse, REPROMPT_MESSAGE,
    TECHNICAL_DIFFICULTY_MESSAGE,
};
use rollwise_db::repositories::RepositoryError;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::dialogue::run_exchange;
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-twilio-signature";

/// TwiML document answered with `text/xml`.
pub struct Twiml(pub String);

impl IntoResponse for Twiml {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, "text/xml")], self.0).into_response()
    }
}

/// Webhook form fields in arrival order, kept as pairs for signing.
#[derive(Debug, Default)]
pub struct WebhookForm(pub Vec<(String, String)>);

impl WebhookForm {
    /// Trimmed, non-empty value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RespondQuery {
    pub conversation_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agent/{id}/voice", post(voice))
        .route("/agent/{id}/voice/respond", post(voice_respond))
        .route("/agent/{id}/messages", post(messages))
        .route("/agent/{id}/callback", post(callback))
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

fn verify_signature(
    state: &AppState,
    uri: &Uri,
    headers: &HeaderMap,
    form: &WebhookForm,
) -> Result<(), Response> {
    if !state.telephony.validate_signatures {
        return Ok(());
    }

    let base = match state.telephony.public_base_url.as_deref() {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => {
            let host = headers.get(header::HOST).and_then(|host| host.to_str().ok()).unwrap_or_default();
            format!("https://{host}")
        }
    };
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or_else(|| uri.path());
    let url = format!("{base}{path}");
    let provided = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());

    let result = match state.telephony.auth_token.as_ref() {
        Some(token) => validate_signature(token.expose_secret(), &url, &form.0, provided),
        None => Err(SignatureError::InvalidKey),
    };
    result.map_err(|error| {
        warn!(event_name = "telephony.signature_rejected", url = %url, error = %error, "webhook signature rejected");
        (StatusCode::FORBIDDEN, error.to_string()).into_response()
    })
}

async fn active_agent(state: &AppState, agent_id: &str) -> Result<Agent, Rejection> {
    match state.agents.find_active(&AgentId(agent_id.to_string())).await {
        Ok(Some(agent)) => Ok(agent),
        Ok(None) => Err(Rejection::Unavailable),
        Err(error) => {
            error!(event_name = "telephony.agent_lookup_failed", agent_id, error = %error, "agent lookup failed");
            Err(Rejection::Unavailable)
        }
    }
}

/// Active agent that owns the dialled number `to`.
async fn admit(state: &AppState, agent_id: &str, to: Option<&str>) -> Result<Agent, Rejection> {
    let agent = active_agent(state, agent_id).await?;
    if !to.is_some_and(|to| agent.answers_number(to)) {
        warn!(event_name = "telephony.wrong_number", agent_id, to = to.unwrap_or_default(), "number mismatch");
        return Err(Rejection::WrongNumber);
    }
    Ok(agent)
}

fn respond_url(agent_id: &AgentId, conversation_id: &ConversationId) -> String {
    format!("/agent/{}/voice/respond?conversation_id={}", agent_id.0, conversation_id.0)
}

/// Speaks `text` while listening for the next utterance. Silence falls
/// through to the redirect, which comes back as an empty result.
fn listen(agent: &Agent, action: &str, text: &str, voice: &str) -> String {
    VoiceResponse::new()
        .gather(action, agent.language.as_str(), Some((text.to_string(), voice.to_string())))
        .redirect(action)
        .to_xml()
}

fn apology(voice: &str) -> Twiml {
    Twiml(VoiceResponse::new().say(TECHNICAL_DIFFICULTY_MESSAGE, voice).hangup().to_xml())
}

// ---------------------------------------------------------------------------
// Voice
// ---------------------------------------------------------------------------

pub async fn voice(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> Response {
    let form = WebhookForm(params);
    if let Err(rejected) = verify_signature(&state, &uri, &headers, &form) {
        return rejected;
    }
    let voice = state.telephony.voice.as_str();
    let agent = match admit(&state, &agent_id, form.get("To")).await {
        Ok(agent) => agent,
        Err(rejection) => return Twiml(rejection.voice_twiml(voice)).into_response(),
    };

    let from = form.get("From").unwrap_or("unknown");
    let conversation = state
        .conversations
        .create(NewConversation {
            agent_id: agent.id.clone(),
            session_name: voice_session_name(from),
            conversation_type: ConversationType::Voice,
            caller_phone: form.get("From").map(str::to_string),
            twilio_sid: form.get("CallSid").map(str::to_string),
        })
        .await;
    let conversation = match conversation {
        Ok(conversation) => conversation,
        Err(error) => {
            error!(event_name = "telephony.call_setup_failed", agent_id = %agent.id.0, error = %error, "could not start call");
            return apology(voice).into_response();
        }
    };

    info!(
        event_name = "telephony.call_started",
        agent_id = %agent.id.0,
        conversation_id = %conversation.id.0,
        call_sid = conversation.twilio_sid.as_deref().unwrap_or_default(),
        "incoming call"
    );
    let greeting = build_greeting(&agent, agent.company_label());
    let action = respond_url(&agent.id, &conversation.id);
    Twiml(listen(&agent, &action, &greeting, voice)).into_response()
}

async fn call_conversation(
    state: &AppState,
    agent: &Agent,
    conversation_id: Option<String>,
) -> Option<Conversation> {
    let id = ConversationId(conversation_id?);
    match state.conversations.find(&id).await {
        Ok(found) => found.filter(|conversation| conversation.agent_id == agent.id),
        Err(error) => {
            error!(event_name = "telephony.conversation_lookup_failed", conversation_id = %id.0, error = %error, "conversation lookup failed");
            None
        }
    }
}

pub async fn voice_respond(
    Path(agent_id): Path<String>,
    Query(query): Query<RespondQuery>,
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> Response {
    let form = WebhookForm(params);
    if let Err(rejected) = verify_signature(&state, &uri, &headers, &form) {
        return rejected;
    }
    let voice = state.telephony.voice.as_str();
    let agent = match active_agent(&state, &agent_id).await {
        Ok(agent) => agent,
        Err(rejection) => return Twiml(rejection.voice_twiml(voice)).into_response(),
    };
    let Some(conversation) = call_conversation(&state, &agent, query.conversation_id).await else {
        return apology(voice).into_response();
    };
    let action = respond_url(&agent.id, &conversation.id);

    let Some(speech) = form.get("SpeechResult") else {
        let xml = VoiceResponse::new()
            .gather(&action, agent.language.as_str(), Some((REPROMPT_MESSAGE.to_string(), voice.to_string())))
            .hangup()
            .to_xml();
        return Twiml(xml).into_response();
    };

    match run_exchange(&state, &agent, &conversation, speech, "voice").await {
        Ok(outcome) if outcome.hangup => {
            info!(event_name = "telephony.call_hangup", conversation_id = %conversation.id.0, "agent ended the call");
            Twiml(VoiceResponse::new().say(outcome.reply, voice).hangup().to_xml()).into_response()
        }
        Ok(outcome) => Twiml(listen(&agent, &action, &outcome.reply, voice)).into_response(),
        Err(error) => {
            warn!(event_name = "telephony.turn_failed", conversation_id = %conversation.id.0, error = %error, "voice turn failed");
            apology(voice).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// SMS
// ---------------------------------------------------------------------------

async fn sms_conversation(
    state: &AppState,
    agent: &Agent,
    form: &WebhookForm,
) -> Result<Conversation, RepositoryError> {
    let from = form.get("From").unwrap_or("unknown");
    if let Some(existing) =
        state.conversations.find_active_for_caller(&agent.id, ConversationType::Sms, from).await?
    {
        return Ok(existing);
    }
    state
        .conversations
        .create(NewConversation {
            agent_id: agent.id.clone(),
            session_name: sms_session_name(from),
            conversation_type: ConversationType::Sms,
            caller_phone: Some(from.to_string()),
            twilio_sid: Some(sms_sid(form.get("MessageSid"), Utc::now())),
        })
        .await
}

pub async fn messages(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> Response {
    let form = WebhookForm(params);
    if let Err(rejected) = verify_signature(&state, &uri, &headers, &form) {
        return rejected;
    }
    let agent = match admit(&state, &agent_id, form.get("To")).await {
        Ok(agent) => agent,
        Err(rejection) => return Twiml(rejection.sms_twiml()).into_response(),
    };
    let Some(body) = form.get("Body") else {
        return Twiml(MessagingResponse::new().to_xml()).into_response();
    };

    let conversation = match sms_conversation(&state, &agent, &form).await {
        Ok(conversation) => conversation,
        Err(error) => {
            error!(event_name = "telephony.sms_setup_failed", agent_id = %agent.id.0, error = %error, "could not store sms");
            return Twiml(MessagingResponse::new().message(TECHNICAL_DIFFICULTY_MESSAGE).to_xml())
                .into_response();
        }
    };

    let reply = match run_exchange(&state, &agent, &conversation, body, "sms").await {
        Ok(outcome) => outcome.reply,
        Err(error) => {
            warn!(event_name = "telephony.turn_failed", conversation_id = %conversation.id.0, error = %error, "sms turn failed");
            TECHNICAL_DIFFICULTY_MESSAGE.to_string()
        }
    };
    Twiml(MessagingResponse::new().message(reply).to_xml()).into_response()
}

// ---------------------------------------------------------------------------
// Status callback
// ---------------------------------------------------------------------------

pub async fn callback(
    Path(agent_id): Path<String>,
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Form(params): Form<Vec<(String, String)>>,
) -> Response {
    let form = WebhookForm(params);
    if let Err(rejected) = verify_signature(&state, &uri, &headers, &form) {
        return rejected;
    }
    let Ok(agent) = active_agent(&state, &agent_id).await else {
        return Json(json!({ "status": "callback rejected", "agent_id": agent_id })).into_response();
    };

    if let (Some(call_sid), Some(call_status)) = (form.get("CallSid"), form.get("CallStatus")) {
        if is_terminal_call_status(call_status) {
            if let Err(error) = finish_call(&state, &agent, call_sid, call_status, &form).await {
                error!(event_name = "telephony.call_finish_failed", call_sid, error = %error, "could not close call");
            }
        }
    }
    Json(json!({ "status": "callback received", "agent_id": agent.id.0 })).into_response()
}

async fn finish_call(
    state: &AppState,
    agent: &Agent,
    call_sid: &str,
    call_status: &str,
    form: &WebhookForm,
) -> Result<(), RepositoryError> {
    let Some(conversation) = state.conversations.find_by_twilio_sid(&agent.id, call_sid).await? else {
        return Ok(());
    };
    if conversation.status != ConversationStatus::Active {
        return Ok(());
    }

    let now = Utc::now();
    let duration = form
        .get("CallDuration")
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or_else(|| conversation.elapsed_seconds(now));
    let status = if call_status.eq_ignore_ascii_case("completed") {
        ConversationStatus::Completed
    } else {
        ConversationStatus::Failed
    };
    state.conversations.complete(&conversation.id, status, now, Some(duration)).await?;
    info!(
        event_name = "telephony.call_finished",
        conversation_id = %conversation.id.0,
        call_status,
        duration_seconds = duration,
        "call finished"
    );
    summarize_call(state, &conversation.id).await;
    Ok(())
}

/// Stores an LLM summary of the finished call. Failures are logged and leave
/// the summary empty.
async fn summarize_call(state: &AppState, conversation_id: &ConversationId) {
    let messages = match state.conversations.list_messages(conversation_id).await {
        Ok(messages) => messages,
        Err(error) => {
            warn!(
                event_name = "telephony.summary_failed",
                conversation_id = %conversation_id.0,
                error = %error,
                "call transcript unreadable"
            );
            return;
        }
    };
    let summary = match state.summarizer.summarize(&messages).await {
        Ok(Some(summary)) => summary,
        Ok(None) => return,
        Err(error) => {
            warn!(
                event_name = "telephony.summary_failed",
                conversation_id = %conversation_id.0,
                error = %error,
                "call summary not generated"
            );
            return;
        }
    };
    match state.conversations.set_summary(conversation_id, &summary).await {
        Ok(()) => info!(
            event_name = "telephony.call_summarized",
            conversation_id = %conversation_id.0,
            summary_chars = summary.len(),
            "call summary stored"
        ),
        Err(error) => warn!(
            event_name = "telephony.summary_failed",
            conversation_id = %conversation_id.0,
            error = %error,
            "call summary not stored"
        ),
    }
}
