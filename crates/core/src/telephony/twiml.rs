//! Minimal TwiML writer covering the verbs the webhooks answer with.

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoiceVerb {
    Say { text: String, voice: String },
    Gather { action: String, language: String, prompt: Option<(String, String)> },
    Hangup,
    Redirect { url: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VoiceResponse {
    verbs: Vec<VoiceVerb>,
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: impl Into<String>, voice: impl Into<String>) -> Self {
        self.verbs.push(VoiceVerb::Say { text: text.into(), voice: voice.into() });
        self
    }

    /// Speech gather posting the transcript to `action`. `prompt` is spoken
    /// while listening, as `(text, voice)`.
    pub fn gather(
        mut self,
        action: impl Into<String>,
        language: impl Into<String>,
        prompt: Option<(String, String)>,
    ) -> Self {
        self.verbs.push(VoiceVerb::Gather {
            action: action.into(),
            language: language.into(),
            prompt,
        });
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(VoiceVerb::Hangup);
        self
    }

    pub fn redirect(mut self, url: impl Into<String>) -> Self {
        self.verbs.push(VoiceVerb::Redirect { url: url.into() });
        self
    }

    pub fn verbs(&self) -> &[VoiceVerb] {
        &self.verbs
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from(XML_DECLARATION);
        xml.push_str("<Response>");
        for verb in &self.verbs {
            match verb {
                VoiceVerb::Say { text, voice } => push_say(&mut xml, text, voice),
                VoiceVerb::Gather { action, language, prompt } => {
                    xml.push_str(&format!(
                        r#"<Gather input="speech" action="{}" method="POST" speechTimeout="auto" language="{}">"#,
                        escape(action),
                        escape(language)
                    ));
                    if let Some((text, voice)) = prompt {
                        push_say(&mut xml, text, voice);
                    }
                    xml.push_str("</Gather>");
                }
                VoiceVerb::Hangup => xml.push_str("<Hangup/>"),
                VoiceVerb::Redirect { url } => {
                    xml.push_str(&format!(r#"<Redirect method="POST">{}</Redirect>"#, escape(url)));
                }
            }
        }
        xml.push_str("</Response>");
        xml
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessagingResponse {
    messages: Vec<String>,
}

impl MessagingResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(mut self, body: impl Into<String>) -> Self {
        self.messages.push(body.into());
        self
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from(XML_DECLARATION);
        xml.push_str("<Response>");
        for body in &self.messages {
            xml.push_str(&format!("<Message>{}</Message>", escape(body)));
        }
        xml.push_str("</Response>");
        xml
    }
}

fn push_say(xml: &mut String, text: &str, voice: &str) {
    xml.push_str(&format!(r#"<Say voice="{}">{}</Say>"#, escape(voice), escape(text)));
}

pub fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::{MessagingResponse, VoiceResponse};

    #[test]
    fn say_then_hangup() {
        let xml = VoiceResponse::new().say("Goodbye & thanks", "alice").hangup().to_xml();
        assert_eq!(
            xml,
            r#"<?xml version="1.0" encoding="UTF-8"?><Response><Say voice="alice">Goodbye &amp; thanks</Say><Hangup/></Response>"#
        );
    }

    #[test]
    fn gather_nests_prompt_and_escapes_action() {
        let xml = VoiceResponse::new()
            .gather(
                "/agent/a1/voice/respond?conversation_id=c1&turn=2",
                "en",
                Some(("Anything else?".to_string(), "alice".to_string())),
            )
            .to_xml();

        assert!(xml.contains(r#"action="/agent/a1/voice/respond?conversation_id=c1&amp;turn=2""#));
        assert!(xml.contains(r#"speechTimeout="auto""#));
        assert!(xml.contains(r#"<Say voice="alice">Anything else?</Say></Gather>"#));
    }

    #[test]
    fn messaging_response_wraps_each_body() {
        let xml = MessagingResponse::new().message("Table for <2>?").to_xml();
        assert!(xml.ends_with("<Response><Message>Table for &lt;2&gt;?</Message></Response>"));
    }
}
