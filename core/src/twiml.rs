//! Carrier markup (TwiML) documents.

use crate::prompts::APOLOGY;

/// Voice used for `<Say>` when no synthesized audio is available.
pub const DEFAULT_SAY_VOICE: &str = "alice";

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// "Collect speech and POST it to `action`".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherDirective {
    pub action: String,
    /// Seconds of silence that end an utterance.
    pub speech_timeout: u32,
    /// Seconds to wait for the caller to start speaking.
    pub timeout: u32,
}

/// What the carrier should do after the spoken part of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    Gather(GatherDirective),
    Dial(String),
    Hangup,
}

/// Spoken part of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Speech {
    Audio(String),
    Say { text: String, voice: String },
    Silent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolResponse {
    pub speech: Speech,
    pub next: NextAction,
}

impl ProtocolResponse {
    /// Generic apology-and-hangup. Built without any collaborator so it can
    /// always be produced.
    pub fn apology() -> Self {
        Self {
            speech: Speech::Say {
                text: APOLOGY.to_string(),
                voice: DEFAULT_SAY_VOICE.to_string(),
            },
            next: NextAction::Hangup,
        }
    }

    pub fn to_xml(&self) -> String {
        let speech = render_speech(&self.speech);
        let body = match &self.next {
            NextAction::Gather(gather) => format!(
                r#"<Gather input="speech" action="{}" method="POST" speechTimeout="{}" timeout="{}">{speech}</Gather><Hangup/>"#,
                xml_escape(&gather.action),
                gather.speech_timeout,
                gather.timeout,
            ),
            NextAction::Dial(number) => format!("{speech}<Dial>{}</Dial>", xml_escape(number)),
            NextAction::Hangup => format!("{speech}<Hangup/>"),
        };
        format!("{XML_HEADER}<Response>{body}</Response>")
    }
}

/// Pre-rendered apology document.
pub fn apology_xml() -> String {
    ProtocolResponse::apology().to_xml()
}

fn render_speech(speech: &Speech) -> String {
    match speech {
        Speech::Audio(url) => format!("<Play>{}</Play>", xml_escape(url)),
        Speech::Say { text, voice } => format!(
            r#"<Say voice="{}">{}</Say>"#,
            xml_escape(voice),
            xml_escape(text)
        ),
        Speech::Silent => String::new(),
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
