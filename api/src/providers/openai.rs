//! OpenAI chat completions as intent classifier and response generator.

use async_trait::async_trait;
use callflow_core::collaborators::{
    ClassifierVerdict, Entities, IntentClassifier, ResponseGenerator,
};
use callflow_core::error::CollaboratorError;
use callflow_core::prompts::{PromptContext, PromptExtras};
use callflow_core::session::Intent;
use serde::{Deserialize, Serialize};

use super::{ensure_success, malformed, transport};

pub const METHOD: &str = "openai";

const COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

const AGENT_PERSONA: &str = "You are a helpful customer service agent for a newspaper and \
circulars distribution company. You help customers start delivery, stop delivery and report \
missed deliveries, and you collect their address and name. Be polite, patient and concise. \
Never invent information or make promises. Keep the conversation on delivery service requests \
and sound natural rather than robotic.";

const CLASSIFIER_SYSTEM: &str = "You are an intent detection system. Always respond with valid JSON.";

pub struct OpenAi {
    api_key: String,
    model: String,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Shape the classifier prompt asks the model to answer in.
#[derive(Debug, Deserialize)]
struct IntentReply {
    intent: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    entities: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    reasoning: Option<String>,
}

fn default_confidence() -> f64 {
    0.5
}

impl OpenAi {
    pub fn new(api_key: String, model: String, http: reqwest::Client) -> Self {
        Self {
            api_key,
            model,
            http,
        }
    }

    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, CollaboratorError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens,
            temperature,
        };
        let response = self
            .http
            .post(COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(transport)?;
        let reply: ChatResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(malformed)?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| CollaboratorError::Malformed("completion had no content".to_string()))
    }
}

fn classifier_prompt(text: &str) -> String {
    format!(
        r#"Analyze this customer request and extract the intent and any relevant information:

Customer: "{text}"

Please respond in this exact JSON format:
{{
  "intent": "start|stop|missed|live_agent|unknown",
  "confidence": 0.0-1.0,
  "entities": {{
    "address": "extracted address if mentioned",
    "name": "extracted name if mentioned"
  }},
  "reasoning": "brief explanation of why this intent was chosen"
}}

Intent meanings:
- "start": Customer wants to start delivery service
- "stop": Customer wants to stop delivery service
- "missed": Customer is reporting a missed delivery
- "live_agent": Customer wants to speak to a human
- "unknown": Intent is unclear or doesn't match above"#
    )
}

fn parse_intent_reply(raw: &str) -> Result<ClassifierVerdict, CollaboratorError> {
    // Models sometimes wrap JSON in a code fence.
    let body = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let reply: IntentReply = serde_json::from_str(body).map_err(malformed)?;

    let mut entities = Entities::new();
    for (kind, value) in reply.entities {
        let values: Vec<String> = match value {
            serde_json::Value::String(s) => vec![s],
            serde_json::Value::Array(items) => items
                .into_iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        let values: Vec<String> = values
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        if !values.is_empty() {
            entities.insert(kind, values);
        }
    }

    if let Some(reasoning) = reply.reasoning.as_deref() {
        tracing::debug!(intent = %reply.intent, reasoning, "OpenAI intent reasoning");
    }

    Ok(ClassifierVerdict {
        intent: Intent::parse(&reply.intent),
        confidence: reply.confidence.clamp(0.0, 1.0),
        entities,
    })
}

fn generator_prompt(
    context: PromptContext,
    last_utterance: Option<&str>,
    extras: &PromptExtras,
) -> String {
    let mut prompt = format!("Current context: {}\n", context.instruction());
    if let Some(said) = last_utterance.filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!("Customer just said: \"{said}\"\n"));
    }
    if let Some(address) = &extras.address {
        prompt.push_str(&format!("Address to confirm: \"{address}\"\n"));
    }
    if let Some(intent) = extras.intent {
        prompt.push_str(&format!("Detected intent: {intent}\n"));
    }
    if let Some(name) = &extras.first_name {
        prompt.push_str(&format!("Customer first name: {name}\n"));
    }
    if context == PromptContext::Greeting {
        prompt.push_str(
            "\nRespond ONLY with what the agent should say to greet the customer. \
             Do NOT include any \"Customer:\" or \"Agent:\" prefixes, and do NOT include \
             any sample conversation. Just the agent greeting.",
        );
    }
    prompt.push_str("\nGenerate a natural, helpful response:");
    prompt
}

/// Greetings sometimes come back as a sample dialogue. Keep only the
/// agent's final line.
fn clean_greeting(raw: &str) -> String {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.to_ascii_lowercase().starts_with("customer:"))
        .collect();
    let last = lines.last().copied().unwrap_or_default();
    let lowered = last.to_ascii_lowercase();
    match lowered.rfind("agent:") {
        Some(at) => last[at + "agent:".len()..].trim().to_string(),
        None => last.to_string(),
    }
}

#[async_trait]
impl IntentClassifier for OpenAi {
    fn method(&self) -> &'static str {
        METHOD
    }

    async fn classify(&self, text: &str) -> Result<ClassifierVerdict, CollaboratorError> {
        let raw = self
            .complete(CLASSIFIER_SYSTEM, &classifier_prompt(text), 200, 0.1)
            .await?;
        parse_intent_reply(&raw)
    }
}

#[async_trait]
impl ResponseGenerator for OpenAi {
    async fn render(
        &self,
        context: PromptContext,
        last_utterance: Option<&str>,
        extras: &PromptExtras,
    ) -> Result<String, CollaboratorError> {
        let prompt = generator_prompt(context, last_utterance, extras);
        let text = self.complete(AGENT_PERSONA, &prompt, 100, 0.6).await?;
        let text = if context == PromptContext::Greeting {
            clean_greeting(&text)
        } else {
            text
        };
        if text.is_empty() {
            return Err(CollaboratorError::Malformed("empty response text".to_string()));
        }
        Ok(text)
    }
}
