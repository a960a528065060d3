use serde::{Deserialize, Serialize};

/// Spoken when the caller explicitly asks for a person.
pub const LIVE_AGENT_TRANSFER: &str = "I'll connect you to a live representative right away.";

/// Spoken when no serviceable intent could be recognised.
pub const UNCLEAR_TRANSFER: &str =
    "I'm having trouble understanding your request. Let me connect you to a live representative.";

/// Spoken when the address loop stops making progress.
pub const ADDRESS_TRANSFER: &str =
    "I'm having trouble getting your full address. Let me connect you to a live representative.";

/// Spoken (never synthesized) when a turn fails outright.
pub const APOLOGY: &str = "Sorry, an error occurred. Please try again later.";

/// Stage of the conversation a prompt is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptContext {
    Greeting,
    IntentClarification,
    AddressRequest,
    AddressConfirmation,
    NameRequest,
    Completion,
    SmallTalk,
    ErrorRecovery,
}

impl PromptContext {
    pub fn as_str(self) -> &'static str {
        match self {
            PromptContext::Greeting => "greeting",
            PromptContext::IntentClarification => "intent_clarification",
            PromptContext::AddressRequest => "address_request",
            PromptContext::AddressConfirmation => "address_confirmation",
            PromptContext::NameRequest => "name_request",
            PromptContext::Completion => "completion",
            PromptContext::SmallTalk => "small_talk",
            PromptContext::ErrorRecovery => "error_recovery",
        }
    }

    /// What the agent is supposed to achieve at this stage. Handed to
    /// generative providers as part of their instructions.
    pub fn instruction(self) -> &'static str {
        match self {
            PromptContext::Greeting => {
                "The customer has just called and you need to greet them and ask how you can help."
            }
            PromptContext::IntentClarification => {
                "The customer's request is unclear. Ask them to clarify what they want to do (start, stop, or report missed delivery)."
            }
            PromptContext::AddressRequest => {
                "Ask the customer for their full address including street number, street name, city, and zip code."
            }
            PromptContext::AddressConfirmation => {
                "Confirm the address you heard and ask if it's correct."
            }
            PromptContext::NameRequest => "Ask the customer for their first and last name.",
            PromptContext::Completion => {
                "Thank the customer and confirm their request has been submitted."
            }
            PromptContext::SmallTalk => {
                "Handle general conversation, questions about the company, or other non-service requests."
            }
            PromptContext::ErrorRecovery => {
                "Something went wrong or the customer seems confused. Help them get back on track."
            }
        }
    }

    /// Deterministic text used whenever the response generator is unavailable.
    pub fn fallback_text(self, extras: &PromptExtras) -> String {
        match self {
            PromptContext::Greeting => {
                "Thank you for calling the distribution center. How can I help you today?".to_string()
            }
            PromptContext::IntentClarification => "I'm having trouble understanding your request. \
                 Could you please tell me if you want to start delivery service, report a missed delivery, \
                 or stop your delivery service?"
                .to_string(),
            PromptContext::AddressRequest => {
                "Please provide your full address including street number, street name, city, and zip code."
                    .to_string()
            }
            PromptContext::AddressConfirmation => match extras.address.as_deref() {
                Some(address) => format!("I heard your address as: {address}. Is this correct?"),
                None => "Could you confirm your address is correct?".to_string(),
            },
            PromptContext::NameRequest => "Please provide your first and last name.".to_string(),
            PromptContext::Completion => match (extras.first_name.as_deref(), extras.intent) {
                (Some(name), Some(intent)) => format!(
                    "Thank you, {name}. Your request to {} has been submitted and will be processed shortly.",
                    intent.completion_phrase()
                ),
                _ => "Thank you for your request. It has been submitted and will be processed shortly."
                    .to_string(),
            },
            PromptContext::SmallTalk => {
                "I'm here to help with your delivery service needs. How can I assist you today?"
                    .to_string()
            }
            PromptContext::ErrorRecovery => {
                "I apologize for the confusion. Let me help you with your delivery service request."
                    .to_string()
            }
        }
    }
}

/// Extra facts a prompt may mention.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptExtras {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<crate::session::Intent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
}
