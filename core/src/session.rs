use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Where a call currently is in the dialogue. The step alone decides which
/// input is expected next and which component handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DialogueStep {
    Greeting,
    AwaitIntent,
    AwaitAddress,
    AwaitConfirmation,
    AwaitName,
    Completed,
    Forwarded,
}

impl DialogueStep {
    pub fn as_str(self) -> &'static str {
        match self {
            DialogueStep::Greeting => "GREETING",
            DialogueStep::AwaitIntent => "AWAIT_INTENT",
            DialogueStep::AwaitAddress => "AWAIT_ADDRESS",
            DialogueStep::AwaitConfirmation => "AWAIT_CONFIRMATION",
            DialogueStep::AwaitName => "AWAIT_NAME",
            DialogueStep::Completed => "COMPLETED",
            DialogueStep::Forwarded => "FORWARDED",
        }
    }
}

impl std::fmt::Display for DialogueStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The caller's high-level goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Start,
    Missed,
    Stop,
    LiveAgent,
    Unknown,
}

impl Intent {
    /// Fixed declaration order; keyword-score ties resolve to the earliest entry.
    pub const CATEGORIES: [Intent; 4] = [
        Intent::Start,
        Intent::Missed,
        Intent::Stop,
        Intent::LiveAgent,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Start => "start",
            Intent::Missed => "missed",
            Intent::Stop => "stop",
            Intent::LiveAgent => "live_agent",
            Intent::Unknown => "unknown",
        }
    }

    /// Lenient parse used for classifier output. Anything unrecognised is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "start" => Intent::Start,
            "missed" | "miss" => Intent::Missed,
            "stop" => Intent::Stop,
            "live_agent" | "agent" | "human" => Intent::LiveAgent,
            _ => Intent::Unknown,
        }
    }

    /// Intents that produce a service request when the dialogue completes.
    pub fn is_service_intent(self) -> bool {
        matches!(self, Intent::Start | Intent::Missed | Intent::Stop)
    }

    /// Phrase used in the completion prompt.
    pub fn completion_phrase(self) -> &'static str {
        match self {
            Intent::Start => "start your delivery service",
            Intent::Missed => "report your missed delivery",
            Intent::Stop => "stop your delivery service",
            Intent::LiveAgent | Intent::Unknown => "process your request",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerName {
    pub first_name: String,
    pub last_name: String,
}

/// The reply produced for the most recent turn, kept so that a retried
/// delivery of the same turn can be answered without re-running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnMemo {
    /// Carrier idempotency token of the delivery that produced `reply`.
    pub delivery: Option<String>,
    pub expected: DialogueStep,
    pub transcript: String,
    pub reply: String,
}

impl TurnMemo {
    /// A delivery is a retry only when the carrier tagged both attempts with
    /// the same token. Identical speech without a token is a fresh turn.
    pub fn is_retry_of(
        &self,
        delivery: Option<&str>,
        expected: DialogueStep,
        transcript: &str,
    ) -> bool {
        match (self.delivery.as_deref(), delivery) {
            (Some(seen), Some(token)) => {
                seen == token && self.expected == expected && self.transcript == transcript
            }
            _ => false,
        }
    }
}

/// Mutable per-call record tracking dialogue progress between webhook turns.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: String,
    pub step: DialogueStep,
    pub intent: Option<Intent>,
    /// Merged address fragments; only ever grown through `address::merge`.
    pub address: Option<String>,
    pub caller_name: Option<CallerName>,
    pub caller_number: Option<String>,
    /// Address turns taken so far.
    pub address_attempts: u32,
    /// Consecutive address turns that added nothing to the accumulator.
    pub address_stalls: u32,
    pub last_turn: Option<TurnMemo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new(call_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            call_id: call_id.into(),
            step: DialogueStep::Greeting,
            intent: None,
            address: None,
            caller_name: None,
            caller_number: None,
            address_attempts: 0,
            address_stalls: 0,
            last_turn: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn advance(&mut self, next: DialogueStep) {
        self.step = next;
        self.updated_at = Utc::now();
    }
}
