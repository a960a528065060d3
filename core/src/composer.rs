use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::SpeechSynthesizer;
use crate::error::CollaboratorError;
use crate::tiers::{TierOutcome, resolve_tiers};
use crate::twiml::{NextAction, ProtocolResponse, Speech};

/// What to speak when synthesized audio cannot be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechFallback {
    /// Let the carrier read the prompt with its own voice.
    Say { voice: String },
    /// Emit no spoken content for the turn.
    Silent,
}

/// Turns a prompt and the next action into a carrier response.
#[derive(Clone)]
pub struct ResponseComposer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    timeout: Duration,
    fallback: SpeechFallback,
}

impl ResponseComposer {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        timeout: Duration,
        fallback: SpeechFallback,
    ) -> Self {
        Self {
            synthesizer,
            timeout,
            fallback,
        }
    }

    pub async fn compose(&self, prompt_text: &str, next: NextAction) -> ProtocolResponse {
        let text = prompt_text.trim();
        if text.is_empty() {
            return ProtocolResponse {
                speech: Speech::Silent,
                next,
            };
        }

        let outcome = resolve_tiers(
            "speech_synthesizer",
            self.timeout,
            async {
                let audio = self.synthesizer.synthesize(text).await?;
                Ok::<_, CollaboratorError>(Speech::Audio(audio.url))
            },
            |_| true,
            || match &self.fallback {
                SpeechFallback::Say { voice } => Some(Speech::Say {
                    text: text.to_string(),
                    voice: voice.clone(),
                }),
                SpeechFallback::Silent => None,
            },
        )
        .await;

        let speech = match outcome {
            TierOutcome::Primary(speech) | TierOutcome::Fallback(speech) => speech,
            TierOutcome::Unavailable => {
                tracing::warn!("No synthesized audio for prompt, turn will be silent");
                Speech::Silent
            }
        };

        ProtocolResponse { speech, next }
    }
}
