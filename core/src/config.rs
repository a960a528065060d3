use std::time::Duration;

use crate::composer::SpeechFallback;
use crate::session::DialogueStep;
use crate::twiml::{DEFAULT_SAY_VOICE, GatherDirective};

/// Where and how long the carrier collects speech for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherSettings {
    pub action: String,
    pub speech_timeout: u32,
    pub timeout: u32,
}

impl GatherSettings {
    fn new(action: &str, speech_timeout: u32, timeout: u32) -> Self {
        Self {
            action: action.to_string(),
            speech_timeout,
            timeout,
        }
    }

    pub fn directive(&self) -> GatherDirective {
        GatherDirective {
            action: self.action.clone(),
            speech_timeout: self.speech_timeout,
            timeout: self.timeout,
        }
    }
}

/// Per-collaborator time budgets. All single-digit seconds so the carrier's
/// own timeout never fires first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollaboratorTimeouts {
    pub classifier: Duration,
    pub validator: Duration,
    pub synthesizer: Duration,
    pub generator: Duration,
}

impl Default for CollaboratorTimeouts {
    fn default() -> Self {
        Self {
            classifier: Duration::from_secs(4),
            validator: Duration::from_secs(3),
            synthesizer: Duration::from_secs(5),
            generator: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DialogueConfig {
    /// Minimum classifier confidence before its verdict is trusted.
    pub intent_threshold: f64,
    /// Minimum validator confidence for an address to count as complete.
    pub address_min_confidence: f64,
    pub timeouts: CollaboratorTimeouts,
    pub live_agent_number: String,
    pub intent_gather: GatherSettings,
    pub address_gather: GatherSettings,
    pub confirm_gather: GatherSettings,
    pub name_gather: GatherSettings,
    pub session_ttl: Duration,
    pub max_address_attempts: u32,
    /// Only explicit affirmatives confirm an address.
    pub strict_confirmation: bool,
    pub speech_fallback: SpeechFallback,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            intent_threshold: 0.7,
            address_min_confidence: 0.5,
            timeouts: CollaboratorTimeouts::default(),
            live_agent_number: "+1234567890".to_string(),
            intent_gather: GatherSettings::new("/webhook/gather", 5, 15),
            address_gather: GatherSettings::new("/webhook/address", 5, 20),
            confirm_gather: GatherSettings::new("/webhook/confirm", 3, 10),
            name_gather: GatherSettings::new("/webhook/name", 5, 15),
            session_ttl: Duration::from_secs(15 * 60),
            max_address_attempts: 6,
            strict_confirmation: false,
            speech_fallback: SpeechFallback::Say {
                voice: DEFAULT_SAY_VOICE.to_string(),
            },
        }
    }
}

impl DialogueConfig {
    /// Gather settings for the prompt spoken at `step`. The greeting collects
    /// the intent; ended calls collect nothing.
    pub fn gather_for(&self, step: DialogueStep) -> Option<&GatherSettings> {
        match step {
            DialogueStep::Greeting | DialogueStep::AwaitIntent => Some(&self.intent_gather),
            DialogueStep::AwaitAddress => Some(&self.address_gather),
            DialogueStep::AwaitConfirmation => Some(&self.confirm_gather),
            DialogueStep::AwaitName => Some(&self.name_gather),
            DialogueStep::Completed | DialogueStep::Forwarded => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_steps_have_distinct_endpoints() {
        let config = DialogueConfig::default();
        let actions: Vec<&str> = [
            DialogueStep::AwaitIntent,
            DialogueStep::AwaitAddress,
            DialogueStep::AwaitConfirmation,
            DialogueStep::AwaitName,
        ]
        .into_iter()
        .map(|step| {
            config
                .gather_for(step)
                .expect("collecting step should gather")
                .action
                .as_str()
        })
        .collect();
        assert_eq!(
            actions,
            vec!["/webhook/gather", "/webhook/address", "/webhook/confirm", "/webhook/name"]
        );
        assert_eq!(
            config.gather_for(DialogueStep::Greeting),
            config.gather_for(DialogueStep::AwaitIntent)
        );
        assert!(config.gather_for(DialogueStep::Completed).is_none());
        assert!(config.gather_for(DialogueStep::Forwarded).is_none());
    }

    #[test]
    fn default_timeouts_fit_a_live_call() {
        let timeouts = CollaboratorTimeouts::default();
        for budget in [
            timeouts.classifier,
            timeouts.validator,
            timeouts.synthesizer,
            timeouts.generator,
        ] {
            assert!(budget < Duration::from_secs(10));
        }
    }
}
