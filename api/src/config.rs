use std::path::PathBuf;
use std::time::Duration;

use callflow_core::composer::SpeechFallback;
use callflow_core::config::DialogueConfig;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Credentials and endpoints of the external providers. A `None` key means
/// the provider is not configured.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub use_rasa: bool,
    pub rasa_endpoint: String,
    pub google_maps_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub elevenlabs_voice_id: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    /// Public base URL the carrier uses to fetch synthesized audio.
    pub base_url: String,
    pub audio_dir: PathBuf,
    pub cors_origins: String,
    pub providers: ProviderSettings,
    pub dialogue: DialogueConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let port = parse_or(&var, "PORT", 3000u16)?;
        let base_url = var("BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&base_url).map_err(|_| ConfigError::Invalid {
            key: "BASE_URL",
            value: base_url.clone(),
        })?;

        let mut dialogue = DialogueConfig::default();
        if let Some(number) = var("LIVE_AGENT_NUMBER") {
            dialogue.live_agent_number = number;
        }
        dialogue.intent_threshold =
            parse_or(&var, "INTENT_CONFIDENCE_THRESHOLD", dialogue.intent_threshold)?;
        if !(0.0..=1.0).contains(&dialogue.intent_threshold) {
            return Err(ConfigError::Invalid {
                key: "INTENT_CONFIDENCE_THRESHOLD",
                value: dialogue.intent_threshold.to_string(),
            });
        }
        dialogue.session_ttl = Duration::from_secs(parse_or(
            &var,
            "SESSION_TTL_SECS",
            dialogue.session_ttl.as_secs(),
        )?);
        dialogue.max_address_attempts =
            parse_or(&var, "MAX_ADDRESS_ATTEMPTS", dialogue.max_address_attempts)?;
        dialogue.strict_confirmation =
            parse_or(&var, "STRICT_CONFIRMATION", dialogue.strict_confirmation)?;

        let timeouts = &mut dialogue.timeouts;
        timeouts.classifier = millis_or(&var, "CLASSIFIER_TIMEOUT_MS", timeouts.classifier)?;
        timeouts.validator = millis_or(&var, "VALIDATOR_TIMEOUT_MS", timeouts.validator)?;
        timeouts.synthesizer = millis_or(&var, "SYNTHESIZER_TIMEOUT_MS", timeouts.synthesizer)?;
        timeouts.generator = millis_or(&var, "GENERATOR_TIMEOUT_MS", timeouts.generator)?;

        let voice = var("SPEECH_FALLBACK_VOICE").unwrap_or_else(|| "alice".to_string());
        dialogue.speech_fallback = match var("SPEECH_FALLBACK").as_deref() {
            None | Some("say") => SpeechFallback::Say { voice },
            Some("silent") => SpeechFallback::Silent,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "SPEECH_FALLBACK",
                    value: other.to_string(),
                });
            }
        };

        let providers = ProviderSettings {
            openai_api_key: var("OPENAI_API_KEY").filter(|v| !is_placeholder(v)),
            openai_model: var("OPENAI_MODEL").unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
            use_rasa: parse_or(&var, "USE_RASA", false)?,
            rasa_endpoint: var("RASA_ENDPOINT")
                .unwrap_or_else(|| "http://localhost:5005".to_string()),
            google_maps_api_key: var("GOOGLE_MAPS_API_KEY").filter(|v| !is_placeholder(v)),
            elevenlabs_api_key: var("ELEVENLABS_API_KEY").filter(|v| !is_placeholder(v)),
            elevenlabs_voice_id: var("ELEVENLABS_VOICE_ID")
                .unwrap_or_else(|| "21m00Tcm4TlvDq8ikWAM".to_string()),
        };

        Ok(Self {
            database_url,
            port,
            base_url,
            audio_dir: PathBuf::from(var("AUDIO_DIR").unwrap_or_else(|| "./audio".to_string())),
            cors_origins: var("CALLFLOW_CORS_ORIGINS")
                .unwrap_or_else(|| "http://localhost:3001".to_string()),
            providers,
            dialogue,
        })
    }
}

/// Sample `.env` values like `your_openai_api_key_here` mean "not set".
fn is_placeholder(value: &str) -> bool {
    let lowered = value.to_ascii_lowercase();
    lowered.starts_with("your_") || lowered.ends_with("_here")
}

fn parse_or<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match var(key) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn millis_or(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let millis = parse_or(var, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}
