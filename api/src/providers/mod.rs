//! HTTP-backed collaborators. Anything without credentials is wired as
//! `Unconfigured`, so the dialogue falls through to its deterministic tiers.

pub mod elevenlabs;
pub mod geocoding;
pub mod openai;
pub mod rasa;

use std::sync::Arc;
use std::time::Duration;

use callflow_core::collaborators::{
    AddressValidator, IntentClassifier, RequestStore, ResponseGenerator, SpeechSynthesizer,
    TraceWriter, Unconfigured,
};
use callflow_core::dialogue::Collaborators;
use callflow_core::error::CollaboratorError;

use crate::config::AppConfig;

/// Builds a client whose requests give up a little after the dialogue's own
/// budget for that collaborator, so the tier timeout is what callers see.
pub(crate) fn http_client(budget: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(budget + Duration::from_millis(500))
        .build()
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

pub(crate) fn transport(err: reqwest::Error) -> CollaboratorError {
    CollaboratorError::Transport(err.to_string())
}

pub(crate) fn malformed(err: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::Malformed(err.to_string())
}

/// Rejects non-2xx answers with the provider's status and a body excerpt.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(200).collect();
    Err(CollaboratorError::Rejected(format!("{status}: {excerpt}")))
}

pub fn build_collaborators<R>(config: &AppConfig, records: Arc<R>) -> Collaborators
where
    R: TraceWriter + RequestStore + 'static,
{
    let providers = &config.providers;
    let timeouts = &config.dialogue.timeouts;

    let openai = providers.openai_api_key.as_ref().map(|key| {
        Arc::new(openai::OpenAi::new(
            key.clone(),
            providers.openai_model.clone(),
            http_client(timeouts.classifier.max(timeouts.generator)),
        ))
    });

    let classifier: Arc<dyn IntentClassifier> = if providers.use_rasa {
        tracing::info!(endpoint = %providers.rasa_endpoint, "Intent classifier: rasa");
        Arc::new(rasa::Rasa::new(
            providers.rasa_endpoint.clone(),
            http_client(timeouts.classifier),
        ))
    } else if let Some(openai) = &openai {
        tracing::info!(model = %providers.openai_model, "Intent classifier: openai");
        openai.clone()
    } else {
        tracing::info!("Intent classifier: keywords only");
        Arc::new(Unconfigured("openai"))
    };

    let generator: Arc<dyn ResponseGenerator> = match &openai {
        Some(openai) => openai.clone(),
        None => Arc::new(Unconfigured("openai")),
    };

    let validator: Arc<dyn AddressValidator> = match &providers.google_maps_api_key {
        Some(key) => Arc::new(geocoding::GoogleGeocoder::new(
            key.clone(),
            http_client(timeouts.validator),
        )),
        None => {
            tracing::info!("Address validator: heuristic only");
            Arc::new(Unconfigured("google_maps"))
        }
    };

    let synthesizer: Arc<dyn SpeechSynthesizer> = match &providers.elevenlabs_api_key {
        Some(key) => Arc::new(elevenlabs::ElevenLabs::new(
            key.clone(),
            providers.elevenlabs_voice_id.clone(),
            config.audio_dir.clone(),
            config.base_url.clone(),
            http_client(timeouts.synthesizer),
        )),
        None => {
            tracing::info!("Speech synthesizer: not configured");
            Arc::new(Unconfigured("elevenlabs"))
        }
    };

    Collaborators {
        classifier,
        validator,
        synthesizer,
        generator,
        traces: records.clone(),
        requests: records,
    }
}
