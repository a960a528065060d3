//! Carrier webhooks. Every handler answers `200 text/xml`, including on
//! malformed input and panics.

use std::any::Any;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Response, header};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use callflow_core::session::DialogueStep;
use callflow_core::twiml::apology_xml;
use serde::Deserialize;
use tower_http::catch_panic::CatchPanicLayer;

use crate::extract::WebhookForm;
use crate::state::AppState;

/// A carrier markup document.
#[derive(Debug)]
pub struct Twiml(pub String);

impl Twiml {
    pub fn apology() -> Self {
        Twiml(apology_xml())
    }
}

impl IntoResponse for Twiml {
    fn into_response(self) -> axum::response::Response {
        ([(header::CONTENT_TYPE, "text/xml")], self.0).into_response()
    }
}

/// Form posted when a call is answered.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VoiceWebhook {
    pub call_sid: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub call_status: Option<String>,
}

/// Form posted after a `<Gather>` collected (or failed to collect) speech.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpeechWebhook {
    pub call_sid: String,
    #[serde(default)]
    pub speech_result: Option<String>,
}

/// Header the carrier repeats unchanged on every retry of one webhook.
pub const IDEMPOTENCY_HEADER: &str = "i-twilio-idempotency-token";

fn delivery_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhook/voice", post(voice))
        .route("/webhook/gather", post(gather_intent))
        .route("/webhook/address", post(gather_address))
        .route("/webhook/confirm", post(gather_confirmation))
        .route("/webhook/name", post(gather_name))
        .layer(CatchPanicLayer::custom(apology_for_panic))
}

fn apology_for_panic(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(detail, "Webhook handler panicked, answering with apology");
    Twiml::apology().into_response()
}

async fn voice(
    State(state): State<AppState>,
    headers: HeaderMap,
    WebhookForm(form): WebhookForm<VoiceWebhook>,
) -> Twiml {
    tracing::info!(
        call_sid = %form.call_sid,
        from = form.from.as_deref().unwrap_or("<unknown>"),
        to = form.to.as_deref().unwrap_or("<unknown>"),
        call_status = form.call_status.as_deref().unwrap_or("<unknown>"),
        "Incoming call"
    );
    Twiml(
        state
            .dialogue
            .handle_call_started(
                &form.call_sid,
                delivery_token(&headers),
                form.from.as_deref(),
            )
            .await,
    )
}

async fn speech(
    state: AppState,
    headers: HeaderMap,
    form: SpeechWebhook,
    expected: DialogueStep,
) -> Twiml {
    let transcript = form.speech_result.as_deref().unwrap_or_default();
    let delivery = delivery_token(&headers);
    tracing::info!(call_sid = %form.call_sid, step = %expected, transcript, delivery, "Speech received");
    Twiml(
        state
            .dialogue
            .handle_speech(&form.call_sid, delivery, expected, transcript)
            .await,
    )
}

async fn gather_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    WebhookForm(form): WebhookForm<SpeechWebhook>,
) -> Twiml {
    speech(state, headers, form, DialogueStep::AwaitIntent).await
}

async fn gather_address(
    State(state): State<AppState>,
    headers: HeaderMap,
    WebhookForm(form): WebhookForm<SpeechWebhook>,
) -> Twiml {
    speech(state, headers, form, DialogueStep::AwaitAddress).await
}

async fn gather_confirmation(
    State(state): State<AppState>,
    headers: HeaderMap,
    WebhookForm(form): WebhookForm<SpeechWebhook>,
) -> Twiml {
    speech(state, headers, form, DialogueStep::AwaitConfirmation).await
}

async fn gather_name(
    State(state): State<AppState>,
    headers: HeaderMap,
    WebhookForm(form): WebhookForm<SpeechWebhook>,
) -> Twiml {
    speech(state, headers, form, DialogueStep::AwaitName).await
}
