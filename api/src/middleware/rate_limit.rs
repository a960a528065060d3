use axum::http::{HeaderValue, Response, StatusCode, header};
use callflow_core::twiml::apology_xml;
use tower_governor::{
    GovernorError, GovernorLayer, governor::GovernorConfigBuilder,
    key_extractor::SmartIpKeyExtractor,
};

type RateLimitLayer =
    GovernorLayer<SmartIpKeyExtractor, governor::middleware::NoOpMiddleware, axum::body::Body>;

/// Rate limit for GET /api/*: 120 requests/minute per IP.
pub fn records_layer() -> RateLimitLayer {
    GovernorLayer::new(
        GovernorConfigBuilder::default()
            .per_millisecond(500) // 120 per minute = 2 per second replenish
            .burst_size(30)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("invalid governor config for records"),
    )
    .error_handler(json_error_handler)
}

/// Rate limit for POST /webhook/*: 20 requests/second per IP. The carrier
/// posts from a small pool of addresses for all calls, so this only stops
/// runaway clients.
pub fn webhook_layer() -> RateLimitLayer {
    GovernorLayer::new(
        GovernorConfigBuilder::default()
            .per_millisecond(50)
            .burst_size(200)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("invalid governor config for webhooks"),
    )
    .error_handler(twiml_error_handler)
}

fn status_and_wait(err: &GovernorError) -> (StatusCode, Option<u64>, String) {
    match err {
        GovernorError::TooManyRequests { wait_time, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            Some(*wait_time),
            format!("Too many requests. Retry after {wait_time} seconds."),
        ),
        GovernorError::UnableToExtractKey => (
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            "Unable to determine client identity for rate limiting".to_string(),
        ),
        GovernorError::Other { code, msg, .. } => {
            (*code, None, msg.clone().unwrap_or_default())
        }
    }
}

/// JSON error in ApiError format with a Retry-After header.
fn json_error_handler(err: GovernorError) -> Response<axum::body::Body> {
    let (status, retry_after, message) = status_and_wait(&err);
    let body = serde_json::json!({
        "error": callflow_core::error::codes::RATE_LIMITED,
        "message": message,
        "request_id": uuid::Uuid::now_v7().to_string(),
    });

    let mut response = Response::new(axum::body::Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Some(seconds) = retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
    }
    response
}

/// A throttled carrier still gets markup it can play.
fn twiml_error_handler(err: GovernorError) -> Response<axum::body::Body> {
    let (status, _, message) = status_and_wait(&err);
    tracing::warn!(status = %status, message, "Webhook request rate limited");

    let mut response = Response::new(axum::body::Body::from(apology_xml()));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/xml"));
    response
}
