use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use callflow_core::dialogue::DialogueController;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod error;
mod extract;
mod middleware;
mod providers;
mod routes;
mod state;
mod store;

const SWEEP_EVERY: Duration = Duration::from_secs(60);
const AUDIO_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const AUDIO_CLEANUP_EVERY: Duration = Duration::from_secs(60 * 60);

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Callflow API",
        version = "0.1.0",
        description = "Voice dialogue webhooks for delivery service requests, plus read-only call records."
    ),
    paths(
        routes::health::health_check,
        routes::records::list_customers,
        routes::records::list_service_requests,
        routes::records::list_call_logs,
    ),
    components(schemas(
        routes::health::HealthResponse,
        callflow_core::error::ApiError,
        callflow_core::records::Customer,
        callflow_core::records::ServiceRequest,
        callflow_core::records::RequestStatus,
        callflow_core::records::CallLog,
        callflow_core::records::CallStatus,
        callflow_core::records::TraceEntry,
        callflow_core::records::Speaker,
        callflow_core::records::CustomerWithRequests,
        callflow_core::records::ServiceRequestWithCustomer,
        callflow_core::records::CallLogWithCustomer,
        callflow_core::records::RecordStats,
        callflow_core::session::Intent,
        callflow_core::session::DialogueStep,
    ))
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "callflow_api=debug,callflow_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = config::AppConfig::from_env().expect("Invalid configuration");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let records = Arc::new(store::PgRecords::new(pool));
    let collaborators = providers::build_collaborators(&config, records.clone());
    let dialogue = Arc::new(DialogueController::new(
        config.dialogue.clone(),
        collaborators,
    ));

    dialogue.sessions().clone().spawn_sweeper(SWEEP_EVERY);
    providers::elevenlabs::spawn_audio_cleanup(
        config.audio_dir.clone(),
        AUDIO_MAX_AGE,
        AUDIO_CLEANUP_EVERY,
    );

    let app_state = state::AppState {
        dialogue,
        records,
    };

    let cors_layer = middleware::cors::build_cors_layer(&config.cors_origins);

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::webhook::router().layer(middleware::rate_limit::webhook_layer()))
        .merge(routes::records::router().layer(middleware::rate_limit::records_layer()))
        .nest_service("/audio", ServeDir::new(&config.audio_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        %addr,
        base_url = %config.base_url,
        live_agent = %config.dialogue.live_agent_number,
        "Callflow API listening"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
