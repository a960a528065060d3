use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use callflow_core::records::{CallLogWithCustomer, CustomerWithRequests, ServiceRequestWithCustomer};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::error::AppError;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/customers", get(list_customers))
        .route("/api/service-requests", get(list_service_requests))
        .route("/api/call-logs", get(list_call_logs))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListParams {
    /// Maximum number of rows, newest first (1-500, default 100)
    pub limit: Option<i64>,
}

impl ListParams {
    fn limit(&self) -> Result<usize, AppError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(AppError::Validation {
                message: format!("limit must be between 1 and {MAX_LIMIT}"),
                field: Some("limit".to_string()),
                received: Some(serde_json::json!(limit)),
                docs_hint: None,
            });
        }
        Ok(limit as usize)
    }
}

/// Customers with their service requests
#[utoipa::path(
    get,
    path = "/api/customers",
    params(ListParams),
    responses(
        (status = 200, description = "Customers, newest first", body = Vec<CustomerWithRequests>),
        (status = 400, description = "Invalid limit", body = callflow_core::error::ApiError)
    ),
    tag = "records"
)]
pub async fn list_customers(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<CustomerWithRequests>>, AppError> {
    let limit = params.limit()?;
    Ok(Json(state.records.list_customers(limit).await?))
}

/// Service requests with their customer
#[utoipa::path(
    get,
    path = "/api/service-requests",
    params(ListParams),
    responses(
        (status = 200, description = "Service requests, newest first", body = Vec<ServiceRequestWithCustomer>),
        (status = 400, description = "Invalid limit", body = callflow_core::error::ApiError)
    ),
    tag = "records"
)]
pub async fn list_service_requests(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ServiceRequestWithCustomer>>, AppError> {
    let limit = params.limit()?;
    Ok(Json(state.records.list_service_requests(limit).await?))
}

/// Call logs with conversation trace and customer
#[utoipa::path(
    get,
    path = "/api/call-logs",
    params(ListParams),
    responses(
        (status = 200, description = "Call logs, newest first", body = Vec<CallLogWithCustomer>),
        (status = 400, description = "Invalid limit", body = callflow_core::error::ApiError)
    ),
    tag = "records"
)]
pub async fn list_call_logs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<CallLogWithCustomer>>, AppError> {
    let limit = params.limit()?;
    Ok(Json(state.records.list_call_logs(limit).await?))
}
