use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use super::{internal_error, AppState, ErrorResponse};
use crate::models::StoreStats;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    #[serde(flatten)]
    pub stats: StoreStats,
}

/// Health check with store aggregates
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 500, description = "Store unavailable", body = ErrorResponse)
    ),
    tag = "system"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<ErrorResponse>)> {
    let stats = state.store.get_stats().await.map_err(internal_error)?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        stats,
    }))
}

/// Store statistics
#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, description = "Aggregate store statistics", body = StoreStats),
        (status = 500, description = "Store unavailable", body = ErrorResponse)
    ),
    tag = "system"
)]
pub async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<StoreStats>, (StatusCode, Json<ErrorResponse>)> {
    let stats = state.store.get_stats().await.map_err(internal_error)?;
    Ok(Json(stats))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .with_state(state)
}
