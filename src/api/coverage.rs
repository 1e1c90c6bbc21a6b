use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::IntoParams;

use super::vehicles::{parse_cursor, parse_instant, to_feature_collection};
use super::{internal_error, AppState, ErrorResponse};
use crate::models::{CoverageFeature, CoverageFeatureCollection, FeatureCollection};

fn default_limit() -> u32 {
    200
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CoverageQuery {
    pub since: String,
    pub until: String,
    pub city: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CoverageRawQuery {
    pub since: String,
    pub until: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub after: Option<String>,
    pub city: Option<String>,
}

/// Segmented, downsampled coverage trails for a time window. Fully
/// historical windows are answered from the disk cache when possible;
/// cache trouble silently degrades to a recompute.
#[utoipa::path(
    get,
    path = "/coverage",
    params(CoverageQuery),
    responses(
        (status = 200, description = "Coverage trails", body = CoverageFeatureCollection),
        (status = 400, description = "Invalid window", body = ErrorResponse),
        (status = 500, description = "Store failure", body = ErrorResponse)
    ),
    tag = "coverage"
)]
pub async fn get_coverage_trails(
    State(state): State<AppState>,
    Query(query): Query<CoverageQuery>,
) -> Result<Json<CoverageFeatureCollection>, (StatusCode, Json<ErrorResponse>)> {
    let since = parse_instant(&query.since, "since")?;
    let until = parse_instant(&query.until, "until")?;
    if until < since {
        return Err(super::bad_request("until must not precede since"));
    }

    // The cache key carries only the window, so a city-filtered request
    // bypasses it rather than poison cross-city results
    let use_cache = query.city.is_none();

    if use_cache {
        if let Some(trails) = state.cache.get(since, until) {
            let features = trails.into_iter().map(CoverageFeature::from).collect();
            return Ok(Json(CoverageFeatureCollection::new(features)));
        }
    }

    let trails = state
        .store
        .get_coverage_trails(
            since,
            until,
            query.city.as_deref(),
            chrono::Duration::seconds(state.collector_config.max_gap_secs),
            chrono::Duration::seconds(state.collector_config.bucket_secs),
        )
        .await
        .map_err(internal_error)?;

    if use_cache {
        state.cache.put(since, until, &trails);
    }

    let features = trails.into_iter().map(CoverageFeature::from).collect();
    Ok(Json(CoverageFeatureCollection::new(features)))
}

/// Raw window samples across all vehicles, cursor-paginated
#[utoipa::path(
    get,
    path = "/coverage/raw",
    params(CoverageRawQuery),
    responses(
        (status = 200, description = "Raw coverage samples", body = FeatureCollection),
        (status = 400, description = "Invalid window or cursor", body = ErrorResponse),
        (status = 500, description = "Store failure", body = ErrorResponse)
    ),
    tag = "coverage"
)]
pub async fn get_coverage_raw(
    State(state): State<AppState>,
    Query(query): Query<CoverageRawQuery>,
) -> Result<Json<FeatureCollection>, (StatusCode, Json<ErrorResponse>)> {
    let since = parse_instant(&query.since, "since")?;
    let until = parse_instant(&query.until, "until")?;
    if until < since {
        return Err(super::bad_request("until must not precede since"));
    }
    let after = parse_cursor(&query.after)?;
    let limit = query.limit.clamp(1, 2000);
    let rows = state
        .store
        .get_coverage(since, until, limit, after, query.city.as_deref())
        .await
        .map_err(internal_error)?;
    Ok(Json(to_feature_collection(rows, limit)))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_coverage_trails))
        .route("/raw", get(get_coverage_raw))
        .with_state(state)
}
