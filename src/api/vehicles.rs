use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::IntoParams;

use super::{bad_request, internal_error, AppState, ErrorResponse};
use crate::models::{
    Feature, FeatureCollection, FeatureProperties, Pagination, PointGeometry, PositionWithVehicle,
};

const DEFAULT_LIMIT: u32 = 200;
const MAX_LIMIT: u32 = 2000;

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SnapshotQuery {
    /// City tag; omit to merge all cities
    pub city: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LatestQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: only positions with timestamp strictly after this instant
    pub after: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    /// Search radius in meters
    pub radius: f64,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub after: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryQuery {
    pub since: String,
    pub until: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub after: Option<String>,
    pub city: Option<String>,
}

pub(super) fn parse_instant(
    raw: &str,
    field: &str,
) -> Result<DateTime<Utc>, (StatusCode, Json<ErrorResponse>)> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| bad_request(format!("Invalid {} timestamp: {}", field, raw)))
}

pub(super) fn parse_cursor(
    after: &Option<String>,
) -> Result<Option<DateTime<Utc>>, (StatusCode, Json<ErrorResponse>)> {
    after
        .as_deref()
        .map(|raw| parse_instant(raw, "after"))
        .transpose()
}

fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_LIMIT)
}

pub(super) fn to_feature_collection(
    rows: Vec<PositionWithVehicle>,
    limit: u32,
) -> FeatureCollection {
    let has_more = rows.len() as u32 >= limit;
    let next_cursor = if has_more {
        rows.last().map(|r| r.timestamp.to_rfc3339())
    } else {
        None
    };
    let pagination = Pagination {
        limit,
        count: rows.len(),
        has_more,
        next_cursor,
    };

    let features = rows
        .into_iter()
        .map(|p| Feature {
            r#type: "Feature".to_string(),
            geometry: PointGeometry::new(p.longitude, p.latitude),
            properties: FeatureProperties {
                vehicle_id: p.vehicle_id,
                description: p.description,
                vehicle_type: p.vehicle_type,
                bearing: p.bearing,
                speed: p.speed,
                is_driving: p.is_driving,
                city: p.city,
                timestamp: p.timestamp.to_rfc3339(),
                trail: None,
            },
        })
        .collect();

    FeatureCollection::with_pagination(features, pagination)
}

/// Realtime snapshot: latest position and trail per vehicle, straight from
/// the in-memory view the collector rebuilds each cycle
#[utoipa::path(
    get,
    path = "/vehicles",
    params(SnapshotQuery),
    responses(
        (status = 200, description = "Realtime vehicle snapshot", body = FeatureCollection)
    ),
    tag = "vehicles"
)]
pub async fn get_snapshot(
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> Json<FeatureCollection> {
    let snapshots = state.snapshots.read().await;
    let features = match &query.city {
        Some(city) => snapshots
            .get(city)
            .map(|fc| fc.features.clone())
            .unwrap_or_default(),
        None => snapshots
            .values()
            .flat_map(|fc| fc.features.iter().cloned())
            .collect(),
    };
    Json(FeatureCollection::new(features))
}

/// Latest stored position per vehicle, cursor-paginated
#[utoipa::path(
    get,
    path = "/vehicles/latest",
    params(LatestQuery),
    responses(
        (status = 200, description = "Latest positions", body = FeatureCollection),
        (status = 400, description = "Invalid cursor", body = ErrorResponse),
        (status = 500, description = "Store failure", body = ErrorResponse)
    ),
    tag = "vehicles"
)]
pub async fn get_latest(
    State(state): State<AppState>,
    Query(query): Query<LatestQuery>,
) -> Result<Json<FeatureCollection>, (StatusCode, Json<ErrorResponse>)> {
    let after = parse_cursor(&query.after)?;
    let limit = clamp_limit(query.limit);
    let rows = state
        .store
        .get_latest_positions(limit, after, query.city.as_deref())
        .await
        .map_err(internal_error)?;
    Ok(Json(to_feature_collection(rows, limit)))
}

/// Latest-per-vehicle positions within a radius of a point
#[utoipa::path(
    get,
    path = "/vehicles/nearby",
    params(NearbyQuery),
    responses(
        (status = 200, description = "Nearby vehicles", body = FeatureCollection),
        (status = 400, description = "Invalid parameters", body = ErrorResponse),
        (status = 500, description = "Store failure", body = ErrorResponse)
    ),
    tag = "vehicles"
)]
pub async fn get_nearby(
    State(state): State<AppState>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<FeatureCollection>, (StatusCode, Json<ErrorResponse>)> {
    if !(-90.0..=90.0).contains(&query.lat) || !(-180.0..=180.0).contains(&query.lng) {
        return Err(bad_request("Coordinates out of range"));
    }
    if query.radius <= 0.0 {
        return Err(bad_request("Radius must be positive"));
    }
    let after = parse_cursor(&query.after)?;
    let limit = clamp_limit(query.limit);
    let rows = state
        .store
        .get_nearby_vehicles(
            query.lat,
            query.lng,
            query.radius,
            limit,
            after,
            query.city.as_deref(),
        )
        .await
        .map_err(internal_error)?;
    Ok(Json(to_feature_collection(rows, limit)))
}

/// Raw samples for one vehicle within a time window
#[utoipa::path(
    get,
    path = "/vehicles/{vehicle_id}/history",
    params(
        ("vehicle_id" = String, Path, description = "Vehicle identifier"),
        HistoryQuery
    ),
    responses(
        (status = 200, description = "Position history", body = FeatureCollection),
        (status = 400, description = "Invalid window or cursor", body = ErrorResponse),
        (status = 500, description = "Store failure", body = ErrorResponse)
    ),
    tag = "vehicles"
)]
pub async fn get_history(
    State(state): State<AppState>,
    Path(vehicle_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<FeatureCollection>, (StatusCode, Json<ErrorResponse>)> {
    let since = parse_instant(&query.since, "since")?;
    let until = parse_instant(&query.until, "until")?;
    if until < since {
        return Err(bad_request("until must not precede since"));
    }
    let after = parse_cursor(&query.after)?;
    let limit = clamp_limit(query.limit);
    let rows = state
        .store
        .get_vehicle_history(&vehicle_id, since, until, limit, after, query.city.as_deref())
        .await
        .map_err(internal_error)?;
    Ok(Json(to_feature_collection(rows, limit)))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_snapshot))
        .route("/latest", get(get_latest))
        .route("/nearby", get(get_nearby))
        .route("/{vehicle_id}/history", get(get_history))
        .with_state(state)
}
