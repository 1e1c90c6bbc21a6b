use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Canonical vehicle record produced by the ingestion normalizers.
/// `first_seen`/`last_seen` are owned by the store, not the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleInfo {
    pub vehicle_id: String,
    pub description: String,
    pub vehicle_type: String,
}

/// Canonical position record, provider-independent. One stored row per
/// (vehicle_id, timestamp, city).
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSample {
    pub vehicle_id: String,
    /// Reported instant, already corrected to true UTC
    pub timestamp: DateTime<Utc>,
    pub longitude: f64,
    pub latitude: f64,
    pub bearing: i64,
    pub speed: Option<f64>,
    /// Tri-state driving flag: "yes", "no" or "maybe"
    pub is_driving: String,
}

/// A stored position joined with its vehicle's metadata
#[derive(Debug, Clone, FromRow)]
pub struct PositionWithVehicle {
    pub vehicle_id: String,
    pub timestamp: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
    pub longitude: f64,
    pub latitude: f64,
    pub bearing: i64,
    pub speed: Option<f64>,
    pub is_driving: String,
    pub city: String,
    pub description: String,
    pub vehicle_type: String,
}

/// Latest position of a vehicle plus its recent contiguous trail,
/// oldest to newest, ending at the latest sample
#[derive(Debug, Clone)]
pub struct PositionWithTrail {
    pub position: PositionWithVehicle,
    pub trail: Vec<[f64; 2]>,
    pub trail_timestamps: Vec<DateTime<Utc>>,
}

/// One derived coverage trail: a maximal temporally-contiguous run of one
/// vehicle's downsampled positions. Derived, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Trail {
    pub vehicle_id: String,
    pub description: String,
    pub vehicle_type: String,
    /// [longitude, latitude] pairs, time-ascending
    pub coordinates: Vec<[f64; 2]>,
    /// RFC 3339 timestamps, same length and order as `coordinates`
    pub timestamps: Vec<String>,
}

/// Aggregate store statistics for health and monitoring
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StoreStats {
    pub total_positions: i64,
    pub total_vehicles: i64,
    /// Vehicles whose most recent driving state is the ambiguous "maybe"
    pub active_vehicles: i64,
    pub earliest: Option<String>,
    pub latest: Option<String>,
    /// Database size in bytes
    pub size: i64,
}

// --- GeoJSON view types ---------------------------------------------------
//
// Everything below is the serialized shape exposed to map clients. Internal
// instants never cross this boundary; timestamps are RFC 3339 strings.

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PointGeometry {
    /// Always "Point"
    #[serde(default = "PointGeometry::type_name")]
    pub r#type: String,
    /// [longitude, latitude]
    pub coordinates: [f64; 2],
}

impl PointGeometry {
    fn type_name() -> String {
        "Point".to_string()
    }

    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            r#type: Self::type_name(),
            coordinates: [longitude, latitude],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LineStringGeometry {
    /// Always "LineString"
    #[serde(default = "LineStringGeometry::type_name")]
    pub r#type: String,
    pub coordinates: Vec<[f64; 2]>,
}

impl LineStringGeometry {
    fn type_name() -> String {
        "LineString".to_string()
    }

    pub fn new(coordinates: Vec<[f64; 2]>) -> Self {
        Self {
            r#type: Self::type_name(),
            coordinates,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FeatureProperties {
    pub vehicle_id: String,
    pub description: String,
    pub vehicle_type: String,
    pub bearing: i64,
    pub speed: Option<f64>,
    pub is_driving: String,
    pub city: String,
    /// RFC 3339 reported instant
    pub timestamp: String,
    /// Recent contiguous trail, oldest to newest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trail: Option<Vec<[f64; 2]>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Feature {
    /// Always "Feature"
    #[serde(default = "Feature::type_name")]
    pub r#type: String,
    pub geometry: PointGeometry,
    pub properties: FeatureProperties,
}

impl Feature {
    fn type_name() -> String {
        "Feature".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Pagination {
    pub limit: u32,
    pub count: usize,
    pub has_more: bool,
    /// Timestamp of the last returned item; pass as `after` for the next page
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FeatureCollection {
    /// Always "FeatureCollection"
    #[serde(default = "FeatureCollection::type_name")]
    pub r#type: String,
    pub features: Vec<Feature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

impl FeatureCollection {
    fn type_name() -> String {
        "FeatureCollection".to_string()
    }

    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            r#type: Self::type_name(),
            features,
            pagination: None,
        }
    }

    pub fn with_pagination(features: Vec<Feature>, pagination: Pagination) -> Self {
        Self {
            r#type: Self::type_name(),
            features,
            pagination: Some(pagination),
        }
    }
}

/// Coverage trails as GeoJSON LineString features
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CoverageProperties {
    pub vehicle_id: String,
    pub description: String,
    pub vehicle_type: String,
    pub timestamps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CoverageFeature {
    /// Always "Feature"
    #[serde(default = "Feature::type_name")]
    pub r#type: String,
    pub geometry: LineStringGeometry,
    pub properties: CoverageProperties,
}

impl From<Trail> for CoverageFeature {
    fn from(trail: Trail) -> Self {
        Self {
            r#type: Feature::type_name(),
            geometry: LineStringGeometry::new(trail.coordinates),
            properties: CoverageProperties {
                vehicle_id: trail.vehicle_id,
                description: trail.description,
                vehicle_type: trail.vehicle_type,
                timestamps: trail.timestamps,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CoverageFeatureCollection {
    /// Always "FeatureCollection"
    #[serde(default = "FeatureCollection::type_name")]
    pub r#type: String,
    pub features: Vec<CoverageFeature>,
}

impl CoverageFeatureCollection {
    pub fn new(features: Vec<CoverageFeature>) -> Self {
        Self {
            r#type: FeatureCollection::type_name(),
            features,
        }
    }
}
