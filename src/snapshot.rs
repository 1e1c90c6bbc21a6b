//! Realtime snapshot: the point-plus-trail view of "now" for one city,
//! rebuilt after each poll cycle and served straight from memory.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::RwLock;

use crate::config::CollectorConfig;
use crate::models::{Feature, FeatureCollection, FeatureProperties, PointGeometry};
use crate::store::{PositionStore, StoreError};

/// Shared map of city tag to its latest snapshot
pub type SnapshotStore = Arc<RwLock<HashMap<String, FeatureCollection>>>;

pub fn new_snapshot_store() -> SnapshotStore {
    Arc::new(RwLock::new(HashMap::new()))
}

/// Build the realtime FeatureCollection for one city. Geometry is each
/// vehicle's latest coordinate; the trail property runs oldest to newest.
/// Timestamps leave here as RFC 3339 strings only.
pub async fn build_realtime_snapshot(
    store: &PositionStore,
    city: &str,
    config: &CollectorConfig,
) -> Result<FeatureCollection, StoreError> {
    let rows = store
        .get_latest_positions_with_trails(
            config.trail_points,
            Duration::seconds(config.max_gap_secs),
            Some(city),
        )
        .await?;

    let features = rows
        .into_iter()
        .map(|row| {
            let p = row.position;
            Feature {
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
                    trail: Some(row.trail),
                },
            }
        })
        .collect();

    Ok(FeatureCollection::new(features))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PositionSample, VehicleInfo};
    use chrono::{DateTime, TimeZone, Utc};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> PositionStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        PositionStore::from_pool(pool).await.unwrap()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 19, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    async fn seed(store: &PositionStore, positions: &[PositionSample]) {
        store
            .upsert_vehicles(
                &[VehicleInfo {
                    vehicle_id: "v1".to_string(),
                    description: "Plow 1".to_string(),
                    vehicle_type: "LOADER".to_string(),
                }],
                ts(0),
                "st_johns",
            )
            .await
            .unwrap();
        store
            .insert_positions(positions, ts(0), "st_johns")
            .await
            .unwrap();
    }

    fn position(secs: i64, longitude: f64, latitude: f64) -> PositionSample {
        PositionSample {
            vehicle_id: "v1".to_string(),
            timestamp: ts(secs),
            longitude,
            latitude,
            bearing: 90,
            speed: Some(10.0),
            is_driving: "maybe".to_string(),
        }
    }

    #[tokio::test]
    async fn snapshot_is_a_feature_collection() {
        let store = memory_store().await;
        seed(&store, &[position(0, -52.73, 47.56)]).await;

        let snapshot = build_realtime_snapshot(&store, "st_johns", &CollectorConfig::default())
            .await
            .unwrap();
        assert_eq!(snapshot.r#type, "FeatureCollection");
        assert_eq!(snapshot.features.len(), 1);

        let feature = &snapshot.features[0];
        assert_eq!(feature.geometry.r#type, "Point");
        assert_eq!(feature.geometry.coordinates, [-52.73, 47.56]);
        assert_eq!(feature.properties.vehicle_id, "v1");
        assert_eq!(feature.properties.bearing, 90);
    }

    #[tokio::test]
    async fn geometry_is_latest_and_trail_runs_oldest_to_newest() {
        let store = memory_store().await;
        seed(
            &store,
            &[
                position(0, -52.73, 47.56),
                position(6, -52.74, 47.57),
                position(12, -52.75, 47.58),
            ],
        )
        .await;

        let snapshot = build_realtime_snapshot(&store, "st_johns", &CollectorConfig::default())
            .await
            .unwrap();
        let feature = &snapshot.features[0];
        assert_eq!(feature.geometry.coordinates, [-52.75, 47.58]);

        let trail = feature.properties.trail.as_ref().unwrap();
        assert_eq!(trail.len(), 3);
        assert_eq!(trail[0], [-52.73, 47.56]);
        assert_eq!(trail[2], [-52.75, 47.58]);
    }

    #[tokio::test]
    async fn timestamps_are_serialized_strings() {
        let store = memory_store().await;
        seed(&store, &[position(0, -52.73, 47.56)]).await;

        let snapshot = build_realtime_snapshot(&store, "st_johns", &CollectorConfig::default())
            .await
            .unwrap();
        let raw = &snapshot.features[0].properties.timestamp;
        let parsed = DateTime::parse_from_rfc3339(raw).unwrap();
        assert_eq!(parsed.with_timezone(&Utc), ts(0));
    }

    #[tokio::test]
    async fn empty_store_yields_empty_snapshot() {
        let store = memory_store().await;
        let snapshot = build_realtime_snapshot(&store, "st_johns", &CollectorConfig::default())
            .await
            .unwrap();
        assert!(snapshot.features.is_empty());
    }
}
