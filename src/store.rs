//! SQLite-backed vehicle and position store.
//!
//! Positions form an append-only ledger deduplicated by the
//! (vehicle_id, timestamp, city) primary key; vehicles are upserted with an
//! immutable first_seen. Every method takes fresh pool handles so concurrent
//! callers never share a cursor. Storage errors propagate to the caller;
//! only startup failures are fatal, handled in `main`.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqlitePool;
use tracing::info;

use crate::models::{
    PositionSample, PositionWithTrail, PositionWithVehicle, StoreStats, VehicleInfo,
};
use crate::trails;

/// Meters per degree of latitude; flat-degree approximation is fine at
/// city scale.
const METERS_PER_DEGREE: f64 = 111_320.0;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[derive(Clone)]
pub struct PositionStore {
    pool: SqlitePool,
}

impl PositionStore {
    /// Open (creating if needed) the database and run migrations.
    pub async fn connect(db_path: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", db_path)).await?;
        let store = Self::from_pool(pool).await?;
        info!(db_path, "Database initialized");
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert-or-update vehicles by id. On conflict the description, type,
    /// city and last_seen are overwritten; first_seen never changes.
    pub async fn upsert_vehicles(
        &self,
        vehicles: &[VehicleInfo],
        now: DateTime<Utc>,
        city: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for vehicle in vehicles {
            sqlx::query(
                r#"
                INSERT INTO vehicles (vehicle_id, description, vehicle_type, city, first_seen, last_seen)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (vehicle_id) DO UPDATE SET
                    description = excluded.description,
                    vehicle_type = excluded.vehicle_type,
                    city = excluded.city,
                    last_seen = excluded.last_seen
                "#,
            )
            .bind(&vehicle.vehicle_id)
            .bind(&vehicle.description)
            .bind(&vehicle.vehicle_type)
            .bind(city)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Bulk-insert positions; rows colliding on the primary key are silently
    /// skipped. Returns the number of net-new rows from the engine's
    /// affected-row count.
    pub async fn insert_positions(
        &self,
        positions: &[PositionSample],
        collected_at: DateTime<Utc>,
        city: &str,
    ) -> Result<u64, StoreError> {
        if positions.is_empty() {
            return Ok(0);
        }
        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;
        for position in positions {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO positions
                    (vehicle_id, timestamp, collected_at, longitude, latitude, bearing, speed, is_driving, city)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&position.vehicle_id)
            .bind(position.timestamp)
            .bind(collected_at)
            .bind(position.longitude)
            .bind(position.latitude)
            .bind(position.bearing)
            .bind(position.speed)
            .bind(&position.is_driving)
            .bind(city)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Latest position per vehicle, timestamp-ascending, cursor-paginated:
    /// pass the last returned timestamp as `after` to page forward.
    pub async fn get_latest_positions(
        &self,
        limit: u32,
        after: Option<DateTime<Utc>>,
        city: Option<&str>,
    ) -> Result<Vec<PositionWithVehicle>, StoreError> {
        let rows = sqlx::query_as(
            r#"
            SELECT vehicle_id, timestamp, collected_at, longitude, latitude,
                   bearing, speed, is_driving, city, description, vehicle_type
            FROM (
                SELECT p.vehicle_id, p.timestamp, p.collected_at, p.longitude, p.latitude,
                       p.bearing, p.speed, p.is_driving, p.city,
                       v.description, v.vehicle_type,
                       ROW_NUMBER() OVER (PARTITION BY p.vehicle_id ORDER BY p.timestamp DESC) AS rn
                FROM positions p
                JOIN vehicles v ON v.vehicle_id = p.vehicle_id
                WHERE (? IS NULL OR p.city = ?)
            )
            WHERE rn = 1 AND (? IS NULL OR timestamp > ?)
            ORDER BY timestamp ASC
            LIMIT ?
            "#,
        )
        .bind(city)
        .bind(city)
        .bind(after)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Latest position per vehicle plus its recent trail: the most recent
    /// `trail_points` samples, trimmed to the maximal contiguous run ending
    /// at the newest sample (no internal gap above `max_gap`).
    pub async fn get_latest_positions_with_trails(
        &self,
        trail_points: u32,
        max_gap: Duration,
        city: Option<&str>,
    ) -> Result<Vec<PositionWithTrail>, StoreError> {
        let rows: Vec<PositionWithVehicle> = sqlx::query_as(
            r#"
            SELECT vehicle_id, timestamp, collected_at, longitude, latitude,
                   bearing, speed, is_driving, city, description, vehicle_type
            FROM (
                SELECT p.vehicle_id, p.timestamp, p.collected_at, p.longitude, p.latitude,
                       p.bearing, p.speed, p.is_driving, p.city,
                       v.description, v.vehicle_type,
                       ROW_NUMBER() OVER (PARTITION BY p.vehicle_id ORDER BY p.timestamp DESC) AS rn
                FROM positions p
                JOIN vehicles v ON v.vehicle_id = p.vehicle_id
                WHERE (? IS NULL OR p.city = ?)
            )
            WHERE rn <= ?
            ORDER BY vehicle_id ASC, timestamp ASC
            "#,
        )
        .bind(city)
        .bind(city)
        .bind(trail_points as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::new();
        let mut start = 0;
        while start < rows.len() {
            let mut end = start + 1;
            while end < rows.len() && rows[end].vehicle_id == rows[start].vehicle_id {
                end += 1;
            }
            let samples = &rows[start..end];
            let timestamps: Vec<DateTime<Utc>> = samples.iter().map(|r| r.timestamp).collect();
            let keep_from = trails::contiguous_tail_start(&timestamps, max_gap);
            let kept = &samples[keep_from..];

            results.push(PositionWithTrail {
                position: kept.last().cloned().unwrap_or_else(|| samples[0].clone()),
                trail: kept.iter().map(|r| [r.longitude, r.latitude]).collect(),
                trail_timestamps: kept.iter().map(|r| r.timestamp).collect(),
            });
            start = end;
        }
        Ok(results)
    }

    /// Latest-per-vehicle positions within `radius_m` of a point, using a
    /// flat-degree approximation instead of geodesic distance.
    #[allow(clippy::too_many_arguments)]
    pub async fn get_nearby_vehicles(
        &self,
        lat: f64,
        lng: f64,
        radius_m: f64,
        limit: u32,
        after: Option<DateTime<Utc>>,
        city: Option<&str>,
    ) -> Result<Vec<PositionWithVehicle>, StoreError> {
        let radius_deg = radius_m / METERS_PER_DEGREE;
        let rows = sqlx::query_as(
            r#"
            SELECT vehicle_id, timestamp, collected_at, longitude, latitude,
                   bearing, speed, is_driving, city, description, vehicle_type
            FROM (
                SELECT p.vehicle_id, p.timestamp, p.collected_at, p.longitude, p.latitude,
                       p.bearing, p.speed, p.is_driving, p.city,
                       v.description, v.vehicle_type,
                       ROW_NUMBER() OVER (PARTITION BY p.vehicle_id ORDER BY p.timestamp DESC) AS rn
                FROM positions p
                JOIN vehicles v ON v.vehicle_id = p.vehicle_id
                WHERE (? IS NULL OR p.city = ?)
            )
            WHERE rn = 1
              AND (latitude - ?) * (latitude - ?) + (longitude - ?) * (longitude - ?) <= ?
              AND (? IS NULL OR timestamp > ?)
            ORDER BY timestamp ASC
            LIMIT ?
            "#,
        )
        .bind(city)
        .bind(city)
        .bind(lat)
        .bind(lat)
        .bind(lng)
        .bind(lng)
        .bind(radius_deg * radius_deg)
        .bind(after)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Raw samples for one vehicle within [since, until], cursor-paginated.
    #[allow(clippy::too_many_arguments)]
    pub async fn get_vehicle_history(
        &self,
        vehicle_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: u32,
        after: Option<DateTime<Utc>>,
        city: Option<&str>,
    ) -> Result<Vec<PositionWithVehicle>, StoreError> {
        let rows = sqlx::query_as(
            r#"
            SELECT p.vehicle_id, p.timestamp, p.collected_at, p.longitude, p.latitude,
                   p.bearing, p.speed, p.is_driving, p.city,
                   v.description, v.vehicle_type
            FROM positions p
            JOIN vehicles v ON v.vehicle_id = p.vehicle_id
            WHERE p.vehicle_id = ?
              AND p.timestamp >= ? AND p.timestamp <= ?
              AND (? IS NULL OR p.city = ?)
              AND (? IS NULL OR p.timestamp > ?)
            ORDER BY p.timestamp ASC
            LIMIT ?
            "#,
        )
        .bind(vehicle_id)
        .bind(since)
        .bind(until)
        .bind(city)
        .bind(city)
        .bind(after)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Raw samples for all vehicles within [since, until], cursor-paginated.
    pub async fn get_coverage(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: u32,
        after: Option<DateTime<Utc>>,
        city: Option<&str>,
    ) -> Result<Vec<PositionWithVehicle>, StoreError> {
        let rows = sqlx::query_as(
            r#"
            SELECT p.vehicle_id, p.timestamp, p.collected_at, p.longitude, p.latitude,
                   p.bearing, p.speed, p.is_driving, p.city,
                   v.description, v.vehicle_type
            FROM positions p
            JOIN vehicles v ON v.vehicle_id = p.vehicle_id
            WHERE p.timestamp >= ? AND p.timestamp <= ?
              AND (? IS NULL OR p.city = ?)
              AND (? IS NULL OR p.timestamp > ?)
            ORDER BY p.timestamp ASC
            LIMIT ?
            "#,
        )
        .bind(since)
        .bind(until)
        .bind(city)
        .bind(city)
        .bind(after)
        .bind(after)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Segmented, downsampled coverage trails for the window. See
    /// `trails::derive_coverage_trails` for the algorithm.
    pub async fn get_coverage_trails(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        city: Option<&str>,
        max_gap: Duration,
        bucket: Duration,
    ) -> Result<Vec<crate::models::Trail>, StoreError> {
        let rows: Vec<PositionWithVehicle> = sqlx::query_as(
            r#"
            SELECT p.vehicle_id, p.timestamp, p.collected_at, p.longitude, p.latitude,
                   p.bearing, p.speed, p.is_driving, p.city,
                   v.description, v.vehicle_type
            FROM positions p
            JOIN vehicles v ON v.vehicle_id = p.vehicle_id
            WHERE p.timestamp >= ? AND p.timestamp <= ?
              AND (? IS NULL OR p.city = ?)
            ORDER BY p.vehicle_id ASC, p.timestamp ASC
            "#,
        )
        .bind(since)
        .bind(until)
        .bind(city)
        .bind(city)
        .fetch_all(&self.pool)
        .await?;

        Ok(trails::derive_coverage_trails(&rows, max_gap, bucket))
    }

    /// Read-only aggregates for health and monitoring.
    pub async fn get_stats(&self) -> Result<StoreStats, StoreError> {
        let total_positions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM positions")
            .fetch_one(&self.pool)
            .await?;
        let total_vehicles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vehicles")
            .fetch_one(&self.pool)
            .await?;

        // A vehicle is "active" when its most recent sample still carries the
        // ambiguous driving state the feeds report while a unit is working.
        let active_vehicles: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM (
                SELECT vehicle_id FROM (
                    SELECT vehicle_id, is_driving,
                           ROW_NUMBER() OVER (PARTITION BY vehicle_id ORDER BY timestamp DESC) AS rn
                    FROM positions
                )
                WHERE rn = 1 AND is_driving = 'maybe'
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let (earliest, latest): (Option<DateTime<Utc>>, Option<DateTime<Utc>>) =
            sqlx::query_as("SELECT MIN(timestamp), MAX(timestamp) FROM positions")
                .fetch_one(&self.pool)
                .await?;

        let size: i64 = sqlx::query_scalar(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            total_positions,
            total_vehicles,
            active_vehicles,
            earliest: earliest.map(|t| t.to_rfc3339()),
            latest: latest.map(|t| t.to_rfc3339()),
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> PositionStore {
        // A single connection keeps every handle on the same in-memory db
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        PositionStore::from_pool(pool).await.unwrap()
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_100 + secs, 0).unwrap()
    }

    fn vehicle(id: &str) -> VehicleInfo {
        VehicleInfo {
            vehicle_id: id.to_string(),
            description: format!("Plow {}", id),
            vehicle_type: "LOADER".to_string(),
        }
    }

    fn sample(id: &str, secs: i64) -> PositionSample {
        PositionSample {
            vehicle_id: id.to_string(),
            timestamp: ts(secs),
            longitude: -52.73,
            latitude: 47.56,
            bearing: 135,
            speed: Some(13.4),
            is_driving: "maybe".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_positions_is_idempotent() {
        let store = memory_store().await;
        store
            .upsert_vehicles(&[vehicle("v1")], ts(0), "st_johns")
            .await
            .unwrap();

        let positions = vec![sample("v1", 0)];
        let inserted = store
            .insert_positions(&positions, ts(0), "st_johns")
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let inserted = store
            .insert_positions(&positions, ts(5), "st_johns")
            .await
            .unwrap();
        assert_eq!(inserted, 0);

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_positions, 1);
    }

    #[tokio::test]
    async fn upsert_preserves_first_seen() {
        let store = memory_store().await;
        store
            .upsert_vehicles(&[vehicle("v1")], ts(0), "st_johns")
            .await
            .unwrap();
        store
            .upsert_vehicles(&[vehicle("v1")], ts(600), "st_johns")
            .await
            .unwrap();

        let (first_seen, last_seen): (DateTime<Utc>, DateTime<Utc>) =
            sqlx::query_as("SELECT first_seen, last_seen FROM vehicles WHERE vehicle_id = 'v1'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(first_seen, ts(0));
        assert_eq!(last_seen, ts(600));
    }

    #[tokio::test]
    async fn latest_positions_returns_one_row_per_vehicle() {
        let store = memory_store().await;
        store
            .upsert_vehicles(&[vehicle("v1"), vehicle("v2")], ts(0), "st_johns")
            .await
            .unwrap();
        store
            .insert_positions(
                &[sample("v1", 0), sample("v1", 60), sample("v2", 30)],
                ts(60),
                "st_johns",
            )
            .await
            .unwrap();

        let rows = store.get_latest_positions(10, None, None).await.unwrap();
        assert_eq!(rows.len(), 2);
        // Ascending order by timestamp
        assert_eq!(rows[0].vehicle_id, "v2");
        assert_eq!(rows[1].vehicle_id, "v1");
        assert_eq!(rows[1].timestamp, ts(60));
    }

    #[tokio::test]
    async fn latest_positions_cursor_pages_forward() {
        let store = memory_store().await;
        store
            .upsert_vehicles(&[vehicle("v1"), vehicle("v2"), vehicle("v3")], ts(0), "st_johns")
            .await
            .unwrap();
        store
            .insert_positions(
                &[sample("v1", 10), sample("v2", 20), sample("v3", 30)],
                ts(30),
                "st_johns",
            )
            .await
            .unwrap();

        let page1 = store.get_latest_positions(2, None, None).await.unwrap();
        assert_eq!(page1.len(), 2);
        let cursor = page1.last().unwrap().timestamp;

        let page2 = store
            .get_latest_positions(2, Some(cursor), None)
            .await
            .unwrap();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].vehicle_id, "v3");
    }

    #[tokio::test]
    async fn city_filter_partitions_fleets() {
        let store = memory_store().await;
        store
            .upsert_vehicles(&[vehicle("v1")], ts(0), "st_johns")
            .await
            .unwrap();
        store
            .upsert_vehicles(&[vehicle("v2")], ts(0), "mt_pearl")
            .await
            .unwrap();
        store
            .insert_positions(&[sample("v1", 0)], ts(0), "st_johns")
            .await
            .unwrap();
        store
            .insert_positions(&[sample("v2", 0)], ts(0), "mt_pearl")
            .await
            .unwrap();

        let rows = store
            .get_latest_positions(10, None, Some("mt_pearl"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vehicle_id, "v2");
    }

    #[tokio::test]
    async fn live_trail_is_anchored_at_latest_contiguous_run() {
        let store = memory_store().await;
        store
            .upsert_vehicles(&[vehicle("v1")], ts(0), "st_johns")
            .await
            .unwrap();
        store
            .insert_positions(
                &[
                    sample("v1", 0),
                    sample("v1", 10),
                    sample("v1", 500),
                    sample("v1", 510),
                ],
                ts(510),
                "st_johns",
            )
            .await
            .unwrap();

        let rows = store
            .get_latest_positions_with_trails(4, Duration::seconds(120), None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        // The 490s outage cuts the trail to the {500, 510} pair
        assert_eq!(rows[0].trail.len(), 2);
        assert_eq!(rows[0].trail_timestamps, vec![ts(500), ts(510)]);
        assert_eq!(rows[0].position.timestamp, ts(510));
    }

    #[tokio::test]
    async fn nearby_filters_by_flat_degree_radius() {
        let store = memory_store().await;
        store
            .upsert_vehicles(&[vehicle("near"), vehicle("far")], ts(0), "st_johns")
            .await
            .unwrap();

        let mut near = sample("near", 0);
        near.latitude = 47.56;
        near.longitude = -52.73;
        let mut far = sample("far", 0);
        far.latitude = 47.60; // ~4.4 km north
        far.longitude = -52.73;
        store
            .insert_positions(&[near, far], ts(0), "st_johns")
            .await
            .unwrap();

        let rows = store
            .get_nearby_vehicles(47.56, -52.73, 1000.0, 10, None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vehicle_id, "near");
    }

    #[tokio::test]
    async fn history_is_window_bounded() {
        let store = memory_store().await;
        store
            .upsert_vehicles(&[vehicle("v1")], ts(0), "st_johns")
            .await
            .unwrap();
        store
            .insert_positions(
                &[sample("v1", 0), sample("v1", 100), sample("v1", 1000)],
                ts(1000),
                "st_johns",
            )
            .await
            .unwrap();

        let rows = store
            .get_vehicle_history("v1", ts(0), ts(500), 100, None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.last().unwrap().timestamp, ts(100));
    }

    #[tokio::test]
    async fn coverage_trails_segment_and_downsample() {
        let store = memory_store().await;
        store
            .upsert_vehicles(&[vehicle("v1")], ts(0), "st_johns")
            .await
            .unwrap();
        store
            .insert_positions(
                &[sample("v1", 0), sample("v1", 30), sample("v1", 200)],
                ts(200),
                "st_johns",
            )
            .await
            .unwrap();

        let trails = store
            .get_coverage_trails(
                ts(0),
                ts(300),
                None,
                Duration::seconds(120),
                Duration::seconds(30),
            )
            .await
            .unwrap();
        // {0, 30} survives; the {200} singleton is dropped
        assert_eq!(trails.len(), 1);
        assert_eq!(trails[0].coordinates.len(), 2);
    }

    #[tokio::test]
    async fn stats_count_active_vehicles() {
        let store = memory_store().await;
        store
            .upsert_vehicles(&[vehicle("v1"), vehicle("v2")], ts(0), "st_johns")
            .await
            .unwrap();
        let mut parked = sample("v2", 0);
        parked.is_driving = "no".to_string();
        store
            .insert_positions(&[sample("v1", 0), parked], ts(0), "st_johns")
            .await
            .unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_positions, 2);
        assert_eq!(stats.total_vehicles, 2);
        assert_eq!(stats.active_vehicles, 1);
        assert_eq!(stats.earliest, Some(ts(0).to_rfc3339()));
        assert!(stats.size > 0);
    }

    #[tokio::test]
    async fn stats_on_empty_store() {
        let store = memory_store().await;
        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_positions, 0);
        assert_eq!(stats.total_vehicles, 0);
        assert!(stats.earliest.is_none());
        assert!(stats.latest.is_none());
    }
}
