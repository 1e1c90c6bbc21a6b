//! Trail derivation: gap segmentation and time-bucket downsampling over
//! position rows. Pure functions; the store feeds them query results.

use chrono::{DateTime, Duration, Utc};

use crate::models::{PositionWithVehicle, Trail};

/// Index at which the maximal contiguous run ending at the newest sample
/// begins. `timestamps` must be ascending. Walking backward from the newest
/// pair, the kept window stops widening at the first gap exceeding
/// `max_gap`, so a live trail never jumps silently across an outage.
pub fn contiguous_tail_start(timestamps: &[DateTime<Utc>], max_gap: Duration) -> usize {
    let mut start = timestamps.len().saturating_sub(1);
    while start > 0 {
        if timestamps[start] - timestamps[start - 1] > max_gap {
            break;
        }
        start -= 1;
    }
    start
}

/// Derive coverage trails from raw window samples.
///
/// `rows` must be ordered by (vehicle_id, timestamp) ascending, as the store
/// query returns them. Per vehicle: a new segment starts at the first sample
/// and whenever the gap to the previous sample exceeds `max_gap`; within each
/// (vehicle, segment, bucket) only the earliest sample survives; segments
/// with fewer than two surviving points cannot form a line and are dropped.
pub fn derive_coverage_trails(
    rows: &[PositionWithVehicle],
    max_gap: Duration,
    bucket: Duration,
) -> Vec<Trail> {
    let bucket_secs = bucket.num_seconds().max(1);
    let mut trails = Vec::new();
    let mut current: Option<Trail> = None;
    let mut prev: Option<&PositionWithVehicle> = None;
    let mut current_bucket: i64 = i64::MIN;

    let mut flush = |trail: Option<Trail>, trails: &mut Vec<Trail>| {
        if let Some(t) = trail {
            if t.coordinates.len() >= 2 {
                trails.push(t);
            }
        }
    };

    for row in rows {
        let same_vehicle = prev.is_some_and(|p| p.vehicle_id == row.vehicle_id);
        let gap_ok = prev.is_some_and(|p| row.timestamp - p.timestamp <= max_gap);

        if !(same_vehicle && gap_ok) {
            // First sample of a vehicle, or a gap: start a new segment
            flush(current.take(), &mut trails);
            current = Some(Trail {
                vehicle_id: row.vehicle_id.clone(),
                description: row.description.clone(),
                vehicle_type: row.vehicle_type.clone(),
                coordinates: Vec::new(),
                timestamps: Vec::new(),
            });
            current_bucket = i64::MIN;
        }

        // Downsample: keep only the earliest sample per bucket. Rows are
        // time-ascending, so the first sample seen in a bucket is earliest.
        let bucket_id = row.timestamp.timestamp().div_euclid(bucket_secs);
        if bucket_id != current_bucket {
            if let Some(trail) = current.as_mut() {
                trail.coordinates.push([row.longitude, row.latitude]);
                trail.timestamps.push(row.timestamp.to_rfc3339());
            }
            current_bucket = bucket_id;
        }

        prev = Some(row);
    }
    flush(current, &mut trails);

    trails
}
