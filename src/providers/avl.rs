//! City of St. John's ArcGIS AVL feature service.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::ProviderError;
use crate::config::ProviderConfig;
use crate::models::{PositionSample, VehicleInfo};

/// The AVL API returns epoch-millisecond timestamps that represent
/// Newfoundland Standard Time (UTC-3:30) but are encoded as if they were
/// UTC. Adding the offset back recovers the true UTC instant.
const NST_CORRECTION_SECS: i64 = 3 * 3600 + 30 * 60;

const OUT_FIELDS: &str = "ID,Description,VehicleType,LocationDateTime,Bearing,Speed,isDriving";

#[derive(Debug, Deserialize)]
struct AvlFeature {
    attributes: AvlAttributes,
    #[serde(default)]
    geometry: Option<AvlGeometry>,
}

// Optional attributes arrive as explicit JSON null when the layer has no
// value, so they must decode as Option and default in place.
#[derive(Debug, Deserialize)]
struct AvlAttributes {
    #[serde(rename = "ID")]
    id: Value,
    #[serde(rename = "Description", default)]
    description: Option<String>,
    #[serde(rename = "VehicleType", default)]
    vehicle_type: Option<String>,
    #[serde(rename = "LocationDateTime")]
    location_datetime: i64,
    #[serde(rename = "Bearing", default)]
    bearing: Option<i64>,
    #[serde(rename = "Speed", default)]
    speed: Value,
    #[serde(rename = "isDriving", default)]
    is_driving: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvlGeometry {
    x: f64,
    y: f64,
}

pub async fn fetch(
    client: &reqwest::Client,
    provider: &ProviderConfig,
) -> Result<Value, ProviderError> {
    let mut request = client.get(&provider.url).query(&[
        ("f", "json"),
        ("outFields", OUT_FIELDS),
        ("outSR", "4326"),
        ("returnGeometry", "true"),
        ("where", "1=1"),
    ]);
    if let Some(referer) = &provider.referer {
        request = request.header(reqwest::header::REFERER, referer);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(ProviderError::HttpStatus(response.status()));
    }
    response
        .json()
        .await
        .map_err(|e| ProviderError::ParseError(e.to_string()))
}

/// Normalize an AVL response. Features are decoded one by one so a single
/// malformed record is skipped instead of failing the batch.
pub fn parse_response(data: &Value) -> (Vec<VehicleInfo>, Vec<PositionSample>) {
    let mut vehicles = Vec::new();
    let mut positions = Vec::new();

    let features = data
        .get("features")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for raw in features {
        let feature: AvlFeature = match serde_json::from_value(raw.clone()) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "Skipping malformed AVL feature");
                continue;
            }
        };
        let attrs = feature.attributes;

        let vehicle_id = coerce_id(&attrs.id);
        let Some(timestamp) = corrected_timestamp(attrs.location_datetime) else {
            warn!(vehicle_id = %vehicle_id, raw = attrs.location_datetime, "Skipping AVL feature with out-of-range timestamp");
            continue;
        };

        vehicles.push(VehicleInfo {
            vehicle_id: vehicle_id.clone(),
            description: attrs.description.unwrap_or_default(),
            vehicle_type: attrs.vehicle_type.unwrap_or_default(),
        });

        let (longitude, latitude) = feature
            .geometry
            .map(|g| (g.x, g.y))
            .unwrap_or((0.0, 0.0));

        positions.push(PositionSample {
            vehicle_id,
            timestamp,
            longitude,
            latitude,
            bearing: attrs.bearing.unwrap_or_default(),
            speed: Some(coerce_speed(&attrs.speed)),
            is_driving: attrs.is_driving.unwrap_or_default(),
        });
    }

    (vehicles, positions)
}

/// Vehicle IDs arrive as numbers or strings depending on the layer; the
/// canonical form is a string either way.
fn coerce_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn coerce_speed(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn corrected_timestamp(epoch_ms: i64) -> Option<DateTime<Utc>> {
    let naive = Utc.timestamp_millis_opt(epoch_ms).single()?;
    Some(naive + Duration::seconds(NST_CORRECTION_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_response() -> Value {
        json!({
            "features": [
                {
                    "attributes": {
                        "ID": 2307,
                        "Description": "2307 TA PLOW TRUCK",
                        "VehicleType": "TA PLOW TRUCK",
                        "LocationDateTime": 0i64,
                        "Bearing": 135,
                        "Speed": "13.4",
                        "isDriving": "maybe"
                    },
                    "geometry": { "x": -52.73, "y": 47.56 }
                }
            ]
        })
    }

    #[test]
    fn timezone_correction_recovers_true_utc() {
        // Epoch 0 ms encodes 1970-01-01 00:00 NST-as-UTC; the real instant
        // is 03:30 UTC on the epoch day.
        let (_, positions) = parse_response(&sample_response());
        assert_eq!(
            positions[0].timestamp.to_rfc3339(),
            "1970-01-01T03:30:00+00:00"
        );
    }

    #[test]
    fn numeric_ids_become_strings() {
        let (vehicles, positions) = parse_response(&sample_response());
        assert_eq!(vehicles[0].vehicle_id, "2307");
        assert_eq!(positions[0].vehicle_id, "2307");
    }

    #[test]
    fn string_speed_is_parsed() {
        let (_, positions) = parse_response(&sample_response());
        assert_eq!(positions[0].speed, Some(13.4));
    }

    #[test]
    fn missing_optionals_get_defaults() {
        let data = json!({
            "features": [
                {
                    "attributes": { "ID": "7", "LocationDateTime": 1_700_000_000_000i64 },
                    "geometry": { "x": -52.8, "y": 47.5 }
                }
            ]
        });
        let (vehicles, positions) = parse_response(&data);
        assert_eq!(vehicles[0].description, "");
        assert_eq!(vehicles[0].vehicle_type, "");
        assert_eq!(positions[0].bearing, 0);
        assert_eq!(positions[0].speed, Some(0.0));
        assert_eq!(positions[0].is_driving, "");
    }

    #[test]
    fn null_attributes_default_instead_of_dropping_the_record() {
        // ArcGIS layers emit explicit null for empty attributes; the record
        // and its position must survive with defaults.
        let data = json!({
            "features": [
                {
                    "attributes": {
                        "ID": 9,
                        "Description": null,
                        "VehicleType": null,
                        "LocationDateTime": 1_700_000_000_000i64,
                        "Bearing": null,
                        "Speed": null,
                        "isDriving": null
                    },
                    "geometry": { "x": -52.7, "y": 47.6 }
                }
            ]
        });
        let (vehicles, positions) = parse_response(&data);
        assert_eq!(vehicles.len(), 1);
        assert_eq!(positions.len(), 1);
        assert_eq!(vehicles[0].description, "");
        assert_eq!(vehicles[0].vehicle_type, "");
        assert_eq!(positions[0].bearing, 0);
        assert_eq!(positions[0].speed, Some(0.0));
        assert_eq!(positions[0].is_driving, "");
    }

    #[test]
    fn malformed_feature_does_not_abort_batch() {
        let data = json!({
            "features": [
                { "attributes": { "Description": "no id or time" } },
                {
                    "attributes": { "ID": 1, "LocationDateTime": 1_700_000_000_000i64 },
                    "geometry": { "x": -52.7, "y": 47.6 }
                }
            ]
        });
        let (vehicles, positions) = parse_response(&data);
        assert_eq!(vehicles.len(), 1);
        assert_eq!(positions.len(), 1);
        assert_eq!(vehicles[0].vehicle_id, "1");
    }

    #[test]
    fn missing_geometry_defaults_to_origin() {
        let data = json!({
            "features": [
                { "attributes": { "ID": 1, "LocationDateTime": 1_700_000_000_000i64 } }
            ]
        });
        let (_, positions) = parse_response(&data);
        assert_eq!(positions[0].longitude, 0.0);
        assert_eq!(positions[0].latitude, 0.0);
    }

    #[test]
    fn empty_response_yields_empty_batch() {
        let (vehicles, positions) = parse_response(&json!({}));
        assert!(vehicles.is_empty());
        assert!(positions.is_empty());
    }
}
