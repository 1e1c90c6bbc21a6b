//! City of Mount Pearl fleet feed: a flat JSON array of vehicle objects
//! with ISO-8601 position times.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::ProviderError;
use crate::config::ProviderConfig;
use crate::models::{PositionSample, VehicleInfo};

// Optional fields may arrive as explicit JSON null, so they decode as
// Option and default in place.
#[derive(Debug, Deserialize)]
struct FleetUnit {
    unit_id: Value,
    #[serde(default)]
    unit_name: Option<String>,
    #[serde(default)]
    unit_type: Option<String>,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    heading: Option<i64>,
    #[serde(default)]
    speed_kmh: Option<f64>,
    #[serde(default)]
    position_time: Option<String>,
    #[serde(default)]
    ignition_on: Option<bool>,
}

pub async fn fetch(
    client: &reqwest::Client,
    provider: &ProviderConfig,
) -> Result<Value, ProviderError> {
    let mut request = client.get(&provider.url);
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

/// Normalize a Mount Pearl response. `now` is the fallback instant for
/// units whose position time is absent or unparseable; the feed reports
/// correct UTC so no offset correction applies here.
pub fn parse_response(data: &Value, now: DateTime<Utc>) -> (Vec<VehicleInfo>, Vec<PositionSample>) {
    let mut vehicles = Vec::new();
    let mut positions = Vec::new();

    let units = data.as_array().map(Vec::as_slice).unwrap_or_default();

    for raw in units {
        let unit: FleetUnit = match serde_json::from_value(raw.clone()) {
            Ok(u) => u,
            Err(e) => {
                warn!(error = %e, "Skipping malformed fleet unit");
                continue;
            }
        };

        let vehicle_id = match &unit.unit_id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        let timestamp = unit
            .position_time
            .as_deref()
            .and_then(parse_position_time)
            .unwrap_or(now);

        vehicles.push(VehicleInfo {
            vehicle_id: vehicle_id.clone(),
            description: unit.unit_name.unwrap_or_default(),
            vehicle_type: unit.unit_type.unwrap_or_default(),
        });

        positions.push(PositionSample {
            vehicle_id,
            timestamp,
            longitude: unit.longitude,
            latitude: unit.latitude,
            bearing: unit.heading.unwrap_or_default(),
            speed: Some(unit.speed_kmh.unwrap_or(0.0)),
            is_driving: driving_state(unit.ignition_on),
        });
    }

    (vehicles, positions)
}

fn parse_position_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// The feed only exposes ignition state; without it the driving state is
/// genuinely unknown.
fn driving_state(ignition_on: Option<bool>) -> String {
    match ignition_on {
        Some(true) => "yes".to_string(),
        Some(false) => "no".to_string(),
        None => "maybe".to_string(),
    }
}
