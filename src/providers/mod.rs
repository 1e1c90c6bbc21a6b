//! Upstream fleet-feed clients and their normalizers.
//!
//! Each provider module exposes a `fetch` for the raw payload and a pure
//! `parse_response` turning it into canonical `(Vec<VehicleInfo>,
//! Vec<PositionSample>)`. Field maps and timestamp quirks are fixed per
//! provider; a malformed record is skipped in place and never aborts the
//! batch.

pub mod avl;
pub mod mt_pearl;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::{ProviderConfig, ProviderKind};
use crate::models::{PositionSample, VehicleInfo};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Upstream returned HTTP {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::NetworkError(e.to_string())
    }
}

/// Fetch one provider's payload and normalize it.
pub async fn poll(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    now: DateTime<Utc>,
) -> Result<(Vec<VehicleInfo>, Vec<PositionSample>), ProviderError> {
    match provider.kind {
        ProviderKind::Avl => {
            let payload = avl::fetch(client, provider).await?;
            Ok(avl::parse_response(&payload))
        }
        ProviderKind::MtPearl => {
            let payload = mt_pearl::fetch(client, provider).await?;
            Ok(mt_pearl::parse_response(&payload, now))
        }
    }
}
