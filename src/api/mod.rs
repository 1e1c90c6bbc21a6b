pub mod coverage;
pub mod error;
pub mod health;
pub mod vehicles;

pub use error::{bad_request, internal_error, ErrorResponse};

use std::sync::Arc;

use axum::Router;

use crate::cache::CoverageCache;
use crate::config::CollectorConfig;
use crate::snapshot::SnapshotStore;
use crate::store::PositionStore;

#[derive(Clone)]
pub struct AppState {
    pub store: PositionStore,
    pub snapshots: SnapshotStore,
    pub cache: Arc<CoverageCache>,
    pub collector_config: CollectorConfig,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/vehicles", vehicles::router(state.clone()))
        .nest("/coverage", coverage::router(state.clone()))
        .merge(health::router(state))
}
