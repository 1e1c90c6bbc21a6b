mod api;
mod cache;
mod collector;
mod config;
mod models;
mod providers;
mod snapshot;
mod store;
mod trails;

use std::sync::Arc;

use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use cache::CoverageCache;
use collector::Collector;
use config::Config;
use store::PositionStore;

#[derive(OpenApi)]
#[openapi(
    info(title = "Plowtrack API", version = "0.1.0"),
    paths(
        api::health::health_check,
        api::health::get_stats,
        api::vehicles::get_snapshot,
        api::vehicles::get_latest,
        api::vehicles::get_nearby,
        api::vehicles::get_history,
        api::coverage::get_coverage_trails,
        api::coverage::get_coverage_raw,
    ),
    components(schemas(
        api::ErrorResponse,
        api::health::HealthResponse,
        models::StoreStats,
        models::Feature,
        models::FeatureCollection,
        models::FeatureProperties,
        models::PointGeometry,
        models::Pagination,
        models::CoverageFeature,
        models::CoverageFeatureCollection,
        models::CoverageProperties,
        models::LineStringGeometry,
        models::Trail,
    )),
    tags(
        (name = "vehicles", description = "Live vehicle positions and history"),
        (name = "coverage", description = "Historical coverage trails"),
        (name = "system", description = "Health and statistics")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info,sqlx=warn".into()),
        )
        .init();

    // Load config
    let config_path =
        std::env::var("PLOWTRACK_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load(&config_path).expect("Failed to load config");
    tracing::info!(providers = config.providers.len(), "Loaded configuration");

    // CORS: explicit origin list, or the permissive development escape hatch
    let cors_layer = if config.cors_permissive {
        tracing::warn!("CORS is wide open (cors_permissive: true); keep this out of production");
        CorsLayer::permissive()
    } else if !config.cors_origins.is_empty() {
        tracing::info!(origins = ?config.cors_origins, "CORS limited to configured origins");
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET, axum::http::Method::OPTIONS])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        panic!("No CORS policy configured: set 'cors_origins', or 'cors_permissive: true' for development");
    };

    // An unreachable store at startup is fatal
    let store = PositionStore::connect(&config.db_path)
        .await
        .expect("Failed to open database");

    let snapshots = snapshot::new_snapshot_store();
    let coverage_cache = Arc::new(CoverageCache::new(&config.cache));

    // Start the poll loop in the background
    let collector = Arc::new(
        Collector::new(
            store.clone(),
            snapshots.clone(),
            config.providers.clone(),
            config.collector.clone(),
        )
        .expect("Failed to build HTTP client"),
    );
    let collector_handle = tokio::spawn(collector.run());

    // Build the app
    let state = api::AppState {
        store,
        snapshots,
        cache: coverage_cache,
        collector_config: config.collector.clone(),
    };
    let app = axum::Router::new()
        .merge(api::router(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listener");

    tracing::info!(addr = %config.bind_addr, "Server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    // Stop the poll loop; committed batches stay, the in-flight cycle is
    // dropped at its next await point
    collector_handle.abort();
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
