use lead_finder_api::config::Config;
use lead_finder_api::db::{Database, PoolSettings};
use lead_finder_api::db_storage::PgEntitlementStore;
use lead_finder_api::handlers::{build_router, AppState};
use lead_finder_api::place_details::{build_place_cache, PlaceDetailsService};
use lead_finder_api::search_client::SearchApiClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection.
/// - The search provider client and place details cache.
/// - HTTP routes and middleware (CORS, Rate Limiting).
///
/// It then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lead_finder_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Initialize database connection pool
    let db = Database::connect(&config.database_url, PoolSettings::from(&config)).await?;
    tracing::info!("Database connection pool established");
    if config.db_apply_schema {
        db.apply_schema().await?;
    }

    let provider = SearchApiClient::new(
        config.search_api_base_url.clone(),
        config.search_api_key.clone(),
        config.search_timeout(),
        config.lookup_timeout(),
    )?;
    tracing::info!("✓ Search provider client initialized: {}", config.search_api_base_url);

    let place_cache = if config.place_cache_enabled {
        tracing::info!(
            "Place details cache initialized ({}s TTL, {} capacity)",
            config.place_cache_ttl_secs,
            config.place_cache_capacity
        );
        Some(build_place_cache(
            Duration::from_secs(config.place_cache_ttl_secs),
            config.place_cache_capacity,
        ))
    } else {
        tracing::warn!("Place details cache disabled, every lookup goes upstream");
        None
    };

    let provider = Arc::new(provider);
    let place_details = PlaceDetailsService::new(provider.clone(), place_cache);

    // Build application state
    let app_state = Arc::new(AppState::new(
        config.clone(),
        Arc::new(PgEntitlementStore::new(db.pool.clone())),
        provider,
        place_details,
    ));

    let app = build_router(app_state, true)?;

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Peer addresses feed the rate limiter when no proxy headers are present
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
