use crate::cache_validator::hash_token;
use crate::config::Config;
use crate::entitlements::EntitlementStore;
use crate::errors::AppError;
use crate::fetcher::FetchPolicy;
use crate::models::{LeadResult, SearchParams, SearchResponse};
use crate::place_details::PlaceDetailsService;
use crate::search_client::SearchProvider;
use crate::search_service::{LeadSearchService, SearchRequest};
use anyhow::Context;
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Sessions, tiers, credits and search history.
    pub store: Arc<dyn EntitlementStore>,
    /// Upstream places provider.
    pub provider: Arc<dyn SearchProvider>,
    /// Cached, breaker-guarded detail lookups.
    pub place_details: Arc<PlaceDetailsService>,
    pub fetch_policy: FetchPolicy,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn EntitlementStore>,
        provider: Arc<dyn SearchProvider>,
        place_details: PlaceDetailsService,
    ) -> Self {
        let fetch_policy = FetchPolicy::with_delay(config.page_delay());
        Self {
            config,
            store,
            provider,
            place_details: Arc::new(place_details),
            fetch_policy,
        }
    }

    fn search_service(&self) -> LeadSearchService {
        LeadSearchService::new(
            self.store.clone(),
            self.provider.clone(),
            self.fetch_policy,
            Some(self.place_details.clone()),
        )
    }
}

/// Builds the HTTP router.
///
/// `/health` stays outside the request-size limit and the per-IP rate limiter. Pass
/// `rate_limited = false` when serving without peer addresses (in-process tests).
pub fn build_router(state: Arc<AppState>, rate_limited: bool) -> anyhow::Result<Router> {
    let mut protected_routes = Router::new()
        .route("/api/v1/leads/search", get(search_leads))
        .route("/api/v1/places/:place_id", get(get_place_details))
        // 64KB max payload
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    if rate_limited {
        // 5 req/sec per IP, burst of 10
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_second(5)
                .burst_size(10)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .context("invalid rate limiter configuration")?,
        );
        protected_routes = protected_routes.layer(ServiceBuilder::new().layer(GovernorLayer {
            config: governor_conf,
        }));
    }

    Ok(Router::new()
        .route("/health", get(health))
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()))
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lead-finder-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// Resolves the caller from `Authorization: Bearer <token>`.
///
/// Missing or unknown tokens are 401; a failing session lookup is 500.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Uuid, AppError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    match state.store.find_session_user(&hash_token(token)).await {
        Ok(Some(user_id)) => Ok(user_id),
        Ok(None) => Err(AppError::Unauthorized(
            "Invalid or expired session".to_string(),
        )),
        Err(e) => Err(AppError::InternalError(format!(
            "Session lookup failed: {}",
            e
        ))),
    }
}

/// GET /api/v1/leads/search
///
/// Searches the places provider for businesses matching `query` near `location`, charging one
/// search credit once results have been fetched.
///
/// # Returns
///
/// * `Result<Json<SearchResponse>, AppError>` - Results with the remaining balance, or
///   401/400/403/402/500.
pub async fn search_leads(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let user_id = authenticate(&state, &headers).await?;
    let Query(params) = params.map_err(|rejection| {
        AppError::BadRequest(format!("Invalid query parameters: {}", rejection.body_text()))
    })?;
    let request = SearchRequest::from_params(&params)?;

    tracing::info!(
        "GET /leads/search - user {} query='{}' location='{}' maxResults={}",
        user_id,
        request.query,
        request.location,
        request.filters.max_results
    );

    let response = state.search_service().search(user_id, &request).await?;
    Ok(Json(response))
}

/// GET /api/v1/places/:place_id
///
/// Details of one place, served from cache when possible.
pub async fn get_place_details(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(place_id): Path<String>,
) -> Result<Json<LeadResult>, AppError> {
    authenticate(&state, &headers).await?;
    tracing::info!("GET /places/{}", place_id);

    let lead = state
        .place_details
        .lookup(&place_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Place {} not found", place_id)))?;

    Ok(Json(lead))
}
