use crate::errors::AppError;
use crate::geo::Coordinates;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// One page request against the provider's places endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// Full query text, location included.
    pub query: String,
    /// Two-letter country code (`gl`).
    pub country: String,
    pub coordinates: Option<Coordinates>,
    pub radius_meters: Option<u32>,
    /// Result offset; omitted from the request for the first page.
    pub start: u32,
}

/// The upstream places provider, seen as raw JSON.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Fetches one page of search results.
    async fn search_page(&self, request: &PageRequest) -> Result<Value, AppError>;

    /// Fetches the detail record of a single place.
    async fn place_details(&self, place_id: &str) -> Result<Value, AppError>;
}

/// HTTP client for the places search provider.
#[derive(Clone)]
pub struct SearchApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    search_timeout: Duration,
    lookup_timeout: Duration,
}

impl SearchApiClient {
    /// Creates a new `SearchApiClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the provider, without trailing slash.
    /// * `api_key` - Key sent in the `X-API-KEY` header.
    /// * `search_timeout` - Per-call timeout for result pages.
    /// * `lookup_timeout` - Per-call timeout for place details.
    pub fn new(
        base_url: String,
        api_key: String,
        search_timeout: Duration,
        lookup_timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(search_timeout.max(lookup_timeout))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create search client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            search_timeout,
            lookup_timeout,
        })
    }

    async fn get_json(
        &self,
        url: reqwest::Url,
        timeout: Duration,
        what: &str,
    ) -> Result<Value, AppError> {
        let response = self
            .client
            .get(url)
            .header("X-API-KEY", &self.api_key)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::ExternalApiError(format!("{} timed out after {:?}", what, timeout))
                } else {
                    AppError::ExternalApiError(format!("{} failed: {}", what, e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "{} returned {}: {}",
                what, status, error_text
            )));
        }

        response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse {} response: {}", what, e))
        })
    }
}

#[async_trait]
impl SearchProvider for SearchApiClient {
    async fn search_page(&self, request: &PageRequest) -> Result<Value, AppError> {
        let mut params: Vec<(&str, String)> = vec![
            ("q", request.query.clone()),
            ("gl", request.country.clone()),
        ];
        if request.start > 0 {
            params.push(("start", request.start.to_string()));
        }
        if let Some(coords) = request.coordinates {
            params.push(("lat", coords.lat.to_string()));
            params.push(("lng", coords.lng.to_string()));
            if let Some(radius) = request.radius_meters {
                params.push(("radius", radius.to_string()));
            }
        }

        // Parameters are encoded by the URL builder; never interpolate user text
        let url = reqwest::Url::parse_with_params(&format!("{}/places", self.base_url), &params)
            .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        tracing::info!(
            "Search page request: q='{}', gl={}, start={}",
            request.query,
            request.country,
            request.start
        );

        self.get_json(url, self.search_timeout, "Search request")
            .await
    }

    async fn place_details(&self, place_id: &str) -> Result<Value, AppError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/place", self.base_url),
            &[("placeId", place_id)],
        )
        .map_err(|e| AppError::ExternalApiError(format!("Failed to build URL: {}", e)))?;

        tracing::debug!("Place details request: {}", place_id);

        self.get_json(url, self.lookup_timeout, "Place details request")
            .await
    }
}
