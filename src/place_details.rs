//! Read-through, fail-open cache of single-place detail lookups.

use crate::cache_validator::ValidatedCacheEntry;
use crate::circuit_breaker::{create_upstream_circuit_breaker, UpstreamCircuitBreaker};
use crate::errors::AppError;
use crate::models::LeadResult;
use crate::normalizer::normalize_result;
use crate::search_client::SearchProvider;
use failsafe::futures::CircuitBreaker;
use moka::future::Cache;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Builds the details cache (`ttl` expiry, `capacity` entries).
pub fn build_place_cache(ttl: Duration, capacity: u64) -> Cache<String, String> {
    Cache::builder()
        .time_to_live(ttl)
        .max_capacity(capacity)
        .build()
}

pub struct PlaceDetailsService {
    provider: Arc<dyn SearchProvider>,
    /// `None` when caching is disabled.
    cache: Option<Cache<String, String>>,
    breaker: UpstreamCircuitBreaker,
}

impl PlaceDetailsService {
    pub fn new(provider: Arc<dyn SearchProvider>, cache: Option<Cache<String, String>>) -> Self {
        Self {
            provider,
            cache,
            breaker: create_upstream_circuit_breaker(),
        }
    }

    /// Normalized details for `place_id`.
    ///
    /// Returns `Ok(None)` when the provider has no usable record for the id.
    pub async fn lookup(&self, place_id: &str) -> Result<Option<LeadResult>, AppError> {
        let place_id = place_id.trim();
        if place_id.is_empty() {
            return Err(AppError::BadRequest("placeId cannot be empty".to_string()));
        }

        if let Some(payload) = self.cached(place_id).await {
            tracing::debug!("Place details cache HIT (validated) for {}", place_id);
            return Ok(Self::to_lead(&payload));
        }

        tracing::debug!("Place details cache MISS for {}", place_id);
        let payload = match self.breaker.call(self.provider.place_details(place_id)).await {
            Ok(payload) => payload,
            Err(failsafe::Error::Inner(e)) => return Err(e),
            Err(failsafe::Error::Rejected) => {
                return Err(AppError::ExternalApiError(
                    "Place details temporarily unavailable (circuit open)".to_string(),
                ))
            }
        };

        let lead = Self::to_lead(&payload);
        if lead.is_some() {
            self.store(place_id, &payload).await;
        }
        Ok(lead)
    }

    /// Fetches details for `place_id` and fills gaps in `lead`. Failures only log.
    pub async fn enrich(&self, lead: &mut LeadResult) {
        let Some(place_id) = lead.place_id.clone() else {
            return;
        };
        match self.lookup(&place_id).await {
            Ok(Some(details)) => lead.fill_missing_from(&details),
            Ok(None) => tracing::debug!("No details available for {}", place_id),
            Err(e) => tracing::warn!("Place details lookup failed for {}: {}", place_id, e),
        }
    }

    /// Details payloads come either bare or wrapped in a `place`/`result` object.
    ///
    /// A record naming neither a title nor a place id (an error body, say) is not a place.
    fn to_lead(payload: &Value) -> Option<LeadResult> {
        let record = payload
            .get("place")
            .or_else(|| payload.get("result"))
            .filter(|v| v.is_object())
            .unwrap_or(payload);
        if !record.is_object() {
            return None;
        }
        let lead = normalize_result(record);
        (lead.title.is_some() || lead.place_id.is_some()).then_some(lead)
    }

    async fn cached(&self, place_id: &str) -> Option<Value> {
        let cache = self.cache.as_ref()?;
        let serialized = cache.get(place_id).await?;
        let Some(data) = ValidatedCacheEntry::deserialize_and_validate(&serialized, place_id)
        else {
            cache.invalidate(place_id).await;
            return None;
        };
        match serde_json::from_str(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Discarding unreadable cache entry for {}: {}", place_id, e);
                cache.invalidate(place_id).await;
                None
            }
        }
    }

    async fn store(&self, place_id: &str, payload: &Value) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        match serde_json::to_string(payload) {
            Ok(json) => {
                let entry = ValidatedCacheEntry::new(place_id, json);
                cache.insert(place_id.to_string(), entry.serialize()).await;
            }
            Err(e) => tracing::warn!("Could not cache details for {}: {}", place_id, e),
        }
    }
}
