//! One lead search, end to end: balance check, upstream pages, cleanup, charge.

use crate::dedup::dedupe_raw_results;
use crate::entitlements::{EntitlementResolver, EntitlementSnapshot, EntitlementStore};
use crate::errors::AppError;
use crate::fetcher::{FetchPolicy, FetchRequest, PaginatedFetcher};
use crate::filters::{address_country_warning, apply_filters, ResultFilters};
use crate::geo::{country_code, radius_meters, strip_coordinates, Coordinates};
use crate::ledger::{EntitlementLedger, LedgerOutcome};
use crate::models::{ChargeSource, LeadResult, SearchAuditRecord, SearchParams, SearchResponse};
use crate::normalizer::normalize_results;
use crate::place_details::PlaceDetailsService;
use crate::search_client::SearchProvider;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Validated search input.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    /// Location as typed, coordinate annotations included.
    pub location: String,
    pub filters: ResultFilters,
    pub radius_km: Option<f64>,
    pub coordinates: Option<Coordinates>,
    pub place_id: Option<String>,
}

impl SearchRequest {
    /// # Errors
    ///
    /// `BadRequest` when `query` or `location` is missing or blank.
    pub fn from_params(params: &SearchParams) -> Result<Self, AppError> {
        let query = non_blank(params.query.as_deref());
        let location = non_blank(params.location.as_deref());
        let (Some(query), Some(location)) = (query, location) else {
            return Err(AppError::BadRequest(
                "query and location are required".to_string(),
            ));
        };

        if let Some(open_now) = params.open_now.as_deref() {
            tracing::debug!("openNow={} accepted but not applied", open_now);
        }

        Ok(Self {
            query,
            location,
            filters: ResultFilters::new(
                params.min_rating,
                params.max_rating,
                params.price_level.as_deref(),
                parse_max_results(params.max_results.as_deref()),
            ),
            radius_km: params.radius,
            coordinates: Coordinates::from_params(params.lat, params.lng),
            place_id: non_blank(params.place_id.as_deref()),
        })
    }
}

/// Reads `maxResults` leniently: negatives become 0 (the default), huge values saturate and
/// anything unparseable falls back to the default.
fn parse_max_results(raw: Option<&str>) -> Option<u32> {
    let raw = raw.map(str::trim).filter(|v| !v.is_empty())?;
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => Some(n.clamp(0.0, f64::from(u32::MAX)) as u32),
        _ => {
            tracing::debug!("Ignoring unparseable maxResults={}", raw);
            None
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Why a search was refused before reaching the provider.
pub fn admission_error(snapshot: &EntitlementSnapshot) -> Option<AppError> {
    if !snapshot.feature_enabled && snapshot.package_remaining <= 0 {
        return Some(AppError::Forbidden(
            "Lead finder is not included in your plan".to_string(),
        ));
    }
    if snapshot.total_remaining <= 0 {
        return Some(AppError::PaymentRequired(
            "You have used all of your searches".to_string(),
        ));
    }
    None
}

pub struct LeadSearchService {
    resolver: EntitlementResolver,
    ledger: EntitlementLedger,
    fetcher: PaginatedFetcher,
    place_details: Option<Arc<PlaceDetailsService>>,
}

impl LeadSearchService {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        provider: Arc<dyn SearchProvider>,
        policy: FetchPolicy,
        place_details: Option<Arc<PlaceDetailsService>>,
    ) -> Self {
        Self {
            resolver: EntitlementResolver::new(store.clone()),
            ledger: EntitlementLedger::new(store),
            fetcher: PaginatedFetcher::new(provider, policy),
            place_details,
        }
    }

    /// Runs a search for `user_id` and charges it.
    ///
    /// # Errors
    ///
    /// `Forbidden`/`PaymentRequired` before any upstream call, or the first page's error.
    /// Nothing is charged or recorded in either case.
    pub async fn search(
        &self,
        user_id: Uuid,
        request: &SearchRequest,
    ) -> Result<SearchResponse, AppError> {
        let snapshot = self.resolver.resolve(user_id).await;
        if let Some(err) = admission_error(&snapshot) {
            tracing::info!("Search refused for user {}: {}", user_id, err);
            return Err(err);
        }

        let location = strip_coordinates(&request.location);
        let country = country_code(&location);
        let fetch_request = FetchRequest {
            query: request.query.clone(),
            location: location.clone(),
            country: country.to_string(),
            coordinates: request.coordinates,
            radius_meters: request
                .coordinates
                .map(|_| radius_meters(request.radius_km)),
            max_results: request.filters.max_results,
        };

        let fetched = self.fetcher.fetch(&fetch_request).await?;

        let (results, location_warning) = if fetched.raw_results.is_empty() {
            let warning = format!(
                "No results found for '{}' in '{}'. Try a broader location or different keywords.",
                request.query, location
            );
            (Vec::new(), Some(warning))
        } else {
            let mut leads = normalize_results(&dedupe_raw_results(fetched.raw_results));
            if let Some(place_id) = request.place_id.as_deref() {
                self.enrich_matching(&mut leads, place_id).await;
            }
            let filtered = apply_filters(leads, &request.filters);
            let warning = address_country_warning(&filtered, country, &location)
                .or(fetched.location_warning);
            (filtered, warning)
        };

        let record = SearchAuditRecord {
            user_id,
            query: request.query.clone(),
            location: request.location.clone(),
            results_count: i32::try_from(results.len()).unwrap_or(i32::MAX),
            charged_to: ChargeSource::None,
            package_id: None,
            created_at: Utc::now(),
        };
        let LedgerOutcome {
            remaining_after,
            credit_decremented,
            ..
        } = self.ledger.settle(user_id, snapshot, record).await;

        tracing::info!(
            "✓ Search for user {} returned {} results (charged={}, remaining={})",
            user_id,
            results.len(),
            credit_decremented,
            remaining_after
        );

        Ok(SearchResponse {
            results,
            remaining_searches: remaining_after,
            location_warning,
        })
    }

    async fn enrich_matching(&self, leads: &mut [LeadResult], place_id: &str) {
        let Some(details) = self.place_details.as_ref() else {
            return;
        };
        match leads
            .iter_mut()
            .find(|lead| lead.place_id.as_deref() == Some(place_id))
        {
            Some(lead) => details.enrich(lead).await,
            None => tracing::debug!("Requested place {} not among results", place_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(query: Option<&str>, location: Option<&str>) -> SearchParams {
        SearchParams {
            query: query.map(str::to_string),
            location: location.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_request_requires_query_and_location() {
        assert!(matches!(
            SearchRequest::from_params(&params(None, Some("Austin"))),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            SearchRequest::from_params(&params(Some("plumbers"), Some("  "))),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_request_defaults() {
        let request = SearchRequest::from_params(&params(Some(" plumbers "), Some("Austin"))).unwrap();
        assert_eq!(request.query, "plumbers");
        assert_eq!(request.filters.max_results, 20);
        assert!(request.coordinates.is_none());
        assert!(request.place_id.is_none());
    }

    #[test]
    fn test_max_results_parsed_leniently() {
        assert_eq!(parse_max_results(None), None);
        assert_eq!(parse_max_results(Some(" 15 ")), Some(15));
        assert_eq!(parse_max_results(Some("-1")), Some(0));
        assert_eq!(parse_max_results(Some("99999999999")), Some(u32::MAX));
        assert_eq!(parse_max_results(Some("many")), None);

        let mut huge = params(Some("plumbers"), Some("Austin"));
        huge.max_results = Some("99999999999".to_string());
        huge.open_now = Some("yes".to_string());
        let request = SearchRequest::from_params(&huge).unwrap();
        assert_eq!(request.filters.max_results, 100);
    }

    #[test]
    fn test_admission() {
        let mut snapshot = EntitlementSnapshot::from_parts(5, 0, &[], true);
        assert!(admission_error(&snapshot).is_none());

        snapshot.feature_enabled = false;
        snapshot.total_remaining = 0;
        snapshot.remaining_monthly = 0;
        assert!(matches!(admission_error(&snapshot), Some(AppError::Forbidden(_))));

        assert!(matches!(
            admission_error(&EntitlementSnapshot::zero()),
            Some(AppError::PaymentRequired(_))
        ));
    }
}
