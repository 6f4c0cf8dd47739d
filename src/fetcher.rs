//! Multi-page aggregation against the search provider.
//!
//! Pages are fetched one after another with a pause in between. Only the first page is allowed
//! to fail the search; anything that goes wrong later leaves the caller with what was collected
//! so far.

use crate::errors::AppError;
use crate::geo::Coordinates;
use crate::search_client::{PageRequest, SearchProvider};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Results the provider returns per page.
pub const PAGE_SIZE: usize = 10;

/// Hard limit on upstream calls per search.
pub const MAX_PAGES: usize = 5;

/// The payload layouts the provider is known to return, in probing order.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamShape {
    /// `{ "places": [...] }`
    Places(Vec<Value>),
    /// `{ "local": { "results": [...] } }`
    LocalResults(Vec<Value>),
    /// `{ "localResults": [...] }`
    LocalResultsFlat(Vec<Value>),
}

/// Payload matched none of the known layouts (or every candidate array was empty).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnrecognizedShape;

impl UpstreamShape {
    /// Returns the first layout holding a non-empty results array.
    pub fn parse(payload: &Value) -> Result<Self, UnrecognizedShape> {
        let non_empty = |v: Option<&Value>| -> Option<Vec<Value>> {
            v.and_then(|v| v.as_array())
                .filter(|items| !items.is_empty())
                .cloned()
        };

        if let Some(items) = non_empty(payload.get("places")) {
            return Ok(UpstreamShape::Places(items));
        }
        if let Some(items) = non_empty(payload.get("local").and_then(|l| l.get("results"))) {
            return Ok(UpstreamShape::LocalResults(items));
        }
        if let Some(items) = non_empty(payload.get("localResults")) {
            return Ok(UpstreamShape::LocalResultsFlat(items));
        }
        Err(UnrecognizedShape)
    }

    pub fn into_results(self) -> Vec<Value> {
        match self {
            UpstreamShape::Places(items)
            | UpstreamShape::LocalResults(items)
            | UpstreamShape::LocalResultsFlat(items) => items,
        }
    }
}

/// Location the provider says it actually searched, when it reports one.
pub fn detected_location(payload: &Value) -> Option<String> {
    const PATHS: &[&[&str]] = &[
        &["searchParameters", "location"],
        &["search_information", "detected_location"],
        &["search_metadata", "detected_location"],
        &["detectedLocation"],
    ];
    PATHS.iter().find_map(|path| {
        path.iter()
            .try_fold(payload, |value, key| value.get(*key))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    })
}

/// Human-readable warning when the provider searched somewhere other than requested.
///
/// The requested location matches when its first component (the city, usually) appears in
/// the detected location.
pub fn location_mismatch_warning(requested: &str, detected: &str) -> Option<String> {
    let primary = requested
        .split(',')
        .next()
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();
    if primary.is_empty() || detected.to_lowercase().contains(&primary) {
        return None;
    }
    Some(format!(
        "Results may be for \"{}\" rather than \"{}\". Try adding a region or country to the location.",
        detected,
        requested.trim()
    ))
}

/// Pagination knobs.
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    pub page_size: usize,
    pub max_pages: usize,
    pub page_delay: Duration,
}

impl FetchPolicy {
    pub fn with_delay(page_delay: Duration) -> Self {
        Self {
            page_size: PAGE_SIZE,
            max_pages: MAX_PAGES,
            page_delay,
        }
    }

    /// `min(ceil(max_results / page_size), max_pages)`.
    pub fn pages_for(&self, max_results: usize) -> usize {
        max_results.div_ceil(self.page_size).min(self.max_pages)
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self::with_delay(Duration::from_millis(500))
    }
}

/// What the fetcher needs to know about one search.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub query: String,
    /// Location with coordinate annotations already removed.
    pub location: String,
    pub country: String,
    pub coordinates: Option<Coordinates>,
    pub radius_meters: Option<u32>,
    pub max_results: usize,
}

/// Combined raw results of a search.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub raw_results: Vec<Value>,
    pub location_warning: Option<String>,
    pub pages_fetched: usize,
}

pub struct PaginatedFetcher {
    provider: Arc<dyn SearchProvider>,
    policy: FetchPolicy,
}

impl PaginatedFetcher {
    pub fn new(provider: Arc<dyn SearchProvider>, policy: FetchPolicy) -> Self {
        Self { provider, policy }
    }

    /// Runs the page sequence for `request`.
    ///
    /// # Errors
    ///
    /// Only a failure of the first page is returned; later failures end the sequence early.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome, AppError> {
        let total_pages = self.policy.pages_for(request.max_results).max(1);
        let mut outcome = FetchOutcome::default();

        for page_index in 0..total_pages {
            if page_index > 0 {
                tokio::time::sleep(self.policy.page_delay).await;
            }

            let page = PageRequest {
                query: crate::geo::build_query(&request.query, &request.location),
                country: request.country.clone(),
                coordinates: request.coordinates,
                radius_meters: request.radius_meters,
                start: (page_index * self.policy.page_size) as u32,
            };

            let payload = match self.provider.search_page(&page).await {
                Ok(payload) => payload,
                Err(e) if page_index == 0 => {
                    tracing::error!("First search page failed: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        "Search page {} failed, keeping {} partial results: {}",
                        page_index + 1,
                        outcome.raw_results.len(),
                        e
                    );
                    break;
                }
            };
            outcome.pages_fetched += 1;

            if page_index == 0 && request.coordinates.is_none() {
                outcome.location_warning = detected_location(&payload)
                    .and_then(|detected| location_mismatch_warning(&request.location, &detected));
            }

            let results = match UpstreamShape::parse(&payload) {
                Ok(shape) => shape.into_results(),
                Err(UnrecognizedShape) => {
                    tracing::debug!("Search page {} had no results array", page_index + 1);
                    Vec::new()
                }
            };

            if results.is_empty() {
                if page_index == 0 {
                    tracing::info!("No results for '{}' in '{}'", request.query, request.location);
                } else {
                    tracing::debug!("Page {} empty, stopping pagination", page_index + 1);
                }
                break;
            }

            outcome.raw_results.extend(results);
            if outcome.raw_results.len() >= request.max_results {
                break;
            }
        }

        tracing::info!(
            "Fetched {} raw results over {} page(s)",
            outcome.raw_results.len(),
            outcome.pages_fetched
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Provider that always returns a full page and records when each call arrived.
    struct TimedProvider {
        calls: Mutex<Vec<(u32, Instant)>>,
    }

    #[async_trait]
    impl SearchProvider for TimedProvider {
        async fn search_page(&self, request: &PageRequest) -> Result<Value, AppError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((request.start, Instant::now()));
            }
            let places: Vec<Value> = (0..PAGE_SIZE)
                .map(|i| json!({ "title": format!("{}-{}", request.start, i) }))
                .collect();
            Ok(json!({ "places": places }))
        }

        async fn place_details(&self, _place_id: &str) -> Result<Value, AppError> {
            Ok(Value::Null)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pages_are_spaced_by_page_delay() {
        let provider = Arc::new(TimedProvider {
            calls: Mutex::new(Vec::new()),
        });
        let delay = Duration::from_millis(500);
        let fetcher = PaginatedFetcher::new(provider.clone(), FetchPolicy::with_delay(delay));
        let request = FetchRequest {
            query: "plumbers".to_string(),
            location: "Austin, TX".to_string(),
            country: "us".to_string(),
            coordinates: None,
            radius_meters: None,
            max_results: 30,
        };

        let started = Instant::now();
        let outcome = fetcher.fetch(&request).await.unwrap();
        assert_eq!(outcome.pages_fetched, 3);

        let calls = provider.calls.lock().unwrap().clone();
        let starts: Vec<u32> = calls.iter().map(|(start, _)| *start).collect();
        assert_eq!(starts, vec![0, 10, 20]);

        // First call goes out immediately, each later one waits a full delay
        assert_eq!(calls[0].1 - started, Duration::ZERO);
        for pair in calls.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= delay);
        }
        assert!(calls[2].1 - started < delay * 2 + Duration::from_millis(10));
    }

    #[test]
    fn test_shape_priority() {
        let payload = json!({
            "places": [{ "title": "A" }],
            "localResults": [{ "title": "B" }]
        });
        assert!(matches!(UpstreamShape::parse(&payload), Ok(UpstreamShape::Places(_))));
    }

    #[test]
    fn test_empty_array_falls_through() {
        let payload = json!({
            "places": [],
            "local": { "results": [{ "title": "A" }] }
        });
        let shape = UpstreamShape::parse(&payload).unwrap();
        assert!(matches!(shape, UpstreamShape::LocalResults(_)));
        assert_eq!(shape.into_results().len(), 1);
    }

    #[test]
    fn test_flat_local_results() {
        let payload = json!({ "localResults": [{ "title": "A" }, { "title": "B" }] });
        assert_eq!(
            UpstreamShape::parse(&payload).map(UpstreamShape::into_results).unwrap().len(),
            2
        );
    }

    #[test]
    fn test_unrecognized_shape() {
        assert_eq!(
            UpstreamShape::parse(&json!({ "organic": [{}] })),
            Err(UnrecognizedShape)
        );
    }

    #[test]
    fn test_pages_for() {
        let policy = FetchPolicy::default();
        assert_eq!(policy.pages_for(1), 1);
        assert_eq!(policy.pages_for(10), 1);
        assert_eq!(policy.pages_for(11), 2);
        assert_eq!(policy.pages_for(100), MAX_PAGES);
    }

    #[test]
    fn test_detected_location_paths() {
        let payload = json!({ "search_information": { "detected_location": "Paris, Texas" } });
        assert_eq!(detected_location(&payload).as_deref(), Some("Paris, Texas"));
        assert_eq!(detected_location(&json!({})), None);
    }

    #[test]
    fn test_location_mismatch() {
        assert!(location_mismatch_warning("Paris, France", "Paris, Texas").is_none());
        let warning = location_mismatch_warning("Springfield, IL", "Chicago, Illinois");
        assert!(warning.unwrap().contains("Chicago, Illinois"));
    }
}
