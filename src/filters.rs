use crate::geo::mentions_country;
use crate::models::LeadResult;
use crate::normalizer::normalize_price_level;

/// Absolute ceiling on results returned by one search.
pub const MAX_RESULTS_CAP: usize = 100;

/// Used when the request does not ask for a count.
pub const DEFAULT_MAX_RESULTS: usize = 20;

/// Below this share of addresses naming the expected country, results are flagged.
pub const COUNTRY_MATCH_THRESHOLD: f64 = 0.2;

/// Requested result count clamped to `1..=MAX_RESULTS_CAP`.
pub fn effective_max_results(requested: Option<u32>) -> usize {
    match requested {
        Some(0) | None => DEFAULT_MAX_RESULTS,
        Some(n) => (n as usize).min(MAX_RESULTS_CAP),
    }
}

/// User-supplied post-filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultFilters {
    pub min_rating: Option<f64>,
    pub max_rating: Option<f64>,
    /// Canonical level (`"$"`..`"$$$$"`); `None` keeps every level.
    pub price_level: Option<String>,
    pub max_results: usize,
}

impl ResultFilters {
    /// `"any"` or blank price levels mean no price filter.
    pub fn new(
        min_rating: Option<f64>,
        max_rating: Option<f64>,
        price_level: Option<&str>,
        max_results: Option<u32>,
    ) -> Self {
        let price_level = price_level
            .map(str::trim)
            .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("any"))
            .and_then(normalize_price_level);
        Self {
            min_rating: min_rating.filter(|r| r.is_finite()),
            max_rating: max_rating.filter(|r| r.is_finite()),
            price_level,
            max_results: effective_max_results(max_results),
        }
    }
}

/// Rating minimum, rating maximum, price level, then the count cap.
pub fn apply_filters(results: Vec<LeadResult>, filters: &ResultFilters) -> Vec<LeadResult> {
    let cap = filters.max_results.min(MAX_RESULTS_CAP);
    results
        .into_iter()
        .filter(|r| match filters.min_rating {
            Some(min) => r.rating.is_some_and(|rating| rating >= min),
            None => true,
        })
        .filter(|r| match filters.max_rating {
            Some(max) => r.rating.is_some_and(|rating| rating <= max),
            None => true,
        })
        .filter(|r| match filters.price_level.as_deref() {
            Some(level) => r.price_level.as_deref() == Some(level),
            None => true,
        })
        .take(cap)
        .collect()
}

/// Warns when too few result addresses mention `country_code`.
///
/// Returns `None` for an empty result set.
pub fn address_country_warning(
    results: &[LeadResult],
    country_code: &str,
    location: &str,
) -> Option<String> {
    if results.is_empty() {
        return None;
    }
    let matching = results
        .iter()
        .filter(|r| {
            r.address
                .as_deref()
                .is_some_and(|address| mentions_country(address, country_code))
        })
        .count();
    let share = matching as f64 / results.len() as f64;
    if share >= COUNTRY_MATCH_THRESHOLD {
        return None;
    }

    tracing::info!(
        "Only {}/{} results mention country '{}'",
        matching,
        results.len(),
        country_code
    );
    Some(format!(
        "Most results do not appear to be in {} ({}). Check that \"{}\" is the location you meant.",
        country_code.to_uppercase(),
        location.trim(),
        location.trim()
    ))
}
