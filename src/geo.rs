//! Location handling: country inference, coordinate annotations and search biasing.

use regex::Regex;
use std::sync::OnceLock;

/// Country used when the location text names none we recognize.
pub const DEFAULT_COUNTRY: &str = "us";

/// Upper bound for the bias radius sent upstream.
pub const MAX_RADIUS_METERS: u32 = 50_000;

/// Radius used when the request does not carry one.
pub const DEFAULT_RADIUS_KM: f64 = 10.0;

/// A latitude/longitude pair supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Accepts the pair only when both values are present and within range.
    pub fn from_params(lat: Option<f64>, lng: Option<f64>) -> Option<Self> {
        let (lat, lng) = (lat?, lng?);
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        valid.then_some(Self { lat, lng })
    }
}

/// Country-indicating tokens, per supported country code.
const COUNTRY_TOKENS: &[(&str, &[&str])] = &[
    (
        "gb",
        &[
            "uk",
            "united kingdom",
            "great britain",
            "england",
            "scotland",
            "wales",
            "northern ireland",
            "gb",
        ],
    ),
    ("us", &["usa", "united states", "united states of america", "us"]),
    ("es", &["spain", "españa", "espana", "es"]),
];

/// Tokens that identify `country_code` in free text (address lines, location strings).
pub fn country_tokens(country_code: &str) -> &'static [&'static str] {
    COUNTRY_TOKENS
        .iter()
        .find(|(code, _)| *code == country_code)
        .map(|(_, tokens)| *tokens)
        .unwrap_or(&[])
}

/// Infers the upstream country code from a free-text location.
///
/// Bare two-letter codes only count for `us`, and only as the last word.
pub fn country_code(location: &str) -> &'static str {
    let normalized = normalize_for_matching(&strip_coordinates(location));

    COUNTRY_TOKENS
        .iter()
        .find(|(code, tokens)| {
            tokens
                .iter()
                .filter(|token| *token != code)
                .any(|token| contains_token(&normalized, token))
                || (*code == "us" && normalized.trim_end().ends_with(" us"))
        })
        .map(|(code, _)| *code)
        .unwrap_or(DEFAULT_COUNTRY)
}

/// Whether `text` mentions `country_code` by any of its tokens.
pub fn mentions_country(text: &str, country_code: &str) -> bool {
    let normalized = normalize_for_matching(text);
    country_tokens(country_code)
        .iter()
        .any(|token| contains_token(&normalized, token))
}

fn coordinate_annotation_regex() -> &'static Regex {
    static ANNOTATION: OnceLock<Regex> = OnceLock::new();
    ANNOTATION.get_or_init(|| {
        Regex::new(r"@\s*-?\d+(?:\.\d+)?\s*,\s*-?\d+(?:\.\d+)?(?:\s*,\s*\d+(?:\.\d+)?z)?")
            .expect("valid coordinate annotation regex")
    })
}

/// Removes `@lat,lng` annotations (map-link style) and tidies leftover separators.
pub fn strip_coordinates(location: &str) -> String {
    let stripped = coordinate_annotation_regex().replace_all(location, " ");
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == ',' || c.is_whitespace())
        .to_string()
}

/// Text sent upstream as the search query.
pub fn build_query(query: &str, location: &str) -> String {
    let query = query.trim();
    let location = strip_coordinates(location);
    if location.is_empty() {
        query.to_string()
    } else {
        format!("{} in {}", query, location)
    }
}

/// Kilometers to the meter radius used for biasing, clamped to `MAX_RADIUS_METERS`.
pub fn radius_meters(radius_km: Option<f64>) -> u32 {
    let km = radius_km
        .filter(|km| km.is_finite() && *km > 0.0)
        .unwrap_or(DEFAULT_RADIUS_KM);
    let meters = (km * 1000.0).round();
    if meters >= MAX_RADIUS_METERS as f64 {
        MAX_RADIUS_METERS
    } else {
        meters as u32
    }
}

/// Lowercases and replaces punctuation with spaces, padded so whole-word checks are substring
/// checks.
fn normalize_for_matching(text: &str) -> String {
    let mapped: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    format!(" {} ", mapped.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn contains_token(normalized: &str, token: &str) -> bool {
    normalized.contains(&format!(" {} ", token))
}
