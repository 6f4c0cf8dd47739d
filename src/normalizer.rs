//! Maps the provider's loosely-typed place records onto [`LeadResult`].
//!
//! The provider has shipped several field spellings over time (and different endpoints use
//! different ones), so every logical field is read from an ordered list of candidate keys.

use crate::models::LeadResult;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Longest category list kept per result.
pub const MAX_CATEGORIES: usize = 20;

/// Used when an hours object cannot be rendered as JSON.
pub const HOURS_FALLBACK: &str = "Hours available on request";

const TITLE_KEYS: &[&str] = &["title", "name", "businessName"];
const ADDRESS_KEYS: &[&str] = &["address", "formatted_address", "formattedAddress", "vicinity"];
const PHONE_KEYS: &[&str] = &["phone", "phoneNumber", "phone_number", "formatted_phone_number"];
const WEBSITE_KEYS: &[&str] = &["website", "link", "url", "websiteUri"];
const RATING_KEYS: &[&str] = &["rating", "ratingValue", "averageRating"];
const REVIEWS_KEYS: &[&str] = &["reviewsCount", "user_ratings_total", "ratingCount", "reviews"];
const PLACE_ID_KEYS: &[&str] = &["placeId", "place_id", "cid", "data_id"];
const THUMBNAIL_KEYS: &[&str] = &["thumbnail", "thumbnailUrl", "imageUrl", "image"];
const PRICE_KEYS: &[&str] = &["priceLevel", "price_level", "price"];
const HOURS_KEYS: &[&str] = &["hours", "workingHours", "openingHours", "opening_hours"];
const COORDINATE_OBJECT_KEYS: &[&str] = &["coordinates", "gps_coordinates"];

/// Normalizes every raw record, in order.
pub fn normalize_results(raw_results: &[Value]) -> Vec<LeadResult> {
    raw_results.iter().map(normalize_result).collect()
}

/// Builds the canonical shape from one raw provider record.
pub fn normalize_result(raw: &Value) -> LeadResult {
    let (latitude, longitude) = match extract_coordinates(raw) {
        Some((lat, lng)) => (Some(lat), Some(lng)),
        None => (None, None),
    };

    let mut lead = LeadResult {
        title: first_string(raw, TITLE_KEYS),
        address: first_string(raw, ADDRESS_KEYS),
        phone: first_string(raw, PHONE_KEYS),
        website: first_string(raw, WEBSITE_KEYS),
        rating: first_f64(raw, RATING_KEYS),
        reviews_count: first_i64(raw, REVIEWS_KEYS),
        place_id: extract_place_id(raw),
        categories: extract_categories(raw),
        thumbnail: first_string(raw, THUMBNAIL_KEYS),
        price_level: PRICE_KEYS
            .iter()
            .filter_map(|key| raw.get(*key))
            .find_map(price_level_from_value),
        latitude,
        longitude,
        hours: extract_hours(raw),
        data_quality: 0,
    };
    lead.data_quality = lead.compute_data_quality();
    lead
}

/// Stable provider identifier of a raw record, if it has one.
pub fn extract_place_id(raw: &Value) -> Option<String> {
    PLACE_ID_KEYS.iter().find_map(|key| match raw.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Canonical price level: `"$"` through `"$$$$"`.
///
/// Accepts numeric levels (`2`), dollar strings and the provider's word labels.
pub fn normalize_price_level(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().all(|c| c == '$') {
        return Some(trimmed.to_string());
    }
    if let Ok(level) = trimmed.parse::<usize>() {
        return (1..=4).contains(&level).then(|| "$".repeat(level));
    }
    let label = trimmed
        .to_lowercase()
        .trim_start_matches("price_level_")
        .replace('_', " ");
    let level = match label.as_str() {
        "inexpensive" | "cheap" => 1,
        "moderate" => 2,
        "expensive" => 3,
        "very expensive" => 4,
        _ => return Some(trimmed.to_string()),
    };
    Some("$".repeat(level))
}

fn price_level_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => normalize_price_level(s),
        Value::Number(n) => normalize_price_level(&n.to_string()),
        _ => None,
    }
}

fn first_string(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        raw.get(*key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    })
}

fn first_f64(raw: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .find_map(value_as_f64)
}

fn first_i64(raw: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().filter_map(|key| raw.get(*key)).find_map(|v| match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        // "1,234" style counts
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    })
}

fn value_as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

fn coordinate_pair(source: &Value) -> Option<(f64, f64)> {
    let lat = ["latitude", "lat"]
        .iter()
        .find_map(|k| source.get(*k).and_then(value_as_f64))?;
    let lng = ["longitude", "lng", "lon"]
        .iter()
        .find_map(|k| source.get(*k).and_then(value_as_f64))?;
    Some((lat, lng))
}

/// Direct fields first, then the nested objects; first complete pair wins.
fn extract_coordinates(raw: &Value) -> Option<(f64, f64)> {
    coordinate_pair(raw).or_else(|| {
        COORDINATE_OBJECT_KEYS
            .iter()
            .filter_map(|key| raw.get(*key))
            .find_map(coordinate_pair)
    })
}

fn extract_categories(raw: &Value) -> Vec<String> {
    let mut categories: Vec<String> = match raw.get("categories").or_else(|| raw.get("types")) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => ["category", "type"]
            .iter()
            .find_map(|key| raw.get(*key).and_then(|v| v.as_str()))
            .map(|s| vec![s.trim().to_string()])
            .unwrap_or_default(),
    };
    categories.truncate(MAX_CATEGORIES);
    categories
}

fn extract_hours(raw: &Value) -> Option<String> {
    let value = HOURS_KEYS
        .iter()
        .filter_map(|key| raw.get(*key))
        .find(|v| !v.is_null())?;

    let rendered = match value {
        Value::String(s) => strip_html(s),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_else(|_| HOURS_FALLBACK.to_string())
        }
        other => other.to_string(),
    };

    let rendered = rendered.trim().to_string();
    (!rendered.is_empty()).then_some(rendered)
}

fn html_tag_regex() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid HTML tag regex"))
}

/// Removes tags and collapses whitespace.
fn strip_html(input: &str) -> String {
    let without_tags = html_tag_regex().replace_all(input, " ");
    without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
