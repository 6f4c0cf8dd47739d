use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Feature key used when looking up plan limits.
pub const LEAD_FINDER_FEATURE: &str = "lead_finder";

// ============ Database Models ============

/// A purchased bundle of searches. Only the ledger mutates `remaining`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq)]
pub struct CreditPackage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub remaining: i32,
    pub purchase_date: DateTime<Utc>,
}

/// Balance a recorded search was actually charged to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeSource {
    Package,
    Monthly,
    /// No credit was taken: none available, the decrement failed, or it lost every retry.
    #[default]
    None,
}

impl ChargeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeSource::Package => "package",
            ChargeSource::Monthly => "monthly",
            ChargeSource::None => "none",
        }
    }
}

/// One executed search.
///
/// Rows in the current calendar month charged to `Monthly` define monthly usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchAuditRecord {
    pub user_id: Uuid,
    pub query: String,
    pub location: String,
    pub results_count: i32,
    pub charged_to: ChargeSource,
    /// Package the search was charged to, if any.
    pub package_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Per-plan, per-feature monthly allowance.
#[derive(Debug, Clone, Copy, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureLimit {
    pub monthly_limit: i32,
    /// `false` means the plan explicitly excludes the feature.
    pub enabled: bool,
}

/// Subscription plan a raw tier string maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Free,
    Pro,
    Enterprise,
}

impl PlanType {
    /// Maps a stored tier name onto a plan. Unrecognized tiers get the lowest plan.
    pub fn from_tier(tier: &str) -> Self {
        match tier.trim().to_lowercase().as_str() {
            "pro" | "professional" | "premium" | "starter" => PlanType::Pro,
            "enterprise" | "business" | "team" | "agency" => PlanType::Enterprise,
            _ => PlanType::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Free => "free",
            PlanType::Pro => "pro",
            PlanType::Enterprise => "enterprise",
        }
    }
}

// ============ API Models ============

/// Raw query string of `GET /api/v1/leads/search`.
///
/// Every field is optional at this layer so that missing required parameters turn into a
/// JSON 400 rather than an extractor rejection. `maxResults` and `openNow` stay as text and
/// are interpreted leniently.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub query: Option<String>,
    pub location: Option<String>,
    pub min_rating: Option<f64>,
    pub max_rating: Option<f64>,
    /// Kilometers.
    pub radius: Option<f64>,
    pub max_results: Option<String>,
    pub price_level: Option<String>,
    pub open_now: Option<String>,
    pub place_id: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// Canonical business record returned to clients.
///
/// Unknown values are omitted from the JSON rather than serialized as `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeadResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviews_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours: Option<String>,
    pub data_quality: u8,
}

impl LeadResult {
    /// +2 for a full coordinate pair, +1 each for website, phone and hours.
    pub fn compute_data_quality(&self) -> u8 {
        let mut score = 0;
        if self.latitude.is_some() && self.longitude.is_some() {
            score += 2;
        }
        if self.website.is_some() {
            score += 1;
        }
        if self.phone.is_some() {
            score += 1;
        }
        if self.hours.is_some() {
            score += 1;
        }
        score
    }

    /// Copies fields this result lacks from `details`, then rescores.
    pub fn fill_missing_from(&mut self, details: &LeadResult) {
        fn fill<T: Clone>(slot: &mut Option<T>, other: &Option<T>) {
            if slot.is_none() {
                *slot = other.clone();
            }
        }

        fill(&mut self.title, &details.title);
        fill(&mut self.address, &details.address);
        fill(&mut self.phone, &details.phone);
        fill(&mut self.website, &details.website);
        fill(&mut self.rating, &details.rating);
        fill(&mut self.reviews_count, &details.reviews_count);
        fill(&mut self.thumbnail, &details.thumbnail);
        fill(&mut self.price_level, &details.price_level);
        fill(&mut self.hours, &details.hours);
        if self.latitude.is_none() || self.longitude.is_none() {
            if let (Some(lat), Some(lng)) = (details.latitude, details.longitude) {
                self.latitude = Some(lat);
                self.longitude = Some(lng);
            }
        }
        if self.categories.is_empty() {
            self.categories = details.categories.clone();
        }
        self.data_quality = self.compute_data_quality();
    }
}

/// Successful search response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<LeadResult>,
    pub remaining_searches: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_warning: Option<String>,
}
