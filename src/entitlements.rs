//! Search credit balance: monthly allowance plus purchased packages.

use crate::errors::AppError;
use crate::models::{
    ChargeSource, CreditPackage, FeatureLimit, PlanType, SearchAuditRecord, LEAD_FINDER_FEATURE,
};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Everything the entitlement subsystem reads from or writes to persistent storage.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Maps a bearer-token hash to a user, if the session is live.
    async fn find_session_user(&self, token_hash: &str) -> Result<Option<Uuid>, AppError>;

    /// Tier from the profile record (primary source).
    async fn profile_tier(&self, user_id: Uuid) -> Result<Option<String>, AppError>;

    /// Tier from the user record (fallback source).
    async fn user_record_tier(&self, user_id: Uuid) -> Result<Option<String>, AppError>;

    async fn feature_limit(
        &self,
        plan: PlanType,
        feature: &str,
    ) -> Result<Option<FeatureLimit>, AppError>;

    /// Audit records for `user_id` created at or after `since` that were charged to the
    /// monthly allowance.
    async fn count_searches_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, AppError>;

    /// Packages with `remaining > 0`, oldest purchase first.
    async fn active_packages(&self, user_id: Uuid) -> Result<Vec<CreditPackage>, AppError>;

    /// Sets `remaining = expected - 1` only if it still equals `expected`.
    ///
    /// Returns `false` when no row matched, i.e. someone else changed the package first.
    async fn decrement_package(&self, package_id: Uuid, expected: i32) -> Result<bool, AppError>;

    async fn insert_search_record(&self, record: &SearchAuditRecord) -> Result<(), AppError>;
}

/// Balance as seen at one instant. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntitlementSnapshot {
    pub total_remaining: i64,
    pub remaining_monthly: i64,
    pub package_remaining: i64,
    /// Oldest package with credits left.
    pub package_id_to_decrement: Option<Uuid>,
    /// That package's `remaining` when the snapshot was taken.
    pub package_current_value: i32,
    /// `false` only when the plan explicitly excludes the feature.
    pub feature_enabled: bool,
}

impl EntitlementSnapshot {
    /// Fail-closed result: nothing to spend.
    pub fn zero() -> Self {
        Self {
            feature_enabled: true,
            ..Default::default()
        }
    }

    /// Assembles a snapshot; `packages` must be oldest first and hold only non-empty packages.
    pub fn from_parts(
        monthly_allowance: i64,
        monthly_used: i64,
        packages: &[CreditPackage],
        feature_enabled: bool,
    ) -> Self {
        let remaining_monthly = (monthly_allowance - monthly_used).max(0);
        let package_remaining: i64 = packages
            .iter()
            .map(|p| i64::from(p.remaining.max(0)))
            .sum();
        let candidate = packages.iter().find(|p| p.remaining > 0);

        Self {
            total_remaining: remaining_monthly + package_remaining,
            remaining_monthly,
            package_remaining,
            package_id_to_decrement: candidate.map(|p| p.id),
            package_current_value: candidate.map(|p| p.remaining).unwrap_or(0),
            feature_enabled,
        }
    }
}

/// Which balance a completed search is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementTarget {
    None,
    Monthly,
    Package { id: Uuid, expected: i32 },
}

impl DecrementTarget {
    pub fn charge_source(&self) -> ChargeSource {
        match self {
            DecrementTarget::None => ChargeSource::None,
            DecrementTarget::Monthly => ChargeSource::Monthly,
            DecrementTarget::Package { .. } => ChargeSource::Package,
        }
    }

    pub fn package_id(&self) -> Option<Uuid> {
        match self {
            DecrementTarget::Package { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Packages first (oldest first), then the monthly allowance.
pub fn resolve_decrement_source(snapshot: &EntitlementSnapshot) -> DecrementTarget {
    match snapshot.package_id_to_decrement {
        Some(id) if snapshot.package_current_value > 0 => DecrementTarget::Package {
            id,
            expected: snapshot.package_current_value,
        },
        _ if snapshot.remaining_monthly > 0 => DecrementTarget::Monthly,
        _ => DecrementTarget::None,
    }
}

/// First instant of the calendar month containing `now` (UTC).
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .with_day(1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or(now)
}

/// Places a subscription tier can be read from, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierSource {
    Profile,
    UserRecord,
}

/// Ordered fallback chain for tier lookups.
pub const TIER_SOURCES: &[TierSource] = &[TierSource::Profile, TierSource::UserRecord];

/// Result of one lookup attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome<T> {
    Success(T),
    /// Try the next source.
    RecoverableFailure(RecoverableReason),
    /// Stop trying; the store itself is unusable.
    FatalFailure(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoverableReason {
    /// The source answered but holds no tier for the user.
    Missing,
    /// The source errored.
    Error(String),
}

/// How the tier question was finally answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierResolution {
    Known(PlanType),
    /// Every source answered, none had a tier.
    Absent,
    /// At least one source errored and none had a tier.
    Unknown,
}

impl TierResolution {
    /// Plan whose limits apply. `None` means no allowance at all.
    pub fn plan(&self) -> Option<PlanType> {
        match self {
            TierResolution::Known(plan) => Some(*plan),
            TierResolution::Absent => Some(PlanType::Free),
            TierResolution::Unknown => None,
        }
    }
}

fn is_connection_failure(err: &AppError) -> bool {
    match err {
        AppError::DatabaseError(e) => matches!(
            e,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
        ),
        AppError::WithContext { source, .. } => is_connection_failure(source),
        _ => false,
    }
}

/// Computes balances from the store. Never fails: problems resolve to zero credits.
#[derive(Clone)]
pub struct EntitlementResolver {
    store: Arc<dyn EntitlementStore>,
}

impl EntitlementResolver {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }

    /// Current balance for `user_id`, or [`EntitlementSnapshot::zero`] on any failure.
    pub async fn resolve(&self, user_id: Uuid) -> EntitlementSnapshot {
        self.resolve_at(user_id, Utc::now()).await
    }

    pub async fn resolve_at(&self, user_id: Uuid, now: DateTime<Utc>) -> EntitlementSnapshot {
        match self.try_resolve(user_id, now).await {
            Ok(snapshot) => {
                tracing::debug!(
                    "Entitlements for {}: total={}, monthly={}, packages={}",
                    user_id,
                    snapshot.total_remaining,
                    snapshot.remaining_monthly,
                    snapshot.package_remaining
                );
                snapshot
            }
            Err(e) => {
                tracing::error!(
                    "Entitlement resolution failed for {}, treating as zero credits: {}",
                    user_id,
                    e
                );
                EntitlementSnapshot::zero()
            }
        }
    }

    async fn try_resolve(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<EntitlementSnapshot, AppError> {
        let tier = self.resolve_tier(user_id).await;

        let (allowance, feature_enabled) = match tier.plan() {
            Some(plan) => match self.store.feature_limit(plan, LEAD_FINDER_FEATURE).await? {
                Some(limit) if limit.enabled => (i64::from(limit.monthly_limit.max(0)), true),
                Some(_) => (0, false),
                None => {
                    tracing::warn!(
                        "No '{}' limit configured for plan {}, allowance is 0",
                        LEAD_FINDER_FEATURE,
                        plan.as_str()
                    );
                    (0, true)
                }
            },
            None => (0, true),
        };

        let used = self
            .store
            .count_searches_since(user_id, month_start(now))
            .await?;
        let packages = self.store.active_packages(user_id).await?;

        Ok(EntitlementSnapshot::from_parts(
            allowance,
            used,
            &packages,
            feature_enabled,
        ))
    }

    async fn attempt(&self, source: TierSource, user_id: Uuid) -> AttemptOutcome<PlanType> {
        let lookup = match source {
            TierSource::Profile => self.store.profile_tier(user_id).await,
            TierSource::UserRecord => self.store.user_record_tier(user_id).await,
        };
        match lookup {
            Ok(Some(tier)) if !tier.trim().is_empty() => {
                AttemptOutcome::Success(PlanType::from_tier(&tier))
            }
            Ok(_) => AttemptOutcome::RecoverableFailure(RecoverableReason::Missing),
            Err(e) if is_connection_failure(&e) => AttemptOutcome::FatalFailure(e.to_string()),
            Err(e) => AttemptOutcome::RecoverableFailure(RecoverableReason::Error(e.to_string())),
        }
    }

    /// Walks [`TIER_SOURCES`] until one yields a tier.
    pub async fn resolve_tier(&self, user_id: Uuid) -> TierResolution {
        let mut errored = false;

        for source in TIER_SOURCES {
            match self.attempt(*source, user_id).await {
                AttemptOutcome::Success(plan) => return TierResolution::Known(plan),
                AttemptOutcome::RecoverableFailure(RecoverableReason::Missing) => {
                    tracing::debug!("No tier via {:?} for {}", source, user_id);
                }
                AttemptOutcome::RecoverableFailure(RecoverableReason::Error(reason)) => {
                    tracing::warn!("Tier lookup via {:?} failed, trying next: {}", source, reason);
                    errored = true;
                }
                AttemptOutcome::FatalFailure(reason) => {
                    tracing::error!("Tier lookup via {:?} failed: {}", source, reason);
                    return TierResolution::Unknown;
                }
            }
        }

        if errored {
            tracing::warn!("Tier unknown for {}, no monthly allowance applied", user_id);
            TierResolution::Unknown
        } else {
            TierResolution::Absent
        }
    }
}
