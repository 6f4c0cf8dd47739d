//! In-process [`EntitlementStore`] for tests and local runs without Postgres.
//!
//! Failure switches let tests exercise the ledger's error paths.

use crate::entitlements::EntitlementStore;
use crate::errors::AppError;
use crate::models::{ChargeSource, CreditPackage, FeatureLimit, PlanType, SearchAuditRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, Uuid>,
    profile_tiers: HashMap<Uuid, String>,
    user_tiers: HashMap<Uuid, String>,
    limits: HashMap<(PlanType, String), FeatureLimit>,
    packages: Vec<CreditPackage>,
    searches: Vec<SearchAuditRecord>,
    fail_session_lookup: bool,
    fail_profile_lookup: bool,
    fail_user_lookup: bool,
    fail_package_lookup: bool,
    fail_decrement: bool,
    fail_audit_insert: bool,
    /// Decrements that lose a race against a simulated concurrent writer.
    concurrent_decrements: usize,
    decrement_calls: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryEntitlementStore {
    inner: Mutex<Inner>,
}

impl InMemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not poison every later assertion
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_session(&self, token_hash: impl Into<String>, user_id: Uuid) {
        self.lock().sessions.insert(token_hash.into(), user_id);
    }

    pub fn set_profile_tier(&self, user_id: Uuid, tier: &str) {
        self.lock().profile_tiers.insert(user_id, tier.to_string());
    }

    pub fn set_user_tier(&self, user_id: Uuid, tier: &str) {
        self.lock().user_tiers.insert(user_id, tier.to_string());
    }

    pub fn set_limit(&self, plan: PlanType, feature: &str, monthly_limit: i32, enabled: bool) {
        self.lock().limits.insert(
            (plan, feature.to_string()),
            FeatureLimit {
                monthly_limit,
                enabled,
            },
        );
    }

    /// Adds a package and returns its id.
    pub fn add_package(
        &self,
        user_id: Uuid,
        remaining: i32,
        purchase_date: DateTime<Utc>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().packages.push(CreditPackage {
            id,
            user_id,
            remaining,
            purchase_date,
        });
        id
    }

    pub fn add_search(&self, record: SearchAuditRecord) {
        self.lock().searches.push(record);
    }

    pub fn package_remaining(&self, package_id: Uuid) -> Option<i32> {
        self.lock()
            .packages
            .iter()
            .find(|p| p.id == package_id)
            .map(|p| p.remaining)
    }

    pub fn searches_for(&self, user_id: Uuid) -> Vec<SearchAuditRecord> {
        self.lock()
            .searches
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn decrement_calls(&self) -> usize {
        self.lock().decrement_calls
    }

    pub fn fail_session_lookup(&self, fail: bool) {
        self.lock().fail_session_lookup = fail;
    }

    pub fn fail_profile_lookup(&self, fail: bool) {
        self.lock().fail_profile_lookup = fail;
    }

    pub fn fail_user_lookup(&self, fail: bool) {
        self.lock().fail_user_lookup = fail;
    }

    pub fn fail_package_lookup(&self, fail: bool) {
        self.lock().fail_package_lookup = fail;
    }

    pub fn fail_decrement(&self, fail: bool) {
        self.lock().fail_decrement = fail;
    }

    pub fn fail_audit_insert(&self, fail: bool) {
        self.lock().fail_audit_insert = fail;
    }

    /// The next `count` decrements find their package already decremented by someone else.
    pub fn simulate_concurrent_decrements(&self, count: usize) {
        self.lock().concurrent_decrements = count;
    }
}

fn simulated(what: &str) -> AppError {
    AppError::InternalError(format!("simulated {} failure", what))
}

#[async_trait]
impl EntitlementStore for InMemoryEntitlementStore {
    async fn find_session_user(&self, token_hash: &str) -> Result<Option<Uuid>, AppError> {
        let inner = self.lock();
        if inner.fail_session_lookup {
            return Err(simulated("session lookup"));
        }
        Ok(inner.sessions.get(token_hash).copied())
    }

    async fn profile_tier(&self, user_id: Uuid) -> Result<Option<String>, AppError> {
        let inner = self.lock();
        if inner.fail_profile_lookup {
            return Err(simulated("profile lookup"));
        }
        Ok(inner.profile_tiers.get(&user_id).cloned())
    }

    async fn user_record_tier(&self, user_id: Uuid) -> Result<Option<String>, AppError> {
        let inner = self.lock();
        if inner.fail_user_lookup {
            return Err(simulated("user lookup"));
        }
        Ok(inner.user_tiers.get(&user_id).cloned())
    }

    async fn feature_limit(
        &self,
        plan: PlanType,
        feature: &str,
    ) -> Result<Option<FeatureLimit>, AppError> {
        Ok(self
            .lock()
            .limits
            .get(&(plan, feature.to_string()))
            .copied())
    }

    async fn count_searches_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let count = self
            .lock()
            .searches
            .iter()
            .filter(|s| s.user_id == user_id && s.created_at >= since)
            .filter(|s| s.charged_to == ChargeSource::Monthly)
            .count();
        Ok(count as i64)
    }

    async fn active_packages(&self, user_id: Uuid) -> Result<Vec<CreditPackage>, AppError> {
        let inner = self.lock();
        if inner.fail_package_lookup {
            return Err(simulated("package lookup"));
        }
        let mut packages: Vec<CreditPackage> = inner
            .packages
            .iter()
            .filter(|p| p.user_id == user_id && p.remaining > 0)
            .cloned()
            .collect();
        packages.sort_by(|a, b| a.purchase_date.cmp(&b.purchase_date).then(a.id.cmp(&b.id)));
        Ok(packages)
    }

    async fn decrement_package(&self, package_id: Uuid, expected: i32) -> Result<bool, AppError> {
        let mut inner = self.lock();
        inner.decrement_calls += 1;
        if inner.fail_decrement {
            return Err(simulated("decrement"));
        }
        let race = inner.concurrent_decrements > 0;
        if race {
            inner.concurrent_decrements -= 1;
        }
        let Some(package) = inner.packages.iter_mut().find(|p| p.id == package_id) else {
            return Ok(false);
        };
        if race && package.remaining > 0 {
            package.remaining -= 1;
        }
        if package.remaining != expected || package.remaining <= 0 {
            return Ok(false);
        }
        package.remaining -= 1;
        Ok(true)
    }

    async fn insert_search_record(&self, record: &SearchAuditRecord) -> Result<(), AppError> {
        let mut inner = self.lock();
        if inner.fail_audit_insert {
            return Err(simulated("audit insert"));
        }
        inner.searches.push(record.clone());
        Ok(())
    }
}
