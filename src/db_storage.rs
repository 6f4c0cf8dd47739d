use crate::entitlements::EntitlementStore;
use crate::errors::{AppError, ResultExt};
use crate::models::{CreditPackage, FeatureLimit, PlanType, SearchAuditRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Postgres-backed entitlement storage. Schema: `migrations/0001_lead_finder.sql`.
#[derive(Clone)]
pub struct PgEntitlementStore {
    pool: PgPool,
}

impl PgEntitlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntitlementStore for PgEntitlementStore {
    async fn find_session_user(&self, token_hash: &str) -> Result<Option<Uuid>, AppError> {
        let user_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT user_id FROM user_sessions
            WHERE token_hash = $1 AND expires_at > now()
            LIMIT 1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .context("session lookup")?;

        Ok(user_id)
    }

    async fn profile_tier(&self, user_id: Uuid) -> Result<Option<String>, AppError> {
        let tier = sqlx::query_scalar::<_, Option<String>>(
            "SELECT subscription_tier FROM profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("profile tier lookup")?;

        Ok(tier.flatten())
    }

    async fn user_record_tier(&self, user_id: Uuid) -> Result<Option<String>, AppError> {
        let tier = sqlx::query_scalar::<_, Option<String>>(
            "SELECT subscription_tier FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("user tier lookup")?;

        Ok(tier.flatten())
    }

    async fn feature_limit(
        &self,
        plan: PlanType,
        feature: &str,
    ) -> Result<Option<FeatureLimit>, AppError> {
        let limit = sqlx::query_as::<_, FeatureLimit>(
            "SELECT monthly_limit, enabled FROM plan_limits WHERE plan = $1 AND feature = $2",
        )
        .bind(plan.as_str())
        .bind(feature)
        .fetch_optional(&self.pool)
        .await
        .context("plan limit lookup")?;

        Ok(limit)
    }

    async fn count_searches_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM lead_searches
            WHERE user_id = $1 AND created_at >= $2 AND charged_to = 'monthly'
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("monthly search count")?;

        Ok(count)
    }

    async fn active_packages(&self, user_id: Uuid) -> Result<Vec<CreditPackage>, AppError> {
        let packages = sqlx::query_as::<_, CreditPackage>(
            r#"
            SELECT id, user_id, remaining, purchase_date
            FROM lead_search_credit_packages
            WHERE user_id = $1 AND remaining > 0
            ORDER BY purchase_date ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("credit package lookup")?;

        Ok(packages)
    }

    async fn decrement_package(&self, package_id: Uuid, expected: i32) -> Result<bool, AppError> {
        // Compare-and-set: a concurrent decrement makes this match zero rows
        let result = sqlx::query(
            r#"
            UPDATE lead_search_credit_packages
            SET remaining = remaining - 1
            WHERE id = $1 AND remaining = $2 AND remaining > 0
            "#,
        )
        .bind(package_id)
        .bind(expected)
        .execute(&self.pool)
        .await
        .context("credit package decrement")?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_search_record(&self, record: &SearchAuditRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO lead_searches
                (id, user_id, query, location, results_count, charged_to, package_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.user_id)
        .bind(&record.query)
        .bind(&record.location)
        .bind(record.results_count)
        .bind(record.charged_to.as_str())
        .bind(record.package_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("search audit insert")?;

        Ok(())
    }
}
