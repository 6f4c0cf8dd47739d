use crate::config::Config;
use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Entitlement schema, applied on demand with [`Database::apply_schema`].
pub const SCHEMA_SQL: &str = include_str!("../migrations/0001_lead_finder.sql");

/// Connection pool sizing.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&Config> for PoolSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_connections: config.db_max_connections,
            acquire_timeout: Duration::from_secs(config.db_acquire_timeout_secs),
        }
    }
}

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        Self::connect(database_url, PoolSettings::default()).await
    }

    pub async fn connect(database_url: &str, settings: PoolSettings) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(database_url)
            .await
            .context("failed to connect to the entitlement database")?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("entitlement database is not answering queries")?;

        Ok(Self { pool })
    }

    /// Creates missing tables and seeds default plan limits. Safe to run repeatedly.
    pub async fn apply_schema(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .context("failed to apply entitlement schema")?;
        tracing::info!("✓ Entitlement schema applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_covers_ledger_tables() {
        for table in [
            "user_sessions",
            "plan_limits",
            "lead_search_credit_packages",
            "lead_searches",
        ] {
            assert!(SCHEMA_SQL.contains(table), "schema is missing {}", table);
        }
        assert!(SCHEMA_SQL.contains("charged_to"));
    }

    #[test]
    fn test_default_pool_settings() {
        let settings = PoolSettings::default();
        assert_eq!(settings.max_connections, 10);
        assert_eq!(settings.acquire_timeout, Duration::from_secs(5));
    }
}
