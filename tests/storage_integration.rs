use chrono::{Duration, Utc};
use std::env;
use std::sync::Arc;
use uuid::Uuid;

use lead_finder_api::cache_validator::hash_token;
use lead_finder_api::db::Database;
use lead_finder_api::db_storage::PgEntitlementStore;
use lead_finder_api::entitlements::{DecrementTarget, EntitlementResolver, EntitlementStore};
use lead_finder_api::ledger::EntitlementLedger;
use lead_finder_api::models::{ChargeSource, SearchAuditRecord};

/// Integration smoke test for the Postgres entitlement store.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn entitlement_store_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    db.apply_schema().await?;

    // Fresh user per run to avoid conflicts on repeated runs.
    let user_id = Uuid::new_v4();
    let package_id = Uuid::new_v4();
    let token = format!("smoke-{}", user_id);

    sqlx::query("INSERT INTO users (id, subscription_tier) VALUES ($1, 'free')")
        .bind(user_id)
        .execute(&db.pool)
        .await?;
    sqlx::query("INSERT INTO profiles (user_id, subscription_tier) VALUES ($1, 'pro')")
        .bind(user_id)
        .execute(&db.pool)
        .await?;
    sqlx::query("INSERT INTO user_sessions (token_hash, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(hash_token(&token))
        .bind(user_id)
        .bind(Utc::now() + Duration::hours(1))
        .execute(&db.pool)
        .await?;
    sqlx::query(
        "INSERT INTO lead_search_credit_packages (id, user_id, remaining, purchase_date) VALUES ($1, $2, 2, $3)",
    )
    .bind(package_id)
    .bind(user_id)
    .bind(Utc::now() - Duration::days(3))
    .execute(&db.pool)
    .await?;

    let store: Arc<dyn EntitlementStore> = Arc::new(PgEntitlementStore::new(db.pool.clone()));

    let session_user = store
        .find_session_user(&hash_token(&token))
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(session_user, Some(user_id));

    let resolver = EntitlementResolver::new(store.clone());
    let snapshot = resolver.resolve(user_id).await;
    assert_eq!(snapshot.package_id_to_decrement, Some(package_id));
    assert_eq!(snapshot.package_remaining, 2);
    assert!(snapshot.remaining_monthly > 0, "pro plan should carry an allowance");

    let ledger = EntitlementLedger::new(store.clone());
    let outcome = ledger
        .settle(
            user_id,
            snapshot,
            SearchAuditRecord {
                user_id,
                query: "smoke test".to_string(),
                location: "Austin, TX".to_string(),
                results_count: 0,
                charged_to: ChargeSource::None,
                package_id: None,
                created_at: Utc::now(),
            },
        )
        .await;

    assert_eq!(
        outcome.charged,
        DecrementTarget::Package {
            id: package_id,
            expected: 2
        }
    );
    assert!(outcome.audit_recorded);

    // A stale expectation must not match
    let stale = store
        .decrement_package(package_id, 2)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(!stale);

    let after = resolver.resolve(user_id).await;
    assert_eq!(after.package_remaining, 1);
    assert_eq!(after.remaining_monthly, snapshot.remaining_monthly);

    println!("✓ Entitlement smoke test passed for user {}", user_id);

    Ok(())
}
