/// Entitlement resolution and ledger tests against the in-memory store
use chrono::{TimeZone, Utc};
use lead_finder_api::entitlements::{DecrementTarget, EntitlementResolver, EntitlementStore};
use lead_finder_api::ledger::{EntitlementLedger, LedgerOutcome, MAX_DECREMENT_ATTEMPTS};
use lead_finder_api::memory_store::InMemoryEntitlementStore;
use lead_finder_api::models::{ChargeSource, PlanType, SearchAuditRecord, LEAD_FINDER_FEATURE};
use std::sync::Arc;
use uuid::Uuid;

fn setup() -> (Arc<InMemoryEntitlementStore>, EntitlementResolver, EntitlementLedger) {
    let store = Arc::new(InMemoryEntitlementStore::new());
    let shared: Arc<dyn EntitlementStore> = store.clone();
    (
        store,
        EntitlementResolver::new(shared.clone()),
        EntitlementLedger::new(shared),
    )
}

fn record(user_id: Uuid) -> SearchAuditRecord {
    SearchAuditRecord {
        user_id,
        query: "plumbers".to_string(),
        location: "Austin, TX".to_string(),
        results_count: 10,
        charged_to: ChargeSource::None,
        package_id: None,
        created_at: Utc::now(),
    }
}

/// Resolves the balance and settles one search, like the search service does.
async fn run_search(
    resolver: &EntitlementResolver,
    ledger: &EntitlementLedger,
    user_id: Uuid,
) -> LedgerOutcome {
    let snapshot = resolver.resolve(user_id).await;
    ledger.settle(user_id, snapshot, record(user_id)).await
}

#[tokio::test]
async fn test_packages_consumed_oldest_first() {
    let (store, resolver, ledger) = setup();
    let user = Uuid::new_v4();
    let first = store.add_package(user, 3, Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap());
    let second = store.add_package(user, 5, Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap());

    for _ in 0..4 {
        let outcome = run_search(&resolver, &ledger, user).await;
        assert!(outcome.credit_decremented);
    }

    assert_eq!(store.package_remaining(first), Some(0));
    assert_eq!(store.package_remaining(second), Some(4));
    assert_eq!(store.searches_for(user).len(), 4);
}

#[tokio::test]
async fn test_total_drops_by_one_per_search() {
    let (store, resolver, ledger) = setup();
    let user = Uuid::new_v4();
    store.set_profile_tier(user, "pro");
    store.set_limit(PlanType::Pro, LEAD_FINDER_FEATURE, 10, true);
    store.add_package(user, 2, Utc::now());

    let start = resolver.resolve(user).await.total_remaining;
    assert_eq!(start, 12);

    for n in 1..=5 {
        let outcome = run_search(&resolver, &ledger, user).await;
        assert!(outcome.credit_decremented);
        assert_eq!(outcome.remaining_after, start - n);
        assert_eq!(resolver.resolve(user).await.total_remaining, start - n);
    }
}

#[tokio::test]
async fn test_monthly_charge_writes_nothing_but_the_record() {
    let (store, resolver, ledger) = setup();
    let user = Uuid::new_v4();
    store.set_profile_tier(user, "pro");
    store.set_limit(PlanType::Pro, LEAD_FINDER_FEATURE, 3, true);

    let outcome = run_search(&resolver, &ledger, user).await;

    assert_eq!(outcome.charged, DecrementTarget::Monthly);
    assert_eq!(outcome.remaining_after, 2);
    assert_eq!(store.decrement_calls(), 0);
    let searches = store.searches_for(user);
    assert_eq!(searches.len(), 1);
    assert_eq!(searches[0].charged_to, ChargeSource::Monthly);
    assert!(searches[0].package_id.is_none());
}

#[tokio::test]
async fn test_package_charge_is_tagged_on_record() {
    let (store, resolver, ledger) = setup();
    let user = Uuid::new_v4();
    let package = store.add_package(user, 1, Utc::now());

    let outcome = run_search(&resolver, &ledger, user).await;

    assert_eq!(
        outcome.charged,
        DecrementTarget::Package {
            id: package,
            expected: 1
        }
    );
    let searches = store.searches_for(user);
    assert_eq!(searches[0].charged_to, ChargeSource::Package);
    assert_eq!(searches[0].package_id, Some(package));
}

#[tokio::test]
async fn test_missing_tier_uses_free_plan() {
    let (store, resolver, _) = setup();
    let user = Uuid::new_v4();
    store.set_limit(PlanType::Free, LEAD_FINDER_FEATURE, 5, true);

    let snapshot = resolver.resolve(user).await;
    assert_eq!(snapshot.remaining_monthly, 5);
    assert_eq!(snapshot.total_remaining, 5);
}

#[tokio::test]
async fn test_unknown_tier_fails_closed() {
    let (store, resolver, _) = setup();
    let user = Uuid::new_v4();
    store.set_limit(PlanType::Free, LEAD_FINDER_FEATURE, 5, true);
    store.add_package(user, 2, Utc::now());
    store.fail_profile_lookup(true);

    let snapshot = resolver.resolve(user).await;
    assert_eq!(snapshot.remaining_monthly, 0);
    assert_eq!(snapshot.total_remaining, 2);
}

#[tokio::test]
async fn test_tier_falls_back_to_user_record() {
    let (store, resolver, _) = setup();
    let user = Uuid::new_v4();
    store.set_user_tier(user, "pro");
    store.set_limit(PlanType::Pro, LEAD_FINDER_FEATURE, 100, true);
    store.fail_profile_lookup(true);

    assert_eq!(resolver.resolve(user).await.remaining_monthly, 100);
}

#[tokio::test]
async fn test_package_lookup_failure_resolves_to_zero() {
    let (store, resolver, _) = setup();
    let user = Uuid::new_v4();
    store.set_limit(PlanType::Free, LEAD_FINDER_FEATURE, 5, true);
    store.fail_package_lookup(true);

    let snapshot = resolver.resolve(user).await;
    assert_eq!(snapshot.total_remaining, 0);
    assert!(snapshot.feature_enabled);
}

#[tokio::test]
async fn test_disabled_feature_keeps_package_credits() {
    let (store, resolver, _) = setup();
    let user = Uuid::new_v4();
    store.set_limit(PlanType::Free, LEAD_FINDER_FEATURE, 5, false);
    store.add_package(user, 4, Utc::now());

    let snapshot = resolver.resolve(user).await;
    assert!(!snapshot.feature_enabled);
    assert_eq!(snapshot.remaining_monthly, 0);
    assert_eq!(snapshot.total_remaining, 4);
}

#[tokio::test]
async fn test_decrement_failure_still_records_search() {
    let (store, resolver, ledger) = setup();
    let user = Uuid::new_v4();
    let package = store.add_package(user, 1, Utc::now());
    store.fail_decrement(true);

    let outcome = run_search(&resolver, &ledger, user).await;

    assert!(!outcome.credit_decremented);
    assert_eq!(outcome.charged, DecrementTarget::None);
    assert!(outcome.audit_recorded);
    assert_eq!(outcome.remaining_after, 1);
    assert_eq!(store.package_remaining(package), Some(1));
    assert_eq!(store.decrement_calls(), 1);
    let searches = store.searches_for(user);
    assert_eq!(searches.len(), 1);
    assert_eq!(searches[0].charged_to, ChargeSource::None);
}

#[tokio::test]
async fn test_uncharged_search_leaves_monthly_allowance_alone() {
    let (store, resolver, ledger) = setup();
    let user = Uuid::new_v4();
    store.set_profile_tier(user, "pro");
    store.set_limit(PlanType::Pro, LEAD_FINDER_FEATURE, 5, true);
    store.add_package(user, 1, Utc::now());
    store.fail_decrement(true);

    let before = resolver.resolve(user).await;
    assert_eq!(before.total_remaining, 6);

    let outcome = run_search(&resolver, &ledger, user).await;
    assert!(!outcome.credit_decremented);
    assert_eq!(outcome.remaining_after, 6);

    let after = resolver.resolve(user).await;
    assert_eq!(after.remaining_monthly, 5);
    assert_eq!(after.total_remaining, outcome.remaining_after);
}

#[tokio::test]
async fn test_audit_failure_keeps_decrement() {
    let (store, resolver, ledger) = setup();
    let user = Uuid::new_v4();
    let package = store.add_package(user, 2, Utc::now());
    store.fail_audit_insert(true);

    let outcome = run_search(&resolver, &ledger, user).await;

    assert!(outcome.credit_decremented);
    assert!(!outcome.audit_recorded);
    assert_eq!(outcome.remaining_after, 1);
    assert_eq!(store.package_remaining(package), Some(1));
    assert!(store.searches_for(user).is_empty());
}

#[tokio::test]
async fn test_no_credit_charges_nothing_but_records() {
    let (store, resolver, ledger) = setup();
    let user = Uuid::new_v4();

    let outcome = run_search(&resolver, &ledger, user).await;

    assert_eq!(outcome.charged, DecrementTarget::None);
    assert_eq!(outcome.remaining_after, 0);
    assert!(outcome.audit_recorded);
    let searches = store.searches_for(user);
    assert_eq!(searches.len(), 1);
    assert_eq!(searches[0].charged_to, ChargeSource::None);
}

#[tokio::test]
async fn test_concurrent_decrement_retries_with_fresh_balance() {
    let (store, resolver, ledger) = setup();
    let user = Uuid::new_v4();
    let package = store.add_package(user, 3, Utc::now());
    store.simulate_concurrent_decrements(1);

    let outcome = run_search(&resolver, &ledger, user).await;

    // The other writer took 3 -> 2, this search then took 2 -> 1
    assert_eq!(
        outcome.charged,
        DecrementTarget::Package {
            id: package,
            expected: 2
        }
    );
    assert_eq!(outcome.remaining_after, 1);
    assert_eq!(store.package_remaining(package), Some(1));
    assert_eq!(store.decrement_calls(), 2);
}

#[tokio::test]
async fn test_gives_up_after_repeated_conflicts() {
    let (store, resolver, ledger) = setup();
    let user = Uuid::new_v4();
    let package = store.add_package(user, 5, Utc::now());
    store.simulate_concurrent_decrements(MAX_DECREMENT_ATTEMPTS);

    let outcome = run_search(&resolver, &ledger, user).await;

    assert!(!outcome.credit_decremented);
    assert!(outcome.audit_recorded);
    assert_eq!(store.decrement_calls(), MAX_DECREMENT_ATTEMPTS);
    assert_eq!(store.package_remaining(package), Some(2));
    assert_eq!(outcome.remaining_after, 2);
}

#[tokio::test]
async fn test_abandoned_charge_does_not_count_as_monthly_usage() {
    let (store, resolver, ledger) = setup();
    let user = Uuid::new_v4();
    store.set_profile_tier(user, "pro");
    store.set_limit(PlanType::Pro, LEAD_FINDER_FEATURE, 5, true);
    store.add_package(user, 5, Utc::now());
    store.simulate_concurrent_decrements(MAX_DECREMENT_ATTEMPTS);

    let outcome = run_search(&resolver, &ledger, user).await;
    assert!(!outcome.credit_decremented);

    let after = resolver.resolve(user).await;
    assert_eq!(after.remaining_monthly, 5);
    assert_eq!(after.total_remaining, outcome.remaining_after);
}
