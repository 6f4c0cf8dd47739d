//! Charges a completed search to the user's balance and records it.

use crate::entitlements::{
    resolve_decrement_source, DecrementTarget, EntitlementResolver, EntitlementSnapshot,
    EntitlementStore,
};
use crate::models::SearchAuditRecord;
use std::sync::Arc;
use uuid::Uuid;

/// How many times a lost conditional update is re-decided against a fresh balance.
pub const MAX_DECREMENT_ATTEMPTS: usize = 3;

/// What the ledger did for one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerOutcome {
    /// Source the credit was taken from (`None` if nothing was charged).
    pub charged: DecrementTarget,
    pub credit_decremented: bool,
    /// Balance to report back to the caller.
    pub remaining_after: i64,
    pub audit_recorded: bool,
}

pub struct EntitlementLedger {
    store: Arc<dyn EntitlementStore>,
    resolver: EntitlementResolver,
}

impl EntitlementLedger {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self {
            resolver: EntitlementResolver::new(store.clone()),
            store,
        }
    }

    /// Decrements one credit and inserts the audit record, tagged with what was charged.
    ///
    /// Must only be called once the upstream search has produced a result set. Store failures
    /// are logged and reflected in the outcome; they never fail the search.
    pub async fn settle(
        &self,
        user_id: Uuid,
        snapshot: EntitlementSnapshot,
        mut record: SearchAuditRecord,
    ) -> LedgerOutcome {
        let (charged, current) = self.decrement(user_id, snapshot).await;
        record.charged_to = charged.charge_source();
        record.package_id = charged.package_id();
        let credit_decremented = charged != DecrementTarget::None;
        let remaining_after = if credit_decremented {
            (current.total_remaining - 1).max(0)
        } else {
            current.total_remaining
        };

        // At most once: a failed insert is not retried
        let audit_recorded = match self.store.insert_search_record(&record).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    "Failed to record search for user {} (credit_decremented={}): {}",
                    user_id,
                    credit_decremented,
                    e
                );
                false
            }
        };

        LedgerOutcome {
            charged,
            credit_decremented,
            remaining_after,
            audit_recorded,
        }
    }

    /// Returns the source actually charged and the snapshot that decision was made on.
    async fn decrement(
        &self,
        user_id: Uuid,
        mut snapshot: EntitlementSnapshot,
    ) -> (DecrementTarget, EntitlementSnapshot) {
        for attempt in 1..=MAX_DECREMENT_ATTEMPTS {
            match resolve_decrement_source(&snapshot) {
                DecrementTarget::Package { id, expected } => {
                    match self.store.decrement_package(id, expected).await {
                        Ok(true) => {
                            tracing::info!(
                                "✓ Package {} decremented {} -> {} for user {}",
                                id,
                                expected,
                                expected - 1,
                                user_id
                            );
                            return (DecrementTarget::Package { id, expected }, snapshot);
                        }
                        Ok(false) => {
                            tracing::warn!(
                                "Package {} changed concurrently (attempt {}/{}), re-resolving balance",
                                id,
                                attempt,
                                MAX_DECREMENT_ATTEMPTS
                            );
                            snapshot = self.resolver.resolve(user_id).await;
                        }
                        Err(e) => {
                            tracing::error!(
                                "Failed to decrement package {} for user {}, search not charged: {}",
                                id,
                                user_id,
                                e
                            );
                            return (DecrementTarget::None, snapshot);
                        }
                    }
                }
                DecrementTarget::Monthly => {
                    // Monthly usage is derived from audit records; nothing to write here
                    tracing::debug!("Search charged to monthly allowance for user {}", user_id);
                    return (DecrementTarget::Monthly, snapshot);
                }
                DecrementTarget::None => {
                    tracing::warn!("No credit available to charge for user {}", user_id);
                    return (DecrementTarget::None, snapshot);
                }
            }
        }

        tracing::error!(
            "Gave up charging user {} after {} conflicting updates",
            user_id,
            MAX_DECREMENT_ATTEMPTS
        );
        (DecrementTarget::None, snapshot)
    }
}
