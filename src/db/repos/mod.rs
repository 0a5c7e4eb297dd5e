use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{
        CommitUsage, DemoSession, LedgerEntry, NewReservation, Operation, ReserveOutcome,
        UsageLimits,
    },
};

/// User credit wallets. Mutation happens exclusively through
/// [`CreditLedgerRepo::reserve_user`] and the settle operations; this
/// repo only exposes reads.
#[async_trait]
pub trait WalletRepo: Send + Sync {
    /// Current balance, zero when no wallet row exists yet.
    async fn balance(&self, user_id: Uuid) -> DbResult<i64>;
}

/// Demo session rows, one per device fingerprint.
#[async_trait]
pub trait DemoSessionRepo: Send + Sync {
    /// Fetch the session for a fingerprint, creating it with default
    /// quotas on first contact and resetting it when expired.
    async fn get_or_create(&self, device_fingerprint: &str) -> DbResult<DemoSession>;
}

/// The credit ledger and the atomic reserve/commit/rollback primitive.
///
/// Reserve is atomic with respect to concurrent reservations on the
/// same scope: the balance check, the decrement, and the pending entry
/// creation happen in one transaction with a conditional update. An
/// existing entry for the same `request_id` is never double-decremented.
#[async_trait]
pub trait CreditLedgerRepo: Send + Sync {
    /// Reserve credits against a user wallet. The wallet is created
    /// with the configured starting balance if absent.
    async fn reserve_user(
        &self,
        user_id: Uuid,
        reservation: NewReservation,
    ) -> DbResult<ReserveOutcome>;

    /// Reserve credits against a demo session, additionally consuming
    /// one image slot when `is_image` is set. The session is created or
    /// reset if needed, like [`DemoSessionRepo::get_or_create`].
    async fn reserve_demo(
        &self,
        device_fingerprint: &str,
        is_image: bool,
        reservation: NewReservation,
    ) -> DbResult<ReserveOutcome>;

    /// Transition a pending entry to `committed`, attaching observed
    /// usage. Committing an already-committed entry is an idempotent
    /// no-op; a missing or rolled-back entry is an error.
    async fn commit(&self, request_id: &str, usage: CommitUsage) -> DbResult<()>;

    /// Transition a pending entry to `rolled_back` and restore the
    /// reserved credits (and demo image quota, if applicable). Safe to
    /// call repeatedly: terminal entries are left untouched.
    async fn rollback(&self, request_id: &str, reason: &str) -> DbResult<()>;

    async fn find_by_request_id(&self, request_id: &str) -> DbResult<Option<LedgerEntry>>;

    /// Count committed entries for a scope/operation since `since`.
    /// Daily and weekly quota windows are derived from this.
    async fn committed_count_since(
        &self,
        scope_key: &str,
        operation: Operation,
        since: DateTime<Utc>,
    ) -> DbResult<i64>;

    /// Sum of committed USD spend (micro-USD) for a user since `since`.
    async fn committed_usd_micros_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> DbResult<i64>;

    /// Request ids of pending entries created before `cutoff`, oldest
    /// first. Used by the reservation sweeper.
    async fn stale_pending_request_ids(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<String>>;
}

/// Exactly-once response cache keyed `(endpoint, scope_key, key)`.
#[async_trait]
pub trait IdempotencyRepo: Send + Sync {
    async fn get(
        &self,
        endpoint: &str,
        scope_key: &str,
        idempotency_key: &str,
    ) -> DbResult<Option<serde_json::Value>>;

    /// Upsert the cached response. Only called after a successful
    /// commit; rolled-back attempts leave no cache entry.
    async fn save(
        &self,
        endpoint: &str,
        scope_key: &str,
        idempotency_key: &str,
        response: &serde_json::Value,
    ) -> DbResult<()>;
}

/// Per-plan usage limits.
#[async_trait]
pub trait UsageLimitsRepo: Send + Sync {
    /// Limits for a plan, `None` when the plan row is absent.
    async fn get(&self, plan_id: &str) -> DbResult<Option<UsageLimits>>;
}
