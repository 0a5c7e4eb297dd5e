//! Reserve/commit/rollback semantics of the credit ledger.

use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::harness::{create_db, create_db_with};
use crate::{
    config::LimitsConfig,
    db::DbError,
    models::{
        ChatMode, CommitUsage, LedgerStatus, ModelTier, NewReservation, Operation, ReserveDenial,
    },
};

async fn seed_wallet(pool: &SqlitePool, user_id: Uuid, balance: i64) {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO credit_wallets (user_id, balance, created_at, updated_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(balance)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .expect("seed wallet");
}

fn reservation(request_id: &str, scope_key: &str, credits: i64) -> NewReservation {
    NewReservation {
        request_id: request_id.to_string(),
        scope_key: scope_key.to_string(),
        operation: Operation::Chat,
        mode: ChatMode::Mentor,
        model: "gemini-2.5-flash".to_string(),
        model_tier: ModelTier::Stable,
        credits,
        metadata: json!({}),
    }
}

fn image_reservation(request_id: &str, scope_key: &str, credits: i64) -> NewReservation {
    NewReservation {
        operation: Operation::Image,
        mode: ChatMode::Visionary,
        model_tier: ModelTier::Standard,
        ..reservation(request_id, scope_key, credits)
    }
}

#[tokio::test]
async fn reserve_decrements_once_per_request_id() {
    let (pool, db) = create_db().await;
    let user_id = Uuid::new_v4();
    seed_wallet(&pool, user_id, 10).await;
    let scope = format!("user:{user_id}");

    let first = db
        .ledger()
        .reserve_user(user_id, reservation("req-1", &scope, 5))
        .await
        .unwrap();
    assert!(first.is_success());
    assert_eq!(first.credits_remaining, 5);

    // A duplicate submission reuses the recorded outcome.
    let second = db
        .ledger()
        .reserve_user(user_id, reservation("req-1", &scope, 5))
        .await
        .unwrap();
    assert!(second.is_success());
    assert_eq!(second.credits_remaining, 5);

    let entry = db.ledger().find_by_request_id("req-1").await.unwrap().unwrap();
    assert_eq!(entry.status, LedgerStatus::Pending);
    assert_eq!(entry.credits_reserved, 5);
}

#[tokio::test]
async fn insufficient_balance_mutates_nothing() {
    let (pool, db) = create_db().await;
    let user_id = Uuid::new_v4();
    seed_wallet(&pool, user_id, 3).await;
    let scope = format!("user:{user_id}");

    let outcome = db
        .ledger()
        .reserve_user(user_id, reservation("req-1", &scope, 5))
        .await
        .unwrap();
    assert_eq!(outcome.denial, Some(ReserveDenial::InsufficientCredits));
    assert_eq!(outcome.credits_remaining, 3);
    assert!(db.ledger().find_by_request_id("req-1").await.unwrap().is_none());
}

#[tokio::test]
async fn wallet_is_created_with_the_starting_balance() {
    let limits = LimitsConfig {
        starting_balance: 20,
        ..LimitsConfig::default()
    };
    let (_pool, db) = create_db_with(limits).await;
    let user_id = Uuid::new_v4();
    let scope = format!("user:{user_id}");

    let outcome = db
        .ledger()
        .reserve_user(user_id, reservation("req-1", &scope, 5))
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.credits_remaining, 15);
}

#[tokio::test]
async fn commit_records_usage_and_is_idempotent() {
    let (pool, db) = create_db().await;
    let user_id = Uuid::new_v4();
    seed_wallet(&pool, user_id, 10).await;
    let scope = format!("user:{user_id}");

    db.ledger()
        .reserve_user(user_id, reservation("req-1", &scope, 5))
        .await
        .unwrap();

    let usage = CommitUsage {
        tokens_in: 120,
        tokens_out: 80,
        grounded_queries: 2,
        image_count: 0,
        usd_micros: 155,
        metadata: json!({ "settled": true }),
    };
    db.ledger().commit("req-1", usage.clone()).await.unwrap();

    let entry = db.ledger().find_by_request_id("req-1").await.unwrap().unwrap();
    assert_eq!(entry.status, LedgerStatus::Committed);
    assert_eq!(entry.tokens_in, 120);
    assert_eq!(entry.usd_micros, 155);
    assert_eq!(entry.metadata["settled"], true);
    assert!(entry.settled_at.is_some());

    // Second commit is a no-op, not an error.
    db.ledger().commit("req-1", usage).await.unwrap();

    // Rollback after commit must not refund: the entry is terminal.
    db.ledger().rollback("req-1", "late rollback").await.unwrap();
    let entry = db.ledger().find_by_request_id("req-1").await.unwrap().unwrap();
    assert_eq!(entry.status, LedgerStatus::Committed);
    assert_eq!(db.wallets().balance(user_id).await.unwrap(), 5);
}

#[tokio::test]
async fn commit_on_missing_or_rolled_back_entries_errors() {
    let (pool, db) = create_db().await;
    let user_id = Uuid::new_v4();
    seed_wallet(&pool, user_id, 10).await;
    let scope = format!("user:{user_id}");

    let err = db
        .ledger()
        .commit("req-missing", CommitUsage::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound));

    db.ledger()
        .reserve_user(user_id, reservation("req-1", &scope, 5))
        .await
        .unwrap();
    db.ledger().rollback("req-1", "backend down").await.unwrap();

    let err = db
        .ledger()
        .commit("req-1", CommitUsage::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Conflict(_)));
}

#[tokio::test]
async fn rollback_refunds_exactly_once() {
    let (pool, db) = create_db().await;
    let user_id = Uuid::new_v4();
    seed_wallet(&pool, user_id, 10).await;
    let scope = format!("user:{user_id}");

    db.ledger()
        .reserve_user(user_id, reservation("req-1", &scope, 5))
        .await
        .unwrap();
    assert_eq!(db.wallets().balance(user_id).await.unwrap(), 5);

    db.ledger().rollback("req-1", "backend down").await.unwrap();
    assert_eq!(db.wallets().balance(user_id).await.unwrap(), 10);

    let entry = db.ledger().find_by_request_id("req-1").await.unwrap().unwrap();
    assert_eq!(entry.status, LedgerStatus::RolledBack);
    assert_eq!(entry.rollback_reason.as_deref(), Some("backend down"));

    // Repeated rollback is a no-op, not a second refund.
    db.ledger().rollback("req-1", "again").await.unwrap();
    assert_eq!(db.wallets().balance(user_id).await.unwrap(), 10);
}

#[tokio::test]
async fn a_rolled_back_request_id_can_reserve_again() {
    let (pool, db) = create_db().await;
    let user_id = Uuid::new_v4();
    seed_wallet(&pool, user_id, 10).await;
    let scope = format!("user:{user_id}");

    db.ledger()
        .reserve_user(user_id, reservation("req-1", &scope, 5))
        .await
        .unwrap();
    db.ledger().rollback("req-1", "backend down").await.unwrap();

    let retry = db
        .ledger()
        .reserve_user(user_id, reservation("req-1", &scope, 5))
        .await
        .unwrap();
    assert!(retry.is_success());
    assert_eq!(retry.credits_remaining, 5);

    let entry = db.ledger().find_by_request_id("req-1").await.unwrap().unwrap();
    assert_eq!(entry.status, LedgerStatus::Pending);
    assert!(entry.rollback_reason.is_none());
}

#[tokio::test]
async fn demo_reserve_provisions_the_session_lazily() {
    let (_pool, db) = create_db().await;

    let outcome = db
        .ledger()
        .reserve_demo("fp-1", false, reservation("req-1", "demo:fp-1", 2))
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.credits_remaining, 13);
    assert_eq!(outcome.images_remaining, Some(1));
    assert!(outcome.demo_session_id.is_some());

    let entry = db.ledger().find_by_request_id("req-1").await.unwrap().unwrap();
    assert_eq!(entry.demo_session_id, outcome.demo_session_id);
}

#[tokio::test]
async fn demo_image_reserve_consumes_quota_and_refunds_on_rollback() {
    let (_pool, db) = create_db().await;

    let outcome = db
        .ledger()
        .reserve_demo("fp-1", true, image_reservation("req-1", "demo:fp-1", 5))
        .await
        .unwrap();
    assert_eq!(outcome.credits_remaining, 10);
    assert_eq!(outcome.images_remaining, Some(0));

    // Second image: credits are there, the image slot is not.
    let denied = db
        .ledger()
        .reserve_demo("fp-1", true, image_reservation("req-2", "demo:fp-1", 5))
        .await
        .unwrap();
    assert_eq!(denied.denial, Some(ReserveDenial::InsufficientImageQuota));

    db.ledger().rollback("req-1", "backend down").await.unwrap();
    let session = db.demo_sessions().get_or_create("fp-1").await.unwrap();
    assert_eq!(session.credits_remaining, 15);
    assert_eq!(session.images_remaining, 1);
}

#[tokio::test]
async fn demo_credits_exhaust_with_the_right_denial() {
    let (_pool, db) = create_db().await;

    let outcome = db
        .ledger()
        .reserve_demo("fp-1", false, reservation("req-1", "demo:fp-1", 14))
        .await
        .unwrap();
    assert!(outcome.is_success());

    let denied = db
        .ledger()
        .reserve_demo("fp-1", false, reservation("req-2", "demo:fp-1", 2))
        .await
        .unwrap();
    assert_eq!(denied.denial, Some(ReserveDenial::InsufficientCredits));
    assert_eq!(denied.credits_remaining, 1);
}

#[tokio::test]
async fn window_counts_only_see_committed_entries_in_range() {
    let (pool, db) = create_db().await;
    let user_id = Uuid::new_v4();
    seed_wallet(&pool, user_id, 100).await;
    let scope = format!("user:{user_id}");

    for (request_id, commit) in [("req-1", true), ("req-2", true), ("req-3", false)] {
        db.ledger()
            .reserve_user(user_id, reservation(request_id, &scope, 1))
            .await
            .unwrap();
        if commit {
            db.ledger()
                .commit(
                    request_id,
                    CommitUsage {
                        usd_micros: 1000,
                        metadata: json!({}),
                        ..CommitUsage::default()
                    },
                )
                .await
                .unwrap();
        }
    }

    // Age one committed entry out of the window.
    sqlx::query("UPDATE credit_ledger SET created_at = ? WHERE request_id = 'req-2'")
        .bind(Utc::now() - Duration::days(2))
        .execute(&pool)
        .await
        .unwrap();

    let since = Utc::now() - Duration::hours(1);
    let count = db
        .ledger()
        .committed_count_since(&scope, Operation::Chat, since)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let spend = db
        .ledger()
        .committed_usd_micros_since(user_id, since)
        .await
        .unwrap();
    assert_eq!(spend, 1000);

    // Widen the window and both committed entries appear.
    let spend = db
        .ledger()
        .committed_usd_micros_since(user_id, Utc::now() - Duration::days(7))
        .await
        .unwrap();
    assert_eq!(spend, 2000);
}

#[tokio::test]
async fn stale_pending_entries_are_listed_oldest_first() {
    let (pool, db) = create_db().await;
    let user_id = Uuid::new_v4();
    seed_wallet(&pool, user_id, 100).await;
    let scope = format!("user:{user_id}");

    for request_id in ["req-old", "req-older", "req-fresh"] {
        db.ledger()
            .reserve_user(user_id, reservation(request_id, &scope, 1))
            .await
            .unwrap();
    }
    sqlx::query("UPDATE credit_ledger SET created_at = ? WHERE request_id = 'req-old'")
        .bind(Utc::now() - Duration::minutes(30))
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("UPDATE credit_ledger SET created_at = ? WHERE request_id = 'req-older'")
        .bind(Utc::now() - Duration::minutes(60))
        .execute(&pool)
        .await
        .unwrap();

    let stale = db
        .ledger()
        .stale_pending_request_ids(Utc::now() - Duration::minutes(15), 10)
        .await
        .unwrap();
    assert_eq!(stale, vec!["req-older".to_string(), "req-old".to_string()]);
}
