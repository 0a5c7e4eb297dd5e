//! Per-plan usage limits.

use super::harness::create_db;

#[tokio::test]
async fn the_default_plan_is_seeded_by_migrations() {
    let (_pool, db) = create_db().await;

    let limits = db.usage_limits().get("default").await.unwrap().unwrap();
    assert_eq!(limits.weekly_images, 2);
    assert_eq!(limits.daily_messages, 60);
    assert_eq!(limits.soft_usd_cap_micros, 2_500_000);
    assert_eq!(limits.period_days, 84);
}

#[tokio::test]
async fn unknown_plans_return_none() {
    let (_pool, db) = create_db().await;
    assert!(db.usage_limits().get("missing-plan").await.unwrap().is_none());
}
