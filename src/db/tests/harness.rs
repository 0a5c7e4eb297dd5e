//! Test harness for database repository testing.

use sqlx::SqlitePool;

use crate::{config::LimitsConfig, db::DbPool};

/// Create an in-memory SQLite pool for testing.
pub async fn create_sqlite_pool() -> SqlitePool {
    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool")
}

/// Run the real migration files so tests match the production schema.
pub async fn run_sqlite_migrations(pool: &SqlitePool) {
    sqlx::migrate!("./migrations_sqlx/sqlite")
        .run(pool)
        .await
        .expect("Failed to run SQLite migrations");
}

/// Migrated pool plus a repo facade with default limits.
pub async fn create_db() -> (SqlitePool, DbPool) {
    create_db_with(LimitsConfig::default()).await
}

pub async fn create_db_with(limits: LimitsConfig) -> (SqlitePool, DbPool) {
    let pool = create_sqlite_pool().await;
    run_sqlite_migrations(&pool).await;
    let db = DbPool::from_sqlite(pool.clone(), &limits);
    (pool, db)
}
