mod error;
pub mod repos;
pub mod sqlite;

#[cfg(test)]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use repos::*;

use crate::config::{DatabaseConfig, LimitsConfig};

/// Cached repository trait objects, created once at startup.
struct CachedRepos {
    wallets: Arc<dyn WalletRepo>,
    demo_sessions: Arc<dyn DemoSessionRepo>,
    ledger: Arc<dyn CreditLedgerRepo>,
    idempotency: Arc<dyn IdempotencyRepo>,
    usage_limits: Arc<dyn UsageLimitsRepo>,
}

/// Database pool and repository facade.
///
/// Repositories are cached at construction time to avoid allocation on
/// each access.
pub struct DbPool {
    pool: sqlx::SqlitePool,
    repos: CachedRepos,
}

impl DbPool {
    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    pub fn from_sqlite(pool: sqlx::SqlitePool, limits: &LimitsConfig) -> Self {
        let repos = CachedRepos {
            wallets: Arc::new(sqlite::SqliteWalletRepo::new(pool.clone())),
            demo_sessions: Arc::new(sqlite::SqliteDemoSessionRepo::new(
                pool.clone(),
                limits.demo.clone(),
            )),
            ledger: Arc::new(sqlite::SqliteCreditLedgerRepo::new(
                pool.clone(),
                limits.starting_balance,
                limits.demo.clone(),
            )),
            idempotency: Arc::new(sqlite::SqliteIdempotencyRepo::new(pool.clone())),
            usage_limits: Arc::new(sqlite::SqliteUsageLimitsRepo::new(pool.clone())),
        };
        DbPool { pool, repos }
    }

    /// Create a database pool from configuration.
    pub async fn from_config(config: &DatabaseConfig, limits: &LimitsConfig) -> DbResult<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(
                sqlx::sqlite::SqliteConnectOptions::new()
                    .filename(&config.path)
                    .create_if_missing(config.create_if_missing)
                    .journal_mode(if config.wal_mode {
                        sqlx::sqlite::SqliteJournalMode::Wal
                    } else {
                        sqlx::sqlite::SqliteJournalMode::Delete
                    })
                    .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms)),
            )
            .await?;

        Ok(Self::from_sqlite(pool, limits))
    }

    /// Run database migrations using sqlx's migration runner.
    pub async fn run_migrations(&self) -> DbResult<()> {
        tracing::info!("Running SQLite migrations");
        sqlx::migrate!("./migrations_sqlx/sqlite")
            .run(&self.pool)
            .await?;
        tracing::info!("SQLite migrations completed successfully");
        Ok(())
    }

    pub fn wallets(&self) -> Arc<dyn WalletRepo> {
        Arc::clone(&self.repos.wallets)
    }

    pub fn demo_sessions(&self) -> Arc<dyn DemoSessionRepo> {
        Arc::clone(&self.repos.demo_sessions)
    }

    pub fn ledger(&self) -> Arc<dyn CreditLedgerRepo> {
        Arc::clone(&self.repos.ledger)
    }

    pub fn idempotency(&self) -> Arc<dyn IdempotencyRepo> {
        Arc::clone(&self.repos.idempotency)
    }

    pub fn usage_limits(&self) -> Arc<dyn UsageLimitsRepo> {
        Arc::clone(&self.repos.usage_limits)
    }

    /// Health check for database connectivity.
    pub async fn health_check(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
