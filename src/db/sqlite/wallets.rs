use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::{error::DbResult, repos::WalletRepo};

pub struct SqliteWalletRepo {
    pool: SqlitePool,
}

impl SqliteWalletRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WalletRepo for SqliteWalletRepo {
    async fn balance(&self, user_id: Uuid) -> DbResult<i64> {
        let row = sqlx::query("SELECT balance FROM credit_wallets WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("balance")).unwrap_or(0))
    }
}
