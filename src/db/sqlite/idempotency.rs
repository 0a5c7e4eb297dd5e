use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::db::{error::DbResult, repos::IdempotencyRepo};

pub struct SqliteIdempotencyRepo {
    pool: SqlitePool,
}

impl SqliteIdempotencyRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyRepo for SqliteIdempotencyRepo {
    async fn get(
        &self,
        endpoint: &str,
        scope_key: &str,
        idempotency_key: &str,
    ) -> DbResult<Option<serde_json::Value>> {
        let row = sqlx::query(
            r#"
            SELECT response FROM idempotency_requests
            WHERE endpoint = ? AND scope_key = ? AND idempotency_key = ?
            "#,
        )
        .bind(endpoint)
        .bind(scope_key)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let response: String = row.get("response");
                Ok(Some(serde_json::from_str(&response)?))
            }
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        endpoint: &str,
        scope_key: &str,
        idempotency_key: &str,
        response: &serde_json::Value,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_requests
                (endpoint, scope_key, idempotency_key, response, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (endpoint, scope_key, idempotency_key)
            DO UPDATE SET response = excluded.response
            "#,
        )
        .bind(endpoint)
        .bind(scope_key)
        .bind(idempotency_key)
        .bind(response.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
