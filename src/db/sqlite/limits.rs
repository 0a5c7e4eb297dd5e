use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::{
    db::{error::DbResult, repos::UsageLimitsRepo},
    models::UsageLimits,
};

pub struct SqliteUsageLimitsRepo {
    pool: SqlitePool,
}

impl SqliteUsageLimitsRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageLimitsRepo for SqliteUsageLimitsRepo {
    async fn get(&self, plan_id: &str) -> DbResult<Option<UsageLimits>> {
        let row = sqlx::query(
            r#"
            SELECT weekly_images, daily_messages, soft_usd_cap_micros, period_days
            FROM usage_limits WHERE plan_id = ?
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| UsageLimits {
            weekly_images: row.get("weekly_images"),
            daily_messages: row.get("daily_messages"),
            soft_usd_cap_micros: row.get("soft_usd_cap_micros"),
            period_days: row.get("period_days"),
        }))
    }
}
