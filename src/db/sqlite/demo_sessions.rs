use async_trait::async_trait;
use sqlx::SqlitePool;

use super::common::get_or_create_demo_session;
use crate::{
    config::DemoLimits,
    db::{error::DbResult, repos::DemoSessionRepo},
    models::DemoSession,
};

pub struct SqliteDemoSessionRepo {
    pool: SqlitePool,
    demo: DemoLimits,
}

impl SqliteDemoSessionRepo {
    pub fn new(pool: SqlitePool, demo: DemoLimits) -> Self {
        Self { pool, demo }
    }
}

#[async_trait]
impl DemoSessionRepo for SqliteDemoSessionRepo {
    async fn get_or_create(&self, device_fingerprint: &str) -> DbResult<DemoSession> {
        let mut conn = self.pool.acquire().await?;
        get_or_create_demo_session(&mut conn, device_fingerprint, &self.demo).await
    }
}
