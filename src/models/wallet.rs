use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Anonymous device-scoped trial state. Unlike user wallets, which are
/// balance rows mutated only through reserve/commit/rollback, this is a
/// single mutable row that resets to defaults once expired.
#[derive(Debug, Clone)]
pub struct DemoSession {
    pub id: Uuid,
    pub device_fingerprint: String,
    pub credits_remaining: i64,
    pub images_remaining: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DemoSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
