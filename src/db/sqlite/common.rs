//! Row mapping and shared statements for the SQLite backend.

use chrono::{Duration, Utc};
use sqlx::{Row, SqliteConnection, sqlite::SqliteRow};
use uuid::Uuid;

use crate::{
    config::DemoLimits,
    db::error::{DbError, DbResult},
    models::{ChatMode, DemoSession, LedgerEntry, LedgerStatus, ModelTier, Operation},
};

pub(crate) fn parse_uuid(value: &str) -> DbResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| DbError::Internal(format!("malformed uuid {value:?}: {e}")))
}

pub(crate) fn ledger_entry_from_row(row: &SqliteRow) -> DbResult<LedgerEntry> {
    let id: String = row.get("id");
    let user_id: Option<String> = row.get("user_id");
    let demo_session_id: Option<String> = row.get("demo_session_id");
    let operation: String = row.get("operation");
    let mode: String = row.get("mode");
    let model_tier: String = row.get("model_tier");
    let status: String = row.get("status");
    let metadata: String = row.get("metadata");

    Ok(LedgerEntry {
        id: parse_uuid(&id)?,
        request_id: row.get("request_id"),
        scope_key: row.get("scope_key"),
        user_id: user_id.as_deref().map(parse_uuid).transpose()?,
        demo_session_id: demo_session_id.as_deref().map(parse_uuid).transpose()?,
        operation: Operation::parse(&operation)
            .ok_or_else(|| DbError::Internal(format!("unknown operation {operation:?}")))?,
        mode: ChatMode::parse(&mode)
            .ok_or_else(|| DbError::Internal(format!("unknown mode {mode:?}")))?,
        model: row.get("model"),
        model_tier: ModelTier::parse(&model_tier)
            .ok_or_else(|| DbError::Internal(format!("unknown model tier {model_tier:?}")))?,
        credits_reserved: row.get("credits_reserved"),
        status: LedgerStatus::parse(&status)
            .ok_or_else(|| DbError::Internal(format!("unknown ledger status {status:?}")))?,
        tokens_in: row.get("tokens_in"),
        tokens_out: row.get("tokens_out"),
        grounded_queries: row.get("grounded_queries"),
        image_count: row.get("image_count"),
        usd_micros: row.get("usd_micros"),
        rollback_reason: row.get("rollback_reason"),
        metadata: serde_json::from_str(&metadata)?,
        created_at: row.get("created_at"),
        settled_at: row.get("settled_at"),
    })
}

pub(crate) fn demo_session_from_row(row: &SqliteRow) -> DbResult<DemoSession> {
    let id: String = row.get("id");
    Ok(DemoSession {
        id: parse_uuid(&id)?,
        device_fingerprint: row.get("device_fingerprint"),
        credits_remaining: row.get("credits_remaining"),
        images_remaining: row.get("images_remaining"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    })
}

const DEMO_SESSION_COLS: &str =
    "id, device_fingerprint, credits_remaining, images_remaining, expires_at, created_at";

/// Fetch the demo session for a fingerprint, creating it with default
/// quotas on first contact and resetting counters once expired.
///
/// Uses INSERT OR IGNORE + re-select so a racing creator wins cleanly.
pub(crate) async fn get_or_create_demo_session(
    conn: &mut SqliteConnection,
    device_fingerprint: &str,
    limits: &DemoLimits,
) -> DbResult<DemoSession> {
    let now = Utc::now();
    let expires_at = now + Duration::days(limits.ttl_days);

    sqlx::query(
        r#"
        INSERT OR IGNORE INTO demo_sessions
            (id, device_fingerprint, credits_remaining, images_remaining,
             expires_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(device_fingerprint)
    .bind(limits.credits)
    .bind(limits.images)
    .bind(expires_at)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query(&format!(
        "SELECT {DEMO_SESSION_COLS} FROM demo_sessions WHERE device_fingerprint = ?"
    ))
    .bind(device_fingerprint)
    .fetch_one(&mut *conn)
    .await?;

    let session = demo_session_from_row(&row)?;
    if !session.is_expired(now) {
        return Ok(session);
    }

    sqlx::query(
        r#"
        UPDATE demo_sessions
        SET credits_remaining = ?, images_remaining = ?, expires_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(limits.credits)
    .bind(limits.images)
    .bind(now + Duration::days(limits.ttl_days))
    .bind(now)
    .bind(session.id.to_string())
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query(&format!(
        "SELECT {DEMO_SESSION_COLS} FROM demo_sessions WHERE id = ?"
    ))
    .bind(session.id.to_string())
    .fetch_one(&mut *conn)
    .await?;

    demo_session_from_row(&row)
}
