use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::common::{get_or_create_demo_session, ledger_entry_from_row};
use crate::{
    config::DemoLimits,
    db::{
        error::{DbError, DbResult},
        repos::CreditLedgerRepo,
    },
    models::{
        CommitUsage, LedgerEntry, LedgerStatus, NewReservation, Operation, ReserveDenial,
        ReserveOutcome,
    },
};

const LEDGER_COLS: &str = "id, request_id, scope_key, user_id, demo_session_id, operation, \
     mode, model, model_tier, credits_reserved, status, tokens_in, tokens_out, \
     grounded_queries, image_count, usd_micros, rollback_reason, metadata, \
     created_at, settled_at";

pub struct SqliteCreditLedgerRepo {
    pool: SqlitePool,
    starting_balance: i64,
    demo: DemoLimits,
}

impl SqliteCreditLedgerRepo {
    pub fn new(pool: SqlitePool, starting_balance: i64, demo: DemoLimits) -> Self {
        Self {
            pool,
            starting_balance,
            demo,
        }
    }
}

async fn fetch_entry(
    conn: &mut SqliteConnection,
    request_id: &str,
) -> DbResult<Option<LedgerEntry>> {
    let row = sqlx::query(&format!(
        "SELECT {LEDGER_COLS} FROM credit_ledger WHERE request_id = ?"
    ))
    .bind(request_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(ledger_entry_from_row).transpose()
}

async fn wallet_balance(conn: &mut SqliteConnection, user_id: Uuid) -> DbResult<i64> {
    let row = sqlx::query("SELECT balance FROM credit_wallets WHERE user_id = ?")
        .bind(user_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|r| r.get("balance")).unwrap_or(0))
}

async fn demo_counters(conn: &mut SqliteConnection, session_id: Uuid) -> DbResult<(i64, i64)> {
    let row = sqlx::query("SELECT credits_remaining, images_remaining FROM demo_sessions WHERE id = ?")
        .bind(session_id.to_string())
        .fetch_one(&mut *conn)
        .await?;
    Ok((row.get("credits_remaining"), row.get("images_remaining")))
}

/// Reset a rolled-back entry to `pending` for a retried request,
/// recording the new reservation parameters.
async fn revive_entry(
    conn: &mut SqliteConnection,
    reservation: &NewReservation,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE credit_ledger
        SET status = 'pending', credits_reserved = ?, mode = ?, model = ?,
            model_tier = ?, metadata = ?, rollback_reason = NULL,
            created_at = ?, settled_at = NULL
        WHERE request_id = ? AND status = 'rolled_back'
        "#,
    )
    .bind(reservation.credits)
    .bind(reservation.mode.as_str())
    .bind(reservation.model.as_str())
    .bind(reservation.model_tier.as_str())
    .bind(reservation.metadata.to_string())
    .bind(now)
    .bind(reservation.request_id.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_entry(
    conn: &mut SqliteConnection,
    reservation: &NewReservation,
    user_id: Option<Uuid>,
    demo_session_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO credit_ledger
            (id, request_id, scope_key, user_id, demo_session_id, operation,
             mode, model, model_tier, credits_reserved, status, metadata, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(reservation.request_id.as_str())
    .bind(reservation.scope_key.as_str())
    .bind(user_id.map(|id| id.to_string()))
    .bind(demo_session_id.map(|id| id.to_string()))
    .bind(reservation.operation.as_str())
    .bind(reservation.mode.as_str())
    .bind(reservation.model.as_str())
    .bind(reservation.model_tier.as_str())
    .bind(reservation.credits)
    .bind(reservation.metadata.to_string())
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Merge commit-time metadata into the metadata recorded at reserve
/// time. Both sides are JSON objects in practice; non-objects are
/// replaced wholesale.
fn merge_metadata(base: &serde_json::Value, extra: &serde_json::Value) -> serde_json::Value {
    match (base, extra) {
        (serde_json::Value::Object(base), serde_json::Value::Object(extra)) => {
            let mut merged = base.clone();
            for (k, v) in extra {
                merged.insert(k.clone(), v.clone());
            }
            serde_json::Value::Object(merged)
        }
        (_, serde_json::Value::Null) => base.clone(),
        _ => extra.clone(),
    }
}

#[async_trait]
impl CreditLedgerRepo for SqliteCreditLedgerRepo {
    async fn reserve_user(
        &self,
        user_id: Uuid,
        reservation: NewReservation,
    ) -> DbResult<ReserveOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // A pre-existing entry means this request_id was already
        // reserved once; never decrement twice for it.
        let revive = match fetch_entry(&mut tx, &reservation.request_id).await? {
            Some(entry) if entry.status != LedgerStatus::RolledBack => {
                let balance = wallet_balance(&mut tx, user_id).await?;
                tx.commit().await?;
                return Ok(ReserveOutcome {
                    denial: None,
                    credits_remaining: balance,
                    images_remaining: None,
                    demo_session_id: None,
                });
            }
            Some(_) => true,
            None => false,
        };

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO credit_wallets (user_id, balance, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(user_id.to_string())
        .bind(self.starting_balance)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            r#"
            UPDATE credit_wallets
            SET balance = balance - ?1, updated_at = ?2
            WHERE user_id = ?3 AND balance >= ?1
            "#,
        )
        .bind(reservation.credits)
        .bind(now)
        .bind(user_id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let balance = wallet_balance(&mut tx, user_id).await?;
            // Keep the lazily created wallet row; drop nothing else.
            tx.commit().await?;
            return Ok(ReserveOutcome {
                denial: Some(ReserveDenial::InsufficientCredits),
                credits_remaining: balance,
                images_remaining: None,
                demo_session_id: None,
            });
        }

        if revive {
            revive_entry(&mut tx, &reservation, now).await?;
        } else {
            insert_entry(&mut tx, &reservation, Some(user_id), None, now).await?;
        }

        let balance = wallet_balance(&mut tx, user_id).await?;
        tx.commit().await?;

        Ok(ReserveOutcome {
            denial: None,
            credits_remaining: balance,
            images_remaining: None,
            demo_session_id: None,
        })
    }

    async fn reserve_demo(
        &self,
        device_fingerprint: &str,
        is_image: bool,
        reservation: NewReservation,
    ) -> DbResult<ReserveOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let session = get_or_create_demo_session(&mut tx, device_fingerprint, &self.demo).await?;

        let revive = match fetch_entry(&mut tx, &reservation.request_id).await? {
            Some(entry) if entry.status != LedgerStatus::RolledBack => {
                let (credits, images) = demo_counters(&mut tx, session.id).await?;
                tx.commit().await?;
                return Ok(ReserveOutcome {
                    denial: None,
                    credits_remaining: credits,
                    images_remaining: Some(images),
                    demo_session_id: Some(session.id),
                });
            }
            Some(_) => true,
            None => false,
        };

        let updated = if is_image {
            sqlx::query(
                r#"
                UPDATE demo_sessions
                SET credits_remaining = credits_remaining - ?1,
                    images_remaining = images_remaining - 1,
                    updated_at = ?2
                WHERE id = ?3 AND credits_remaining >= ?1 AND images_remaining >= 1
                "#,
            )
            .bind(reservation.credits)
            .bind(now)
            .bind(session.id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE demo_sessions
                SET credits_remaining = credits_remaining - ?1, updated_at = ?2
                WHERE id = ?3 AND credits_remaining >= ?1
                "#,
            )
            .bind(reservation.credits)
            .bind(now)
            .bind(session.id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected()
        };

        if updated == 0 {
            let (credits, images) = demo_counters(&mut tx, session.id).await?;
            tx.commit().await?;
            let denial = if credits < reservation.credits {
                ReserveDenial::InsufficientCredits
            } else {
                ReserveDenial::InsufficientImageQuota
            };
            return Ok(ReserveOutcome {
                denial: Some(denial),
                credits_remaining: credits,
                images_remaining: Some(images),
                demo_session_id: Some(session.id),
            });
        }

        if revive {
            revive_entry(&mut tx, &reservation, now).await?;
        } else {
            insert_entry(&mut tx, &reservation, None, Some(session.id), now).await?;
        }

        let (credits, images) = demo_counters(&mut tx, session.id).await?;
        tx.commit().await?;

        Ok(ReserveOutcome {
            denial: None,
            credits_remaining: credits,
            images_remaining: Some(images),
            demo_session_id: Some(session.id),
        })
    }

    async fn commit(&self, request_id: &str, usage: CommitUsage) -> DbResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let entry = fetch_entry(&mut tx, request_id)
            .await?
            .ok_or(DbError::NotFound)?;

        match entry.status {
            LedgerStatus::Committed => return Ok(()),
            LedgerStatus::RolledBack => {
                return Err(DbError::Conflict(format!(
                    "request {request_id} was already rolled back"
                )));
            }
            LedgerStatus::Pending => {}
        }

        let metadata = merge_metadata(&entry.metadata, &usage.metadata);
        sqlx::query(
            r#"
            UPDATE credit_ledger
            SET status = 'committed', tokens_in = ?, tokens_out = ?,
                grounded_queries = ?, image_count = ?, usd_micros = ?,
                metadata = ?, settled_at = ?
            WHERE request_id = ? AND status = 'pending'
            "#,
        )
        .bind(usage.tokens_in)
        .bind(usage.tokens_out)
        .bind(usage.grounded_queries)
        .bind(usage.image_count)
        .bind(usage.usd_micros)
        .bind(metadata.to_string())
        .bind(now)
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, request_id: &str, reason: &str) -> DbResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let entry = fetch_entry(&mut tx, request_id)
            .await?
            .ok_or(DbError::NotFound)?;

        // Terminal entries stay terminal; repeated rollbacks are no-ops.
        if entry.status.is_terminal() {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE credit_ledger
            SET status = 'rolled_back', rollback_reason = ?, settled_at = ?
            WHERE request_id = ? AND status = 'pending'
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        if let Some(user_id) = entry.user_id {
            sqlx::query(
                r#"
                UPDATE credit_wallets
                SET balance = balance + ?, updated_at = ?
                WHERE user_id = ?
                "#,
            )
            .bind(entry.credits_reserved)
            .bind(now)
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;
        } else if let Some(session_id) = entry.demo_session_id {
            let image_refund = if entry.operation == Operation::Image {
                1
            } else {
                0
            };
            sqlx::query(
                r#"
                UPDATE demo_sessions
                SET credits_remaining = credits_remaining + ?,
                    images_remaining = images_remaining + ?,
                    updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(entry.credits_reserved)
            .bind(image_refund)
            .bind(now)
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_request_id(&self, request_id: &str) -> DbResult<Option<LedgerEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {LEDGER_COLS} FROM credit_ledger WHERE request_id = ?"
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(ledger_entry_from_row).transpose()
    }

    async fn committed_count_since(
        &self,
        scope_key: &str,
        operation: Operation,
        since: DateTime<Utc>,
    ) -> DbResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM credit_ledger
            WHERE scope_key = ? AND operation = ? AND status = 'committed'
              AND created_at >= ?
            "#,
        )
        .bind(scope_key)
        .bind(operation.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    async fn committed_usd_micros_since(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> DbResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(usd_micros), 0) AS total FROM credit_ledger
            WHERE user_id = ? AND status = 'committed' AND created_at >= ?
            "#,
        )
        .bind(user_id.to_string())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("total"))
    }

    async fn stale_pending_request_ids(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT request_id FROM credit_ledger
            WHERE status = 'pending' AND created_at < ?
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("request_id")).collect())
    }
}
