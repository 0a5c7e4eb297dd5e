//! Background jobs.
//!
//! The reservation sweeper resolves the failure mode where a crashed or
//! hung request leaves a ledger entry `pending` forever: entries older
//! than the TTL are rolled back through the ordinary rollback
//! primitive, so the refund and terminal-status rules hold.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::watch;

use crate::{
    config::JobsConfig,
    db::{DbPool, DbResult},
};

pub const EXPIRY_REASON: &str = "RESERVATION_EXPIRED";

/// Roll back pending reservations older than the configured TTL.
/// Returns the number of entries swept.
pub async fn sweep_stale_reservations(db: &DbPool, config: &JobsConfig) -> DbResult<usize> {
    let cutoff = Utc::now() - chrono::Duration::seconds(config.reservation_ttl_secs as i64);
    let stale = db
        .ledger()
        .stale_pending_request_ids(cutoff, config.sweep_batch)
        .await?;

    let mut swept = 0;
    for request_id in stale {
        match db.ledger().rollback(&request_id, EXPIRY_REASON).await {
            Ok(()) => swept += 1,
            Err(e) => {
                tracing::error!(
                    request_id = %request_id,
                    error = %e,
                    "failed to roll back stale reservation"
                );
            }
        }
    }

    if swept > 0 {
        tracing::info!(swept, "rolled back stale pending reservations");
    }
    Ok(swept)
}

/// Run the sweeper on an interval until the shutdown signal flips.
pub fn spawn_reservation_sweeper(
    db: Arc<DbPool>,
    config: JobsConfig,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = sweep_stale_reservations(&db, &config).await {
                        tracing::error!(error = %e, "reservation sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::debug!("reservation sweeper shutting down");
                    break;
                }
            }
        }
    })
}
