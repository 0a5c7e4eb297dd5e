//! Quota windows and budget evaluation.
//!
//! Daily and weekly counters are derived by counting committed ledger
//! entries inside UTC windows; the budget is the rolling-window USD sum
//! of committed spend. Nothing here mutates state.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};
use uuid::Uuid;

use crate::{
    config::LimitsConfig,
    db::{CreditLedgerRepo, DbPool, DbResult, UsageLimitsRepo},
    models::{BudgetStatus, Operation, UsageLimits},
};

pub struct QuotaEvaluator {
    ledger: Arc<dyn CreditLedgerRepo>,
    limits_repo: Arc<dyn UsageLimitsRepo>,
    fallback: UsageLimits,
    plan_id: String,
}

impl QuotaEvaluator {
    pub fn new(db: &DbPool, limits: &LimitsConfig) -> Self {
        Self {
            ledger: db.ledger(),
            limits_repo: db.usage_limits(),
            fallback: limits.fallback_limits(),
            plan_id: limits.plan_id.clone(),
        }
    }

    /// Plan limits, falling back to configured defaults when the plan
    /// row is absent.
    pub async fn limits(&self) -> DbResult<UsageLimits> {
        Ok(self
            .limits_repo
            .get(&self.plan_id)
            .await?
            .unwrap_or_else(|| self.fallback.clone()))
    }

    /// Committed chat entries for a scope since the start of the
    /// current UTC day.
    pub async fn daily_chat_count(&self, scope_key: &str) -> DbResult<i64> {
        self.ledger
            .committed_count_since(scope_key, Operation::Chat, start_of_utc_day(Utc::now()))
            .await
    }

    /// Committed image entries for a scope since the most recent UTC
    /// Monday 00:00.
    pub async fn weekly_image_count(&self, scope_key: &str) -> DbResult<i64> {
        self.ledger
            .committed_count_since(scope_key, Operation::Image, start_of_utc_week(Utc::now()))
            .await
    }

    /// Rolling-window spend for a user against the plan's soft cap.
    pub async fn budget_status(
        &self,
        user_id: Uuid,
        limits: &UsageLimits,
    ) -> DbResult<BudgetStatus> {
        let since = Utc::now() - Duration::days(limits.period_days);
        let total_usd_micros = self
            .ledger
            .committed_usd_micros_since(user_id, since)
            .await?;
        Ok(BudgetStatus {
            total_usd_micros,
            soft_usd_cap_micros: limits.soft_usd_cap_micros,
            period_days: limits.period_days,
        })
    }
}

/// Start of the UTC day containing `now`.
pub fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
}

/// Most recent UTC Monday 00:00 at or before `now`.
pub fn start_of_utc_week(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_monday = now.weekday().num_days_from_monday() as i64;
    start_of_utc_day(now - Duration::days(days_from_monday))
}

/// End of the UTC week containing `now` (Sunday 23:59:59.999).
pub fn end_of_utc_week(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_until_sunday = 6 - now.weekday().num_days_from_monday() as i64;
    (now + Duration::days(days_until_sunday))
        .date_naive()
        .and_hms_milli_opt(23, 59, 59, 999)
        .expect("valid time of day")
        .and_utc()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn day_window_starts_at_utc_midnight() {
        let now = Utc.with_ymd_and_hms(2025, 6, 4, 15, 30, 45).unwrap();
        assert_eq!(
            start_of_utc_day(now),
            Utc.with_ymd_and_hms(2025, 6, 4, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn week_window_starts_on_monday() {
        // 2025-06-04 is a Wednesday.
        let wednesday = Utc.with_ymd_and_hms(2025, 6, 4, 15, 30, 45).unwrap();
        assert_eq!(
            start_of_utc_week(wednesday),
            Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap()
        );

        // A Monday is its own week start.
        let monday = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 1).unwrap();
        assert_eq!(
            start_of_utc_week(monday),
            Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap()
        );

        // A Sunday belongs to the week that started six days earlier.
        let sunday = Utc.with_ymd_and_hms(2025, 6, 8, 12, 0, 0).unwrap();
        assert_eq!(
            start_of_utc_week(sunday),
            Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn week_ends_on_sunday_night() {
        let wednesday = Utc.with_ymd_and_hms(2025, 6, 4, 15, 30, 45).unwrap();
        let end = end_of_utc_week(wednesday);
        assert_eq!(end.date_naive().to_string(), "2025-06-08");
        assert_eq!(end.time().to_string(), "23:59:59.999");
    }

    #[test]
    fn budget_cap_is_exclusive_below() {
        let status = BudgetStatus {
            total_usd_micros: 2_499_999,
            soft_usd_cap_micros: 2_500_000,
            period_days: 84,
        };
        assert!(status.within_cap());
        let status = BudgetStatus {
            total_usd_micros: 2_500_000,
            ..status
        };
        assert!(!status.within_cap());
    }
}
