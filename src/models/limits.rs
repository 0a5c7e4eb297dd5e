/// Per-plan usage limits, read from the `usage_limits` table with code
/// fallbacks when the plan row is absent.
#[derive(Debug, Clone)]
pub struct UsageLimits {
    pub weekly_images: i64,
    pub daily_messages: i64,
    pub soft_usd_cap_micros: i64,
    pub period_days: i64,
}

/// Rolling-window spend for a user, derived from committed ledger
/// entries. Never stored.
#[derive(Debug, Clone)]
pub struct BudgetStatus {
    pub total_usd_micros: i64,
    pub soft_usd_cap_micros: i64,
    pub period_days: i64,
}

impl BudgetStatus {
    pub fn within_cap(&self) -> bool {
        self.total_usd_micros < self.soft_usd_cap_micros
    }
}
