use serde::{Deserialize, Serialize};

use crate::models::UsageLimits;

/// Default limits and wallet/demo provisioning.
///
/// Per-plan limits live in the `usage_limits` table; the fallback
/// values here apply when a plan row is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Plan applied to requests. Plans beyond the default are
    /// provisioned directly in the `usage_limits` table.
    #[serde(default = "default_plan_id")]
    pub plan_id: String,

    /// Balance granted to a wallet auto-created on first reservation.
    /// Zero means fresh wallets cannot reserve until funded externally.
    #[serde(default)]
    pub starting_balance: i64,

    /// Fallback weekly image cap.
    #[serde(default = "default_weekly_images")]
    pub weekly_images: i64,

    /// Fallback daily message cap.
    #[serde(default = "default_daily_messages")]
    pub daily_messages: i64,

    /// Fallback soft USD cap for the rolling budget window.
    #[serde(default = "default_soft_usd_cap")]
    pub soft_usd_cap: f64,

    /// Fallback budget window length in days.
    #[serde(default = "default_period_days")]
    pub period_days: i64,

    /// Demo session provisioning.
    #[serde(default)]
    pub demo: DemoLimits,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            plan_id: default_plan_id(),
            starting_balance: 0,
            weekly_images: default_weekly_images(),
            daily_messages: default_daily_messages(),
            soft_usd_cap: default_soft_usd_cap(),
            period_days: default_period_days(),
            demo: DemoLimits::default(),
        }
    }
}

impl LimitsConfig {
    /// Limits used when the plan row is missing from storage.
    pub fn fallback_limits(&self) -> UsageLimits {
        UsageLimits {
            weekly_images: self.weekly_images,
            daily_messages: self.daily_messages,
            soft_usd_cap_micros: crate::pricing::usd_to_micros(self.soft_usd_cap),
            period_days: self.period_days,
        }
    }
}

/// Defaults granted to a demo session on creation or expiry reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemoLimits {
    #[serde(default = "default_demo_credits")]
    pub credits: i64,

    #[serde(default = "default_demo_images")]
    pub images: i64,

    #[serde(default = "default_demo_ttl_days")]
    pub ttl_days: i64,
}

impl Default for DemoLimits {
    fn default() -> Self {
        Self {
            credits: default_demo_credits(),
            images: default_demo_images(),
            ttl_days: default_demo_ttl_days(),
        }
    }
}

fn default_plan_id() -> String {
    "default".to_string()
}

fn default_weekly_images() -> i64 {
    2
}

fn default_daily_messages() -> i64 {
    60
}

fn default_soft_usd_cap() -> f64 {
    2.5
}

fn default_period_days() -> i64 {
    84
}

fn default_demo_credits() -> i64 {
    15
}

fn default_demo_images() -> i64 {
    1
}

fn default_demo_ttl_days() -> i64 {
    14
}
