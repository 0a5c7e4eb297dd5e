//! Request and response shapes for the HTTP surface.
//!
//! The frontend contract is camelCase JSON. Request fields are all
//! optional at the serde level so missing values surface as our own
//! error codes instead of generic deserialization failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    backend::{GroundingSource, HistoryTurn, TurnRole},
    models::ChatMode,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatRequestBody {
    pub mode: Option<String>,
    pub message: Option<String>,
    pub conversation_id: Option<String>,
    pub history: Option<Vec<serde_json::Value>>,
    pub deep_dive: Option<bool>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageRequestBody {
    pub prompt: Option<String>,
    pub conversation_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub quality: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioRequestBody {
    pub text: Option<String>,
    pub conversation_id: Option<String>,
    pub voice_name: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Keep the last well-formed turns of a client-supplied history. Items
/// with unknown roles or non-string content are dropped rather than
/// rejected.
pub fn normalize_history(raw: Option<&[serde_json::Value]>) -> Vec<HistoryTurn> {
    const WINDOW: usize = 8;

    let turns: Vec<HistoryTurn> = raw
        .unwrap_or(&[])
        .iter()
        .filter_map(|item| {
            let role = match item.get("role")?.as_str()? {
                "user" => TurnRole::User,
                "assistant" => TurnRole::Assistant,
                _ => return None,
            };
            let content = item.get("content")?.as_str()?.to_string();
            Some(HistoryTurn { role, content })
        })
        .collect();

    let skip = turns.len().saturating_sub(WINDOW);
    turns.into_iter().skip(skip).collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub grounded_queries: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub assistant_message: String,
    pub sources: Vec<GroundingSource>,
    pub usage: ChatUsage,
    pub credits_charged: i64,
    pub credits_remaining: i64,
    pub model_used: String,
    pub mode_used: ChatMode,
    pub downgraded_by_soft_cap: bool,
    pub is_demo: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub image_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    pub image_url_or_base64: String,
    pub usage: ImageUsage,
    pub credits_charged: i64,
    pub credits_remaining: i64,
    pub image_quota_remaining: Option<i64>,
    pub model_used: String,
    pub mode_used: ChatMode,
    pub is_demo: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioResponse {
    pub audio_base64: String,
    pub mime_type: String,
    pub usage: AudioUsage,
    pub credits_charged: i64,
    pub credits_remaining: i64,
    pub model_used: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub credits_remaining: i64,
    pub period_end: DateTime<Utc>,
    pub image_quota_remaining: i64,
    pub weekly_image_limit: i64,
    pub daily_message_limit: i64,
    pub soft_usd_cap: Option<f64>,
    pub budget_consumed_usd: Option<f64>,
    pub budget_period_days: Option<i64>,
    pub is_demo: bool,
}
