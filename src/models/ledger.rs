use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Billed operation kind. Audio narration is billed as `chat` on the
/// TTS model, so it does not get its own variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Chat,
    Image,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat" => Some(Self::Chat),
            "image" => Some(Self::Image),
            _ => None,
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversational persona selected by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    Mentor,
    Researcher,
    Coach,
    Visionary,
}

impl ChatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mentor => "mentor",
            Self::Researcher => "researcher",
            Self::Coach => "coach",
            Self::Visionary => "visionary",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mentor" => Some(Self::Mentor),
            "researcher" => Some(Self::Researcher),
            "coach" => Some(Self::Coach),
            "visionary" => Some(Self::Visionary),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price/model tier. `stable`/`deep_dive` apply to chat,
/// `standard`/`high_quality` to images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Stable,
    DeepDive,
    Standard,
    HighQuality,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::DeepDive => "deep_dive",
            Self::Standard => "standard",
            Self::HighQuality => "high_quality",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stable" => Some(Self::Stable),
            "deep_dive" => Some(Self::DeepDive),
            "standard" => Some(Self::Standard),
            "high_quality" => Some(Self::HighQuality),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a ledger entry. A `request_id` reaches at most one
/// terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Pending,
    Committed,
    RolledBack,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "committed" => Some(Self::Committed),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One billed attempt and its outcome. Append-only: rows are settled in
/// place but never deleted.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub request_id: String,
    pub scope_key: String,
    pub user_id: Option<Uuid>,
    pub demo_session_id: Option<Uuid>,
    pub operation: Operation,
    pub mode: ChatMode,
    pub model: String,
    pub model_tier: ModelTier,
    pub credits_reserved: i64,
    pub status: LedgerStatus,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub grounded_queries: i64,
    pub image_count: i64,
    pub usd_micros: i64,
    pub rollback_reason: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Input to `reserve`: everything recorded on the pending ledger row.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub request_id: String,
    pub scope_key: String,
    pub operation: Operation,
    pub mode: ChatMode,
    pub model: String,
    pub model_tier: ModelTier,
    pub credits: i64,
    pub metadata: serde_json::Value,
}

/// Observed usage attached to an entry at commit time.
#[derive(Debug, Clone, Default)]
pub struct CommitUsage {
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub grounded_queries: i64,
    pub image_count: i64,
    pub usd_micros: i64,
    pub metadata: serde_json::Value,
}

/// Why a reservation was denied. Exhaustion is an expected outcome, not
/// a storage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveDenial {
    InsufficientCredits,
    InsufficientImageQuota,
}

impl ReserveDenial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientCredits => "INSUFFICIENT_CREDITS",
            Self::InsufficientImageQuota => "INSUFFICIENT_IMAGE_QUOTA",
        }
    }
}

/// Result of a reserve call. `images_remaining` and `demo_session_id`
/// are populated for demo scope only.
#[derive(Debug, Clone)]
pub struct ReserveOutcome {
    pub denial: Option<ReserveDenial>,
    pub credits_remaining: i64,
    pub images_remaining: Option<i64>,
    pub demo_session_id: Option<Uuid>,
}

impl ReserveOutcome {
    pub fn is_success(&self) -> bool {
        self.denial.is_none()
    }
}
