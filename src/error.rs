//! The error taxonomy exposed over HTTP.
//!
//! Every variant maps to a machine-readable `error` code. Quota and
//! validation errors are rejected before any reservation; upstream
//! failures are only surfaced after the ledger was rolled back.

use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde_json::json;

use crate::{db::DbError, models::ReserveDenial};

/// Billed endpoint. Also the first component of every `request_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Chat,
    Image,
    Audio,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "ai-chat",
            Self::Image => "ai-image",
            Self::Audio => "ai-audio",
        }
    }

    pub fn failure_code(&self) -> &'static str {
        match self {
            Self::Chat => "AI_CHAT_FAILED",
            Self::Image => "AI_IMAGE_FAILED",
            Self::Audio => "AI_AUDIO_FAILED",
        }
    }

    /// Reason tag recorded on the ledger entry when the generation
    /// call fails after a successful reservation.
    pub fn rollback_reason(&self) -> &'static str {
        match self {
            Self::Chat => "CHAT_GENERATION_ERROR",
            Self::Image => "IMAGE_GENERATION_ERROR",
            Self::Audio => "AUDIO_GENERATION_ERROR",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request rejected before identity resolution; the payload names
    /// the offending field (`EMPTY_MESSAGE`, `MISSING_IDEMPOTENCY_KEY`, ...).
    #[error("invalid request: {0}")]
    Validation(&'static str),

    #[error("daily message limit reached")]
    DailyMessageLimit {
        credits_remaining: Option<i64>,
        image_quota_remaining: Option<i64>,
        is_demo: bool,
    },

    #[error("weekly image limit reached")]
    WeeklyImageLimit { weekly_image_limit: i64 },

    /// Soft budget cap on the image path: there is no cheaper tier to
    /// downgrade to, so the request is denied outright.
    #[error("soft budget cap reached, image generation blocked")]
    SoftCapImageBlocked,

    #[error("credit reservation denied")]
    CreditsDenied {
        denial: ReserveDenial,
        credits_remaining: i64,
        image_quota_remaining: Option<i64>,
        is_demo: bool,
    },

    /// Generation backend failure, reported only after rollback.
    #[error("generation failed on {endpoint}: {message}")]
    Upstream { endpoint: Endpoint, message: String },

    #[error(transparent)]
    Storage(#[from] DbError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Validation(code) => (StatusCode::BAD_REQUEST, json!({ "error": code })),

            ApiError::DailyMessageLimit {
                credits_remaining,
                image_quota_remaining,
                is_demo,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "error": "DAILY_MESSAGE_LIMIT_REACHED",
                    "creditsRemaining": credits_remaining,
                    "imageQuotaRemaining": image_quota_remaining,
                    "isDemo": is_demo,
                }),
            ),

            ApiError::WeeklyImageLimit { weekly_image_limit } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "error": "WEEKLY_IMAGE_LIMIT_REACHED",
                    "weeklyImageLimit": weekly_image_limit,
                    "imageQuotaRemaining": 0,
                }),
            ),

            ApiError::SoftCapImageBlocked => (
                StatusCode::FORBIDDEN,
                json!({
                    "error": "SOFT_CAP_REACHED_IMAGE_BLOCKED",
                    "creditsRemaining": serde_json::Value::Null,
                }),
            ),

            ApiError::CreditsDenied {
                denial,
                credits_remaining,
                image_quota_remaining,
                is_demo,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                json!({
                    "error": denial.as_str(),
                    "creditsRemaining": credits_remaining,
                    "imageQuotaRemaining": image_quota_remaining,
                    "isDemo": is_demo,
                }),
            ),

            ApiError::Upstream { endpoint, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": endpoint.failure_code(),
                    "message": message,
                }),
            ),

            ApiError::Storage(err) => {
                tracing::error!(error = %err, "storage failure while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "STORAGE_FAILURE" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
