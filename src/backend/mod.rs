//! Generation backend seam.
//!
//! The orchestrator only sees the [`GenerationBackend`] trait; the
//! Gemini implementation lives in [`gemini`]. All failures look the
//! same to the caller: the reservation is rolled back and the error is
//! surfaced.

mod gemini;

use async_trait::async_trait;
pub use gemini::GeminiClient;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::BackendConfig,
    models::{ChatMode, ModelTier},
};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("backend call exceeded {timeout_secs}s timeout")]
    Timeout { timeout_secs: u64 },

    #[error("backend response missing {0}")]
    MissingData(&'static str),
}

/// One prior conversation turn, already normalized by the API layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: TurnRole,
    pub content: String,
}

/// Token accounting reported by the backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub total_tokens: i64,
}

/// Web source cited by a grounded response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone)]
pub struct TextRequest {
    pub model: String,
    pub system_instruction: String,
    pub history: Vec<HistoryTurn>,
    pub message: String,
    pub use_search: bool,
}

#[derive(Debug, Clone)]
pub struct TextResult {
    pub text: String,
    pub sources: Vec<GroundingSource>,
    pub grounded_queries: i64,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct ImageResult {
    /// `data:<mime>;base64,<payload>` ready for the frontend.
    pub image_data_url: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone)]
pub struct AudioRequest {
    pub model: String,
    pub text: String,
    pub voice: String,
}

#[derive(Debug, Clone)]
pub struct AudioResult {
    pub audio_base64: String,
    pub mime_type: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate_text(&self, request: TextRequest) -> Result<TextResult, BackendError>;
    async fn generate_image(&self, request: ImageRequest) -> Result<ImageResult, BackendError>;
    async fn generate_audio(&self, request: AudioRequest) -> Result<AudioResult, BackendError>;
}

/// Text model for a chat mode/tier combination.
pub fn text_model(mode: ChatMode, tier: ModelTier, config: &BackendConfig) -> String {
    if mode == ChatMode::Researcher && tier == ModelTier::DeepDive {
        config.deep_dive_text_model.clone()
    } else {
        config.default_text_model.clone()
    }
}

/// Image model for a quality tier.
pub fn image_model(tier: ModelTier, config: &BackendConfig) -> String {
    if tier == ModelTier::HighQuality {
        config.image_high_quality_model.clone()
    } else {
        config.image_standard_model.clone()
    }
}

/// System instruction for a chat mode: a shared tutor preamble plus a
/// persona block per mode.
pub fn system_instruction(mode: ChatMode) -> String {
    let persona = match mode {
        ChatMode::Mentor => {
            "Act as a friendly, patient teacher. Use plain explanations, clear \
             analogies and practical steps. Avoid unexplained jargon."
        }
        ChatMode::Researcher => {
            "Act as a scientific researcher. Be precise, name the underlying \
             mechanism and cite evidence when it is available."
        }
        ChatMode::Coach => {
            "Act as a high-performance coach. Be direct, actionable and focused \
             on weekly behavior and adherence."
        }
        ChatMode::Visionary => {
            "Act as a visual and creative engine. Describe concepts in visual \
             language and prepare clear prompts for illustration."
        }
    };

    [
        "You are the conversational tutor of a premium companion app.",
        &format!("Active mode: {}.", mode.as_str().to_uppercase()),
        persona,
        "Answer with a brief, actionable structure.",
        "Do not invent data or make absolute promises.",
    ]
    .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;

    #[test]
    fn deep_dive_researcher_gets_the_pro_model() {
        let config = BackendConfig::default();
        assert_eq!(
            text_model(ChatMode::Researcher, ModelTier::DeepDive, &config),
            config.deep_dive_text_model
        );
        // Deep-dive tier without researcher mode stays on the default.
        assert_eq!(
            text_model(ChatMode::Mentor, ModelTier::DeepDive, &config),
            config.default_text_model
        );
        assert_eq!(
            text_model(ChatMode::Researcher, ModelTier::Stable, &config),
            config.default_text_model
        );
    }

    #[test]
    fn instructions_vary_by_mode() {
        let mentor = system_instruction(ChatMode::Mentor);
        let coach = system_instruction(ChatMode::Coach);
        assert_ne!(mentor, coach);
        assert!(mentor.contains("MENTOR"));
    }
}
