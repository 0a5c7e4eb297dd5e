use serde::{Deserialize, Serialize};

/// Generation backend (Gemini) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// API base URL. Overridable for tests and proxies.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key. Usually supplied as `api_key = "${GEMINI_API_KEY}"`.
    #[serde(default)]
    pub api_key: String,

    /// Upper bound on a single generation call. The request is rolled
    /// back once this elapses; a hung upstream must never pin a
    /// reservation.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Text model for all stable-tier chat modes.
    #[serde(default = "default_text_model")]
    pub default_text_model: String,

    /// Text model for researcher deep-dive requests.
    #[serde(default = "default_deep_dive_model")]
    pub deep_dive_text_model: String,

    /// Image model for the standard tier.
    #[serde(default = "default_image_standard_model")]
    pub image_standard_model: String,

    /// Image model for the high-quality tier.
    #[serde(default = "default_image_high_quality_model")]
    pub image_high_quality_model: String,

    /// Text-to-speech model.
    #[serde(default = "default_tts_model")]
    pub tts_model: String,

    /// Voice used when the client does not pick one.
    #[serde(default = "default_voice")]
    pub default_voice: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            default_text_model: default_text_model(),
            deep_dive_text_model: default_deep_dive_model(),
            image_standard_model: default_image_standard_model(),
            image_high_quality_model: default_image_high_quality_model(),
            tts_model: default_tts_model(),
            default_voice: default_voice(),
        }
    }
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_text_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_deep_dive_model() -> String {
    "gemini-2.5-pro".to_string()
}

fn default_image_standard_model() -> String {
    "gemini-2.0-flash-preview-image-generation".to_string()
}

fn default_image_high_quality_model() -> String {
    // Same model as standard by default; the tier still prices higher.
    "gemini-2.0-flash-preview-image-generation".to_string()
}

fn default_tts_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}

fn default_voice() -> String {
    "Kore".to_string()
}
