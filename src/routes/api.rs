//! Billed endpoint handlers.
//!
//! Handlers validate the payload, resolve the caller's identity, and
//! hand a clean command to the orchestrator. Validation happens before
//! identity resolution so malformed requests cost nothing.

use axum::{Json, extract::State};
use http::HeaderMap;
use serde_json::Value;

use crate::{
    AppState,
    api_types::{AudioRequestBody, ChatRequestBody, ImageRequestBody, normalize_history},
    error::ApiError,
    identity::resolve_identity,
    models::{ChatMode, ModelTier},
    orchestrator::{AudioCommand, ChatCommand, ImageCommand},
};

fn required_trimmed(value: Option<&str>, code: &'static str) -> Result<String, ApiError> {
    let trimmed = value.unwrap_or("").trim();
    if trimmed.is_empty() {
        Err(ApiError::Validation(code))
    } else {
        Ok(trimmed.to_string())
    }
}

pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatRequestBody>,
) -> Result<Json<Value>, ApiError> {
    let mode = body
        .mode
        .as_deref()
        .and_then(ChatMode::parse)
        .ok_or(ApiError::Validation("INVALID_MODE"))?;
    let message = required_trimmed(body.message.as_deref(), "EMPTY_MESSAGE")?;
    let idempotency_key =
        required_trimmed(body.idempotency_key.as_deref(), "MISSING_IDEMPOTENCY_KEY")?;
    let history = normalize_history(body.history.as_deref());

    let identity = resolve_identity(&headers, state.verifier.as_ref()).await;
    let response = state
        .orchestrator
        .chat(
            &identity,
            ChatCommand {
                mode,
                message,
                conversation_id: body.conversation_id,
                history,
                deep_dive: body.deep_dive.unwrap_or(false),
                idempotency_key,
            },
        )
        .await?;
    Ok(Json(response))
}

pub async fn image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ImageRequestBody>,
) -> Result<Json<Value>, ApiError> {
    let prompt = required_trimmed(body.prompt.as_deref(), "EMPTY_PROMPT")?;
    let idempotency_key =
        required_trimmed(body.idempotency_key.as_deref(), "MISSING_IDEMPOTENCY_KEY")?;
    // Unknown quality values fall back to standard rather than erroring.
    let quality = match body.quality.as_deref().and_then(ModelTier::parse) {
        Some(tier @ (ModelTier::Standard | ModelTier::HighQuality)) => tier,
        _ => ModelTier::Standard,
    };

    let identity = resolve_identity(&headers, state.verifier.as_ref()).await;
    let response = state
        .orchestrator
        .image(
            &identity,
            ImageCommand {
                prompt,
                conversation_id: body.conversation_id,
                quality,
                idempotency_key,
            },
        )
        .await?;
    Ok(Json(response))
}

pub async fn audio(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AudioRequestBody>,
) -> Result<Json<Value>, ApiError> {
    let text = required_trimmed(body.text.as_deref(), "EMPTY_TEXT")?;
    let idempotency_key =
        required_trimmed(body.idempotency_key.as_deref(), "MISSING_IDEMPOTENCY_KEY")?;

    let identity = resolve_identity(&headers, state.verifier.as_ref()).await;
    let response = state
        .orchestrator
        .audio(
            &identity,
            AudioCommand {
                text,
                conversation_id: body.conversation_id,
                voice_name: body.voice_name,
                idempotency_key,
            },
        )
        .await?;
    Ok(Json(response))
}

pub async fn balance(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let identity = resolve_identity(&headers, state.verifier.as_ref()).await;
    let response = state.orchestrator.balance(&identity).await?;
    Ok(Json(response))
}
