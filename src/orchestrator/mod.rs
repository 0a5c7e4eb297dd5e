//! Request orchestration.
//!
//! Each billed endpoint walks the same sequence: replay check, limit
//! check, price and reserve, execute against the generation backend,
//! then settle (commit + cache) or roll back. The orchestrator holds no
//! cross-request state; everything durable lives in the store.
//!
//! Once a reservation exists, the execute/settle section runs on a
//! detached task: a client that disconnects mid-generation cannot abort
//! settlement, so the ledger always reaches a terminal status.


use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};

use crate::{
    api_types::{
        AudioResponse, AudioUsage, BalanceResponse, ChatResponse, ChatUsage, ImageResponse,
        ImageUsage,
    },
    backend::{
        self, AudioRequest, BackendError, GenerationBackend, HistoryTurn, ImageRequest,
        TextRequest,
    },
    config::GateConfig,
    db::{DbError, DbPool},
    error::{ApiError, Endpoint},
    models::{
        ChatMode, CommitUsage, ModelTier, NewReservation, Operation, RequestIdentity,
        ReserveOutcome,
    },
    pricing::{micros_to_usd, usd_to_micros},
    quota::{QuotaEvaluator, end_of_utc_week},
};

/// Returned when the model produced an empty reply after a committed
/// charge; the charge stands, the client gets a usable message.
const EMPTY_REPLY_FALLBACK: &str = "Sorry, I could not produce a useful reply this time.";

#[derive(Debug, Clone)]
pub struct ChatCommand {
    pub mode: ChatMode,
    pub message: String,
    pub conversation_id: Option<String>,
    pub history: Vec<HistoryTurn>,
    pub deep_dive: bool,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct ImageCommand {
    pub prompt: String,
    pub conversation_id: Option<String>,
    pub quality: ModelTier,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct AudioCommand {
    pub text: String,
    pub conversation_id: Option<String>,
    pub voice_name: Option<String>,
    pub idempotency_key: String,
}

pub struct Orchestrator {
    db: Arc<DbPool>,
    backend: Arc<dyn GenerationBackend>,
    quota: QuotaEvaluator,
    config: Arc<GateConfig>,
}

impl Orchestrator {
    pub fn new(
        db: Arc<DbPool>,
        generation: Arc<dyn GenerationBackend>,
        config: Arc<GateConfig>,
    ) -> Self {
        let quota = QuotaEvaluator::new(&db, &config.limits);
        Self {
            db,
            backend: generation,
            quota,
            config,
        }
    }

    pub async fn chat(
        &self,
        identity: &RequestIdentity,
        cmd: ChatCommand,
    ) -> Result<Value, ApiError> {
        let endpoint = Endpoint::Chat;

        if let Some(replay) = self
            .replay(endpoint, identity, &cmd.idempotency_key)
            .await?
        {
            return Ok(replay);
        }

        let limits = self.quota.limits().await?;

        let mut effective_mode = cmd.mode;
        let mut tier = if cmd.mode == ChatMode::Researcher && cmd.deep_dive {
            ModelTier::DeepDive
        } else {
            ModelTier::Stable
        };
        let mut downgraded = false;

        if let Some(user_id) = identity.user_id() {
            // Over the soft cap, chat continues on the cheapest
            // mode/tier instead of being denied.
            let budget = self.quota.budget_status(user_id, &limits).await?;
            if !budget.within_cap() {
                effective_mode = ChatMode::Mentor;
                tier = ModelTier::Stable;
                downgraded = true;
            }

            let daily = self.quota.daily_chat_count(&identity.scope_key).await?;
            if daily >= limits.daily_messages {
                return Err(ApiError::DailyMessageLimit {
                    credits_remaining: None,
                    image_quota_remaining: None,
                    is_demo: false,
                });
            }
        } else {
            let session = self
                .db
                .demo_sessions()
                .get_or_create(&identity.device_fingerprint)
                .await?;
            let daily = self.quota.daily_chat_count(&identity.scope_key).await?;
            if daily >= limits.daily_messages {
                return Err(ApiError::DailyMessageLimit {
                    credits_remaining: Some(session.credits_remaining),
                    image_quota_remaining: Some(session.images_remaining),
                    is_demo: true,
                });
            }
        }

        let model = backend::text_model(effective_mode, tier, &self.config.backend);
        let credits = self.config.pricing.price_credits(
            Operation::Chat,
            effective_mode,
            tier,
            &self.config.limits.plan_id,
        );
        let request_id =
            build_request_id(endpoint.as_str(), &identity.scope_key, &cmd.idempotency_key);

        let reservation = NewReservation {
            request_id: request_id.clone(),
            scope_key: identity.scope_key.clone(),
            operation: Operation::Chat,
            mode: effective_mode,
            model: model.clone(),
            model_tier: tier,
            credits,
            metadata: json!({
                "conversationId": cmd.conversation_id,
                "originalMode": cmd.mode.as_str(),
                "effectiveMode": effective_mode.as_str(),
                "downgradedBySoftCap": downgraded,
            }),
        };

        let outcome = self.reserve(identity, false, reservation).await?;
        tracing::debug!(
            scope = %identity.scope_key,
            request_id = %request_id,
            mode = %effective_mode,
            model = %model,
            credits,
            "chat reservation placed"
        );

        let db = self.db.clone();
        let generation = self.backend.clone();
        let config = self.config.clone();
        let identity = identity.clone();
        settle_detached(async move {
            let result = generation
                .generate_text(TextRequest {
                    model: model.clone(),
                    system_instruction: backend::system_instruction(effective_mode),
                    history: cmd.history,
                    message: cmd.message,
                    use_search: effective_mode == ChatMode::Researcher,
                })
                .await;

            let text = match result {
                Ok(text) => text,
                Err(err) => return Err(fail_and_rollback(&db, endpoint, &request_id, err).await),
            };

            let usd = config
                .pricing
                .estimate_text_usd(&model, text.usage.tokens_in, text.usage.tokens_out);
            db.ledger()
                .commit(
                    &request_id,
                    CommitUsage {
                        tokens_in: text.usage.tokens_in,
                        tokens_out: text.usage.tokens_out,
                        grounded_queries: text.grounded_queries,
                        image_count: 0,
                        usd_micros: usd_to_micros(usd),
                        metadata: json!({
                            "demoSessionId": outcome.demo_session_id,
                        }),
                    },
                )
                .await?;

            let response = ChatResponse {
                assistant_message: if text.text.is_empty() {
                    EMPTY_REPLY_FALLBACK.to_string()
                } else {
                    text.text
                },
                sources: text.sources,
                usage: ChatUsage {
                    input_tokens: text.usage.tokens_in,
                    output_tokens: text.usage.tokens_out,
                    total_tokens: text.usage.total_tokens,
                    grounded_queries: text.grounded_queries,
                },
                credits_charged: credits,
                credits_remaining: outcome.credits_remaining,
                model_used: model,
                mode_used: effective_mode,
                downgraded_by_soft_cap: downgraded,
                is_demo: identity.is_demo(),
            };

            respond(&db, endpoint, &identity, &cmd.idempotency_key, response).await
        })
        .await
    }

    pub async fn image(
        &self,
        identity: &RequestIdentity,
        cmd: ImageCommand,
    ) -> Result<Value, ApiError> {
        let endpoint = Endpoint::Image;

        if let Some(replay) = self
            .replay(endpoint, identity, &cmd.idempotency_key)
            .await?
        {
            return Ok(replay);
        }

        let limits = self.quota.limits().await?;
        let tier = cmd.quality;
        let model = backend::image_model(tier, &self.config.backend);
        let credits = self.config.pricing.price_credits(
            Operation::Image,
            ChatMode::Visionary,
            tier,
            &self.config.limits.plan_id,
        );

        if let Some(user_id) = identity.user_id() {
            // No cheaper image tier exists, so the soft cap hard-blocks
            // here instead of downgrading.
            let budget = self.quota.budget_status(user_id, &limits).await?;
            if !budget.within_cap() {
                return Err(ApiError::SoftCapImageBlocked);
            }

            let weekly = self.quota.weekly_image_count(&identity.scope_key).await?;
            if weekly >= limits.weekly_images {
                return Err(ApiError::WeeklyImageLimit {
                    weekly_image_limit: limits.weekly_images,
                });
            }
        }

        let request_id =
            build_request_id(endpoint.as_str(), &identity.scope_key, &cmd.idempotency_key);

        let reservation = NewReservation {
            request_id: request_id.clone(),
            scope_key: identity.scope_key.clone(),
            operation: Operation::Image,
            mode: ChatMode::Visionary,
            model: model.clone(),
            model_tier: tier,
            credits,
            metadata: json!({
                "conversationId": cmd.conversation_id,
                "quality": tier.as_str(),
            }),
        };

        let outcome = self.reserve(identity, true, reservation).await?;
        tracing::debug!(
            scope = %identity.scope_key,
            request_id = %request_id,
            model = %model,
            credits,
            "image reservation placed"
        );

        let db = self.db.clone();
        let generation = self.backend.clone();
        let config = self.config.clone();
        let identity = identity.clone();
        settle_detached(async move {
            let result = generation
                .generate_image(ImageRequest {
                    model: model.clone(),
                    prompt: cmd.prompt,
                })
                .await;

            let image = match result {
                Ok(image) => image,
                Err(err) => return Err(fail_and_rollback(&db, endpoint, &request_id, err).await),
            };

            let usd = config.pricing.estimate_image_usd(&model, tier);
            db.ledger()
                .commit(
                    &request_id,
                    CommitUsage {
                        tokens_in: image.usage.tokens_in,
                        tokens_out: image.usage.tokens_out,
                        grounded_queries: 0,
                        image_count: 1,
                        usd_micros: usd_to_micros(usd),
                        metadata: json!({ "quality": tier.as_str() }),
                    },
                )
                .await?;

            let response = ImageResponse {
                image_url_or_base64: image.image_data_url,
                usage: ImageUsage {
                    input_tokens: image.usage.tokens_in,
                    output_tokens: image.usage.tokens_out,
                    total_tokens: image.usage.total_tokens,
                    image_count: 1,
                },
                // Demo image spend is quota, not credits.
                credits_charged: if identity.is_demo() { 0 } else { credits },
                credits_remaining: outcome.credits_remaining,
                image_quota_remaining: outcome.images_remaining,
                model_used: model,
                mode_used: ChatMode::Visionary,
                is_demo: identity.is_demo(),
            };

            respond(&db, endpoint, &identity, &cmd.idempotency_key, response).await
        })
        .await
    }

    pub async fn audio(
        &self,
        identity: &RequestIdentity,
        cmd: AudioCommand,
    ) -> Result<Value, ApiError> {
        let endpoint = Endpoint::Audio;

        if let Some(replay) = self
            .replay(endpoint, identity, &cmd.idempotency_key)
            .await?
        {
            return Ok(replay);
        }

        // Narration is billed as a stable-tier chat operation on the
        // TTS model.
        let model = self.config.backend.tts_model.clone();
        let credits = self.config.pricing.price_credits(
            Operation::Chat,
            ChatMode::Mentor,
            ModelTier::Stable,
            &self.config.limits.plan_id,
        );
        let request_id =
            build_request_id(endpoint.as_str(), &identity.scope_key, &cmd.idempotency_key);

        let reservation = NewReservation {
            request_id: request_id.clone(),
            scope_key: identity.scope_key.clone(),
            operation: Operation::Chat,
            mode: ChatMode::Mentor,
            model: model.clone(),
            model_tier: ModelTier::Stable,
            credits,
            metadata: json!({
                "conversationId": cmd.conversation_id,
                "type": "audio",
            }),
        };

        let outcome = self.reserve(identity, false, reservation).await?;

        let voice = cmd
            .voice_name
            .unwrap_or_else(|| self.config.backend.default_voice.clone());
        let db = self.db.clone();
        let generation = self.backend.clone();
        let config = self.config.clone();
        let identity = identity.clone();
        settle_detached(async move {
            let result = generation
                .generate_audio(AudioRequest {
                    model: model.clone(),
                    text: cmd.text,
                    voice: voice.clone(),
                })
                .await;

            let audio = match result {
                Ok(audio) => audio,
                Err(err) => return Err(fail_and_rollback(&db, endpoint, &request_id, err).await),
            };

            let usd = config
                .pricing
                .estimate_text_usd(&model, audio.usage.tokens_in, audio.usage.tokens_out);
            db.ledger()
                .commit(
                    &request_id,
                    CommitUsage {
                        tokens_in: audio.usage.tokens_in,
                        tokens_out: audio.usage.tokens_out,
                        grounded_queries: 0,
                        image_count: 0,
                        usd_micros: usd_to_micros(usd),
                        metadata: json!({ "type": "audio", "voiceName": voice }),
                    },
                )
                .await?;

            let response = AudioResponse {
                audio_base64: audio.audio_base64,
                mime_type: audio.mime_type,
                usage: AudioUsage {
                    input_tokens: audio.usage.tokens_in,
                    output_tokens: audio.usage.tokens_out,
                    total_tokens: audio.usage.total_tokens,
                },
                credits_charged: credits,
                credits_remaining: outcome.credits_remaining,
                model_used: model,
            };

            respond(&db, endpoint, &identity, &cmd.idempotency_key, response).await
        })
        .await
    }

    pub async fn balance(&self, identity: &RequestIdentity) -> Result<Value, ApiError> {
        let limits = self.quota.limits().await?;

        let response = if let Some(user_id) = identity.user_id() {
            let balance = self.db.wallets().balance(user_id).await?;
            let budget = self.quota.budget_status(user_id, &limits).await?;
            let weekly = self.quota.weekly_image_count(&identity.scope_key).await?;

            BalanceResponse {
                credits_remaining: balance,
                period_end: end_of_utc_week(Utc::now()),
                image_quota_remaining: (limits.weekly_images - weekly).max(0),
                weekly_image_limit: limits.weekly_images,
                daily_message_limit: limits.daily_messages,
                soft_usd_cap: Some(micros_to_usd(limits.soft_usd_cap_micros)),
                budget_consumed_usd: Some(micros_to_usd(budget.total_usd_micros)),
                budget_period_days: Some(budget.period_days),
                is_demo: false,
            }
        } else {
            let session = self
                .db
                .demo_sessions()
                .get_or_create(&identity.device_fingerprint)
                .await?;

            BalanceResponse {
                credits_remaining: session.credits_remaining,
                period_end: session.expires_at,
                image_quota_remaining: session.images_remaining,
                weekly_image_limit: self.config.limits.demo.images,
                daily_message_limit: limits.daily_messages,
                soft_usd_cap: None,
                budget_consumed_usd: None,
                budget_period_days: None,
                is_demo: true,
            }
        };

        to_value(response)
    }

    /// Short-circuit on a cached response for this composite key.
    async fn replay(
        &self,
        endpoint: Endpoint,
        identity: &RequestIdentity,
        idempotency_key: &str,
    ) -> Result<Option<Value>, ApiError> {
        let cached = self
            .db
            .idempotency()
            .get(endpoint.as_str(), &identity.scope_key, idempotency_key)
            .await?;

        Ok(cached.map(|mut value| {
            if let Some(map) = value.as_object_mut() {
                map.insert("idempotentReplay".to_string(), Value::Bool(true));
            }
            tracing::debug!(
                endpoint = %endpoint,
                scope = %identity.scope_key,
                "idempotent replay"
            );
            value
        }))
    }

    async fn reserve(
        &self,
        identity: &RequestIdentity,
        is_image: bool,
        reservation: NewReservation,
    ) -> Result<ReserveOutcome, ApiError> {
        let outcome = match identity.user_id() {
            Some(user_id) => self.db.ledger().reserve_user(user_id, reservation).await?,
            None => {
                self.db
                    .ledger()
                    .reserve_demo(&identity.device_fingerprint, is_image, reservation)
                    .await?
            }
        };

        match outcome.denial {
            Some(denial) => Err(ApiError::CreditsDenied {
                denial,
                credits_remaining: outcome.credits_remaining,
                image_quota_remaining: outcome.images_remaining,
                is_demo: identity.is_demo(),
            }),
            None => Ok(outcome),
        }
    }
}

/// Run the execute/settle section on its own task. The handler future
/// may be dropped when the client disconnects; the spawned task keeps
/// running so the reservation still reaches commit or rollback.
async fn settle_detached<F>(fut: F) -> Result<Value, ApiError>
where
    F: std::future::Future<Output = Result<Value, ApiError>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(join_err) => Err(ApiError::Storage(DbError::Internal(format!(
            "settlement task failed: {join_err}"
        )))),
    }
}

/// Roll back after a failed generation call. A rollback failure is a
/// storage failure and takes precedence over the upstream error: the
/// reservation is still pending and the sweeper will refund it.
async fn fail_and_rollback(
    db: &DbPool,
    endpoint: Endpoint,
    request_id: &str,
    err: BackendError,
) -> ApiError {
    tracing::warn!(
        endpoint = %endpoint,
        request_id = %request_id,
        error = %err,
        "generation failed, rolling back reservation"
    );
    if let Err(db_err) = db
        .ledger()
        .rollback(request_id, endpoint.rollback_reason())
        .await
    {
        tracing::error!(
            request_id = %request_id,
            error = %db_err,
            "rollback failed after generation error"
        );
        return ApiError::Storage(db_err);
    }
    ApiError::Upstream {
        endpoint,
        message: err.to_string(),
    }
}

/// Cache the response, then hand it back. Runs strictly after a
/// successful commit so rolled-back attempts never become replays.
async fn respond<T: serde::Serialize>(
    db: &DbPool,
    endpoint: Endpoint,
    identity: &RequestIdentity,
    idempotency_key: &str,
    response: T,
) -> Result<Value, ApiError> {
    let value = to_value(response)?;
    db.idempotency()
        .save(endpoint.as_str(), &identity.scope_key, idempotency_key, &value)
        .await?;
    Ok(value)
}

fn to_value<T: serde::Serialize>(response: T) -> Result<Value, ApiError> {
    serde_json::to_value(response).map_err(|e| ApiError::Storage(DbError::Json(e)))
}

/// Durable identifier for one billed attempt:
/// `endpoint:scope_key:idempotency_key`, each component stripped to a
/// safe alphabet so the id survives logs and storage keys unmangled.
pub fn build_request_id(endpoint: &str, scope_key: &str, idempotency_key: &str) -> String {
    let endpoint: String = endpoint.chars().take(32).collect();
    let scope: String = scope_key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-'))
        .take(120)
        .collect();
    let key: String = idempotency_key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
        .take(120)
        .collect();
    format!("{endpoint}:{scope}:{key}")
}
