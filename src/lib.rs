//! tollgate: a credit metering and idempotent billing gateway.
//!
//! Gates chat, image and audio generation behind per-identity credit
//! balances. The core protocol is reserve → execute → commit-or-roll-back
//! over a durable ledger, with an idempotency cache guaranteeing that
//! retried requests replay their original result instead of re-executing
//! a paid operation.

pub mod api_types;
pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod jobs;
pub mod models;
pub mod orchestrator;
pub mod pricing;
pub mod quota;
pub mod routes;

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    routing::{get, post},
};
use http::{HeaderValue, Method, header};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::GateConfig>,
    pub db: Arc<db::DbPool>,
    pub orchestrator: Arc<orchestrator::Orchestrator>,
    pub verifier: Arc<dyn identity::AuthVerifier>,
}

impl AppState {
    pub async fn new(config: config::GateConfig) -> Result<Self, Box<dyn std::error::Error>> {
        // One shared HTTP client for all outbound requests; reqwest
        // keeps per-host connection pools internally.
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.server.connect_timeout_secs))
            .timeout(Duration::from_secs(config.backend.timeout_secs))
            .build()?;

        let db = db::DbPool::from_config(&config.database, &config.limits).await?;
        db.run_migrations().await?;
        let db = Arc::new(db);

        let verifier: Arc<dyn identity::AuthVerifier> = match &config.auth.user_info_url {
            Some(url) => Arc::new(identity::HttpAuthVerifier::new(
                http_client.clone(),
                url.clone(),
                Duration::from_secs(config.auth.verify_timeout_secs),
            )),
            None => {
                tracing::warn!(
                    "auth.user_info_url not configured; every request resolves to demo scope"
                );
                Arc::new(identity::DisabledAuthVerifier)
            }
        };

        let generation = Arc::new(backend::GeminiClient::new(http_client, &config.backend));

        Ok(Self::assemble(Arc::new(config), db, generation, verifier))
    }

    /// Wire the pieces together. Split out of [`AppState::new`] so
    /// tests can swap in their own backend and verifier.
    pub fn assemble(
        config: Arc<config::GateConfig>,
        db: Arc<db::DbPool>,
        generation: Arc<dyn backend::GenerationBackend>,
        verifier: Arc<dyn identity::AuthVerifier>,
    ) -> Self {
        let orchestrator = Arc::new(orchestrator::Orchestrator::new(
            db.clone(),
            generation,
            config.clone(),
        ));
        Self {
            config,
            db,
            orchestrator,
            verifier,
        }
    }
}

fn cors_layer(config: &config::ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static(identity::DEVICE_FINGERPRINT_HEADER),
        ]);

    if config.cors_allow_origin == "*" {
        return layer.allow_origin(Any);
    }
    match config.cors_allow_origin.parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            tracing::warn!(
                origin = %config.cors_allow_origin,
                "invalid cors_allow_origin, falling back to any origin"
            );
            layer.allow_origin(Any)
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/v1/chat", post(routes::api::chat))
        .route("/v1/image", post(routes::api::image))
        .route("/v1/audio", post(routes::api::audio))
        .route("/v1/balance", get(routes::api::balance))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
