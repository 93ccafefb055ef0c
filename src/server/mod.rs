pub mod billing;
pub mod chat;
pub mod telegram;

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::Client;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::ai::llm::LlmClient;
use crate::billing::mercadopago::MercadoPagoClient;
use crate::billing::rebill::RebillClient;
use crate::billing::stripe::StripeClient;
use crate::bot::TelegramGateway;
use crate::config::AppConfig;
use crate::db::Store;

/// Shared application state, accessible from all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub llm: LlmClient,
    pub telegram: TelegramGateway,
    pub stripe: StripeClient,
    pub mercadopago: MercadoPagoClient,
    pub rebill: RebillClient,
}

impl AppState {
    /// Wire the LLM and billing clients onto the shared `client`. Telegram keeps
    /// its own pool.
    pub fn new(config: AppConfig, store: Arc<dyn Store>, client: Client) -> anyhow::Result<Self> {
        let up = &config.upstreams;
        Ok(Self {
            llm: LlmClient::new(client.clone(), up),
            telegram: TelegramGateway::new(&up.telegram)?,
            stripe: StripeClient::new(client.clone(), &up.stripe, config.stripe_secret_key.clone()),
            mercadopago: MercadoPagoClient::new(
                client.clone(),
                &up.mercadopago,
                config.mercadopago_access_token.clone(),
            ),
            rebill: RebillClient::new(
                client,
                &up.rebill,
                config.rebill_api_key.clone(),
                config.rebill_plan_id.clone(),
            ),
            store,
            config,
        })
    }
}

/// Error returned by the JSON endpoints as `{ "error": message }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    /// A required secret or id is missing from the environment.
    #[error("{0}")]
    Config(String),
    #[error("{message}")]
    Upstream { status: StatusCode, message: String },
    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Config(msg) => {
                tracing::error!("configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            ApiError::Upstream { status, message } => (status, message),
            ApiError::Internal(e) => {
                tracing::error!("internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Error interno del servidor".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat::chat))
        .route("/api/telegram/webhook", post(telegram::webhook))
        .route("/api/telegram/setup", post(telegram::setup))
        .route("/api/stripe", post(billing::stripe_checkout))
        .route("/api/stripe/portal", post(billing::stripe_portal))
        .route("/api/stripe/webhook", post(billing::stripe_webhook))
        .route("/api/mercadopago", post(billing::mercadopago_checkout))
        .route("/api/mercadopago/webhook", post(billing::mercadopago_webhook))
        .route("/api/rebill", post(billing::rebill_checkout))
        .route("/api/rebill/webhook", post(billing::rebill_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
