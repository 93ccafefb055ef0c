use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::billing::mercadopago::{self, CheckoutPlan, Notification, PreapprovalError};
use crate::billing::rebill::{self, RebillEvent};
use crate::billing::stripe::{self, verify_signature};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub payer_email: Option<String>,
    #[serde(default)]
    pub external_reference: String,
    pub plan: Option<CheckoutPlan>,
    pub user_name: Option<String>,
}

impl CheckoutRequest {
    fn email(&self) -> Result<&str, ApiError> {
        self.payer_email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| ApiError::BadRequest("Email requerido".into()))
    }
}

// ── Stripe ─────────────────────────────────────────────────────────

pub async fn stripe_checkout(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;

    if !state.stripe.is_configured() {
        return Err(ApiError::Config("Stripe no esta configurado".into()));
    }
    let email = req.email()?;
    let price_id = state
        .config
        .stripe_price_id
        .as_deref()
        .ok_or_else(|| ApiError::Config("Stripe Price ID no configurado".into()))?;

    let customer_id = state
        .stripe
        .find_or_create_customer(email, &req.external_reference)
        .await?;
    let url = state
        .stripe
        .create_checkout_session(&customer_id, price_id, &req.external_reference, &state.config.app_url)
        .await?;

    Ok(Json(json!({ "url": url })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalRequest {
    pub user_id: Option<Uuid>,
}

pub async fn stripe_portal(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PortalRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;
    let user_id = req
        .user_id
        .ok_or_else(|| ApiError::BadRequest("User ID requerido".into()))?;

    if !state.stripe.is_configured() {
        return Err(ApiError::Config("Error de configuracion".into()));
    }

    let customer_id = state
        .store
        .subscription(user_id)
        .await?
        .and_then(|s| s.stripe_customer_id)
        .ok_or_else(|| ApiError::NotFound("No se encontro suscripcion de Stripe".into()))?;

    let return_url = format!("{}/dashboard/plan", state.config.app_url);
    let url = state
        .stripe
        .create_portal_session(&customer_id, &return_url)
        .await?;

    Ok(Json(json!({ "url": url })))
}

/// Signed Stripe event. Bad signatures are rejected; anything that fails
/// after verification is logged and acknowledged.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(secret) = state.config.stripe_webhook_secret.as_deref() else {
        tracing::error!("[Stripe Webhook] STRIPE_WEBHOOK_SECRET is not set");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Webhook secret not configured" })),
        )
            .into_response();
    };

    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
    else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "No signature" }))).into_response();
    };

    if let Err(e) = verify_signature(secret, signature, &body, Utc::now().timestamp()) {
        tracing::warn!("[Stripe Webhook] Signature verification failed: {}", e);
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid signature" })))
            .into_response();
    }

    match serde_json::from_slice::<Value>(&body) {
        Ok(event) => {
            if let Err(e) = stripe::handle_event(state.store.as_ref(), &state.stripe, &event).await {
                tracing::error!("[Stripe Webhook] Error processing event: {:#}", e);
            }
        }
        Err(e) => tracing::error!("[Stripe Webhook] Unreadable event body: {}", e),
    }

    Json(json!({ "received": true })).into_response()
}

// ── Mercado Pago ───────────────────────────────────────────────────

impl From<PreapprovalError> for ApiError {
    fn from(err: PreapprovalError) -> Self {
        match err {
            PreapprovalError::Rejected { status, message } => ApiError::Upstream {
                status: StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                message,
            },
            PreapprovalError::Other(e) => ApiError::Internal(e),
        }
    }
}

pub async fn mercadopago_checkout(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;

    if !state.mercadopago.is_configured() {
        return Err(ApiError::Config("Mercado Pago no esta configurado".into()));
    }
    let email = req.email()?;

    let data = state
        .mercadopago
        .create_preapproval(
            req.plan.unwrap_or_default(),
            email,
            &req.external_reference,
            &state.config.app_url,
        )
        .await?;

    Ok(Json(json!({
        "id": data["id"],
        "init_point": data["init_point"],
        "status": data["status"],
    })))
}

pub async fn mercadopago_webhook(State(state): State<Arc<AppState>>, body: Bytes) -> Json<Value> {
    match serde_json::from_slice::<Notification>(&body) {
        Ok(notification) => {
            if let Err(e) =
                mercadopago::handle_notification(state.store.as_ref(), &state.mercadopago, &notification)
                    .await
            {
                tracing::error!("[MP Webhook] Error: {:#}", e);
            }
        }
        Err(e) => tracing::warn!("[MP Webhook] Unreadable notification: {}", e),
    }
    Json(json!({ "ok": true }))
}

// ── Rebill ─────────────────────────────────────────────────────────

pub async fn rebill_checkout(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;

    if state.rebill.api_key().is_none() {
        return Err(ApiError::Config("Rebill no esta configurado".into()));
    }
    let email = req.email()?;
    if state.rebill.plan_id().is_none() {
        return Err(ApiError::Config("Rebill Plan ID no configurado".into()));
    }

    let url = state
        .rebill
        .create_payment_link(
            email,
            &req.external_reference,
            req.user_name.as_deref(),
            &state.config.app_url,
        )
        .await
        .map_err(|e| {
            tracing::error!("[Rebill] {:#}", e);
            ApiError::Upstream {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "Error al crear link de pago".into(),
            }
        })?;

    Ok(Json(json!({ "url": url })))
}

pub async fn rebill_webhook(State(state): State<Arc<AppState>>, body: Bytes) -> Json<Value> {
    match serde_json::from_slice::<RebillEvent>(&body) {
        Ok(event) => {
            if let Err(e) = rebill::handle_event(state.store.as_ref(), &event).await {
                tracing::error!("[Rebill Webhook] Error processing event: {:#}", e);
            }
        }
        Err(e) => tracing::warn!("[Rebill Webhook] Unreadable event: {}", e),
    }
    Json(json!({ "received": true }))
}
