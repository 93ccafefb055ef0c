use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_user_ref, reconcile, Processor};
use crate::db::models::SubscriptionPatch;
use crate::db::Store;

const MONTHLY_PRICE_ARS: u32 = 15000;

/// Notification body. Only `subscription_preapproval` notifications matter.
#[derive(Debug, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub data: Option<NotificationData>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationData {
    pub id: Option<Value>,
}

impl Notification {
    /// Preapproval id to fetch, when this notification concerns one.
    pub fn preapproval_id(&self) -> Option<String> {
        if self.kind.as_deref() != Some("subscription_preapproval") {
            return None;
        }
        // MP sends ids as strings but older notifications used numbers.
        match self.data.as_ref()?.id.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutPlan {
    #[default]
    Trial,
    Pro,
}

pub struct MercadoPagoClient {
    client: Client,
    base_url: String,
    access_token: Option<String>,
}

impl MercadoPagoClient {
    pub fn new(client: Client, base_url: &str, access_token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            access_token,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.access_token.is_some()
    }

    fn token(&self) -> anyhow::Result<&str> {
        self.access_token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("MERCADOPAGO_ACCESS_TOKEN is not set"))
    }

    pub async fn fetch_preapproval(&self, id: &str) -> anyhow::Result<Value> {
        let resp = self
            .client
            .get(format!("{}/preapproval/{}", self.base_url, id))
            .bearer_auth(self.token()?)
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("failed to fetch MP subscription {} ({})", id, resp.status());
        }
        Ok(resp.json().await?)
    }

    /// Create a monthly preapproval and return MP's answer.
    pub async fn create_preapproval(
        &self,
        plan: CheckoutPlan,
        payer_email: &str,
        user_ref: &str,
        app_url: &str,
    ) -> Result<Value, PreapprovalError> {
        let reason = match plan {
            CheckoutPlan::Pro => "OpenClaw Pro - Agentes IA ilimitados",
            CheckoutPlan::Trial => "OpenClaw - Prueba gratuita 7 dias",
        };

        let mut auto_recurring = json!({
            "frequency": 1,
            "frequency_type": "months",
            "transaction_amount": MONTHLY_PRICE_ARS,
            "currency_id": "ARS",
        });
        if plan == CheckoutPlan::Trial {
            auto_recurring["free_trial"] = json!({ "frequency": 7, "frequency_type": "days" });
        }

        let body = json!({
            "reason": reason,
            "external_reference": user_ref,
            "payer_email": payer_email,
            "auto_recurring": auto_recurring,
            "back_url": format!("{}/dashboard/plan", app_url),
        });

        let resp = self
            .client
            .post(format!("{}/preapproval", self.base_url))
            .bearer_auth(self.token()?)
            .json(&body)
            .send()
            .await
            .map_err(anyhow::Error::from)?;

        let status = resp.status();
        let data: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            tracing::error!("MP error ({}): {}", status, data);
            return Err(PreapprovalError::Rejected {
                status: status.as_u16(),
                message: data["message"]
                    .as_str()
                    .unwrap_or("Error al crear suscripcion")
                    .to_string(),
            });
        }
        Ok(data)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PreapprovalError {
    /// Mercado Pago answered with a non-2xx status.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Reconcile one Mercado Pago notification.
pub async fn handle_notification(
    store: &dyn Store,
    mp: &MercadoPagoClient,
    notification: &Notification,
) -> anyhow::Result<()> {
    let Some(preapproval_id) = notification.preapproval_id() else {
        tracing::info!(
            "[MP Webhook] Ignoring notification type {}",
            notification.kind.as_deref().unwrap_or("unknown")
        );
        return Ok(());
    };

    let subscription = mp.fetch_preapproval(&preapproval_id).await?;

    let Some(user_id) = subscription["external_reference"]
        .as_str()
        .and_then(parse_user_ref)
    else {
        tracing::warn!("[MP Webhook] Preapproval {} has no usable external_reference", preapproval_id);
        return Ok(());
    };

    let external = subscription["status"].as_str().unwrap_or_default();
    let normalized = reconcile(Processor::MercadoPago, external);

    let patch = SubscriptionPatch {
        mp_subscription_id: Some(preapproval_id),
        ..normalized.patch()
    };
    store.apply_subscription(user_id, &patch).await?;

    tracing::info!(
        "[MP Webhook] Subscription for {} is now {}/{}",
        user_id,
        normalized.plan.as_str(),
        normalized.status.as_str()
    );
    Ok(())
}
