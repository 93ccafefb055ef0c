use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{from_rfc3339, parse_user_ref, reconcile, Plan, Processor, SubscriptionStatus};
use crate::db::models::SubscriptionPatch;
use crate::db::Store;

#[derive(Debug, Default, Deserialize)]
pub struct RebillEvent {
    pub event: Option<String>,
    #[serde(default)]
    pub data: RebillData,
    pub customer: Option<RebillCustomer>,
    pub webhook: Option<WebhookMeta>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebillData {
    pub id: Option<String>,
    pub payment_id: Option<String>,
    pub status: Option<String>,
    pub amount: Option<f64>,
    pub next_charge_date: Option<String>,
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RebillCustomer {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMeta {
    pub event: String,
}

impl RebillEvent {
    pub fn event_type(&self) -> Option<&str> {
        self.webhook
            .as_ref()
            .map(|w| w.event.as_str())
            .or(self.event.as_deref())
    }

    fn user_ref(&self) -> Option<&str> {
        self.data
            .metadata
            .get("supabase_user_id")
            .or_else(|| self.metadata.get("supabase_user_id"))
            .map(String::as_str)
    }
}

/// Rebill sends either full timestamps or bare dates.
fn next_charge(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    from_rfc3339(raw).or_else(|| {
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    })
}

/// Reconcile one Rebill webhook event.
pub async fn handle_event(store: &dyn Store, event: &RebillEvent) -> anyhow::Result<()> {
    let event_type = event.event_type().unwrap_or("unknown");
    tracing::info!("[Rebill Webhook] Event: {}", event_type);

    match event_type {
        "subscription.created" => {
            let Some(user_id) = event.user_ref().and_then(parse_user_ref) else {
                tracing::warn!("[Rebill Webhook] subscription.created without user ID in metadata");
                return Ok(());
            };

            let patch = SubscriptionPatch {
                rebill_customer_id: event.customer.as_ref().and_then(|c| c.id.clone()),
                rebill_subscription_id: event.data.id.clone(),
                current_period_end: next_charge(event.data.next_charge_date.as_deref()),
                ..reconcile(Processor::Rebill, "active").patch()
            };
            store.apply_subscription(user_id, &patch).await?;
            tracing::info!("[Rebill Webhook] User upgraded to pro: {}", user_id);
        }

        "subscription.updated" => {
            let Some(subscription_id) = event.data.id.as_deref() else {
                return Ok(());
            };
            let Some(user_id) = store.user_by_rebill_subscription(subscription_id).await? else {
                tracing::warn!(
                    "[Rebill Webhook] subscription.updated for unknown subscription: {}",
                    subscription_id
                );
                return Ok(());
            };

            let external = event.data.status.as_deref().unwrap_or_default();
            let normalized = reconcile(Processor::Rebill, external);
            let patch = SubscriptionPatch {
                current_period_end: next_charge(event.data.next_charge_date.as_deref()),
                ..normalized.patch()
            };
            store.apply_subscription(user_id, &patch).await?;
            tracing::info!(
                "[Rebill Webhook] Subscription updated: user={} status={}",
                user_id,
                external
            );
        }

        "payment.created" | "payment.updated" => {
            let payment = &event.data;
            let status = payment.status.as_deref().unwrap_or_default().to_lowercase();

            tracing::info!(
                "[Rebill Webhook] Payment event: id={} status={} amount={:?}",
                payment
                    .id
                    .as_deref()
                    .or(payment.payment_id.as_deref())
                    .unwrap_or("?"),
                status,
                payment.amount
            );

            let Some(subscription_id) = payment.subscription_id.as_deref() else {
                return Ok(());
            };

            match status.as_str() {
                "rejected" | "failed" => {
                    if let Some(user_id) = store.user_by_rebill_subscription(subscription_id).await? {
                        let patch = SubscriptionPatch {
                            status: Some(SubscriptionStatus::PastDue.as_str().to_string()),
                            ..SubscriptionPatch::default()
                        };
                        store.apply_subscription(user_id, &patch).await?;
                        tracing::info!("[Rebill Webhook] Payment failed for: {}", user_id);
                    }
                }
                "approved" => {
                    if let Some(user_id) = store.user_by_rebill_subscription(subscription_id).await? {
                        let current = store.subscription(user_id).await?;
                        let already_pro = current
                            .map(|s| s.plan == Plan::Pro.as_str())
                            .unwrap_or(false);
                        if !already_pro {
                            let patch = reconcile(Processor::Rebill, "active").patch();
                            store.apply_subscription(user_id, &patch).await?;
                            tracing::info!(
                                "[Rebill Webhook] Payment approved, user reactivated: {}",
                                user_id
                            );
                        }
                    }
                }
                _ => {}
            }
        }

        other => {
            tracing::info!("[Rebill Webhook] Unhandled event type: {}", other);
        }
    }

    Ok(())
}

pub struct RebillClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    plan_id: Option<String>,
}

impl RebillClient {
    pub fn new(
        client: Client,
        base_url: &str,
        api_key: Option<String>,
        plan_id: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            api_key,
            plan_id,
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn plan_id(&self) -> Option<&str> {
        self.plan_id.as_deref()
    }

    /// Single-use payment link for the Pro plan. Returns the checkout URL.
    pub async fn create_payment_link(
        &self,
        payer_email: &str,
        user_ref: &str,
        user_name: Option<&str>,
        app_url: &str,
    ) -> anyhow::Result<Option<String>> {
        let api_key = self
            .api_key()
            .ok_or_else(|| anyhow::anyhow!("REBILL_API_KEY is not set"))?;
        let plan_id = self
            .plan_id()
            .ok_or_else(|| anyhow::anyhow!("REBILL_PLAN_ID is not set"))?;

        let body = json!({
            "title": [
                { "language": "es", "text": "OpenClaw Pro" },
                { "language": "en", "text": "OpenClaw Pro" }
            ],
            "description": [
                { "language": "es", "text": "Suscripcion mensual a OpenClaw Pro" },
                { "language": "en", "text": "Monthly subscription to OpenClaw Pro" }
            ],
            "type": "plan",
            "plan": { "id": plan_id },
            "paymentMethods": [{ "methods": ["card", "bank_transfer"], "currency": "USD" }],
            "redirectUrls": {
                "approved": format!("{}/dashboard/plan?status=approved", app_url),
                "pending": format!("{}/dashboard/plan?status=pending", app_url),
                "rejected": format!("{}/dashboard/plan?status=rejected", app_url),
            },
            "prefilledFields": {
                "customer": {
                    "email": payer_email,
                    "fullName": user_name.unwrap_or(""),
                    "language": "es"
                }
            },
            "isSingleUse": true,
            "metadata": { "supabase_user_id": user_ref },
        });

        let resp = self
            .client
            .post(format!("{}/payment-links", self.base_url))
            .header("x-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err_body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Rebill API error ({}): {}", status, err_body);
        }

        let link: Value = resp.json().await?;
        tracing::info!(
            "[Rebill] Payment link {} created for {}",
            link["id"].as_str().unwrap_or("?"),
            user_ref
        );
        Ok(link["url"].as_str().map(str::to_string))
    }
}
