use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;

use super::{from_unix, parse_user_ref, reconcile, Processor};
use crate::db::models::SubscriptionPatch;
use crate::db::Store;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

const TRIAL_DAYS: &str = "7";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed stripe-signature header")]
    Malformed,
    #[error("timestamp outside the tolerance window")]
    Stale,
    #[error("no signature matches the payload")]
    Mismatch,
}

/// Check a `stripe-signature` header (`t=<unix>,v1=<hex>[,v1=...]`) against
/// the raw request body.
pub fn verify_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim() {
            "t" => timestamp = Some(value.trim()),
            "v1" => signatures.push(value.trim()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    let signed_at: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if now.abs_diff(signed_at) > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        return Err(SignatureError::Stale);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Thin REST client for the few Stripe endpoints we need.
pub struct StripeClient {
    client: Client,
    base_url: String,
    secret_key: Option<String>,
}

impl StripeClient {
    pub fn new(client: Client, base_url: &str, secret_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            secret_key,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret_key.is_some()
    }

    fn key(&self) -> anyhow::Result<&str> {
        self.secret_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("STRIPE_SECRET_KEY is not set"))
    }

    async fn read(resp: reqwest::Response) -> anyhow::Result<Value> {
        if !resp.status().is_success() {
            let status = resp.status();
            let err_body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Stripe API error ({}): {}", status, err_body);
        }
        Ok(resp.json().await?)
    }

    pub async fn retrieve_subscription(&self, subscription_id: &str) -> anyhow::Result<Value> {
        let resp = self
            .client
            .get(format!("{}/v1/subscriptions/{}", self.base_url, subscription_id))
            .bearer_auth(self.key()?)
            .send()
            .await?;
        Self::read(resp).await
    }

    /// Reuse the customer registered under `email`, or create one tagged
    /// with our user id.
    pub async fn find_or_create_customer(
        &self,
        email: &str,
        user_ref: &str,
    ) -> anyhow::Result<String> {
        let resp = self
            .client
            .get(format!("{}/v1/customers", self.base_url))
            .bearer_auth(self.key()?)
            .query(&[("email", email), ("limit", "1")])
            .send()
            .await?;
        let existing = Self::read(resp).await?;

        if let Some(id) = existing.pointer("/data/0/id").and_then(Value::as_str) {
            return Ok(id.to_string());
        }

        let resp = self
            .client
            .post(format!("{}/v1/customers", self.base_url))
            .bearer_auth(self.key()?)
            .form(&[("email", email), ("metadata[supabase_user_id]", user_ref)])
            .send()
            .await?;
        let created = Self::read(resp).await?;

        created["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Stripe customer response without id"))
    }

    /// Subscription checkout with a free trial. Returns the hosted page URL.
    pub async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        user_ref: &str,
        app_url: &str,
    ) -> anyhow::Result<Option<String>> {
        let success_url = format!("{}/dashboard/plan?session_id={{CHECKOUT_SESSION_ID}}", app_url);
        let cancel_url = format!("{}/dashboard/plan", app_url);

        let resp = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(self.key()?)
            .form(&[
                ("customer", customer_id),
                ("mode", "subscription"),
                ("line_items[0][price]", price_id),
                ("line_items[0][quantity]", "1"),
                ("subscription_data[trial_period_days]", TRIAL_DAYS),
                ("subscription_data[metadata][supabase_user_id]", user_ref),
                ("client_reference_id", user_ref),
                ("success_url", success_url.as_str()),
                ("cancel_url", cancel_url.as_str()),
            ])
            .send()
            .await?;
        let session = Self::read(resp).await?;

        tracing::info!(
            "Stripe checkout session {} created for customer {}",
            session["id"].as_str().unwrap_or("?"),
            customer_id
        );
        Ok(session["url"].as_str().map(str::to_string))
    }

    pub async fn create_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> anyhow::Result<String> {
        let resp = self
            .client
            .post(format!("{}/v1/billing_portal/sessions", self.base_url))
            .bearer_auth(self.key()?)
            .form(&[("customer", customer_id), ("return_url", return_url)])
            .send()
            .await?;
        let session = Self::read(resp).await?;

        session["url"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Stripe portal response without url"))
    }
}

/// Apply one verified Stripe event to the subscription store.
pub async fn handle_event(
    store: &dyn Store,
    stripe: &StripeClient,
    event: &Value,
) -> anyhow::Result<()> {
    let event_type = event["type"].as_str().unwrap_or("unknown");
    let object = &event["data"]["object"];

    tracing::info!(
        "[Stripe Webhook] Event {} ({})",
        event_type,
        event["id"].as_str().unwrap_or("?")
    );

    match event_type {
        "checkout.session.completed" => {
            let user_id = object["client_reference_id"].as_str().and_then(parse_user_ref);
            let subscription_id = object["subscription"].as_str();
            let (Some(user_id), Some(subscription_id)) = (user_id, subscription_id) else {
                tracing::warn!("[Stripe Webhook] checkout session without user or subscription");
                return Ok(());
            };

            let subscription = stripe.retrieve_subscription(subscription_id).await?;

            let patch = SubscriptionPatch {
                stripe_customer_id: object["customer"].as_str().map(str::to_string),
                stripe_subscription_id: subscription["id"]
                    .as_str()
                    .or(Some(subscription_id))
                    .map(str::to_string),
                trial_ends_at: subscription["trial_end"].as_i64().and_then(from_unix),
                current_period_end: period_end(&subscription),
                ..reconcile(Processor::Stripe, "active").patch()
            };
            store.apply_subscription(user_id, &patch).await?;
            tracing::info!("[Stripe Webhook] User upgraded to pro: {}", user_id);
        }

        "customer.subscription.updated" => {
            let Some(user_id) = metadata_user(object) else {
                tracing::warn!("[Stripe Webhook] subscription update without supabase_user_id");
                return Ok(());
            };
            let external = object["status"].as_str().unwrap_or_default();
            let normalized = reconcile(Processor::Stripe, external);

            let patch = SubscriptionPatch {
                current_period_end: period_end(object),
                ..normalized.patch()
            };
            store.apply_subscription(user_id, &patch).await?;
            tracing::info!(
                "[Stripe Webhook] Subscription updated: user={} plan={} status={}",
                user_id,
                normalized.plan.as_str(),
                normalized.status.as_str()
            );
        }

        "customer.subscription.deleted" => {
            let Some(user_id) = metadata_user(object) else {
                tracing::warn!("[Stripe Webhook] subscription deletion without supabase_user_id");
                return Ok(());
            };
            let patch = reconcile(Processor::Stripe, "canceled").patch();
            store.apply_subscription(user_id, &patch).await?;
            tracing::info!("[Stripe Webhook] Subscription deleted: {}", user_id);
        }

        "invoice.payment_failed" => {
            let Some(customer_id) = object["customer"].as_str() else {
                return Ok(());
            };
            let Some(user_id) = store.user_by_stripe_customer(customer_id).await? else {
                tracing::warn!("[Stripe Webhook] Payment failed for unknown customer {}", customer_id);
                return Ok(());
            };
            let patch = SubscriptionPatch {
                status: Some(super::SubscriptionStatus::PastDue.as_str().to_string()),
                ..SubscriptionPatch::default()
            };
            store.apply_subscription(user_id, &patch).await?;
            tracing::info!("[Stripe Webhook] Payment failed for: {}", user_id);
        }

        other => {
            tracing::info!("[Stripe Webhook] Ignoring event type {}", other);
        }
    }

    Ok(())
}

fn metadata_user(object: &Value) -> Option<uuid::Uuid> {
    object
        .pointer("/metadata/supabase_user_id")
        .and_then(Value::as_str)
        .and_then(parse_user_ref)
}

/// Newer API versions moved the period onto the subscription items.
fn period_end(subscription: &Value) -> Option<chrono::DateTime<chrono::Utc>> {
    subscription
        .pointer("/items/data/0/current_period_end")
        .or_else(|| subscription.get("current_period_end"))
        .and_then(Value::as_i64)
        .and_then(from_unix)
}

#[cfg(test)]
pub(crate) fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "whsec_test";

    #[test]
    fn valid_signature_is_accepted() {
        let body = br#"{"type":"ping"}"#;
        let header = sign(SECRET, 1_700_000_000, body);
        assert_eq!(verify_signature(SECRET, &header, body, 1_700_000_010), Ok(()));
    }

    #[test]
    fn any_matching_v1_is_enough() {
        let body = b"payload";
        let good = sign(SECRET, 1_700_000_000, body);
        let v1 = good.split("v1=").nth(1).unwrap();
        let header = format!("t=1700000000,v1={},v1={}", "00".repeat(32), v1);
        assert_eq!(verify_signature(SECRET, &header, body, 1_700_000_000), Ok(()));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let header = sign(SECRET, 1_700_000_000, b"original");
        assert_eq!(
            verify_signature(SECRET, &header, b"tampered", 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let header = sign("whsec_other", 1_700_000_000, b"body");
        assert_eq!(
            verify_signature(SECRET, &header, b"body", 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn old_timestamp_is_rejected() {
        let header = sign(SECRET, 1_700_000_000, b"body");
        assert_eq!(
            verify_signature(SECRET, &header, b"body", 1_700_000_000 + 301),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn extreme_timestamps_are_stale() {
        let header = format!("t={},v1=00", i64::MIN);
        assert_eq!(
            verify_signature(SECRET, &header, b"body", 1_700_000_000),
            Err(SignatureError::Stale)
        );
        let header = format!("t={},v1=00", i64::MAX);
        assert_eq!(
            verify_signature(SECRET, &header, b"body", -1_700_000_000),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert_eq!(
            verify_signature(SECRET, "garbage", b"body", 0),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_signature(SECRET, "t=abc,v1=00", b"body", 0),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_signature(SECRET, "t=0", b"body", 0),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_signature(SECRET, "t=0,v1=not-hex", b"body", 0),
            Err(SignatureError::Mismatch)
        );
    }

    #[tokio::test]
    async fn checkout_completion_upgrades_user() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/subscriptions/sub_123"))
            .and(header("authorization", "Bearer sk_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "sub_123",
                "status": "trialing",
                "trial_end": 1_800_000_000,
                "items": { "data": [{ "current_period_end": 1_800_500_000 }] }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let stripe = StripeClient::new(Client::new(), &server.uri(), Some("sk_test".into()));
        let user = Uuid::new_v4();

        let event = json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": {
                "client_reference_id": user.to_string(),
                "customer": "cus_9",
                "subscription": "sub_123"
            }}
        });
        handle_event(&store, &stripe, &event).await.unwrap();

        let sub = store.subscription_now(user).unwrap();
        assert_eq!(sub.plan, "pro");
        assert_eq!(sub.status, "active");
        assert_eq!(sub.stripe_customer_id.as_deref(), Some("cus_9"));
        assert_eq!(sub.stripe_subscription_id.as_deref(), Some("sub_123"));
        assert_eq!(sub.trial_ends_at, from_unix(1_800_000_000));
        assert_eq!(sub.current_period_end, from_unix(1_800_500_000));
    }

    #[tokio::test]
    async fn subscription_lifecycle_events() {
        let store = MemoryStore::new();
        let stripe = StripeClient::new(Client::new(), "http://127.0.0.1:9", None);
        let user = Uuid::new_v4();

        let updated = json!({
            "type": "customer.subscription.updated",
            "data": { "object": {
                "status": "past_due",
                "metadata": { "supabase_user_id": user.to_string() }
            }}
        });
        handle_event(&store, &stripe, &updated).await.unwrap();
        let sub = store.subscription_now(user).unwrap();
        assert_eq!((sub.plan.as_str(), sub.status.as_str()), ("pro", "past_due"));

        let deleted = json!({
            "type": "customer.subscription.deleted",
            "data": { "object": { "metadata": { "supabase_user_id": user.to_string() } } }
        });
        handle_event(&store, &stripe, &deleted).await.unwrap();
        let sub = store.subscription_now(user).unwrap();
        assert_eq!((sub.plan.as_str(), sub.status.as_str()), ("starter", "canceled"));
    }

    #[tokio::test]
    async fn failed_invoice_marks_past_due_by_customer() {
        let store = MemoryStore::new();
        let stripe = StripeClient::new(Client::new(), "http://127.0.0.1:9", None);
        let user = Uuid::new_v4();
        store
            .apply_subscription(
                user,
                &SubscriptionPatch {
                    plan: Some("pro".into()),
                    stripe_customer_id: Some("cus_42".into()),
                    ..SubscriptionPatch::default()
                },
            )
            .await
            .unwrap();

        let event = json!({
            "type": "invoice.payment_failed",
            "data": { "object": { "customer": "cus_42" } }
        });
        handle_event(&store, &stripe, &event).await.unwrap();

        let sub = store.subscription_now(user).unwrap();
        assert_eq!(sub.plan, "pro");
        assert_eq!(sub.status, "past_due");
    }

    #[tokio::test]
    async fn unknown_events_are_ignored() {
        let store = MemoryStore::new();
        let stripe = StripeClient::new(Client::new(), "http://127.0.0.1:9", None);
        let event = json!({ "type": "charge.refunded", "data": { "object": {} } });
        handle_event(&store, &stripe, &event).await.unwrap();
        assert_eq!(store.subscription_count(), 0);
    }
}
