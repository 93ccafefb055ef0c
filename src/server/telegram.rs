use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use teloxide::types::Update;
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::bot::setup::{self, SetupError};
use crate::bot::{bot_id, handlers};

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    pub token: Option<String>,
}

/// Inbound Telegram update. Always acknowledged so Telegram does not retry.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WebhookQuery>,
    body: Bytes,
) -> Json<Value> {
    let ack = Json(json!({ "ok": true }));

    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return ack;
    };

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!("[Telegram] Unreadable update for bot {}: {}", bot_id(&token), e);
            return ack;
        }
    };

    if let Err(e) = handlers::handle_update(
        state.store.as_ref(),
        &state.llm,
        &state.telegram,
        &token,
        update,
    )
    .await
    {
        tracing::error!("[Telegram] Webhook error for bot {}: {:#}", bot_id(&token), e);
    }

    ack
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupAction {
    #[default]
    Connect,
    Disconnect,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupRequest {
    pub bot_token: Option<String>,
    #[serde(default)]
    pub action: SetupAction,
    pub user_id: Option<Uuid>,
}

impl From<SetupError> for ApiError {
    fn from(err: SetupError) -> Self {
        match err {
            SetupError::Internal(e) => ApiError::Internal(e),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

pub async fn setup(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SetupRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload?;
    let token = req
        .bot_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Bot token is required".into()))?;

    match req.action {
        SetupAction::Disconnect => {
            setup::disconnect(state.store.as_ref(), &state.telegram, &token, req.user_id).await?;
            Ok(Json(json!({ "ok": true })))
        }
        SetupAction::Connect => {
            let connected = setup::connect(
                state.store.as_ref(),
                &state.telegram,
                &state.config.app_url,
                &token,
                req.user_id,
            )
            .await?;
            Ok(Json(json!({
                "ok": true,
                "webhookUrl": connected.webhook_url,
                "botUsername": connected.bot_username,
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::db::memory::MemoryStore;
    use crate::server::router;
    use crate::server::testing::{post_json, state};
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123456:ABC-test";

    fn text_update(text: &str) -> serde_json::Value {
        json!({
            "update_id": 10,
            "message": {
                "message_id": 1,
                "date": 1_700_000_000,
                "chat": { "id": 42, "type": "private", "first_name": "Ana" },
                "from": { "id": 42, "is_bot": false, "first_name": "Ana" },
                "text": text
            }
        })
    }

    #[tokio::test]
    async fn webhook_without_token_is_acknowledged() {
        let app = router(state("http://127.0.0.1:9", Arc::new(MemoryStore::new())));
        let (status, body) = post_json(app, "/api/telegram/webhook", text_update("hola")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn webhook_acknowledges_garbage() {
        let app = router(state("http://127.0.0.1:9", Arc::new(MemoryStore::new())));
        let (status, body) = post_json(
            app,
            "/api/telegram/webhook?token=123456%3AABC-test",
            json!({ "nonsense": true }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn webhook_answers_through_the_owning_users_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"(?i)/bot[^/]+/sendchataction$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": true })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r"(?i)/bot[^/]+/sendmessage$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {
                    "message_id": 2,
                    "date": 1_700_000_001,
                    "chat": { "id": 42, "type": "private", "first_name": "Ana" },
                    "text": "Hola!"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "Hola!" }] } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        store.put_telegram_config(user, TOKEN);
        store.add_api_key(user, "groq", "gsk-1");
        store.add_api_key(user, "google", "AIza-1");

        let app = router(state(&server.uri(), store.clone()));
        let (status, body) = post_json(
            app,
            "/api/telegram/webhook?token=123456%3AABC-test",
            text_update("hola"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true }));
        assert_eq!(store.history(user).len(), 2);
    }

    #[tokio::test]
    async fn setup_requires_token() {
        let app = router(state("http://127.0.0.1:9", Arc::new(MemoryStore::new())));
        let (status, body) =
            post_json(app, "/api/telegram/setup", json!({ "action": "connect" })).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Bot token is required");
    }

    #[tokio::test]
    async fn setup_connect_returns_webhook_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"(?i)/bot[^/]+/getme$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {
                    "id": 123456,
                    "is_bot": true,
                    "first_name": "Nova",
                    "username": "nova_bot",
                    "can_join_groups": true,
                    "can_read_all_group_messages": false,
                    "supports_inline_queries": false,
                    "can_connect_to_business": false,
                    "has_main_web_app": false
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path_regex(r"(?i)/bot[^/]+/setwebhook$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "result": true })))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        let app = router(state(&server.uri(), store.clone()));
        let (status, body) = post_json(
            app,
            "/api/telegram/setup",
            json!({ "botToken": TOKEN, "action": "connect", "userId": user }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["botUsername"], "nova_bot");
        assert_eq!(
            body["webhookUrl"],
            "https://app.example/api/telegram/webhook?token=123456%3AABC-test"
        );
        assert!(store.telegram_config(user).is_some());
    }
}
