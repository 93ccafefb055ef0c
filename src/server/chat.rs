use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::agent::identity::{Channel, DEFAULT_PROMPT};
use crate::agent::session::AgentSession;
use crate::ai::llm::{ChatMessage, ProviderError, NO_RESPONSE};
use crate::ai::provider::Provider;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub api_key: Option<String>,
    pub provider: Option<String>,
    pub system_prompt: Option<String>,
    /// Runs the agent's own prompt and bootstrap flow when set.
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub content: String,
}

/// Web chat failures. The UI renders `content` in the transcript, so errors
/// use the same shape as replies.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("No API key configured. Go to Settings to add one.")]
    NoApiKey,
    #[error("Unknown provider. Please configure a valid API key.")]
    UnknownProvider,
    #[error("{} error: {}", .provider.display_name(), .source.message)]
    Provider {
        provider: Provider,
        source: ProviderError,
    },
    #[error("Internal server error.")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = match &self {
            ChatError::NoApiKey | ChatError::UnknownProvider => StatusCode::BAD_REQUEST,
            ChatError::Provider { source, .. } => source
                .status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            ChatError::Internal(e) => {
                tracing::error!("Chat API error: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ChatReply {
            content: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ChatError> {
    let Json(req) = payload.map_err(|e| anyhow::anyhow!("bad chat body: {}", e.body_text()))?;

    let api_key = req
        .api_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or(ChatError::NoApiKey)?;
    let provider: Provider = req
        .provider
        .as_deref()
        .and_then(|p| p.parse().ok())
        .ok_or(ChatError::UnknownProvider)?;

    let explicit_prompt = req.system_prompt.filter(|p| !p.trim().is_empty());
    let session = match (&explicit_prompt, req.user_id) {
        (None, Some(user_id)) => Some(AgentSession::load(state.store.as_ref(), user_id).await?),
        _ => None,
    };

    let system_prompt = match (explicit_prompt, &session) {
        (Some(prompt), _) => prompt,
        (None, Some(session)) => session.system_prompt(Channel::Web),
        (None, None) => DEFAULT_PROMPT.to_string(),
    };

    let raw = state
        .llm
        .complete(provider, api_key, &system_prompt, &req.messages, NO_RESPONSE)
        .await
        .map_err(|source| ChatError::Provider { provider, source })?;

    let content = match session {
        Some(session) => session.absorb_reply(state.store.as_ref(), &raw, NO_RESPONSE).await,
        None => raw,
    };

    Ok(Json(ChatReply { content }))
}
