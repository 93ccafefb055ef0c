use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ai::provider::Provider;
use crate::config::Upstreams;

const ANTHROPIC_MODEL: &str = "claude-sonnet-4-5-20250929";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 4096;
const OPENAI_MODEL: &str = "gpt-4o";
const GROQ_MODEL: &str = "llama-3.3-70b-versatile";
const GOOGLE_MODEL: &str = "gemini-2.0-flash";

/// Placeholder used by the web chat when a provider answers with no text.
pub const NO_RESPONSE: &str = "No response.";
/// Same placeholder for the Telegram channel.
pub const SIN_RESPUESTA: &str = "Sin respuesta.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A simple (role, content) pair for building the messages array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A failed provider call. `status` is `None` when the request never got a
/// usable HTTP answer (transport error, unreadable body).
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderError {
    fn transport(err: reqwest::Error) -> Self {
        Self {
            status: None,
            message: err.to_string(),
        }
    }
}

/// Translates the normalized conversation into one provider's wire format
/// and pulls the reply text back out.
pub trait ProviderAdapter: Send + Sync {
    fn build_body(&self, messages: &[ChatMessage], system_prompt: &str) -> Value;

    fn request(&self, client: &Client, api_key: &str, body: &Value) -> RequestBuilder;

    /// Reply text from a 2xx body, `None` when the expected field is absent.
    fn extract_text(&self, body: &Value) -> Option<String>;

    fn parse_reply(&self, status: StatusCode, body: &Value) -> Result<Option<String>, ProviderError> {
        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .unwrap_or("Unknown error")
                .to_string();
            return Err(ProviderError {
                status: Some(status.as_u16()),
                message,
            });
        }

        Ok(self.extract_text(body).filter(|t| !t.trim().is_empty()))
    }
}

pub struct AnthropicAdapter {
    base_url: String,
}

impl ProviderAdapter for AnthropicAdapter {
    fn build_body(&self, messages: &[ChatMessage], system_prompt: &str) -> Value {
        let messages: Vec<&ChatMessage> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();

        json!({
            "model": ANTHROPIC_MODEL,
            "max_tokens": ANTHROPIC_MAX_TOKENS,
            "system": system_prompt,
            "messages": messages,
        })
    }

    fn request(&self, client: &Client, api_key: &str, body: &Value) -> RequestBuilder {
        client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
    }

    fn extract_text(&self, body: &Value) -> Option<String> {
        body.pointer("/content/0/text")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// OpenAI and Groq share the chat-completions shape.
pub struct OpenAiCompatibleAdapter {
    base_url: String,
    model: &'static str,
}

impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn build_body(&self, messages: &[ChatMessage], system_prompt: &str) -> Value {
        let mut all = Vec::with_capacity(messages.len() + 1);
        all.push(ChatMessage::new(Role::System, system_prompt));
        all.extend(messages.iter().cloned());

        json!({
            "model": self.model,
            "messages": all,
        })
    }

    fn request(&self, client: &Client, api_key: &str, body: &Value) -> RequestBuilder {
        client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(body)
    }

    fn extract_text(&self, body: &Value) -> Option<String> {
        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Gemini has no system role, so the prompt goes in as a leading
/// user/model exchange.
pub struct GoogleAdapter {
    base_url: String,
}

impl ProviderAdapter for GoogleAdapter {
    fn build_body(&self, messages: &[ChatMessage], system_prompt: &str) -> Value {
        let mut contents = vec![
            json!({ "role": "user", "parts": [{ "text": system_prompt }] }),
            json!({ "role": "model", "parts": [{ "text": "Entendido." }] }),
        ];

        contents.extend(
            messages
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| {
                    let role = match m.role {
                        Role::Assistant => "model",
                        _ => "user",
                    };
                    json!({ "role": role, "parts": [{ "text": m.content }] })
                }),
        );

        json!({ "contents": contents })
    }

    fn request(&self, client: &Client, api_key: &str, body: &Value) -> RequestBuilder {
        client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, GOOGLE_MODEL
            ))
            .query(&[("key", api_key)])
            .json(body)
    }

    fn extract_text(&self, body: &Value) -> Option<String> {
        body.pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Shared client for all LLM providers. Holds one connection pool.
pub struct LlmClient {
    client: Client,
    anthropic: AnthropicAdapter,
    openai: OpenAiCompatibleAdapter,
    google: GoogleAdapter,
    groq: OpenAiCompatibleAdapter,
}

impl LlmClient {
    pub fn new(client: Client, upstreams: &Upstreams) -> Self {
        Self {
            client,
            anthropic: AnthropicAdapter {
                base_url: upstreams.anthropic.clone(),
            },
            openai: OpenAiCompatibleAdapter {
                base_url: upstreams.openai.clone(),
                model: OPENAI_MODEL,
            },
            google: GoogleAdapter {
                base_url: upstreams.google.clone(),
            },
            groq: OpenAiCompatibleAdapter {
                base_url: upstreams.groq.clone(),
                model: GROQ_MODEL,
            },
        }
    }

    pub fn adapter(&self, provider: Provider) -> &dyn ProviderAdapter {
        match provider {
            Provider::Anthropic => &self.anthropic,
            Provider::OpenAi => &self.openai,
            Provider::Google => &self.google,
            Provider::Groq => &self.groq,
        }
    }

    /// Send a conversation to `provider` and get the assistant's reply.
    ///
    /// A successful answer without text yields `empty_reply`, never an empty
    /// string.
    pub async fn complete(
        &self,
        provider: Provider,
        api_key: &str,
        system_prompt: &str,
        messages: &[ChatMessage],
        empty_reply: &str,
    ) -> Result<String, ProviderError> {
        let adapter = self.adapter(provider);
        let body = adapter.build_body(messages, system_prompt);

        let resp = adapter
            .request(&self.client, api_key, &body)
            .send()
            .await
            .map_err(ProviderError::transport)?;

        let status = resp.status();
        let raw = resp.text().await.map_err(ProviderError::transport)?;

        let parsed: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            // Error pages are often HTML; the status alone is enough then.
            Err(_) if !status.is_success() => Value::Null,
            Err(e) => {
                return Err(ProviderError {
                    status: None,
                    message: format!("invalid {} response: {}", provider, e),
                })
            }
        };

        let text = adapter.parse_reply(status, &parsed)?;
        Ok(text.unwrap_or_else(|| empty_reply.to_string()))
    }
}
