use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::ai::llm::Role;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub user_id: Uuid,
    /// One of the `Provider` tags. Unknown tags are skipped by readers.
    pub provider: String,
    pub api_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AgentConfig {
    pub user_id: Uuid,
    pub soul_md: Option<String>,
    pub identity_md: Option<String>,
    pub agents_md: Option<String>,
    pub agent_name: Option<String>,
    pub agent_emoji: Option<String>,
    pub agent_vibe: Option<String>,
    pub bootstrap_done: bool,
    pub active_skills: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl AgentConfig {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            soul_md: None,
            identity_md: None,
            agents_md: None,
            agent_name: None,
            agent_emoji: None,
            agent_vibe: None,
            bootstrap_done: false,
            active_skills: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelegramStatus {
    Connected,
    Error,
}

impl TelegramStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub user_id: Uuid,
    pub bot_token: String,
    pub bot_username: Option<String>,
    pub bot_name: Option<String>,
    pub status: String,
    pub webhook_active: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChatMessageRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub content: String,
    pub provider: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub user_id: Uuid,
    pub role: Role,
    pub content: String,
    pub provider: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: Uuid,
    pub plan: String,
    pub status: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub mp_subscription_id: Option<String>,
    pub rebill_customer_id: Option<String>,
    pub rebill_subscription_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied by the billing webhooks. `None` leaves the stored
/// value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPatch {
    pub plan: Option<String>,
    pub status: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub mp_subscription_id: Option<String>,
    pub rebill_customer_id: Option<String>,
    pub rebill_subscription_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
}
