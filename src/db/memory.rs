//! In-process `Store` used by handler tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::models::{
    AgentConfig, ApiKeyRecord, ChatMessageRow, NewChatMessage, Subscription, SubscriptionPatch,
    TelegramConfig, TelegramStatus,
};
use super::Store;
use crate::agent::identity::ParsedIdentity;

#[derive(Default)]
struct Tables {
    api_keys: Vec<ApiKeyRecord>,
    agent_config: HashMap<Uuid, AgentConfig>,
    telegram_config: HashMap<Uuid, TelegramConfig>,
    chat_messages: Vec<ChatMessageRow>,
    subscriptions: HashMap<Uuid, Subscription>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_api_key(&self, user_id: Uuid, provider: &str, api_key: &str) {
        let mut t = self.tables.lock().unwrap();
        t.api_keys
            .retain(|k| !(k.user_id == user_id && k.provider == provider));
        t.api_keys.push(ApiKeyRecord {
            user_id,
            provider: provider.to_string(),
            api_key: api_key.to_string(),
            created_at: Utc::now(),
        });
    }

    pub fn put_agent_config(&self, cfg: AgentConfig) {
        self.tables
            .lock()
            .unwrap()
            .agent_config
            .insert(cfg.user_id, cfg);
    }

    pub fn put_telegram_config(&self, user_id: Uuid, bot_token: &str) {
        self.tables.lock().unwrap().telegram_config.insert(
            user_id,
            TelegramConfig {
                user_id,
                bot_token: bot_token.to_string(),
                bot_username: None,
                bot_name: None,
                status: TelegramStatus::Connected.as_str().to_string(),
                webhook_active: true,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn telegram_config(&self, user_id: Uuid) -> Option<TelegramConfig> {
        self.tables
            .lock()
            .unwrap()
            .telegram_config
            .get(&user_id)
            .cloned()
    }

    pub fn history(&self, user_id: Uuid) -> Vec<ChatMessageRow> {
        self.tables
            .lock()
            .unwrap()
            .chat_messages
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn subscription_now(&self, user_id: Uuid) -> Option<Subscription> {
        self.tables
            .lock()
            .unwrap()
            .subscriptions
            .get(&user_id)
            .cloned()
    }

    pub fn subscription_count(&self) -> usize {
        self.tables.lock().unwrap().subscriptions.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn api_keys(&self, user_id: Uuid) -> anyhow::Result<Vec<ApiKeyRecord>> {
        let t = self.tables.lock().unwrap();
        Ok(t.api_keys
            .iter()
            .filter(|k| k.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn agent_config(&self, user_id: Uuid) -> anyhow::Result<Option<AgentConfig>> {
        Ok(self.tables.lock().unwrap().agent_config.get(&user_id).cloned())
    }

    async fn complete_bootstrap(
        &self,
        user_id: Uuid,
        identity: &ParsedIdentity,
    ) -> anyhow::Result<bool> {
        let mut t = self.tables.lock().unwrap();
        let cfg = t
            .agent_config
            .entry(user_id)
            .or_insert_with(|| AgentConfig::empty(user_id));
        if cfg.bootstrap_done {
            return Ok(false);
        }
        cfg.agent_name = Some(identity.name.clone());
        cfg.agent_emoji = identity.emoji.clone().or(cfg.agent_emoji.take());
        cfg.agent_vibe = identity.vibe.clone().or(cfg.agent_vibe.take());
        cfg.soul_md = identity.soul.clone().or(cfg.soul_md.take());
        cfg.identity_md = identity.identity.clone().or(cfg.identity_md.take());
        cfg.bootstrap_done = true;
        cfg.updated_at = Utc::now();
        Ok(true)
    }

    async fn telegram_config_by_token(
        &self,
        bot_token: &str,
    ) -> anyhow::Result<Option<TelegramConfig>> {
        let t = self.tables.lock().unwrap();
        Ok(t.telegram_config
            .values()
            .find(|c| c.bot_token == bot_token)
            .cloned())
    }

    async fn upsert_telegram_config(&self, config: &TelegramConfig) -> anyhow::Result<()> {
        self.tables
            .lock()
            .unwrap()
            .telegram_config
            .insert(config.user_id, config.clone());
        Ok(())
    }

    async fn set_telegram_status(
        &self,
        user_id: Uuid,
        status: TelegramStatus,
        webhook_active: bool,
    ) -> anyhow::Result<()> {
        if let Some(cfg) = self.tables.lock().unwrap().telegram_config.get_mut(&user_id) {
            cfg.status = status.as_str().to_string();
            cfg.webhook_active = webhook_active;
        }
        Ok(())
    }

    async fn delete_telegram_config(&self, user_id: Uuid) -> anyhow::Result<()> {
        self.tables.lock().unwrap().telegram_config.remove(&user_id);
        Ok(())
    }

    async fn recent_messages(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<ChatMessageRow>> {
        let t = self.tables.lock().unwrap();
        Ok(t.chat_messages
            .iter()
            .rev()
            .filter(|m| m.user_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn append_messages(&self, messages: &[NewChatMessage]) -> anyhow::Result<()> {
        let mut t = self.tables.lock().unwrap();
        for msg in messages {
            t.chat_messages.push(ChatMessageRow {
                id: Uuid::new_v4(),
                user_id: msg.user_id,
                role: msg.role.as_str().to_string(),
                content: msg.content.clone(),
                provider: Some(msg.provider.clone()),
                created_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn subscription(&self, user_id: Uuid) -> anyhow::Result<Option<Subscription>> {
        Ok(self.subscription_now(user_id))
    }

    async fn apply_subscription(
        &self,
        user_id: Uuid,
        patch: &SubscriptionPatch,
    ) -> anyhow::Result<()> {
        let mut t = self.tables.lock().unwrap();
        let sub = t.subscriptions.entry(user_id).or_insert_with(|| Subscription {
            user_id,
            plan: "starter".to_string(),
            status: "active".to_string(),
            stripe_customer_id: None,
            stripe_subscription_id: None,
            mp_subscription_id: None,
            rebill_customer_id: None,
            rebill_subscription_id: None,
            current_period_end: None,
            trial_ends_at: None,
            updated_at: Utc::now(),
        });

        fn merge<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *slot = value.clone();
            }
        }

        if let Some(plan) = &patch.plan {
            sub.plan = plan.clone();
        }
        if let Some(status) = &patch.status {
            sub.status = status.clone();
        }
        merge(&mut sub.stripe_customer_id, &patch.stripe_customer_id);
        merge(&mut sub.stripe_subscription_id, &patch.stripe_subscription_id);
        merge(&mut sub.mp_subscription_id, &patch.mp_subscription_id);
        merge(&mut sub.rebill_customer_id, &patch.rebill_customer_id);
        merge(&mut sub.rebill_subscription_id, &patch.rebill_subscription_id);
        merge(&mut sub.current_period_end, &patch.current_period_end);
        merge(&mut sub.trial_ends_at, &patch.trial_ends_at);
        sub.updated_at = Utc::now();
        Ok(())
    }

    async fn user_by_stripe_customer(&self, customer_id: &str) -> anyhow::Result<Option<Uuid>> {
        let t = self.tables.lock().unwrap();
        Ok(t.subscriptions
            .values()
            .find(|s| s.stripe_customer_id.as_deref() == Some(customer_id))
            .map(|s| s.user_id))
    }

    async fn user_by_rebill_subscription(
        &self,
        subscription_id: &str,
    ) -> anyhow::Result<Option<Uuid>> {
        let t = self.tables.lock().unwrap();
        Ok(t.subscriptions
            .values()
            .find(|s| s.rebill_subscription_id.as_deref() == Some(subscription_id))
            .map(|s| s.user_id))
    }
}
