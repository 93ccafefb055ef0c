pub mod models;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::agent::identity::ParsedIdentity;
use models::{
    AgentConfig, ApiKeyRecord, ChatMessageRow, NewChatMessage, Subscription, SubscriptionPatch,
    TelegramConfig, TelegramStatus,
};

/// Everything the routing and billing code reads or writes per user.
#[async_trait]
pub trait Store: Send + Sync {
    async fn api_keys(&self, user_id: Uuid) -> anyhow::Result<Vec<ApiKeyRecord>>;

    async fn agent_config(&self, user_id: Uuid) -> anyhow::Result<Option<AgentConfig>>;

    /// Persist a discovered identity and flip `bootstrap_done`.
    ///
    /// Only the first completion wins; returns `false` when the agent was
    /// already bootstrapped and nothing was written.
    async fn complete_bootstrap(
        &self,
        user_id: Uuid,
        identity: &ParsedIdentity,
    ) -> anyhow::Result<bool>;

    async fn telegram_config_by_token(
        &self,
        bot_token: &str,
    ) -> anyhow::Result<Option<TelegramConfig>>;

    async fn upsert_telegram_config(&self, config: &TelegramConfig) -> anyhow::Result<()>;

    async fn set_telegram_status(
        &self,
        user_id: Uuid,
        status: TelegramStatus,
        webhook_active: bool,
    ) -> anyhow::Result<()>;

    async fn delete_telegram_config(&self, user_id: Uuid) -> anyhow::Result<()>;

    /// Newest first.
    async fn recent_messages(&self, user_id: Uuid, limit: i64)
        -> anyhow::Result<Vec<ChatMessageRow>>;

    async fn append_messages(&self, messages: &[NewChatMessage]) -> anyhow::Result<()>;

    async fn subscription(&self, user_id: Uuid) -> anyhow::Result<Option<Subscription>>;

    /// Upsert: a user without a row gets one, defaulting to starter/active.
    async fn apply_subscription(
        &self,
        user_id: Uuid,
        patch: &SubscriptionPatch,
    ) -> anyhow::Result<()>;

    async fn user_by_stripe_customer(&self, customer_id: &str) -> anyhow::Result<Option<Uuid>>;

    async fn user_by_rebill_subscription(
        &self,
        subscription_id: &str,
    ) -> anyhow::Result<Option<Uuid>>;
}

#[derive(Debug, Clone)]
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        // Each CREATE TABLE must be a separate query (Postgres doesn't allow
        // multiple commands in a single prepared statement).

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS api_keys (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL,
                provider TEXT NOT NULL,
                api_key TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (user_id, provider)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS agent_config (
                user_id UUID PRIMARY KEY,
                soul_md TEXT,
                identity_md TEXT,
                agents_md TEXT,
                agent_name TEXT,
                agent_emoji TEXT,
                agent_vibe TEXT,
                bootstrap_done BOOLEAN NOT NULL DEFAULT FALSE,
                active_skills TEXT[] NOT NULL DEFAULT '{}',
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS telegram_config (
                user_id UUID PRIMARY KEY,
                bot_token TEXT NOT NULL UNIQUE,
                bot_username TEXT,
                bot_name TEXT,
                status TEXT NOT NULL DEFAULT 'disconnected',
                webhook_active BOOLEAN NOT NULL DEFAULT FALSE,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS chat_messages (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id UUID NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                provider TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS subscriptions (
                user_id UUID PRIMARY KEY,
                plan TEXT NOT NULL DEFAULT 'starter',
                status TEXT NOT NULL DEFAULT 'active',
                stripe_customer_id TEXT,
                stripe_subscription_id TEXT,
                mp_subscription_id TEXT,
                rebill_customer_id TEXT,
                rebill_subscription_id TEXT,
                current_period_end TIMESTAMPTZ,
                trial_ends_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chat_messages_user ON chat_messages(user_id, created_at DESC)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_subscriptions_stripe ON subscriptions(stripe_customer_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_subscriptions_rebill ON subscriptions(rebill_subscription_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl Store for Database {
    // ── Credentials ────────────────────────────────────────────────

    async fn api_keys(&self, user_id: Uuid) -> anyhow::Result<Vec<ApiKeyRecord>> {
        let keys = sqlx::query_as::<_, ApiKeyRecord>(
            "SELECT user_id, provider, api_key, created_at FROM api_keys WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }

    // ── Agent Identity ─────────────────────────────────────────────

    async fn agent_config(&self, user_id: Uuid) -> anyhow::Result<Option<AgentConfig>> {
        let cfg = sqlx::query_as::<_, AgentConfig>("SELECT * FROM agent_config WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(cfg)
    }

    async fn complete_bootstrap(
        &self,
        user_id: Uuid,
        identity: &ParsedIdentity,
    ) -> anyhow::Result<bool> {
        // The WHERE on the conflict branch keeps bootstrap_done monotonic:
        // a second completion racing the first updates nothing.
        let result = sqlx::query(
            r#"
            INSERT INTO agent_config
                (user_id, agent_name, agent_emoji, agent_vibe, soul_md, identity_md, bootstrap_done)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE)
            ON CONFLICT (user_id) DO UPDATE SET
                agent_name = EXCLUDED.agent_name,
                agent_emoji = COALESCE(EXCLUDED.agent_emoji, agent_config.agent_emoji),
                agent_vibe = COALESCE(EXCLUDED.agent_vibe, agent_config.agent_vibe),
                soul_md = COALESCE(EXCLUDED.soul_md, agent_config.soul_md),
                identity_md = COALESCE(EXCLUDED.identity_md, agent_config.identity_md),
                bootstrap_done = TRUE,
                updated_at = NOW()
            WHERE agent_config.bootstrap_done = FALSE
            "#,
        )
        .bind(user_id)
        .bind(&identity.name)
        .bind(identity.emoji.as_deref())
        .bind(identity.vibe.as_deref())
        .bind(identity.soul.as_deref())
        .bind(identity.identity.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ── Telegram ───────────────────────────────────────────────────

    async fn telegram_config_by_token(
        &self,
        bot_token: &str,
    ) -> anyhow::Result<Option<TelegramConfig>> {
        let cfg = sqlx::query_as::<_, TelegramConfig>(
            "SELECT * FROM telegram_config WHERE bot_token = $1",
        )
        .bind(bot_token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(cfg)
    }

    async fn upsert_telegram_config(&self, config: &TelegramConfig) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO telegram_config
                (user_id, bot_token, bot_username, bot_name, status, webhook_active, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                bot_token = EXCLUDED.bot_token,
                bot_username = EXCLUDED.bot_username,
                bot_name = EXCLUDED.bot_name,
                status = EXCLUDED.status,
                webhook_active = EXCLUDED.webhook_active,
                updated_at = NOW()
            "#,
        )
        .bind(config.user_id)
        .bind(&config.bot_token)
        .bind(config.bot_username.as_deref())
        .bind(config.bot_name.as_deref())
        .bind(&config.status)
        .bind(config.webhook_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_telegram_status(
        &self,
        user_id: Uuid,
        status: TelegramStatus,
        webhook_active: bool,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE telegram_config SET status = $2, webhook_active = $3, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(status.as_str())
        .bind(webhook_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_telegram_config(&self, user_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM telegram_config WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Chat History ───────────────────────────────────────────────

    async fn recent_messages(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<ChatMessageRow>> {
        let msgs = sqlx::query_as::<_, ChatMessageRow>(
            "SELECT * FROM chat_messages WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(msgs)
    }

    async fn append_messages(&self, messages: &[NewChatMessage]) -> anyhow::Result<()> {
        // One transaction so a turn is stored whole; clock_timestamp() keeps
        // the user turn strictly before the assistant turn.
        let mut tx = self.pool.begin().await?;
        for msg in messages {
            sqlx::query(
                "INSERT INTO chat_messages (user_id, role, content, provider) VALUES ($1, $2, $3, $4)",
            )
            .bind(msg.user_id)
            .bind(msg.role.as_str())
            .bind(&msg.content)
            .bind(&msg.provider)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ── Subscriptions ──────────────────────────────────────────────

    async fn subscription(&self, user_id: Uuid) -> anyhow::Result<Option<Subscription>> {
        let sub = sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sub)
    }

    async fn apply_subscription(
        &self,
        user_id: Uuid,
        patch: &SubscriptionPatch,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (user_id, plan, status, stripe_customer_id, stripe_subscription_id,
                 mp_subscription_id, rebill_customer_id, rebill_subscription_id,
                 current_period_end, trial_ends_at, updated_at)
            VALUES ($1, COALESCE($2, 'starter'), COALESCE($3, 'active'), $4, $5, $6, $7, $8, $9, $10, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                plan = COALESCE($2, subscriptions.plan),
                status = COALESCE($3, subscriptions.status),
                stripe_customer_id = COALESCE($4, subscriptions.stripe_customer_id),
                stripe_subscription_id = COALESCE($5, subscriptions.stripe_subscription_id),
                mp_subscription_id = COALESCE($6, subscriptions.mp_subscription_id),
                rebill_customer_id = COALESCE($7, subscriptions.rebill_customer_id),
                rebill_subscription_id = COALESCE($8, subscriptions.rebill_subscription_id),
                current_period_end = COALESCE($9, subscriptions.current_period_end),
                trial_ends_at = COALESCE($10, subscriptions.trial_ends_at),
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(patch.plan.as_deref())
        .bind(patch.status.as_deref())
        .bind(patch.stripe_customer_id.as_deref())
        .bind(patch.stripe_subscription_id.as_deref())
        .bind(patch.mp_subscription_id.as_deref())
        .bind(patch.rebill_customer_id.as_deref())
        .bind(patch.rebill_subscription_id.as_deref())
        .bind(patch.current_period_end)
        .bind(patch.trial_ends_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn user_by_stripe_customer(&self, customer_id: &str) -> anyhow::Result<Option<Uuid>> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT user_id FROM subscriptions WHERE stripe_customer_id = $1 LIMIT 1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.0))
    }

    async fn user_by_rebill_subscription(
        &self,
        subscription_id: &str,
    ) -> anyhow::Result<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT user_id FROM subscriptions WHERE rebill_subscription_id = $1 LIMIT 1",
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }
}
