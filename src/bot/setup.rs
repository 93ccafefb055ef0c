use chrono::Utc;
use reqwest::Url;
use teloxide::prelude::*;
use teloxide::types::AllowedUpdate;
use uuid::Uuid;

use crate::bot::{bot_id, TelegramGateway};
use crate::db::models::{TelegramConfig, TelegramStatus};
use crate::db::Store;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Invalid bot token: {0}")]
    InvalidToken(String),
    #[error("Failed to set webhook: {0}")]
    Webhook(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connected {
    pub webhook_url: String,
    pub bot_username: Option<String>,
}

/// Where Telegram should deliver updates for `token`.
pub fn webhook_url(app_url: &str, token: &str) -> String {
    format!(
        "{}/api/telegram/webhook?token={}",
        app_url.trim_end_matches('/'),
        urlencoding::encode(token)
    )
}

/// Validate `token`, point its webhook at us and remember the bot for
/// `user_id` when one is given.
pub async fn connect(
    store: &dyn Store,
    telegram: &TelegramGateway,
    app_url: &str,
    token: &str,
    user_id: Option<Uuid>,
) -> Result<Connected, SetupError> {
    let bot = telegram.bot(token);

    let me = bot
        .get_me()
        .await
        .map_err(|e| SetupError::InvalidToken(e.to_string()))?;

    let webhook_url = webhook_url(app_url, token);
    let url = Url::parse(&webhook_url).map_err(anyhow::Error::from)?;

    if let Err(e) = bot
        .set_webhook(url)
        .allowed_updates(vec![AllowedUpdate::Message])
        .drop_pending_updates(true)
        .await
    {
        tracing::error!("[Telegram] setWebhook failed for bot {}: {}", bot_id(token), e);
        if let Some(user_id) = user_id {
            store
                .set_telegram_status(user_id, TelegramStatus::Error, false)
                .await?;
        }
        return Err(SetupError::Webhook(e.to_string()));
    }

    if let Some(user_id) = user_id {
        store
            .upsert_telegram_config(&TelegramConfig {
                user_id,
                bot_token: token.to_string(),
                bot_username: me.username.clone(),
                bot_name: Some(me.first_name.clone()),
                status: TelegramStatus::Connected.as_str().to_string(),
                webhook_active: true,
                updated_at: Utc::now(),
            })
            .await?;
    }

    tracing::info!(
        "[Telegram] Bot {} (@{}) connected",
        bot_id(token),
        me.username.as_deref().unwrap_or("?")
    );

    Ok(Connected {
        webhook_url,
        bot_username: me.username.clone(),
    })
}

/// Remove the webhook, then forget the bot. A failed removal does not stop
/// the row from being deleted.
pub async fn disconnect(
    store: &dyn Store,
    telegram: &TelegramGateway,
    token: &str,
    user_id: Option<Uuid>,
) -> Result<(), SetupError> {
    if let Err(e) = telegram.bot(token).delete_webhook().await {
        tracing::warn!("[Telegram] deleteWebhook failed for bot {}: {}", bot_id(token), e);
    }

    if let Some(user_id) = user_id {
        store.delete_telegram_config(user_id).await?;
    }

    tracing::info!("[Telegram] Bot {} disconnected", bot_id(token));
    Ok(())
}
