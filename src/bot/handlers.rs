use teloxide::prelude::*;
use teloxide::types::{ChatAction, Update, UpdateKind};
use uuid::Uuid;

use crate::agent::identity::Channel;
use crate::agent::session::AgentSession;
use crate::ai::llm::{ChatMessage, LlmClient, Role, SIN_RESPUESTA};
use crate::ai::provider::{select_provider, Provider};
use crate::bot::delivery::send_reply;
use crate::bot::{bot_id, TelegramGateway};
use crate::db::models::NewChatMessage;
use crate::db::Store;

pub const NOT_CONFIGURED: &str = "Este bot no esta configurado correctamente.";
pub const NO_API_KEYS: &str =
    "No hay API keys configuradas. Configura una en el dashboard de OpenClaw.";
pub const PROVIDER_FAILED: &str = "Hubo un error procesando tu mensaje. Intenta de nuevo.";

/// Turns of history sent along with each new message.
const HISTORY_WINDOW: i64 = 10;

/// Process one inbound update for the bot identified by `token`.
///
/// Only text messages from humans are answered; everything else is dropped.
pub async fn handle_update(
    store: &dyn Store,
    llm: &LlmClient,
    telegram: &TelegramGateway,
    token: &str,
    update: Update,
) -> anyhow::Result<()> {
    let UpdateKind::Message(msg) = update.kind else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }

    let bot = telegram.bot(token);
    let chat_id = msg.chat.id;

    // ── 1. Resolve the owning user ─────────────────────────────────

    let Some(config) = store.telegram_config_by_token(token).await? else {
        tracing::warn!("[Telegram] Update for unknown bot {}", bot_id(token));
        send_reply(&bot, chat_id, NOT_CONFIGURED).await;
        return Ok(());
    };
    let user_id = config.user_id;

    // ── 2. Pick a provider and its key ─────────────────────────────

    let keys = store.api_keys(user_id).await?;
    let configured: Vec<(Provider, String)> = keys
        .into_iter()
        .filter_map(|k| Some((k.provider.parse().ok()?, k.api_key)))
        .collect();

    let Some(provider) = select_provider(configured.iter().map(|(p, _)| *p)) else {
        send_reply(&bot, chat_id, NO_API_KEYS).await;
        return Ok(());
    };
    let api_key = configured
        .iter()
        .find(|(p, _)| *p == provider)
        .map(|(_, key)| key.as_str())
        .unwrap_or_default();

    // ── 3. Build the conversation ──────────────────────────────────

    let mut messages = history(store, user_id).await?;
    messages.push(ChatMessage::new(Role::User, text));

    let session = AgentSession::load(store, user_id).await?;
    let system_prompt = session.system_prompt(Channel::Telegram);

    // ── 4. Ask the model ───────────────────────────────────────────

    if let Err(e) = bot.send_chat_action(chat_id, ChatAction::Typing).await {
        tracing::warn!("[Telegram] sendChatAction failed for chat {}: {}", chat_id.0, e);
    }

    let reply = match llm
        .complete(provider, api_key, &system_prompt, &messages, SIN_RESPUESTA)
        .await
    {
        Ok(raw) => {
            let shown = session.absorb_reply(store, &raw, SIN_RESPUESTA).await;
            store
                .append_messages(&[
                    NewChatMessage {
                        user_id,
                        role: Role::User,
                        content: text.to_string(),
                        provider: "telegram".to_string(),
                    },
                    NewChatMessage {
                        user_id,
                        role: Role::Assistant,
                        content: shown.clone(),
                        provider: provider.as_str().to_string(),
                    },
                ])
                .await?;
            shown
        }
        Err(e) => {
            tracing::error!(
                "[Telegram] {} call failed for user {}: {}",
                provider.display_name(),
                user_id,
                e
            );
            PROVIDER_FAILED.to_string()
        }
    };

    // ── 5. Deliver ─────────────────────────────────────────────────

    send_reply(&bot, chat_id, &reply).await;
    Ok(())
}

/// Last turns for `user_id`, oldest first.
async fn history(store: &dyn Store, user_id: Uuid) -> anyhow::Result<Vec<ChatMessage>> {
    let mut rows = store.recent_messages(user_id, HISTORY_WINDOW).await?;
    rows.reverse();

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let role = match row.role.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                _ => return None,
            };
            Some(ChatMessage::new(role, row.content))
        })
        .collect())
}
