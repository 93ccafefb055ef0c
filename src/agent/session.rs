use uuid::Uuid;

use crate::agent::identity::{
    build_system_prompt, parse_identity_block, strip_identity_block, BootstrapState, Channel,
};
use crate::db::models::AgentConfig;
use crate::db::Store;

/// One user's agent for the duration of a single chat turn.
pub struct AgentSession {
    user_id: Uuid,
    config: Option<AgentConfig>,
}

impl AgentSession {
    pub async fn load(store: &dyn Store, user_id: Uuid) -> anyhow::Result<Self> {
        let config = store.agent_config(user_id).await?;
        Ok(Self { user_id, config })
    }

    pub fn state(&self) -> BootstrapState {
        BootstrapState::of(self.config.as_ref())
    }

    pub fn system_prompt(&self, channel: Channel) -> String {
        build_system_prompt(self.config.as_ref(), channel)
    }

    /// Turn raw model output into the text the user sees, persisting a
    /// discovered identity on the way.
    ///
    /// Never returns blank text: a reply that is only a config block becomes
    /// a confirmation when this call completed bootstrap, `empty_reply`
    /// otherwise. Persistence failures are logged; the reply is still
    /// delivered.
    pub async fn absorb_reply(&self, store: &dyn Store, raw: &str, empty_reply: &str) -> String {
        let shown = strip_identity_block(raw);

        let identity = match self.state() {
            BootstrapState::Bootstrapped => None,
            BootstrapState::Unbootstrapped => parse_identity_block(raw),
        };

        let mut bootstrapped_now = false;
        if let Some(identity) = &identity {
            match store.complete_bootstrap(self.user_id, identity).await {
                Ok(true) => {
                    tracing::info!("Agent for user {} bootstrapped as {}", self.user_id, identity.name);
                    bootstrapped_now = true;
                }
                Ok(false) => {
                    tracing::info!(
                        "Agent for user {} was already bootstrapped, keeping stored identity",
                        self.user_id
                    );
                }
                Err(e) => {
                    tracing::error!("Failed to persist identity for user {}: {:#}", self.user_id, e);
                }
            }
        }

        if !shown.is_empty() {
            return shown;
        }
        match identity {
            Some(identity) if bootstrapped_now => {
                let emoji = identity.emoji.as_deref().unwrap_or("✨");
                format!("{} Listo, ya se quien soy: {}.", emoji, identity.name)
            }
            _ => empty_reply.to_string(),
        }
    }
}
