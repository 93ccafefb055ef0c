pub mod delivery;
pub mod handlers;
pub mod setup;

use teloxide::Bot;

/// Builds `teloxide::Bot` handles for the many user-owned bots we serve.
///
/// teloxide pins its own reqwest, so the gateway keeps a token-less template
/// bot built on `teloxide::net` settings and clones its client per token.
#[derive(Clone)]
pub struct TelegramGateway {
    template: Bot,
}

impl TelegramGateway {
    pub fn new(api_url: &str) -> anyhow::Result<Self> {
        let client = teloxide::net::default_reqwest_settings().build()?;
        let template = Bot::with_client("", client).set_api_url(api_url.parse()?);
        Ok(Self { template })
    }

    pub fn bot(&self, token: &str) -> Bot {
        Bot::with_client(token, self.template.client().clone())
            .set_api_url(self.template.api_url())
    }
}

/// The numeric id before the colon. Safe to log, unlike the full token.
pub fn bot_id(token: &str) -> &str {
    token.split(':').next().unwrap_or_default()
}
