use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,

    /// Public base URL of this deployment. Telegram webhooks and checkout
    /// redirects are built from it.
    pub app_url: String,

    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_price_id: Option<String>,
    pub mercadopago_access_token: Option<String>,
    pub rebill_api_key: Option<String>,
    pub rebill_plan_id: Option<String>,

    pub upstreams: Upstreams,
}

/// Base URLs of every third-party API we talk to. Overridable so tests and
/// staging can point at mocks.
#[derive(Debug, Clone, Deserialize)]
pub struct Upstreams {
    pub anthropic: String,
    pub openai: String,
    pub google: String,
    pub groq: String,
    pub telegram: String,
    pub stripe: String,
    pub mercadopago: String,
    pub rebill: String,
}

impl Default for Upstreams {
    fn default() -> Self {
        Self {
            anthropic: "https://api.anthropic.com".to_string(),
            openai: "https://api.openai.com".to_string(),
            google: "https://generativelanguage.googleapis.com".to_string(),
            groq: "https://api.groq.com/openai".to_string(),
            telegram: "https://api.telegram.org".to_string(),
            stripe: "https://api.stripe.com".to_string(),
            mercadopago: "https://api.mercadopago.com".to_string(),
            rebill: "https://api.rebill.com/v3".to_string(),
        }
    }
}

impl Upstreams {
    fn from_env() -> Self {
        let defaults = Self::default();
        let pick = |key: &str, default: String| {
            optional_var(key)
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(default)
        };

        Self {
            anthropic: pick("ANTHROPIC_BASE_URL", defaults.anthropic),
            openai: pick("OPENAI_BASE_URL", defaults.openai),
            google: pick("GOOGLE_BASE_URL", defaults.google),
            groq: pick("GROQ_BASE_URL", defaults.groq),
            telegram: pick("TELEGRAM_API_URL", defaults.telegram),
            stripe: pick("STRIPE_API_URL", defaults.stripe),
            mercadopago: pick("MERCADOPAGO_API_URL", defaults.mercadopago),
            rebill: pick("REBILL_API_URL", defaults.rebill),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")?,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3333".to_string()),
            app_url: std::env::var("APP_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:3333".to_string()),
            stripe_secret_key: optional_var("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: optional_var("STRIPE_WEBHOOK_SECRET"),
            stripe_price_id: optional_var("STRIPE_PRICE_ID"),
            mercadopago_access_token: optional_var("MERCADOPAGO_ACCESS_TOKEN"),
            rebill_api_key: optional_var("REBILL_API_KEY"),
            rebill_plan_id: optional_var("REBILL_PLAN_ID"),
            upstreams: Upstreams::from_env(),
        })
    }
}

/// Empty values count as unset.
fn optional_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
impl AppConfig {
    /// Every upstream pointed at one mock server, every processor configured.
    pub fn for_tests(upstream: &str) -> Self {
        Self {
            database_url: "postgres://localhost/openclaw_test".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            app_url: "https://app.example".to_string(),
            stripe_secret_key: Some("sk_test_123".to_string()),
            stripe_webhook_secret: Some("whsec_test".to_string()),
            stripe_price_id: Some("price_pro".to_string()),
            mercadopago_access_token: Some("APP_USR-test".to_string()),
            rebill_api_key: Some("rb_key".to_string()),
            rebill_plan_id: Some("plan_pro".to_string()),
            upstreams: Upstreams {
                anthropic: upstream.to_string(),
                openai: upstream.to_string(),
                google: upstream.to_string(),
                groq: format!("{upstream}/openai"),
                telegram: upstream.to_string(),
                stripe: upstream.to_string(),
                mercadopago: upstream.to_string(),
                rebill: upstream.to_string(),
            },
        }
    }
}
