use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The LLM backends a user can attach a key for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAi,
    Google,
    Groq,
}

/// Order used when the caller does not pin a provider.
pub const PRIORITY: [Provider; 4] = [
    Provider::Anthropic,
    Provider::OpenAi,
    Provider::Google,
    Provider::Groq,
];

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
            Self::Groq => "groq",
        }
    }

    /// Name used in user-facing error strings.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Anthropic => "Anthropic",
            Self::OpenAi => "OpenAI",
            Self::Google => "Google",
            Self::Groq => "Groq",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "google" => Ok(Self::Google),
            "groq" => Ok(Self::Groq),
            other => anyhow::bail!("unknown provider: {other}"),
        }
    }
}

/// Pick the highest-priority provider among the ones a user has keys for.
pub fn select_provider<I>(configured: I) -> Option<Provider>
where
    I: IntoIterator<Item = Provider>,
{
    let configured: Vec<Provider> = configured.into_iter().collect();
    PRIORITY.into_iter().find(|p| configured.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_beats_groq() {
        assert_eq!(
            select_provider([Provider::Groq, Provider::Google]),
            Some(Provider::Google)
        );
    }

    #[test]
    fn anthropic_beats_openai() {
        assert_eq!(
            select_provider([Provider::OpenAi, Provider::Anthropic]),
            Some(Provider::Anthropic)
        );
    }

    #[test]
    fn nothing_configured_selects_none() {
        assert_eq!(select_provider(Vec::new()), None);
    }

    #[test]
    fn parses_stored_tags() {
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!(" Groq ".parse::<Provider>().unwrap(), Provider::Groq);
        assert!("mistral".parse::<Provider>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_tags() {
        let p: Provider = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(p, Provider::OpenAi);
        assert_eq!(serde_json::to_string(&Provider::Google).unwrap(), "\"google\"");
    }
}
