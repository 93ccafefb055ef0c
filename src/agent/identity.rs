use std::sync::LazyLock;

use regex::Regex;

use crate::db::models::AgentConfig;

/// Prompt used until the agent has discovered who it is.
pub const BOOTSTRAP_PROMPT: &str = "Acabas de despertar. Sos un agente de OpenClaw recien creado y \
todavia no sabes quien sos. Conversa de forma natural con tu humano para descubrir juntos tu \
nombre, tu emoji, tu vibe (tu personalidad), tu soul (tus valores y como pensas) y tu identity \
(como te presentas). Hace una o dos preguntas por vez, sin formularios.\n\
Cuando tengas suficiente informacion, agrega al final de tu respuesta exactamente este bloque, \
con cada campo en una sola linea:\n\
---AGENT_CONFIG---\n\
nombre: ...\n\
emoji: ...\n\
vibe: ...\n\
soul: ...\n\
identity: ...\n\
---END_CONFIG---\n\
Responde en el idioma del usuario.";

/// Generic assistant prompt for agents with nothing configured.
pub const DEFAULT_PROMPT: &str = "Sos un asistente inteligente de OpenClaw. Responde de forma \
clara y util. Responde en el idioma del usuario.";

static CONFIG_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)---AGENT_CONFIG---(.*?)---END_CONFIG---").expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Unbootstrapped,
    Bootstrapped,
}

impl BootstrapState {
    /// A missing config row means the agent never bootstrapped.
    pub fn of(config: Option<&AgentConfig>) -> Self {
        match config {
            Some(cfg) if cfg.bootstrap_done => Self::Bootstrapped,
            _ => Self::Unbootstrapped,
        }
    }
}

/// Where the conversation is happening. Only changes the closing instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Web,
    Telegram,
}

impl Channel {
    fn closing_instruction(&self) -> &'static str {
        match self {
            Self::Web => "Responde en el idioma del usuario.",
            Self::Telegram => "Responde en el idioma del usuario. Este mensaje llega desde Telegram.",
        }
    }
}

/// Identity fields extracted from a completed `AGENT_CONFIG` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIdentity {
    pub name: String,
    pub emoji: Option<String>,
    pub vibe: Option<String>,
    pub soul: Option<String>,
    pub identity: Option<String>,
}

/// Find the config block in model output and parse it.
///
/// Returns `None` when there is no block or the block has no `nombre`.
pub fn parse_identity_block(text: &str) -> Option<ParsedIdentity> {
    let captures = CONFIG_BLOCK.captures(text)?;
    let body = captures.get(1)?.as_str();

    let mut name = None;
    let mut emoji = None;
    let mut vibe = None;
    let mut soul = None;
    let mut identity = None;

    for line in body.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let value = Some(value.to_string());
        match key.trim().to_lowercase().as_str() {
            "nombre" => name = value,
            "emoji" => emoji = value,
            "vibe" => vibe = value,
            "soul" => soul = value,
            "identity" => identity = value,
            _ => {}
        }
    }

    Some(ParsedIdentity {
        name: name?,
        emoji,
        vibe,
        soul,
        identity,
    })
}

/// Remove every config block from text shown to the user.
pub fn strip_identity_block(text: &str) -> String {
    CONFIG_BLOCK.replace_all(text, "").trim().to_string()
}

/// Pick the system prompt for the agent's current state.
pub fn build_system_prompt(config: Option<&AgentConfig>, channel: Channel) -> String {
    let cfg = match (BootstrapState::of(config), config) {
        (BootstrapState::Bootstrapped, Some(cfg)) => cfg,
        _ => return BOOTSTRAP_PROMPT.to_string(),
    };

    let mut parts: Vec<String> = Vec::new();

    if let Some(name) = non_empty(&cfg.agent_name) {
        parts.push(format!("Tu nombre es {}.", name));
    }
    if let Some(emoji) = non_empty(&cfg.agent_emoji) {
        parts.push(format!("Tu emoji es {}.", emoji));
    }
    if let Some(vibe) = non_empty(&cfg.agent_vibe) {
        parts.push(format!("Tu vibe: {}.", vibe));
    }
    if let Some(soul) = non_empty(&cfg.soul_md) {
        parts.push(format!("\n## SOUL.md\n{}", soul));
    }
    if let Some(identity) = non_empty(&cfg.identity_md) {
        parts.push(format!("\n## IDENTITY.md\n{}", identity));
    }
    if let Some(agents) = non_empty(&cfg.agents_md) {
        parts.push(format!("\n## AGENTS.md\n{}", agents));
    }

    if parts.is_empty() {
        return DEFAULT_PROMPT.to_string();
    }

    parts.push(format!("\n{}", channel.closing_instruction()));
    parts.join("\n")
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = "Me encanta! Entonces ya se quien soy.\n\
---AGENT_CONFIG---\n\
nombre: Nova\n\
emoji: ✨\n\
Vibe:  curiosa y directa \n\
soul: Ayudo sin rodeos.\n\
identity: Soy Nova, tu copiloto.\n\
---END_CONFIG---";

    fn bootstrapped() -> AgentConfig {
        AgentConfig {
            agent_name: Some("Nova".into()),
            agent_emoji: Some("✨".into()),
            agent_vibe: Some("curiosa".into()),
            soul_md: Some("Ayudo sin rodeos.".into()),
            identity_md: None,
            agents_md: Some("Delega cuando puedas.".into()),
            bootstrap_done: true,
            ..AgentConfig::empty(uuid::Uuid::nil())
        }
    }

    #[test]
    fn parses_complete_block() {
        let parsed = parse_identity_block(REPLY).unwrap();
        assert_eq!(parsed.name, "Nova");
        assert_eq!(parsed.emoji.as_deref(), Some("✨"));
        assert_eq!(parsed.vibe.as_deref(), Some("curiosa y directa"));
        assert_eq!(parsed.identity.as_deref(), Some("Soy Nova, tu copiloto."));
    }

    #[test]
    fn block_without_name_is_ignored() {
        let reply = "ok\n---AGENT_CONFIG---\nemoji: 🐙\nvibe: calma\n---END_CONFIG---";
        assert_eq!(parse_identity_block(reply), None);

        let blank = "---AGENT_CONFIG---\nnombre:   \n---END_CONFIG---";
        assert_eq!(parse_identity_block(blank), None);
    }

    #[test]
    fn unterminated_block_is_not_parsed() {
        assert_eq!(parse_identity_block("---AGENT_CONFIG---\nnombre: Nova\n"), None);
    }

    #[test]
    fn stripping_hides_the_block() {
        let shown = strip_identity_block(REPLY);
        assert_eq!(shown, "Me encanta! Entonces ya se quien soy.");
        assert!(!shown.contains("AGENT_CONFIG"));
    }

    #[test]
    fn unbootstrapped_always_gets_bootstrap_prompt() {
        assert_eq!(build_system_prompt(None, Channel::Web), BOOTSTRAP_PROMPT);

        let mut cfg = bootstrapped();
        cfg.bootstrap_done = false;
        assert_eq!(build_system_prompt(Some(&cfg), Channel::Telegram), BOOTSTRAP_PROMPT);
    }

    #[test]
    fn bootstrapped_prompt_is_assembled_in_order() {
        let prompt = build_system_prompt(Some(&bootstrapped()), Channel::Telegram);

        let name = prompt.find("Tu nombre es Nova.").unwrap();
        let emoji = prompt.find("Tu emoji es ✨.").unwrap();
        let vibe = prompt.find("Tu vibe: curiosa.").unwrap();
        let soul = prompt.find("## SOUL.md\nAyudo sin rodeos.").unwrap();
        let agents = prompt.find("## AGENTS.md\nDelega cuando puedas.").unwrap();
        assert!(name < emoji && emoji < vibe && vibe < soul && soul < agents);
        assert!(!prompt.contains("## IDENTITY.md"));
        assert!(prompt.ends_with("Este mensaje llega desde Telegram."));
    }

    #[test]
    fn bootstrapped_without_fields_falls_back_to_default() {
        let cfg = AgentConfig {
            bootstrap_done: true,
            ..AgentConfig::empty(uuid::Uuid::nil())
        };
        assert_eq!(build_system_prompt(Some(&cfg), Channel::Web), DEFAULT_PROMPT);
    }
}
