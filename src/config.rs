use anyhow::{Context, Result};
use chrono::TimeDelta;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

use crate::dedup::DedupKeyPolicy;
use crate::relay::{EscalationPolicy, ReplyPolicy};

/// Sampling temperature is pinned low so decisions stay repeatable.
const MAX_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Openai,
    Openrouter,
    Ollama,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Openai => write!(f, "openai"),
            LlmProvider::Openrouter => write!(f, "openrouter"),
            LlmProvider::Ollama => write!(f, "ollama"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: default_model(),
            base_url: String::new(),
            api_key: String::new(),
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            system_prompt: default_system_prompt(),
        }
    }
}

impl LlmConfig {
    /// Returns the effective base_url: if the stored value is empty,
    /// fall back to the canonical URL for the configured provider.
    pub fn effective_base_url(&self) -> &str {
        if !self.base_url.is_empty() {
            return &self.base_url;
        }
        match self.provider {
            LlmProvider::Openai => "https://api.openai.com/v1",
            LlmProvider::Openrouter => "https://openrouter.ai/api/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Where escalations go. Unset disables escalation.
    pub supervisor_chat_id: Option<i64>,
    /// Name the supervisor goes by in logs and fallback notes.
    pub supervisor_name: String,
    /// Empty means every chat is served.
    pub allowed_chat_ids: Vec<i64>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            supervisor_chat_id: None,
            supervisor_name: "Chris".to_string(),
            allowed_chat_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub webhook_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
            webhook_path: "/webhook".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PolicyConfig {
    pub reply: ReplyPolicy,
    pub fallback_reply: String,
    pub escalation: EscalationPolicy,
    pub dedup_key: DedupKeyPolicy,
    pub cooldown_hours: u32,
    pub mask_amounts: bool,
    /// IANA zone used for the escalation timestamp.
    pub timezone: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            reply: ReplyPolicy::default(),
            fallback_reply: default_fallback_reply(),
            escalation: EscalationPolicy::default(),
            dedup_key: DedupKeyPolicy::default(),
            cooldown_hours: 24,
            mask_amounts: true,
            timezone: "America/New_York".to_string(),
        }
    }
}

impl PolicyConfig {
    pub fn cooldown(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.cooldown_hours))
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {}", self.timezone, e))
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub policy: PolicyConfig,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    600
}

fn default_fallback_reply() -> String {
    "Thanks, I saw this. Can you share a bit more detail so I can point you \
     to the right next step?"
        .to_string()
}

fn default_system_prompt() -> String {
    "You are the office assistant for an insurance and retirement planning team. \
     Agents post questions in a group chat. Decide whether the message needs a \
     reply and whether it must be escalated to the supervisor, Chris.\n\
     Escalate anything involving annuities, replacements or 1035 exchanges, \
     rollovers, IRAs or 401k plans, commissions, large dollar amounts, or \
     anything you are not confident about.\n\
     Answer ONLY in this format, each label at the start of its own line:\n\
     MODE: <answer|clarify|escalate>\n\
     CONFIDENCE: <HIGH|MEDIUM|LOW>\n\
     ESCALATE: <YES|NO>\n\
     ESCALATE_REASON: <one line, or NONE>\n\
     USER_REPLY:\n<short reply to post in the group, or NONE>\n\
     DM_TO_CHRIS:\n<private note for Chris, or NONE>\n\
     EMAIL_TO_CHRIS:\n<optional email draft for Chris, or NONE>"
        .to_string()
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Load the optional TOML file at `path`, overlay the process environment,
    /// and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml_str(&content)?
        } else {
            info!(
                "No config file at {}, using defaults and environment",
                path.display()
            );
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from `lookup` (the environment in production). Empty
    /// values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(k))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };

        if let Some(token) = get(&["TELEGRAM_BOT_TOKEN", "BOT_TOKEN"]) {
            self.telegram.bot_token = token;
        }
        if let Some(id) = get(&["SUPERVISOR_CHAT_ID", "CHRIS_CHAT_ID"]) {
            let id = id
                .parse::<i64>()
                .with_context(|| format!("Invalid supervisor chat id: {}", id))?;
            self.telegram.supervisor_chat_id = Some(id);
        }
        if let Some(key) = get(&["OPENAI_API_KEY", "LLM_API_KEY"]) {
            self.llm.api_key = key;
        }
        if let Some(model) = get(&["LLM_MODEL", "OPENAI_MODEL"]) {
            self.llm.model = model;
        }
        if let Some(port) = get(&["PORT"]) {
            self.server.port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid PORT: {}", port))?;
        }
        Ok(())
    }

    /// Reject values that cannot work and clamp the ones that can.
    pub fn validate(&mut self) -> Result<()> {
        self.policy.tz()?;

        if self.policy.cooldown_hours == 0 {
            anyhow::bail!("policy.cooldown_hours must be at least 1");
        }

        if !self.server.webhook_path.starts_with('/') {
            self.server.webhook_path = format!("/{}", self.server.webhook_path);
        }
        if matches!(self.server.webhook_path.as_str(), "/" | "/health") {
            anyhow::bail!(
                "server.webhook_path {} collides with the health endpoint",
                self.server.webhook_path
            );
        }

        if !(0.0..=MAX_TEMPERATURE).contains(&self.llm.temperature) {
            warn!(
                "llm.temperature {} out of range, clamping to [0, {}]",
                self.llm.temperature, MAX_TEMPERATURE
            );
            self.llm.temperature = self.llm.temperature.clamp(0.0, MAX_TEMPERATURE);
        }

        if self.telegram.bot_token.is_empty() {
            warn!("No Telegram bot token configured; replies will fail");
        }
        if self.llm.api_key.is_empty() && self.llm.provider != LlmProvider::Ollama {
            warn!("No LLM API key configured; decision requests will fail");
        }
        if self.telegram.supervisor_chat_id.is_none() {
            warn!("No supervisor chat id configured; escalations are disabled");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.webhook_path, "/webhook");
        assert_eq!(config.policy.cooldown(), TimeDelta::hours(24));
        assert_eq!(config.policy.reply, ReplyPolicy::Silent);
        assert_eq!(config.policy.escalation, EscalationPolicy::Lenient);
        assert_eq!(config.policy.dedup_key, DedupKeyPolicy::Message);
        assert!(config.policy.mask_amounts);
        assert_eq!(config.telegram.supervisor_chat_id, None);
        assert_eq!(config.telegram.supervisor_name, "Chris");
        assert_eq!(config.llm.provider, LlmProvider::Openai);
        assert_eq!(config.llm.effective_base_url(), "https://api.openai.com/v1");
        assert!(config.llm.system_prompt.contains("DM_TO_CHRIS:"));
    }

    #[test]
    fn test_toml_sections() {
        let config = Config::from_toml_str(
            r#"
[telegram]
bot_token = "123:abc"
supervisor_chat_id = 42
allowed_chat_ids = [-1001, -1002]

[llm]
provider = "openrouter"
model = "openai/gpt-4o-mini"
temperature = 0.1

[server]
port = 8080

[policy]
reply = "fallback"
escalation = "strict"
dedup_key = "topic"
cooldown_hours = 12
timezone = "UTC"
"#,
        )
        .unwrap();

        assert_eq!(config.telegram.bot_token, "123:abc");
        assert_eq!(config.telegram.supervisor_chat_id, Some(42));
        assert_eq!(config.telegram.allowed_chat_ids, vec![-1001, -1002]);
        assert_eq!(config.llm.provider, LlmProvider::Openrouter);
        assert_eq!(config.llm.effective_base_url(), "https://openrouter.ai/api/v1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.policy.reply, ReplyPolicy::Fallback);
        assert_eq!(config.policy.escalation, EscalationPolicy::Strict);
        assert_eq!(config.policy.dedup_key, DedupKeyPolicy::Topic);
        assert_eq!(config.policy.cooldown(), TimeDelta::hours(12));
        assert_eq!(config.policy.tz().unwrap(), Tz::UTC);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                ("TELEGRAM_BOT_TOKEN", "tok"),
                ("CHRIS_CHAT_ID", "987654"),
                ("OPENAI_API_KEY", "sk-test"),
                ("PORT", "10000"),
                ("LLM_MODEL", "  "),
            ]))
            .unwrap();

        assert_eq!(config.telegram.bot_token, "tok");
        assert_eq!(config.telegram.supervisor_chat_id, Some(987654));
        assert_eq!(config.llm.api_key, "sk-test");
        assert_eq!(config.server.port, 10000);
        // blank values do not clobber defaults
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_supervisor_env_precedence() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[("SUPERVISOR_CHAT_ID", "1"), ("CHRIS_CHAT_ID", "2")]))
            .unwrap();
        assert_eq!(config.telegram.supervisor_chat_id, Some(1));
    }

    #[test]
    fn test_invalid_env_values_are_errors() {
        let mut config = Config::default();
        assert!(config.apply_overrides(env(&[("PORT", "http")])).is_err());
        assert!(config
            .apply_overrides(env(&[("SUPERVISOR_CHAT_ID", "chris")]))
            .is_err());
    }

    #[test]
    fn test_validate_clamps_and_rejects() {
        let mut config = Config::default();
        config.llm.temperature = 0.9;
        config.server.webhook_path = "hook".to_string();
        config.validate().unwrap();
        assert_eq!(config.llm.temperature, MAX_TEMPERATURE);
        assert_eq!(config.server.webhook_path, "/hook");

        let mut bad_tz = Config::default();
        bad_tz.policy.timezone = "Mars/Olympus".to_string();
        assert!(bad_tz.validate().is_err());

        let mut health_path = Config::default();
        health_path.server.webhook_path = "/health".to_string();
        assert!(health_path.validate().is_err());

        let mut no_cooldown = Config::default();
        no_cooldown.policy.cooldown_hours = 0;
        assert!(no_cooldown.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load(Path::new("/nonexistent/mfg-office-bot.toml")).unwrap();
        assert_eq!(config.server.webhook_path, "/webhook");
    }
}
