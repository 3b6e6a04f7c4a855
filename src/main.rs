mod config;
mod decision;
mod dedup;
mod gate;
mod llm;
mod platform;
mod relay;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::llm::LlmClient;
use crate::platform::telegram::TelegramSender;
use crate::relay::Relay;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mfg_office_bot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Model: {} via {}", config.llm.model, config.llm.provider);
    info!("  Supervisor chat: {:?}", config.telegram.supervisor_chat_id);
    info!("  Allowed chats: {:?}", config.telegram.allowed_chat_ids);
    info!(
        "  Policy: reply={:?} escalation={:?} dedup_key={:?} cooldown={}h",
        config.policy.reply,
        config.policy.escalation,
        config.policy.dedup_key,
        config.policy.cooldown_hours
    );

    let model = Arc::new(LlmClient::new(config.llm.clone()));
    let sender = Arc::new(TelegramSender::new(&config.telegram.bot_token));
    let relay = Arc::new(Relay::new(&config, model, sender)?);

    info!("Bot is starting...");
    server::serve(relay, &config.server).await?;

    Ok(())
}
