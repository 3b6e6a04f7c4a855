pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A text message received from the group chat
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub chat_id: i64,
    /// Group title, absent for private chats
    pub group_name: Option<String>,
    pub sender_id: i64,
    /// Display name of the sender
    pub sender_name: String,
    /// Username without the leading `@`
    pub sender_handle: Option<String>,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Outbound delivery of plain text to a chat.
#[async_trait]
pub trait ChatSender: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;
}
