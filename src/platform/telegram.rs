use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use teloxide::prelude::*;
use tracing::debug;

use crate::platform::{ChatSender, IncomingMessage};

/// Telegram's hard limit is 4096; stay under it.
const MAX_MESSAGE_LEN: usize = 4000;

/// Webhook update, reduced to what the relay reads. Every field the relay can
/// live without is optional so odd payloads still decode.
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    #[serde(default)]
    pub update_id: Option<i64>,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub date: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl TelegramUser {
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !name.is_empty() {
            return name;
        }
        self.username
            .clone()
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

pub fn parse_update(body: &[u8]) -> Result<TelegramUpdate> {
    serde_json::from_slice(body).context("Failed to decode Telegram update")
}

impl TelegramMessage {
    pub fn is_from_bot(&self) -> bool {
        self.from.as_ref().is_some_and(|u| u.is_bot)
    }

    /// Convert to the relay's message type. `None` for messages without text.
    pub fn to_incoming(&self) -> Option<IncomingMessage> {
        let text = self.text.as_deref().filter(|t| !t.trim().is_empty())?;

        let (sender_id, sender_name, sender_handle) = match &self.from {
            Some(user) => (user.id, user.display_name(), user.username.clone()),
            None => (self.chat.id, "Unknown".to_string(), None),
        };

        let sent_at = self
            .date
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);

        Some(IncomingMessage {
            chat_id: self.chat.id,
            group_name: self.chat.title.clone(),
            sender_id,
            sender_name,
            sender_handle,
            text: text.to_string(),
            sent_at,
        })
    }
}

/// Split long messages for Telegram's 4096 char limit
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Sends through the Bot API with teloxide.
pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }
}

#[async_trait]
impl ChatSender for TelegramSender {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            self.bot
                .send_message(ChatId(chat_id), chunk)
                .await
                .with_context(|| format!("Failed to send message to chat {}", chat_id))?;
        }
        debug!("Delivered {} chars to chat {}", text.len(), chat_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_update() {
        let body = br#"{
            "update_id": 1,
            "message": {
                "message_id": 10,
                "chat": {"id": -1001, "title": "MFG Agents", "type": "supergroup"},
                "from": {"id": 7, "is_bot": false, "first_name": "Dana", "last_name": "Lee", "username": "dlee"},
                "text": "What is the process for a rollover?",
                "date": 1767600000
            }
        }"#;
        let update = parse_update(body).unwrap();
        let message = update.message.unwrap();
        let incoming = message.to_incoming().unwrap();

        assert_eq!(incoming.chat_id, -1001);
        assert_eq!(incoming.group_name.as_deref(), Some("MFG Agents"));
        assert_eq!(incoming.sender_id, 7);
        assert_eq!(incoming.sender_name, "Dana Lee");
        assert_eq!(incoming.sender_handle.as_deref(), Some("dlee"));
        assert_eq!(incoming.text, "What is the process for a rollover?");
        assert_eq!(incoming.sent_at.timestamp(), 1767600000);
    }

    #[test]
    fn test_update_without_message_decodes() {
        let update = parse_update(br#"{"update_id": 5, "edited_message": {}}"#).unwrap();
        assert!(update.message.is_none());
        let update = parse_update(b"{}").unwrap();
        assert!(update.message.is_none());
    }

    #[test]
    fn test_non_text_message_has_no_incoming() {
        let update = parse_update(
            br#"{"message": {"chat": {"id": 1}, "from": {"id": 2}, "photo": []}}"#,
        )
        .unwrap();
        assert!(update.message.unwrap().to_incoming().is_none());

        let update =
            parse_update(br#"{"message": {"chat": {"id": 1}, "text": "   "}}"#).unwrap();
        assert!(update.message.unwrap().to_incoming().is_none());
    }

    #[test]
    fn test_malformed_bodies_are_errors() {
        assert!(parse_update(b"not json").is_err());
        assert!(parse_update(br#"{"message": {"text": "no chat"}}"#).is_err());
    }

    #[test]
    fn test_display_name_fallbacks() {
        let user = |first: Option<&str>, last: Option<&str>, username: Option<&str>| TelegramUser {
            id: 1,
            is_bot: false,
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
            username: username.map(str::to_string),
        };
        assert_eq!(user(Some("Dana"), None, None).display_name(), "Dana");
        assert_eq!(user(None, None, Some("dlee")).display_name(), "dlee");
        assert_eq!(user(None, None, None).display_name(), "Unknown");
    }

    #[test]
    fn test_missing_sender_falls_back_to_chat() {
        let update =
            parse_update(br#"{"message": {"chat": {"id": 99}, "text": "help"}}"#).unwrap();
        let message = update.message.unwrap();
        assert!(!message.is_from_bot());
        let incoming = message.to_incoming().unwrap();
        assert_eq!(incoming.sender_id, 99);
        assert_eq!(incoming.sender_name, "Unknown");
        assert!(incoming.group_name.is_none());
    }

    #[test]
    fn test_bot_sender_detected() {
        let update = parse_update(
            br#"{"message": {"chat": {"id": 1}, "from": {"id": 2, "is_bot": true}, "text": "hi?"}}"#,
        )
        .unwrap();
        assert!(update.message.unwrap().is_from_bot());
    }

    #[test]
    fn test_split_message_short() {
        assert_eq!(split_message("hello", 4000), vec!["hello".to_string()]);
    }

    #[test]
    fn test_split_message_on_boundaries() {
        let text = format!("{}\n{}", "a".repeat(30), "b".repeat(30));
        let chunks = split_message(&text, 40);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{}\n", "a".repeat(30)));
        assert_eq!(chunks[1], "b".repeat(30));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_split_message_utf8_safe() {
        let text = "é".repeat(50);
        let chunks = split_message(&text, 15);
        assert!(chunks.iter().all(|c| c.len() <= 15));
        assert_eq!(chunks.concat(), text);
    }
}
