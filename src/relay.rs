use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::{Config, PolicyConfig};
use crate::decision::{Confidence, Decision, EscalateSignal};
use crate::dedup::{dedup_key, EscalationCache};
use crate::gate::{detect_topic, should_respond, Topic};
use crate::llm::DecisionModel;
use crate::platform::telegram::TelegramUpdate;
use crate::platform::{ChatSender, IncomingMessage};

/// What to do when the model gives no reply text.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplyPolicy {
    /// Stay quiet.
    #[default]
    Silent,
    /// Post the configured fallback prompt.
    Fallback,
}

/// Which decisions trigger an escalation.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EscalationPolicy {
    /// Only an explicit `ESCALATE: YES`.
    #[default]
    Lenient,
    /// Also low, missing or unreadable confidence, and an unreadable ESCALATE.
    Strict,
}

impl EscalationPolicy {
    pub fn wants_escalation(&self, decision: &Decision) -> bool {
        match self {
            EscalationPolicy::Lenient => decision.escalate == EscalateSignal::Yes,
            EscalationPolicy::Strict => {
                decision.escalate != EscalateSignal::No
                    || matches!(decision.confidence, None | Some(Confidence::Low))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoMessage,
    NoText,
    FromBot,
    ChatNotAllowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Skipped,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    NotRequested,
    NoSupervisor,
    Suppressed,
    Sent,
    Failed,
}

/// Where a webhook delivery ended up. Every variant is acknowledged with
/// success to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ignored(IgnoreReason),
    Gated,
    DecisionFailed,
    Handled {
        reply: Delivery,
        escalation: EscalationOutcome,
    },
}

/// Gate, decide, reply and escalate for one inbound message at a time.
pub struct Relay {
    model: Arc<dyn DecisionModel>,
    sender: Arc<dyn ChatSender>,
    dedup: EscalationCache,
    policy: PolicyConfig,
    tz: Tz,
    supervisor_chat_id: Option<i64>,
    supervisor_name: String,
    allowed_chat_ids: Vec<i64>,
}

impl Relay {
    pub fn new(
        config: &Config,
        model: Arc<dyn DecisionModel>,
        sender: Arc<dyn ChatSender>,
    ) -> Result<Self> {
        Ok(Self {
            model,
            sender,
            dedup: EscalationCache::new(config.policy.cooldown()),
            tz: config.policy.tz()?,
            policy: config.policy.clone(),
            supervisor_chat_id: config.telegram.supervisor_chat_id,
            supervisor_name: config.telegram.supervisor_name.clone(),
            allowed_chat_ids: config.telegram.allowed_chat_ids.clone(),
        })
    }

    pub async fn handle_update(&self, update: TelegramUpdate) -> Outcome {
        let Some(message) = update.message else {
            debug!("Update {:?} carries no message", update.update_id);
            return Outcome::Ignored(IgnoreReason::NoMessage);
        };

        if message.is_from_bot() {
            return Outcome::Ignored(IgnoreReason::FromBot);
        }

        if !self.allowed_chat_ids.is_empty() && !self.allowed_chat_ids.contains(&message.chat.id)
        {
            debug!("Ignoring message from chat {} (not allowed)", message.chat.id);
            return Outcome::Ignored(IgnoreReason::ChatNotAllowed);
        }

        match message.to_incoming() {
            Some(incoming) => self.handle_message(&incoming).await,
            None => Outcome::Ignored(IgnoreReason::NoText),
        }
    }

    pub async fn handle_message(&self, msg: &IncomingMessage) -> Outcome {
        info!(
            "Message from {} ({}) in chat {}: {}",
            msg.sender_name, msg.sender_id, msg.chat_id, msg.text
        );

        if !should_respond(&msg.text) {
            debug!("Gated out message from {}", msg.sender_id);
            return Outcome::Gated;
        }

        let raw = match self.model.decide(&msg.text).await {
            Ok(raw) => raw,
            Err(e) => {
                error!("Decision request failed: {:#}", e);
                return Outcome::DecisionFailed;
            }
        };

        let Some(decision) = Decision::parse(&raw) else {
            error!("Unparsable decision output: {}", raw);
            return Outcome::DecisionFailed;
        };
        debug!(
            "Decision for {}: escalate={:?} confidence={:?} mode={:?}",
            msg.sender_id, decision.escalate, decision.confidence, decision.mode
        );

        let topic = detect_topic(&msg.text);
        let (reply, escalation) = futures::join!(
            self.reply(msg, &decision),
            self.escalate(msg, &decision, topic)
        );

        Outcome::Handled { reply, escalation }
    }

    async fn reply(&self, msg: &IncomingMessage, decision: &Decision) -> Delivery {
        let text = match (decision.user_reply.as_deref(), self.policy.reply) {
            (Some(text), _) => text,
            (None, ReplyPolicy::Fallback) => self.policy.fallback_reply.as_str(),
            (None, ReplyPolicy::Silent) => return Delivery::Skipped,
        };

        match self.sender.send_text(msg.chat_id, text).await {
            Ok(()) => Delivery::Sent,
            Err(e) => {
                warn!("Failed to send reply to chat {}: {:#}", msg.chat_id, e);
                Delivery::Failed
            }
        }
    }

    async fn escalate(
        &self,
        msg: &IncomingMessage,
        decision: &Decision,
        topic: Topic,
    ) -> EscalationOutcome {
        if !self.policy.escalation.wants_escalation(decision) {
            return EscalationOutcome::NotRequested;
        }

        let Some(supervisor) = self.supervisor_chat_id else {
            debug!("Escalation wanted but no supervisor chat is configured");
            return EscalationOutcome::NoSupervisor;
        };

        let key = dedup_key(
            self.policy.dedup_key,
            msg.sender_id,
            msg.chat_id,
            &msg.text,
            topic,
            self.policy.mask_amounts,
        );
        let Some(claim) = self.dedup.try_claim(&key, Utc::now()) else {
            info!("Escalation for {} suppressed (cooling down)", msg.sender_id);
            return EscalationOutcome::Suppressed;
        };

        let text = self.escalation_text(msg, decision, topic);
        match self.sender.send_text(supervisor, &text).await {
            Ok(()) => {
                info!(
                    "Escalated message from {} to {}",
                    msg.sender_id, self.supervisor_name
                );
                debug!("{} escalation keys tracked", self.dedup.len());
                EscalationOutcome::Sent
            }
            Err(e) => {
                error!("Failed to send escalation {}: {:#}", claim.key(), e);
                self.dedup.release(claim);
                EscalationOutcome::Failed
            }
        }
    }

    /// Attribution block followed by the model's note for the supervisor.
    fn escalation_text(&self, msg: &IncomingMessage, decision: &Decision, topic: Topic) -> String {
        let agent = match &msg.sender_handle {
            Some(handle) => format!("{} (@{})", msg.sender_name, handle),
            None => msg.sender_name.clone(),
        };
        let group = msg.group_name.as_deref().unwrap_or("Direct message");
        let time = msg
            .sent_at
            .with_timezone(&self.tz)
            .format("%b %-d, %Y %-I:%M %p %Z");

        let mut text = format!(
            "🚨 Escalation\n\
             Agent: {agent}\n\
             Group: {group}\n\
             Time: {time}\n\
             Topic: {topic}\n\
             Message: {}\n",
            msg.text
        );
        // The reason gets its own line only when a DM note will follow it.
        if let (Some(_), Some(reason)) = (&decision.supervisor_note, &decision.escalate_reason) {
            text.push_str(&format!("Reason: {}\n", reason));
        }
        text.push('\n');

        let note = decision
            .supervisor_note
            .as_deref()
            .or(decision.escalate_reason.as_deref())
            .or(decision.supervisor_email.as_deref());
        match note {
            Some(note) => text.push_str(note),
            None => text.push_str(&format!(
                "No note for {} was provided.",
                self.supervisor_name
            )),
        }

        if let (Some(_), Some(email)) = (&decision.supervisor_note, &decision.supervisor_email) {
            text.push_str("\n\nEmail draft:\n");
            text.push_str(email);
        }

        text
    }
}
