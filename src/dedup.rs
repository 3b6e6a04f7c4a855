use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::gate::Topic;

/// What identifies "the same case" for escalation purposes.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DedupKeyPolicy {
    /// Sender, chat and normalized message text.
    #[default]
    Message,
    /// Sender, chat and detected topic.
    Topic,
}

static CURRENCY_FIGURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[$€£¥]\s*\d[\d,]*(?:\.\d+)?(?:\s*(?:million|thousand|mm|m|k)\b)?")
        .expect("valid regex")
});

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("valid regex"));

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]+").expect("valid regex"));

/// Normalize message text for key construction: lowercase, optionally mask
/// currency figures and numbers, drop punctuation, collapse whitespace.
pub fn normalize_text(text: &str, mask_amounts: bool) -> String {
    let mut text = text.to_lowercase();
    if mask_amounts {
        text = CURRENCY_FIGURE.replace_all(&text, " amount ").into_owned();
        text = NUMBER.replace_all(&text, " num ").into_owned();
    }
    let text = NON_WORD.replace_all(&text, " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the dedup key for an escalation.
pub fn dedup_key(
    policy: DedupKeyPolicy,
    sender_id: i64,
    chat_id: i64,
    text: &str,
    topic: Topic,
    mask_amounts: bool,
) -> String {
    match policy {
        DedupKeyPolicy::Message => format!(
            "{}:{}:msg:{}",
            sender_id,
            chat_id,
            normalize_text(text, mask_amounts)
        ),
        DedupKeyPolicy::Topic => format!("{}:{}:topic:{}", sender_id, chat_id, topic),
    }
}

/// A successful reservation of a key. Hand it back to
/// [`EscalationCache::release`] if the escalation could not be delivered.
#[derive(Debug)]
pub struct Claim {
    key: String,
    claimed_at: DateTime<Utc>,
    previous: Option<DateTime<Utc>>,
}

impl Claim {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Process-wide record of when each case was last escalated.
///
/// Entries are never evicted; a key is only overwritten by its next real
/// escalation. Nothing survives a restart.
pub struct EscalationCache {
    entries: DashMap<String, DateTime<Utc>>,
    window: TimeDelta,
}

impl EscalationCache {
    pub fn new(window: TimeDelta) -> Self {
        Self {
            entries: DashMap::new(),
            window,
        }
    }

    fn within_window(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(last) < self.window
    }

    /// True iff `key` was escalated less than one window before `now`.
    #[allow(dead_code)]
    pub fn should_suppress(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .get(key)
            .is_some_and(|last| self.within_window(*last, now))
    }

    /// Mark `key` as escalated at `now`. The relay goes through
    /// [`EscalationCache::try_claim`] instead, which checks and records at once.
    #[allow(dead_code)]
    pub fn record(&self, key: &str, now: DateTime<Utc>) {
        self.entries.insert(key.to_string(), now);
    }

    /// Check and record in one step, under the key's shard lock. Returns `None`
    /// when the key is still cooling down.
    pub fn try_claim(&self, key: &str, now: DateTime<Utc>) -> Option<Claim> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let last = *entry.get();
                if self.within_window(last, now) {
                    debug!("Escalation key {} suppressed (last at {})", key, last);
                    return None;
                }
                entry.insert(now);
                Some(Claim {
                    key: key.to_string(),
                    claimed_at: now,
                    previous: Some(last),
                })
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                Some(Claim {
                    key: key.to_string(),
                    claimed_at: now,
                    previous: None,
                })
            }
        }
    }

    /// Undo a claim whose escalation was never delivered. A newer claim on the
    /// same key is left alone.
    pub fn release(&self, claim: Claim) {
        if let Entry::Occupied(mut entry) = self.entries.entry(claim.key) {
            if *entry.get() != claim.claimed_at {
                return;
            }
            match claim.previous {
                Some(previous) => {
                    entry.insert(previous);
                }
                None => {
                    entry.remove();
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_suppressed_within_window() {
        let cache = EscalationCache::new(TimeDelta::hours(24));
        assert!(!cache.should_suppress("k", t0()));

        cache.record("k", t0());
        assert!(cache.should_suppress("k", t0()));
        assert!(cache.should_suppress("k", t0() + TimeDelta::hours(23)));
        assert!(cache.should_suppress("k", t0() + TimeDelta::hours(24) - TimeDelta::seconds(1)));
    }

    #[test]
    fn test_not_suppressed_at_window_boundary() {
        let cache = EscalationCache::new(TimeDelta::hours(24));
        cache.record("k", t0());
        assert!(!cache.should_suppress("k", t0() + TimeDelta::hours(24)));
        assert!(!cache.should_suppress("k", t0() + TimeDelta::hours(30)));
        assert!(!cache.should_suppress("other", t0()));
    }

    #[test]
    fn test_claim_resets_window() {
        let cache = EscalationCache::new(TimeDelta::hours(24));
        assert!(cache.try_claim("k", t0()).is_some());
        assert!(cache.try_claim("k", t0() + TimeDelta::hours(1)).is_none());

        let t1 = t0() + TimeDelta::hours(24);
        assert!(cache.try_claim("k", t1).is_some());
        // window now counts from t1
        assert!(cache.try_claim("k", t1 + TimeDelta::hours(23)).is_none());
        assert!(cache.try_claim("k", t1 + TimeDelta::hours(24)).is_some());
    }

    #[test]
    fn test_suppressed_attempt_does_not_refresh() {
        let cache = EscalationCache::new(TimeDelta::hours(24));
        cache.try_claim("k", t0()).unwrap();
        assert!(cache.try_claim("k", t0() + TimeDelta::hours(20)).is_none());
        // measured from t0, not from the suppressed attempt
        assert!(cache.try_claim("k", t0() + TimeDelta::hours(24)).is_some());
    }

    #[test]
    fn test_release_restores_previous_state() {
        let cache = EscalationCache::new(TimeDelta::hours(24));
        let claim = cache.try_claim("fresh", t0()).unwrap();
        assert_eq!(claim.key(), "fresh");
        cache.release(claim);
        assert_eq!(cache.len(), 0);
        assert!(!cache.should_suppress("fresh", t0()));

        cache.record("old", t0());
        let later = t0() + TimeDelta::hours(25);
        let claim = cache.try_claim("old", later).unwrap();
        cache.release(claim);
        assert!(cache.should_suppress("old", t0() + TimeDelta::hours(1)));
        assert!(!cache.should_suppress("old", later));
    }

    #[test]
    fn test_concurrent_claims_only_one_wins() {
        let cache = Arc::new(EscalationCache::new(TimeDelta::hours(24)));
        let now = t0();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.try_claim("same-case", now).is_some())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(
            normalize_text("  What's   the PROCESS, for a Rollover?! ", false),
            "what s the process for a rollover"
        );
        assert_eq!(
            normalize_text("Client has $500,000 in an IRA", true),
            "client has amount in an ira"
        );
        assert_eq!(
            normalize_text("Client has $500,000 in an IRA", true),
            normalize_text("client has $500,001 in an ira!", true)
        );
        assert_eq!(
            normalize_text("moving 250k today", true),
            normalize_text("moving 300k today", true)
        );
        assert_ne!(
            normalize_text("Client has $500,000", false),
            normalize_text("Client has $500,001", false)
        );
    }

    #[test]
    fn test_dedup_key_policies() {
        let text = "What is the process for a rollover?";
        let by_message = dedup_key(DedupKeyPolicy::Message, 7, -100, text, Topic::General, true);
        assert_eq!(by_message, "7:-100:msg:what is the process for a rollover");

        let rephrased = dedup_key(
            DedupKeyPolicy::Message,
            7,
            -100,
            "what is the process for a ROLLOVER",
            Topic::General,
            true,
        );
        assert_eq!(by_message, rephrased);

        let by_topic = dedup_key(DedupKeyPolicy::Topic, 7, -100, text, Topic::HighValue, true);
        assert_eq!(by_topic, "7:-100:topic:high_value");

        let other_sender = dedup_key(DedupKeyPolicy::Topic, 8, -100, text, Topic::HighValue, true);
        assert_ne!(by_topic, other_sender);
    }
}
