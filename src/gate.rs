use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Mentions that always warrant a look, regardless of phrasing.
const HIGH_RISK_KEYWORDS: &[&str] = &[
    "annuity",
    "replacement",
    "rollover",
    "ira",
    "401k",
    "$",
    "commission",
];

/// Openers that mark a message as a request. Matched only at the start of the
/// message, and only as whole words.
const STARTER_PHRASES: &[&str] = &[
    "how",
    "what",
    "why",
    "when",
    "where",
    "which",
    "who",
    "can you",
    "can i",
    "could you",
    "should i",
    "is it",
    "is this",
    "do i",
    "does",
    "help",
    "next step",
    "next steps",
];

/// Phrases agents use when they are stuck, anywhere in the message.
const STUCK_PHRASES: &[&str] = &[
    "stuck",
    "not sure",
    "unsure",
    "confused",
    "no idea",
    "don't know",
    "dont know",
    "any advice",
    "any tips",
    "lost on",
];

/// Amounts at or above this are "high value" for topic purposes.
const LARGE_AMOUNT: f64 = 100_000.0;

/// Plan names that look like amounts ("401k") but are not.
static PLAN_NAMES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:401|403|457)\s*\(?[kb]\)?").expect("valid regex"));

/// A figure written like money: thousands separators ("250,000"), or a short
/// number with a scale suffix ("300k", "1.2 million"). Bare digit runs are
/// phone, policy and date numbers, not amounts.
static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:(\d{1,3}(?:,\d{3})+(?:\.\d+)?)\s*(million|thousand|mm|m|k)?|(\d{1,6}(?:\.\d+)?)\s*(million|thousand|mm|m|k))\b",
    )
    .expect("valid regex")
});

/// Decide whether an inbound message deserves any automated response.
///
/// Evaluated as an ordered short-circuit: high-risk keyword, literal question
/// mark, whole-word starter phrase at the beginning, stuck phrase anywhere.
/// Case-insensitive and pure.
pub fn should_respond(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return false;
    }

    if HIGH_RISK_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return true;
    }

    if lower.contains('?') {
        return true;
    }

    if STARTER_PHRASES
        .iter()
        .any(|phrase| starts_with_phrase(&lower, phrase))
    {
        return true;
    }

    STUCK_PHRASES.iter().any(|p| lower.contains(p))
}

/// `text` begins with `phrase` and the phrase ends on a word boundary.
fn starts_with_phrase(text: &str, phrase: &str) -> bool {
    match text.strip_prefix(phrase) {
        Some(rest) => rest
            .chars()
            .next()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_')),
        None => false,
    }
}

/// Coarse subject of a message, used for escalation dedup and attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    HighValue,
    Replacement,
    FirstAppointment,
    General,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::HighValue => "high_value",
            Topic::Replacement => "replacement",
            Topic::FirstAppointment => "first_appointment",
            Topic::General => "general",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map message text to the first matching topic. Total: anything unmatched is
/// `General`.
pub fn detect_topic(text: &str) -> Topic {
    let lower = text.to_lowercase();

    if lower.contains("annuity") || has_currency_symbol(&lower) || has_large_amount(&lower) {
        return Topic::HighValue;
    }
    if lower.contains("replacement") || lower.contains("1035") {
        return Topic::Replacement;
    }
    if lower.contains("first appointment") {
        return Topic::FirstAppointment;
    }
    Topic::General
}

fn has_currency_symbol(text: &str) -> bool {
    text.chars().any(|c| matches!(c, '$' | '€' | '£' | '¥'))
}

fn has_large_amount(text: &str) -> bool {
    let text = PLAN_NAMES.replace_all(text, " ");
    AMOUNT.captures_iter(&text).any(|caps| {
        let (Some(figure), suffix) = (caps.get(1).or(caps.get(3)), caps.get(2).or(caps.get(4)))
        else {
            return false;
        };
        let Ok(base) = figure.as_str().replace(',', "").parse::<f64>() else {
            return false;
        };
        let multiplier = match suffix.map(|m| m.as_str()) {
            Some("k") | Some("thousand") => 1_000.0,
            Some("m") | Some("mm") | Some("million") => 1_000_000.0,
            _ => 1.0,
        };
        base * multiplier >= LARGE_AMOUNT
    })
}
