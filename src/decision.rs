//! Parsing of the labeled decision blob returned by the model.
//!
//! The model answers in a line-oriented convention:
//!
//! ```text
//! ESCALATE: YES
//! USER_REPLY:
//! Acknowledged.
//! DM_TO_CHRIS:
//! Agent asked about rollover.
//! ```
//!
//! A label is a line that starts with an uppercase word (`A-Z`, digits, `_`)
//! immediately followed by `:`. Its value runs from after the colon to the next
//! label line or the end of input. Text before the first label is ignored.

pub const MODE: &str = "MODE";
pub const CONFIDENCE: &str = "CONFIDENCE";
pub const ESCALATE: &str = "ESCALATE";
pub const ESCALATE_REASON: &str = "ESCALATE_REASON";
pub const USER_REPLY: &str = "USER_REPLY";
pub const DM_TO_CHRIS: &str = "DM_TO_CHRIS";
pub const EMAIL_TO_CHRIS: &str = "EMAIL_TO_CHRIS";

pub const RECOGNIZED_LABELS: &[&str] = &[
    MODE,
    CONFIDENCE,
    ESCALATE,
    ESCALATE_REASON,
    USER_REPLY,
    DM_TO_CHRIS,
    EMAIL_TO_CHRIS,
];

/// Placeholder the model uses for "nothing to say".
const NONE_SENTINEL: &str = "NONE";

/// Every labeled field found in a blob, in order of appearance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionBlob {
    fields: Vec<(String, String)>,
}

impl DecisionBlob {
    /// Raw trimmed value of the first occurrence of `label`, including "NONE".
    pub fn raw(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, value)| value.as_str())
    }

    /// Value of `label` with empty and "NONE" collapsed to absent.
    pub fn value(&self, label: &str) -> Option<&str> {
        self.raw(label)
            .filter(|v| !v.is_empty() && !is_none_sentinel(v))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn has_recognized_label(&self) -> bool {
        self.labels().any(|l| RECOGNIZED_LABELS.contains(&l))
    }
}

/// If `line` opens a new field, split it into `(label, rest_after_colon)`.
fn split_label(line: &str) -> Option<(&str, &str)> {
    let mut chars = line.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_uppercase() => {}
        _ => return None,
    }
    for (idx, c) in chars {
        match c {
            'A'..='Z' | '0'..='9' | '_' => continue,
            ':' => return Some((&line[..idx], &line[idx + 1..])),
            _ => return None,
        }
    }
    None
}

/// Tokenize a decision blob into labeled fields. Never fails: unlabeled input
/// yields an empty blob.
pub fn parse_blob(text: &str) -> DecisionBlob {
    let mut fields = Vec::new();
    let mut current: Option<(String, String)> = None;

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        match split_label(line) {
            Some((label, rest)) => {
                if let Some(done) = current.take() {
                    fields.push(done);
                }
                current = Some((label.to_string(), rest.to_string()));
            }
            None => {
                if let Some((_, value)) = current.as_mut() {
                    value.push('\n');
                    value.push_str(line);
                }
            }
        }
    }
    if let Some(done) = current.take() {
        fields.push(done);
    }

    let fields = fields
        .into_iter()
        .map(|(label, value)| (label, value.trim().to_string()))
        .collect();

    DecisionBlob { fields }
}

/// Tri-state escalation signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalateSignal {
    Yes,
    No,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Structured view of a model decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub mode: Option<String>,
    /// `None` when absent or not understood.
    pub confidence: Option<Confidence>,
    pub escalate: EscalateSignal,
    pub escalate_reason: Option<String>,
    pub user_reply: Option<String>,
    pub supervisor_note: Option<String>,
    pub supervisor_email: Option<String>,
}

impl Decision {
    /// Interpret a blob. Returns `None` when it carries none of the recognized
    /// labels, i.e. the model ignored the output convention entirely.
    pub fn from_blob(blob: &DecisionBlob) -> Option<Self> {
        if !blob.has_recognized_label() {
            return None;
        }
        let owned = |label: &str| blob.value(label).map(str::to_string);

        Some(Self {
            mode: owned(MODE),
            confidence: blob.value(CONFIDENCE).and_then(parse_confidence),
            escalate: blob
                .value(ESCALATE)
                .map(parse_escalate)
                .unwrap_or(EscalateSignal::Unknown),
            escalate_reason: owned(ESCALATE_REASON),
            user_reply: owned(USER_REPLY),
            supervisor_note: owned(DM_TO_CHRIS),
            supervisor_email: owned(EMAIL_TO_CHRIS),
        })
    }

    pub fn parse(text: &str) -> Option<Self> {
        Self::from_blob(&parse_blob(text))
    }
}

/// "NONE" on its own, with trailing punctuation ("NONE.") or with a
/// punctuated aside ("None - no reply needed"). "None of the forms apply" is
/// a real answer.
fn is_none_sentinel(value: &str) -> bool {
    if first_word(value) != NONE_SENTINEL {
        return false;
    }
    let rest = value[NONE_SENTINEL.len()..].trim_start();
    rest.chars().next().is_none_or(|c| !c.is_alphanumeric())
}

/// Leading word of a value, uppercased, without trailing punctuation.
fn first_word(value: &str) -> String {
    value
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches(|c: char| !c.is_alphanumeric())
        .to_ascii_uppercase()
}

fn parse_escalate(value: &str) -> EscalateSignal {
    match first_word(value).as_str() {
        "YES" | "Y" | "TRUE" => EscalateSignal::Yes,
        "NO" | "N" | "FALSE" => EscalateSignal::No,
        _ => EscalateSignal::Unknown,
    }
}

fn parse_confidence(value: &str) -> Option<Confidence> {
    let word = first_word(value);
    match word.as_str() {
        "HIGH" => return Some(Confidence::High),
        "MEDIUM" | "MED" => return Some(Confidence::Medium),
        "LOW" => return Some(Confidence::Low),
        _ => {}
    }

    let numeric = value.split_whitespace().next()?.trim_end_matches('%');
    let mut score: f64 = numeric.parse().ok()?;
    if score > 1.0 {
        score /= 100.0;
    }
    if !(0.0..=1.0).contains(&score) {
        return None;
    }
    Some(if score < 0.5 {
        Confidence::Low
    } else if score < 0.8 {
        Confidence::Medium
    } else {
        Confidence::High
    })
}
