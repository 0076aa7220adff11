//! Response parsing and validation.
//!
//! Turns raw model output into at most [`MAX_ITEMS`] sanitized news items.
//! Extraction strategies are tried in order (strict parse, embedded span,
//! fenced block, line heuristic); every candidate then passes the same
//! screening regardless of where it came from. Parsing never fails: the
//! worst case is an empty list.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub mod extract;
pub mod sanitize;
pub mod score;

pub use extract::Strategy;

/// Raw responses are cut to this many bytes before any processing.
pub const MAX_RAW_BYTES: usize = 50_000;
pub const MAX_ITEMS: usize = 10;
pub const MIN_TEXT_CHARS: usize = 15;
pub const MAX_TEXT_CHARS: usize = 800;
const DIAGNOSTIC_PREVIEW_CHARS: usize = 200;

/// One news item as stored in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedItem {
    /// Time-of-day label, `HH:MM`
    pub tid: String,
    /// Sanitized news text
    pub tekst: String,
    pub score: u8,
    #[serde(default)]
    pub generated_at: String,
    #[serde(default)]
    pub version: String,
    /// BLAKE3 of the sanitized text, for duplicate detection
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub context_score: u8,
}

impl GeneratedItem {
    /// Build an item from already sanitized text.
    pub fn new(tid: String, tekst: String, score: u8, context_score: u8) -> Self {
        Self {
            hash: content_hash(&tekst),
            tid,
            tekst,
            score,
            generated_at: timestamp_now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            context_score,
        }
    }
}

pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

pub fn time_label_now() -> String {
    Local::now().format("%H:%M").to_string()
}

pub fn timestamp_now() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotAnObject,
    MissingText,
    Denylisted,
    TooShort,
    TooLong,
    WrongLanguage,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NotAnObject => "not_an_object",
            RejectReason::MissingText => "missing_text",
            RejectReason::Denylisted => "denylisted",
            RejectReason::TooShort => "too_short",
            RejectReason::TooLong => "too_long",
            RejectReason::WrongLanguage => "wrong_language",
        }
    }
}

/// Outcome of one parse, for callers that want more than the items.
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    pub items: Vec<GeneratedItem>,
    pub strategy: Option<Strategy>,
    /// Candidate index and reason for every rejected candidate
    pub rejected: Vec<(usize, RejectReason)>,
    pub truncated: bool,
}

impl ParseReport {
    pub fn security_rejections(&self) -> usize {
        self.rejected
            .iter()
            .filter(|(_, r)| *r == RejectReason::Denylisted)
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct ResponseParser {
    max_items: usize,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self {
            max_items: MAX_ITEMS,
        }
    }
}

impl ResponseParser {
    pub fn new(max_items: usize) -> Self {
        Self {
            max_items: max_items.min(MAX_ITEMS),
        }
    }

    pub fn parse(&self, raw: &str) -> Vec<GeneratedItem> {
        self.parse_with_report(raw).items
    }

    pub fn parse_with_report(&self, raw: &str) -> ParseReport {
        let mut report = ParseReport::default();
        let text = if raw.len() > MAX_RAW_BYTES {
            warn!(bytes = raw.len(), limit = MAX_RAW_BYTES, "Response truncated before parsing");
            report.truncated = true;
            truncate_at_char_boundary(raw, MAX_RAW_BYTES)
        } else {
            raw
        };

        let Some((strategy, candidates)) = extract::candidates(text) else {
            let preview: String = text.chars().take(DIAGNOSTIC_PREVIEW_CHARS).collect();
            warn!(preview = %preview, "No structured items found in response");
            return report;
        };
        debug!(%strategy, candidates = candidates.len(), "Extracted candidates");
        report.strategy = Some(strategy);

        for (index, candidate) in candidates.iter().enumerate() {
            if report.items.len() >= self.max_items {
                break;
            }
            match validate(candidate) {
                Ok(item) => report.items.push(item),
                Err(reason) => {
                    if reason == RejectReason::Denylisted {
                        warn!(
                            candidate = index,
                            security = true,
                            "Dropped generated item with active content"
                        );
                    } else {
                        debug!(candidate = index, reason = reason.as_str(), "Rejected candidate");
                    }
                    report.rejected.push((index, reason));
                }
            }
        }

        if report.items.is_empty() {
            let preview: String = text.chars().take(DIAGNOSTIC_PREVIEW_CHARS).collect();
            warn!(preview = %preview, %strategy, "No candidate passed validation");
        }
        report
    }
}

fn text_field(obj: &serde_json::Map<String, Value>) -> Option<&str> {
    ["tekst", "text"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

fn validate(candidate: &Value) -> Result<GeneratedItem, RejectReason> {
    let obj = candidate.as_object().ok_or(RejectReason::NotAnObject)?;
    let raw_text = text_field(obj).ok_or(RejectReason::MissingText)?;
    if sanitize::is_denied(raw_text) {
        return Err(RejectReason::Denylisted);
    }

    let text = sanitize::to_plain_text(raw_text);
    let chars = text.chars().count();
    if chars < MIN_TEXT_CHARS {
        return Err(RejectReason::TooShort);
    }
    if chars > MAX_TEXT_CHARS {
        return Err(RejectReason::TooLong);
    }
    if !score::looks_norwegian(&text) {
        return Err(RejectReason::WrongLanguage);
    }

    let context_score = score::context_score(&text);
    let explicit = obj.get("score").filter(|v| !v.is_null());
    let score = explicit.map_or(context_score, score::clamp_explicit);

    let tid = ["tid", "time"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .and_then(extract::find_time_label)
        .unwrap_or_else(time_label_now);

    Ok(GeneratedItem::new(tid, text, score, context_score))
}

/// Longest prefix of `s` not exceeding `max` bytes that ends on a char boundary.
pub fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
