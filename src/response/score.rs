//! Context-usage scoring and the target-language check.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

const BASE_SCORE: u32 = 20;
const PARENTHETICAL_BONUS: u32 = 15;
pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 100;

/// Keywords that show the text draws on local lore, with their weight.
const KEYWORDS: &[(&str, u32)] = &[
    ("pjuskeby", 15),
    ("bedrift", 10),
    ("gate", 8),
    ("innsjø", 12),
    ("sport", 10),
    ("turist", 8),
    ("sted", 5),
    ("område", 5),
    ("adresse", 8),
    ("firma", 8),
];

/// Common Norwegian function words and letters.
const LANGUAGE_INDICATORS: &[&str] = &[
    "å", "æ", "ø", "og", "en", "et", "som", "på", "til", "av", "er", "kl",
];
const MIN_LANGUAGE_INDICATORS: usize = 2;

fn parenthetical() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\([^)]+\)").expect("valid parenthetical pattern"))
}

/// Base score plus keyword bonuses plus a bonus for parenthetical detail,
/// capped at 100.
pub fn context_score(text: &str) -> u8 {
    let lower = text.to_lowercase();
    let mut score = BASE_SCORE;
    for (keyword, weight) in KEYWORDS {
        if lower.contains(keyword) {
            score += weight;
        }
    }
    if parenthetical().is_match(text) {
        score += PARENTHETICAL_BONUS;
    }
    score.min(MAX_SCORE as u32) as u8
}

/// Minimal check that the text reads as Norwegian.
pub fn looks_norwegian(text: &str) -> bool {
    let lower = text.to_lowercase();
    LANGUAGE_INDICATORS
        .iter()
        .filter(|needle| lower.contains(*needle))
        .count()
        >= MIN_LANGUAGE_INDICATORS
}

/// Clamp an explicitly provided score. Numbers and numeric strings are
/// rounded; anything else counts as zero and clamps to the minimum.
pub fn clamp_explicit(value: &Value) -> u8 {
    let raw = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if raw.is_nan() {
        return MIN_SCORE;
    }
    raw.round().clamp(MIN_SCORE as f64, MAX_SCORE as f64) as u8
}
