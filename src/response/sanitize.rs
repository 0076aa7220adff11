//! Security screening and plain-text normalization of generated text.

use std::sync::OnceLock;

use regex::{Regex, RegexSet};
use unicode_normalization::UnicodeNormalization;

fn denylist() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"(?i)<\s*script",
            r"(?i)script\s*>",
            r"(?i)javascript\s*:",
            r"(?i)data\s*:\s*text/html",
            r"(?i)<\s*iframe",
            r"(?i)eval\s*\(",
        ])
        .expect("valid denylist patterns")
    })
}

/// Whether raw generated text contains active content that must never be
/// rendered.
pub fn is_denied(raw: &str) -> bool {
    denylist().is_match(raw)
}

fn active_blocks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>")
            .expect("valid block pattern")
    })
}

fn tags() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"))
}

/// Reduce text to a single line of plain text: drop script and style blocks
/// and all tags, turn control characters into spaces, collapse whitespace and
/// normalize to NFC.
pub fn to_plain_text(raw: &str) -> String {
    let without_blocks = active_blocks().replace_all(raw, " ");
    let without_tags = tags().replace_all(&without_blocks, " ");
    let spaced: String = without_tags
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.nfc().collect()
}
