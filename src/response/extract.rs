//! Candidate extraction strategies, tried in order by the parser.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

/// Largest embedded or fenced span handed to the JSON parser.
pub const MAX_SPAN_BYTES: usize = 25_000;

/// Start positions tried per delimiter when looking for an embedded value.
const MAX_SPAN_ATTEMPTS: usize = 64;

const HEURISTIC_MAX_LINES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    EmbeddedSpan,
    FencedBlock,
    LineHeuristic,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::Direct => "direct",
            Strategy::EmbeddedSpan => "embedded_span",
            Strategy::FencedBlock => "fenced_block",
            Strategy::LineHeuristic => "line_heuristic",
        };
        f.write_str(s)
    }
}

/// A structurally valid candidate list is an array holding at least one
/// object, or a lone object.
fn structural(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) if items.iter().any(Value::is_object) => Some(items),
        Value::Object(_) => Some(vec![value]),
        _ => None,
    }
}

/// Run the strategies in order and return the first candidate list found.
pub fn candidates(text: &str) -> Option<(Strategy, Vec<Value>)> {
    if let Some(items) = direct(text) {
        return Some((Strategy::Direct, items));
    }
    if let Some(items) = embedded(text) {
        return Some((Strategy::EmbeddedSpan, items));
    }
    if let Some(items) = fenced(text) {
        return Some((Strategy::FencedBlock, items));
    }
    let lines = heuristic_lines(text);
    if !lines.is_empty() {
        return Some((Strategy::LineHeuristic, lines));
    }
    None
}

pub fn direct(text: &str) -> Option<Vec<Value>> {
    serde_json::from_str::<Value>(text.trim())
        .ok()
        .and_then(structural)
}

/// Earliest complete JSON value starting at a `[`, then at a `{`. The
/// streaming deserializer stops at the end of the first value, which gives
/// the shortest span that parses from each start position.
pub fn embedded(text: &str) -> Option<Vec<Value>> {
    ['[', '{']
        .into_iter()
        .find_map(|open| first_value_from(text, open))
}

fn first_value_from(text: &str, open: char) -> Option<Vec<Value>> {
    text.match_indices(open)
        .take(MAX_SPAN_ATTEMPTS)
        .find_map(|(start, _)| {
            let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
            let value = stream.next()?.ok()?;
            if stream.byte_offset() > MAX_SPAN_BYTES {
                return None;
            }
            structural(value)
        })
}

fn json_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)```json[ \t]*\r?\n?(.*?)```").expect("valid fence pattern"))
}

fn any_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("valid fence pattern")
    })
}

/// Fenced code block content: json-tagged blocks first, then any block.
pub fn fenced(text: &str) -> Option<Vec<Value>> {
    [json_fence(), any_fence()].into_iter().find_map(|re| {
        re.captures_iter(text).find_map(|caps| {
            let body = caps.get(1)?.as_str().trim();
            if body.len() > MAX_SPAN_BYTES {
                return None;
            }
            direct(body)
        })
    })
}

fn time_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2})[:.](\d{2})\b").expect("valid time pattern"))
}

/// `HH:MM` label found in `text`, if any.
pub fn find_time_label(text: &str) -> Option<String> {
    let caps = time_pattern().captures(text)?;
    let hours: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: u32 = caps.get(2)?.as_str().parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(format!("{:02}:{:02}", hours, minutes))
}

/// Lines of plausible news length carrying a time of day, as text-only items.
pub fn heuristic_lines(text: &str) -> Vec<Value> {
    text.lines()
        .map(str::trim)
        .filter(|line| {
            let len = line.chars().count();
            len > 20 && len < 300 && time_pattern().is_match(line)
        })
        .take(HEURISTIC_MAX_LINES)
        .map(|line| match find_time_label(line) {
            Some(tid) => json!({ "tid": tid, "tekst": line }),
            None => json!({ "tekst": line }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_accepts_array_and_object() {
        assert_eq!(direct(r#" [{"a":1},{"b":2}] "#).unwrap().len(), 2);
        assert_eq!(direct(r#"{"a":1}"#).unwrap().len(), 1);
        assert!(direct("[1, 2]").is_none());
        assert!(direct("[]").is_none());
        assert!(direct("not json").is_none());
    }

    #[test]
    fn embedded_finds_first_complete_array() {
        let text = r#"Her er nyhetene: [{"tekst": "a [b] c"}] og mer [1]"#;
        let (strategy, items) = candidates(text).unwrap();
        assert_eq!(strategy, Strategy::EmbeddedSpan);
        assert_eq!(items[0]["tekst"], "a [b] c");
    }

    #[test]
    fn embedded_skips_unparsable_brackets() {
        let text = r#"[sic] then {"tekst": "x"}"#;
        let items = embedded(text).unwrap();
        assert_eq!(items[0]["tekst"], "x");
    }

    #[test]
    fn fenced_prefers_json_tag() {
        let text = "```\nnot json\n```\n```json\n[{\"tekst\": \"x\"}]\n```";
        let items = fenced(text).unwrap();
        assert_eq!(items[0]["tekst"], "x");
    }

    #[test]
    fn fenced_without_tag() {
        let text = "Svar:\n```\n{\"tekst\": \"y\"}\n```";
        assert_eq!(fenced(text).unwrap()[0]["tekst"], "y");
    }

    #[test]
    fn heuristic_takes_timed_lines() {
        let text = "intro\nkl 23:15 skjedde det noe rart på torget i natt\nkort 1:00\n\
                    02.30 bakeren våknet og fant en elg i bakeriet\n\
                    04:45 postkontoret fikk et brev fra seg selv i dag\n\
                    05:10 enda en linje som ikke skal tas med her";
        let lines = heuristic_lines(text);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["tid"], "23:15");
        assert_eq!(lines[1]["tid"], "02:30");
    }

    #[test]
    fn time_label_rejects_impossible_times() {
        assert_eq!(find_time_label("kl 7.05"), Some("07:05".to_string()));
        assert_eq!(find_time_label("99:99"), None);
    }
}
