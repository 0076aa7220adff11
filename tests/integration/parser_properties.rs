//! Property tests for response parsing.

use nattevakt::response::{ResponseParser, MAX_ITEMS, MAX_TEXT_CHARS, MIN_TEXT_CHARS};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Norwegian news text of exactly `len` characters.
fn news_text(index: usize, len: usize) -> String {
    let head = format!("kl 0{}:15 nytt på torget ", index % 10);
    let pad = len.saturating_sub(head.chars().count());
    format!("{}{}", head, "a".repeat(pad))
}

fn as_response(items: &[Value]) -> String {
    serde_json::to_string(items).unwrap()
}

proptest! {
    #[test]
    fn parse_count_is_min_of_valid_and_cap(
        lengths in prop::collection::vec(30usize..400, 0..16),
        short in 0usize..4,
    ) {
        let mut items: Vec<Value> = lengths
            .iter()
            .enumerate()
            .map(|(i, len)| json!({"tekst": news_text(i, *len), "score": 50}))
            .collect();
        for _ in 0..short {
            items.push(json!({"tekst": "for kort"}));
        }
        let parsed = ResponseParser::default().parse(&as_response(&items));
        prop_assert_eq!(parsed.len(), lengths.len().min(MAX_ITEMS));
        for item in &parsed {
            let chars = item.tekst.chars().count();
            prop_assert!((MIN_TEXT_CHARS..=MAX_TEXT_CHARS).contains(&chars));
            prop_assert!((1..=100).contains(&item.score));
        }
    }

    #[test]
    fn fenced_response_parses_like_direct(
        lengths in prop::collection::vec(30usize..200, 1..8),
    ) {
        let items: Vec<Value> = lengths
            .iter()
            .enumerate()
            .map(|(i, len)| json!({"tekst": news_text(i, *len), "score": 40}))
            .collect();
        let direct = as_response(&items);
        let fenced = format!("Her er nyhetene:\n```json\n{}\n```\nGod natt!", direct);

        let parser = ResponseParser::default();
        let a: Vec<String> = parser.parse(&direct).into_iter().map(|i| i.tekst).collect();
        let b: Vec<String> = parser.parse(&fenced).into_iter().map(|i| i.tekst).collect();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn denylisted_item_is_dropped_and_others_kept(
        count in 1usize..8,
        poisoned in 0usize..8,
    ) {
        let poisoned = poisoned % count;
        let items: Vec<Value> = (0..count)
            .map(|i| {
                let mut text = news_text(i, 60);
                if i == poisoned {
                    text.push_str(" <script>alert(1)</script>");
                }
                json!({"tekst": text})
            })
            .collect();
        let report = ResponseParser::default().parse_with_report(&as_response(&items));
        prop_assert_eq!(report.items.len(), count - 1);
        prop_assert_eq!(report.security_rejections(), 1);
        prop_assert!(report.items.iter().all(|i| !i.tekst.contains("script")));
    }

    #[test]
    fn arbitrary_input_never_panics(raw in ".{0,400}") {
        let items = ResponseParser::default().parse(&raw);
        prop_assert!(items.len() <= MAX_ITEMS);
    }
}

#[test]
fn text_alias_and_time_alias_are_accepted() {
    let raw = r#"[{"time":"kl 4.05","text":"Bussen til Pjuskeby kom for sent i natt"}]"#;
    let items = ResponseParser::default().parse(raw);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].tid, "04:05");
    assert!(items[0].context_score >= 35);
}
