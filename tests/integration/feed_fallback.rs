//! Public feed reads through the admin facade.

use nattevakt::writer::AtomicWriter;
use tempfile::TempDir;

use crate::integration::test_utils::{build_api, test_config, write_source, ScriptedProvider};

#[test]
fn feed_before_first_run_is_the_placeholder_set() {
    let ws = TempDir::new().unwrap();
    let api = build_api(&ws, test_config(ws.path()), None, AtomicWriter::new());

    let feed = api.feed(None);
    assert!(feed.fallback);
    assert_eq!(feed.reason.as_deref(), Some("missing"));
    assert_eq!(feed.items.len(), 2);
    assert!(feed.items.iter().all(|i| (1..=100).contains(&i.score)));
}

#[test]
fn corrupt_artifact_serves_fallback() {
    let ws = TempDir::new().unwrap();
    write_source(&ws, "nattavis.json", "[{\"tekst\": ");
    let api = build_api(&ws, test_config(ws.path()), None, AtomicWriter::new());

    let feed = api.feed(Some(5));
    assert!(feed.fallback);
    assert_eq!(feed.reason.as_deref(), Some("invalid"));
}

#[test]
fn feed_strips_markup_and_honors_limit() {
    let ws = TempDir::new().unwrap();
    let items: Vec<serde_json::Value> = (0..12)
        .map(|i| {
            serde_json::json!({
                "tid": format!("0{}:00", i % 10),
                "tekst": format!("<em>Nyhet {}</em> fra torget", i),
                "score": 500,
            })
        })
        .collect();
    write_source(&ws, "nattavis.json", &serde_json::to_string(&items).unwrap());
    let api = build_api(&ws, test_config(ws.path()), None, AtomicWriter::new());

    let feed = api.feed(None);
    assert!(!feed.fallback);
    assert_eq!(feed.items.len(), 10);
    assert_eq!(feed.items[0].tekst, "Nyhet 0 fra torget");
    assert_eq!(feed.items[0].score, 100);

    assert_eq!(api.feed(Some(3)).items.len(), 3);
    assert_eq!(api.feed(Some(0)).items.len(), 1);
    assert_eq!(api.feed(Some(1000)).items.len(), 12);
}

#[tokio::test]
async fn feed_reflects_latest_generation() {
    let ws = TempDir::new().unwrap();
    let provider = ScriptedProvider::replying(
        r#"[{"tid":"23:45","tekst":"kl 23:45 – Ugla på kirketårnet i Pjuskeby sa hei","score":77}]"#,
    );
    let api = build_api(&ws, test_config(ws.path()), Some(provider), AtomicWriter::new());
    api.generate_now().await;

    let feed = api.feed(None);
    assert!(!feed.fallback);
    assert_eq!(feed.items.len(), 1);
    assert_eq!(feed.items[0].tid, "23:45");
    assert_eq!(feed.items[0].score, 77);
}
