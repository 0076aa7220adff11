//! Two facades on one workspace, standing in for `schedule` and a manual
//! admin command running side by side.

use nattevakt::error::{PipelineError, StorageError};
use nattevakt::generation::RunOutcome;
use nattevakt::rate::RateLimiter;
use tempfile::TempDir;

use crate::integration::test_utils::{build_api_on_disk, test_config, write_source, ScriptedProvider};

const GOOD: &str = r#"[{"tid":"01:10","tekst":"kl 01:10 – Brannstasjonen i Pjuskeby fikk ny sirene på taket","score":60}]"#;

#[tokio::test]
async fn busy_cache_maps_to_lock_failed_and_feed_still_renders() {
    let ws = TempDir::new().unwrap();
    write_source(&ws, "businesses.json", r#"[{"name":"Pjuskeby Bakeri"}]"#);
    let mut config = test_config(ws.path());
    config.coordination.cache_open_timeout_ms = 500;
    config.coordination.acquire_timeout_ms = 2_000;
    let scheduler = build_api_on_disk(&ws, config.clone(), Some(ScriptedProvider::replying(GOOD)));
    let admin_provider = ScriptedProvider::replying(GOOD);
    let admin = build_api_on_disk(&ws, config, Some(admin_provider.clone()));

    let running = scheduler.cache_session().unwrap();

    let feed = admin.feed(None);
    assert!(feed.fallback);
    assert_eq!(feed.reason.as_deref(), Some("missing"));
    assert!(!feed.items.is_empty());

    let status = admin.status();
    assert!(status.runtime.is_none());

    let report = admin.generate_now().await;
    assert_eq!(report.outcome, RunOutcome::LockFailed);
    assert_eq!(report.failure.unwrap().code, "lock_unavailable");
    assert_eq!(admin_provider.calls(), 0);

    let err = admin.recent_errors(10).unwrap_err();
    assert!(matches!(err, PipelineError::Storage(StorageError::Busy(_))), "{}", err);

    drop(running);
    let report = admin.generate_now().await;
    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(admin_provider.calls(), 1);

    let journal = scheduler.recent_errors(10).unwrap();
    assert!(journal.iter().any(|e| e.kind == "success"));
}

#[tokio::test]
async fn state_written_by_one_facade_is_seen_by_the_other() {
    let ws = TempDir::new().unwrap();
    let config = test_config(ws.path());
    let first = build_api_on_disk(&ws, config.clone(), Some(ScriptedProvider::replying(GOOD)));
    let second = build_api_on_disk(&ws, config, None);

    assert_eq!(first.generate_now().await.outcome, RunOutcome::Success);
    let calls = RateLimiter::new(second.cache_session().unwrap(), 60)
        .calls_this_hour()
        .unwrap();
    assert_eq!(calls, 1);
}
