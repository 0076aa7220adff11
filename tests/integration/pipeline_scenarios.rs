//! End-to-end generation runs through the admin facade.

use std::sync::Arc;

use nattevakt::error::ProviderError;
use nattevakt::generation::RunOutcome;
use nattevakt::rate::RateLimiter;
use nattevakt::writer::AtomicWriter;
use tempfile::TempDir;

use crate::integration::test_utils::{
    build_api, read_artifact, test_config, write_source, ScriptedProvider,
};

const ACME: &str = r#"[{"tekst":"kl 03:15 – Acme Bakery åpner tidlig i dag","score":80}]"#;

#[tokio::test]
async fn scenario_a_successful_run_persists_sanitized_item() {
    let ws = TempDir::new().unwrap();
    write_source(&ws, "businesses.json", r#"[{"name":"Acme Bakery"}]"#);
    let provider = ScriptedProvider::replying(ACME);
    let api = build_api(&ws, test_config(ws.path()), Some(provider.clone()), AtomicWriter::new());

    let report = api.generate_now().await;
    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(report.items, 1);

    let prompts = provider.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Acme Bakery"));

    let items = read_artifact(&api);
    let items = items.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["tekst"], "kl 03:15 – Acme Bakery åpner tidlig i dag");
    assert_eq!(items[0]["score"], 80);

    let status = api.status();
    assert_eq!(status.runtime.unwrap().calls_this_hour, 1);
    assert!(status.last_generation.is_some());
}

#[tokio::test]
async fn scenario_b_api_error_without_snapshot_serves_placeholders() {
    let ws = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(vec![Err(ProviderError::RequestFailed(
        "connection reset".into(),
    ))]);
    let api = build_api(&ws, test_config(ws.path()), Some(provider), AtomicWriter::new());

    let report = api.generate_now().await;
    assert_eq!(report.outcome, RunOutcome::OfflineFallback);
    assert_eq!(report.outcome.code(), "offline_fallback");
    assert!(report.persisted);
    assert_eq!(report.failure.as_ref().unwrap().code, "external_api");

    let items = read_artifact(&api);
    let items = items.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert!(items[0]["tekst"].as_str().unwrap().contains("Pjuskeby"));

    let journal = api.recent_errors(10).unwrap();
    assert!(journal.iter().any(|e| e.kind == "external_api"));
    assert!(journal.iter().any(|e| e.kind == "offline_fallback"));
}

#[tokio::test]
async fn scenario_c_failed_verification_restores_previous_artifact() {
    let ws = TempDir::new().unwrap();
    let config = test_config(ws.path());
    let previous = b"[{\"tid\":\"01:00\",\"tekst\":\"kl 01:00 \xE2\x80\x93 Alt er rolig i Pjuskeby\",\"score\":50}]\n";
    write_source(&ws, "nattavis.json", std::str::from_utf8(previous).unwrap());

    let corrupting = AtomicWriter::with_read_back(Arc::new(|_| Ok(b"corrupted".to_vec())));
    let provider = ScriptedProvider::replying(ACME);
    let api = build_api(&ws, config, Some(provider.clone()), corrupting);

    let report = api.generate_now().await;
    assert_eq!(provider.calls(), 1);
    assert_eq!(report.failure.as_ref().unwrap().code, "write_verification_failed");
    assert_eq!(report.outcome, RunOutcome::OfflineFallback);
    assert!(!report.persisted);

    let on_disk = std::fs::read(&api.paths().output_path).unwrap();
    assert_eq!(on_disk, previous);
    let leftovers: Vec<_> = std::fs::read_dir(&api.paths().data_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n != "nattavis.json")
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
}

#[tokio::test]
async fn scenario_d_rate_ceiling_blocks_before_api_call() {
    let ws = TempDir::new().unwrap();
    let mut config = test_config(ws.path());
    config.generation.calls_per_hour = 2;
    let provider = ScriptedProvider::replying(ACME);
    let api = build_api(&ws, config, Some(provider.clone()), AtomicWriter::new());

    let counter = RateLimiter::new(api.cache_session().unwrap(), 2);
    counter.record_call().unwrap();
    counter.record_call().unwrap();

    let report = api.generate_now().await;
    assert_eq!(provider.calls(), 0);
    assert_eq!(report.failure.as_ref().unwrap().code, "rate_limit_exceeded");
    assert_ne!(report.outcome, RunOutcome::Success);
    assert_eq!(counter.calls_this_hour().unwrap(), 2);
}

#[tokio::test]
async fn degraded_run_after_success_serves_offline_snapshot() {
    let ws = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(vec![
        Ok(ACME.to_string()),
        Ok("Beklager, ingen nyheter i natt.".to_string()),
    ]);
    let api = build_api(&ws, test_config(ws.path()), Some(provider), AtomicWriter::new());

    assert_eq!(api.generate_now().await.outcome, RunOutcome::Success);
    let report = api.generate_now().await;
    assert_eq!(report.failure.as_ref().unwrap().code, "parse_empty");
    assert_eq!(report.outcome, RunOutcome::OfflineCache);

    let items = read_artifact(&api);
    assert_eq!(items[0]["tekst"], "kl 03:15 – Acme Bakery åpner tidlig i dag");
}

#[tokio::test]
async fn missing_api_key_degrades_and_reports_unhealthy() {
    let ws = TempDir::new().unwrap();
    let api = build_api(&ws, test_config(ws.path()), None, AtomicWriter::new());

    let report = api.generate_now().await;
    assert_eq!(report.outcome, RunOutcome::OfflineFallback);

    let status = api.status();
    assert!(!status.config.api_key_set);
    assert_eq!(status.health.to_string(), "unhealthy");
    assert!(status.runtime.unwrap().recent_errors >= 1);
}

#[tokio::test]
async fn clear_logs_empties_the_journal() {
    let ws = TempDir::new().unwrap();
    let api = build_api(&ws, test_config(ws.path()), None, AtomicWriter::new());
    api.generate_now().await;
    assert!(!api.recent_errors(50).unwrap().is_empty());

    let removed = api.clear_logs().unwrap();
    assert!(removed > 0);
    assert!(api.recent_errors(50).unwrap().is_empty());
}
