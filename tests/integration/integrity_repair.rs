//! Integrity check and auto-repair through the admin facade.

use std::time::Duration;

use nattevakt::config::LockBackendKind;
use nattevakt::error::ProviderError;
use nattevakt::generation::RunOutcome;
use nattevakt::integrity::{IntegrityStatus, IssueKind, RepairStatus};
use nattevakt::lock::{LockBackend, LockManager};
use nattevakt::writer::AtomicWriter;
use tempfile::TempDir;

use crate::integration::test_utils::{build_api, test_config, write_source, ScriptedProvider};

const GOOD: &str = r#"[{"tekst":"kl 04:00 – Postkontoret i Pjuskeby fikk nytt skilt","score":55}]"#;

#[tokio::test]
async fn empty_data_dir_is_critical_until_repaired() {
    let ws = TempDir::new().unwrap();
    let api = build_api(&ws, test_config(ws.path()), None, AtomicWriter::new());

    let report = api.check_integrity();
    assert_eq!(report.summary.status, IntegrityStatus::Critical);
    assert!(report
        .issues
        .iter()
        .any(|i| i.file == "businesses.json" && i.kind == IssueKind::Missing && i.critical));
    assert!(!report.recommendations.is_empty());

    let records = api.auto_fix().await.unwrap();
    assert!(records
        .iter()
        .filter(|r| r.file.ends_with(".json") && r.file != "nattavis.json")
        .all(|r| r.status == RepairStatus::Created));

    let after = api.check_integrity();
    assert!(after.is_healthy(), "{:?}", after.issues);
    assert_eq!(after.summary.total, 0);
}

#[tokio::test]
async fn repair_keeps_valid_entries_and_is_journaled() {
    let ws = TempDir::new().unwrap();
    write_source(&ws, "lakes.json", r#"[{"name":"Speilvann"},{"name":"Gjøkvann"},"rusk"]"#);
    write_source(&ws, "sports.json", "not json at all");
    let api = build_api(&ws, test_config(ws.path()), None, AtomicWriter::new());

    let report = api.check_integrity();
    assert!(report
        .issues
        .iter()
        .any(|i| i.file == "sports.json" && i.kind == IssueKind::InvalidJson));

    let records = api.auto_fix().await.unwrap();
    let lakes = records.iter().find(|r| r.file == "lakes.json").unwrap();
    assert_eq!(lakes.status, RepairStatus::Improved);
    let sports = records.iter().find(|r| r.file == "sports.json").unwrap();
    assert_eq!(sports.status, RepairStatus::Repaired);

    let raw = std::fs::read_to_string(api.paths().data_dir.join("lakes.json")).unwrap();
    let lakes: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(lakes.as_array().unwrap().len(), 2);
    assert_eq!(lakes[0]["name"], "Speilvann");

    let journal = api.recent_errors(100).unwrap();
    assert!(journal.iter().any(|e| e.kind == "file_repaired"));
}

#[tokio::test]
async fn next_run_sees_repaired_sources() {
    let ws = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(vec![
        Err(ProviderError::RequestFailed("timeout".into())),
        Ok(GOOD.to_string()),
    ]);
    let api = build_api(&ws, test_config(ws.path()), Some(provider.clone()), AtomicWriter::new());

    let first = api.generate_now().await;
    assert_ne!(first.outcome, RunOutcome::Success);

    api.auto_fix().await.unwrap();
    let second = api.generate_now().await;
    assert_eq!(second.outcome, RunOutcome::Success);

    let prompts = provider.prompts();
    assert!(!prompts[0].contains("Regnskap & Regn AS"));
    assert!(prompts[1].contains("Regnskap & Regn AS"));
}

#[tokio::test]
async fn artifact_is_left_alone_while_a_run_holds_the_lock() {
    let ws = TempDir::new().unwrap();
    write_source(&ws, "nattavis.json", "{half written");
    let mut config = test_config(ws.path());
    config.coordination.lock_backend = LockBackendKind::LocalFile;
    let api = build_api(&ws, config, None, AtomicWriter::new());

    let generation = LockManager::new(
        LockBackend::LocalFile {
            dir: api.paths().lock_dir.clone(),
        },
        Duration::from_millis(50),
        Duration::from_millis(10),
    );
    let key = format!("{}:generation", api.paths().output_path.display());
    let held = generation.try_acquire(&key).unwrap().unwrap();

    let records = api.auto_fix().await.unwrap();
    let artifact = records.iter().find(|r| r.file == "nattavis.json").unwrap();
    assert_eq!(artifact.status, RepairStatus::Skipped);
    assert!(records
        .iter()
        .filter(|r| r.file != "nattavis.json")
        .all(|r| r.status == RepairStatus::Created));
    assert_eq!(
        std::fs::read_to_string(&api.paths().output_path).unwrap(),
        "{half written"
    );
    let journal = api.recent_errors(100).unwrap();
    assert!(journal.iter().any(|e| e.kind == "repair_skipped"));

    drop(held);
    let records = api.auto_fix().await.unwrap();
    let artifact = records.iter().find(|r| r.file == "nattavis.json").unwrap();
    assert_eq!(artifact.status, RepairStatus::Repaired);
    assert!(api.check_integrity().is_healthy());
}
